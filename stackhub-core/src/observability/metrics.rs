//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    describe_counter!(
        "stackhub_component_runs_total",
        "Total component verb invocations (by verb, status)"
    );
    describe_histogram!(
        "stackhub_component_duration_seconds",
        "Wall time of a component verb invocation (by verb)"
    );
    describe_counter!("stackhub_state_writes_total", "State journal writes (by status)");
    describe_counter!("stackhub_elaborations_total", "Parameter elaborations (by status)");
}

pub fn record_component_run(verb: &str, status: &str, duration_secs: f64) {
    counter!(
        "stackhub_component_runs_total",
        "verb" => verb.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("stackhub_component_duration_seconds", "verb" => verb.to_string())
        .record(duration_secs);
}

pub fn record_state_write(ok: bool) {
    let status = if ok { "ok" } else { "error" };
    counter!("stackhub_state_writes_total", "status" => status).increment(1);
}

pub fn record_elaboration(ok: bool) {
    let status = if ok { "ok" } else { "error" };
    counter!("stackhub_elaborations_total", "status" => status).increment(1);
}
