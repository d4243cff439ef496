//! Integration tests for observability setup.
//!
//! Metrics are recorded without an installed recorder, which the `metrics`
//! facade turns into no-ops. These tests only check that setup and recording
//! never fail a run.

use stackhub_core::observability::{self, metrics::*};

#[test]
fn test_init_twice_is_harmless() {
    let _ = observability::init("debug");
    // Only one subscriber can be global; the second attempt reports it.
    assert!(observability::init("info").is_err());
}

#[test]
fn test_recording_without_recorder() {
    register_core_metrics();
    record_component_run("deploy", "success", 0.25);
    record_component_run("undeploy", "failed", 1.5);
    record_state_write(true);
    record_state_write(false);
    record_elaboration(true);
}
