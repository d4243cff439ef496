//! `hub deploy`, `hub undeploy` and `hub backup`

use super::Files;
use anyhow::{Context, Result};
use colored::Colorize;
use stackhub_core::lifecycle::ComponentReport;
use stackhub_core::state::CapturedOutput;
use stackhub_core::sync::{self, FilePatchSink, PatchSink};
use stackhub_core::{Config, RunReport, StateLocation, StateManifest, StepStatus, Verb, Warnings};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tabled::{settings::Style, Table, Tabled};
use tracing::warn;

pub struct LifecycleOptions {
    pub files: Files,
    pub components: Vec<String>,
    pub offset: Option<String>,
    pub limit: Option<String>,
    pub guess: bool,
    pub dry_run: bool,
    pub force: bool,
    pub hub_sync: bool,
    pub hub_sync_file: Option<PathBuf>,
}

/// Run `verb` over the stack.
pub async fn run(
    config: &Config,
    warnings: &Warnings,
    verb: &str,
    options: LifecycleOptions,
) -> Result<()> {
    let manifest = options.files.manifest(config).context("Failed to load elaborate manifest")?;
    let mut request = options.files.request(config, Verb::parse(verb))?;
    request.components = options.components;
    request.offset = options.offset;
    request.limit = options.limit;
    request.guess = options.guess;
    request.dry_run = options.dry_run;
    request.force = options.force;

    let executor = options.files.executor(config, warnings)?;
    let cancel = executor.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current component");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let mode = if request.dry_run { " (dry run)".yellow().to_string() } else { String::new() };
    println!("{} {} {}{}", "→".cyan().bold(), verb.bold(), manifest.meta.name, mode);

    let result = executor.run(&manifest, &request).await;
    if let Ok(report) = &result {
        print_report(report);
    }

    if options.hub_sync && !request.dry_run {
        let destination =
            options.hub_sync_file.or_else(|| config.sync_file.as_ref().map(PathBuf::from));
        let synced = sync_state(destination, warnings, &request.state).await;
        match (&result, synced) {
            (Ok(_), synced) => synced?,
            // The run's own failure is the one reported.
            (Err(_), Err(e)) => warnings.push(format!("Sync failed: {:#}", e)),
            (Err(_), Ok(())) => {}
        }
    }

    let report = result?;
    println!("{} {} {}", "✓".green().bold(), verb, report.status);
    Ok(())
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "COMPONENT")]
    component: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "OUTPUTS")]
    outputs: String,
}

fn print_report(report: &RunReport) {
    if report.components.is_empty() {
        println!("Nothing to {}", report.verb);
        return;
    }

    let rows: Vec<ComponentRow> = report.components.iter().map(row).collect();
    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    if !report.stack_outputs.is_empty() {
        println!("{}", "Outputs:".bold());
        for output in &report.stack_outputs {
            println!("  {} = {}", output.name, display_value(output));
        }
    }
}

fn row(report: &ComponentReport) -> ComponentRow {
    let status = match report.status {
        StepStatus::Success => report.status.to_string().green().to_string(),
        StepStatus::Failed => report.status.to_string().red().to_string(),
        _ => report.status.to_string().yellow().to_string(),
    };
    let outputs = report
        .outputs
        .iter()
        .map(|o| format!("{} = {}", o.name, display_value(o)))
        .collect::<Vec<_>>()
        .join("\n");
    ComponentRow { component: report.component.clone(), status, outputs }
}

fn display_value(output: &CapturedOutput) -> String {
    if output.is_secret() {
        "*****".to_string()
    } else {
        output.value.clone()
    }
}

/// Translate the saved state and hand it to the configured sink.
async fn sync_state(
    destination: Option<PathBuf>,
    warnings: &Warnings,
    locations: &[StateLocation],
) -> Result<()> {
    let Some(path) = destination else {
        warnings.push("--hub-sync given but no sync file is configured");
        return Ok(());
    };
    let Some(state) = StateManifest::load(locations)? else {
        return Ok(());
    };
    let patch = sync::patch(&state);
    FilePatchSink::new(&path).send(&patch).await?;
    println!("{} patch written to {}", "→".cyan().bold(), path.display());
    Ok(())
}
