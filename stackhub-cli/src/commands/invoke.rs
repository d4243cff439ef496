//! `hub invoke` command

use super::Files;
use anyhow::{Context, Result};
use colored::Colorize;
use stackhub_core::{Config, Verb, Warnings};

/// Run one verb of one component and print what it reported.
pub async fn invoke(
    config: &Config,
    warnings: &Warnings,
    component: &str,
    verb: &str,
    files: Files,
    dry_run: bool,
) -> Result<()> {
    let manifest = files.manifest(config).context("Failed to load elaborate manifest")?;
    let mut request = files.request(config, Verb::parse(verb))?;
    request.dry_run = dry_run;

    let executor = files.executor(config, warnings)?;
    let report = executor.invoke(&manifest, &request, component, verb).await?;

    println!("{} {} {}", "✓".green().bold(), report.component.bold(), report.verb);
    for output in &report.outputs {
        let value = if output.is_secret() { "*****" } else { output.value.as_str() };
        println!("  {} = {}", output.name, value);
    }
    Ok(())
}
