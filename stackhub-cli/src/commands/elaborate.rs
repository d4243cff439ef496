//! `hub elaborate` command

use super::{parse_pairs, state_locations};
use anyhow::{Context, Result};
use colored::Colorize;
use stackhub_core::expression::ResolveMode;
use stackhub_core::manifest::load_parameter_files;
use stackhub_core::{Config, Elaborator, ManifestParser, StateManifest, Warnings};
use std::path::PathBuf;

pub struct ElaborateArgs {
    pub manifest: PathBuf,
    pub params: Vec<PathBuf>,
    pub overrides: Vec<String>,
    pub state: Vec<String>,
    pub output: Vec<PathBuf>,
    pub base_dir: Option<String>,
    pub auto_resolve: bool,
}

/// Merge the stack manifest and parameter files and write the result.
pub fn elaborate(config: &Config, warnings: &Warnings, args: ElaborateArgs) -> Result<()> {
    let stack = ManifestParser::parse_file(&args.manifest)
        .with_context(|| format!("Failed to load {}", args.manifest.display()))?;
    let files = load_parameter_files(&args.params)?;
    let overrides = parse_pairs(&args.overrides)?;

    let locked = if args.state.is_empty() {
        Vec::new()
    } else {
        let locations = state_locations(config, &args.state)?;
        StateManifest::load_or_warn(&locations, warnings)
            .map(|s| s.locked_parameters())
            .unwrap_or_default()
    };

    let mode = if args.auto_resolve || config.auto_resolve {
        ResolveMode::AutoResolve
    } else {
        ResolveMode::Strict
    };
    let manifest = Elaborator::new(warnings.clone())
        .with_mode(mode)
        .with_os_env(std::env::vars().collect())
        .with_base_dir(args.base_dir.or_else(|| config.components_base_dir.clone()))
        .elaborate(&stack, &files, &locked, &overrides)?;

    let output = if args.output.is_empty() {
        vec![PathBuf::from(&config.elaborate_file)]
    } else {
        args.output
    };
    manifest.save(&output)?;

    println!(
        "{} Elaborated {} ({} components, {} parameters)",
        "✓".green().bold(),
        manifest.meta.name.bold(),
        manifest.components.len(),
        manifest.parameters.len()
    );
    println!("  {} {}", "order:".dimmed(), manifest.lifecycle.order.join(" → "));
    for path in &output {
        println!("  {} {}", "wrote:".dimmed(), path.display());
    }
    Ok(())
}
