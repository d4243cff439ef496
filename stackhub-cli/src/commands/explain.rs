//! `hub explain` command

use super::state_locations;
use anyhow::{bail, Result};
use stackhub_core::state::{ExplainFormat, ExplainOptions};
use stackhub_core::{Config, StateManifest};

pub fn explain(
    config: &Config,
    state: &[String],
    format: ExplainFormat,
    component: Option<String>,
    show_secrets: bool,
    show_operations: bool,
) -> Result<()> {
    let locations = state_locations(config, state)?;
    let Some(state) = StateManifest::load(&locations)? else {
        let names: Vec<String> = locations.iter().map(|l| l.to_string()).collect();
        bail!("No state found at {}", names.join(", "));
    };
    let options = ExplainOptions { format, component, show_secrets, show_operations };
    print!("{}", state.explain(&options)?);
    Ok(())
}
