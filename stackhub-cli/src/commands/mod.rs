//! CLI command implementations

pub mod elaborate;
pub mod explain;
pub mod invoke;
pub mod lifecycle;
pub mod order;

use anyhow::{bail, Context, Result};
use stackhub_core::lifecycle::OsEnvironmentMode;
use stackhub_core::parameters::{SecretResolver, StaticSecrets, UnavailableSecrets};
use stackhub_core::{
    Config, ElaborateManifest, LifecycleExecutor, Request, StateLocation, Verb, Warnings,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File and environment options shared by commands that run components.
pub struct Files {
    pub elaborate: Vec<PathBuf>,
    pub state: Vec<String>,
    pub base_dir: Option<PathBuf>,
    pub secrets: Option<PathBuf>,
    pub os_environment: Option<OsEnvironmentMode>,
    pub env: Vec<String>,
    pub silent: bool,
}

impl Files {
    fn elaborate_paths(&self, config: &Config) -> Vec<PathBuf> {
        if self.elaborate.is_empty() {
            vec![PathBuf::from(&config.elaborate_file)]
        } else {
            self.elaborate.clone()
        }
    }

    /// Read the first elaborate manifest.
    pub fn manifest(&self, config: &Config) -> Result<ElaborateManifest> {
        let paths = self.elaborate_paths(config);
        let path = &paths[0];
        Ok(ElaborateManifest::load(path)?)
    }

    pub fn request(&self, config: &Config, verb: Verb) -> Result<Request> {
        let mut request = Request::new(verb);
        // Children run in their component directory.
        request.elaborate =
            self.elaborate_paths(config).iter().map(|p| absolute(p)).collect::<Result<_>>()?;
        request.state = state_locations(config, &self.state)?
            .into_iter()
            .map(|location| match location {
                StateLocation::File(path) => absolute(&path).map(StateLocation::File),
            })
            .collect::<Result<_>>()?;
        request.os_environment_mode = self.os_environment.unwrap_or(config.os_environment_mode);
        request.env_overrides = parse_pairs(&self.env)?;
        Ok(request)
    }

    pub fn executor(&self, config: &Config, warnings: &Warnings) -> Result<LifecycleExecutor> {
        let secrets: Arc<dyn SecretResolver> = match &self.secrets {
            Some(path) => Arc::new(StaticSecrets::from_file(path)?),
            None => Arc::new(UnavailableSecrets),
        };
        Ok(LifecycleExecutor::new(config, warnings.clone())
            .with_secrets(secrets)
            .with_base_dir(self.base_dir.clone())
            .with_relay(config.relay_output && !self.silent))
    }
}

/// State locations from `-s`, or the configured state file.
pub fn state_locations(config: &Config, given: &[String]) -> Result<Vec<StateLocation>> {
    if given.is_empty() {
        return Ok(vec![StateLocation::parse(&config.state_file)?]);
    }
    let mut locations = Vec::new();
    for spec in given {
        locations.push(StateLocation::parse(spec)?);
    }
    Ok(locations)
}

/// Parse `NAME=VALUE` pairs.
pub fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("Invalid assignment '{}', expected NAME=VALUE", pair);
        };
        if name.is_empty() {
            bail!("Invalid assignment '{}': empty name", pair);
        }
        out.insert(name.to_string(), value.to_string());
    }
    Ok(out)
}

/// Absolute form of `path` for nested invocations.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs(&["a=1".into(), "b|app=x=y".into()]).unwrap();
        assert_eq!(pairs["a"], "1");
        assert_eq!(pairs["b|app"], "x=y");
        assert!(parse_pairs(&["nope".into()]).is_err());
        assert!(parse_pairs(&["=1".into()]).is_err());
    }

    #[test]
    fn test_default_state_location() {
        let config = Config::default();
        let locations = state_locations(&config, &[]).unwrap();
        assert_eq!(locations[0].to_string(), "hub.yaml.state");
        assert!(state_locations(&config, &["s3://bucket/state".into()]).is_err());
    }
}
