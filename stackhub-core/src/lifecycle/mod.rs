//! Lifecycle execution.
//!
//! Walks the resolved component order, runs each component's verb as an
//! external process and checkpoints the state journal after every component.

mod env;
mod executor;
pub mod outputs;
mod plan;
mod runner;

pub use env::{EnvironmentBuilder, InvocationContext};
pub use executor::{ComponentReport, InvokeReport, LifecycleExecutor, RunReport};
pub use plan::plan;
pub use runner::{
    ComponentRunner, Implementation, ImplementationCache, Invocation, ProcessRunner, RunOutcome,
};

use crate::error::HubError;
use crate::state::StateLocation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// How much of the caller's environment reaches component processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OsEnvironmentMode {
    /// Pass everything through.
    #[default]
    Everything,
    /// Drop `TF_VAR_*` variables.
    NoTfvars,
    /// Keep only a minimal set needed to run programs.
    Strict,
}

impl OsEnvironmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsEnvironmentMode::Everything => "everything",
            OsEnvironmentMode::NoTfvars => "no-tfvars",
            OsEnvironmentMode::Strict => "strict",
        }
    }
}

impl FromStr for OsEnvironmentMode {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "everything" => Ok(OsEnvironmentMode::Everything),
            "no-tfvars" => Ok(OsEnvironmentMode::NoTfvars),
            "strict" => Ok(OsEnvironmentMode::Strict),
            other => Err(HubError::InvalidConfig {
                reason: format!("unknown OS environment mode '{}'", other),
            }),
        }
    }
}

impl fmt::Display for OsEnvironmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lifecycle verb.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Verb {
    #[default]
    Deploy,
    Undeploy,
    Backup,
    Custom(String),
}

impl Verb {
    pub fn parse(s: &str) -> Self {
        match s {
            "deploy" => Verb::Deploy,
            "undeploy" => Verb::Undeploy,
            "backup" => Verb::Backup,
            other => Verb::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Verb::Deploy => "deploy",
            Verb::Undeploy => "undeploy",
            Verb::Backup => "backup",
            Verb::Custom(name) => name,
        }
    }

    /// Undeploy tears down in reverse order.
    pub fn is_reverse(&self) -> bool {
        *self == Verb::Undeploy
    }

    /// Name of the script actually run.
    pub fn script(&self, dry_run: bool) -> String {
        if dry_run {
            format!("{}-test", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters of one execution. Built once, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub verb: Verb,
    /// Elaborate manifest paths, exported to nested invocations
    pub elaborate: Vec<PathBuf>,
    pub state: Vec<StateLocation>,
    /// Run only these components, in order
    pub components: Vec<String>,
    /// Start at this component
    pub offset: Option<String>,
    /// Stop after this component
    pub limit: Option<String>,
    /// Start at the first component the prior state has not completed
    pub guess: bool,
    pub dry_run: bool,
    pub force: bool,
    pub os_environment_mode: OsEnvironmentMode,
    pub env_overrides: BTreeMap<String, String>,
}

impl Request {
    pub fn new(verb: Verb) -> Self {
        Self { verb, ..Default::default() }
    }

    /// Options recorded on the lifecycle operation.
    pub fn options(&self) -> BTreeMap<String, String> {
        let mut options = BTreeMap::new();
        if !self.components.is_empty() {
            options.insert("components".to_string(), self.components.join(","));
        }
        if let Some(offset) = &self.offset {
            options.insert("offset".to_string(), offset.clone());
        }
        if let Some(limit) = &self.limit {
            options.insert("limit".to_string(), limit.clone());
        }
        if self.guess {
            options.insert("guess".to_string(), "true".to_string());
        }
        if self.dry_run {
            options.insert("dryRun".to_string(), "true".to_string());
        }
        if self.force {
            options.insert("force".to_string(), "true".to_string());
        }
        options.insert("osEnvironment".to_string(), self.os_environment_mode.to_string());
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_script() {
        assert_eq!(Verb::Deploy.script(false), "deploy");
        assert_eq!(Verb::Undeploy.script(true), "undeploy-test");
        assert_eq!(Verb::parse("backup"), Verb::Backup);
        assert_eq!(Verb::parse("rotate").as_str(), "rotate");
        assert!(Verb::Undeploy.is_reverse());
        assert!(!Verb::Backup.is_reverse());
    }

    #[test]
    fn test_os_environment_mode() {
        assert_eq!("no-tfvars".parse::<OsEnvironmentMode>().unwrap(), OsEnvironmentMode::NoTfvars);
        assert!("none".parse::<OsEnvironmentMode>().is_err());
        let mode: OsEnvironmentMode = serde_json::from_str("\"strict\"").unwrap();
        assert_eq!(mode, OsEnvironmentMode::Strict);
    }

    #[test]
    fn test_request_options() {
        let mut request = Request::new(Verb::Deploy);
        request.offset = Some("k8s".into());
        request.dry_run = true;
        let options = request.options();
        assert_eq!(options["offset"], "k8s");
        assert_eq!(options["dryRun"], "true");
        assert_eq!(options["osEnvironment"], "everything");
    }
}
