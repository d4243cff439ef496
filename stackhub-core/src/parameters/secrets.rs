//! Secret dereferencing.
//!
//! Secret parameters carry only a reference. Plaintext is fetched through a
//! [`SecretResolver`] at the moment a component process needs it and goes
//! nowhere but that process's environment.

use crate::error::{HubError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// Source of secret plaintext.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Fetch the plaintext behind `reference`.
    async fn resolve(&self, reference: &str, kind: Option<&str>) -> Result<String>;

    /// Resolver name for logs.
    fn name(&self) -> &str;
}

/// Resolver used when no secret store is configured.
#[derive(Debug, Clone, Default)]
pub struct UnavailableSecrets;

#[async_trait]
impl SecretResolver for UnavailableSecrets {
    async fn resolve(&self, reference: &str, _kind: Option<&str>) -> Result<String> {
        Err(HubError::SecretUnavailable {
            reference: reference.to_string(),
            reason: "no secret store configured".to_string(),
        })
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// In-memory secrets, keyed by reference.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: BTreeMap<String, String>,
}

impl StaticSecrets {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Load a YAML mapping of reference to plaintext.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HubError::IoError { path: path.to_path_buf(), source: e })?;
        let values: BTreeMap<String, String> = serde_yaml::from_str(&content).map_err(|e| {
            HubError::InvalidConfig { reason: format!("secrets file {}: {}", path.display(), e) }
        })?;
        Ok(Self { values })
    }

    pub fn insert(&mut self, reference: impl Into<String>, value: impl Into<String>) {
        self.values.insert(reference.into(), value.into());
    }
}

#[async_trait]
impl SecretResolver for StaticSecrets {
    async fn resolve(&self, reference: &str, _kind: Option<&str>) -> Result<String> {
        self.values.get(reference).cloned().ok_or_else(|| HubError::SecretUnavailable {
            reference: reference.to_string(),
            reason: "not found".to_string(),
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}
