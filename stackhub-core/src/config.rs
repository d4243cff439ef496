//! Configuration management.
//!
//! The configuration is read once at startup and handed to the commands and the
//! executor explicitly.

use crate::error::{HubError, Result};
use crate::lifecycle::OsEnvironmentMode;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persistent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    /// Elaborate manifest written by `elaborate` and read by lifecycle verbs.
    pub elaborate_file: String,
    /// State file used when no `-s` is given.
    pub state_file: String,
    /// Base directory component sources are resolved against.
    pub components_base_dir: Option<String>,
    pub os_environment_mode: OsEnvironmentMode,
    /// Relay component stdout/stderr to the terminal while capturing it.
    pub relay_output: bool,
    /// Expand unresolved expression names to `<name>` instead of failing.
    pub auto_resolve: bool,
    /// Where translated control-plane patches are written when sync is on.
    pub sync_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            elaborate_file: paths::DEFAULT_ELABORATE_FILE.to_string(),
            state_file: paths::DEFAULT_STATE_FILE.to_string(),
            components_base_dir: None,
            os_environment_mode: OsEnvironmentMode::Everything,
            relay_output: true,
            auto_resolve: false,
            sync_file: None,
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_path()
    }

    /// Load configuration from disk, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| HubError::InvalidConfig {
            reason: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&content).map_err(|e| HubError::InvalidConfig {
            reason: format!("Failed to parse config {}: {}", path.display(), e),
        })
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HubError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| HubError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(&path, content).map_err(|e| HubError::IoError { path, source: e })
    }

    /// Components base directory, from the config or the environment.
    pub fn components_base_dir(&self) -> PathBuf {
        match &self.components_base_dir {
            Some(dir) => PathBuf::from(dir),
            None => paths::components_base_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.elaborate_file, "hub.yaml.elaborate");
        assert_eq!(config.os_environment_mode, OsEnvironmentMode::Everything);
        assert!(config.relay_output);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"os_environment_mode": "strict", "auto_resolve": true}"#)
            .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.os_environment_mode, OsEnvironmentMode::Strict);
        assert!(config.auto_resolve);
        assert_eq!(config.state_file, "hub.yaml.state");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(Config::load_from(&path), Err(HubError::InvalidConfig { .. })));
    }
}
