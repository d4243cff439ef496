//! Centralized path configuration.
//!
//! Default file names and the configuration location live here so the CLI and
//! nested component invocations agree on them.

use std::path::PathBuf;

/// Default elaborate manifest file name.
pub const DEFAULT_ELABORATE_FILE: &str = "hub.yaml.elaborate";

/// Default state file name.
pub const DEFAULT_STATE_FILE: &str = "hub.yaml.state";

/// Get the configuration directory.
///
/// Resolution order:
/// 1. `HUB_CONFIG_DIR` environment variable
/// 2. `<platform config dir>/stackhub`
/// 3. `~/.stackhub`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HUB_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(dir) = dirs::config_dir() {
        return dir.join("stackhub");
    }

    dirs::home_dir().map(|h| h.join(".stackhub")).unwrap_or_else(|| PathBuf::from(".stackhub"))
}

/// Get the configuration file path.
///
/// `HUB_CONFIG` points at a file directly and wins over [`config_dir`].
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("HUB_CONFIG") {
        return PathBuf::from(path);
    }
    config_dir().join("config.json")
}

/// Directory component sources are looked up in when the manifest does not
/// say otherwise: `HUB_COMPONENTS_BASEDIR`, else the current directory.
pub fn components_base_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HUB_COMPONENTS_BASEDIR") {
        return PathBuf::from(dir);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_from_env() {
        std::env::set_var("HUB_CONFIG", "/tmp/stackhub-test/config.json");
        assert_eq!(config_path(), PathBuf::from("/tmp/stackhub-test/config.json"));
        std::env::remove_var("HUB_CONFIG");
    }

    #[test]
    fn test_config_dir_from_env() {
        std::env::set_var("HUB_CONFIG_DIR", "/tmp/stackhub-conf");
        assert_eq!(config_dir(), PathBuf::from("/tmp/stackhub-conf"));
        std::env::remove_var("HUB_CONFIG_DIR");
    }
}
