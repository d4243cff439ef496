//! Where state files live and how they are written.

use crate::error::{HubError, Result};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Write `bytes` to `path` so a reader sees either the old or the new file.
///
/// The temporary file is created next to the destination so the final
/// rename stays on one filesystem.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    temp.as_file_mut().write_all(bytes)?;
    temp.as_file_mut().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// A single state destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateLocation {
    File(PathBuf),
}

impl StateLocation {
    /// Parse a plain path or a `file://` URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(HubError::UnsupportedStateLocation { location: raw.to_string() });
        }
        if let Some(path) = raw.strip_prefix("file://") {
            return Ok(StateLocation::File(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = raw.split_once("://") {
            let valid = |c: char| c.is_ascii_alphanumeric() || "+-.".contains(c);
            if !scheme.is_empty() && scheme.chars().all(valid) {
                return Err(HubError::UnsupportedStateLocation { location: raw.to_string() });
            }
        }
        Ok(StateLocation::File(PathBuf::from(raw)))
    }

    /// Parse a comma-separated list, e.g. `hub.yaml.state,file:///backup/hub.state`.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        raw.split(',').filter(|s| !s.trim().is_empty()).map(Self::parse).collect()
    }

    pub fn storage(&self) -> Box<dyn StateStorage> {
        match self {
            StateLocation::File(path) => Box::new(FileStorage::new(path.clone())),
        }
    }

    /// Local path, for locations that have one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            StateLocation::File(path) => Some(path),
        }
    }
}

impl fmt::Display for StateLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Byte-level access to one state destination.
pub trait StateStorage: Send + Sync {
    /// Current contents, `None` if nothing was written yet.
    fn read(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the contents atomically.
    fn write(&self, bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStorage for FileStorage {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HubError::StateRead {
                location: self.path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        atomic_write(&self.path, bytes).map_err(|e| HubError::StateWrite {
            location: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locations() {
        let list = StateLocation::parse_list("hub.yaml.state, file:///tmp/mirror.state").unwrap();
        assert_eq!(
            list,
            vec![
                StateLocation::File(PathBuf::from("hub.yaml.state")),
                StateLocation::File(PathBuf::from("/tmp/mirror.state")),
            ]
        );
    }

    #[test]
    fn test_remote_schemes_rejected() {
        for spec in ["s3://bucket/hub.state", "gs://bucket/state", "az://c/state"] {
            assert!(matches!(
                StateLocation::parse(spec),
                Err(HubError::UnsupportedStateLocation { .. })
            ));
        }
    }

    #[test]
    fn test_atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.yaml");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        // No temporary files left behind.
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_file_storage_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("absent"));
        assert!(storage.read().unwrap().is_none());
        storage.write(b"x").unwrap();
        assert_eq!(storage.read().unwrap().unwrap(), b"x");
    }
}
