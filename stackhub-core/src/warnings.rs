//! Collector for non-fatal issues raised during a run.
//!
//! Every warning is logged when raised and kept so the CLI can print the whole
//! list once more at exit.

use std::sync::{Arc, Mutex};
use tracing::warn;

/// Cloneable handle to a shared warning list.
#[derive(Debug, Clone, Default)]
pub struct Warnings {
    inner: Arc<Mutex<Vec<String>>>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and record a warning.
    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        if let Ok(mut list) = self.inner.lock() {
            list.push(message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map(|l| l.is_empty()).unwrap_or(true)
    }

    /// Snapshot of all warnings raised so far, in order.
    pub fn all(&self) -> Vec<String> {
        self.inner.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_list() {
        let warnings = Warnings::new();
        let other = warnings.clone();
        other.push("first");
        warnings.push(String::from("second"));
        assert_eq!(warnings.all(), vec!["first".to_string(), "second".to_string()]);
        assert!(!other.is_empty());
    }
}
