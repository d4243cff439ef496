//! Error types for the stack lifecycle engine.
//!
//! All errors use `thiserror` and are grouped into kinds that decide how far a
//! failure propagates and which exit code the CLI reports.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Coarse classification of a [`HubError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed manifest or unsatisfiable dependency graph. Always fatal.
    Manifest,
    /// A parameter could not be given a value.
    ParameterResolution,
    /// A component verb failed or could not be started.
    Execution,
    /// The state journal could not be read or written.
    StateIo,
    /// The control plane refused a patch.
    Sync,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Manifest => "manifest",
            ErrorKind::ParameterResolution => "parameter-resolution",
            ErrorKind::Execution => "execution",
            ErrorKind::StateIo => "state-io",
            ErrorKind::Sync => "sync",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Main error type for the engine.
#[derive(Error, Debug)]
pub enum HubError {
    // Manifest errors
    #[error("Failed to parse manifest {path:?}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    #[error(
        "Component '{component}' requires '{capability}' which no component or platform provides"
    )]
    MissingCapability { component: String, capability: String },

    #[error("Dependency cycle: component '{component}' requires '{capability}' provided by {providers:?} which cannot be scheduled first")]
    DependencyCycle { component: String, capability: String, providers: Vec<String> },

    #[error("Unknown component: {component}")]
    UnknownComponent { component: String },

    // Parameter errors
    #[error("Parameter '{name}' has no value and no default{}", qualifier(.component))]
    MissingParameter { name: String, component: Option<String> },

    #[error("Parameter '{name}' references unresolved name '{reference}'")]
    UnresolvedReference { name: String, reference: String },

    #[error("Failed to evaluate expression in '{name}': {reason}")]
    Expression { name: String, reason: String },

    #[error("Secret '{reference}' is not available: {reason}")]
    SecretUnavailable { reference: String, reason: String },

    // Execution errors
    #[error("Component '{component}' {verb} failed with exit code {code}")]
    ComponentFailed { component: String, verb: String, code: i32 },

    #[error("Failed to start '{program}' for component '{component}': {source}")]
    SpawnFailed {
        component: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read output of component '{component}': {source}")]
    OutputCapture {
        component: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Component '{component}' has no implementation for '{verb}' in {dir:?}")]
    NoImplementation { component: String, verb: String, dir: PathBuf },

    #[error("Interrupted before component '{component}'")]
    Interrupted { component: String },

    // State errors
    #[error("Failed to read state {location}: {reason}")]
    StateRead { location: String, reason: String },

    #[error("Failed to write state {location}: {reason}")]
    StateWrite { location: String, reason: String },

    #[error("Unsupported state location '{location}': only local paths and file:// are supported")]
    UnsupportedStateLocation { location: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Sync errors
    #[error("Control plane rejected patch: {reason}")]
    SyncRejected { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn qualifier(component: &Option<String>) -> String {
    component.as_ref().map(|c| format!(" (component {})", c)).unwrap_or_default()
}

impl HubError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::ManifestParse { .. }
            | HubError::InvalidManifest { .. }
            | HubError::MissingCapability { .. }
            | HubError::DependencyCycle { .. }
            | HubError::UnknownComponent { .. } => ErrorKind::Manifest,
            HubError::MissingParameter { .. }
            | HubError::UnresolvedReference { .. }
            | HubError::Expression { .. }
            | HubError::SecretUnavailable { .. } => ErrorKind::ParameterResolution,
            HubError::ComponentFailed { .. }
            | HubError::SpawnFailed { .. }
            | HubError::OutputCapture { .. }
            | HubError::NoImplementation { .. }
            | HubError::Interrupted { .. } => ErrorKind::Execution,
            HubError::StateRead { .. }
            | HubError::StateWrite { .. }
            | HubError::UnsupportedStateLocation { .. }
            | HubError::IoError { .. } => ErrorKind::StateIo,
            HubError::SyncRejected { .. } => ErrorKind::Sync,
            HubError::InvalidConfig { .. } | HubError::Internal(_) | HubError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Manifest | ErrorKind::ParameterResolution => 2,
            ErrorKind::Execution | ErrorKind::Internal => 1,
            ErrorKind::StateIo => 3,
            ErrorKind::Sync => 4,
        }
    }
}
