//! Stackhub Core Library
//!
//! Stack lifecycle execution engine: component ordering, parameter
//! elaboration, checkpointed verb execution and the state journal.

pub mod config;
pub mod dependency;
pub mod error;
pub mod expression;
pub mod lifecycle;
pub mod manifest;
pub mod observability;
pub mod parameters;
pub mod paths;
pub mod state;
pub mod sync;
pub mod warnings;

// Re-export commonly used items
pub use config::Config;
pub use dependency::DependencyResolver;
pub use error::{ErrorKind, HubError, Result};
pub use lifecycle::{LifecycleExecutor, OsEnvironmentMode, Request, RunReport, Verb};
pub use manifest::{ManifestParser, StackManifest};
pub use observability::init as init_observability;
pub use parameters::{ElaborateManifest, Elaborator, LockedParameter};
pub use state::{StateLocation, StateManifest, StepStatus};
pub use warnings::Warnings;
