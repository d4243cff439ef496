//! Stack manifest model.
//!
//! In-memory representation of a stack: components with their capabilities,
//! parameter and output declarations, and lifecycle verbs.

pub mod parser;
pub mod types;
pub mod value;

#[cfg(test)]
mod parser_tests;

pub use parser::{load_parameter_files, ManifestParser};
pub use types::{
    parameter_key, Component, ComponentLifecycle, ComponentSource, EmptyPolicy, Meta,
    OutputDeclaration, ParameterDeclaration, ParameterManifest, Platform, StackLifecycle,
    StackManifest, DEFAULT_VERBS,
};
pub use value::{ParameterKind, ParameterValue, Scalar};

impl StackManifest {
    /// Find a component by plain or qualified name.
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.answers_to(name))
    }

    /// Capabilities supplied by the platform.
    pub fn platform_provides(&self) -> Vec<String> {
        self.platform.as_ref().map(|p| p.provides.clone()).unwrap_or_default()
    }
}
