//! Stack manifest format types.

use super::value::{ParameterKind, ParameterValue};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbs a component supports when neither it nor the stack says otherwise.
pub const DEFAULT_VERBS: &[&str] = &["deploy", "undeploy"];

/// Root structure of a `hub.yaml` stack manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackManifest {
    #[serde(default)]
    pub version: u32,

    /// Manifest kind, `stack` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub meta: Meta,

    /// Components in declaration order
    #[serde(default)]
    pub components: Vec<Component>,

    /// Capabilities the stack as a whole needs from its platform
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,

    /// Platform the stack is deployed onto (for overlay stacks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    #[serde(default)]
    pub lifecycle: StackLifecycle,

    /// Stack-level parameter declarations; wildcard unless `component` is set
    #[serde(default)]
    pub parameters: Vec<ParameterDeclaration>,

    /// Stack outputs rendered after a successful deploy
    #[serde(default)]
    pub outputs: Vec<OutputDeclaration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,

    /// Parent manifest this one extends, relative to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_stack: Option<String>,
}

/// Capabilities supplied from outside the stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub provides: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackLifecycle {
    /// Verbs available to every component that does not list its own
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verbs: Vec<String>,

    /// Explicit execution order; validated instead of computed when present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<String>,
}

/// A component in a stack manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,

    /// Version or origin tag, part of the qualified name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ComponentSource>,

    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub provides: Vec<String>,

    /// Components that must run before this one regardless of capabilities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterDeclaration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputDeclaration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<ComponentLifecycle>,
}

impl Component {
    /// `name` or `name:version`.
    pub fn qualified_name(&self) -> String {
        match &self.version {
            Some(version) if !version.is_empty() => format!("{}:{}", self.name, version),
            _ => self.name.clone(),
        }
    }

    /// True if `name` is either the plain or the qualified name.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.qualified_name() == name
    }

    /// Source directory, relative to the components base directory.
    pub fn source_dir(&self) -> PathBuf {
        self.source
            .as_ref()
            .and_then(|s| s.dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&self.name))
    }

    /// Verbs this component implements, falling back to `stack_verbs`.
    pub fn verbs(&self, stack_verbs: &[String]) -> Vec<String> {
        if let Some(lifecycle) = &self.lifecycle {
            if !lifecycle.verbs.is_empty() {
                return lifecycle.verbs.clone();
            }
        }
        if !stack_verbs.is_empty() {
            return stack_verbs.to_vec();
        }
        DEFAULT_VERBS.iter().map(|v| v.to_string()).collect()
    }

    pub fn supports(&self, verb: &str, stack_verbs: &[String]) -> bool {
        self.verbs(stack_verbs).iter().any(|v| v == verb)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentLifecycle {
    #[serde(default)]
    pub verbs: Vec<String>,
}

/// Whether an empty string counts as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPolicy {
    #[default]
    Deny,
    Allow,
}

/// A parameter as declared in a stack or parameter manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDeclaration {
    pub name: String,

    /// Component qualifier; empty means wildcard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    #[serde(default, skip_serializing_if = "is_plain")]
    pub kind: ParameterKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ParameterValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParameterValue>,

    /// Environment variable the value is exported as to component processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,

    /// Environment variable the default is read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_env: Option<String>,

    #[serde(default)]
    pub empty: EmptyPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
}

impl ParameterDeclaration {
    pub fn is_wildcard(&self) -> bool {
        self.component.as_deref().map(str::is_empty).unwrap_or(true)
    }

    /// Parameter key: `name` or `name|component`.
    pub fn key(&self) -> String {
        parameter_key(&self.name, self.component.as_deref())
    }
}

fn is_plain(kind: &ParameterKind) -> bool {
    *kind == ParameterKind::Plain
}

/// Display key of a parameter: `name` for wildcards, `name|component` otherwise.
pub fn parameter_key(name: &str, component: Option<&str>) -> String {
    match component {
        Some(c) if !c.is_empty() => format!("{}|{}", name, c),
        _ => name.to_string(),
    }
}

/// An output a component or the stack reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDeclaration {
    pub name: String,

    /// Template rendered against parameters and captured outputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Raw key the component reports this output under; defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_tf_var: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ParameterKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
}

impl OutputDeclaration {
    pub fn raw_key(&self) -> &str {
        self.from_tf_var.as_deref().unwrap_or(&self.name)
    }
}

/// A parameter manifest: overrides and additions to stack declarations.
#[derive(Debug, Clone, Default)]
pub struct ParameterManifest {
    pub source: PathBuf,
    pub parameters: Vec<ParameterDeclaration>,
}

/// On-disk shapes accepted for parameter manifests.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ParameterFile {
    List(Vec<ParameterDeclaration>),
    Keyed {
        #[serde(default)]
        parameters: Vec<ParameterDeclaration>,
    },
}
