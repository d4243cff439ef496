//! Parameter elaboration.
//!
//! Merges declared defaults, parameter files, previously locked values and
//! command-line overrides into one locked parameter set, expands templates and
//! writes the result as an elaborate manifest.

mod elaborator;
pub mod secrets;


pub use elaborator::Elaborator;
pub use secrets::{SecretResolver, StaticSecrets, UnavailableSecrets};

use crate::error::{HubError, Result};
use crate::expression::{Bindings, ExpressionError, ResolveMode, Template};
use crate::manifest::{
    parameter_key, Component, Meta, OutputDeclaration, ParameterKind, ParameterValue, Platform,
    StackLifecycle,
};
use crate::state::storage::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Final value of a parameter.
///
/// For every `(name, component)` pair there is at most one locked parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedParameter {
    pub name: String,

    /// Component qualifier; `None` is a wildcard for every component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    #[serde(default)]
    pub kind: ParameterKind,

    pub value: ParameterValue,

    /// Environment variable the value is exported as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,

    /// Value is a template over component outputs, expanded at execution
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deferred: bool,
}

impl LockedParameter {
    pub fn key(&self) -> String {
        parameter_key(&self.name, self.component.as_deref())
    }

    pub fn is_wildcard(&self) -> bool {
        self.component.is_none()
    }

    fn sort_key(&self) -> (&str, &str) {
        (self.name.as_str(), self.component.as_deref().unwrap_or(""))
    }
}

/// Fully merged and expanded manifest consumed by lifecycle verbs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElaborateManifest {
    pub version: u32,
    pub kind: String,
    pub meta: Meta,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    /// `order` always holds the resolved execution order
    pub lifecycle: StackLifecycle,

    pub components: Vec<Component>,

    pub parameters: Vec<LockedParameter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputDeclaration>,

    /// Directory component sources are resolved against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
}

impl ElaborateManifest {
    /// Sort parameters into their canonical order.
    pub(crate) fn normalize(&mut self) {
        self.parameters.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.answers_to(name))
    }

    /// Names of outputs declared by any component.
    pub fn component_output_names(&self) -> Vec<String> {
        self.components.iter().flat_map(|c| c.outputs.iter().map(|o| o.name.clone())).collect()
    }

    /// Parameters as seen by `component`: its qualified entries, plus
    /// wildcards for names it has no qualified entry for.
    pub fn parameters_for(&self, component: &str) -> Vec<&LockedParameter> {
        let name = self.component(component).map(|c| c.name.as_str()).unwrap_or(component);
        let mut out: BTreeMap<&str, &LockedParameter> = BTreeMap::new();
        for p in self.parameters.iter().filter(|p| p.is_wildcard()) {
            out.insert(p.name.as_str(), p);
        }
        for p in self.parameters.iter().filter(|p| p.component.as_deref() == Some(name)) {
            out.insert(p.name.as_str(), p);
        }
        out.into_values().collect()
    }

    /// Bindings for stack-level templates.
    ///
    /// A name binds to its wildcard. Without one, it binds when every
    /// qualified entry agrees, which is the case after the wildcard was
    /// elided as a duplicate.
    pub fn stack_bindings(&self) -> Bindings {
        let mut by_name: BTreeMap<&str, Vec<&LockedParameter>> = BTreeMap::new();
        for p in &self.parameters {
            by_name.entry(p.name.as_str()).or_default().push(p);
        }

        let mut bindings = Bindings::new();
        for (name, group) in by_name {
            let chosen = match group.iter().find(|p| p.is_wildcard()) {
                Some(wildcard) => Some(*wildcard),
                None => {
                    let first = group[0];
                    group
                        .iter()
                        .all(|p| p.value == first.value && p.deferred == first.deferred)
                        .then_some(first)
                }
            };
            if let Some(param) = chosen.filter(|p| !p.deferred) {
                bindings.insert(name.to_string(), param.value.as_binding());
            }
        }
        bindings
    }

    /// Expression bindings for `component` from non-deferred parameters.
    pub fn bindings_for(&self, component: &str) -> Bindings {
        self.parameters_for(component)
            .into_iter()
            .filter(|p| !p.deferred)
            .map(|p| (p.name.clone(), p.value.as_binding()))
            .collect()
    }

    /// Expand deferred parameters of `component` against captured outputs.
    ///
    /// Returns the component's complete parameter view with every deferred
    /// template rendered.
    pub fn resolve_for(
        &self,
        component: &str,
        outputs: &Bindings,
        mode: ResolveMode,
    ) -> Result<Vec<LockedParameter>> {
        let params: Vec<LockedParameter> =
            self.parameters_for(component).into_iter().cloned().collect();
        let mut bindings = outputs.clone();
        bindings.extend(self.bindings_for(component));

        let mut pending: Vec<usize> = (0..params.len()).filter(|i| params[*i].deferred).collect();
        let mut resolved = params;

        // Deferred parameters may chain through one another.
        while !pending.is_empty() {
            let mut progressed = false;
            let mut still = Vec::new();
            for i in pending {
                let param = &resolved[i];
                let template = Template::parse(&param.value.as_binding())
                    .map_err(|e| expression_error(&param.key(), e))?;
                let bound = template.references().iter().all(|r| bindings.contains_key(r));
                if bound || mode == ResolveMode::AutoResolve {
                    let text = template
                        .render(&bindings, mode)
                        .map_err(|e| expression_error(&param.key(), e))?;
                    let param = &mut resolved[i];
                    param.value = ParameterValue::string(text).coerce(&param.kind);
                    param.deferred = false;
                    bindings.insert(param.name.clone(), param.value.as_binding());
                    progressed = true;
                } else {
                    still.push(i);
                }
            }
            if !progressed {
                let param = &resolved[still[0]];
                let template = Template::parse(&param.value.as_binding())
                    .map_err(|e| expression_error(&param.key(), e))?;
                let reference = template
                    .references()
                    .into_iter()
                    .find(|r| !bindings.contains_key(r))
                    .unwrap_or_default();
                return Err(HubError::UnresolvedReference { name: param.key(), reference });
            }
            pending = still;
        }

        Ok(resolved)
    }

    /// Read an elaborate manifest.
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let parse_error =
            |reason: String| HubError::ManifestParse { path: path.to_path_buf(), reason };
        let content = std::fs::read_to_string(path).map_err(|e| parse_error(e.to_string()))?;
        let mut manifest: ElaborateManifest =
            serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
        if manifest.lifecycle.order.is_empty() {
            manifest.lifecycle.order =
                manifest.components.iter().map(|c| c.qualified_name()).collect();
        }
        manifest.normalize();
        Ok(manifest)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(HubError::internal)
    }

    /// Write the manifest atomically to every path.
    pub fn save(&self, paths: &[PathBuf]) -> Result<()> {
        let content = self.to_yaml()?;
        for path in paths {
            atomic_write(path, content.as_bytes())
                .map_err(|e| HubError::IoError { path: path.clone(), source: e })?;
            info!("Elaborate manifest written to {}", path.display());
        }
        Ok(())
    }
}

/// Map an evaluator failure onto the parameter that triggered it.
pub(crate) fn expression_error(name: &str, err: ExpressionError) -> HubError {
    match err {
        ExpressionError::Unresolved { name: reference } => {
            HubError::UnresolvedReference { name: name.to_string(), reference }
        }
        other => HubError::Expression { name: name.to_string(), reason: other.to_string() },
    }
}
