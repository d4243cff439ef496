//! Stack and parameter manifest parser.
//!
//! Parses `hub.yaml` files, follows `meta.fromStack` parents and validates the
//! result before anything downstream looks at it.

use super::types::*;
use crate::error::{HubError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Deepest `fromStack` chain followed before giving up.
const MAX_FROM_STACK_DEPTH: usize = 8;

/// Parser for stack manifests.
pub struct ManifestParser;

impl ManifestParser {
    /// Parse a stack manifest from a string.
    ///
    /// `fromStack` is not followed here since there is no file to resolve it
    /// against; use [`ManifestParser::parse_file`] for that.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML is invalid
    /// - Components are missing, duplicated or unnamed
    /// - Parameters name unknown components
    /// - An explicit lifecycle order does not cover the components exactly
    #[instrument(skip(content))]
    pub fn parse(content: &str) -> Result<StackManifest> {
        let stack = Self::parse_unvalidated(content, Path::new("<inline>"))?;
        Self::validate(&stack)?;
        Ok(stack)
    }

    /// Parse a stack manifest from a file, merging `fromStack` parents.
    #[instrument]
    pub fn parse_file<P: AsRef<Path> + std::fmt::Debug>(path: P) -> Result<StackManifest> {
        let path = path.as_ref();
        info!("Reading stack manifest from {:?}", path);

        let stack = Self::load_chain(path, 0)?;
        Self::validate(&stack)?;
        Ok(stack)
    }

    fn load_chain(path: &Path, depth: usize) -> Result<StackManifest> {
        if depth > MAX_FROM_STACK_DEPTH {
            return Err(HubError::ManifestParse {
                path: path.to_path_buf(),
                reason: format!("fromStack chain deeper than {}", MAX_FROM_STACK_DEPTH),
            });
        }

        let content = read(path)?;
        let stack = Self::parse_unvalidated(&content, path)?;

        match stack.meta.from_stack.clone() {
            Some(parent) if !parent.is_empty() => {
                let parent_path = path.parent().unwrap_or_else(|| Path::new(".")).join(&parent);
                debug!("{:?} extends {:?}", path, parent_path);
                let base = Self::load_chain(&parent_path, depth + 1)?;
                Ok(merge(base, stack))
            }
            _ => Ok(stack),
        }
    }

    fn parse_unvalidated(content: &str, path: &Path) -> Result<StackManifest> {
        serde_yaml::from_str(content).map_err(|e| HubError::ManifestParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Parse a parameter manifest from a string.
    ///
    /// Accepts a bare list of parameters or a mapping with a `parameters` key.
    pub fn parse_parameters(content: &str, source: &Path) -> Result<ParameterManifest> {
        if content.trim().is_empty() {
            return Ok(ParameterManifest { source: source.to_path_buf(), parameters: vec![] });
        }
        let file: ParameterFile = serde_yaml::from_str(content).map_err(|e| {
            HubError::ManifestParse { path: source.to_path_buf(), reason: e.to_string() }
        })?;
        let parameters = match file {
            ParameterFile::List(list) => list,
            ParameterFile::Keyed { parameters } => parameters,
        };
        for param in &parameters {
            if param.name.trim().is_empty() {
                return Err(HubError::ManifestParse {
                    path: source.to_path_buf(),
                    reason: "parameter without a name".to_string(),
                });
            }
        }
        Ok(ParameterManifest { source: source.to_path_buf(), parameters })
    }

    /// Parse a parameter manifest from a file.
    #[instrument]
    pub fn parse_parameters_file<P: AsRef<Path> + std::fmt::Debug>(
        path: P,
    ) -> Result<ParameterManifest> {
        let path = path.as_ref();
        let content = read(path)?;
        Self::parse_parameters(&content, path)
    }

    /// Validate that components and parameters are well formed.
    pub(crate) fn validate(stack: &StackManifest) -> Result<()> {
        if let Some(kind) = &stack.kind {
            if kind != "stack" {
                return Err(HubError::InvalidManifest {
                    reason: format!("unsupported manifest kind '{}'", kind),
                });
            }
        }

        if stack.components.is_empty() {
            return Err(HubError::InvalidManifest { reason: "No components defined".to_string() });
        }

        let mut names = HashSet::new();
        for component in &stack.components {
            if component.name.trim().is_empty() {
                return Err(HubError::InvalidManifest {
                    reason: "Component without a name".to_string(),
                });
            }
            if !names.insert(component.name.as_str()) {
                return Err(HubError::InvalidManifest {
                    reason: format!("Duplicate component '{}'", component.name),
                });
            }
            for param in &component.parameters {
                if param.name.trim().is_empty() {
                    return Err(HubError::InvalidManifest {
                        reason: format!(
                            "Component '{}' has a parameter without a name",
                            component.name
                        ),
                    });
                }
            }
        }

        for param in &stack.parameters {
            if param.name.trim().is_empty() {
                return Err(HubError::InvalidManifest {
                    reason: "Stack parameter without a name".to_string(),
                });
            }
            if let Some(component) = param.component.as_deref().filter(|c| !c.is_empty()) {
                if !stack.components.iter().any(|c| c.answers_to(component)) {
                    return Err(HubError::UnknownComponent { component: component.to_string() });
                }
            }
        }

        for component in &stack.components {
            for dep in &component.depends {
                if !stack.components.iter().any(|c| c.answers_to(dep)) {
                    return Err(HubError::InvalidManifest {
                        reason: format!(
                            "Component '{}' depends on '{}' which does not exist",
                            component.name, dep
                        ),
                    });
                }
            }
        }

        let order = &stack.lifecycle.order;
        if !order.is_empty() {
            if order.len() != stack.components.len() {
                return Err(HubError::InvalidManifest {
                    reason: format!(
                        "lifecycle.order lists {} components, stack has {}",
                        order.len(),
                        stack.components.len()
                    ),
                });
            }
            let mut seen = HashSet::new();
            for name in order {
                let component = stack
                    .components
                    .iter()
                    .find(|c| c.answers_to(name))
                    .ok_or_else(|| HubError::UnknownComponent { component: name.clone() })?;
                if !seen.insert(component.name.as_str()) {
                    return Err(HubError::InvalidManifest {
                        reason: format!("lifecycle.order lists '{}' twice", name),
                    });
                }
            }
        }

        Ok(())
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| HubError::ManifestParse { path: path.to_path_buf(), reason: e.to_string() })
}

/// Overlay `child` on `base`.
///
/// Components with the same name are replaced in place, new ones appended.
/// Parameter declarations with the same key are replaced. Scalars from the
/// child win when set.
fn merge(mut base: StackManifest, child: StackManifest) -> StackManifest {
    for component in child.components {
        match base.components.iter_mut().find(|c| c.name == component.name) {
            Some(existing) => *existing = component,
            None => base.components.push(component),
        }
    }

    for param in child.parameters {
        let key = param.key();
        match base.parameters.iter_mut().find(|p| p.key() == key) {
            Some(existing) => *existing = param,
            None => base.parameters.push(param),
        }
    }

    for output in child.outputs {
        match base.outputs.iter_mut().find(|o| o.name == output.name) {
            Some(existing) => *existing = output,
            None => base.outputs.push(output),
        }
    }

    extend_unique(&mut base.requires, child.requires);
    extend_unique(&mut base.provides, child.provides);

    if child.platform.is_some() {
        base.platform = child.platform;
    }
    if !child.lifecycle.verbs.is_empty() {
        base.lifecycle.verbs = child.lifecycle.verbs;
    }
    // A parent order cannot cover the child's extra components.
    base.lifecycle.order = child.lifecycle.order;

    base.version = child.version.max(base.version);
    base.kind = child.kind.or(base.kind);
    base.meta = Meta {
        name: if child.meta.name.is_empty() { base.meta.name } else { child.meta.name },
        brief: child.meta.brief.or(base.meta.brief),
        from_stack: child.meta.from_stack,
    };
    base
}

fn extend_unique(into: &mut Vec<String>, from: Vec<String>) {
    for item in from {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

/// Resolve a list of parameter manifest paths in command-line order.
pub fn load_parameter_files(paths: &[PathBuf]) -> Result<Vec<ParameterManifest>> {
    paths.iter().map(ManifestParser::parse_parameters_file).collect()
}
