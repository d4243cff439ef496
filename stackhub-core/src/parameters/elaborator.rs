//! Parameter merge, expansion and locking.

use super::{expression_error, ElaborateManifest, LockedParameter};
use crate::dependency::DependencyResolver;
use crate::error::{HubError, Result};
use crate::expression::{Bindings, ResolveMode, Template};
use crate::manifest::{
    parameter_key, EmptyPolicy, ParameterDeclaration, ParameterKind, ParameterManifest,
    ParameterValue, StackLifecycle, StackManifest,
};
use crate::observability::metrics;
use crate::warnings::Warnings;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

/// `(name, component)` with `""` for wildcards, so wildcards sort first.
type Key = (String, String);

/// A parameter while its value is being merged.
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    component: Option<String>,
    kind: ParameterKind,
    env: Option<String>,
    from_env: Option<String>,
    empty: EmptyPolicy,
    value: Option<ParameterValue>,
}

impl Entry {
    fn display_key(&self) -> String {
        parameter_key(&self.name, self.component.as_deref())
    }
}

/// Merges parameter sources into an [`ElaborateManifest`].
#[derive(Debug, Clone)]
pub struct Elaborator {
    mode: ResolveMode,
    os_env: BTreeMap<String, String>,
    base_dir: Option<String>,
    warnings: Warnings,
}

impl Elaborator {
    pub fn new(warnings: Warnings) -> Self {
        Self { mode: ResolveMode::Strict, os_env: BTreeMap::new(), base_dir: None, warnings }
    }

    pub fn with_mode(mut self, mode: ResolveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Environment snapshot `fromEnv` defaults are read from.
    pub fn with_os_env(mut self, os_env: BTreeMap<String, String>) -> Self {
        self.os_env = os_env;
        self
    }

    pub fn with_base_dir(mut self, base_dir: Option<String>) -> Self {
        self.base_dir = base_dir;
        self
    }

    /// Elaborate `stack`.
    ///
    /// Precedence, lowest first: declared defaults, `param_files` left to
    /// right, `state_locked`, `env_overrides`.
    #[instrument(skip_all, fields(stack = %stack.meta.name))]
    pub fn elaborate(
        &self,
        stack: &StackManifest,
        param_files: &[ParameterManifest],
        state_locked: &[LockedParameter],
        env_overrides: &BTreeMap<String, String>,
    ) -> Result<ElaborateManifest> {
        let result = self.elaborate_inner(stack, param_files, state_locked, env_overrides);
        metrics::record_elaboration(result.is_ok());
        result
    }

    fn elaborate_inner(
        &self,
        stack: &StackManifest,
        param_files: &[ParameterManifest],
        state_locked: &[LockedParameter],
        env_overrides: &BTreeMap<String, String>,
    ) -> Result<ElaborateManifest> {
        let order = DependencyResolver::resolve(stack, &self.warnings)?;
        info!("Elaborating {} with order {:?}", stack.meta.name, order);

        let mut entries = self.declared(stack);

        for file in param_files {
            debug!("Applying parameter file {:?}", file.source);
            for decl in &file.parameters {
                let value = decl.value.clone().or_else(|| decl.default.clone());
                self.apply(stack, &mut entries, decl, value, &format!("{}", file.source.display()));
            }
        }

        for locked in state_locked {
            let decl = ParameterDeclaration {
                name: locked.name.clone(),
                component: locked.component.clone(),
                kind: locked.kind.clone(),
                env: locked.env.clone(),
                ..Default::default()
            };
            self.apply(stack, &mut entries, &decl, Some(locked.value.clone()), "state");
        }

        self.apply_overrides(&mut entries, env_overrides);

        let output_names: BTreeSet<String> = stack
            .components
            .iter()
            .flat_map(|c| c.outputs.iter().map(|o| o.name.clone()))
            .collect();

        let mut locked: BTreeMap<Key, LockedParameter> = BTreeMap::new();

        // Phase 1: wildcards see only other wildcards.
        let wildcards: Vec<&Entry> = entries.values().filter(|e| e.component.is_none()).collect();
        let qualified_names: BTreeSet<&str> = entries
            .values()
            .filter(|e| e.component.is_some() && e.value.is_some())
            .map(|e| e.name.as_str())
            .collect();
        let mut globals = Bindings::new();
        let mut deferred_names = BTreeSet::new();
        let resolved = self.resolve_group(
            &wildcards,
            &mut globals,
            &mut deferred_names,
            &output_names,
            &qualified_names,
        )?;
        for param in resolved {
            locked.insert((param.name.clone(), String::new()), param);
        }

        // Phase 2: component-qualified entries, per component in order.
        for qualified in &order {
            let Some(component) = stack.component(qualified) else { continue };
            let own: Vec<&Entry> = entries
                .values()
                .filter(|e| e.component.as_deref() == Some(component.name.as_str()))
                .collect();
            if own.is_empty() {
                continue;
            }
            let mut bindings = globals.clone();
            let mut deferred = deferred_names.clone();
            let resolved = self.resolve_group(
                &own,
                &mut bindings,
                &mut deferred,
                &output_names,
                &BTreeSet::new(),
            )?;
            for param in resolved {
                locked.insert((param.name.clone(), component.name.clone()), param);
            }
        }

        let parameters = self.elide_duplicates(locked, stack);

        let mut manifest = ElaborateManifest {
            version: stack.version.max(1),
            kind: "elaborate".to_string(),
            meta: stack.meta.clone(),
            requires: stack.requires.clone(),
            provides: stack.provides.clone(),
            platform: stack.platform.clone(),
            lifecycle: StackLifecycle { verbs: stack.lifecycle.verbs.clone(), order },
            components: stack.components.clone(),
            parameters,
            outputs: stack.outputs.clone(),
            base_dir: self.base_dir.clone(),
        };
        manifest.normalize();
        Ok(manifest)
    }

    /// Declarations from the stack and its components, with default values.
    fn declared(&self, stack: &StackManifest) -> BTreeMap<Key, Entry> {
        let mut entries = BTreeMap::new();

        let component_decls = stack.components.iter().flat_map(|c| {
            c.parameters.iter().map(move |p| {
                let mut p = p.clone();
                p.component = Some(c.name.clone());
                p
            })
        });

        for decl in stack.parameters.iter().cloned().chain(component_decls) {
            let component = decl.component.clone().filter(|c| !c.is_empty()).map(|c| {
                // Normalise qualified names to the plain component name.
                stack.component(&c).map(|comp| comp.name.clone()).unwrap_or(c)
            });
            let from_env = decl
                .from_env
                .as_ref()
                .and_then(|var| self.os_env.get(var))
                .map(|v| ParameterValue::string(v.clone()));
            let value = decl.value.clone().or(from_env).or_else(|| decl.default.clone());

            let key = (decl.name.clone(), component.clone().unwrap_or_default());
            // A later bare declaration does not erase an earlier value.
            if value.is_none() && entries.get(&key).is_some_and(|e: &Entry| e.value.is_some()) {
                continue;
            }
            entries.insert(
                key,
                Entry {
                    name: decl.name.clone(),
                    component,
                    kind: decl.kind.clone(),
                    env: decl.env.clone(),
                    from_env: decl.from_env.clone(),
                    empty: decl.empty,
                    value,
                },
            );
        }
        entries
    }

    /// Layer one value on top of the entries.
    fn apply(
        &self,
        stack: &StackManifest,
        entries: &mut BTreeMap<Key, Entry>,
        decl: &ParameterDeclaration,
        value: Option<ParameterValue>,
        origin: &str,
    ) {
        let component = match decl.component.as_deref().filter(|c| !c.is_empty()) {
            None => None,
            Some(c) => match stack.component(c) {
                Some(comp) => Some(comp.name.clone()),
                None => {
                    self.warnings.push(format!(
                        "{}: parameter '{}' names unknown component '{}', ignored",
                        origin, decl.name, c
                    ));
                    return;
                }
            },
        };
        let key = (decl.name.clone(), component.clone().unwrap_or_default());

        match entries.get_mut(&key) {
            Some(entry) => {
                if decl.kind != ParameterKind::Plain && decl.kind != entry.kind {
                    self.warnings.push(format!(
                        "{}: parameter '{}' is declared {} but given as {}",
                        origin,
                        entry.display_key(),
                        entry.kind,
                        decl.kind
                    ));
                }
                if entry.env.is_none() {
                    entry.env = decl.env.clone();
                }
                if value.is_some() {
                    entry.value = value;
                }
            }
            None => {
                entries.insert(
                    key,
                    Entry {
                        name: decl.name.clone(),
                        component,
                        kind: decl.kind.clone(),
                        env: decl.env.clone(),
                        from_env: decl.from_env.clone(),
                        empty: decl.empty,
                        value,
                    },
                );
            }
        }
    }

    /// Top layer: `fromEnv` variables and exact parameter keys.
    fn apply_overrides(
        &self,
        entries: &mut BTreeMap<Key, Entry>,
        overrides: &BTreeMap<String, String>,
    ) {
        for (var, value) in overrides {
            let mut matched = false;
            for entry in entries.values_mut() {
                if entry.from_env.as_deref() == Some(var.as_str()) || entry.display_key() == *var {
                    entry.value = Some(ParameterValue::string(value.clone()));
                    matched = true;
                }
            }
            if !matched {
                self.warnings.push(format!("Override '{}' matches no parameter", var));
            }
        }
    }

    /// Resolve a group of entries to a fixpoint.
    ///
    /// `bindings` holds names already resolved and receives this group's
    /// values. Entries that reference component outputs, or other deferred
    /// entries, are locked with their template and `deferred` set.
    fn resolve_group(
        &self,
        group: &[&Entry],
        bindings: &mut Bindings,
        deferred_names: &mut BTreeSet<String>,
        output_names: &BTreeSet<String>,
        covered: &BTreeSet<&str>,
    ) -> Result<Vec<LockedParameter>> {
        let mut out = Vec::new();
        let mut pending: Vec<(&Entry, Template)> = Vec::new();

        for entry in group {
            let value = match &entry.value {
                Some(v) if !(v.is_empty() && entry.empty == EmptyPolicy::Deny) => v.clone(),
                Some(_) | None if entry.empty == EmptyPolicy::Allow => ParameterValue::string(""),
                _ => {
                    if entry.component.is_none() && covered.contains(entry.name.as_str()) {
                        debug!("Wildcard {} has no value; qualified entries cover it", entry.name);
                        continue;
                    }
                    return Err(HubError::MissingParameter {
                        name: entry.name.clone(),
                        component: entry.component.clone(),
                    });
                }
            };

            match value.as_template() {
                Some(text) => {
                    let template = Template::parse(text)
                        .map_err(|e| expression_error(&entry.display_key(), e))?;
                    if template.is_literal() {
                        bindings.insert(entry.name.clone(), text.to_string());
                        out.push(self.lock(entry, value));
                    } else {
                        pending.push((entry, template));
                    }
                }
                None => {
                    bindings.insert(entry.name.clone(), value.as_binding());
                    out.push(self.lock(entry, value));
                }
            }
        }

        // A pending name is bound only once this group resolves it, so an
        // outer value of the same name never leaks into a sibling.
        let pending_names: BTreeSet<String> = pending.iter().map(|(e, _)| e.name.clone()).collect();
        let mut resolved = BTreeSet::new();

        while !pending.is_empty() {
            let mut progressed = false;
            let mut still = Vec::new();

            for (entry, template) in pending {
                let refs = template.references();

                let waits_for_output = refs.iter().any(|r| {
                    deferred_names.contains(r)
                        || (output_names.contains(r) && !bindings.contains_key(r))
                });
                if waits_for_output {
                    debug!("Deferring {} until outputs are known", entry.display_key());
                    deferred_names.insert(entry.name.clone());
                    out.push(LockedParameter {
                        name: entry.name.clone(),
                        component: entry.component.clone(),
                        kind: entry.kind.clone(),
                        value: ParameterValue::string(template_text(entry)),
                        env: entry.env.clone(),
                        deferred: true,
                    });
                    progressed = true;
                    continue;
                }

                let ready = refs.iter().all(|r| {
                    !pending_names.contains(r)
                        || resolved.contains(r)
                        || (*r == entry.name && bindings.contains_key(r))
                });
                if !ready {
                    still.push((entry, template));
                    continue;
                }

                let rendered = template
                    .render_value(bindings, self.mode)
                    .map_err(|e| expression_error(&entry.display_key(), e))?;
                let value = from_expression_value(rendered).coerce(&entry.kind);
                bindings.insert(entry.name.clone(), value.as_binding());
                resolved.insert(entry.name.clone());
                out.push(self.lock(entry, value));
                progressed = true;
            }

            if !progressed {
                let names: Vec<String> = still.iter().map(|(e, _)| e.display_key()).collect();
                return Err(HubError::Expression {
                    name: names.join(", "),
                    reason: "reference cycle between parameters".to_string(),
                });
            }
            pending = still;
        }

        Ok(out)
    }

    fn lock(&self, entry: &Entry, value: ParameterValue) -> LockedParameter {
        let value = self.reconcile_kind(entry, value);
        LockedParameter {
            name: entry.name.clone(),
            component: entry.component.clone(),
            kind: entry.kind.clone(),
            value,
            env: entry.env.clone(),
            deferred: false,
        }
    }

    /// Declared kind wins; a disagreeing stored kind is only reported.
    fn reconcile_kind(&self, entry: &Entry, value: ParameterValue) -> ParameterValue {
        let value = value.coerce(&entry.kind);
        match (value.stored_kind(), &entry.kind) {
            (Some(ParameterKind::Secret(stored)), ParameterKind::Secret(declared)) => {
                if stored.is_some() && declared.is_some() && stored != *declared {
                    self.warnings.push(format!(
                        "Parameter '{}' is declared {} but its secret is stored as secret/{}",
                        entry.display_key(),
                        entry.kind,
                        stored.as_deref().unwrap_or("text"),
                    ));
                }
                match value {
                    ParameterValue::SecretRef { secret_ref, kind } => {
                        ParameterValue::SecretRef { secret_ref, kind: declared.clone().or(kind) }
                    }
                    other => other,
                }
            }
            (Some(stored), declared) if stored != *declared => {
                self.warnings.push(format!(
                    "Parameter '{}' is declared {} but its value is a {} reference",
                    entry.display_key(),
                    declared,
                    stored
                ));
                value
            }
            _ => value,
        }
    }

    /// Drop redundant entries so each value appears once.
    ///
    /// If every component carries a qualified entry equal to the wildcard,
    /// the wildcard goes. Otherwise qualified entries equal to the wildcard
    /// go, since the wildcard already supplies that value.
    fn elide_duplicates(
        &self,
        locked: BTreeMap<Key, LockedParameter>,
        stack: &StackManifest,
    ) -> Vec<LockedParameter> {
        let mut by_name: BTreeMap<String, Vec<LockedParameter>> = BTreeMap::new();
        for ((name, _), param) in locked {
            by_name.entry(name).or_default().push(param);
        }

        let mut out = Vec::new();
        for (_, group) in by_name {
            let Some(wildcard) = group.iter().find(|p| p.is_wildcard()).cloned() else {
                out.extend(group);
                continue;
            };
            let same = |p: &LockedParameter| {
                !p.is_wildcard()
                    && p.value == wildcard.value
                    && p.kind == wildcard.kind
                    && p.env == wildcard.env
                    && p.deferred == wildcard.deferred
            };
            let all_components_same = stack.components.iter().all(|c| {
                group.iter().any(|p| p.component.as_deref() == Some(c.name.as_str()) && same(p))
            });

            if all_components_same {
                out.extend(group.into_iter().filter(|p| !p.is_wildcard()));
            } else {
                out.extend(group.into_iter().filter(|p| p.is_wildcard() || !same(p)));
            }
        }
        out
    }
}

fn template_text(entry: &Entry) -> String {
    entry.value.as_ref().and_then(|v| v.as_template()).unwrap_or_default().to_string()
}

fn from_expression_value(value: crate::expression::Value) -> ParameterValue {
    use crate::expression::Value;
    use crate::manifest::Scalar;
    match value {
        Value::Bool(b) => ParameterValue::Scalar(Scalar::Bool(b)),
        Value::Int(i) => ParameterValue::Scalar(Scalar::Int(i)),
        Value::Double(x) => ParameterValue::Scalar(Scalar::Float(x)),
        other => ParameterValue::string(other.to_string()),
    }
}
