//! Dependency order resolution.
//!
//! Components are ordered from their capability graph: a component runs only
//! after every capability it requires has been provided by a component before
//! it or by the platform. The sort is stable, so components that become
//! eligible together keep their declaration order.

use crate::error::{HubError, Result};
use crate::manifest::{Component, StackManifest};
use crate::warnings::Warnings;
use std::collections::HashSet;
use tracing::{debug, instrument};

/// Resolves execution order for a set of components.
pub struct DependencyResolver;

impl DependencyResolver {
    /// Compute the stable topological order of `components`.
    ///
    /// `external` lists capabilities that are satisfied from outside the
    /// stack. Returns qualified component names.
    ///
    /// # Errors
    ///
    /// `MissingCapability` when no component or external source provides a
    /// required capability, `DependencyCycle` when the providers exist but can
    /// never be scheduled ahead of the consumer.
    #[instrument(skip_all, fields(components = components.len()))]
    pub fn order(components: &[Component], external: &[String]) -> Result<Vec<String>> {
        let mut provided: HashSet<&str> = external.iter().map(String::as_str).collect();
        let mut scheduled = vec![false; components.len()];
        let mut order = Vec::with_capacity(components.len());

        while order.len() < components.len() {
            let next = components.iter().enumerate().find(|(i, c)| {
                !scheduled[*i]
                    && c.requires.iter().all(|r| provided.contains(r.as_str()))
                    && c.depends.iter().all(|d| is_scheduled(components, &scheduled, d))
            });

            match next {
                Some((i, component)) => {
                    debug!("Scheduling {} at position {}", component.name, order.len());
                    scheduled[i] = true;
                    provided.extend(component.provides.iter().map(String::as_str));
                    order.push(component.qualified_name());
                }
                None => return Err(Self::unsatisfied(components, &scheduled, &provided)),
            }
        }

        Ok(order)
    }

    /// Check a manifest-supplied order against the same rule as [`order`].
    ///
    /// [`order`]: DependencyResolver::order
    pub fn validate_order(
        explicit: &[String],
        components: &[Component],
        external: &[String],
    ) -> Result<Vec<String>> {
        let mut provided: HashSet<&str> = external.iter().map(String::as_str).collect();
        let mut scheduled = vec![false; components.len()];
        let mut order = Vec::with_capacity(explicit.len());

        for name in explicit {
            let (i, component) = components
                .iter()
                .enumerate()
                .find(|(_, c)| c.answers_to(name))
                .ok_or_else(|| HubError::UnknownComponent { component: name.clone() })?;

            if let Some(missing) =
                component.requires.iter().find(|r| !provided.contains(r.as_str()))
            {
                let providers = providers_of(components, missing);
                if providers.is_empty() {
                    return Err(HubError::MissingCapability {
                        component: component.name.clone(),
                        capability: missing.clone(),
                    });
                }
                return Err(HubError::DependencyCycle {
                    component: component.name.clone(),
                    capability: missing.clone(),
                    providers,
                });
            }
            if let Some(dep) =
                component.depends.iter().find(|d| !is_scheduled(components, &scheduled, d))
            {
                return Err(HubError::DependencyCycle {
                    component: component.name.clone(),
                    capability: format!("component {}", dep),
                    providers: vec![dep.clone()],
                });
            }

            scheduled[i] = true;
            provided.extend(component.provides.iter().map(String::as_str));
            order.push(component.qualified_name());
        }

        Ok(order)
    }

    /// Resolve the order for a whole stack.
    ///
    /// Uses `lifecycle.order` when the manifest carries one, the computed
    /// order otherwise. Stack-level requirements the platform does not meet
    /// are reported as warnings.
    pub fn resolve(stack: &StackManifest, warnings: &Warnings) -> Result<Vec<String>> {
        let external = stack.platform_provides();

        for capability in &stack.requires {
            if !external.contains(capability) {
                warnings.push(format!(
                    "Stack requires '{}' but the platform does not declare it",
                    capability
                ));
            }
        }

        if stack.lifecycle.order.is_empty() {
            Self::order(&stack.components, &external)
        } else {
            Self::validate_order(&stack.lifecycle.order, &stack.components, &external)
        }
    }

    /// Build the error for the first component that cannot be scheduled.
    fn unsatisfied(
        components: &[Component],
        scheduled: &[bool],
        provided: &HashSet<&str>,
    ) -> HubError {
        let pending: Vec<&Component> =
            components.iter().enumerate().filter(|(i, _)| !scheduled[*i]).map(|(_, c)| c).collect();

        // A capability nobody provides is the root cause whenever one exists.
        for component in &pending {
            for capability in &component.requires {
                if !provided.contains(capability.as_str())
                    && providers_of(components, capability).is_empty()
                {
                    return HubError::MissingCapability {
                        component: component.name.clone(),
                        capability: capability.clone(),
                    };
                }
            }
        }

        for component in &pending {
            if let Some(capability) =
                component.requires.iter().find(|r| !provided.contains(r.as_str()))
            {
                return HubError::DependencyCycle {
                    component: component.name.clone(),
                    capability: capability.clone(),
                    providers: providers_of(components, capability),
                };
            }
            if let Some(dep) =
                component.depends.iter().find(|d| !is_scheduled(components, scheduled, d))
            {
                return HubError::DependencyCycle {
                    component: component.name.clone(),
                    capability: format!("component {}", dep),
                    providers: vec![dep.clone()],
                };
            }
        }

        HubError::Internal("dependency resolution stalled without a blocked component".to_string())
    }
}

fn is_scheduled(components: &[Component], scheduled: &[bool], name: &str) -> bool {
    components.iter().enumerate().any(|(i, c)| scheduled[i] && c.answers_to(name))
}

fn providers_of(components: &[Component], capability: &str) -> Vec<String> {
    components
        .iter()
        .filter(|c| c.provides.iter().any(|p| p == capability))
        .map(|c| c.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str, requires: &[&str], provides: &[&str]) -> Component {
        Component {
            name: name.to_string(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            provides: provides.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_dns_k8s_app_order() {
        let components = vec![
            component("dns", &[], &["dns"]),
            component("k8s", &["dns"], &["kubernetes"]),
            component("app", &["kubernetes"], &[]),
        ];
        let order = DependencyResolver::order(&components, &[]).unwrap();
        assert_eq!(order, vec!["dns", "k8s", "app"]);
    }

    #[test]
    fn test_declaration_order_is_reordered_when_needed() {
        let components = vec![
            component("app", &["kubernetes"], &[]),
            component("k8s", &["dns"], &["kubernetes"]),
            component("dns", &[], &["dns"]),
        ];
        let order = DependencyResolver::order(&components, &[]).unwrap();
        assert_eq!(order, vec!["dns", "k8s", "app"]);
    }

    #[test]
    fn test_stable_tie_break_keeps_declaration_order() {
        let components = vec![
            component("zeta", &[], &[]),
            component("alpha", &[], &[]),
            component("mid", &[], &[]),
        ];
        let order = DependencyResolver::order(&components, &[]).unwrap();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_external_capabilities() {
        let components = vec![component("app", &["kubernetes"], &[])];
        let order = DependencyResolver::order(&components, &["kubernetes".to_string()]).unwrap();
        assert_eq!(order, vec!["app"]);
    }

    #[test]
    fn test_missing_provider_names_component_and_capability() {
        let components =
            vec![component("dns", &[], &["dns"]), component("app", &["kubernetes"], &[])];
        match DependencyResolver::order(&components, &[]).unwrap_err() {
            HubError::MissingCapability { component, capability } => {
                assert_eq!(component, "app");
                assert_eq!(capability, "kubernetes");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_detected() {
        let components = vec![component("a", &["b"], &["a"]), component("b", &["a"], &["b"])];
        match DependencyResolver::order(&components, &[]).unwrap_err() {
            HubError::DependencyCycle { component, capability, providers } => {
                assert_eq!(component, "a");
                assert_eq!(capability, "b");
                assert_eq!(providers, vec!["b"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_explicit_depends() {
        let mut late = component("late", &[], &[]);
        late.depends = vec!["early".to_string()];
        let components = vec![late, component("early", &[], &[])];
        let order = DependencyResolver::order(&components, &[]).unwrap();
        assert_eq!(order, vec!["early", "late"]);
    }

    #[test]
    fn test_qualified_names_in_output() {
        let mut k8s = component("k8s", &[], &["kubernetes"]);
        k8s.version = Some("1.29".to_string());
        let order = DependencyResolver::order(&[k8s], &[]).unwrap();
        assert_eq!(order, vec!["k8s:1.29"]);
    }

    #[test]
    fn test_every_requirement_provided_earlier() {
        let components = vec![
            component("app", &["db", "kubernetes"], &["app"]),
            component("db", &["kubernetes", "storage"], &["db"]),
            component("k8s", &["network"], &["kubernetes"]),
            component("net", &[], &["network"]),
            component("monitor", &["app"], &[]),
        ];
        let external = vec!["storage".to_string()];
        let order = DependencyResolver::order(&components, &external).unwrap();

        let mut provided: HashSet<String> = external.into_iter().collect();
        for name in &order {
            let c = components.iter().find(|c| &c.name == name).unwrap();
            for r in &c.requires {
                assert!(provided.contains(r), "{} requires {} before it is provided", name, r);
            }
            provided.extend(c.provides.iter().cloned());
        }
        assert_eq!(order, vec!["net", "k8s", "db", "app", "monitor"]);
    }

    #[test]
    fn test_validate_explicit_order() {
        let components = vec![
            component("dns", &[], &["dns"]),
            component("k8s", &["dns"], &["kubernetes"]),
        ];
        let ok = DependencyResolver::validate_order(
            &["dns".to_string(), "k8s".to_string()],
            &components,
            &[],
        )
        .unwrap();
        assert_eq!(ok, vec!["dns", "k8s"]);

        let err = DependencyResolver::validate_order(
            &["k8s".to_string(), "dns".to_string()],
            &components,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, HubError::DependencyCycle { .. }));
    }

    #[test]
    fn test_resolve_warns_on_unmet_stack_requirement() {
        let stack = StackManifest {
            requires: vec!["cloud".to_string()],
            components: vec![component("a", &[], &[])],
            ..Default::default()
        };
        let warnings = Warnings::new();
        let order = DependencyResolver::resolve(&stack, &warnings).unwrap();
        assert_eq!(order, vec!["a"]);
        assert_eq!(warnings.all().len(), 1);
    }
}
