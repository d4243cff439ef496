//! Tests for the stack manifest parser.

use super::*;
use crate::error::HubError;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_parse_basic_stack() {
    let yaml = r#"
version: 1
kind: stack
meta:
  name: demo
components:
  - name: dns
    provides: [dns]
  - name: k8s
    version: "1.29"
    requires: [dns]
    provides: [kubernetes]
    lifecycle:
      verbs: [deploy, undeploy, backup]
  - name: app
    requires: [kubernetes]
    source:
      dir: apps/web
"#;
    let stack = ManifestParser::parse(yaml).unwrap();
    assert_eq!(stack.meta.name, "demo");
    assert_eq!(stack.components.len(), 3);

    let k8s = stack.component("k8s").unwrap();
    assert_eq!(k8s.qualified_name(), "k8s:1.29");
    assert!(stack.component("k8s:1.29").is_some());
    assert!(k8s.supports("backup", &stack.lifecycle.verbs));

    let app = stack.component("app").unwrap();
    assert_eq!(app.source_dir(), Path::new("apps/web"));
    assert!(app.supports("deploy", &stack.lifecycle.verbs));
    assert!(!app.supports("backup", &stack.lifecycle.verbs));
}

#[test]
fn test_parse_parameters_and_outputs() {
    let yaml = r#"
meta:
  name: demo
components:
  - name: app
    parameters:
      - name: replicas
        default: 2
    outputs:
      - name: url
        fromTfVar: app_url
parameters:
  - name: dns.domain
    value: example.com
    env: DOMAIN
  - name: password
    kind: secret/password
    fromEnv: APP_PASSWORD
  - name: password
    component: app
    value: app-secret
  - name: banner
    empty: allow
outputs:
  - name: endpoint
    value: "https://${dns.domain}"
"#;
    let stack = ManifestParser::parse(yaml).unwrap();
    assert_eq!(stack.parameters.len(), 4);
    assert_eq!(stack.parameters[0].env.as_deref(), Some("DOMAIN"));
    assert_eq!(stack.parameters[1].kind, ParameterKind::Secret(Some("password".into())));
    assert!(stack.parameters[1].is_wildcard());
    assert_eq!(stack.parameters[2].key(), "password|app");
    assert_eq!(stack.parameters[3].empty, EmptyPolicy::Allow);

    let app = stack.component("app").unwrap();
    assert_eq!(app.parameters[0].default, Some(ParameterValue::Scalar(Scalar::Int(2))));
    assert_eq!(app.outputs[0].raw_key(), "app_url");
    assert_eq!(stack.outputs[0].value.as_deref(), Some("https://${dns.domain}"));
}

#[test]
fn test_parse_invalid_yaml() {
    let err = ManifestParser::parse("components: [").unwrap_err();
    assert!(matches!(err, HubError::ManifestParse { .. }));
}

#[test]
fn test_no_components() {
    let err = ManifestParser::parse("meta: {name: x}\n").unwrap_err();
    assert!(matches!(err, HubError::InvalidManifest { .. }));
}

#[test]
fn test_duplicate_component() {
    let yaml = r#"
components:
  - name: a
  - name: a
"#;
    assert!(matches!(ManifestParser::parse(yaml), Err(HubError::InvalidManifest { .. })));
}

#[test]
fn test_parameter_for_unknown_component() {
    let yaml = r#"
components:
  - name: a
parameters:
  - name: x
    component: b
    value: 1
"#;
    assert!(matches!(ManifestParser::parse(yaml), Err(HubError::UnknownComponent { .. })));
}

#[test]
fn test_depends_on_unknown_component() {
    let yaml = r#"
components:
  - name: a
    depends: [ghost]
"#;
    assert!(matches!(ManifestParser::parse(yaml), Err(HubError::InvalidManifest { .. })));
}

#[test]
fn test_explicit_order_must_cover_components() {
    let yaml = r#"
components:
  - name: a
  - name: b
lifecycle:
  order: [a]
"#;
    assert!(ManifestParser::parse(yaml).is_err());

    let yaml = r#"
components:
  - name: a
  - name: b
lifecycle:
  order: [b, a]
"#;
    let stack = ManifestParser::parse(yaml).unwrap();
    assert_eq!(stack.lifecycle.order, vec!["b", "a"]);
}

#[test]
fn test_unsupported_kind() {
    let yaml = r#"
kind: component
components:
  - name: a
"#;
    assert!(ManifestParser::parse(yaml).is_err());
}

#[test]
fn test_parameter_manifest_shapes() {
    let list = r#"
- name: a
  value: 1
- name: b
  component: app
  value: two
"#;
    let params = ManifestParser::parse_parameters(list, Path::new("p.yaml")).unwrap();
    assert_eq!(params.parameters.len(), 2);
    assert_eq!(params.parameters[1].key(), "b|app");

    let keyed = r#"
parameters:
  - name: a
    value: 1
"#;
    let params = ManifestParser::parse_parameters(keyed, Path::new("p.yaml")).unwrap();
    assert_eq!(params.parameters.len(), 1);

    let params = ManifestParser::parse_parameters("", Path::new("empty.yaml")).unwrap();
    assert!(params.parameters.is_empty());
}

#[test]
fn test_from_stack_merge() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("base.yaml"),
        r#"
meta:
  name: base
components:
  - name: dns
    provides: [dns]
  - name: k8s
    requires: [dns]
    provides: [kubernetes]
parameters:
  - name: region
    value: us-east-1
  - name: size
    value: small
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("hub.yaml"),
        r#"
meta:
  name: overlay
  fromStack: base.yaml
components:
  - name: k8s
    requires: [dns]
    provides: [kubernetes, ingress]
  - name: app
    requires: [ingress]
parameters:
  - name: size
    value: large
"#,
    )
    .unwrap();

    let stack = ManifestParser::parse_file(dir.path().join("hub.yaml")).unwrap();
    assert_eq!(stack.meta.name, "overlay");
    let names: Vec<_> = stack.components.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["dns", "k8s", "app"]);
    assert!(stack.component("k8s").unwrap().provides.contains(&"ingress".to_string()));

    let size = stack.parameters.iter().find(|p| p.name == "size").unwrap();
    assert_eq!(size.value, Some(ParameterValue::string("large")));
    assert!(stack.parameters.iter().any(|p| p.name == "region"));
}

#[test]
fn test_missing_file() {
    let err = ManifestParser::parse_file("/nonexistent/hub.yaml").unwrap_err();
    assert!(matches!(err, HubError::ManifestParse { .. }));
}
