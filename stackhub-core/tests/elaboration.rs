//! Integration tests for elaboration from files on disk.

use stackhub_core::{
    manifest::load_parameter_files, ElaborateManifest, Elaborator,
    ManifestParser, StateLocation, StateManifest, Warnings,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

const STACK: &str = r#"
version: 1
kind: stack
meta:
  name: shop
components:
  - name: web
    requires: [database]
    parameters:
      - name: replicas
        default: 2
  - name: postgres
    provides: [database]
    outputs:
      - name: db.host
parameters:
  - name: dns.domain
    fromEnv: SHOP_DOMAIN
    default: shop.local
  - name: url
    value: "https://${dns.domain}"
  - name: db.dsn
    component: web
    value: "postgres://${db.host}/shop"
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn value(manifest: &ElaborateManifest, component: &str, name: &str) -> String {
    manifest
        .parameters_for(component)
        .into_iter()
        .find(|p| p.name == name)
        .unwrap()
        .value
        .as_binding()
}

#[test]
fn test_elaborate_files_and_reload() {
    let dir = TempDir::new().unwrap();
    let stack_path = write(&dir, "hub.yaml", STACK);
    let params = write(&dir, "params.yaml", "- name: replicas\n  component: web\n  value: 5\n");

    let stack = ManifestParser::parse_file(&stack_path).unwrap();
    let files = load_parameter_files(&[params]).unwrap();
    let overrides = BTreeMap::from([("dns.domain".to_string(), "shop.example.com".to_string())]);
    let manifest =
        Elaborator::new(Warnings::new()).elaborate(&stack, &files, &[], &overrides).unwrap();

    assert_eq!(manifest.lifecycle.order, vec!["postgres", "web"]);
    assert_eq!(value(&manifest, "web", "replicas"), "5");
    assert_eq!(value(&manifest, "web", "url"), "https://shop.example.com");
    let dsn = manifest.parameters.iter().find(|p| p.name == "db.dsn").unwrap();
    assert!(dsn.deferred);

    let out = dir.path().join("hub.yaml.elaborate");
    manifest.save(&[out.clone()]).unwrap();
    let reloaded = ElaborateManifest::load(&out).unwrap();
    assert_eq!(reloaded.parameters, manifest.parameters);
    assert_eq!(reloaded.lifecycle.order, manifest.lifecycle.order);
}

#[test]
fn test_from_env_default() {
    let stack = ManifestParser::parse(STACK).unwrap();
    let os_env = BTreeMap::from([("SHOP_DOMAIN".to_string(), "env.example.com".to_string())]);
    let manifest =
        Elaborator::new(Warnings::new())
            .with_os_env(os_env)
            .elaborate(&stack, &[], &[], &BTreeMap::new())
            .unwrap();
    assert_eq!(value(&manifest, "web", "url"), "https://env.example.com");
}

#[test]
fn test_state_locks_values_on_reelaboration() {
    let dir = TempDir::new().unwrap();
    let stack = ManifestParser::parse(STACK).unwrap();
    let first =
        Elaborator::new(Warnings::new()).elaborate(&stack, &[], &[], &BTreeMap::new()).unwrap();

    let location = StateLocation::File(dir.path().join("hub.yaml.state"));
    StateManifest::new(&first).save(&[location.clone()]).unwrap();

    // A parameter file changes the domain, the deployed value stays.
    let params = write(&dir, "params.yaml", "- name: dns.domain\n  value: other.example.com\n");
    let files = load_parameter_files(&[params]).unwrap();
    let state = StateManifest::load(&[location]).unwrap().unwrap();
    let second = Elaborator::new(Warnings::new())
        .elaborate(&stack, &files, &state.locked_parameters(), &BTreeMap::new())
        .unwrap();
    assert_eq!(value(&second, "web", "dns.domain"), "shop.local");
    assert!(state.stack_parameters.iter().all(|p| !p.deferred));
}
