use super::*;
use crate::manifest::ParameterValue;
use std::path::PathBuf;

fn output(name: &str, value: &str) -> CapturedOutput {
    CapturedOutput {
        name: name.to_string(),
        component: None,
        kind: ParameterKind::Plain,
        value: value.to_string(),
        brief: None,
    }
}

fn deployed() -> StateManifest {
    let mut state = StateManifest { version: 1, kind: "state".into(), ..Default::default() };
    state.meta.name = "demo".into();
    state.lifecycle.order = vec!["dns".into(), "k8s".into(), "app".into()];
    for name in ["dns", "k8s"] {
        let step = state.step_mut(name);
        step.status = StepStatus::Success;
        step.verb = Some("deploy".into());
    }
    state.step_mut("dns").outputs = vec![output("dns.domain", "example.com")];
    state.step_mut("k8s").outputs =
        vec![output("dns.domain", "example.com"), output("k8s.endpoint", "https://k8s")];
    state.step_mut("app").status = StepStatus::Failed;
    state.record_provides("dns", &["dns".to_string()]);
    state.record_provides("k8s", &["kubernetes".to_string()]);
    state
}

#[test]
fn test_first_incomplete() {
    let state = deployed();
    let order = state.lifecycle.order.clone();
    assert_eq!(state.first_incomplete(&order, "deploy"), Some("app"));
    assert_eq!(state.first_incomplete(&order, "backup"), Some("dns"));

    let mut done = state.clone();
    done.step_mut("app").status = StepStatus::Success;
    done.step_mut("app").verb = Some("deploy".into());
    assert_eq!(done.first_incomplete(&order, "deploy"), None);
}

#[test]
fn test_output_bindings_only_from_success() {
    let mut state = deployed();
    state.step_mut("app").outputs = vec![output("app.url", "never")];
    let bindings = state.output_bindings();
    assert_eq!(bindings.get("dns.domain").map(String::as_str), Some("example.com"));
    assert_eq!(bindings.get("k8s.endpoint").map(String::as_str), Some("https://k8s"));
    assert!(!bindings.contains_key("app.url"));
}

#[test]
fn test_clear_component() {
    let mut state = deployed();
    state.clear_component("k8s");
    assert!(state.step("k8s").unwrap().outputs.is_empty());
    assert!(!state.provides.contains_key("kubernetes"));
    assert_eq!(state.provides["dns"], vec!["dns"]);
}

#[test]
fn test_diff_outputs() {
    let state = deployed();
    let previous = state.previous_success("k8s").unwrap();
    let current = &state.step("k8s").unwrap().outputs;
    let diff = diff_outputs(&previous.outputs, current);
    assert_eq!(diff.len(), 1);
    assert_eq!(diff[0].name, "k8s.endpoint");
}

#[test]
fn test_operation_phases() {
    let mut op = LifecycleOperation::new("deploy", BTreeMap::new());
    op.phase("dns", StepStatus::Running, None);
    op.phase("dns", StepStatus::Success, None);
    op.phase("k8s", StepStatus::Failed, Some("exit 1".into()));
    assert_eq!(op.phases.len(), 2);
    assert_eq!(op.phases[0].status, StepStatus::Success);

    let mut state = deployed();
    state.record_operation(&op);
    op.status = StepStatus::Failed;
    state.record_operation(&op);
    assert_eq!(state.operations.len(), 1);
    assert_eq!(state.operations[0].status, StepStatus::Failed);
}

#[test]
fn test_save_load_multiple_locations() {
    let dir = tempfile::tempdir().unwrap();
    let locations = vec![
        StateLocation::File(dir.path().join("hub.yaml.state")),
        StateLocation::File(dir.path().join("mirror").join("hub.yaml.state")),
    ];
    let mut state = deployed();
    state.stack_parameters.push(LockedParameter {
        name: "region".into(),
        component: None,
        kind: ParameterKind::Plain,
        value: ParameterValue::string("us-east-1"),
        env: None,
        deferred: false,
    });
    state.save(&locations).unwrap();

    let loaded = StateManifest::load(&locations[1..]).unwrap().unwrap();
    assert_eq!(loaded, state);
    assert_eq!(loaded.locked_parameters().len(), 1);
}

#[test]
fn test_load_missing_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let locations = vec![StateLocation::File(dir.path().join("absent"))];
    assert!(StateManifest::load(&locations).unwrap().is_none());
}

#[test]
fn test_unreadable_state_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.state");
    std::fs::write(&path, "components: [not, a, map").unwrap();
    let locations = vec![StateLocation::File(path)];

    assert!(matches!(StateManifest::load(&locations), Err(HubError::StateRead { .. })));

    let warnings = Warnings::new();
    assert!(StateManifest::load_or_warn(&locations, &warnings).is_none());
    assert_eq!(warnings.all().len(), 1);
}

#[test]
fn test_save_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, "x").unwrap();
    // A path below a regular file cannot be created.
    let locations = vec![StateLocation::File(PathBuf::from(&blocker).join("state"))];
    assert!(matches!(deployed().save(&locations), Err(HubError::StateWrite { .. })));
}

#[test]
fn test_explain_masks_secrets() {
    let mut state = deployed();
    state.step_mut("app").status = StepStatus::Success;
    state.step_mut("app").outputs = vec![CapturedOutput {
        name: "app.password".into(),
        component: Some("app".into()),
        kind: ParameterKind::Secret(None),
        value: "hunter2".into(),
        brief: None,
    }];

    let text = state.explain(&ExplainOptions::default()).unwrap();
    assert!(text.contains("Stack: demo"));
    assert!(text.contains("k8s.endpoint = https://k8s"));
    assert!(text.contains("app.password = *****"));
    assert!(!text.contains("hunter2"));

    let options = ExplainOptions { show_secrets: true, ..Default::default() };
    assert!(state.explain(&options).unwrap().contains("hunter2"));

    let options = ExplainOptions { format: ExplainFormat::Json, ..Default::default() };
    let json: serde_json::Value = serde_json::from_str(&state.explain(&options).unwrap()).unwrap();
    assert_eq!(json["components"]["app"]["outputs"]["app.password"], "*****");
    assert_eq!(json["components"]["dns"]["status"], "success");
}

#[test]
fn test_explain_single_component() {
    let options = ExplainOptions { component: Some("dns".into()), ..Default::default() };
    let text = deployed().explain(&options).unwrap();
    assert!(text.contains("dns: success (deploy)"));
    assert!(!text.contains("k8s"));
}
