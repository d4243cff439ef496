//! Control-plane patch translation.
//!
//! The state journal is translated into a [`Patch`] the control-plane client
//! sends as is. Secret parameters travel as references, secret outputs are
//! redacted.

use crate::error::{HubError, Result};
use crate::parameters::LockedParameter;
use crate::state::{atomic_write, CapturedOutput, LifecycleOperation, StateManifest, StepStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub name: String,
    pub status: StepStatus,
    pub parameters: Vec<PatchEntry>,
    pub outputs: Vec<PatchEntry>,
    pub components_status: Vec<ComponentStatus>,
    pub inflight_operations: Vec<LifecycleOperation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchEntry {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    pub kind: String,

    /// Plain value, or `{kind, <kind>: reference}` for secrets
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub name: String,
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Translate `state` into a patch.
pub fn patch(state: &StateManifest) -> Patch {
    let components_status = state
        .lifecycle
        .order
        .iter()
        .map(|name| {
            let step = state.step(name);
            ComponentStatus {
                name: name.clone(),
                status: step.map(|s| s.status).unwrap_or_default(),
                message: step.and_then(|s| s.message.clone()),
            }
        })
        .collect();

    let outputs = state
        .components
        .values()
        .filter(|step| step.status == StepStatus::Success)
        .flat_map(|step| step.outputs.iter())
        .chain(state.stack_outputs.iter())
        .map(output_entry)
        .collect();

    Patch {
        name: state.meta.name.clone(),
        status: state.status,
        parameters: state.stack_parameters.iter().map(parameter_entry).collect(),
        outputs,
        components_status,
        inflight_operations: state
            .operations
            .iter()
            .filter(|op| op.status == StepStatus::Running)
            .chain(state.operations.last().filter(|op| op.status != StepStatus::Running))
            .cloned()
            .collect(),
    }
}

fn parameter_entry(param: &LockedParameter) -> PatchEntry {
    let value = match param.kind.secret_kind() {
        Some(kind) => json!({ "kind": kind, kind: param.value.as_binding() }),
        None => serde_json::to_value(&param.value).unwrap_or(Value::Null),
    };
    PatchEntry {
        name: param.name.clone(),
        component: param.component.clone(),
        kind: param.kind.to_string(),
        value,
    }
}

fn output_entry(output: &CapturedOutput) -> PatchEntry {
    let value = match output.kind.secret_kind() {
        Some(kind) => json!({ "kind": kind }),
        None => Value::String(output.value.clone()),
    };
    PatchEntry {
        name: output.name.clone(),
        component: output.component.clone(),
        kind: output.kind.to_string(),
        value,
    }
}

/// Destination for patches.
#[async_trait]
pub trait PatchSink: Send + Sync {
    async fn send(&self, patch: &Patch) -> Result<()>;
}

/// Writes each patch as JSON to a file.
#[derive(Debug, Clone)]
pub struct FilePatchSink {
    path: PathBuf,
}

impl FilePatchSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PatchSink for FilePatchSink {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn send(&self, patch: &Patch) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(patch).map_err(HubError::internal)?;
        atomic_write(&self.path, &bytes)
            .map_err(|e| HubError::SyncRejected {
                reason: format!("{}: {}", self.path.display(), e),
            })?;
        info!("Patch written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ParameterKind, ParameterValue};

    fn state() -> StateManifest {
        let mut state = StateManifest { version: 1, kind: "state".into(), ..Default::default() };
        state.meta.name = "demo".into();
        state.status = StepStatus::Success;
        state.lifecycle.order = vec!["db".into(), "app".into()];
        state.stack_parameters = vec![
            LockedParameter {
                name: "db.password".into(),
                component: None,
                kind: ParameterKind::Secret(Some("password".into())),
                value: ParameterValue::SecretRef {
                    secret_ref: "vault-1".into(),
                    kind: Some("password".into()),
                },
                env: None,
                deferred: false,
            },
            LockedParameter {
                name: "region".into(),
                component: None,
                kind: ParameterKind::Plain,
                value: ParameterValue::string("us-east-1"),
                env: None,
                deferred: false,
            },
        ];
        let step = state.step_mut("db");
        step.status = StepStatus::Success;
        step.outputs = vec![
            CapturedOutput {
                name: "db.host".into(),
                component: Some("db".into()),
                kind: ParameterKind::Plain,
                value: "db.local".into(),
                brief: None,
            },
            CapturedOutput {
                name: "db.root".into(),
                component: Some("db".into()),
                kind: ParameterKind::Secret(None),
                value: "plaintext".into(),
                brief: None,
            },
        ];
        state
    }

    #[test]
    fn test_secrets_are_references_or_redacted() {
        let patch = patch(&state());
        let password = &patch.parameters[0];
        assert_eq!(password.value, json!({ "kind": "password", "password": "vault-1" }));
        assert_eq!(patch.parameters[1].value, json!("us-east-1"));

        let text = serde_json::to_string(&patch).unwrap();
        assert!(!text.contains("plaintext"));
        let root = patch.outputs.iter().find(|o| o.name == "db.root").unwrap();
        assert_eq!(root.value, json!({ "kind": "text" }));
    }

    #[test]
    fn test_component_status_in_order() {
        let patch = patch(&state());
        let names: Vec<_> =
            patch.components_status.iter().map(|c| (c.name.as_str(), c.status)).collect();
        assert_eq!(names, vec![("db", StepStatus::Success), ("app", StepStatus::Pending)]);
        assert!(patch.inflight_operations.is_empty());
    }

    #[tokio::test]
    async fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilePatchSink::new(dir.path().join("patch.json"));
        let patch = patch(&state());
        sink.send(&patch).await.unwrap();
        let bytes = std::fs::read(dir.path().join("patch.json")).unwrap();
        let written: Patch = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(written, patch);
    }
}
