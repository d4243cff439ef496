//! State journal.
//!
//! The durable record of one stack instance:
//! - locked parameters the stack was deployed with
//! - per-component execution steps and captured outputs
//! - capabilities provided by deployed components
//! - the log of lifecycle operations
//!
//! The journal is rewritten after every component so a crashed run can resume
//! at the first component that did not succeed.

pub mod explain;
pub mod storage;

#[cfg(test)]
mod tests;

pub use explain::{ExplainFormat, ExplainOptions};
pub use storage::{atomic_write, FileStorage, StateLocation, StateStorage};

use crate::error::{HubError, Result};
use crate::expression::Bindings;
use crate::manifest::{Meta, ParameterKind};
use crate::observability::metrics;
use crate::parameters::{ElaborateManifest, LockedParameter};
use crate::warnings::Warnings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, instrument};

/// Status of a component step or of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Failed | StepStatus::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// A value reported by a component after it ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    #[serde(default)]
    pub kind: ParameterKind,

    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
}

impl CapturedOutput {
    pub fn is_secret(&self) -> bool {
        self.kind.is_secret()
    }
}

/// Results of a test-verb run. Never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DryRunRecord {
    pub status: StepStatus,

    #[serde(default)]
    pub timestamps: Timestamps,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<CapturedOutput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Execution record of one component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStep {
    #[serde(default)]
    pub status: StepStatus,

    /// Verb that produced `status`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,

    #[serde(default)]
    pub timestamps: Timestamps,

    /// Component view of the locked parameters the verb ran with
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<LockedParameter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<CapturedOutput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRunRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPhase {
    pub phase: String,
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One invocation of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleOperation {
    pub id: String,
    pub operation: String,
    pub status: StepStatus,
    pub initiator: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,

    #[serde(default)]
    pub phases: Vec<OperationPhase>,
}

impl LifecycleOperation {
    pub fn new(operation: impl Into<String>, options: BTreeMap<String, String>) -> Self {
        let initiator = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            status: StepStatus::Running,
            initiator,
            timestamp: Utc::now(),
            options,
            phases: Vec::new(),
        }
    }

    /// Record or update the phase for `phase`.
    pub fn phase(&mut self, phase: &str, status: StepStatus, message: Option<String>) {
        match self.phases.iter_mut().find(|p| p.phase == phase) {
            Some(existing) => {
                existing.status = status;
                existing.message = message;
            }
            None => self.phases.push(OperationPhase { phase: phase.to_string(), status, message }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateLifecycle {
    #[serde(default)]
    pub order: Vec<String>,

    /// Last verb run against the stack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
}

/// Root of a state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateManifest {
    pub version: u32,
    pub kind: String,

    #[serde(default)]
    pub meta: Meta,

    #[serde(default)]
    pub lifecycle: StateLifecycle,

    #[serde(default)]
    pub status: StepStatus,

    #[serde(default)]
    pub stack_parameters: Vec<LockedParameter>,

    #[serde(default)]
    pub stack_outputs: Vec<CapturedOutput>,

    #[serde(default)]
    pub components: BTreeMap<String, StateStep>,

    /// Capability to the components providing it
    #[serde(default)]
    pub provides: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub operations: Vec<LifecycleOperation>,
}

impl StateManifest {
    /// Fresh journal for an elaborated stack.
    pub fn new(elaborate: &ElaborateManifest) -> Self {
        let mut state = Self { version: 1, kind: "state".to_string(), ..Default::default() };
        state.sync_with(elaborate);
        state
    }

    /// Adopt the stack identity, order and locked parameters of `elaborate`,
    /// keeping everything recorded so far.
    pub fn sync_with(&mut self, elaborate: &ElaborateManifest) {
        self.meta = Meta { from_stack: None, ..elaborate.meta.clone() };
        self.lifecycle.order = elaborate.lifecycle.order.clone();
        self.stack_parameters =
            elaborate.parameters.iter().filter(|p| !p.deferred).cloned().collect();
    }

    pub fn step(&self, component: &str) -> Option<&StateStep> {
        self.components.get(component)
    }

    /// Step for `component`, created pending on first use.
    pub fn step_mut(&mut self, component: &str) -> &mut StateStep {
        self.components.entry(component.to_string()).or_default()
    }

    pub fn status_of(&self, component: &str) -> StepStatus {
        self.step(component).map(|s| s.status).unwrap_or_default()
    }

    /// Locked values to carry into a re-elaboration.
    pub fn locked_parameters(&self) -> Vec<LockedParameter> {
        self.stack_parameters.iter().filter(|p| !p.deferred).cloned().collect()
    }

    /// First component in `order` that has not succeeded at `verb`.
    pub fn first_incomplete<'a>(&self, order: &'a [String], verb: &str) -> Option<&'a str> {
        order
            .iter()
            .find(|name| match self.step(name) {
                Some(step) => {
                    step.status != StepStatus::Success || step.verb.as_deref() != Some(verb)
                }
                None => true,
            })
            .map(String::as_str)
    }

    /// Outputs of every successfully deployed component, later components
    /// shadowing earlier ones.
    pub fn output_bindings(&self) -> Bindings {
        let mut bindings = Bindings::new();
        for name in &self.lifecycle.order {
            let Some(step) = self.step(name) else { continue };
            if step.status != StepStatus::Success {
                continue;
            }
            for output in &step.outputs {
                bindings.insert(output.name.clone(), output.value.clone());
            }
        }
        bindings
    }

    /// Record a successful deploy-like verb and the capabilities it provides.
    pub fn record_provides(&mut self, component: &str, capabilities: &[String]) {
        for capability in capabilities {
            let providers = self.provides.entry(capability.clone()).or_default();
            if !providers.iter().any(|p| p == component) {
                providers.push(component.to_string());
            }
        }
    }

    /// Forget outputs and capabilities of an undeployed component.
    pub fn clear_component(&mut self, component: &str) {
        if let Some(step) = self.components.get_mut(component) {
            step.outputs.clear();
        }
        for providers in self.provides.values_mut() {
            providers.retain(|p| p != component);
        }
        self.provides.retain(|_, providers| !providers.is_empty());
    }

    /// Previous successful component in order before `component`.
    pub fn previous_success(&self, component: &str) -> Option<&StateStep> {
        let index = self.lifecycle.order.iter().position(|n| n == component)?;
        self.lifecycle.order[..index]
            .iter()
            .rev()
            .filter_map(|n| self.step(n))
            .find(|s| s.status == StepStatus::Success)
    }

    /// Append `operation` or replace the entry with the same id.
    pub fn record_operation(&mut self, operation: &LifecycleOperation) {
        match self.operations.iter_mut().find(|o| o.id == operation.id) {
            Some(existing) => *existing = operation.clone(),
            None => self.operations.push(operation.clone()),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(HubError::internal)
    }

    pub fn from_yaml(content: &str, location: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| HubError::StateRead {
                location: location.to_string(),
                reason: e.to_string(),
            })
    }

    /// Read the journal from the first location that has one.
    ///
    /// `Ok(None)` means no location holds a state file yet.
    #[instrument(skip_all)]
    pub fn load(locations: &[StateLocation]) -> Result<Option<Self>> {
        for location in locations {
            let storage = location.storage();
            let Some(bytes) = storage.read()? else {
                debug!("No state at {}", location);
                continue;
            };
            let content = String::from_utf8(bytes)
                .map_err(|e| HubError::StateRead {
                    location: location.to_string(),
                    reason: e.to_string(),
                })?;
            let state = Self::from_yaml(&content, &location.to_string())?;
            info!("Loaded state from {}", location);
            return Ok(Some(state));
        }
        Ok(None)
    }

    /// Like [`StateManifest::load`], but an unreadable journal is a warning
    /// and is treated as no prior state.
    pub fn load_or_warn(locations: &[StateLocation], warnings: &Warnings) -> Option<Self> {
        match Self::load(locations) {
            Ok(state) => state,
            Err(e) => {
                warnings.push(format!("Ignoring unreadable state: {}", e));
                None
            }
        }
    }

    /// Write the journal to every location. Any failure is fatal.
    #[instrument(skip_all)]
    pub fn save(&self, locations: &[StateLocation]) -> Result<()> {
        let content = self.to_yaml()?;
        for location in locations {
            let result = location.storage().write(content.as_bytes());
            metrics::record_state_write(result.is_ok());
            result?;
            debug!("State written to {}", location);
        }
        Ok(())
    }
}

/// Outputs of `current` that are new or changed relative to `previous`.
pub fn diff_outputs<'a>(
    previous: &[CapturedOutput],
    current: &'a [CapturedOutput],
) -> Vec<&'a CapturedOutput> {
    current
        .iter()
        .filter(|o| !previous.iter().any(|p| p.name == o.name && p.value == o.value))
        .collect()
}
