//! Read-only rendering of a state journal for diagnostics.

use super::{diff_outputs, CapturedOutput, StateManifest, StepStatus};
use crate::error::{HubError, Result};
use crate::parameters::LockedParameter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

const MASK: &str = "*****";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExplainFormat {
    #[default]
    Text,
    Yaml,
    Json,
}

impl std::str::FromStr for ExplainFormat {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(ExplainFormat::Text),
            "yaml" => Ok(ExplainFormat::Yaml),
            "json" => Ok(ExplainFormat::Json),
            other => Err(HubError::InvalidConfig {
                reason: format!("unknown explain format '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExplainOptions {
    pub format: ExplainFormat,
    /// Only this component
    pub component: Option<String>,
    /// Print secret outputs in clear
    pub show_secrets: bool,
    pub show_operations: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Explanation {
    stack: String,
    status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    verb: Option<String>,
    parameters: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
    components: BTreeMap<String, ComponentExplanation>,
    provides: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    operations: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ComponentExplanation {
    status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    verb: Option<String>,
    outputs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl StateManifest {
    /// Render parameters, outputs and the operation log.
    pub fn explain(&self, options: &ExplainOptions) -> Result<String> {
        match options.format {
            ExplainFormat::Text => Ok(self.explain_text(options)),
            ExplainFormat::Yaml => {
                serde_yaml::to_string(&self.explanation(options)).map_err(HubError::internal)
            }
            ExplainFormat::Json => {
                serde_json::to_string_pretty(&self.explanation(options)).map_err(HubError::internal)
            }
        }
    }

    fn selected(&self, options: &ExplainOptions) -> Vec<&str> {
        let mut names: Vec<&str> = self.lifecycle.order.iter().map(String::as_str).collect();
        for name in self.components.keys() {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        match &options.component {
            Some(only) => names.into_iter().filter(|n| *n == only.as_str()).collect(),
            None => names,
        }
    }

    fn explanation(&self, options: &ExplainOptions) -> Explanation {
        let components = self
            .selected(options)
            .into_iter()
            .filter_map(|name| self.step(name).map(|step| (name, step)))
            .map(|(name, step)| {
                (
                    name.to_string(),
                    ComponentExplanation {
                        status: step.status,
                        verb: step.verb.clone(),
                        outputs: step
                            .outputs
                            .iter()
                            .map(|o| (o.name.clone(), shown(o, options)))
                            .collect(),
                        message: step.message.clone(),
                    },
                )
            })
            .collect();

        Explanation {
            stack: self.meta.name.clone(),
            status: self.status,
            verb: self.lifecycle.verb.clone(),
            parameters: self
                .stack_parameters
                .iter()
                .map(|p| (p.key(), parameter_text(p)))
                .collect(),
            outputs: self
                .stack_outputs
                .iter()
                .map(|o| (o.name.clone(), shown(o, options)))
                .collect(),
            components,
            provides: self.provides.clone(),
            operations: if options.show_operations {
                self.operations
                    .iter()
                    .map(|op| {
                        format!(
                            "{} {} {} by {}",
                            op.timestamp.to_rfc3339(),
                            op.operation,
                            op.status,
                            op.initiator
                        )
                    })
                    .collect()
            } else {
                Vec::new()
            },
        }
    }

    fn explain_text(&self, options: &ExplainOptions) -> String {
        let mut out = String::new();
        let verb = self.lifecycle.verb.as_deref().map(|v| format!(", {}", v)).unwrap_or_default();
        let _ = writeln!(out, "Stack: {} ({}{})", self.meta.name, self.status, verb);

        if options.component.is_none() {
            if !self.stack_parameters.is_empty() {
                let _ = writeln!(out, "Parameters:");
                for param in &self.stack_parameters {
                    let _ = writeln!(out, "    {} = {}", param.key(), parameter_text(param));
                }
            }
            if !self.stack_outputs.is_empty() {
                let _ = writeln!(out, "Outputs:");
                for output in &self.stack_outputs {
                    let _ = writeln!(out, "    {} = {}", output.name, shown(output, options));
                }
            }
        }

        let _ = writeln!(out, "Components:");
        for name in self.selected(options) {
            let Some(step) = self.step(name) else {
                let _ = writeln!(out, "    {}: {}", name, StepStatus::Pending);
                continue;
            };
            let verb = step.verb.as_deref().map(|v| format!(" ({})", v)).unwrap_or_default();
            let when = step
                .timestamps
                .end
                .or(step.timestamps.start)
                .map(|t| format!(" {}", t.to_rfc3339()))
                .unwrap_or_default();
            let _ = writeln!(out, "    {}: {}{}{}", name, step.status, verb, when);
            if let Some(message) = &step.message {
                let _ = writeln!(out, "        {}", message);
            }

            // Outputs repeated from the previous component are not shown again.
            let previous: &[CapturedOutput] =
                self.previous_success(name).map(|s| s.outputs.as_slice()).unwrap_or(&[]);
            for output in diff_outputs(previous, &step.outputs) {
                let _ = writeln!(out, "        {} = {}", output.name, shown(output, options));
            }
            if let Some(dry) = &step.dry_run {
                let _ = writeln!(out, "        dry run: {}", dry.status);
            }
        }

        if options.show_operations && !self.operations.is_empty() {
            let _ = writeln!(out, "Operations:");
            for op in &self.operations {
                let _ = writeln!(
                    out,
                    "    {} {} {} by {} [{}]",
                    op.timestamp.to_rfc3339(),
                    op.operation,
                    op.status,
                    op.initiator,
                    op.id
                );
                for phase in &op.phases {
                    let _ = writeln!(out, "        {}: {}", phase.phase, phase.status);
                }
            }
        }
        out
    }
}

fn shown(output: &CapturedOutput, options: &ExplainOptions) -> String {
    if output.is_secret() && !options.show_secrets {
        MASK.to_string()
    } else {
        output.value.clone()
    }
}

fn parameter_text(param: &LockedParameter) -> String {
    if param.deferred {
        format!("{} (deferred)", param.value.as_binding())
    } else if param.kind.is_secret() {
        format!("secretRef:{}", param.value.as_binding())
    } else {
        param.value.as_binding()
    }
}
