//! The lifecycle state machine.

use super::env::{EnvironmentBuilder, InvocationContext};
use super::outputs;
use super::plan::plan;
use super::runner::{ComponentRunner, Invocation, ProcessRunner, RunOutcome};
use super::{Request, Verb};
use crate::config::Config;
use crate::error::{ErrorKind, HubError, Result};
use crate::expression::{self, Bindings, ResolveMode};
use crate::manifest::{Component, OutputDeclaration};
use crate::observability::metrics;
use crate::parameters::{ElaborateManifest, LockedParameter, SecretResolver, UnavailableSecrets};
use crate::state::{
    diff_outputs, CapturedOutput, LifecycleOperation, StateManifest, StepStatus, Timestamps,
};
use crate::warnings::Warnings;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Outcome of one component within a run.
#[derive(Debug, Clone)]
pub struct ComponentReport {
    pub component: String,
    pub status: StepStatus,
    /// Outputs new or changed relative to the previous component
    pub outputs: Vec<CapturedOutput>,
    pub message: Option<String>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub operation_id: String,
    pub verb: String,
    pub dry_run: bool,
    pub status: StepStatus,
    pub components: Vec<ComponentReport>,
    pub stack_outputs: Vec<CapturedOutput>,
}

/// Outcome of a single `invoke`.
#[derive(Debug, Clone)]
pub struct InvokeReport {
    pub component: String,
    pub verb: String,
    pub outputs: Vec<CapturedOutput>,
}

/// Walks the resolved order and runs component verbs one at a time.
pub struct LifecycleExecutor {
    runner: Arc<dyn ComponentRunner>,
    secrets: Arc<dyn SecretResolver>,
    warnings: Warnings,
    cancel: Arc<AtomicBool>,
    os_env: BTreeMap<String, String>,
    /// Explicit base directory; wins over the elaborate manifest's
    base_dir: Option<PathBuf>,
    default_base_dir: PathBuf,
    relay: bool,
    mode: ResolveMode,
}

impl LifecycleExecutor {
    pub fn new(config: &Config, warnings: Warnings) -> Self {
        Self {
            runner: Arc::new(ProcessRunner::new()),
            secrets: Arc::new(UnavailableSecrets),
            warnings,
            cancel: Arc::new(AtomicBool::new(false)),
            os_env: std::env::vars().collect(),
            base_dir: None,
            default_base_dir: config.components_base_dir(),
            relay: config.relay_output,
            mode: if config.auto_resolve { ResolveMode::AutoResolve } else { ResolveMode::Strict },
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ComponentRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_os_env(mut self, os_env: BTreeMap<String, String>) -> Self {
        self.os_env = os_env;
        self
    }

    pub fn with_base_dir(mut self, base_dir: Option<PathBuf>) -> Self {
        self.base_dir = base_dir;
        self
    }

    pub fn with_relay(mut self, relay: bool) -> Self {
        self.relay = relay;
        self
    }

    /// Flag that stops the run before the next component once set.
    ///
    /// A component already running is left to finish.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn base_dir(&self, manifest: &ElaborateManifest) -> PathBuf {
        self.base_dir
            .clone()
            .or_else(|| manifest.base_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| self.default_base_dir.clone())
    }

    /// Run `request.verb` over the planned components.
    ///
    /// State is saved before and after every component. A failed component
    /// stops the run; with `force`, the components after it are recorded as
    /// skipped, and components whose parameters cannot be resolved are
    /// skipped without stopping the run.
    #[instrument(
        skip_all,
        fields(stack = %manifest.meta.name, verb = %request.verb, dry_run = request.dry_run)
    )]
    pub async fn run(&self, manifest: &ElaborateManifest, request: &Request) -> Result<RunReport> {
        let prior = StateManifest::load_or_warn(&request.state, &self.warnings);
        let steps = plan(manifest, request, prior.as_ref())?;

        let state = match prior {
            Some(mut state) => {
                if !request.dry_run {
                    state.sync_with(manifest);
                }
                state
            }
            None => StateManifest::new(manifest),
        };
        let operation = LifecycleOperation::new(request.verb.as_str(), request.options());
        info!("{} {} components (operation {})", request.verb, steps.len(), operation.id);

        let mut run = Run {
            exec: self,
            manifest,
            request,
            outputs: state.output_bindings(),
            state,
            report: RunReport {
                operation_id: operation.id.clone(),
                verb: request.verb.to_string(),
                dry_run: request.dry_run,
                status: StepStatus::Running,
                components: Vec::new(),
                stack_outputs: Vec::new(),
            },
            operation,
            last_outputs: Vec::new(),
        };

        if !request.dry_run {
            run.state.lifecycle.verb = Some(request.verb.to_string());
            run.state.status = StepStatus::Running;
        }
        run.checkpoint()?;

        let mut failure = None;
        for (index, name) in steps.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Interrupted before {}", name);
                failure = Some(HubError::Interrupted { component: name.clone() });
                break;
            }

            let component = manifest
                .component(name)
                .ok_or_else(|| HubError::UnknownComponent { component: name.clone() })?;
            if !component.supports(request.verb.as_str(), &manifest.lifecycle.verbs) {
                debug!("{} does not implement {}", name, request.verb);
                let reason = format!("{} not supported", request.verb);
                run.operation.phase(name, StepStatus::Skipped, Some(reason));
                continue;
            }

            match run.component(component, name).await {
                Ok(()) => {}
                Err(e) if request.force && e.kind() == ErrorKind::ParameterResolution => {
                    self.warnings.push(format!("Skipping {}: {}", name, e));
                }
                Err(e) => {
                    if request.force {
                        for rest in &steps[index + 1..] {
                            let reason = format!("{} failed", name);
                            run.set_status(rest, StepStatus::Skipped, Some(reason));
                        }
                    }
                    failure = Some(e);
                    break;
                }
            }
        }

        if failure.is_none() && !request.dry_run {
            match request.verb {
                Verb::Deploy => run.render_stack_outputs(),
                Verb::Undeploy => run.state.stack_outputs.clear(),
                _ => {}
            }
        }

        let status = if failure.is_none() { StepStatus::Success } else { StepStatus::Failed };
        if !request.dry_run {
            run.state.status = status;
        }
        run.operation.status = status;
        run.report.status = status;
        run.report.stack_outputs = run.state.stack_outputs.clone();
        run.checkpoint()?;

        match failure {
            Some(e) => Err(e),
            None => Ok(run.report),
        }
    }

    /// Run one verb of one component outside the normal order.
    ///
    /// The verb's outputs are returned and the operation is logged; the
    /// component's recorded status is left alone.
    #[instrument(skip_all, fields(component = %component, verb = %verb))]
    pub async fn invoke(
        &self,
        manifest: &ElaborateManifest,
        request: &Request,
        component: &str,
        verb: &str,
    ) -> Result<InvokeReport> {
        let target = manifest
            .component(component)
            .ok_or_else(|| HubError::UnknownComponent { component: component.to_string() })?;
        let name = target.qualified_name();

        let mut state = StateManifest::load_or_warn(&request.state, &self.warnings)
            .unwrap_or_else(|| StateManifest::new(manifest));
        let mut options = request.options();
        options.insert("component".to_string(), name.clone());
        let mut operation = LifecycleOperation::new(format!("invoke {}", verb), options);

        let mut request = request.clone();
        request.verb = Verb::parse(verb);
        let bindings = state.output_bindings();
        let result = self.invoke_inner(manifest, &request, target, &name, &bindings).await;

        let status = if result.is_ok() { StepStatus::Success } else { StepStatus::Failed };
        operation.phase(&name, status, result.as_ref().err().map(|e| e.to_string()));
        operation.status = status;
        state.record_operation(&operation);
        state.save(&request.state)?;

        let outputs = result?;
        Ok(InvokeReport { component: name, verb: verb.to_string(), outputs })
    }

    async fn invoke_inner(
        &self,
        manifest: &ElaborateManifest,
        request: &Request,
        component: &Component,
        name: &str,
        bindings: &Bindings,
    ) -> Result<Vec<CapturedOutput>> {
        let params = manifest.resolve_for(name, bindings, self.mode)?;
        let script = request.verb.script(request.dry_run);
        let (outcome, seed) =
            self.execute(manifest, request, component, name, &script, &params).await?;
        if !outcome.success() {
            return Err(HubError::ComponentFailed {
                component: name.to_string(),
                verb: script,
                code: outcome.code,
            });
        }
        let raw = self.decode_outputs(name, &outcome.stdout, &seed);
        Ok(self.capture(component, name, &params, bindings, raw))
    }

    /// Build the environment and run `script` for `component`.
    async fn execute(
        &self,
        manifest: &ElaborateManifest,
        request: &Request,
        component: &Component,
        name: &str,
        script: &str,
        params: &[LockedParameter],
    ) -> Result<(RunOutcome, [u8; outputs::SEED_LEN])> {
        let base_dir = self.base_dir(manifest);
        let component_dir = base_dir.join(component.source_dir());
        let seed = outputs::generate_seed();

        let ctx = InvocationContext {
            component: name.to_string(),
            component_dir: component_dir.clone(),
            base_dir,
            verb: request.verb.to_string(),
            dry_run: request.dry_run,
            elaborate: request.elaborate.clone(),
            state: request.state.clone(),
            otp_seed: outputs::seed_hex(&seed),
        };
        let mode = request.os_environment_mode;
        let env = EnvironmentBuilder::new(mode, &self.os_env, self.secrets.as_ref())
            .with_overrides(&request.env_overrides)
            .build(&ctx, params)
            .await?;

        let invocation = Invocation {
            component: name.to_string(),
            verb: script.to_string(),
            dir: component_dir,
            env,
            relay: self.relay,
        };
        let outcome = self.runner.run(&invocation).await?;
        Ok((outcome, seed))
    }

    fn decode_outputs(&self, name: &str, stdout: &str, seed: &[u8]) -> BTreeMap<String, String> {
        match outputs::capture(stdout, seed) {
            Ok(raw) => raw,
            Err(e) => {
                self.warnings.push(format!("Ignoring outputs of {}: {}", name, e));
                BTreeMap::new()
            }
        }
    }

    /// Map raw reported values onto the component's declared outputs.
    ///
    /// A component that declares no outputs has everything it reports
    /// captured as plain values.
    fn capture(
        &self,
        component: &Component,
        name: &str,
        params: &[LockedParameter],
        known: &Bindings,
        raw: BTreeMap<String, String>,
    ) -> Vec<CapturedOutput> {
        if component.outputs.is_empty() {
            return raw
                .into_iter()
                .map(|(key, value)| CapturedOutput {
                    name: key,
                    component: Some(name.to_string()),
                    kind: Default::default(),
                    value,
                    brief: None,
                })
                .collect();
        }

        let mut bindings = known.clone();
        bindings.extend(params.iter().map(|p| (p.name.clone(), p.value.as_binding())));
        bindings.extend(raw.iter().map(|(k, v)| (k.clone(), v.clone())));

        component
            .outputs
            .iter()
            .filter_map(|decl| {
                let value = self.output_value(decl, &bindings, &raw, name)?;
                Some(CapturedOutput {
                    name: decl.name.clone(),
                    component: Some(name.to_string()),
                    kind: decl.kind.clone().unwrap_or_default(),
                    value,
                    brief: decl.brief.clone(),
                })
            })
            .collect()
    }

    fn output_value(
        &self,
        decl: &OutputDeclaration,
        bindings: &Bindings,
        raw: &BTreeMap<String, String>,
        owner: &str,
    ) -> Option<String> {
        let value = match &decl.value {
            Some(template) => match expression::render(template, bindings, self.mode) {
                Ok(value) => Some(value),
                Err(e) => {
                    self.warnings.push(format!(
                        "{}: output '{}' cannot be rendered: {}",
                        owner, decl.name, e
                    ));
                    return None;
                }
            },
            None => raw.get(decl.raw_key()).cloned(),
        };
        if value.is_none() {
            self.warnings
                .push(format!("{}: declared output '{}' was not reported", owner, decl.name));
        }
        value
    }
}

/// Mutable state of one run.
struct Run<'a> {
    exec: &'a LifecycleExecutor,
    manifest: &'a ElaborateManifest,
    request: &'a Request,
    state: StateManifest,
    operation: LifecycleOperation,
    /// Outputs visible to deferred parameters
    outputs: Bindings,
    report: RunReport,
    last_outputs: Vec<CapturedOutput>,
}

impl Run<'_> {
    /// Persist the journal. A failed write stops the run.
    fn checkpoint(&mut self) -> Result<()> {
        self.state.record_operation(&self.operation);
        self.state.save(&self.request.state)
    }

    /// Record a status change. Dry runs only touch the dry-run record.
    fn set_status(&mut self, name: &str, status: StepStatus, message: Option<String>) {
        let now = Utc::now();
        let step = self.state.step_mut(name);
        if self.request.dry_run {
            let record = step.dry_run.get_or_insert_with(Default::default);
            record.status = status;
            if status == StepStatus::Running {
                record.timestamps = Timestamps { start: Some(now), end: None };
                record.outputs.clear();
            } else {
                record.timestamps.end = Some(now);
            }
            record.message = message.clone();
        } else {
            step.status = status;
            step.verb = Some(self.request.verb.to_string());
            if status == StepStatus::Running {
                step.timestamps = Timestamps { start: Some(now), end: None };
            } else {
                step.timestamps.end = Some(now);
            }
            step.message = message.clone();
        }
        self.operation.phase(name, status, message.clone());

        if status.is_terminal() {
            self.report.components.push(ComponentReport {
                component: name.to_string(),
                status,
                outputs: Vec::new(),
                message,
            });
        }
    }

    async fn component(&mut self, component: &Component, name: &str) -> Result<()> {
        let verb = self.request.verb.clone();
        let script = verb.script(self.request.dry_run);
        let timer = Instant::now();
        info!(component = %name, "Running {}", script);

        self.set_status(name, StepStatus::Running, None);
        self.checkpoint()?;

        let params = match self.manifest.resolve_for(name, &self.outputs, self.exec.mode) {
            Ok(params) => params,
            Err(e) => return self.fail(name, &verb, timer, e, true),
        };

        let executed =
            self.exec.execute(self.manifest, self.request, component, name, &script, &params).await;
        let (outcome, seed) = match executed {
            Ok(result) => result,
            Err(e) => {
                let parameter_error = e.kind() == ErrorKind::ParameterResolution;
                return self.fail(name, &verb, timer, e, parameter_error);
            }
        };

        if !outcome.success() {
            if let Some(line) = outcome.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                debug!("{} stderr tail: {}", name, line);
            }
            let e = HubError::ComponentFailed {
                component: name.to_string(),
                verb: script,
                code: outcome.code,
            };
            return self.fail(name, &verb, timer, e, false);
        }

        let raw = self.exec.decode_outputs(name, &outcome.stdout, &seed);
        let captured = self.exec.capture(component, name, &params, &self.outputs, raw);
        let changed: Vec<CapturedOutput> =
            diff_outputs(&self.last_outputs, &captured).into_iter().cloned().collect();

        if self.request.dry_run {
            for output in &captured {
                self.outputs.insert(output.name.clone(), output.value.clone());
            }
            let step = self.state.step_mut(name);
            step.dry_run.get_or_insert_with(Default::default).outputs = captured.clone();
        } else {
            let step = self.state.step_mut(name);
            step.parameters = params;
            match &verb {
                Verb::Deploy => {
                    step.outputs = captured.clone();
                    self.state.record_provides(name, &component.provides);
                    for output in &captured {
                        self.outputs.insert(output.name.clone(), output.value.clone());
                    }
                }
                Verb::Undeploy => {
                    self.state.clear_component(name);
                    for output in &component.outputs {
                        self.outputs.remove(&output.name);
                    }
                }
                _ => {
                    for output in &captured {
                        match step.outputs.iter_mut().find(|o| o.name == output.name) {
                            Some(existing) => *existing = output.clone(),
                            None => step.outputs.push(output.clone()),
                        }
                    }
                }
            }
        }
        self.last_outputs = captured;

        self.set_status(name, StepStatus::Success, None);
        if let Some(report) = self.report.components.last_mut() {
            report.outputs = changed;
        }
        let elapsed = timer.elapsed().as_secs_f64();
        metrics::record_component_run(verb.as_str(), StepStatus::Success.as_str(), elapsed);
        self.checkpoint()?;
        info!(component = %name, "{} succeeded", script);
        Ok(())
    }

    /// Record a failed component and hand the error back.
    ///
    /// Parameter failures under `force` are recorded as skipped.
    fn fail(
        &mut self,
        name: &str,
        verb: &Verb,
        timer: Instant,
        err: HubError,
        parameter_error: bool,
    ) -> Result<()> {
        let status = if parameter_error && self.request.force {
            StepStatus::Skipped
        } else {
            StepStatus::Failed
        };
        warn!(component = %name, "{}: {}", status, err);
        self.set_status(name, status, Some(err.to_string()));
        let elapsed = timer.elapsed().as_secs_f64();
        metrics::record_component_run(verb.as_str(), status.as_str(), elapsed);
        self.checkpoint()?;
        Err(err)
    }

    /// Render stack outputs from stack parameters and captured outputs.
    fn render_stack_outputs(&mut self) {
        let mut bindings = self.outputs.clone();
        bindings.extend(self.manifest.stack_bindings());
        let empty = BTreeMap::new();
        let mut rendered = Vec::new();
        for decl in &self.manifest.outputs {
            let value = match &decl.value {
                Some(_) => self.exec.output_value(decl, &bindings, &empty, "stack"),
                None => bindings.get(decl.raw_key()).cloned(),
            };
            match value {
                Some(value) => rendered.push(CapturedOutput {
                    name: decl.name.clone(),
                    component: None,
                    kind: decl.kind.clone().unwrap_or_default(),
                    value,
                    brief: decl.brief.clone(),
                }),
                None if decl.value.is_none() => {
                    self.exec.warnings.push(format!("stack: output '{}' has no value", decl.name))
                }
                None => {}
            }
        }
        self.state.stack_outputs = rendered;
    }
}
