//! Playbook executor.
//!
//! Walks a playbook depth-first. For every node it counts the step
//! against the run's limits, resolves the action, resolves argument values
//! (nested invocations and playbooks run first), binds and validates them,
//! then performs the action under a timeout. Results flow to the parent
//! binding, to a named context variable, or to the run output.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::actions::{
    global_registry, Action, ActionArgs, ActionRegistry, ExecutionContext, InstanceMode,
};
use crate::domain::{
    ActionSpec, EventType, ExtraArgs, NodePath, StepEvent, StepFailure, StepStatus,
};
use crate::error::{ActionError, PlaybookError, Result};

use super::journal::StepObserver;
use super::playbook::{ArgValue, Args, Invocation, Playbook, Scope, Step};
use super::playbook_action::{PlaybookRunAction, PLAYBOOK_ACTION};
use super::safety::SafetyLimits;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What happens when a node fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// The first failure aborts the run
    #[default]
    Abort,

    /// Failures are recorded, `null` is substituted and siblings continue.
    /// Safety violations and cycles still abort.
    BestEffort,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    pub mode: ExecutionMode,
    pub limits: SafetyLimits,
}

/// Result of a top-level run started with a fresh context
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub result: Value,

    /// Nodes that failed in best-effort mode
    pub failures: Vec<StepFailure>,

    /// Variables left in the root context
    pub variables: Map<String, Value>,
}

/// Releases a per-invocation instance when dropped
struct ReleaseGuard(Option<Arc<dyn Action>>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(action) = self.0.take() {
            action.release();
        }
    }
}

/// Drives playbook runs against a registry snapshot
#[derive(Clone)]
pub struct PlaybookExecutor {
    registry: Arc<ActionRegistry>,
    options: ExecutorOptions,
    observers: Vec<Arc<dyn StepObserver>>,
}

impl std::fmt::Debug for PlaybookExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybookExecutor")
            .field("actions", &self.registry.len())
            .field("options", &self.options)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl PlaybookExecutor {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            options: ExecutorOptions::default(),
            observers: Vec::new(),
        }
    }

    /// Executor over the process-wide registry
    pub fn global() -> Self {
        Self::new(global_registry())
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Run a playbook in a fresh context
    pub async fn execute(&self, playbook: &Playbook) -> Result<RunOutcome> {
        self.execute_with(playbook, Map::new()).await
    }

    /// Run a playbook in a fresh context seeded with `variables`
    pub async fn execute_with(
        &self,
        playbook: &Playbook,
        variables: Map<String, Value>,
    ) -> Result<RunOutcome> {
        let mut ctx = ExecutionContext::with_variables(variables);
        let result = self.run(playbook, &mut ctx).await?;

        Ok(RunOutcome {
            run_id: ctx.run_id(),
            result,
            failures: ctx.failures(),
            variables: ctx.into_variables(),
        })
    }

    /// Run a playbook against an existing context
    #[instrument(skip(self, playbook, ctx), fields(playbook = %playbook.label(), run_id = %ctx.run_id()))]
    pub async fn run(&self, playbook: &Playbook, ctx: &mut ExecutionContext) -> Result<Value> {
        let root = NodePath::root(playbook.label());
        let started = Instant::now();
        info!(mode = ?self.options.mode, "Starting playbook run");

        self.emit(StepEvent::new(
            ctx.run_id(),
            root.clone(),
            "",
            EventType::RunStarted,
            StepStatus::Running,
        ))
        .await;

        let outcome = self.run_root(playbook, &root, ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) => {
                info!(
                    duration_ms,
                    steps = ctx.run_state().steps_executed(),
                    failures = ctx.failures().len(),
                    "Playbook run completed"
                );
                self.emit(
                    StepEvent::new(
                        ctx.run_id(),
                        root,
                        "",
                        EventType::RunCompleted,
                        StepStatus::Completed,
                    )
                    .with_result(result.clone())
                    .with_duration(duration_ms),
                )
                .await;
            }
            Err(e) => {
                error!(error = %e, "Playbook run failed");
                self.emit(
                    StepEvent::new(
                        ctx.run_id(),
                        root,
                        "",
                        EventType::RunFailed,
                        StepStatus::Failed,
                    )
                    .with_error(e.to_string())
                    .with_duration(duration_ms),
                )
                .await;
            }
        }

        outcome
    }

    /// Report every referenced action that is not registered
    pub fn check(&self, playbook: &Playbook) -> Vec<PlaybookError> {
        let mut errors = Vec::new();
        self.check_playbook(playbook, &NodePath::root(playbook.label()), &mut errors);
        errors
    }

    fn check_playbook(&self, playbook: &Playbook, path: &NodePath, errors: &mut Vec<PlaybookError>) {
        for (name, value) in &playbook.args {
            self.check_value(value, &path.arg(name), errors);
        }
        for (i, step) in playbook.steps.iter().enumerate() {
            match step {
                Step::Invoke(invocation) => self.check_invocation(invocation, &path.step(i), errors),
                Step::Playbook(nested) => self.check_playbook(nested, &path.step(i), errors),
            }
        }
    }

    fn check_invocation(
        &self,
        invocation: &Invocation,
        path: &NodePath,
        errors: &mut Vec<PlaybookError>,
    ) {
        if !self.registry.contains(&invocation.action) {
            errors.push(PlaybookError::step(
                path.clone(),
                invocation.action.clone(),
                Value::Null,
                ActionError::NotFound(invocation.action.clone()),
            ));
        }
        match &invocation.args {
            Args::Named(named) => {
                for (name, value) in named {
                    self.check_value(value, &path.arg(name), errors);
                }
            }
            Args::Positional(values) => {
                for (i, value) in values.iter().enumerate() {
                    self.check_value(value, &positional_path(path, i), errors);
                }
            }
        }
    }

    fn check_value(&self, value: &ArgValue, path: &NodePath, errors: &mut Vec<PlaybookError>) {
        match value {
            ArgValue::Literal(_) | ArgValue::Variable(_) => {}
            ArgValue::Invoke(invocation) => self.check_invocation(invocation, path, errors),
            ArgValue::Playbook(playbook) => self.check_playbook(playbook, path, errors),
            ArgValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.check_value(item, &path.child(format!("[{}]", i)), errors);
                }
            }
            ArgValue::Map(entries) => {
                for (key, item) in entries {
                    self.check_value(item, &path.child(key.clone()), errors);
                }
            }
        }
    }

    /// Top level: the root playbook is not a node of its own
    async fn run_root(
        &self,
        playbook: &Playbook,
        root: &NodePath,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        let mut args = Map::new();
        for (name, value) in &playbook.args {
            let resolved = self
                .resolve_value(value, root.arg(name), PLAYBOOK_ACTION, ctx)
                .await?;
            args.insert(name.clone(), resolved);
        }

        let limit = Duration::from_secs(
            playbook
                .timeout_seconds
                .unwrap_or(self.options.limits.run_timeout_seconds),
        );

        match timeout(limit, self.enter_playbook(playbook, root, args, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(PlaybookError::step(
                root.clone(),
                PLAYBOOK_ACTION,
                Value::Null,
                ActionError::Timeout(limit),
            )),
        }
    }

    /// Run a nested playbook. Its `args` not supplied by the caller are
    /// resolved from the document in the caller's context.
    pub(crate) async fn run_nested(
        &self,
        playbook: &Playbook,
        path: &NodePath,
        mut args: Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        for (name, value) in &playbook.args {
            if !args.contains_key(name) {
                let resolved = self
                    .resolve_value(value, path.arg(name), PLAYBOOK_ACTION, ctx)
                    .await?;
                args.insert(name.clone(), resolved);
            }
        }
        self.enter_playbook(playbook, path, args, ctx).await
    }

    /// Run the steps of `playbook` with `args` bound as variables.
    ///
    /// Shared scope runs in `ctx`; isolated scope runs in a child context
    /// and copies only the designated output back.
    fn enter_playbook<'a>(
        &'a self,
        playbook: &'a Playbook,
        path: &'a NodePath,
        args: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let identity = playbook as *const Playbook as usize;
            let _frame = ctx
                .run_state()
                .enter(identity, playbook.label(), &self.options.limits)
                .map_err(|e| PlaybookError::step(path.clone(), PLAYBOOK_ACTION, Value::Null, e))?;

            match playbook.scope {
                Scope::Shared => {
                    for (name, value) in args {
                        ctx.set(name, value);
                    }
                    self.run_steps(playbook, path, ctx).await
                }
                Scope::Isolated => {
                    let mut child = ctx.isolated();
                    for (name, value) in args {
                        child.set(name, value);
                    }
                    let result = self.run_steps(playbook, path, &mut child).await?;
                    if let Some(output) = &playbook.output {
                        ctx.set(output.clone(), result.clone());
                    }
                    debug!(playbook = %playbook.label(), "Isolated scope finished");
                    Ok(result)
                }
            }
        })
    }

    async fn run_steps(
        &self,
        playbook: &Playbook,
        path: &NodePath,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        let mut last = Value::Null;

        for (i, step) in playbook.steps.iter().enumerate() {
            let step_path = path.step(i);
            last = match step {
                Step::Invoke(invocation) => self.invoke(invocation, step_path, ctx).await?,
                Step::Playbook(nested) => self.invoke_playbook(nested, step_path, ctx).await?,
            };
        }

        match &playbook.output {
            None => Ok(last),
            Some(name) => ctx.get(name).cloned().ok_or_else(|| {
                PlaybookError::step(
                    path.clone(),
                    PLAYBOOK_ACTION,
                    Value::Null,
                    ActionError::Binding(format!("output variable '{}' was never set", name)),
                )
            }),
        }
    }

    /// Execute one invocation node, applying the failure policy
    fn invoke<'a>(
        &'a self,
        invocation: &'a Invocation,
        path: NodePath,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match self.invoke_node(invocation, &path, ctx).await {
                Ok(value) => Ok(value),
                Err(err) => self.recover(err, invocation.output.as_deref(), ctx),
            }
        })
    }

    /// Execute a nested playbook node, applying the failure policy
    fn invoke_playbook<'a>(
        &'a self,
        playbook: &'a Arc<Playbook>,
        path: NodePath,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match self.playbook_node(playbook, &path, ctx).await {
                Ok(value) => Ok(value),
                Err(err) => self.recover(err, None, ctx),
            }
        })
    }

    /// In best-effort mode, record a non-fatal failure and substitute `null`
    fn recover(
        &self,
        err: PlaybookError,
        output: Option<&str>,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        if self.options.mode != ExecutionMode::BestEffort || err.is_fatal() {
            return Err(err);
        }

        let (path, action) = match &err {
            PlaybookError::Step { path, action, .. } => (path.clone(), action.clone()),
            _ => (NodePath::default(), String::new()),
        };

        warn!(path = %path, action = %action, error = %err, "Step failed, continuing");
        ctx.run_state().record_failure(StepFailure {
            path,
            action,
            error: err.to_string(),
        });

        if let Some(name) = output {
            ctx.set(name, Value::Null);
        }
        Ok(Value::Null)
    }

    async fn invoke_node(
        &self,
        invocation: &Invocation,
        path: &NodePath,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        let action_name = invocation.action.as_str();
        let fail = |source: ActionError| {
            PlaybookError::step(path.clone(), action_name, Value::Null, source)
        };

        if let Err(violation) = ctx.run_state().record_step(&self.options.limits) {
            return Err(self.failed(ctx, path, action_name, fail(violation.into()), None).await);
        }

        let (action, mode) = match self.registry.resolve(action_name, ctx) {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.failed(ctx, path, action_name, fail(e), None).await),
        };
        let spec = action.spec().clone();

        let args = match self.resolve_args(invocation, &spec, path, ctx).await {
            Ok(args) => args,
            Err(e) => return Err(self.failed(ctx, path, action_name, e, None).await),
        };

        let args = match bind(&spec, args) {
            Ok(args) => args,
            Err(e) => return Err(self.failed(ctx, path, action_name, fail(e), None).await),
        };
        if let Err(e) = spec.validate(&args.named) {
            let err = PlaybookError::step(path.clone(), action_name, args.snapshot(), e);
            return Err(self.failed(ctx, path, action_name, err, None).await);
        }

        let limit = self.options.limits.step_timeout(invocation.timeout_seconds);
        self.perform(
            action,
            mode,
            args,
            invocation.output.as_deref(),
            limit,
            path,
            ctx,
        )
        .await
    }

    async fn playbook_node(
        &self,
        playbook: &Arc<Playbook>,
        path: &NodePath,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        let action_name = PLAYBOOK_ACTION;
        let fail = |source: ActionError| {
            PlaybookError::step(path.clone(), action_name, Value::Null, source)
        };

        if let Err(violation) = ctx.run_state().record_step(&self.options.limits) {
            return Err(self.failed(ctx, path, action_name, fail(violation.into()), None).await);
        }

        let mut args = Map::new();
        for (name, value) in &playbook.args {
            match self
                .resolve_value(value, path.arg(name), PLAYBOOK_ACTION, ctx)
                .await
            {
                Ok(resolved) => {
                    args.insert(name.clone(), resolved);
                }
                Err(e) => return Err(self.failed(ctx, path, action_name, e, None).await),
            }
        }

        let action: Arc<dyn Action> = Arc::new(PlaybookRunAction::new(
            self.clone(),
            Arc::clone(playbook),
            path.clone(),
        ));
        let limit = Duration::from_secs(
            playbook
                .timeout_seconds
                .unwrap_or(self.options.limits.run_timeout_seconds),
        );

        self.perform(
            action,
            InstanceMode::Shared,
            ActionArgs::from_named(args),
            None,
            limit,
            path,
            ctx,
        )
        .await
    }

    /// Perform a bound action under `limit` and publish the result
    #[allow(clippy::too_many_arguments)]
    async fn perform(
        &self,
        action: Arc<dyn Action>,
        mode: InstanceMode,
        args: ActionArgs,
        output: Option<&str>,
        limit: Duration,
        path: &NodePath,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        let action_name = action.name().to_string();
        let snapshot = args.snapshot();

        debug!(path = %path, action = %action_name, "Performing step");
        self.emit(
            StepEvent::new(
                ctx.run_id(),
                path.clone(),
                action_name.clone(),
                EventType::StepStarted,
                StepStatus::Running,
            )
            .with_args(snapshot.clone()),
        )
        .await;

        let started = Instant::now();
        let guard = ReleaseGuard((mode == InstanceMode::PerInvocation).then(|| Arc::clone(&action)));
        let outer = ctx.replace_driver(Some((self.clone(), path.clone())));
        let outcome = timeout(limit, action.perform(args, ctx)).await;
        ctx.replace_driver(outer);
        drop(guard);
        let duration_ms = started.elapsed().as_millis() as u64;

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                // Failures of nested runs already carry their own node path
                let err = match e.downcast::<PlaybookError>() {
                    Ok(nested) => nested,
                    Err(e) => PlaybookError::step(
                        path.clone(),
                        action_name.clone(),
                        snapshot,
                        ActionError::Execution(e),
                    ),
                };
                return Err(self
                    .failed(ctx, path, &action_name, err, Some(duration_ms))
                    .await);
            }
            Err(_) => {
                let err = PlaybookError::step(
                    path.clone(),
                    action_name.clone(),
                    snapshot,
                    ActionError::Timeout(limit),
                );
                return Err(self
                    .failed(ctx, path, &action_name, err, Some(duration_ms))
                    .await);
            }
        };

        if let Some(name) = output {
            ctx.set(name, value.clone());
        }

        debug!(path = %path, duration_ms, "Step completed");
        self.emit(
            StepEvent::new(
                ctx.run_id(),
                path.clone(),
                action_name,
                EventType::StepCompleted,
                StepStatus::Completed,
            )
            .with_result(value.clone())
            .with_duration(duration_ms),
        )
        .await;

        Ok(value)
    }

    /// Resolve argument values: declared names first (declaration order),
    /// then names only present in the document (document order)
    async fn resolve_args(
        &self,
        invocation: &Invocation,
        spec: &ActionSpec,
        path: &NodePath,
        ctx: &mut ExecutionContext,
    ) -> Result<Args<Value>> {
        let action = invocation.action.as_str();
        match &invocation.args {
            Args::Named(named) => {
                let mut order: Vec<&(String, ArgValue)> = Vec::with_capacity(named.len());
                for declared in &spec.arguments {
                    order.extend(named.iter().filter(|(name, _)| *name == declared.name));
                }
                order.extend(
                    named
                        .iter()
                        .filter(|(name, _)| spec.argument(name).is_none()),
                );

                let mut resolved = Vec::with_capacity(order.len());
                for (name, value) in order {
                    let value = self.resolve_value(value, path.arg(name), action, ctx).await?;
                    resolved.push((name.clone(), value));
                }
                Ok(Args::Named(resolved))
            }
            Args::Positional(values) => {
                let mut resolved = Vec::with_capacity(values.len());
                for (i, value) in values.iter().enumerate() {
                    resolved.push(
                        self.resolve_value(value, positional_path(path, i), action, ctx)
                            .await?,
                    );
                }
                Ok(Args::Positional(resolved))
            }
        }
    }

    fn resolve_value<'a>(
        &'a self,
        value: &'a ArgValue,
        path: NodePath,
        action: &'a str,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match value {
                ArgValue::Literal(literal) => Ok(literal.clone()),
                ArgValue::Variable(name) => ctx.get(name).cloned().ok_or_else(|| {
                    PlaybookError::step(
                        path,
                        action,
                        Value::Null,
                        ActionError::Binding(format!("variable '{}' is not defined", name)),
                    )
                }),
                ArgValue::Invoke(invocation) => self.invoke(invocation, path, ctx).await,
                ArgValue::Playbook(playbook) => self.invoke_playbook(playbook, path, ctx).await,
                ArgValue::List(items) => {
                    let mut resolved = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        let item_path = path.child(format!("[{}]", i));
                        resolved.push(self.resolve_value(item, item_path, action, ctx).await?);
                    }
                    Ok(Value::Array(resolved))
                }
                ArgValue::Map(entries) => {
                    let mut resolved = Map::new();
                    for (key, item) in entries {
                        let item_path = path.child(key.clone());
                        resolved.insert(
                            key.clone(),
                            self.resolve_value(item, item_path, action, ctx).await?,
                        );
                    }
                    Ok(Value::Object(resolved))
                }
            }
        })
    }

    /// Emit `StepFailed` for the node at `path`
    async fn failed(
        &self,
        ctx: &ExecutionContext,
        path: &NodePath,
        action: &str,
        err: PlaybookError,
        duration_ms: Option<u64>,
    ) -> PlaybookError {
        error!(path = %path, action = %action, error = %err, "Step failed");

        let mut event = StepEvent::new(
            ctx.run_id(),
            path.clone(),
            action,
            EventType::StepFailed,
            StepStatus::Failed,
        )
        .with_error(err.to_string());
        if let PlaybookError::Step {
            path: origin, args, ..
        } = &err
        {
            if origin == path && !args.is_null() {
                event = event.with_args(args.clone());
            }
            event = event.with_origin(origin.clone());
        }
        if let Some(ms) = duration_ms {
            event = event.with_duration(ms);
        }
        self.emit(event).await;

        err
    }

    async fn emit(&self, event: StepEvent) {
        for observer in &self.observers {
            if let Err(e) = observer.on_event(&event).await {
                warn!(error = %e, event = ?event.event_type, "Observer failed to handle event");
            }
        }
    }
}

fn positional_path(path: &NodePath, index: usize) -> NodePath {
    path.child(format!("args[{}]", index))
}

/// Bind resolved values to the spec's declared arguments.
///
/// Positional values fill declared arguments in order. Surplus positional
/// values and unknown names follow the spec's extra-argument policy.
fn bind(spec: &ActionSpec, resolved: Args<Value>) -> std::result::Result<ActionArgs, ActionError> {
    let mut args = ActionArgs::new();

    match resolved {
        Args::Positional(values) => {
            let mut declared = spec.arguments.iter();
            for value in values {
                match (declared.next(), spec.extra_arguments) {
                    (Some(arg), _) => {
                        args.named.insert(arg.name.clone(), value);
                    }
                    (None, ExtraArgs::Ignore) => args.positional.push(value),
                    (None, ExtraArgs::Reject) => {
                        return Err(ActionError::Binding(format!(
                            "'{}' takes at most {} positional argument(s)",
                            spec.name,
                            spec.arguments.len()
                        )))
                    }
                }
            }
        }
        Args::Named(named) => {
            for (name, value) in named {
                if spec.argument(&name).is_some() {
                    args.named.insert(name, value);
                    continue;
                }
                match spec.extra_arguments {
                    ExtraArgs::Ignore => {
                        debug!(action = %spec.name, argument = %name, "Dropping undeclared argument");
                    }
                    ExtraArgs::Reject => {
                        return Err(ActionError::Binding(format!(
                            "'{}' got an unexpected argument '{}'",
                            spec.name, name
                        )))
                    }
                }
            }
        }
    }

    Ok(args)
}
