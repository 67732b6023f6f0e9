//! Run-scoped execution context.
//!
//! One `ExecutionContext` is created per top-level run and passed by
//! `&mut` through every step. It carries named intermediate values,
//! typed resources (e.g. an open connection produced by one step and used
//! by a later one) and per-run action instances. An isolated sub-playbook
//! gets its own context that shares only the run-wide `RunState`.
//!
//! Dropping a context releases every per-run action instance it owns, so
//! cleanup happens on success, failure and early return alike.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::core::executor::PlaybookExecutor;
use crate::core::safety::{SafetyLimits, SafetyTracker, SafetyViolation};
use crate::domain::{NodePath, StepFailure};
use crate::error::ActionError;

use super::Action;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by every scope of one top-level run
#[derive(Debug)]
pub struct RunState {
    id: Uuid,
    tracker: Mutex<SafetyTracker>,
    active: Mutex<Vec<usize>>,
    failures: Mutex<Vec<StepFailure>>,
}

impl RunState {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            tracker: Mutex::new(SafetyTracker::new()),
            active: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Count one invocation, failing if the run is over its limits
    pub fn record_step(&self, limits: &SafetyLimits) -> Result<(), SafetyViolation> {
        let mut tracker = lock(&self.tracker);
        limits.check(&tracker)?;
        tracker.record_step();
        Ok(())
    }

    pub fn steps_executed(&self) -> u32 {
        lock(&self.tracker).steps_executed
    }

    /// Mark a playbook as running. The returned frame unmarks it on drop.
    pub fn enter(
        self: &Arc<Self>,
        identity: usize,
        label: &str,
        limits: &SafetyLimits,
    ) -> Result<ActiveFrame, ActionError> {
        let mut active = lock(&self.active);
        if active.contains(&identity) {
            return Err(ActionError::Cycle(label.to_string()));
        }
        limits.check_depth(active.len() + 1)?;
        active.push(identity);

        Ok(ActiveFrame {
            run: Arc::clone(self),
            identity,
        })
    }

    pub fn record_failure(&self, failure: StepFailure) {
        lock(&self.failures).push(failure);
    }

    pub fn failures(&self) -> Vec<StepFailure> {
        lock(&self.failures).clone()
    }
}

/// Marks a playbook as active for cycle and depth checks
#[derive(Debug)]
pub struct ActiveFrame {
    run: Arc<RunState>,
    identity: usize,
}

impl Drop for ActiveFrame {
    fn drop(&mut self) {
        let mut active = lock(&self.run.active);
        if let Some(pos) = active.iter().rposition(|id| *id == self.identity) {
            active.remove(pos);
        }
    }
}

/// Mutable state shared by the steps of one run (or one isolated scope)
pub struct ExecutionContext {
    variables: Map<String, Value>,
    resources: HashMap<String, Box<dyn Any + Send + Sync>>,
    instances: Vec<(String, Arc<dyn Action>)>,
    run: Arc<RunState>,

    /// Executor performing the current node, and that node's path
    driver: Option<(PlaybookExecutor, NodePath)>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Create a context for a new top-level run
    pub fn new() -> Self {
        Self {
            variables: Map::new(),
            resources: HashMap::new(),
            instances: Vec::new(),
            run: Arc::new(RunState::new()),
            driver: None,
        }
    }

    /// Create a context pre-populated with variables
    pub fn with_variables(variables: Map<String, Value>) -> Self {
        let mut ctx = Self::new();
        ctx.variables = variables;
        ctx
    }

    /// Fresh scope belonging to the same run
    pub fn isolated(&self) -> Self {
        Self {
            variables: Map::new(),
            resources: HashMap::new(),
            instances: Vec::new(),
            run: Arc::clone(&self.run),
            driver: self.driver.clone(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run.id
    }

    pub fn run_state(&self) -> &Arc<RunState> {
        &self.run
    }

    /// Failures recorded so far in best-effort mode
    pub fn failures(&self) -> Vec<StepFailure> {
        self.run.failures()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Set a variable, returning the previous value
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.variables.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(name)
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Store a typed resource under a name, replacing any previous one
    pub fn put_resource<T: Any + Send + Sync>(&mut self, name: impl Into<String>, resource: T) {
        self.resources.insert(name.into(), Box::new(resource));
    }

    pub fn resource<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.resources.get(name).and_then(|r| r.downcast_ref::<T>())
    }

    pub fn resource_mut<T: Any + Send + Sync>(&mut self, name: &str) -> Option<&mut T> {
        self.resources.get_mut(name).and_then(|r| r.downcast_mut::<T>())
    }

    /// Remove a resource; it is put back if the type does not match
    pub fn take_resource<T: Any + Send + Sync>(&mut self, name: &str) -> Option<T> {
        let boxed = self.resources.remove(name)?;
        match boxed.downcast::<T>() {
            Ok(resource) => Some(*resource),
            Err(original) => {
                self.resources.insert(name.to_string(), original);
                None
            }
        }
    }

    /// Per-run instance of an action, if one was created in this scope
    pub fn instance(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.instances
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, action)| Arc::clone(action))
    }

    /// Keep a per-run instance until this scope is dropped
    pub fn adopt_instance(&mut self, name: impl Into<String>, action: Arc<dyn Action>) {
        self.instances.push((name.into(), action));
    }

    /// Executor performing the current node and the node's path, while
    /// an action runs under an executor
    pub fn driver(&self) -> Option<(&PlaybookExecutor, &NodePath)> {
        self.driver.as_ref().map(|(executor, path)| (executor, path))
    }

    pub(crate) fn replace_driver(
        &mut self,
        driver: Option<(PlaybookExecutor, NodePath)>,
    ) -> Option<(PlaybookExecutor, NodePath)> {
        std::mem::replace(&mut self.driver, driver)
    }

    /// Consume the scope, returning its variables. Instances are released.
    pub fn into_variables(mut self) -> Map<String, Value> {
        std::mem::take(&mut self.variables)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run.id)
            .field("node", &self.driver.as_ref().map(|(_, path)| path.to_string()))
            .field("variables", &self.variables)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field(
                "instances",
                &self.instances.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        for (name, action) in self.instances.drain(..).rev() {
            debug!(action = %name, "Releasing per-run action instance");
            action.release();
        }
    }
}
