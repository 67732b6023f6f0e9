//! Action interfaces and the registry that resolves them.
//!
//! An action is a unit of work with a declared `ActionSpec` and an async
//! `perform`. Leaves are either plain functions (`FunctionAction`) or
//! types implementing `Action` directly, which may hold state or resources
//! across invocations.

pub mod builtin;
pub mod context;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::ActionSpec;

pub use context::{ExecutionContext, RunState};
pub use registry::{
    global_registry, loader, register_action, ActionDeclaration, ActionFactory, ActionRegistry,
    InstanceMode, RegistryEntry,
};

/// Trait for executable actions
#[async_trait]
pub trait Action: Send + Sync {
    /// Declared name and arguments
    fn spec(&self) -> &ActionSpec;

    /// Registered name
    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Execute with validated arguments against the run's context
    async fn perform(&self, args: ActionArgs, ctx: &mut ExecutionContext) -> Result<Value>;

    /// Release held resources. Called once when the owning scope ends.
    fn release(&self) {}
}

/// Arguments bound for one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionArgs {
    /// Arguments bound by name
    pub named: Map<String, Value>,

    /// Trailing positional values not matched to a declared argument
    pub positional: Vec<Value>,
}

impl ActionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_named(named: Map<String, Value>) -> Self {
        Self {
            named,
            positional: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.named.insert(name.into(), value);
        self
    }

    /// Named value, treating `null` as absent
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name).filter(|v| !v.is_null())
    }

    pub fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .with_context(|| format!("argument '{}' is required", name))
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        self.require(name)?
            .as_str()
            .with_context(|| format!("argument '{}' must be a string", name))
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        self.require(name)?
            .as_i64()
            .with_context(|| format!("argument '{}' must be an integer", name))
    }

    pub fn opt_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_u64)
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        self.require(name)?
            .as_f64()
            .with_context(|| format!("argument '{}' must be a number", name))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        self.require(name)?
            .as_bool()
            .with_context(|| format!("argument '{}' must be a boolean", name))
    }

    /// Argument snapshot for events and error reports
    pub fn snapshot(&self) -> Value {
        if self.positional.is_empty() {
            Value::Object(self.named.clone())
        } else {
            serde_json::json!({
                "named": self.named,
                "positional": self.positional,
            })
        }
    }
}

/// Signature of a function-backed action
pub type ActionFn = dyn Fn(ActionArgs, &mut ExecutionContext) -> Result<Value> + Send + Sync;

/// Action backed by a plain function.
///
/// Stateless; the registry shares one instance for the process.
#[derive(Clone)]
pub struct FunctionAction {
    spec: ActionSpec,
    func: Arc<ActionFn>,
}

impl FunctionAction {
    pub fn new<F>(spec: ActionSpec, func: F) -> Self
    where
        F: Fn(ActionArgs, &mut ExecutionContext) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            spec,
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FunctionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionAction")
            .field("name", &self.spec.name)
            .finish()
    }
}

#[async_trait]
impl Action for FunctionAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn perform(&self, args: ActionArgs, ctx: &mut ExecutionContext) -> Result<Value> {
        (self.func)(args, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_accessors() {
        let args = ActionArgs::new()
            .with("file", json!("a.txt"))
            .with("count", json!(3))
            .with("mode", Value::Null);

        assert_eq!(args.str("file").unwrap(), "a.txt");
        assert_eq!(args.i64("count").unwrap(), 3);
        assert_eq!(args.f64("count").unwrap(), 3.0);
        assert!(args.get("mode").is_none());
        assert!(args.str("count").is_err());
        assert!(args.require("missing").is_err());
    }

    #[test]
    fn test_snapshot_includes_positional() {
        let mut args = ActionArgs::new().with("a", json!(1));
        assert_eq!(args.snapshot(), json!({"a": 1}));

        args.positional.push(json!("extra"));
        assert_eq!(
            args.snapshot(),
            json!({"named": {"a": 1}, "positional": ["extra"]})
        );
    }

    #[tokio::test]
    async fn test_function_action_performs() {
        let spec = ActionSpec::new("double", "Double a number");
        let action = FunctionAction::new(spec, |args, _ctx| Ok(json!(args.i64("n")? * 2)));

        let mut ctx = ExecutionContext::new();
        let result = action
            .perform(ActionArgs::new().with("n", json!(21)), &mut ctx)
            .await
            .unwrap();

        assert_eq!(result, json!(42));
        assert_eq!(action.name(), "double");
    }
}
