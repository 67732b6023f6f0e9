//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use autoplay::actions::{
    Action, ActionArgs, ActionDeclaration, ActionRegistry, ExecutionContext, InstanceMode,
};
use autoplay::domain::ActionSpec;

/// Invocations seen by the fixture actions, in order
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<(String, Value)>>>);

impl Calls {
    pub fn record(&self, action: &str, args: &ActionArgs) {
        self.0
            .lock()
            .unwrap()
            .push((action.to_string(), args.snapshot()));
    }

    pub fn names(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn args_of(&self, action: &str) -> Vec<Value> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == action)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

/// Registry with the built-ins plus `const`, `sum`, `echo`, `fail` and `sleep`
pub fn test_registry(calls: &Calls) -> ActionRegistry {
    let mut registry = ActionRegistry::with_builtins();

    let c = calls.clone();
    registry.register(
        ActionDeclaration::new(
            "const",
            &json!({
                "description": "Return v",
                "arguments": [{"name": "v", "type": "any", "required": true}]
            }),
        )
        .unwrap()
        .function(move |args, _ctx| {
            c.record("const", &args);
            Ok(args.require("v")?.clone())
        }),
    );

    let c = calls.clone();
    registry.register(
        ActionDeclaration::new(
            "sum",
            &json!({
                "description": "Add a and b",
                "arguments": [
                    {"name": "a", "type": "float", "required": true},
                    {"name": "b", "type": "float", "required": true}
                ]
            }),
        )
        .unwrap()
        .function(move |args, _ctx| {
            c.record("sum", &args);
            match (args.i64("a"), args.i64("b")) {
                (Ok(a), Ok(b)) => Ok(json!(a + b)),
                _ => Ok(json!(args.f64("a")? + args.f64("b")?)),
            }
        }),
    );

    let c = calls.clone();
    registry.register(
        ActionDeclaration::new(
            "echo",
            &json!({
                "description": "Return all arguments",
                "arguments": [
                    {"name": "value", "type": "any"},
                    {"name": "items", "type": "list"},
                    {"name": "options", "type": "dict"}
                ]
            }),
        )
        .unwrap()
        .function(move |args, _ctx| {
            c.record("echo", &args);
            Ok(args.snapshot())
        }),
    );

    let c = calls.clone();
    registry.register(
        ActionDeclaration::new(
            "fail",
            &json!({
                "description": "Always fails",
                "arguments": [{"name": "message", "type": "string"}]
            }),
        )
        .unwrap()
        .function(move |args, _ctx| {
            c.record("fail", &args);
            anyhow::bail!("{}", args.opt_str("message").unwrap_or("failed on purpose"))
        }),
    );

    registry.register(
        ActionDeclaration::new(
            "sleep",
            &json!({
                "description": "Sleep for ms milliseconds",
                "arguments": [{"name": "ms", "type": "int", "required": true}]
            }),
        )
        .unwrap()
        .class(InstanceMode::Shared, |spec| Sleeper::new(spec.clone(), Arc::default())),
    );

    registry
}

/// Async action that sleeps, counting releases
pub struct Sleeper {
    spec: ActionSpec,
    pub released: Arc<AtomicUsize>,
}

impl Sleeper {
    pub fn new(spec: ActionSpec, released: Arc<AtomicUsize>) -> Self {
        Self { spec, released }
    }
}

#[async_trait]
impl Action for Sleeper {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn perform(&self, args: ActionArgs, _ctx: &mut ExecutionContext) -> anyhow::Result<Value> {
        let ms = args.i64("ms")? as u64;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(ms))
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stateful action counting its own calls and releases
pub struct Tally {
    spec: ActionSpec,
    count: AtomicUsize,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl Action for Tally {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn perform(&self, _args: ActionArgs, _ctx: &mut ExecutionContext) -> anyhow::Result<Value> {
        Ok(json!(self.count.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Register `tally` with the given instance mode; returns its release counter
pub fn register_tally(registry: &mut ActionRegistry, mode: InstanceMode) -> Arc<AtomicUsize> {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);

    registry.register(
        ActionDeclaration::new("tally", &json!({"description": "Count calls"}))
            .unwrap()
            .class(mode, move |spec| Tally {
                spec: spec.clone(),
                count: AtomicUsize::new(0),
                released: Arc::clone(&counter),
            }),
    );

    released
}
