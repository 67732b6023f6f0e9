//! Action registry and loader.
//!
//! The registry maps action names to factories. Entries are declared once
//! during startup (built-ins plus user extensions); executors receive a
//! read-only snapshot and never write to it. Registering a name that
//! already exists replaces the previous entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::{ActionSpec, SpecError};
use crate::error::ActionError;

use super::{Action, ActionArgs, ExecutionContext, FunctionAction};

/// Builds an action instance from its declared spec
pub type ActionFactory = Arc<dyn Fn(&ActionSpec) -> Arc<dyn Action> + Send + Sync>;

/// How many instances of an action exist and who owns them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceMode {
    /// One instance for the whole process, owned by the registry entry
    Shared,

    /// One instance per execution scope, released when the scope ends
    PerRun,

    /// A new instance for every invocation, released right after it
    PerInvocation,
}

/// A registered action: spec, ownership mode and factory
#[derive(Clone)]
pub struct RegistryEntry {
    spec: ActionSpec,
    mode: InstanceMode,
    factory: ActionFactory,
    shared: Arc<OnceLock<Arc<dyn Action>>>,
}

impl RegistryEntry {
    pub fn new(spec: ActionSpec, mode: InstanceMode, factory: ActionFactory) -> Self {
        Self {
            spec,
            mode,
            factory,
            shared: Arc::new(OnceLock::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    pub fn mode(&self) -> InstanceMode {
        self.mode
    }

    /// Build (or, for shared entries, reuse) an instance
    pub fn instantiate(&self) -> Arc<dyn Action> {
        match self.mode {
            InstanceMode::Shared => self
                .shared
                .get_or_init(|| (self.factory)(&self.spec))
                .clone(),
            InstanceMode::PerRun | InstanceMode::PerInvocation => (self.factory)(&self.spec),
        }
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.spec.name)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Registration helper: a parsed spec waiting for its implementation
#[derive(Debug, Clone)]
pub struct ActionDeclaration {
    spec: ActionSpec,
}

impl ActionDeclaration {
    /// Declare an action from a `{description, arguments}` document
    pub fn new(name: &str, doc: &Value) -> Result<Self, SpecError> {
        Ok(Self {
            spec: ActionSpec::declare(name, doc)?,
        })
    }

    pub fn from_spec(spec: ActionSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    /// Back the action with a function. Functions are stateless, so a
    /// single shared instance serves every run.
    pub fn function<F>(self, func: F) -> RegistryEntry
    where
        F: Fn(ActionArgs, &mut ExecutionContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let action: Arc<dyn Action> = Arc::new(FunctionAction::new(self.spec.clone(), func));
        RegistryEntry::new(
            self.spec,
            InstanceMode::Shared,
            Arc::new(move |_: &ActionSpec| Arc::clone(&action)),
        )
    }

    /// Back the action with a type implementing `Action`, owned per `mode`
    pub fn class<A, F>(self, mode: InstanceMode, factory: F) -> RegistryEntry
    where
        A: Action + 'static,
        F: Fn(&ActionSpec) -> A + Send + Sync + 'static,
    {
        RegistryEntry::new(
            self.spec,
            mode,
            Arc::new(move |spec: &ActionSpec| Arc::new(factory(spec)) as Arc<dyn Action>),
        )
    }
}

/// Name -> factory mapping
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in actions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_builtins(&mut registry);
        registry
    }

    /// Insert an entry. Last registration wins; the replaced entry is returned.
    pub fn register(&mut self, entry: RegistryEntry) -> Option<RegistryEntry> {
        let name = entry.name().to_string();
        let previous = self.entries.insert(name.clone(), entry);
        if previous.is_some() {
            debug!(action = %name, "Replaced existing action registration");
        } else {
            debug!(action = %name, "Registered action");
        }
        previous
    }

    pub fn entry(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Instantiate (or return the shared instance of) an action
    pub fn load(&self, name: &str) -> Result<Arc<dyn Action>, ActionError> {
        self.entry(name)
            .map(RegistryEntry::instantiate)
            .ok_or_else(|| ActionError::NotFound(name.to_string()))
    }

    /// Resolve an action for use inside `ctx`.
    ///
    /// Per-run instances are created on first use and kept in the context
    /// until it is dropped.
    pub fn resolve(
        &self,
        name: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<(Arc<dyn Action>, InstanceMode), ActionError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ActionError::NotFound(name.to_string()))?;

        let action = match entry.mode() {
            InstanceMode::PerRun => match ctx.instance(name) {
                Some(existing) => existing,
                None => {
                    let created = entry.instantiate();
                    ctx.adopt_instance(name, Arc::clone(&created));
                    created
                }
            },
            InstanceMode::Shared | InstanceMode::PerInvocation => entry.instantiate(),
        };

        Ok((action, entry.mode()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Declared specs, sorted by name
    pub fn specs(&self) -> Vec<&ActionSpec> {
        let mut specs: Vec<&ActionSpec> = self.entries.values().map(RegistryEntry::spec).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-wide registry, seeded with the built-ins on first use
static REGISTRY: OnceLock<RwLock<ActionRegistry>> = OnceLock::new();

fn global() -> &'static RwLock<ActionRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(ActionRegistry::with_builtins()))
}

/// Register an action in the process-wide registry
pub fn register_action(entry: RegistryEntry) -> Option<RegistryEntry> {
    global()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(entry)
}

/// Load an action from the process-wide registry
pub fn loader(name: &str) -> Result<Arc<dyn Action>, ActionError> {
    global()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .load(name)
}

/// Read-only snapshot of the process-wide registry, for executors
pub fn global_registry() -> Arc<ActionRegistry> {
    Arc::new(
        global()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        spec: ActionSpec,
        count: AtomicUsize,
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Action for Counter {
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

    fn counter_entry(mode: InstanceMode, released: Arc<AtomicUsize>) -> RegistryEntry {
        ActionDeclaration::new("counter", &json!({"description": "Counts calls"}))
            .unwrap()
            .class(mode, move |spec| Counter {
                spec: spec.clone(),
                count: AtomicUsize::new(0),
                released: Arc::clone(&released),
            })
    }

    #[test]
    fn test_register_and_load() {
        let mut registry = ActionRegistry::new();
        let entry = ActionDeclaration::new("x", &json!({"description": "x"}))
            .unwrap()
            .function(|_, _| Ok(Value::Null));
        assert!(registry.register(entry).is_none());

        let action = registry.load("x").unwrap();
        assert_eq!(action.spec().name, "x");
        assert!(matches!(registry.load("y"), Err(ActionError::NotFound(name)) if name == "y"));
    }

    #[tokio::test]
    async fn test_reregistration_overwrites() {
        let mut registry = ActionRegistry::new();
        registry.register(
            ActionDeclaration::new("greet", &json!({"description": "old"}))
                .unwrap()
                .function(|_, _| Ok(json!("old"))),
        );
        let previous = registry.register(
            ActionDeclaration::new("greet", &json!({"description": "new"}))
                .unwrap()
                .function(|_, _| Ok(json!("new"))),
        );
        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);

        let action = registry.load("greet").unwrap();
        let mut ctx = ExecutionContext::new();
        let result = action.perform(ActionArgs::new(), &mut ctx).await.unwrap();
        assert_eq!(result, json!("new"));
        assert_eq!(action.spec().description, "new");
    }

    #[test]
    fn test_shared_mode_reuses_instance() {
        let mut registry = ActionRegistry::new();
        registry.register(counter_entry(InstanceMode::Shared, Arc::default()));

        let a = registry.load("counter").unwrap();
        let b = registry.load("counter").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_per_invocation_mode_builds_fresh() {
        let mut registry = ActionRegistry::new();
        registry.register(counter_entry(InstanceMode::PerInvocation, Arc::default()));

        let a = registry.load("counter").unwrap();
        let b = registry.load("counter").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_per_run_mode_is_scoped_to_context() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut registry = ActionRegistry::new();
        registry.register(counter_entry(InstanceMode::PerRun, Arc::clone(&released)));

        let mut ctx = ExecutionContext::new();
        let (first, mode) = registry.resolve("counter", &mut ctx).unwrap();
        assert_eq!(mode, InstanceMode::PerRun);
        first.perform(ActionArgs::new(), &mut ctx).await.unwrap();

        let (second, _) = registry.resolve("counter", &mut ctx).unwrap();
        let count = second.perform(ActionArgs::new(), &mut ctx).await.unwrap();
        assert_eq!(count, json!(2));

        let mut other = ExecutionContext::new();
        let (third, _) = registry.resolve("counter", &mut other).unwrap();
        assert!(!Arc::ptr_eq(&second, &third));

        drop(first);
        drop(second);
        drop(ctx);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_names_sorted() {
        let registry = ActionRegistry::with_builtins();
        let names = registry.names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert!(registry.contains("log"));
    }

    #[test]
    fn test_global_registry() {
        register_action(
            ActionDeclaration::new("registry.test.global", &json!({"description": "g"}))
                .unwrap()
                .function(|_, _| Ok(Value::Null)),
        );

        let action = loader("registry.test.global").unwrap();
        assert_eq!(action.name(), "registry.test.global");
        assert!(global_registry().contains("registry.test.global"));
        assert!(matches!(
            loader("registry.test.missing"),
            Err(ActionError::NotFound(_))
        ));
    }
}
