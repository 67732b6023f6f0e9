//! The action that runs a nested playbook.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::actions::{
    Action, ActionArgs, ActionDeclaration, ExecutionContext, InstanceMode, RegistryEntry,
};
use crate::domain::{ActionArg, ActionSpec, ArgType, NodePath};

use super::executor::PlaybookExecutor;
use super::playbook::Playbook;

/// Action name reported for nested playbook nodes
pub const PLAYBOOK_ACTION: &str = "playbook";

/// Runs a nested playbook with the executor that reached it.
///
/// Arguments are bound as variables of the playbook's scope: the caller's
/// context for shared scope, a child context for isolated scope.
pub struct PlaybookRunAction {
    spec: ActionSpec,
    executor: Option<PlaybookExecutor>,
    playbook: Arc<Playbook>,
    path: NodePath,
}

impl PlaybookRunAction {
    pub fn new(executor: PlaybookExecutor, playbook: Arc<Playbook>, path: NodePath) -> Self {
        Self {
            spec: playbook_spec(PLAYBOOK_ACTION, &playbook),
            executor: Some(executor),
            playbook,
            path,
        }
    }

    /// Registry entry exposing `playbook` under `name`.
    ///
    /// Invoked from a playbook, it runs with the calling executor's mode,
    /// limits and observers, and its nodes sit under the calling node.
    /// Performed outside an executor, it falls back to the process-wide
    /// executor with paths rooted at `name`. Invoking itself fails with a
    /// cycle error instead of recursing.
    pub fn entry(name: &str, playbook: Playbook) -> RegistryEntry {
        let playbook = Arc::new(playbook);
        let path = NodePath::root(name);

        ActionDeclaration::from_spec(playbook_spec(name, &playbook)).class(
            InstanceMode::Shared,
            move |spec: &ActionSpec| PlaybookRunAction {
                spec: spec.clone(),
                executor: None,
                playbook: Arc::clone(&playbook),
                path: path.clone(),
            },
        )
    }

    pub fn playbook(&self) -> &Arc<Playbook> {
        &self.playbook
    }
}

/// Every playbook `args` entry becomes an optional argument; its document
/// value is the default
fn playbook_spec(name: &str, playbook: &Playbook) -> ActionSpec {
    let description = playbook
        .description
        .clone()
        .unwrap_or_else(|| format!("Run playbook '{}'", playbook.label()));

    playbook
        .args
        .iter()
        .fold(ActionSpec::new(name, description), |spec, (arg, _)| {
            spec.with_argument(ActionArg::new(arg.clone(), ArgType::Any, false))
        })
}

#[async_trait]
impl Action for PlaybookRunAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn perform(&self, args: ActionArgs, ctx: &mut ExecutionContext) -> Result<Value> {
        // Registered playbooks follow the executor and node that invoked them
        let (executor, path) = match (&self.executor, ctx.driver()) {
            (Some(executor), _) => (executor.clone(), self.path.clone()),
            (None, Some((executor, node))) => (executor.clone(), node.clone()),
            (None, None) => (PlaybookExecutor::global(), self.path.clone()),
        };

        Ok(executor
            .run_nested(&self.playbook, &path, args.named, ctx)
            .await?)
    }
}

impl std::fmt::Debug for PlaybookRunAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybookRunAction")
            .field("playbook", &self.playbook.label())
            .field("path", &self.path.to_string())
            .finish()
    }
}
