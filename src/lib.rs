//! autoplay - Declarative automation engine
//!
//! Users describe a tree of named actions with typed arguments; the engine
//! resolves each action against a registry, validates and binds arguments,
//! performs it, and threads results between steps. Any argument value may
//! itself be an invocation or a nested playbook.
//!
//! # Modules
//!
//! - `actions`: Action trait, execution context, registry and built-ins
//! - `core`: Playbooks, the executor, journal and safety limits
//! - `domain`: Data structures (ActionSpec, StepEvent, RunReport)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a playbook
//! autoplay run build.yaml --var target=release
//!
//! # Inspect a journaled run
//! autoplay report <run-id>
//! ```

pub mod actions;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use actions::{
    global_registry, loader, register_action, Action, ActionArgs, ActionDeclaration,
    ActionRegistry, ExecutionContext, FunctionAction, InstanceMode,
};
pub use core::{
    ExecutionMode, ExecutorOptions, Playbook, PlaybookExecutor, PlaybookRunAction, RunOutcome,
};
pub use domain::{ActionArg, ActionSpec, ArgType, ExtraArgs, NodePath};
pub use error::{ActionError, PlaybookError};
