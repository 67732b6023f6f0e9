//! Core execution logic.
//!
//! This module contains:
//! - Playbook: Playbook documents and loading
//! - Executor: Depth-first playbook execution
//! - PlaybookRunAction: The action that runs nested playbooks
//! - Journal: Step observers and the JSONL event journal
//! - Safety: Safety limits and enforcement

pub mod executor;
pub mod journal;
pub mod playbook;
pub mod playbook_action;
pub mod safety;

// Re-export commonly used types
pub use executor::{ExecutionMode, ExecutorOptions, PlaybookExecutor, RunOutcome};
pub use journal::{Journal, RecordingObserver, StepObserver};
pub use playbook::{ArgValue, Args, DocumentError, Invocation, Playbook, Scope, Step};
pub use playbook_action::{PlaybookRunAction, PLAYBOOK_ACTION};
pub use safety::{SafetyLimits, SafetyTracker, SafetyViolation};
