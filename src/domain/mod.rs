//! Domain types for the playbook engine.
//!
//! This module contains the core data structures:
//! - Spec: Declared action names and typed arguments
//! - Events: Per-step records emitted during a run
//! - Run: Run state rebuilt from events
//! - Path: Node identity within a playbook tree

pub mod events;
pub mod path;
pub mod run;
pub mod spec;

// Re-export commonly used types
pub use events::{EventType, StepEvent, StepStatus};
pub use path::NodePath;
pub use run::{RunReport, RunState, StepFailure};
pub use spec::{value_kind, ActionArg, ActionSpec, ArgType, ArgumentError, ExtraArgs, SpecError};
