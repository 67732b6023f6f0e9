//! Step events emitted while a playbook runs.
//!
//! Every node the executor touches produces events carrying its path,
//! resolved action name, bound arguments and result or error. Observers
//! receive them as they happen; the journal persists them as JSONL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::path::NodePath;

/// A single event in a run's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Node the event refers to
    pub path: NodePath,

    /// Resolved action name (empty for run-level events)
    pub action: String,

    /// Type of event
    pub event_type: EventType,

    /// Current status of the step/run
    pub status: StepStatus,

    /// Bound arguments, as passed to the action
    pub args: Option<Value>,

    /// Value produced by the step
    pub result: Option<Value>,

    /// Time taken in milliseconds (for finished steps)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,

    /// Node where a failure originated; differs from `path` when it propagated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<NodePath>,
}

impl StepEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        path: NodePath,
        action: impl Into<String>,
        event_type: EventType,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            path,
            action: action.into(),
            event_type,
            status,
            args: None,
            result: None,
            duration_ms: None,
            error: None,
            origin: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_origin(mut self, origin: NodePath) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Types of events that can occur during playbook execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A top-level run has started
    RunStarted,

    /// A top-level run completed
    RunCompleted,

    /// A top-level run aborted
    RunFailed,

    /// A node's arguments are bound and its action is about to run
    StepStarted,

    /// A node produced a result
    StepCompleted,

    /// A node failed (aborting, or recorded in best-effort mode)
    StepFailed,
}

/// Status of a step or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    #[default]
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,
}
