//! Run state and reconstruction from events.
//!
//! A `RunReport` summarizes one top-level playbook run. It can be built
//! live by the executor or rebuilt later by replaying a journal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::events::{EventType, StepEvent, StepStatus};
use super::path::NodePath;

/// A node failure recorded during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Identity of the failed node
    pub path: NodePath,

    /// Action the node resolved to
    pub action: String,

    /// Rendered error
    pub error: String,
}

/// A playbook execution run, reconstructed from its events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Root path of the playbook being executed
    pub playbook: String,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Status of each node (path -> status)
    pub step_statuses: HashMap<String, StepStatus>,

    /// Every node failure, in order
    pub failures: Vec<StepFailure>,

    /// Final result, once completed
    pub result: Option<Value>,
}

impl RunReport {
    /// Reconstruct a run from a sequence of events
    pub fn from_events(events: &[StepEvent]) -> Option<Self> {
        let first_event = events.first()?;

        let mut report = Self {
            id: first_event.run_id,
            playbook: String::new(),
            state: RunState::Running,
            started_at: first_event.timestamp,
            completed_at: None,
            step_statuses: HashMap::new(),
            failures: Vec::new(),
            result: None,
        };

        let id = report.id;
        for event in events.iter().filter(|e| e.run_id == id) {
            report.apply_event(event);
        }

        Some(report)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &StepEvent) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.playbook = event.path.to_string();
                self.started_at = event.timestamp;
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.result = event.result.clone();
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StepStarted => {
                self.step_statuses
                    .insert(event.path.to_string(), StepStatus::Running);
            }
            EventType::StepCompleted => {
                self.step_statuses
                    .insert(event.path.to_string(), StepStatus::Completed);
            }
            EventType::StepFailed => {
                self.step_statuses
                    .insert(event.path.to_string(), StepStatus::Failed);
                // A failure propagating out of a nested node is recorded once,
                // at the node where it originated
                let propagated = event.origin.as_ref().is_some_and(|origin| {
                    *origin != event.path && self.failures.iter().any(|f| f.path == *origin)
                });
                if propagated {
                    return;
                }
                self.failures.push(StepFailure {
                    path: event.path.clone(),
                    action: event.action.clone(),
                    error: event.error.clone().unwrap_or_default(),
                });
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    pub fn step_status(&self, path: &str) -> StepStatus {
        self.step_statuses.get(path).copied().unwrap_or_default()
    }
}

/// State of a playbook run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing
    #[default]
    Running,

    /// Completed (possibly with recorded best-effort failures)
    Completed,

    /// Aborted with error
    Failed { error: String },
}
