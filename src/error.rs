//! Error taxonomy for playbook execution.
//!
//! `ActionError` is what went wrong at a single node; `PlaybookError::Step`
//! pins it to the node's path, action name and argument snapshot so the
//! caller never receives a context-free failure.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::core::playbook::DocumentError;
use crate::core::safety::SafetyViolation;
use crate::domain::{ArgType, ArgumentError, NodePath, SpecError};

/// Failure of a single playbook node
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action '{0}' is not registered")]
    NotFound(String),

    #[error("missing required argument(s): {}", .0.join(", "))]
    MissingArgument(Vec<String>),

    #[error("argument '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: ArgType,
        found: &'static str,
    },

    #[error("binding failed: {0}")]
    Binding(String),

    #[error("action raised: {0:#}")]
    Execution(anyhow::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("playbook re-entered while still running: {0}")]
    Cycle(String),

    #[error(transparent)]
    Safety(#[from] SafetyViolation),
}

impl ActionError {
    /// Fatal errors abort the run even in best-effort mode
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Cycle(_) | Self::Safety(_))
    }
}

impl From<ArgumentError> for ActionError {
    fn from(err: ArgumentError) -> Self {
        match err {
            ArgumentError::Missing(names) => Self::MissingArgument(names),
            ArgumentError::TypeMismatch {
                name,
                expected,
                found,
            } => Self::TypeMismatch {
                name,
                expected,
                found,
            },
        }
    }
}

/// Errors surfaced to callers of the executor and document loaders
#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("step {path} ({action}) failed: {source}")]
    Step {
        path: NodePath,
        action: String,
        args: Value,
        source: ActionError,
    },
}

impl PlaybookError {
    pub fn step(
        path: NodePath,
        action: impl Into<String>,
        args: Value,
        source: impl Into<ActionError>,
    ) -> Self {
        Self::Step {
            path,
            action: action.into(),
            args,
            source: source.into(),
        }
    }

    /// Path of the failing node, for step failures
    pub fn path(&self) -> Option<&NodePath> {
        match self {
            Self::Step { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Node-level cause, for step failures
    pub fn action_error(&self) -> Option<&ActionError> {
        match self {
            Self::Step { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.action_error().map_or(true, ActionError::is_fatal)
    }
}

pub type Result<T, E = PlaybookError> = std::result::Result<T, E>;
