//! Safety limits and enforcement for playbook execution.
//!
//! Prevents runaway execution through configurable limits on:
//! - Number of invocations per run
//! - Nesting depth of sub-playbooks
//! - Per-step and per-run timeouts

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Safety limits for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum number of node invocations per run (default: 1000)
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Maximum nesting depth of sub-playbooks (default: 32)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Per-step timeout in seconds (default: 300)
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,

    /// Total run timeout in seconds (default: 3600)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,
}

fn default_max_steps() -> u32 {
    1000
}
fn default_max_depth() -> u32 {
    32
}
fn default_step_timeout() -> u64 {
    300
}
fn default_run_timeout() -> u64 {
    3600
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_depth: default_max_depth(),
            step_timeout_seconds: default_step_timeout(),
            run_timeout_seconds: default_run_timeout(),
        }
    }
}

impl SafetyLimits {
    /// Effective timeout for a step, honoring a per-node override
    pub fn step_timeout(&self, override_seconds: Option<u64>) -> Duration {
        Duration::from_secs(override_seconds.unwrap_or(self.step_timeout_seconds))
    }

    /// Check current tracker state against limits
    pub fn check(&self, tracker: &SafetyTracker) -> Result<(), SafetyViolation> {
        if tracker.steps_executed >= self.max_steps {
            return Err(SafetyViolation::MaxSteps {
                actual: tracker.steps_executed,
                limit: self.max_steps,
            });
        }

        let elapsed = tracker.elapsed_seconds();
        if elapsed >= self.run_timeout_seconds {
            return Err(SafetyViolation::RunTimeout {
                elapsed_seconds: elapsed,
                limit_seconds: self.run_timeout_seconds,
            });
        }

        Ok(())
    }

    /// Check a sub-playbook nesting depth
    pub fn check_depth(&self, depth: usize) -> Result<(), SafetyViolation> {
        if depth as u64 > self.max_depth as u64 {
            return Err(SafetyViolation::MaxDepth {
                actual: depth,
                limit: self.max_depth,
            });
        }
        Ok(())
    }
}

/// Tracks resource usage during a run
#[derive(Debug, Clone)]
pub struct SafetyTracker {
    /// Number of invocations performed
    pub steps_executed: u32,

    /// When the run started
    pub started_at: Instant,
}

impl Default for SafetyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyTracker {
    pub fn new() -> Self {
        Self {
            steps_executed: 0,
            started_at: Instant::now(),
        }
    }

    /// Record a step execution
    pub fn record_step(&mut self) {
        self.steps_executed += 1;
    }

    /// Get elapsed time in seconds
    pub fn elapsed_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Safety violation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SafetyViolation {
    #[error("Maximum steps exceeded: {actual} >= {limit}")]
    MaxSteps { actual: u32, limit: u32 },

    #[error("Maximum nesting depth exceeded: {actual} > {limit}")]
    MaxDepth { actual: usize, limit: u32 },

    #[error("Run timeout: {elapsed_seconds}s >= {limit_seconds}s")]
    RunTimeout {
        elapsed_seconds: u64,
        limit_seconds: u64,
    },
}
