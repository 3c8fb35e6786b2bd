//! Task status and its state machine.
//!
//! ```text
//! pending -> queued -> running -> succeeded | failed
//!            queued | running -> canceled
//! succeeded | failed | canceled -> pending   (reset)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::{Error, Result, TaskId};

/// Status of a persisted analysis task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not yet submitted, or reset after finishing.
    Pending,
    /// Submitted to the orchestrator, waiting for a worker.
    Queued,
    /// Executing.
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Canceled,
    ];

    /// Terminal statuses only leave via an explicit reset to `pending`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Whether the task is held by the orchestrator (queued or running).
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            "canceled" | "cancelled" => Ok(TaskStatus::Canceled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Validates task status transitions.
///
/// Validation never mutates anything: callers apply the new status to their
/// own record only after `transition` returns `Ok`.
#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    allowed: HashSet<(TaskStatus, TaskStatus)>,
}

impl TaskStateMachine {
    pub fn new() -> Self {
        use TaskStatus::*;

        let allowed = [
            // Normal flow
            (Pending, Queued),
            (Queued, Running),
            (Running, Succeeded),
            (Running, Failed),
            // Reset
            (Failed, Pending),
            (Succeeded, Pending),
            (Canceled, Pending),
            // Cancellation
            (Queued, Canceled),
            (Running, Canceled),
        ]
        .into_iter()
        .collect();

        Self { allowed }
    }

    /// Whether `from -> to` is a legal edge. Self-transitions never are.
    pub fn can_transition(&self, from: TaskStatus, to: TaskStatus) -> bool {
        from != to && self.allowed.contains(&(from, to))
    }

    pub fn validate_transition(&self, from: TaskStatus, to: TaskStatus) -> Result<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                entity: "task",
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Validate and log a transition for the given task.
    pub fn transition(&self, from: TaskStatus, to: TaskStatus, task_id: TaskId) -> Result<()> {
        match self.validate_transition(from, to) {
            Ok(()) => {
                debug!(task_id = %task_id, %from, %to, "Task transition accepted");
                Ok(())
            }
            Err(e) => {
                debug!(task_id = %task_id, %from, %to, error = %e, "Task transition rejected");
                Err(e)
            }
        }
    }

    /// Statuses reachable from `from` in one step.
    pub fn allowed_targets(&self, from: TaskStatus) -> Vec<TaskStatus> {
        TaskStatus::ALL
            .into_iter()
            .filter(|to| self.can_transition(from, *to))
            .collect()
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
