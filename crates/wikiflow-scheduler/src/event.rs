//! Job lifecycle events broadcast by the orchestrator.

use std::time::Duration;
use wikiflow_core::{RepositoryId, TaskId};

/// Why a job left the scheduler without being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The repository stayed busy for every allowed dispatch attempt.
    RetriesExhausted,
    /// The retry scheduler had no room for the deferred job.
    RetryQueueFull,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::RetriesExhausted => write!(f, "retries exhausted"),
            DropReason::RetryQueueFull => write!(f, "retry queue full"),
        }
    }
}

/// Event emitted while dispatching and executing jobs.
///
/// Callers use these to move their persisted task records along, in
/// particular `Dropped`, after which the scheduler no longer holds the task.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Started {
        task_id: TaskId,
        repository_id: RepositoryId,
    },
    Succeeded {
        task_id: TaskId,
        repository_id: RepositoryId,
    },
    Failed {
        task_id: TaskId,
        repository_id: RepositoryId,
        message: String,
    },
    TimedOut {
        task_id: TaskId,
        repository_id: RepositoryId,
        timeout: Duration,
    },
    Canceled {
        task_id: TaskId,
        repository_id: RepositoryId,
    },
    /// The repository was busy; the job waits in the retry scheduler.
    Deferred {
        task_id: TaskId,
        repository_id: RepositoryId,
        retry_count: u32,
    },
    Dropped {
        task_id: TaskId,
        repository_id: RepositoryId,
        retry_count: u32,
        reason: DropReason,
    },
}

impl SchedulerEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            SchedulerEvent::Started { task_id, .. }
            | SchedulerEvent::Succeeded { task_id, .. }
            | SchedulerEvent::Failed { task_id, .. }
            | SchedulerEvent::TimedOut { task_id, .. }
            | SchedulerEvent::Canceled { task_id, .. }
            | SchedulerEvent::Deferred { task_id, .. }
            | SchedulerEvent::Dropped { task_id, .. } => *task_id,
        }
    }

    /// Whether the scheduler is done with the job after this event.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            SchedulerEvent::Started { .. } | SchedulerEvent::Deferred { .. }
        )
    }
}
