//! Scheduler errors.

use std::time::Duration;
use thiserror::Error;
use wikiflow_core::TaskId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("orchestrator is stopped")]
    Stopped,

    #[error("orchestrator already started")]
    AlreadyStarted,

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("task {task_id} failed: {source}")]
    Execution {
        task_id: TaskId,
        #[source]
        source: wikiflow_core::Error,
    },

    #[error("task {task_id} timed out after {timeout:?}")]
    Timeout { task_id: TaskId, timeout: Duration },

    #[error("task {task_id} was canceled")]
    Canceled { task_id: TaskId },
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
