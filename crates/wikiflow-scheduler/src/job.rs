//! Units of dispatch work.

use chrono::{DateTime, Utc};
use std::time::Duration;
use wikiflow_config::JobDefaults;
use wikiflow_core::{RepositoryId, TaskId};

use crate::{SchedulerError, SchedulerResult};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// One task submission.
///
/// `retry_count` counts failed dispatch attempts (repository busy), not
/// executions. Jobs are discarded once executed or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub task_id: TaskId,
    /// Mutual-exclusion key.
    pub repository_id: RepositoryId,
    /// Jobs with a priority above zero go to the priority queue.
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Bound on a single execution attempt.
    pub timeout: Duration,
}

impl Job {
    pub fn new(task_id: TaskId, repository_id: RepositoryId) -> Self {
        Self {
            task_id,
            repository_id,
            priority: 0,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a job using the retry budget and timeout from configuration.
    pub fn from_defaults(
        task_id: TaskId,
        repository_id: RepositoryId,
        defaults: &JobDefaults,
    ) -> Self {
        Self::new(task_id, repository_id)
            .with_max_retries(defaults.max_retries)
            .with_timeout(defaults.timeout)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_priority(&self) -> bool {
        self.priority > 0
    }

    /// Whether another failed dispatch attempt may be retried.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.timeout.is_zero() {
            return Err(SchedulerError::InvalidJob(format!(
                "task {}: timeout must be greater than zero",
                self.task_id
            )));
        }
        if self.retry_count > self.max_retries {
            return Err(SchedulerError::InvalidJob(format!(
                "task {}: retry count {} exceeds max retries {}",
                self.task_id, self.retry_count, self.max_retries
            )));
        }
        Ok(())
    }
}
