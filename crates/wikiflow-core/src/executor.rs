//! Executor trait and per-execution context.
//!
//! The scheduler never runs business logic itself: it hands each dispatched
//! task id to a [`TaskExecutor`] supplied by the host application.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Result, TaskId};

/// Deadline used when a timeout does not fit in an `Instant`, roughly 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Cancellation and deadline for one execution attempt.
///
/// The token is cancelled when the task is canceled through the
/// orchestrator, when the orchestrator shuts down, or when the deadline
/// passes.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    token: CancellationToken,
    deadline: Instant,
}

impl ExecutionContext {
    /// Create a context whose deadline is `timeout` from now. Timeouts too
    /// large to represent are clamped to a far-future deadline.
    pub fn new(token: CancellationToken, timeout: Duration) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self { token, deadline }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the execution has been cancelled for any reason.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Trait for task executors.
///
/// Implementations must be safe to call concurrently for different task ids.
///
/// Cancellation is cooperative. The scheduler stops polling the returned
/// future at the deadline and cancels `ctx`, but blocking work inside the
/// future cannot be interrupted: long-running executors must check
/// [`ExecutionContext::is_cancelled`] or race [`ExecutionContext::cancelled`]
/// against their own work.
///
/// Errors (including [`crate::Error::Timeout`]) are reported to the caller
/// and never retried by the scheduler.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run the task with the given id.
    async fn execute(&self, ctx: ExecutionContext, task_id: TaskId) -> Result<()>;
}
