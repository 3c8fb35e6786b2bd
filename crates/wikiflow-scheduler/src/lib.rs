//! Task scheduling for wikiflow.
//!
//! Accepts jobs into bounded priority and normal queues and dispatches them
//! to a fixed pool of workers, with at most one executing job per
//! repository. Jobs that find their repository busy are retried on a timer.

pub mod dispatch;
pub mod error;
pub mod event;
pub mod guard;
pub mod job;
pub mod orchestrator;
pub mod queue;
pub mod retry;
mod worker;

#[cfg(test)]
mod testing;

pub use dispatch::DispatchOutcome;
pub use error::{SchedulerError, SchedulerResult};
pub use event::{DropReason, SchedulerEvent};
pub use guard::{ConcurrencyGuard, RepositoryLease};
pub use job::Job;
pub use orchestrator::{Orchestrator, QueueStatus};
pub use queue::{JobQueue, TryPushError};
pub use retry::RetryScheduler;
