//! Worker loop and retry timer.

use crate::dispatch::{DispatchOutcome, Dispatcher};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// A worker that takes jobs off the queues and dispatches them.
pub(crate) struct Worker {
    id: usize,
    dispatcher: Arc<Dispatcher>,
}

impl Worker {
    pub(crate) fn new(id: usize, dispatcher: Arc<Dispatcher>) -> Self {
        Self { id, dispatcher }
    }

    /// Run the worker loop until shutdown.
    ///
    /// A job already being executed when shutdown starts finishes (or is
    /// canceled through its token) before the loop exits.
    pub(crate) async fn run(self) {
        info!(worker_id = self.id, "Starting worker");

        loop {
            if self.dispatcher.shutdown.is_cancelled() {
                break;
            }

            match self.dispatcher.next_job() {
                Some(job) => {
                    if self.dispatcher.has_queued() {
                        self.dispatcher.work_available.notify_one();
                    }
                    let task_id = job.task_id;
                    if let DispatchOutcome::Executed(Err(e)) =
                        self.dispatcher.try_dispatch(job).await
                    {
                        debug!(worker_id = self.id, task_id = %task_id, error = %e, "Dispatch finished with error");
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.dispatcher.shutdown.cancelled() => break,
                        _ = self.dispatcher.work_available.notified() => {}
                    }
                }
            }
        }

        info!(worker_id = self.id, "Worker stopped");
    }
}

/// Offer due deferred jobs back to the queues once per retry interval.
pub(crate) async fn run_retry_timer(dispatcher: Arc<Dispatcher>) {
    let mut ticker = tokio::time::interval(dispatcher.retry.delay());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = dispatcher.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                dispatcher.redispatch_due(Instant::now());
            }
        }
    }

    debug!("Retry timer stopped");
}
