//! Dispatch path shared by the workers and the retry timer.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wikiflow_config::OrchestratorConfig;
use wikiflow_core::{Error, ExecutionContext, TaskExecutor, TaskId};

use crate::event::{DropReason, SchedulerEvent};
use crate::guard::ConcurrencyGuard;
use crate::queue::JobQueue;
use crate::retry::RetryScheduler;
use crate::{Job, SchedulerError, SchedulerResult};

const EVENT_CAPACITY: usize = 1024;

/// What happened to a job handed to [`Dispatcher::try_dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The repository lock was acquired and the executor ran once.
    Executed(SchedulerResult<()>),
    /// The repository was busy; the job now waits in the retry scheduler.
    Deferred { retry_count: u32 },
    /// The repository was busy and the job cannot be retried.
    Dropped(DropReason),
}

struct RunningTask {
    registration: u64,
    token: CancellationToken,
}

/// Queues, locks and retry state behind the orchestrator.
pub(crate) struct Dispatcher {
    pub(crate) priority: JobQueue,
    pub(crate) normal: JobQueue,
    pub(crate) guard: ConcurrencyGuard,
    pub(crate) retry: RetryScheduler,
    pub(crate) shutdown: CancellationToken,
    pub(crate) work_available: Notify,
    executor: Arc<dyn TaskExecutor>,
    running: Mutex<HashMap<TaskId, RunningTask>>,
    next_registration: AtomicU64,
    active: AtomicUsize,
    events: broadcast::Sender<SchedulerEvent>,
}

impl Dispatcher {
    pub(crate) fn new(config: &OrchestratorConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            priority: JobQueue::new("priority", config.priority_queue_capacity),
            normal: JobQueue::new("normal", config.queue_capacity),
            guard: ConcurrencyGuard::new(),
            retry: RetryScheduler::new(config.retry_capacity, config.retry_interval),
            shutdown: CancellationToken::new(),
            work_available: Notify::new(),
            executor,
            running: Mutex::new(HashMap::new()),
            next_registration: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            events,
        }
    }

    fn running(&self) -> MutexGuard<'_, HashMap<TaskId, RunningTask>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Number of jobs currently executing.
    pub(crate) fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn queue_for(&self, job: &Job) -> &JobQueue {
        if job.is_priority() {
            &self.priority
        } else {
            &self.normal
        }
    }

    /// Queue a job, waiting while its queue is full.
    pub(crate) async fn submit(&self, job: Job) -> SchedulerResult<()> {
        self.queue_for(&job).push(job).await?;
        self.work_available.notify_one();
        Ok(())
    }

    /// Next job to dispatch, always preferring the priority queue.
    pub(crate) fn next_job(&self) -> Option<Job> {
        self.priority.pop().or_else(|| self.normal.pop())
    }

    pub(crate) fn has_queued(&self) -> bool {
        !self.priority.is_empty() || !self.normal.is_empty()
    }

    /// Dispatch one job: execute it if its repository is free, otherwise
    /// defer or drop it. Never waits for the repository lock.
    pub(crate) async fn try_dispatch(&self, job: Job) -> DispatchOutcome {
        let Some(lease) = self.guard.acquire(job.repository_id) else {
            return self.defer(job);
        };

        let result = self.execute_job(&job).await;
        lease.release();
        DispatchOutcome::Executed(result)
    }

    fn defer(&self, mut job: Job) -> DispatchOutcome {
        let (task_id, repository_id) = (job.task_id, job.repository_id);

        if !job.can_retry() {
            warn!(
                task_id = %task_id,
                repository_id = %repository_id,
                retry_count = job.retry_count,
                "Repository busy and retries exhausted, dropping job"
            );
            return self.dropped(&job, DropReason::RetriesExhausted);
        }

        job.retry_count += 1;
        let retry_count = job.retry_count;
        match self.retry.enqueue(job) {
            Ok(()) => {
                debug!(
                    task_id = %task_id,
                    repository_id = %repository_id,
                    retry_count,
                    "Repository busy, job deferred"
                );
                self.emit(SchedulerEvent::Deferred {
                    task_id,
                    repository_id,
                    retry_count,
                });
                DispatchOutcome::Deferred { retry_count }
            }
            Err(job) => {
                warn!(
                    task_id = %task_id,
                    repository_id = %repository_id,
                    "Retry queue full, dropping job"
                );
                self.dropped(&job, DropReason::RetryQueueFull)
            }
        }
    }

    fn dropped(&self, job: &Job, reason: DropReason) -> DispatchOutcome {
        self.emit(SchedulerEvent::Dropped {
            task_id: job.task_id,
            repository_id: job.repository_id,
            retry_count: job.retry_count,
            reason,
        });
        DispatchOutcome::Dropped(reason)
    }

    /// Run the executor once for this job, bounded by its timeout.
    ///
    /// Execution failures and timeouts are reported, never retried.
    pub(crate) async fn execute_job(&self, job: &Job) -> SchedulerResult<()> {
        let (task_id, repository_id) = (job.task_id, job.repository_id);
        let token = self.shutdown.child_token();
        let _running = self.register(task_id, token.clone());
        let ctx = ExecutionContext::new(token.clone(), job.timeout);
        let deadline = ctx.deadline();

        info!(
            task_id = %task_id,
            repository_id = %repository_id,
            timeout = ?job.timeout,
            "Executing task"
        );
        self.emit(SchedulerEvent::Started {
            task_id,
            repository_id,
        });

        let execution = AssertUnwindSafe(self.executor.execute(ctx, task_id)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            outcome = execution => Some(outcome),
            _ = tokio::time::sleep_until(deadline) => None,
        };

        match outcome {
            Some(Ok(Ok(()))) => {
                info!(task_id = %task_id, repository_id = %repository_id, "Task completed");
                self.emit(SchedulerEvent::Succeeded {
                    task_id,
                    repository_id,
                });
                Ok(())
            }
            None | Some(Ok(Err(Error::Timeout(_)))) => {
                token.cancel();
                error!(
                    task_id = %task_id,
                    repository_id = %repository_id,
                    timeout = ?job.timeout,
                    "Task timed out"
                );
                self.emit(SchedulerEvent::TimedOut {
                    task_id,
                    repository_id,
                    timeout: job.timeout,
                });
                Err(SchedulerError::Timeout {
                    task_id,
                    timeout: job.timeout,
                })
            }
            Some(Ok(Err(e))) if token.is_cancelled() || e == Error::Cancelled => {
                info!(task_id = %task_id, repository_id = %repository_id, error = %e, "Task canceled");
                self.emit(SchedulerEvent::Canceled {
                    task_id,
                    repository_id,
                });
                Err(SchedulerError::Canceled { task_id })
            }
            Some(Ok(Err(e))) => {
                error!(task_id = %task_id, repository_id = %repository_id, error = %e, "Task failed");
                self.emit(SchedulerEvent::Failed {
                    task_id,
                    repository_id,
                    message: e.to_string(),
                });
                Err(SchedulerError::Execution { task_id, source: e })
            }
            Some(Err(_panic)) => {
                error!(task_id = %task_id, repository_id = %repository_id, "Executor panicked");
                let source = Error::ExecutionFailed("executor panicked".to_string());
                self.emit(SchedulerEvent::Failed {
                    task_id,
                    repository_id,
                    message: source.to_string(),
                });
                Err(SchedulerError::Execution { task_id, source })
            }
        }
    }

    fn register(&self, task_id: TaskId, token: CancellationToken) -> Registration<'_> {
        let registration = self.next_registration.fetch_add(1, Ordering::SeqCst);
        self.running().insert(
            task_id,
            RunningTask {
                registration,
                token,
            },
        );
        self.active.fetch_add(1, Ordering::SeqCst);
        Registration {
            dispatcher: self,
            task_id,
            registration,
        }
    }

    /// Cancel the execution of a running task. Queued and deferred jobs are
    /// not affected.
    pub(crate) fn cancel_task(&self, task_id: TaskId) -> bool {
        match self.running().get(&task_id) {
            Some(running) => {
                info!(task_id = %task_id, "Cancelling running task");
                running.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Offer every due retry back to its queue without waiting. Jobs whose
    /// queue is full stay in the retry scheduler. Returns how many were
    /// re-queued.
    pub(crate) fn redispatch_due(&self, now: Instant) -> usize {
        let mut requeued = 0;
        for job in self.retry.take_due(now) {
            match self.queue_for(&job).try_push(job) {
                Ok(()) => {
                    requeued += 1;
                    self.work_available.notify_one();
                }
                Err(rejected) => {
                    let job = rejected.into_job();
                    debug!(
                        task_id = %job.task_id,
                        queue = self.queue_for(&job).name(),
                        "Queue full, keeping deferred job"
                    );
                    self.retry.restore(job);
                }
            }
        }
        if requeued > 0 {
            debug!(requeued, "Re-queued deferred jobs");
        }
        requeued
    }
}

/// Removes a task from the running set when its execution ends, including
/// by panic or by the future being dropped.
struct Registration<'a> {
    dispatcher: &'a Dispatcher,
    task_id: TaskId,
    registration: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut running = self.dispatcher.running();
        if running
            .get(&self.task_id)
            .is_some_and(|r| r.registration == self.registration)
        {
            running.remove(&self.task_id);
        }
        self.dispatcher.active.fetch_sub(1, Ordering::SeqCst);
    }
}
