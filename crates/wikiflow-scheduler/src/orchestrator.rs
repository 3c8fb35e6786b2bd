//! Orchestrator - owns the worker pool and accepts jobs.

use crate::dispatch::Dispatcher;
use crate::event::SchedulerEvent;
use crate::worker::{Worker, run_retry_timer};
use crate::{Job, SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use wikiflow_config::OrchestratorConfig;
use wikiflow_core::{TaskExecutor, TaskId};

/// Upper bound for worker counts and queue capacities.
pub const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// Point-in-time view of the orchestrator's load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub priority_queue_length: usize,
    pub retry_queue_length: usize,
    /// Workers currently executing a job.
    pub active_workers: usize,
    pub max_workers: usize,
    pub locked_repositories: usize,
}

enum Lifecycle {
    Idle,
    Running(Vec<JoinHandle<()>>),
    Stopped,
}

/// Task orchestrator.
///
/// Runs a fixed pool of workers over a priority queue and a normal queue,
/// allowing at most one executing job per repository. Jobs that find their
/// repository busy are parked in a retry scheduler and offered again later.
///
/// Construct it explicitly and share it through an `Arc`.
pub struct Orchestrator {
    dispatcher: Arc<Dispatcher>,
    max_workers: usize,
    state: Mutex<Lifecycle>,
    stopping: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator with default queue capacities.
    pub fn new(max_workers: usize, executor: Arc<dyn TaskExecutor>) -> SchedulerResult<Self> {
        let config = OrchestratorConfig {
            workers: max_workers,
            ..Default::default()
        };
        Self::from_config(&config, executor)
    }

    pub fn from_config(
        config: &OrchestratorConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> SchedulerResult<Self> {
        for (field, value) in [
            ("workers", config.workers),
            ("queue capacity", config.queue_capacity),
            ("priority queue capacity", config.priority_queue_capacity),
            ("retry capacity", config.retry_capacity),
        ] {
            if value == 0 {
                return Err(SchedulerError::InvalidConfig(format!(
                    "{field} must be greater than zero"
                )));
            }
            if value > MAX_CAPACITY {
                return Err(SchedulerError::InvalidConfig(format!(
                    "{field} must be at most {MAX_CAPACITY}, got {value}"
                )));
            }
        }
        if config.retry_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "retry interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(config, executor)),
            max_workers: config.workers,
            state: Mutex::new(Lifecycle::Idle),
            stopping: AtomicBool::new(false),
        })
    }

    fn state(&self) -> MutexGuard<'_, Lifecycle> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the workers and the retry timer.
    pub fn start(&self) -> SchedulerResult<()> {
        let mut state = self.state();
        match *state {
            Lifecycle::Running(_) => return Err(SchedulerError::AlreadyStarted),
            Lifecycle::Stopped => return Err(SchedulerError::Stopped),
            Lifecycle::Idle => {}
        }

        let mut handles = Vec::new();
        for id in 0..self.max_workers {
            let worker = Worker::new(id, self.dispatcher.clone());
            handles.push(tokio::spawn(worker.run()));
        }
        handles.push(tokio::spawn(run_retry_timer(self.dispatcher.clone())));
        *state = Lifecycle::Running(handles);

        info!(workers = self.max_workers, "Orchestrator started");
        Ok(())
    }

    /// Shut down: cancel in-flight executions, refuse new jobs and wait for
    /// every worker to exit. Jobs still queued or parked are discarded.
    ///
    /// Calling this more than once is a no-op.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping orchestrator");

        self.dispatcher.priority.close();
        self.dispatcher.normal.close();
        self.dispatcher.shutdown.cancel();

        let handles = match std::mem::replace(&mut *self.state(), Lifecycle::Stopped) {
            Lifecycle::Running(handles) => handles,
            Lifecycle::Idle | Lifecycle::Stopped => Vec::new(),
        };
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }

        let discarded = self.dispatcher.priority.drain().len()
            + self.dispatcher.normal.drain().len()
            + self.dispatcher.retry.drain().len();
        if discarded > 0 {
            warn!(discarded, "Discarded pending jobs on shutdown");
        }
        info!("Orchestrator stopped");
    }

    /// Submit one job, waiting while its queue is full.
    pub async fn enqueue_job(&self, job: Job) -> SchedulerResult<()> {
        if self.dispatcher.normal.is_closed() {
            return Err(SchedulerError::Stopped);
        }
        job.validate()?;

        let (task_id, repository_id, priority) = (job.task_id, job.repository_id, job.priority);
        self.dispatcher.submit(job).await?;
        info!(
            task_id = %task_id,
            repository_id = %repository_id,
            priority,
            "Job enqueued"
        );
        Ok(())
    }

    /// Submit jobs in order, stopping at the first rejection. Jobs accepted
    /// before the failure stay queued.
    pub async fn enqueue_batch(&self, jobs: impl IntoIterator<Item = Job>) -> SchedulerResult<()> {
        for job in jobs {
            self.enqueue_job(job).await?;
        }
        Ok(())
    }

    /// Cancel a task that is currently executing. Returns false when the task
    /// is not running.
    pub fn cancel_task(&self, task_id: TaskId) -> bool {
        self.dispatcher.cancel_task(task_id)
    }

    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            queue_length: self.dispatcher.normal.len(),
            priority_queue_length: self.dispatcher.priority.len(),
            retry_queue_length: self.dispatcher.retry.len(),
            active_workers: self.dispatcher.active_count(),
            max_workers: self.max_workers,
            locked_repositories: self.dispatcher.guard.locked_count(),
        }
    }

    /// Receive lifecycle events for every job from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.dispatcher.subscribe()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state(), Lifecycle::Running(_))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.dispatcher.shutdown.cancel();
    }
}
