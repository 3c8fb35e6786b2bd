//! Bounded in-memory FIFO job queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, TryAcquireError};

use crate::{Job, SchedulerError, SchedulerResult};

/// Why a non-blocking push was refused. The job is handed back.
#[derive(Debug)]
pub enum TryPushError {
    Full(Job),
    Closed(Job),
}

impl TryPushError {
    pub fn into_job(self) -> Job {
        match self {
            TryPushError::Full(job) | TryPushError::Closed(job) => job,
        }
    }
}

/// FIFO queue with a fixed capacity.
///
/// Free slots are tracked by a semaphore so that `push` waits while the
/// queue is full and fails once the queue is closed.
pub struct JobQueue {
    name: &'static str,
    items: Mutex<VecDeque<Job>>,
    slots: Semaphore,
}

impl JobQueue {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            items: Mutex::new(VecDeque::new()),
            slots: Semaphore::new(capacity),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a job, waiting for a free slot while the queue is full.
    pub async fn push(&self, job: Job) -> SchedulerResult<()> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| SchedulerError::Stopped)?;
        permit.forget();
        self.items().push_back(job);
        Ok(())
    }

    /// Append a job only if a slot is free right now.
    pub fn try_push(&self, job: Job) -> Result<(), TryPushError> {
        match self.slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.items().push_back(job);
                Ok(())
            }
            Err(TryAcquireError::NoPermits) => Err(TryPushError::Full(job)),
            Err(TryAcquireError::Closed) => Err(TryPushError::Closed(job)),
        }
    }

    pub fn pop(&self) -> Option<Job> {
        let job = self.items().pop_front();
        if job.is_some() {
            self.slots.add_permits(1);
        }
        job
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Refuse further pushes and wake every pusher waiting for a slot.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Remove and return every queued job.
    pub fn drain(&self) -> Vec<Job> {
        let jobs: Vec<Job> = self.items().drain(..).collect();
        self.slots.add_permits(jobs.len());
        jobs
    }
}
