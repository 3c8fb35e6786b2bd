//! Holding area for jobs whose repository was busy.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::Job;

struct RetryEntry {
    due: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for RetryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RetryEntry {}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

#[derive(Default)]
struct RetryState {
    heap: BinaryHeap<Reverse<RetryEntry>>,
    next_seq: u64,
}

impl RetryState {
    fn insert(&mut self, due: Instant, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(RetryEntry { due, seq, job }));
    }
}

/// Bounded set of deferred jobs, each due `delay` after it was deferred.
///
/// The scheduler only stores jobs; the orchestrator's retry timer drains the
/// due ones and offers them back to the queues.
pub struct RetryScheduler {
    capacity: usize,
    delay: Duration,
    state: Mutex<RetryState>,
}

impl RetryScheduler {
    pub fn new(capacity: usize, delay: Duration) -> Self {
        Self {
            capacity,
            delay,
            state: Mutex::new(RetryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RetryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Park a job until `delay` has passed. Hands the job back when full.
    pub fn enqueue(&self, job: Job) -> Result<(), Job> {
        let mut state = self.state();
        if state.heap.len() >= self.capacity {
            return Err(job);
        }
        state.insert(Instant::now() + self.delay, job);
        Ok(())
    }

    /// Put back a job taken by `take_due` that could not be re-offered.
    ///
    /// The job was already admitted, so capacity is not checked and it stays
    /// due immediately.
    pub fn restore(&self, job: Job) {
        self.state().insert(Instant::now(), job);
    }

    /// Remove every job due at or before `now`, earliest first.
    pub fn take_due(&self, now: Instant) -> Vec<Job> {
        let mut state = self.state();
        let mut due = Vec::new();
        while state
            .heap
            .peek()
            .is_some_and(|Reverse(entry)| entry.due <= now)
        {
            if let Some(Reverse(entry)) = state.heap.pop() {
                due.push(entry.job);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.state().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().heap.is_empty()
    }

    pub fn drain(&self) -> Vec<Job> {
        let mut state = self.state();
        std::mem::take(&mut state.heap)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|Reverse(entry)| entry.job)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikiflow_core::{RepositoryId, TaskId};

    fn job(id: u64) -> Job {
        Job::new(TaskId::new(id), RepositoryId::new(1))
    }

    fn ids(jobs: &[Job]) -> Vec<u64> {
        jobs.iter().map(|j| j.task_id.get()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_not_due_before_delay() {
        let retry = RetryScheduler::new(10, Duration::from_millis(100));
        retry.enqueue(job(1)).unwrap();

        assert!(retry.take_due(Instant::now()).is_empty());
        assert_eq!(retry.len(), 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(ids(&retry.take_due(Instant::now())), vec![1]);
        assert!(retry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_jobs_in_deferral_order() {
        let retry = RetryScheduler::new(10, Duration::from_millis(50));
        retry.enqueue(job(1)).unwrap();
        retry.enqueue(job(2)).unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        retry.enqueue(job(3)).unwrap();

        tokio::time::advance(Duration::from_millis(45)).await;
        // 3 is not due yet
        assert_eq!(ids(&retry.take_due(Instant::now())), vec![1, 2]);

        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(ids(&retry.take_due(Instant::now())), vec![3]);
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let retry = RetryScheduler::new(1, Duration::from_millis(10));
        retry.enqueue(job(1)).unwrap();

        let rejected = retry.enqueue(job(2)).unwrap_err();
        assert_eq!(rejected.task_id, TaskId::new(2));
        assert_eq!(retry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_job_is_due_immediately() {
        let retry = RetryScheduler::new(1, Duration::from_secs(60));
        retry.enqueue(job(1)).unwrap();
        retry.restore(job(2));

        assert_eq!(retry.len(), 2);
        assert_eq!(ids(&retry.take_due(Instant::now())), vec![2]);
    }

    #[tokio::test]
    async fn test_drain_returns_everything() {
        let retry = RetryScheduler::new(5, Duration::from_secs(60));
        retry.enqueue(job(1)).unwrap();
        retry.enqueue(job(2)).unwrap();

        assert_eq!(ids(&retry.drain()), vec![1, 2]);
        assert!(retry.is_empty());
    }
}
