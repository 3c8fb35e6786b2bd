//! Executor doubles for scheduler tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use wikiflow_core::{Error, ExecutionContext, Result, TaskExecutor, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Sleep for the configured work time, stopping early on cancellation.
    Succeed,
    /// Like `Succeed`, but return an error after the work.
    Fail,
    /// Wait for the context deadline, then report a deadline error.
    DeadlineExceeded,
    Panic,
    /// Sleep for the work time without looking at the token.
    IgnoreCancel,
}

#[derive(Debug, Clone, Copy)]
pub struct Run {
    pub task_id: TaskId,
    pub started: Instant,
    pub finished: Instant,
}

pub struct RecordingExecutor {
    behavior: Behavior,
    work: Duration,
    calls: AtomicUsize,
    runs: Mutex<Vec<Run>>,
}

impl RecordingExecutor {
    pub fn new(behavior: Behavior, work: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            work,
            calls: AtomicUsize::new(0),
            runs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Completed runs in finishing order.
    pub fn runs(&self) -> Vec<Run> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(&self, ctx: ExecutionContext, task_id: TaskId) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let result = match self.behavior {
            Behavior::DeadlineExceeded => {
                tokio::time::sleep_until(ctx.deadline()).await;
                Err(Error::Timeout(format!("task {task_id} hit its deadline")))
            }
            Behavior::Panic => panic!("executor blew up on task {task_id}"),
            Behavior::IgnoreCancel => {
                tokio::time::sleep(self.work).await;
                Ok(())
            }
            Behavior::Succeed | Behavior::Fail => {
                tokio::select! {
                    _ = ctx.cancelled() => Err(Error::Cancelled),
                    _ = tokio::time::sleep(self.work) => {
                        if self.behavior == Behavior::Fail {
                            Err(Error::ExecutionFailed(format!("task {task_id} failed")))
                        } else {
                            Ok(())
                        }
                    }
                }
            }
        };

        self.runs.lock().unwrap().push(Run {
            task_id,
            started,
            finished: Instant::now(),
        });
        result
    }
}
