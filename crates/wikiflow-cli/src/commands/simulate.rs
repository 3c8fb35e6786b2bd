//! Synthetic workload through a local orchestrator.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use wikiflow_config::WikiflowConfig;
use wikiflow_core::{
    Error, ExecutionContext, RepositoryId, RepositoryStatus, StatusAggregator, TaskExecutor,
    TaskId, TaskStateMachine, TaskStatus, TaskStatusSummary,
};
use wikiflow_scheduler::{Job, Orchestrator, SchedulerEvent};

pub struct Options {
    pub repos: u64,
    pub tasks: u64,
    pub fail_every: Option<u64>,
    pub work: Duration,
}

/// Executor that sleeps, failing every `fail_every`-th task id.
struct SleepingExecutor {
    work: Duration,
    fail_every: Option<u64>,
}

#[async_trait]
impl TaskExecutor for SleepingExecutor {
    async fn execute(&self, ctx: ExecutionContext, task_id: TaskId) -> wikiflow_core::Result<()> {
        tokio::select! {
            _ = ctx.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(self.work) => {
                match self.fail_every {
                    Some(k) if k > 0 && task_id.get() % k == 0 => {
                        Err(Error::ExecutionFailed("simulated failure".to_string()))
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}

/// Task and repository records kept the way a host application would.
struct Ledger {
    tasks: HashMap<TaskId, (RepositoryId, TaskStatus)>,
    repositories: HashMap<RepositoryId, RepositoryStatus>,
    task_sm: TaskStateMachine,
    aggregator: StatusAggregator,
}

impl Ledger {
    fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            repositories: HashMap::new(),
            task_sm: TaskStateMachine::new(),
            aggregator: StatusAggregator::new(),
        }
    }

    fn add(&mut self, task_id: TaskId, repository_id: RepositoryId) -> Result<()> {
        self.task_sm
            .transition(TaskStatus::Pending, TaskStatus::Queued, task_id)?;
        self.tasks
            .insert(task_id, (repository_id, TaskStatus::Queued));
        self.repositories
            .entry(repository_id)
            .or_insert(RepositoryStatus::Ready);
        Ok(())
    }

    fn apply(&mut self, task_id: TaskId, to: TaskStatus) {
        let Some((repository_id, status)) = self.tasks.get_mut(&task_id) else {
            return;
        };
        if self.task_sm.transition(*status, to, task_id).is_err() {
            return;
        }
        *status = to;
        let repository_id = *repository_id;

        let summary = TaskStatusSummary::from_statuses(
            self.tasks
                .values()
                .filter(|(repo, _)| *repo == repository_id)
                .map(|(_, status)| *status),
        );
        if let Some(current) = self.repositories.get_mut(&repository_id) {
            let aggregation = self
                .aggregator
                .aggregate_status(*current, &summary, repository_id);
            if aggregation.status != *current {
                println!(
                    "  repository {}: {} -> {}",
                    repository_id, current, aggregation.status
                );
                *current = aggregation.status;
            }
        }
    }

    fn is_settled(&self) -> bool {
        self.tasks.values().all(|(_, status)| !status.is_active())
    }

    fn summary(&self) -> TaskStatusSummary {
        TaskStatusSummary::from_statuses(self.tasks.values().map(|(_, status)| *status))
    }
}

/// Run the workload until every task has settled or Ctrl-C is pressed.
pub async fn run(config: WikiflowConfig, options: Options) -> Result<()> {
    let executor = Arc::new(SleepingExecutor {
        work: options.work,
        fail_every: options.fail_every,
    });
    let orchestrator = Arc::new(
        Orchestrator::from_config(&config.orchestrator, executor)
            .context("Failed to create orchestrator")?,
    );
    let mut events = orchestrator.subscribe();
    orchestrator.start()?;

    let mut ledger = Ledger::new();
    let mut jobs = Vec::new();
    for repo in 1..=options.repos {
        for n in 0..options.tasks {
            let task_id = TaskId::new((repo - 1) * options.tasks + n + 1);
            let repository_id = RepositoryId::new(repo);
            ledger.add(task_id, repository_id)?;
            jobs.push(Job::from_defaults(
                task_id,
                repository_id,
                &config.job_defaults,
            ));
        }
    }

    println!(
        "Simulating {} tasks across {} repositories with {} workers",
        jobs.len(),
        options.repos,
        config.orchestrator.workers
    );

    // Enqueue concurrently so a full queue does not stall event handling
    let enqueue = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.enqueue_batch(jobs).await }
    });

    let mut failure = None;
    while !ledger.is_settled() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted, shutting down");
                break;
            }
            event = events.recv() => {
                if let Err(e) = record(&mut ledger, event) {
                    failure = Some(e);
                    break;
                }
            }
        }
    }

    orchestrator.stop().await;
    if let Err(e) = enqueue.await.context("Enqueue task failed")? {
        println!("Enqueue stopped early: {}", e);
    }

    let status = orchestrator.queue_status();
    println!("\n--- Queue Status ---");
    println!("{}", serde_json::to_string_pretty(&status)?);
    println!("\n--- Task Summary ---");
    println!("{}", serde_json::to_string_pretty(&ledger.summary())?);

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Apply one received event. Missed events leave the ledger unable to
/// settle, so a lagged or closed stream ends the run.
fn record(
    ledger: &mut Ledger,
    event: std::result::Result<SchedulerEvent, RecvError>,
) -> Result<()> {
    match event {
        Ok(event) => {
            handle_event(ledger, event);
            Ok(())
        }
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Event stream lagged");
            anyhow::bail!("event stream lagged, {} events missed", skipped)
        }
        Err(RecvError::Closed) => anyhow::bail!("event stream closed"),
    }
}

fn handle_event(ledger: &mut Ledger, event: SchedulerEvent) {
    match event {
        SchedulerEvent::Started { task_id, .. } => {
            println!("▶ task {} started", task_id);
            ledger.apply(task_id, TaskStatus::Running);
        }
        SchedulerEvent::Succeeded { task_id, .. } => {
            println!("✓ task {} succeeded", task_id);
            ledger.apply(task_id, TaskStatus::Succeeded);
        }
        SchedulerEvent::Failed {
            task_id, message, ..
        } => {
            println!("✗ task {} failed: {}", task_id, message);
            ledger.apply(task_id, TaskStatus::Failed);
        }
        SchedulerEvent::TimedOut {
            task_id, timeout, ..
        } => {
            println!("✗ task {} timed out after {:?}", task_id, timeout);
            ledger.apply(task_id, TaskStatus::Failed);
        }
        SchedulerEvent::Canceled { task_id, .. } => {
            println!("⊘ task {} canceled", task_id);
            ledger.apply(task_id, TaskStatus::Canceled);
        }
        SchedulerEvent::Deferred {
            task_id,
            repository_id,
            retry_count,
        } => {
            println!(
                "○ task {} deferred, repository {} busy (attempt {})",
                task_id, repository_id, retry_count
            );
        }
        SchedulerEvent::Dropped {
            task_id, reason, ..
        } => {
            println!("⊘ task {} dropped: {}", task_id, reason);
            ledger.apply(task_id, TaskStatus::Canceled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_ledger_follows_task_lifecycle() {
        let mut ledger = Ledger::new();
        let repo = RepositoryId::new(1);
        ledger.add(TaskId::new(1), repo).unwrap();
        ledger.add(TaskId::new(2), repo).unwrap();
        assert!(!ledger.is_settled());

        ledger.apply(TaskId::new(1), TaskStatus::Running);
        assert_eq!(ledger.repositories[&repo], RepositoryStatus::Analyzing);

        ledger.apply(TaskId::new(1), TaskStatus::Succeeded);
        ledger.apply(TaskId::new(2), TaskStatus::Running);
        ledger.apply(TaskId::new(2), TaskStatus::Succeeded);
        assert!(ledger.is_settled());
        assert_eq!(ledger.repositories[&repo], RepositoryStatus::Completed);
    }

    #[test]
    fn test_ledger_ignores_illegal_transition() {
        let mut ledger = Ledger::new();
        ledger.add(TaskId::new(1), RepositoryId::new(1)).unwrap();
        // queued -> succeeded skips running
        ledger.apply(TaskId::new(1), TaskStatus::Succeeded);
        assert_eq!(ledger.tasks[&TaskId::new(1)].1, TaskStatus::Queued);
    }

    #[test]
    fn test_lagged_stream_ends_run() {
        let mut ledger = Ledger::new();
        ledger.add(TaskId::new(1), RepositoryId::new(1)).unwrap();

        let started = SchedulerEvent::Started {
            task_id: TaskId::new(1),
            repository_id: RepositoryId::new(1),
        };
        assert!(record(&mut ledger, Ok(started)).is_ok());
        assert_eq!(ledger.tasks[&TaskId::new(1)].1, TaskStatus::Running);

        let err = record(&mut ledger, Err(RecvError::Lagged(3))).unwrap_err();
        assert!(err.to_string().contains("3 events missed"));
        assert!(record(&mut ledger, Err(RecvError::Closed)).is_err());
        assert!(!ledger.is_settled());
    }

    #[tokio::test]
    async fn test_sleeping_executor_fails_every_kth() {
        let executor = SleepingExecutor {
            work: Duration::from_millis(1),
            fail_every: Some(2),
        };
        let ctx = || ExecutionContext::new(CancellationToken::new(), Duration::from_secs(1));
        assert!(executor.execute(ctx(), TaskId::new(1)).await.is_ok());
        assert!(executor.execute(ctx(), TaskId::new(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_sleeping_executor_observes_cancellation() {
        let executor = SleepingExecutor {
            work: Duration::from_secs(60),
            fail_every: None,
        };
        let token = CancellationToken::new();
        token.cancel();
        let result = executor
            .execute(ExecutionContext::new(token, Duration::from_secs(120)), TaskId::new(1))
            .await;
        assert_eq!(result, Err(Error::Cancelled));
    }
}
