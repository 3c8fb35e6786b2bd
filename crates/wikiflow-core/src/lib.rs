//! Core domain types and traits for the wikiflow task orchestration engine.
//!
//! This crate contains:
//! - Task and repository identifiers
//! - Task and repository status state machines
//! - Repository status aggregation from task summaries
//! - The executor trait the scheduler calls back into

pub mod aggregator;
pub mod error;
pub mod executor;
pub mod id;
pub mod repository;
pub mod task;

pub use aggregator::{Aggregation, StatusAggregator, TaskStatusSummary};
pub use error::{Error, Result};
pub use executor::{ExecutionContext, TaskExecutor};
pub use id::{RepositoryId, TaskId};
pub use repository::{RepositoryStateMachine, RepositoryStatus};
pub use task::{TaskStateMachine, TaskStatus};
