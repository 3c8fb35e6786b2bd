//! Per-repository mutual exclusion.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use wikiflow_core::RepositoryId;

/// Set of repositories that currently have a job executing.
///
/// Acquisition never blocks: a busy repository yields `None` and the caller
/// decides what to do with its job.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGuard {
    locked: Arc<Mutex<HashSet<RepositoryId>>>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, HashSet<RepositoryId>> {
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the repository. The claim is released when the lease drops.
    pub fn acquire(&self, repository_id: RepositoryId) -> Option<RepositoryLease> {
        if self.locked().insert(repository_id) {
            Some(RepositoryLease {
                guard: self.clone(),
                repository_id,
            })
        } else {
            None
        }
    }

    pub fn is_locked(&self, repository_id: RepositoryId) -> bool {
        self.locked().contains(&repository_id)
    }

    pub fn locked_count(&self) -> usize {
        self.locked().len()
    }

    fn release(&self, repository_id: RepositoryId) {
        self.locked().remove(&repository_id);
    }
}

/// Exclusive claim on a repository, released exactly once on drop.
#[derive(Debug)]
pub struct RepositoryLease {
    guard: ConcurrencyGuard,
    repository_id: RepositoryId,
}

impl RepositoryLease {
    pub fn repository_id(&self) -> RepositoryId {
        self.repository_id
    }

    /// Release the repository now rather than at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RepositoryLease {
    fn drop(&mut self) {
        self.guard.release(self.repository_id);
    }
}
