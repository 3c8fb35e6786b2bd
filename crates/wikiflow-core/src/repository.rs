//! Repository status and its state machine.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::{Error, RepositoryId, Result};

/// Status of a connected repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryStatus {
    /// Created, not cloned yet.
    Pending,
    Cloning,
    /// Cloned and able to run tasks.
    Ready,
    /// At least one task is queued or running.
    Analyzing,
    /// Every task succeeded.
    Completed,
    /// Clone failed, or a task failed and nothing is in flight.
    Error,
}

impl RepositoryStatus {
    pub const ALL: [RepositoryStatus; 6] = [
        RepositoryStatus::Pending,
        RepositoryStatus::Cloning,
        RepositoryStatus::Ready,
        RepositoryStatus::Analyzing,
        RepositoryStatus::Completed,
        RepositoryStatus::Error,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, RepositoryStatus::Completed | RepositoryStatus::Error)
    }

    /// Whether tasks may be submitted for a repository in this status.
    pub fn can_execute_tasks(&self) -> bool {
        matches!(
            self,
            RepositoryStatus::Ready | RepositoryStatus::Completed | RepositoryStatus::Error
        )
    }
}

impl std::fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryStatus::Pending => write!(f, "pending"),
            RepositoryStatus::Cloning => write!(f, "cloning"),
            RepositoryStatus::Ready => write!(f, "ready"),
            RepositoryStatus::Analyzing => write!(f, "analyzing"),
            RepositoryStatus::Completed => write!(f, "completed"),
            RepositoryStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for RepositoryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RepositoryStatus::Pending),
            "cloning" => Ok(RepositoryStatus::Cloning),
            "ready" => Ok(RepositoryStatus::Ready),
            "analyzing" => Ok(RepositoryStatus::Analyzing),
            "completed" => Ok(RepositoryStatus::Completed),
            "error" => Ok(RepositoryStatus::Error),
            _ => Err(format!("Unknown repository status: {}", s)),
        }
    }
}

/// Validates repository status transitions.
#[derive(Debug, Clone)]
pub struct RepositoryStateMachine {
    allowed: HashSet<(RepositoryStatus, RepositoryStatus)>,
}

impl RepositoryStateMachine {
    pub fn new() -> Self {
        use RepositoryStatus::{Analyzing, Cloning, Completed, Error, Pending, Ready};

        let allowed = [
            // Cloning, including re-clones
            (Pending, Cloning),
            (Ready, Cloning),
            (Completed, Cloning),
            (Error, Cloning),
            (Cloning, Ready),
            (Cloning, Error),
            // Analysis
            (Ready, Analyzing),
            (Completed, Analyzing),
            (Analyzing, Completed),
            (Analyzing, Error),
            // Tasks canceled or reset while analyzing
            (Analyzing, Ready),
            // Recovery
            (Error, Analyzing),
            (Error, Ready),
            (Completed, Ready),
        ]
        .into_iter()
        .collect();

        Self { allowed }
    }

    pub fn can_transition(&self, from: RepositoryStatus, to: RepositoryStatus) -> bool {
        from != to && self.allowed.contains(&(from, to))
    }

    pub fn validate_transition(&self, from: RepositoryStatus, to: RepositoryStatus) -> Result<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                entity: "repository",
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Validate and log a transition for the given repository.
    pub fn transition(
        &self,
        from: RepositoryStatus,
        to: RepositoryStatus,
        repository_id: RepositoryId,
    ) -> Result<()> {
        match self.validate_transition(from, to) {
            Ok(()) => {
                debug!(repository_id = %repository_id, %from, %to, "Repository transition accepted");
                Ok(())
            }
            Err(e) => {
                debug!(
                    repository_id = %repository_id,
                    %from,
                    %to,
                    error = %e,
                    "Repository transition rejected"
                );
                Err(e)
            }
        }
    }

    pub fn allowed_targets(&self, from: RepositoryStatus) -> Vec<RepositoryStatus> {
        RepositoryStatus::ALL
            .into_iter()
            .filter(|to| self.can_transition(from, *to))
            .collect()
    }
}

impl Default for RepositoryStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RepositoryStatus::{Analyzing, Cloning, Completed, Error, Pending, Ready};

    const LEGAL: [(RepositoryStatus, RepositoryStatus); 14] = [
        (Pending, Cloning),
        (Cloning, Ready),
        (Cloning, Error),
        (Ready, Analyzing),
        (Ready, Cloning),
        (Analyzing, Completed),
        (Analyzing, Error),
        (Analyzing, Ready),
        (Error, Analyzing),
        (Error, Ready),
        (Error, Cloning),
        (Completed, Ready),
        (Completed, Analyzing),
        (Completed, Cloning),
    ];

    #[test]
    fn test_self_transitions_rejected() {
        let sm = RepositoryStateMachine::new();
        for status in RepositoryStatus::ALL {
            assert!(!sm.can_transition(status, status), "{status} -> {status}");
        }
    }

    #[test]
    fn test_transition_table_fidelity() {
        let sm = RepositoryStateMachine::new();
        for from in RepositoryStatus::ALL {
            for to in RepositoryStatus::ALL {
                let expected = LEGAL.contains(&(from, to));
                assert_eq!(
                    sm.validate_transition(from, to).is_ok(),
                    expected,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_pending_only_clones() {
        let sm = RepositoryStateMachine::new();
        assert_eq!(sm.allowed_targets(Pending), vec![Cloning]);
        assert!(sm.allowed_targets(Analyzing).iter().all(|s| *s != Cloning));
    }

    #[test]
    fn test_invalid_transition_names_entity() {
        let sm = RepositoryStateMachine::new();
        let err = sm
            .transition(Pending, Completed, RepositoryId::new(3))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid repository state transition: pending -> completed"
        );
    }

    #[test]
    fn test_status_helpers() {
        assert!(Completed.is_terminal());
        assert!(Error.is_terminal());
        assert!(!Analyzing.is_terminal());
        assert!(Ready.can_execute_tasks());
        assert!(!Cloning.can_execute_tasks());
        assert!(!Pending.can_execute_tasks());
    }
}
