//! State machine and aggregation commands.

use crate::Entity;
use anyhow::Result;
use wikiflow_core::{
    RepositoryId, RepositoryStateMachine, RepositoryStatus, StatusAggregator, TaskStateMachine,
    TaskStatus, TaskStatusSummary,
};

pub fn transition(entity: Entity, from: &str, to: &str) -> Result<()> {
    let result = match entity {
        Entity::Task => {
            let (from, to) = (parse::<TaskStatus>(from)?, parse::<TaskStatus>(to)?);
            let sm = TaskStateMachine::new();
            sm.validate_transition(from, to).map_err(|e| {
                let targets: Vec<String> =
                    sm.allowed_targets(from).iter().map(|s| s.to_string()).collect();
                (e, targets)
            })
        }
        Entity::Repository => {
            let (from, to) = (
                parse::<RepositoryStatus>(from)?,
                parse::<RepositoryStatus>(to)?,
            );
            let sm = RepositoryStateMachine::new();
            sm.validate_transition(from, to).map_err(|e| {
                let targets: Vec<String> =
                    sm.allowed_targets(from).iter().map(|s| s.to_string()).collect();
                (e, targets)
            })
        }
    };

    match result {
        Ok(()) => {
            println!("✓ {} -> {} is allowed", from, to);
            Ok(())
        }
        Err((e, targets)) => {
            println!("✗ {}", e);
            println!("  allowed from {}: {}", from, targets.join(", "));
            std::process::exit(1);
        }
    }
}

pub fn aggregate(current: &str, statuses: &[String]) -> Result<()> {
    let current = parse::<RepositoryStatus>(current)?;
    let statuses = statuses
        .iter()
        .map(|s| parse::<TaskStatus>(s))
        .collect::<Result<Vec<_>>>()?;
    let summary = TaskStatusSummary::from_statuses(statuses);

    let aggregation =
        StatusAggregator::new().aggregate_status(current, &summary, RepositoryId::new(0));

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("{} -> {}", current, aggregation.status);
    if let Some(warning) = aggregation.warning {
        println!("warning: {}", warning);
    }
    Ok(())
}

fn parse<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.trim().parse::<T>().map_err(anyhow::Error::msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_case_insensitive() {
        assert_eq!(parse::<TaskStatus>(" Queued ").unwrap(), TaskStatus::Queued);
        assert_eq!(
            parse::<RepositoryStatus>("ANALYZING").unwrap(),
            RepositoryStatus::Analyzing
        );
    }

    #[test]
    fn test_parse_unknown_status() {
        assert!(parse::<TaskStatus>("done").is_err());
    }

    #[test]
    fn test_aggregate_accepts_valid_input() {
        let statuses = vec!["succeeded".to_string(), "running".to_string()];
        assert!(aggregate("ready", &statuses).is_ok());
        assert!(aggregate("bogus", &statuses).is_err());
    }
}
