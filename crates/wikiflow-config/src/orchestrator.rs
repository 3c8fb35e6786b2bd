//! Orchestrator configuration parsing.
//!
//! ```kdl
//! orchestrator {
//!     workers 2
//!     queue-capacity 100
//!     priority-queue-capacity 20
//!     retry-capacity 100
//!     retry-interval-ms 2000
//! }
//! job-defaults {
//!     max-retries 3
//!     timeout-secs 600
//! }
//! ```
//!
//! Every field is optional. Unknown nodes are ignored.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for the orchestrator's queues, workers and retry timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of worker tasks. Kept small to bound pressure on rate-limited
    /// LLM providers.
    pub workers: usize,
    /// Capacity of the normal-priority queue.
    pub queue_capacity: usize,
    /// Capacity of the priority queue.
    pub priority_queue_capacity: usize,
    /// Maximum number of jobs parked in the retry scheduler.
    pub retry_capacity: usize,
    /// Period of the retry timer, and the delay before a deferred job is
    /// offered again.
    pub retry_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 100,
            priority_queue_capacity: 20,
            retry_capacity: 100,
            retry_interval: Duration::from_secs(2),
        }
    }
}

/// Defaults applied to jobs built from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefaults {
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiflowConfig {
    pub orchestrator: OrchestratorConfig,
    pub job_defaults: JobDefaults,
}

/// Parse a configuration from KDL text.
pub fn parse_config(kdl: &str) -> ConfigResult<WikiflowConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = WikiflowConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "orchestrator" => parse_orchestrator(node, &mut config.orchestrator)?,
            "job-defaults" | "job_defaults" => parse_job_defaults(node, &mut config.job_defaults)?,
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Read and parse a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<WikiflowConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

fn parse_orchestrator(node: &KdlNode, config: &mut OrchestratorConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "workers" => config.workers = get_count_arg(child)?,
            "queue-capacity" => config.queue_capacity = get_count_arg(child)?,
            "priority-queue-capacity" => {
                config.priority_queue_capacity = get_count_arg(child)?
            }
            "retry-capacity" => config.retry_capacity = get_count_arg(child)?,
            "retry-interval-ms" => {
                config.retry_interval = Duration::from_millis(get_positive_arg(child)?)
            }
            _ => {}
        }
    }

    Ok(())
}

fn parse_job_defaults(node: &KdlNode, defaults: &mut JobDefaults) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "max-retries" => {
                let value = get_int_arg(child)?;
                defaults.max_retries = u32::try_from(value).map_err(|_| ConfigError::InvalidValue {
                    field: "max-retries".to_string(),
                    message: format!("must be between 0 and {}, got {}", u32::MAX, value),
                })?;
            }
            "timeout-secs" => defaults.timeout = Duration::from_secs(get_positive_arg(child)?),
            "timeout-ms" => defaults.timeout = Duration::from_millis(get_positive_arg(child)?),
            _ => {}
        }
    }

    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn get_int_arg(node: &KdlNode) -> ConfigResult<i128> {
    let field = node.name().value();
    let entry = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;

    entry
        .value()
        .as_integer()
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected an integer, got {}", entry.value()),
        })
}

fn get_positive_arg(node: &KdlNode) -> ConfigResult<u64> {
    let value = get_int_arg(node)?;
    match u64::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::InvalidValue {
            field: node.name().value().to_string(),
            message: format!("must be a positive integer, got {}", value),
        }),
    }
}

fn get_count_arg(node: &KdlNode) -> ConfigResult<usize> {
    let value = get_positive_arg(node)?;
    usize::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: node.name().value().to_string(),
        message: format!("must be at most {}, got {}", usize::MAX, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, WikiflowConfig::default());
        assert_eq!(config.orchestrator.workers, 2);
        assert_eq!(config.orchestrator.queue_capacity, 100);
        assert_eq!(config.orchestrator.priority_queue_capacity, 20);
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            orchestrator {
                workers 4
                queue-capacity 50
                priority-queue-capacity 10
                retry-capacity 30
                retry-interval-ms 250
            }

            job-defaults {
                max-retries 0
                timeout-secs 30
            }
        "#;

        let config = parse_config(kdl).unwrap();
        assert_eq!(config.orchestrator.workers, 4);
        assert_eq!(config.orchestrator.queue_capacity, 50);
        assert_eq!(config.orchestrator.priority_queue_capacity, 10);
        assert_eq!(config.orchestrator.retry_capacity, 30);
        assert_eq!(
            config.orchestrator.retry_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.job_defaults.max_retries, 0);
        assert_eq!(config.job_defaults.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let kdl = r#"
            orchestrator {
                workers 1
            }
        "#;

        let config = parse_config(kdl).unwrap();
        assert_eq!(config.orchestrator.workers, 1);
        assert_eq!(config.orchestrator.retry_interval, Duration::from_secs(2));
        assert_eq!(config.job_defaults, JobDefaults::default());
    }

    #[test]
    fn test_timeout_in_millis() {
        let kdl = r#"
            job-defaults {
                timeout-ms 1500
            }
        "#;

        let config = parse_config(kdl).unwrap();
        assert_eq!(config.job_defaults.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let kdl = r#"
            orchestrator {
                workers 0
            }
        "#;

        let result = parse_config(kdl);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { field, .. } if field == "workers"
        ));
    }

    #[test]
    fn test_negative_retries_rejected() {
        let kdl = r#"
            job-defaults {
                max-retries -1
            }
        "#;

        assert!(matches!(
            parse_config(kdl).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_non_integer_value_rejected() {
        let kdl = r#"
            orchestrator {
                queue-capacity "lots"
            }
        "#;

        assert!(matches!(
            parse_config(kdl).unwrap_err(),
            ConfigError::InvalidValue { field, .. } if field == "queue-capacity"
        ));
    }

    #[test]
    fn test_missing_value_rejected() {
        let kdl = r#"
            orchestrator {
                workers
            }
        "#;

        assert!(matches!(
            parse_config(kdl).unwrap_err(),
            ConfigError::MissingField(_)
        ));
    }

    #[test]
    fn test_invalid_kdl_rejected() {
        assert!(matches!(
            parse_config("orchestrator {").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_unknown_nodes_ignored() {
        let kdl = r#"
            server port=8080
            orchestrator {
                workers 3
                colour "blue"
            }
        "#;

        let config = parse_config(kdl).unwrap();
        assert_eq!(config.orchestrator.workers, 3);
    }
}
