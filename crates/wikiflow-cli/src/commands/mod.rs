//! CLI command implementations.

pub mod check;
pub mod simulate;

use anyhow::{Context, Result};
use wikiflow_config::{WikiflowConfig, load_config};

/// Load the configuration file if one was given, then apply overrides.
pub fn load(path: Option<&str>, workers: Option<usize>) -> Result<WikiflowConfig> {
    let mut config = match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config file: {}", path))?,
        None => WikiflowConfig::default(),
    };
    if let Some(workers) = workers {
        config.orchestrator.workers = workers;
    }
    Ok(config)
}

pub fn validate(path: &str) -> Result<()> {
    match load_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            let orchestrator = &config.orchestrator;
            println!("  workers:                 {}", orchestrator.workers);
            println!("  queue capacity:          {}", orchestrator.queue_capacity);
            println!(
                "  priority queue capacity: {}",
                orchestrator.priority_queue_capacity
            );
            println!("  retry capacity:          {}", orchestrator.retry_capacity);
            println!("  retry interval:          {:?}", orchestrator.retry_interval);
            println!("  job max retries:         {}", config.job_defaults.max_retries);
            println!("  job timeout:             {:?}", config.job_defaults.timeout);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
