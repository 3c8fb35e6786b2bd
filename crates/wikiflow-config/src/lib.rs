//! KDL configuration parsing for the wikiflow orchestrator.
//!
//! This crate handles parsing of:
//! - Orchestrator settings (worker count, queue capacities, retry timer)
//! - Per-job defaults (retry budget, execution timeout)

pub mod error;
pub mod orchestrator;

pub use error::{ConfigError, ConfigResult};
pub use orchestrator::{JobDefaults, OrchestratorConfig, WikiflowConfig, load_config, parse_config};
