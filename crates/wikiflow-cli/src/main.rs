//! wikiflow CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "wikiflow")]
#[command(about = "wikiflow task orchestration CLI", long_about = None)]
struct Cli {
    /// Path to the KDL configuration file
    #[arg(long, env = "WIKIFLOW_CONFIG", global = true)]
    config: Option<String>,

    /// Override the configured number of workers
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print the effective settings
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "wikiflow.kdl")]
        path: String,
    },
    /// Check whether a status transition is legal
    Check {
        /// Which state machine to check against
        entity: Entity,
        /// Current status
        from: String,
        /// Target status
        to: String,
    },
    /// Derive a repository status from task statuses
    Aggregate {
        /// Current repository status
        current: String,
        /// Comma-separated task statuses
        #[arg(long, value_delimiter = ',')]
        statuses: Vec<String>,
    },
    /// Run a synthetic workload through the orchestrator
    Simulate {
        /// Number of repositories
        #[arg(long, default_value = "3")]
        repos: u64,
        /// Tasks per repository
        #[arg(long, default_value = "4")]
        tasks: u64,
        /// Fail every k-th task
        #[arg(long)]
        fail_every: Option<u64>,
        /// Simulated work per task in milliseconds
        #[arg(long, default_value = "200")]
        work_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Entity {
    Task,
    Repository,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Check { entity, from, to } => {
            commands::check::transition(entity, &from, &to)?;
        }
        Commands::Aggregate { current, statuses } => {
            commands::check::aggregate(&current, &statuses)?;
        }
        Commands::Simulate {
            repos,
            tasks,
            fail_every,
            work_ms,
        } => {
            let config = commands::load(cli.config.as_deref(), cli.workers)?;
            let options = commands::simulate::Options {
                repos,
                tasks,
                fail_every,
                work: std::time::Duration::from_millis(work_ms),
            };
            commands::simulate::run(config, options).await?;
        }
    }

    Ok(())
}
