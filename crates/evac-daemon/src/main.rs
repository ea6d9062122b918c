//! Evac Daemon - evacuation routing service
//!
//! The evac daemon runs:
//! - a hazard alert consumer that updates node safety flags
//! - a danger report consumer that computes and persists routes
//! - a relay that fans routes-ready batches out to affected users

use anyhow::Context;
use clap::Parser;
use evac_daemon::config::StorageConfig;
use evac_daemon::{DaemonConfig, InMemoryTransport, Server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Evac Daemon CLI
#[derive(Parser)]
#[command(name = "evacd")]
#[command(about = "Evac Daemon - evacuation routing service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "EVAC_CONFIG")]
    config: Option<String>,

    /// Danger rule file (overrides rules.path)
    #[arg(short, long, env = "EVAC_RULES")]
    rules: Option<PathBuf>,

    /// JSON map used to seed in-memory storage
    #[arg(short, long, env = "EVAC_SEED")]
    seed: Option<PathBuf>,

    /// Log level (overrides logging.level)
    #[arg(long, env = "EVAC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "EVAC_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Override with CLI args
    if let Some(rules) = cli.rules {
        config.rules.path = rules;
    }
    if let Some(seed) = cli.seed {
        match &mut config.storage {
            StorageConfig::Memory { seed: slot } => *slot = Some(seed),
            StorageConfig::Postgres { .. } => {
                anyhow::bail!("--seed only applies to in-memory storage")
            }
        }
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        rules = %config.rules.path.display(),
        alerts = %config.queues.alerts,
        danger_reports = %config.queues.danger_reports,
        "Starting evac daemon"
    );

    // Queue broker integration lives outside this binary
    let transport = Arc::new(InMemoryTransport::new());
    let server = Server::new(config, transport)
        .await
        .context("Failed to start server")?;
    server.run().await?;
    Ok(())
}
