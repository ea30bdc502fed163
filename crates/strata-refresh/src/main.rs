//! Operator CLI for the Strata cache layer.
//!
//! Used on cold start or after a cache outage to repopulate `Dragonfly` from
//! `PostgreSQL`, and to inspect what the cache currently holds.
//!
//! # Startup Sequence
//!
//! 1. Parse the command line
//! 2. Load configuration from `strata.yaml` (env vars override)
//! 3. Initialize structured logging (tracing)
//! 4. Connect the cache layer
//! 5. Run the command and close both stores

mod cli;
mod error;

use std::collections::BTreeMap;

use clap::Parser;
use futures::future::try_join_all;
use strata_cache::{CacheLayer, RefreshReport, StrataConfig};
use strata_cache::config::LoggingConfig;
use strata_types::EntityType;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::RefreshError;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, connection or the command fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    run(cli).await?;
    Ok(())
}

async fn run(cli: Cli) -> Result<(), RefreshError> {
    let config = StrataConfig::from_file(&cli.config)?;
    init_logging(&config.logging)?;
    info!(
        config = %cli.config.display(),
        environment = config.environment.as_str(),
        "strata-refresh starting"
    );

    let layer = CacheLayer::connect(&config).await?;
    let outcome = execute(&layer, cli.command, cli.json).await;
    finish(outcome, layer.close().await)
}

/// Combine the command result with the close result. A command failure wins;
/// a close failure after it is only logged.
fn finish(
    outcome: Result<(), RefreshError>,
    closed: strata_cache::CacheResult<()>,
) -> Result<(), RefreshError> {
    match (outcome, closed) {
        (Err(e), Err(close_error)) => {
            tracing::error!(error = %close_error, "Failed to close cache layer");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), closed) => closed.map_err(RefreshError::from),
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<(), RefreshError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| RefreshError::Logging {
        message: e.to_string(),
    })
}

async fn execute(layer: &CacheLayer, command: Command, json: bool) -> Result<(), RefreshError> {
    match command {
        Command::Refresh { customers } => {
            let mut reports: BTreeMap<String, RefreshReport> = BTreeMap::new();
            for customer in customers {
                let report = layer.refresher().refresh(&customer).await?;
                reports.insert(customer, report);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for (customer, report) in &reports {
                    println!(
                        "{customer}: {} records, {} keys written",
                        report.records, report.keys_written
                    );
                }
            }
        }

        Command::Status { customers } => {
            let mut counts: BTreeMap<String, BTreeMap<&'static str, usize>> = BTreeMap::new();
            for customer in customers {
                counts.insert(customer.clone(), type_counts(layer, &customer).await?);
            }
            if json {
                let status = serde_json::json!({ "ready": layer.is_ready(), "entities": counts });
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("ready: {}", layer.is_ready());
                for (customer, by_type) in &counts {
                    let total: usize = by_type.values().copied().fold(0, usize::saturating_add);
                    println!("{customer}: {total} entities");
                    for (name, count) in by_type {
                        println!("  {name:<18} {count}");
                    }
                }
            }
        }

        Command::Flush => {
            layer.flush().await?;
            info!("Cache flushed");
        }
    }
    Ok(())
}

/// Cached entity count for every refreshable type of a customer.
async fn type_counts(
    layer: &CacheLayer,
    customer: &str,
) -> Result<BTreeMap<&'static str, usize>, RefreshError> {
    let counts = try_join_all(EntityType::REFRESHABLE.into_iter().map(|entity_type| async move {
        let count = layer.catalog().count_by_type(customer, entity_type).await?;
        Ok::<_, RefreshError>((entity_type.name().unwrap_or("UNKNOWN"), count))
    }))
    .await?;
    Ok(counts.into_iter().collect())
}
