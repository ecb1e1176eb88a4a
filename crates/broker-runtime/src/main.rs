//! # Courier-MQ Broker
//!
//! Runs the paging and large-message core until Ctrl+C.
//!
//! ## Startup Sequence
//!
//! 1. Install logging (`RUST_LOG` overrides the default `info` level)
//! 2. Load configuration from the environment
//! 3. Start the runtime: open paging directory, reload stores, recover
//!    prepared transactions, spawn the reclaimer
//! 4. Wait for Ctrl+C, then shut down in order

use anyhow::{Context, Result};
use broker_runtime::{load_config, BrokerRuntime};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config().context("Invalid broker configuration")?;

    let runtime = BrokerRuntime::start(config).await?;

    info!("Broker is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await
}
