//! Treadmill master
//!
//! The master owns placement for one cell. It elects itself leader through
//! the coordination store, loads the cell model, and reconciles placement
//! as servers, apps and policy change.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use treadmill_master::{bootstrap, config, Master};
use treadmill_store::{Backend, BackoffPolicy, MemoryBackend, PgBackend, StoreAdapter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to TREADMILL_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(cell = %config.master.cell, "Starting treadmill master");

    let store: Arc<dyn Backend> = match config.backend {
        config::BackendKind::Memory => {
            info!("Using in-memory coordination store");
            Arc::new(StoreAdapter::new(MemoryBackend::new(), BackoffPolicy::default()))
        }
        config::BackendKind::Postgres => match PgBackend::connect(&config.database).await {
            Ok(pg) => {
                info!("Database connection established");
                Arc::new(StoreAdapter::new(pg, BackoffPolicy::default()))
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to database");
                return Err(e.into());
            }
        },
    };

    if let Some(path) = &config.bootstrap_file {
        let seed = bootstrap::load_seed(path)?;
        bootstrap::apply_seed(store.as_ref(), &seed).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let master = Master::new(store, config.master.clone());
    let mut master_handle = tokio::spawn(master.run(shutdown_rx));

    let exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            None
        }
        result = &mut master_handle => Some(result),
    };

    let result = match exit {
        Some(result) => result,
        None => {
            let _ = shutdown_tx.send(true);
            info!("Waiting for master to shut down...");
            match tokio::time::timeout(std::time::Duration::from_secs(10), master_handle).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Master did not shut down in time");
                    return Ok(());
                }
            }
        }
    };

    match result {
        Ok(Ok(())) => {
            info!("Master shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Master failed");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "Master task panicked");
            Err(e.into())
        }
    }
}
