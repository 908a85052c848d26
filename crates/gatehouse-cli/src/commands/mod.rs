//! Subcommand implementations.

pub mod config;
pub mod queue;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use gatehouse_controller::GateConfig;
use tokio::task::JoinHandle;
use tracing::warn;

/// Load and validate the configuration at `path`.
pub fn load_config(path: &Path) -> Result<GateConfig> {
    let config = GateConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

/// Wait for the MQTT event loop task after its token was cancelled.
pub async fn join_event_loop(event_loop: JoinHandle<()>) {
    if let Err(e) = event_loop.await {
        warn!(error = %e, "mqtt event loop ended abnormally");
    }
}
