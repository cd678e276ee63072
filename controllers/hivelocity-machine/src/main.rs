//! HivelocityMachine Controller
//!
//! Binds `HivelocityMachine` resources to Hivelocity bare-metal devices.
//!
//! Devices are claimed by writing ownership tags onto the device itself, so
//! several controller replicas (or clusters) can share one device pool. A
//! claimed device is provisioned with the machine's image and bootstrap data,
//! watched until it is powered on, and on deletion powered off, stripped of
//! its ownership tags and returned to the pool.

mod backoff;
mod config;
mod controller;
mod device;
mod error;
mod reconciler;
mod store;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        warn!("rustls crypto provider already installed: {:?}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting HivelocityMachine Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Hivelocity API: {}", config.api_url);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Default cluster: {}", config.cluster_name.as_deref().unwrap_or("(from machine label)"));
    info!("  Verify grace period: {:?}", config.verify_grace_period);
    info!("  Concurrency: {}", config.concurrency);

    let controller = Controller::new(&config).await?;
    controller.run().await?;

    Ok(())
}
