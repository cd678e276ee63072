//! Main controller implementation.
//!
//! Wires the Kubernetes client, the Hivelocity client, the record store and
//! the watcher together and runs until the watcher exits or the process is
//! interrupted.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::store::{KubeMachineStore, MachineStore};
use crate::watcher::Watcher;
use crds::HivelocityMachine;
use hivelocity_client::{HivelocityClient, HivelocityClientTrait};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for HivelocityMachine resources.
pub struct Controller {
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts watching.
    pub async fn new(config: &ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing HivelocityMachine Controller");

        let kube_client = Client::try_default().await?;

        let hivelocity_client = HivelocityClient::new(config.api_url.clone(), config.api_key.clone())?;
        if let Err(e) = hivelocity_client.validate_token().await {
            error!("Hivelocity API key rejected by {}: {}", config.api_url, e);
            return Err(e.into());
        }
        info!("Hivelocity API key validated");

        let machines: Api<HivelocityMachine> = match config.namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };
        let store: Arc<dyn MachineStore> = Arc::new(KubeMachineStore::new(kube_client));
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(hivelocity_client),
            store,
            config.reconcile_settings(),
        ));

        let watcher = Watcher::new(reconciler, machines, config.concurrency);
        let machine_watcher = tokio::spawn(async move { watcher.watch_machines().await });

        Ok(Self { machine_watcher })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("HivelocityMachine Controller running");

        tokio::select! {
            result = &mut self.machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("HivelocityMachine watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("HivelocityMachine watcher error: {e}")))?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                self.machine_watcher.abort();
            }
        }

        Ok(())
    }
}
