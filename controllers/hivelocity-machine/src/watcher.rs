//! HivelocityMachine watcher.
//!
//! Drives the reconciler from a `kube_runtime::Controller`, which handles
//! reconnection, debouncing and per-object serialization of reconciles.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::HivelocityMachine;
use futures::StreamExt;
use kube::Api;
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const DEBOUNCE: Duration = Duration::from_secs(5);

/// Watches HivelocityMachine resources and reconciles them.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    api: Api<HivelocityMachine>,
    concurrency: u16,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, api: Api<HivelocityMachine>, concurrency: u16) -> Self {
        Self {
            reconciler,
            api,
            concurrency,
        }
    }

    /// Run until the watch stream ends.
    pub async fn watch_machines(self) -> Result<(), ControllerError> {
        info!("Starting HivelocityMachine watcher");

        let error_policy = |obj: Arc<HivelocityMachine>, error: &ControllerError, ctx: Arc<Reconciler>| {
            let delay = ctx.error_delay(&obj);
            error!(
                "Reconciliation error for HivelocityMachine {}/{}: {}, retrying in {:?}",
                obj.metadata.namespace.as_deref().unwrap_or_default(),
                obj.metadata.name.as_deref().unwrap_or_default(),
                error,
                delay
            );
            Action::requeue(delay)
        };

        let reconcile = |obj: Arc<HivelocityMachine>, ctx: Arc<Reconciler>| async move {
            debug!(
                "Reconciling HivelocityMachine {}/{}",
                obj.metadata.namespace.as_deref().unwrap_or_default(),
                obj.metadata.name.as_deref().unwrap_or_default()
            );
            ctx.reconcile(&obj).await
        };

        // One reconcile per object at a time; distinct machines run in parallel
        let controller_config = ControllerConfig::default()
            .debounce(DEBOUNCE)
            .concurrency(self.concurrency);

        Controller::new(self.api, watcher::Config::default())
            .with_config(controller_config)
            .run(reconcile, error_policy, self.reconciler)
            .for_each(|res| async move {
                if let Err(e) = res {
                    error!("Controller error for HivelocityMachine: {}", e);
                }
            })
            .await;

        Ok(())
    }
}
