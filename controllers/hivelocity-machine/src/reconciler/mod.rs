//! Reconciliation of HivelocityMachine resources.
//!
//! One invocation reads the machine, runs the state machine on a working
//! copy, manages the finalizer and writes the record back if anything
//! changed. Nothing is cached between invocations except the dispatcher's
//! error backoff.

pub mod scope;

use crate::backoff::BackoffRegistry;
use crate::config::ReconcileSettings;
use crate::device::state_machine::reconcile_state;
use crate::device::DeviceService;
use crate::error::ControllerError;
use crate::store::MachineStore;
use chrono::{DateTime, Utc};
use crds::{HivelocityMachine, ProvisioningState, CLUSTER_NAME_LABEL};
use hivelocity_client::HivelocityClientTrait;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use scope::MachineScope;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Requeue delay after losing an optimistic-concurrency race on the record
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// What the dispatcher should do after a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Reconcile again after the delay
    Requeue(Duration),
    /// Teardown finished and the finalizer was removed
    Released,
    /// The machine no longer exists (or is not ours to finish)
    Gone,
}

/// Reconciles HivelocityMachine resources.
pub struct Reconciler {
    client: Arc<dyn HivelocityClientTrait>,
    store: Arc<dyn MachineStore>,
    settings: ReconcileSettings,
    backoff: BackoffRegistry,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("api", &self.client.base_url())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn record_key(machine: &HivelocityMachine) -> (String, String) {
    (machine.namespace().unwrap_or_default(), machine.name_any())
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn HivelocityClientTrait>,
        store: Arc<dyn MachineStore>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            client,
            store,
            settings,
            backoff: BackoffRegistry::default(),
        }
    }

    /// Reconcile one machine at time `now`
    pub async fn reconcile_machine(
        &self,
        namespace: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let Some(original) = self.store.get(namespace, name).await? else {
            debug!("HivelocityMachine {}/{} not found", namespace, name);
            return Ok(ReconcileOutcome::Gone);
        };
        if original.is_being_deleted() && !original.has_finalizer() {
            return Ok(ReconcileOutcome::Gone);
        }

        let mut machine = original.clone();
        if !machine.is_being_deleted() {
            machine.add_finalizer();
        }

        let cluster_name = machine
            .cluster_label()
            .map(str::to_string)
            .or_else(|| self.settings.default_cluster_name.clone())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "HivelocityMachine {namespace}/{name} has no {CLUSTER_NAME_LABEL} label and CLUSTER_NAME is not set"
                ))
            })?;

        let scope = MachineScope::new(machine, cluster_name, now);
        let mut service = DeviceService::new(
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            self.settings.clone(),
            scope,
        );
        let entered = service.scope.machine.provisioning_state();
        let result = reconcile_state(&mut service).await;
        let (mut machine, _) = service.into_scope().into_parts();

        // Only a completed DeleteDevice pass releases the record
        let released = machine.is_being_deleted()
            && entered == ProvisioningState::DeleteDevice
            && result.is_complete();
        if released {
            machine.remove_finalizer();
        }

        if serde_json::to_value(&machine)? != serde_json::to_value(&original)? {
            debug!("Writing back HivelocityMachine {}/{}", namespace, name);
            self.store.patch(&machine).await?;
        }

        if released {
            info!("HivelocityMachine {}/{} released", namespace, name);
            return Ok(ReconcileOutcome::Released);
        }
        Ok(ReconcileOutcome::Requeue(result.into_requeue()?))
    }

    /// Entry point for the watcher
    pub async fn reconcile(&self, machine: &HivelocityMachine) -> Result<Action, ControllerError> {
        let (namespace, name) = record_key(machine);
        let key = format!("{namespace}/{name}");

        match self.reconcile_machine(&namespace, &name, Utc::now()).await {
            Ok(ReconcileOutcome::Requeue(delay)) => {
                self.backoff.reset(&key);
                Ok(Action::requeue(delay))
            }
            Ok(ReconcileOutcome::Released | ReconcileOutcome::Gone) => {
                self.backoff.forget(&key);
                Ok(Action::await_change())
            }
            Err(ControllerError::Conflict(_)) => {
                debug!("HivelocityMachine {} changed while reconciling, retrying", key);
                Ok(Action::requeue(CONFLICT_REQUEUE))
            }
            Err(e) => Err(e),
        }
    }

    /// Backoff delay for a failed reconciliation
    pub fn error_delay(&self, machine: &HivelocityMachine) -> Duration {
        let (namespace, name) = record_key(machine);
        self.backoff.record_error(&format!("{namespace}/{name}"))
    }
}
