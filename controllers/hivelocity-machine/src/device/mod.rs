//! Device service
//!
//! Everything that touches a single machine's device: the matcher, the
//! two-phase claim, provisioning, drift monitoring, teardown and the
//! timeout policy. Handlers never call the remote API in a loop; waiting is
//! expressed as `ActionResult::Continue` and left to the dispatcher.

pub mod action;
pub mod claim;
pub mod delete;
pub mod labels;
pub mod matcher;
pub mod provision;
pub mod state_machine;
pub mod timeout;

use crate::config::ReconcileSettings;
use crate::device::action::ActionResult;
use crate::error::ControllerError;
use crate::reconciler::scope::MachineScope;
use crate::store::MachineStore;
use hivelocity_client::{DeviceTag, DeviceTagKey, HivelocityClientTrait, HivelocityError};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Requeue delay when no device is eligible
pub const NO_DEVICE_REQUEUE: Duration = Duration::from_secs(30);
/// Requeue delay while bootstrap data is missing
pub const BOOTSTRAP_REQUEUE: Duration = Duration::from_secs(10);
/// Requeue delay while waiting for power or reload changes
pub const POWER_REQUEUE: Duration = Duration::from_secs(30);
/// Drift check interval for provisioned machines
pub const PROVISIONED_REQUEUE: Duration = Duration::from_secs(5 * 60);
/// Requeue delay after a transient API failure
pub const TRANSIENT_REQUEUE: Duration = Duration::from_secs(30);

/// Handle to one machine and the collaborators its handlers need
pub struct DeviceService {
    pub(crate) client: Arc<dyn HivelocityClientTrait>,
    pub(crate) store: Arc<dyn MachineStore>,
    pub(crate) settings: ReconcileSettings,
    pub scope: MachineScope,
}

impl std::fmt::Debug for DeviceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceService")
            .field("api", &self.client.base_url())
            .field("settings", &self.settings)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl DeviceService {
    pub fn new(
        client: Arc<dyn HivelocityClientTrait>,
        store: Arc<dyn MachineStore>,
        settings: ReconcileSettings,
        scope: MachineScope,
    ) -> Self {
        Self {
            client,
            store,
            settings,
            scope,
        }
    }

    pub fn into_scope(self) -> MachineScope {
        self.scope
    }

    /// Device ID of the claimed device, if any
    pub(crate) fn claimed_device_id(&self) -> Result<Option<i32>, ControllerError> {
        Ok(self.scope.machine.device_id()?)
    }

    /// `caphv-machine-name=<this machine>`
    pub(crate) fn machine_tag(&self) -> DeviceTag {
        DeviceTag::new(DeviceTagKey::MachineName, self.scope.name())
    }

    /// `caphv-cluster-name=<this cluster>`
    pub(crate) fn cluster_tag(&self) -> DeviceTag {
        DeviceTag::new(DeviceTagKey::ClusterName, self.scope.cluster_name.as_str())
    }

    /// True if the device's machine-owner tag names this machine
    pub(crate) fn is_owned(&self, tags: &[String]) -> bool {
        DeviceTagKey::MachineName
            .find_in(tags)
            .is_ok_and(|tag| tag.value == self.scope.name())
    }

    /// Turn a failed remote call into an outcome.
    ///
    /// Rate limiting is recorded on the machine but does not change the
    /// outcome: transient failures continue later, the rest are errors.
    pub(crate) fn api_error(&mut self, operation: &str, device_id: Option<i32>, err: HivelocityError) -> ActionResult {
        warn!(
            machine = %self.scope.name(),
            operation,
            device_id = ?device_id,
            "Hivelocity call failed: {}",
            err
        );
        if err.is_rate_limit() {
            self.scope.mark_rate_limited(operation);
        }
        if err.is_transient() {
            ActionResult::Continue(TRANSIENT_REQUEUE)
        } else {
            ActionResult::Error(err.into())
        }
    }
}
