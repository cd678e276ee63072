//! HivelocityMachine CRD
//!
//! Declares a machine that must be backed by a bare-metal device from the
//! Hivelocity inventory. The controller claims a device, provisions it and
//! records progress in `spec.status` (controller generated) and `status`.

use crate::conditions::{find_condition, set_condition, Condition, ConditionSeverity};
use crate::device_selector::DeviceSelector;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Finalizer held while a device may still carry this machine's tags
pub const MACHINE_FINALIZER: &str = "hivelocitymachine.infrastructure.cluster.x-k8s.io";

/// Scheme prefix of a provider ID
pub const PROVIDER_ID_PREFIX: &str = "hivelocity://";

/// Label carrying the owning cluster's name
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label present on control-plane machines
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Device type used when `spec.type` is omitted
pub const DEFAULT_DEVICE_TYPE: &str = "pool";

fn default_device_type() -> String {
    DEFAULT_DEVICE_TYPE.to_string()
}

/// Desired state of a HivelocityMachine
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha1",
    kind = "HivelocityMachine",
    namespaced,
    status = "HivelocityMachineStatus",
    shortname = "capihvm"
)]
#[serde(rename_all = "camelCase")]
pub struct HivelocityMachineSpec {
    /// `hivelocity://<deviceId>` once a device is claimed
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Restricts which devices may be claimed
    #[serde(default)]
    pub device_selector: DeviceSelector,

    /// Operating system image to install
    pub image_name: String,

    /// Device type written to the claimed device (e.g. "pool")
    #[serde(rename = "type", default = "default_device_type")]
    pub device_type: String,

    /// Name of the Hivelocity SSH key to install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,

    /// Secret holding the cloud-init bootstrap data under key `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_data_secret: Option<String>,

    /// Controller generated state, not meant to be edited
    #[serde(default)]
    pub status: ControllerGeneratedStatus,
}

/// State persisted by the controller inside the spec
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerGeneratedStatus {
    /// Current step of the provisioning state machine
    #[serde(default)]
    pub provisioning_state: ProvisioningState,

    /// Bumped only when observable state changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Provisioning state of a machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
pub enum ProvisioningState {
    /// Not reconciled yet
    #[default]
    #[serde(rename = "")]
    None,
    /// Pick a device and write the claim tags
    #[serde(rename = "associate-device")]
    AssociateDevice,
    /// Re-read the device and confirm the claim survived
    #[serde(rename = "verify-associate")]
    VerifyAssociate,
    /// Install the image and bootstrap data
    #[serde(rename = "provision-device")]
    ProvisionDevice,
    /// Running; watched for drift
    #[serde(rename = "provisioned")]
    DeviceProvisioned,
    /// Power the device off
    #[serde(rename = "delete-deprovision")]
    DeleteDeviceDeProvision,
    /// Strip the ownership tags
    #[serde(rename = "delete-dissociate")]
    DeleteDeviceDissociate,
    /// Release the finalizer
    #[serde(rename = "delete")]
    DeleteDevice,
}

impl ProvisioningState {
    /// Serialized form; empty for `None`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::AssociateDevice => "associate-device",
            Self::VerifyAssociate => "verify-associate",
            Self::ProvisionDevice => "provision-device",
            Self::DeviceProvisioned => "provisioned",
            Self::DeleteDeviceDeProvision => "delete-deprovision",
            Self::DeleteDeviceDissociate => "delete-dissociate",
            Self::DeleteDevice => "delete",
        }
    }

    /// True for the teardown states
    pub fn is_deleting(self) -> bool {
        matches!(
            self,
            Self::DeleteDeviceDeProvision | Self::DeleteDeviceDissociate | Self::DeleteDevice
        )
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::None {
            f.write_str("none")
        } else {
            f.write_str(self.as_str())
        }
    }
}

/// Observed status of a HivelocityMachine
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HivelocityMachineStatus {
    /// The device is provisioned and powered on
    #[serde(default)]
    pub ready: bool,

    /// Hostname and primary IP of the device
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Last observed power status ("ON" / "OFF")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<String>,

    /// Terminal failure reason, for Cluster API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Human-readable detail for `failure_reason`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Typed conditions, one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// An address assigned to the machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct MachineAddress {
    /// Kind of address
    #[serde(rename = "type")]
    pub address_type: MachineAddressType,
    /// Hostname or IP
    pub address: String,
}

/// Kind of a machine address
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachineAddressType {
    /// Device hostname
    Hostname,
    /// Primary IP, as seen from the cluster
    #[serde(rename = "InternalIP")]
    InternalIp,
    /// Primary IP, as seen from outside
    #[serde(rename = "ExternalIP")]
    ExternalIp,
}

/// Errors converting between provider IDs and device IDs
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderIdError {
    /// Wrong scheme
    #[error("provider ID {0:?} does not start with \"hivelocity://\"")]
    MissingPrefix(String),

    /// Non-numeric device ID
    #[error("provider ID {0:?} does not contain a numeric device ID")]
    InvalidDeviceId(String),
}

/// Format a device ID as a provider ID
pub fn provider_id_from_device_id(device_id: i32) -> String {
    format!("{PROVIDER_ID_PREFIX}{device_id}")
}

/// Parse the device ID out of a provider ID
pub fn device_id_from_provider_id(provider_id: &str) -> Result<i32, ProviderIdError> {
    let id = provider_id
        .strip_prefix(PROVIDER_ID_PREFIX)
        .ok_or_else(|| ProviderIdError::MissingPrefix(provider_id.to_string()))?;
    id.parse()
        .map_err(|_| ProviderIdError::InvalidDeviceId(provider_id.to_string()))
}

impl HivelocityMachine {
    pub fn provisioning_state(&self) -> ProvisioningState {
        self.spec.status.provisioning_state
    }

    pub fn set_provisioning_state(&mut self, state: ProvisioningState) {
        self.spec.status.provisioning_state = state;
    }

    /// Device ID from `spec.providerID`, if one is set
    pub fn device_id(&self) -> Result<Option<i32>, ProviderIdError> {
        self.spec
            .provider_id
            .as_deref()
            .map(device_id_from_provider_id)
            .transpose()
    }

    pub fn set_device_id(&mut self, device_id: i32) {
        self.spec.provider_id = Some(provider_id_from_device_id(device_id));
    }

    pub fn clear_provider_id(&mut self) {
        self.spec.provider_id = None;
    }

    /// True if the machine carries the control-plane label
    pub fn is_control_plane(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(CONTROL_PLANE_LABEL))
    }

    /// Cluster name from the `cluster.x-k8s.io/cluster-name` label
    pub fn cluster_label(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CLUSTER_NAME_LABEL))
            .map(String::as_str)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == MACHINE_FINALIZER))
    }

    pub fn add_finalizer(&mut self) {
        if !self.has_finalizer() {
            self.metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(MACHINE_FINALIZER.to_string());
        }
    }

    pub fn remove_finalizer(&mut self) {
        if let Some(finalizers) = self.metadata.finalizers.as_mut() {
            finalizers.retain(|name| name != MACHINE_FINALIZER);
        }
    }

    pub fn status_mut(&mut self) -> &mut HivelocityMachineStatus {
        self.status.get_or_insert_with(HivelocityMachineStatus::default)
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|status| find_condition(&status.conditions, type_))
    }

    pub fn mark_true(&mut self, type_: &str, now: DateTime<Utc>) {
        set_condition(&mut self.status_mut().conditions, Condition::true_condition(type_, now));
    }

    pub fn mark_false(
        &mut self,
        type_: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        set_condition(
            &mut self.status_mut().conditions,
            Condition::false_condition(type_, reason, severity, message, now),
        );
    }

    /// Restart the age of an existing condition without changing its content
    pub fn touch_condition(&mut self, type_: &str, now: DateTime<Utc>) {
        if let Some(condition) = self
            .status
            .as_mut()
            .and_then(|status| status.conditions.iter_mut().find(|c| c.type_ == type_))
        {
            condition.last_transition_time = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::DEVICE_READY_CONDITION;

    fn machine_from_json(value: serde_json::Value) -> HivelocityMachine {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_spec_defaults() {
        let machine = machine_from_json(serde_json::json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1alpha1",
            "kind": "HivelocityMachine",
            "metadata": { "name": "m1", "namespace": "default" },
            "spec": { "imageName": "Ubuntu 20.x" }
        }));
        assert_eq!(machine.spec.device_type, DEFAULT_DEVICE_TYPE);
        assert_eq!(machine.provisioning_state(), ProvisioningState::None);
        assert!(machine.spec.device_selector.is_empty());
        assert_eq!(machine.device_id(), Ok(None));
    }

    #[test]
    fn test_provisioning_state_wire_format() {
        let json = serde_json::to_value(ProvisioningState::DeleteDeviceDeProvision).unwrap();
        assert_eq!(json, serde_json::json!("delete-deprovision"));
        let none: ProvisioningState = serde_json::from_value(serde_json::json!("")).unwrap();
        assert_eq!(none, ProvisioningState::None);
        assert_eq!(ProvisioningState::DeviceProvisioned.to_string(), "provisioned");
    }

    #[test]
    fn test_provider_id_conversion() {
        assert_eq!(provider_id_from_device_id(42), "hivelocity://42");
        assert_eq!(device_id_from_provider_id("hivelocity://42"), Ok(42));
        assert!(matches!(
            device_id_from_provider_id("aws://42"),
            Err(ProviderIdError::MissingPrefix(_))
        ));
        assert!(matches!(
            device_id_from_provider_id("hivelocity://abc"),
            Err(ProviderIdError::InvalidDeviceId(_))
        ));
    }

    #[test]
    fn test_finalizer_is_idempotent() {
        let mut machine = HivelocityMachine::new("m1", HivelocityMachineSpec {
            provider_id: None,
            device_selector: DeviceSelector::default(),
            image_name: "Ubuntu 20.x".to_string(),
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            ssh_key_name: None,
            bootstrap_data_secret: None,
            status: ControllerGeneratedStatus::default(),
        });
        machine.add_finalizer();
        machine.add_finalizer();
        assert_eq!(machine.metadata.finalizers.as_ref().map(Vec::len), Some(1));
        machine.remove_finalizer();
        assert!(!machine.has_finalizer());
    }

    #[test]
    fn test_mark_condition_creates_status() {
        let mut machine = HivelocityMachine::new("m1", HivelocityMachineSpec {
            provider_id: None,
            device_selector: DeviceSelector::default(),
            image_name: "Ubuntu 20.x".to_string(),
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            ssh_key_name: None,
            bootstrap_data_secret: None,
            status: ControllerGeneratedStatus::default(),
        });
        assert!(machine.condition(DEVICE_READY_CONDITION).is_none());
        machine.mark_true(DEVICE_READY_CONDITION, Utc::now());
        assert!(machine.condition(DEVICE_READY_CONDITION).is_some_and(Condition::is_true));
    }

    #[test]
    fn test_touch_condition_restarts_age() {
        let mut machine = HivelocityMachine::new("m1", HivelocityMachineSpec {
            provider_id: None,
            device_selector: DeviceSelector::default(),
            image_name: "Ubuntu 20.x".to_string(),
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            ssh_key_name: None,
            bootstrap_data_secret: None,
            status: ControllerGeneratedStatus::default(),
        });
        let start = Utc::now();
        let later = start + chrono::Duration::minutes(3);

        // Unknown condition is a no-op
        machine.touch_condition(DEVICE_READY_CONDITION, later);
        assert!(machine.condition(DEVICE_READY_CONDITION).is_none());

        machine.mark_false(DEVICE_READY_CONDITION, "DeviceShutdownCalled", ConditionSeverity::Info, "", start);
        machine.mark_false(DEVICE_READY_CONDITION, "DeviceShutdownCalled", ConditionSeverity::Info, "", later);
        assert_eq!(
            machine.condition(DEVICE_READY_CONDITION).map(|c| c.last_transition_time),
            Some(start)
        );
        machine.touch_condition(DEVICE_READY_CONDITION, later);
        assert_eq!(
            machine.condition(DEVICE_READY_CONDITION).map(|c| c.last_transition_time),
            Some(later)
        );
    }
}
