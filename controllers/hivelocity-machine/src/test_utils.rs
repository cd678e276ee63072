//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test machines, an in-memory
//! record store and reconcilers wired to `MockHivelocityClient`.

use crate::config::ReconcileSettings;
use crate::device::DeviceService;
use crate::error::ControllerError;
use crate::reconciler::scope::MachineScope;
use crate::reconciler::Reconciler;
use crate::store::{machine_patch, status_patch, MachineStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crds::*;
use hivelocity_client::mock::fixtures::{DEFAULT_IMAGE, DEFAULT_SSH_KEY_NAME};
use hivelocity_client::MockHivelocityClient;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

pub const TEST_NAMESPACE: &str = "default";
pub const TEST_CLUSTER: &str = "hv-test";
pub const TEST_BOOTSTRAP_DATA: &str = "#cloud-config\nruncmd: []\n";

/// Helper to create a worker HivelocityMachine in `cluster`
pub fn create_test_machine(name: &str, cluster: &str) -> HivelocityMachine {
    let mut labels = BTreeMap::new();
    labels.insert(CLUSTER_NAME_LABEL.to_string(), cluster.to_string());
    HivelocityMachine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: HivelocityMachineSpec {
            provider_id: None,
            device_selector: DeviceSelector::default(),
            image_name: DEFAULT_IMAGE.to_string(),
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            ssh_key_name: Some(DEFAULT_SSH_KEY_NAME.to_string()),
            bootstrap_data_secret: Some(format!("{name}-bootstrap")),
            status: ControllerGeneratedStatus::default(),
        },
        status: None,
    }
}

/// Helper to create a machine already in `state` with a claimed device
pub fn create_claimed_machine(name: &str, device_id: i32, state: ProvisioningState) -> HivelocityMachine {
    let mut machine = create_test_machine(name, TEST_CLUSTER);
    machine.set_device_id(device_id);
    machine.set_provisioning_state(state);
    machine
}

/// Selector on the `deviceType` label
pub fn device_type_selector(device_type: &str) -> DeviceSelector {
    DeviceSelector {
        match_labels: BTreeMap::from([("deviceType".to_string(), device_type.to_string())]),
        match_expressions: Vec::new(),
    }
}

/// Tags as they look on a device claimed by `machine` in `TEST_CLUSTER`
pub fn claimed_tags(machine: &str) -> Vec<String> {
    vec![
        "caphvlabel:deviceType=pool".to_string(),
        "caphv-use=allow".to_string(),
        format!("caphv-cluster-name={TEST_CLUSTER}"),
        "caphv-device-type=pool".to_string(),
        format!("caphv-machine-name={machine}"),
        "caphv-machine-type=worker".to_string(),
    ]
}

pub fn deletion_time() -> Time {
    serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap()
}

type RecordKey = (String, String);

fn key_of(machine: &HivelocityMachine) -> RecordKey {
    (
        machine.metadata.namespace.clone().unwrap_or_default(),
        machine.metadata.name.clone().unwrap_or_default(),
    )
}

/// In-memory `MachineStore` with resource-version conflict detection.
///
/// Writes are applied as JSON merge patches, so fields a patch fails to clear
/// survive here just as they would on the API server.
#[derive(Debug, Default)]
pub struct InMemoryMachineStore {
    machines: Mutex<HashMap<RecordKey, HivelocityMachine>>,
    bootstrap: Mutex<HashMap<RecordKey, String>>,
    patches: Mutex<usize>,
}

impl InMemoryMachineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a machine as version 1
    pub fn insert(&self, mut machine: HivelocityMachine) {
        machine.metadata.resource_version = Some("1".to_string());
        self.machines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key_of(&machine), machine);
    }

    pub fn machine(&self, name: &str) -> Option<HivelocityMachine> {
        self.machines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(TEST_NAMESPACE.to_string(), name.to_string()))
            .cloned()
    }

    /// Publish bootstrap data for a machine
    pub fn set_bootstrap_data(&self, name: &str, data: &str) {
        self.bootstrap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((TEST_NAMESPACE.to_string(), name.to_string()), data.to_string());
    }

    /// Request deletion, as the API server does when a client deletes the object
    pub fn mark_deleted(&self, name: &str) {
        let mut machines = self.machines.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(machine) = machines.get_mut(&(TEST_NAMESPACE.to_string(), name.to_string())) {
            machine.metadata.deletion_timestamp = Some(deletion_time());
        }
    }

    /// Simulate a write by another client
    pub fn bump_version(&self, name: &str) {
        let mut machines = self.machines.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(machine) = machines.get_mut(&(TEST_NAMESPACE.to_string(), name.to_string())) {
            let version: u64 = machine
                .metadata
                .resource_version
                .as_deref()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            machine.metadata.resource_version = Some((version + 1).to_string());
        }
    }

    pub fn patch_count(&self) -> usize {
        *self.patches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MachineStore for InMemoryMachineStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<HivelocityMachine>, ControllerError> {
        Ok(self
            .machines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn patch(&self, machine: &HivelocityMachine) -> Result<HivelocityMachine, ControllerError> {
        *self.patches.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let key = key_of(machine);
        let mut machines = self.machines.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = machines
            .get(&key)
            .ok_or_else(|| ControllerError::Conflict(key.1.clone()))?;
        if stored.metadata.resource_version != machine.metadata.resource_version {
            return Err(ControllerError::Conflict(key.1.clone()));
        }

        let version: u64 = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        // Apply the same merge patches the API server receives
        let mut doc = serde_json::to_value(stored)?;
        json_patch::merge(&mut doc, &machine_patch(machine)?);
        if let Some(status) = &machine.status {
            json_patch::merge(&mut doc, &status_patch(status)?);
        }
        let mut updated: HivelocityMachine = serde_json::from_value(doc)?;
        updated.metadata.resource_version = Some((version + 1).to_string());

        let released = updated.is_being_deleted() && !updated.has_finalizer();
        if released {
            machines.remove(&key);
        } else {
            machines.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn bootstrap_data(&self, machine: &HivelocityMachine) -> Result<Option<String>, ControllerError> {
        Ok(self
            .bootstrap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key_of(machine))
            .cloned())
    }
}

/// Reconciler backed by the mock client and an in-memory store
pub fn create_test_reconciler(client: &MockHivelocityClient, store: &Arc<InMemoryMachineStore>) -> Reconciler {
    Reconciler::new(
        Arc::new(client.clone()),
        Arc::clone(store) as Arc<dyn MachineStore>,
        ReconcileSettings::default(),
    )
}

/// Device service for a single machine at time `now`
pub fn create_test_service(
    client: &MockHivelocityClient,
    store: &Arc<InMemoryMachineStore>,
    machine: HivelocityMachine,
    now: DateTime<Utc>,
) -> DeviceService {
    DeviceService::new(
        Arc::new(client.clone()),
        Arc::clone(store) as Arc<dyn MachineStore>,
        ReconcileSettings::default(),
        MachineScope::new(machine, TEST_CLUSTER.to_string(), now),
    )
}
