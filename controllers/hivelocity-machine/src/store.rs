//! Machine record store
//!
//! The reconciler reads a `HivelocityMachine`, works on a copy and writes it
//! back. Writes carry the `resourceVersion` that was read, so a concurrent
//! writer of the same record makes the patch fail with `Conflict` instead of
//! being silently overwritten. Cross-record device races are not the store's
//! concern.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{HivelocityMachine, HivelocityMachineStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::{json, Value};
use tracing::debug;

/// Key of the bootstrap data inside the bootstrap Secret
pub const BOOTSTRAP_DATA_KEY: &str = "value";

/// Access to machine records and their bootstrap data
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Fetch a machine, `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<HivelocityMachine>, ControllerError>;

    /// Write finalizers, spec and status back
    async fn patch(&self, machine: &HivelocityMachine) -> Result<HivelocityMachine, ControllerError>;

    /// Bootstrap data for the machine, `None` until it has been published
    async fn bootstrap_data(&self, machine: &HivelocityMachine) -> Result<Option<String>, ControllerError>;
}

/// Controller-owned spec fields that may be cleared
const CLEARABLE_SPEC_FIELDS: [&str; 1] = ["providerID"];
/// Fields of `spec.status` that may be cleared
const CLEARABLE_CONTROLLER_STATUS_FIELDS: [&str; 1] = ["lastUpdated"];
/// Fields of `status` that may be cleared
const CLEARABLE_STATUS_FIELDS: [&str; 5] = ["addresses", "powerState", "failureReason", "failureMessage", "conditions"];

/// In a merge patch an absent key means "unchanged"; only `null` removes
fn null_absent(value: &mut Value, fields: &[&str]) {
    if let Some(object) = value.as_object_mut() {
        for field in fields {
            object.entry(*field).or_insert(Value::Null);
        }
    }
}

/// Merge patch for metadata and spec.
///
/// Carries the `resourceVersion` that was read, which turns the patch into a
/// conditional write.
pub(crate) fn machine_patch(machine: &HivelocityMachine) -> Result<Value, ControllerError> {
    let mut spec = serde_json::to_value(&machine.spec)?;
    null_absent(&mut spec, &CLEARABLE_SPEC_FIELDS);
    if let Some(controller_status) = spec.get_mut("status") {
        null_absent(controller_status, &CLEARABLE_CONTROLLER_STATUS_FIELDS);
    }
    Ok(json!({
        "metadata": {
            "resourceVersion": machine.metadata.resource_version,
            "finalizers": machine.metadata.finalizers,
        },
        "spec": spec,
    }))
}

/// Merge patch for the status subresource
pub(crate) fn status_patch(status: &HivelocityMachineStatus) -> Result<Value, ControllerError> {
    let mut value = serde_json::to_value(status)?;
    null_absent(&mut value, &CLEARABLE_STATUS_FIELDS);
    Ok(json!({ "status": value }))
}

/// `MachineStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeMachineStore {
    client: Client,
}

impl KubeMachineStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn machines(&self, namespace: &str) -> Api<HivelocityMachine> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn name_and_namespace(machine: &HivelocityMachine) -> Result<(&str, &str), ControllerError> {
    let name = machine.metadata.name.as_deref();
    let namespace = machine.metadata.namespace.as_deref();
    match (name, namespace) {
        (Some(name), Some(namespace)) => Ok((name, namespace)),
        _ => Err(ControllerError::InvalidConfig(
            "HivelocityMachine without name or namespace".to_string(),
        )),
    }
}

fn map_conflict(err: kube::Error, name: &str) -> ControllerError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => ControllerError::Conflict(name.to_string()),
        other => ControllerError::Kube(other),
    }
}

#[async_trait]
impl MachineStore for KubeMachineStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<HivelocityMachine>, ControllerError> {
        Ok(self.machines(namespace).get_opt(name).await?)
    }

    async fn patch(&self, machine: &HivelocityMachine) -> Result<HivelocityMachine, ControllerError> {
        let (name, namespace) = name_and_namespace(machine)?;
        let api = self.machines(namespace);
        let params = PatchParams::default();

        let patch = machine_patch(machine)?;
        debug!("Patching HivelocityMachine {}/{}", namespace, name);
        let mut updated = api
            .patch(name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| map_conflict(e, name))?;

        if let Some(status) = &machine.status {
            let status_patch = status_patch(status)?;
            match api.patch_status(name, &params, &Patch::Merge(&status_patch)).await {
                Ok(patched) => updated = patched,
                // Finalizer removal may have let the object go already
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(map_conflict(e, name)),
            }
        }
        Ok(updated)
    }

    async fn bootstrap_data(&self, machine: &HivelocityMachine) -> Result<Option<String>, ControllerError> {
        let Some(secret_name) = machine.spec.bootstrap_data_secret.as_deref() else {
            return Ok(None);
        };
        let (_, namespace) = name_and_namespace(machine)?;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = secrets.get_opt(secret_name).await? else {
            return Ok(None);
        };
        let value = secret
            .data
            .and_then(|data| data.get(BOOTSTRAP_DATA_KEY).cloned())
            .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned());
        Ok(value)
    }
}
