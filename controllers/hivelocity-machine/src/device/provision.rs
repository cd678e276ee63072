//! Provisioning and drift monitoring of a claimed device

use crate::device::action::ActionResult;
use crate::device::{BOOTSTRAP_REQUEUE, DeviceService, POWER_REQUEUE, PROVISIONED_REQUEUE};
use crate::error::ControllerError;
use crds::{
    ConditionSeverity, MachineAddress, MachineAddressType, CREDENTIALS_AVAILABLE_CONDITION, DEVICE_NOT_FOUND_REASON,
    DEVICE_POWER_OFF_REASON, DEVICE_READY_CONDITION, DEVICE_RELOADING_REASON, DEVICE_TAGS_INVALID_REASON,
    MACHINE_BOOTSTRAP_NOT_READY_REASON, MACHINE_BOOTSTRAP_READY_CONDITION, RATE_LIMIT_EXCEEDED_CONDITION,
    RATE_LIMIT_NOT_REACHED_REASON, SSH_KEY_NOT_FOUND_REASON,
};
use hivelocity_client::{BareMetalDeviceUpdate, DeviceDump, HivelocityError, PowerStatus};
use tracing::{debug, info};

/// Addresses published for a device
pub fn device_addresses(hostname: &str, primary_ip: &str) -> Vec<MachineAddress> {
    let mut addresses = Vec::new();
    if !hostname.is_empty() {
        addresses.push(MachineAddress {
            address_type: MachineAddressType::Hostname,
            address: hostname.to_string(),
        });
    }
    if !primary_ip.is_empty() {
        for address_type in [MachineAddressType::InternalIp, MachineAddressType::ExternalIp] {
            addresses.push(MachineAddress {
                address_type,
                address: primary_ip.to_string(),
            });
        }
    }
    addresses
}

impl DeviceService {
    fn require_device_id(&self) -> Result<i32, ActionResult> {
        match self.claimed_device_id() {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err(ControllerError::MissingProviderId(
                self.scope.name().to_string(),
                self.scope.machine.provisioning_state(),
            )
            .into()),
            Err(err) => Err(err.into()),
        }
    }

    /// The device's machine-owner tag must name this machine
    fn require_ownership(&mut self, device_id: i32, tags: &[String]) -> Result<(), ActionResult> {
        if self.is_owned(tags) {
            return Ok(());
        }
        let reason = format!("machine-owner tag does not name {}", self.scope.name());
        self.scope.machine.status_mut().ready = false;
        self.scope.mark_false(
            DEVICE_READY_CONDITION,
            DEVICE_TAGS_INVALID_REASON,
            ConditionSeverity::Error,
            reason.clone(),
        );
        Err(ControllerError::DeviceTagsInvalid { device_id, reason }.into())
    }

    async fn device_dump(&mut self, device_id: i32) -> Result<DeviceDump, ActionResult> {
        self.client
            .get_device_dump(device_id)
            .await
            .map_err(|err| self.api_error("GetDeviceDump", Some(device_id), err))
    }

    /// Resolve `spec.sshKeyName` to a key ID.
    ///
    /// `Ok(None)` when the machine names no key.
    async fn ssh_key_id(&mut self) -> Result<Option<i32>, ActionResult> {
        let Some(name) = self.scope.machine.spec.ssh_key_name.clone() else {
            return Ok(None);
        };
        let keys = match self.client.list_ssh_keys().await {
            Ok(keys) => keys,
            Err(err) => return Err(self.api_error("ListSSHKeys", None, err)),
        };
        match keys.iter().find(|key| key.name == name) {
            Some(key) => {
                self.scope.mark_true(CREDENTIALS_AVAILABLE_CONDITION);
                Ok(Some(key.ssh_key_id))
            }
            None => {
                let message = format!("SSH key {name:?} not found in Hivelocity");
                self.scope.mark_false(
                    CREDENTIALS_AVAILABLE_CONDITION,
                    SSH_KEY_NOT_FOUND_REASON,
                    ConditionSeverity::Error,
                    message.clone(),
                );
                self.scope.record_warning(SSH_KEY_NOT_FOUND_REASON, message);
                Err(ActionResult::Failed)
            }
        }
    }

    /// Install the image on the claimed device
    pub async fn provision_device(&mut self) -> ActionResult {
        let device_id = match self.require_device_id() {
            Ok(id) => id,
            Err(result) => return result,
        };

        let device = match self.client.get_device(device_id).await {
            Ok(device) => device,
            Err(err) if err.is_not_found() => return ControllerError::DeviceNotFound(device_id).into(),
            Err(err) => return self.api_error("GetDevice", Some(device_id), err),
        };

        // Never reinstall a device whose claim was taken over since verification
        if let Err(result) = self.require_ownership(device_id, &device.tags) {
            return result;
        }

        let bootstrap = match self.store.bootstrap_data(&self.scope.machine).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                self.scope.mark_false(
                    MACHINE_BOOTSTRAP_READY_CONDITION,
                    MACHINE_BOOTSTRAP_NOT_READY_REASON,
                    ConditionSeverity::Info,
                    "bootstrap data is not available yet",
                );
                debug!(machine = %self.scope.name(), "Waiting for bootstrap data");
                return ActionResult::Continue(BOOTSTRAP_REQUEUE);
            }
            Err(err) => return err.into(),
        };
        self.scope.mark_true(MACHINE_BOOTSTRAP_READY_CONDITION);

        let dump = match self.device_dump(device_id).await {
            Ok(dump) => dump,
            Err(result) => return result,
        };
        if dump.is_reload {
            return self.handle_reloading(device_id, dump.power_status).await;
        }
        if dump.power_status == PowerStatus::On {
            // Reprovisioning needs the device off
            if let Err(result) = self.shutdown_debounced(device_id).await {
                return result;
            }
            return ActionResult::Continue(POWER_REQUEUE);
        }

        let public_ssh_key_id = match self.ssh_key_id().await {
            Ok(id) => id,
            Err(result) => return result,
        };

        let update = BareMetalDeviceUpdate {
            hostname: self.scope.name().to_string(),
            tags: device.tags,
            script: bootstrap,
            os_name: self.scope.machine.spec.image_name.clone(),
            public_ssh_key_id,
            force_reload: true,
        };
        if let Err(err) = self.client.provision_device(device_id, &update).await {
            return self.api_error("ProvisionDevice", Some(device_id), err);
        }

        self.scope.mark_false(
            DEVICE_READY_CONDITION,
            DEVICE_RELOADING_REASON,
            ConditionSeverity::Info,
            format!("device {device_id} is being provisioned with {}", update.os_name),
        );
        self.scope.record_event(
            "SuccessfulProvisionDevice",
            format!("provisioning device {device_id} with image {}", update.os_name),
        );
        ActionResult::Complete
    }

    /// Keep a provisioned device healthy and the machine status current
    pub async fn device_provisioned(&mut self) -> ActionResult {
        let device_id = match self.require_device_id() {
            Ok(id) => id,
            Err(result) => return result,
        };

        let device = match self.client.get_device(device_id).await {
            Ok(device) => device,
            Err(err) if err.is_not_found() => {
                self.scope.machine.status_mut().ready = false;
                self.scope.mark_false(
                    DEVICE_READY_CONDITION,
                    DEVICE_NOT_FOUND_REASON,
                    ConditionSeverity::Error,
                    format!("device {device_id} not found"),
                );
                return ControllerError::DeviceNotFound(device_id).into();
            }
            Err(err) => return self.api_error("GetDevice", Some(device_id), err),
        };

        if let Err(result) = self.require_ownership(device_id, &device.tags) {
            return result;
        }

        let dump = match self.device_dump(device_id).await {
            Ok(dump) => dump,
            Err(result) => return result,
        };
        self.scope.machine.status_mut().power_state = Some(dump.power_status.to_string());

        if dump.is_reload {
            return self.handle_reloading(device_id, dump.power_status).await;
        }

        match dump.power_status {
            PowerStatus::Off => {
                match self.client.power_on_device(device_id).await {
                    Ok(()) | Err(HivelocityError::DeviceTurnedOnAlready(_)) => {}
                    Err(err) => return self.api_error("PowerOnDevice", Some(device_id), err),
                }
                self.scope.machine.status_mut().ready = false;
                self.scope.mark_false(
                    DEVICE_READY_CONDITION,
                    DEVICE_POWER_OFF_REASON,
                    ConditionSeverity::Warning,
                    format!("device {device_id} is powered off, powering on"),
                );
                info!(machine = %self.scope.name(), device_id, "Device was off, power on requested");
                ActionResult::Continue(POWER_REQUEUE)
            }
            PowerStatus::Unknown => ActionResult::Continue(POWER_REQUEUE),
            PowerStatus::On => {
                let status = self.scope.machine.status_mut();
                status.ready = true;
                status.addresses = device_addresses(&device.hostname, &device.primary_ip);
                self.scope.mark_true(DEVICE_READY_CONDITION);
                let rate_limited = self
                    .scope
                    .machine
                    .condition(RATE_LIMIT_EXCEEDED_CONDITION)
                    .is_some_and(crds::Condition::is_true);
                if rate_limited {
                    self.scope.mark_false(
                        RATE_LIMIT_EXCEEDED_CONDITION,
                        RATE_LIMIT_NOT_REACHED_REASON,
                        ConditionSeverity::Info,
                        "",
                    );
                }
                ActionResult::Continue(PROVISIONED_REQUEUE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_addresses() {
        let addresses = device_addresses("host-1", "10.0.0.1");
        assert_eq!(addresses.len(), 3);
        assert_eq!(addresses[0].address_type, MachineAddressType::Hostname);
        assert_eq!(addresses[1].address, "10.0.0.1");
        assert_eq!(addresses[2].address_type, MachineAddressType::ExternalIp);

        let addresses = device_addresses("host-1", "");
        assert_eq!(addresses.len(), 1);
    }
}
