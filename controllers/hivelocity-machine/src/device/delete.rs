//! Teardown handlers

use crate::device::action::ActionResult;
use crate::device::claim::unwind_claim_tags;
use crate::device::{DeviceService, POWER_REQUEUE};
use hivelocity_client::tag::remove_ephemeral_tags;
use hivelocity_client::PowerStatus;
use tracing::info;

impl DeviceService {
    /// Shut the device down and strip every controller tag from it
    pub async fn delete_deprovision(&mut self) -> ActionResult {
        let device_id = match self.claimed_device_id() {
            Ok(Some(id)) => id,
            Ok(None) => return ActionResult::Complete,
            Err(err) => return err.into(),
        };

        let device = match self.client.get_device(device_id).await {
            Ok(device) => device,
            Err(err) if err.is_not_found() => {
                info!(machine = %self.scope.name(), device_id, "Device already gone");
                return ActionResult::Complete;
            }
            Err(err) => return self.api_error("GetDevice", Some(device_id), err),
        };

        // Someone else owns the device now; leave it alone
        if !self.is_owned(&device.tags) {
            info!(machine = %self.scope.name(), device_id, "Device no longer tagged for this machine");
            return ActionResult::Complete;
        }

        let dump = match self.client.get_device_dump(device_id).await {
            Ok(dump) => dump,
            Err(err) => return self.api_error("GetDeviceDump", Some(device_id), err),
        };

        match dump.power_status {
            PowerStatus::On => {
                if let Err(result) = self.shutdown_debounced(device_id).await {
                    return result;
                }
                ActionResult::Continue(POWER_REQUEUE)
            }
            PowerStatus::Off => {
                let (tags, changed) = remove_ephemeral_tags(&device.tags);
                if changed {
                    if let Err(err) = self.client.set_device_tags(device_id, &tags).await {
                        return self.api_error("SetDeviceTags", Some(device_id), err);
                    }
                }
                self.scope
                    .record_event("SuccessfulDeprovisionDevice", format!("released device {device_id}"));
                ActionResult::Complete
            }
            PowerStatus::Unknown => ActionResult::Continue(POWER_REQUEUE),
        }
    }

    /// Remove this machine's claim from a device that was never provisioned
    pub async fn delete_dissociate(&mut self) -> ActionResult {
        let device_id = match self.claimed_device_id() {
            Ok(Some(id)) => id,
            Ok(None) => return ActionResult::Complete,
            Err(err) => return err.into(),
        };

        match self.client.get_device(device_id).await {
            Ok(device) => {
                let (tags, changed) = unwind_claim_tags(&device.tags, &self.scope.cluster_name, self.scope.name());
                if changed {
                    if let Err(err) = self.client.set_device_tags(device_id, &tags).await {
                        return self.api_error("SetDeviceTags", Some(device_id), err);
                    }
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return self.api_error("GetDevice", Some(device_id), err),
        }

        self.scope.machine.clear_provider_id();
        self.scope
            .record_event("SuccessfulDissociateDevice", format!("dissociated device {device_id}"));
        ActionResult::Complete
    }

    /// Nothing is left on the device side
    #[allow(clippy::unused_async, reason = "uniform handler signature")]
    pub async fn delete_device(&mut self) -> ActionResult {
        self.scope.record_event("DeleteDevice", "device released, removing finalizer");
        ActionResult::Complete
    }
}
