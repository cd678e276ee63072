//! Two-phase device claim
//!
//! The device API has no compare-and-swap, so a claim is written as tags and
//! confirmed only after a grace period by reading the device back. A claim
//! that lost a race is unwound and the machine starts over; exclusivity is
//! detected, not prevented.

use crate::device::action::ActionResult;
use crate::device::matcher::find_eligible;
use crate::device::{DeviceService, NO_DEVICE_REQUEUE};
use chrono::Duration as ChronoDuration;
use crds::{
    ConditionSeverity, ProvisioningState, DEVICE_ASSOCIATE_SUCCEEDED_CONDITION, INVALID_DEVICE_SELECTOR_REASON,
    NO_AVAILABLE_DEVICE_REASON,
};
use hivelocity_client::{DeviceTag, DeviceTagKey};
use tracing::{debug, info};

/// Keys written by a claim
const CLAIM_KEYS: [DeviceTagKey; 4] = [
    DeviceTagKey::ClusterName,
    DeviceTagKey::DeviceType,
    DeviceTagKey::MachineName,
    DeviceTagKey::MachineType,
];

/// The four tags that make up a claim
pub fn claim_tags(cluster_name: &str, machine_name: &str, machine_type: &str, device_type: &str) -> [DeviceTag; 4] {
    [
        DeviceTag::new(DeviceTagKey::ClusterName, cluster_name),
        DeviceTag::new(DeviceTagKey::DeviceType, device_type),
        DeviceTag::new(DeviceTagKey::MachineName, machine_name),
        DeviceTag::new(DeviceTagKey::MachineType, machine_type),
    ]
}

/// Append a claim to a tag list.
///
/// Leftover entries with a claim key (e.g. a cluster tag for this cluster
/// from an earlier machine) are replaced so that every claim key parses
/// uniquely afterwards.
pub fn merge_claim_tags(tags: &[String], claim: &[DeviceTag]) -> Vec<String> {
    let prefixes: Vec<String> = CLAIM_KEYS.iter().map(|key| key.prefix()).collect();
    let mut merged: Vec<String> = tags
        .iter()
        .filter(|t| !prefixes.iter().any(|p| t.starts_with(p.as_str())))
        .cloned()
        .collect();
    merged.extend(claim.iter().map(ToString::to_string));
    merged
}

/// Remove this machine's claim from a tag list.
///
/// The machine-owner tag is removed when it names `machine_name`. The cluster,
/// device-type and machine-type tags are shared with whoever else may have
/// claimed the device meanwhile, so they are only removed when no
/// machine-owner tag is left. Returns the new list and whether it changed.
pub fn unwind_claim_tags(tags: &[String], cluster_name: &str, machine_name: &str) -> (Vec<String>, bool) {
    let (mut remaining, mut changed) =
        DeviceTag::new(DeviceTagKey::MachineName, machine_name).remove_from_list(tags);

    if !DeviceTagKey::MachineName.has_any(&remaining) {
        let (without_cluster, removed) =
            DeviceTag::new(DeviceTagKey::ClusterName, cluster_name).remove_from_list(&remaining);
        changed |= removed;
        remaining = without_cluster;

        let before = remaining.len();
        let type_prefixes = [DeviceTagKey::DeviceType.prefix(), DeviceTagKey::MachineType.prefix()];
        remaining.retain(|t| !type_prefixes.iter().any(|p| t.starts_with(p.as_str())));
        changed |= remaining.len() != before;
    }

    (remaining, changed)
}

impl DeviceService {
    /// Pick an eligible device and write a tentative claim on it
    pub async fn associate_device(&mut self) -> ActionResult {
        if self.scope.machine.spec.provider_id.is_some() {
            return ActionResult::Complete;
        }

        let devices = match self.client.list_devices().await {
            Ok(devices) => devices,
            Err(err) => return self.api_error("ListDevices", None, err),
        };

        let selector = self.scope.machine.spec.device_selector.clone();
        let (chosen, summary) = match find_eligible(&devices, &selector, &self.scope.cluster_name) {
            Ok(result) => result,
            Err(err) => {
                self.scope.mark_false(
                    DEVICE_ASSOCIATE_SUCCEEDED_CONDITION,
                    INVALID_DEVICE_SELECTOR_REASON,
                    ConditionSeverity::Error,
                    err.to_string(),
                );
                self.scope
                    .record_warning(INVALID_DEVICE_SELECTOR_REASON, format!("invalid device selector: {err}"));
                return ActionResult::Failed;
            }
        };

        let Some(device) = chosen else {
            self.scope.mark_false(
                DEVICE_ASSOCIATE_SUCCEEDED_CONDITION,
                NO_AVAILABLE_DEVICE_REASON,
                ConditionSeverity::Warning,
                format!("no available device found: {summary}"),
            );
            info!(
                machine = %self.scope.name(),
                devices = devices.len(),
                "No available device ({})",
                summary
            );
            return ActionResult::Continue(NO_DEVICE_REQUEUE);
        };

        let claim = claim_tags(
            &self.scope.cluster_name,
            self.scope.name(),
            self.scope.machine_type(),
            &self.scope.machine.spec.device_type,
        );
        let tags = merge_claim_tags(&device.tags, &claim);
        if let Err(err) = self.client.set_device_tags(device.device_id, &tags).await {
            return self.api_error("SetDeviceTags", Some(device.device_id), err);
        }

        self.scope.machine.set_device_id(device.device_id);
        self.scope.record_event(
            "SuccessfulAssociateDevice",
            format!("associated device {} ({})", device.device_id, device.hostname),
        );
        ActionResult::Complete
    }

    /// Confirm the claim once the grace period has passed
    pub async fn verify_associate(&mut self) -> ActionResult {
        let grace = self.settings.verify_grace_period;
        if let Some(last_updated) = self.scope.machine.spec.status.last_updated {
            let deadline = last_updated + ChronoDuration::from_std(grace).unwrap_or(ChronoDuration::zero());
            if self.scope.now < deadline {
                debug!(machine = %self.scope.name(), "Grace period not over, verifying later");
                return ActionResult::Continue(grace);
            }
        }

        let device_id = match self.claimed_device_id() {
            Ok(Some(id)) => id,
            Ok(None) => return ActionResult::GoBack(ProvisioningState::AssociateDevice),
            Err(err) => return err.into(),
        };

        let device = match self.client.get_device(device_id).await {
            Ok(device) => device,
            Err(err) if err.is_not_found() => {
                info!(machine = %self.scope.name(), device_id, "Claimed device vanished, claiming again");
                self.scope.machine.clear_provider_id();
                return ActionResult::GoBack(ProvisioningState::AssociateDevice);
            }
            Err(err) => return self.api_error("GetDevice", Some(device_id), err),
        };

        let cluster_confirmed = DeviceTagKey::ClusterName
            .find_in(&device.tags)
            .is_ok_and(|tag| tag.value == self.scope.cluster_name);
        if cluster_confirmed && self.is_owned(&device.tags) {
            self.scope.mark_true(DEVICE_ASSOCIATE_SUCCEEDED_CONDITION);
            info!(machine = %self.scope.name(), device_id, "Claim confirmed");
            return ActionResult::Complete;
        }

        // Lost or ambiguous claim
        let (tags, changed) = unwind_claim_tags(&device.tags, &self.scope.cluster_name, self.scope.name());
        if changed {
            if let Err(err) = self.client.set_device_tags(device_id, &tags).await {
                return self.api_error("SetDeviceTags", Some(device_id), err);
            }
        }
        self.scope.machine.clear_provider_id();
        self.scope.record_warning(
            "DeviceAssociateConflict",
            format!("claim on device {device_id} is not exclusive, choosing another device"),
        );
        ActionResult::GoBack(ProvisioningState::AssociateDevice)
    }
}
