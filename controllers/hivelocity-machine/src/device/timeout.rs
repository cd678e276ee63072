//! Reload timeout and shutdown debounce
//!
//! Both policies read their clock from the `DeviceReady` condition's
//! `lastTransitionTime`, so they survive controller restarts.

use crate::device::action::ActionResult;
use crate::device::{DeviceService, POWER_REQUEUE};
use chrono::{DateTime, Duration, Utc};
use crds::{
    ConditionSeverity, ProvisioningState, DEVICE_READY_CONDITION, DEVICE_RELOADING_REASON,
    DEVICE_RELOAD_TIMEOUT_REASON, DEVICE_SHUTDOWN_CALLED_REASON,
};
use hivelocity_client::tag::remove_ephemeral_tags;
use hivelocity_client::{DeviceTag, DeviceTagKey, HivelocityError, PowerStatus};
use tracing::{debug, info};

/// Reload budget while the device is powered on (OS install)
pub const RELOAD_TIMEOUT_POWERED_ON: Duration = Duration::minutes(25);
/// Reload budget while the device is powered off
pub const RELOAD_TIMEOUT_POWERED_OFF: Duration = Duration::minutes(5);
/// Minimum time between two shutdown calls
pub const SHUTDOWN_DEBOUNCE: Duration = Duration::minutes(2);

/// True if a reload that started at `since` has taken too long.
///
/// The threshold itself is not a timeout yet.
pub fn reload_timed_out(since: DateTime<Utc>, now: DateTime<Utc>, power: PowerStatus) -> bool {
    let threshold = match power {
        PowerStatus::Off => RELOAD_TIMEOUT_POWERED_OFF,
        PowerStatus::On | PowerStatus::Unknown => RELOAD_TIMEOUT_POWERED_ON,
    };
    now - since > threshold
}

/// `caphv-permanent-error=reload-timeout-<unix seconds>`
pub fn reload_timeout_tag(now: DateTime<Utc>) -> DeviceTag {
    DeviceTag::new(
        DeviceTagKey::PermanentError,
        format!("reload-timeout-{}", now.timestamp()),
    )
}

impl DeviceService {
    /// The device reports a reload in progress.
    ///
    /// Waits while the reload is within budget; past it the device is marked
    /// with a permanent error and the machine goes looking for another one.
    pub(crate) async fn handle_reloading(&mut self, device_id: i32, power: PowerStatus) -> ActionResult {
        // Starts the clock unless the reload was already being tracked
        self.scope.mark_false(
            DEVICE_READY_CONDITION,
            DEVICE_RELOADING_REASON,
            ConditionSeverity::Info,
            format!("device {device_id} is reloading"),
        );
        let since = self
            .scope
            .machine
            .condition(DEVICE_READY_CONDITION)
            .map_or(self.scope.now, |c| c.last_transition_time);

        if !reload_timed_out(since, self.scope.now, power) {
            debug!(machine = %self.scope.name(), device_id, "Device still reloading");
            return ActionResult::Continue(POWER_REQUEUE);
        }

        let device = match self.client.get_device(device_id).await {
            Ok(device) => device,
            Err(err) => return self.api_error("GetDevice", Some(device_id), err),
        };
        let (mut tags, _) = remove_ephemeral_tags(&device.tags);
        tags.push(reload_timeout_tag(self.scope.now).to_string());
        if let Err(err) = self.client.set_device_tags(device_id, &tags).await {
            return self.api_error("SetDeviceTags", Some(device_id), err);
        }

        self.scope.machine.clear_provider_id();
        self.scope.machine.status_mut().ready = false;
        let message = format!("device {device_id} reload timed out (power {power}), device abandoned");
        self.scope.mark_false(
            DEVICE_READY_CONDITION,
            DEVICE_RELOAD_TIMEOUT_REASON,
            ConditionSeverity::Error,
            message.clone(),
        );
        self.scope.record_warning(DEVICE_RELOAD_TIMEOUT_REASON, message);
        ActionResult::GoBack(ProvisioningState::AssociateDevice)
    }

    /// Request a shutdown unless one was requested recently.
    ///
    /// An already powered-off device counts as shut down.
    pub(crate) async fn shutdown_debounced(&mut self, device_id: i32) -> Result<(), ActionResult> {
        let now = self.scope.now;
        let recently_called = self
            .scope
            .machine
            .condition(DEVICE_READY_CONDITION)
            .is_some_and(|c| {
                c.is_false_with_reason(DEVICE_SHUTDOWN_CALLED_REASON)
                    && now < c.last_transition_time + SHUTDOWN_DEBOUNCE
            });
        if recently_called {
            debug!(machine = %self.scope.name(), device_id, "Shutdown already requested");
            return Ok(());
        }

        match self.client.shutdown_device(device_id).await {
            Ok(()) | Err(HivelocityError::DeviceShutDownAlready(_)) => {}
            Err(err) => return Err(self.api_error("ShutdownDevice", Some(device_id), err)),
        }

        info!(machine = %self.scope.name(), device_id, "Shutdown requested");
        self.scope.mark_false(
            DEVICE_READY_CONDITION,
            DEVICE_SHUTDOWN_CALLED_REASON,
            ConditionSeverity::Info,
            format!("shutdown of device {device_id} requested"),
        );
        // A repeated call keeps the reason, so its age has to be restarted by hand
        self.scope.machine.touch_condition(DEVICE_READY_CONDITION, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_timeout_boundary_powered_on() {
        let since = Utc::now();
        let at = since + RELOAD_TIMEOUT_POWERED_ON;
        assert!(!reload_timed_out(since, at, PowerStatus::On));
        assert!(reload_timed_out(since, at + Duration::seconds(1), PowerStatus::On));
    }

    #[test]
    fn test_reload_timeout_boundary_powered_off() {
        let since = Utc::now();
        let at = since + RELOAD_TIMEOUT_POWERED_OFF;
        assert!(!reload_timed_out(since, at, PowerStatus::Off));
        assert!(reload_timed_out(since, at + Duration::seconds(1), PowerStatus::Off));
        // 26 minutes is past both budgets
        assert!(reload_timed_out(since, since + Duration::minutes(26), PowerStatus::On));
    }

    #[test]
    fn test_reload_timeout_tag() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(
            reload_timeout_tag(now).to_string(),
            "caphv-permanent-error=reload-timeout-1700000000"
        );
    }
}
