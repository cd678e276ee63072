//! Typed status conditions
//!
//! Conditions are both user-facing status and controller memory: the
//! `lastTransitionTime` of a condition is read back by the controller to
//! debounce shutdown calls and to detect devices stuck in a reload.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Device association finished (or why it could not).
pub const DEVICE_ASSOCIATE_SUCCEEDED_CONDITION: &str = "DeviceAssociateSucceeded";
/// The claimed device is provisioned and powered on.
pub const DEVICE_READY_CONDITION: &str = "DeviceReady";
/// Bootstrap data for the machine is available.
pub const MACHINE_BOOTSTRAP_READY_CONDITION: &str = "MachineBootstrapReady";
/// Credentials (SSH key) referenced by the machine exist.
pub const CREDENTIALS_AVAILABLE_CONDITION: &str = "CredentialsAvailable";
/// The Hivelocity API rejected a call because of rate limiting.
pub const RATE_LIMIT_EXCEEDED_CONDITION: &str = "RateLimitExceeded";

/// No device in the pool passed the matcher.
pub const NO_AVAILABLE_DEVICE_REASON: &str = "NoAvailableDevice";
/// The device selector contains an invalid requirement.
pub const INVALID_DEVICE_SELECTOR_REASON: &str = "InvalidDeviceSelector";
/// Provisioning was requested and the device is reloading.
pub const DEVICE_RELOADING_REASON: &str = "DeviceReloading";
/// A shutdown was requested; used to debounce further shutdown calls.
pub const DEVICE_SHUTDOWN_CALLED_REASON: &str = "DeviceShutdownCalled";
/// The device is powered off.
pub const DEVICE_POWER_OFF_REASON: &str = "DevicePowerOff";
/// The claimed device no longer exists.
pub const DEVICE_NOT_FOUND_REASON: &str = "DeviceNotFound";
/// The device's ownership tags do not match this machine.
pub const DEVICE_TAGS_INVALID_REASON: &str = "DeviceTagsInvalid";
/// The device did not finish reloading in time and was abandoned.
pub const DEVICE_RELOAD_TIMEOUT_REASON: &str = "DeviceReloadTimeout";
/// Bootstrap data has not been published yet.
pub const MACHINE_BOOTSTRAP_NOT_READY_REASON: &str = "MachineBootstrapNotReady";
/// The SSH key named on the machine does not exist.
pub const SSH_KEY_NOT_FOUND_REASON: &str = "HivelocitySSHKeyNotFound";
/// The last remote call was not rate limited.
pub const RATE_LIMIT_NOT_REACHED_REASON: &str = "RateLimitNotReached";

/// Condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not determined yet
    Unknown,
}

/// Severity of a false condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    /// Needs operator attention
    Error,
    /// Degraded but recovering
    Warning,
    /// Expected progress
    Info,
}

/// A single typed condition on a resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "DeviceReady")
    #[serde(rename = "type")]
    pub type_: String,

    /// Whether the condition holds
    pub status: ConditionStatus,

    /// Set only when the status is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// CamelCase reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the status or reason changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a true condition
    pub fn true_condition(type_: &str, now: DateTime<Utc>) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            severity: None,
            reason: None,
            message: None,
            last_transition_time: now,
        }
    }

    /// Create a false condition with reason, severity and message
    pub fn false_condition(
        type_: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
            last_transition_time: now,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    /// True if the condition is false with the given reason
    pub fn is_false_with_reason(&self, reason: &str) -> bool {
        self.is_false() && self.reason.as_deref() == Some(reason)
    }
}

/// Insert or replace a condition in a list.
///
/// `lastTransitionTime` is preserved when neither status nor reason changed,
/// so that a re-marked condition does not reset its age.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status && existing.reason == condition.reason {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Look up a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}
