//! Hivelocity API data models
//!
//! Only the fields the controller reads or writes are modelled; unknown
//! fields in responses are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Power status reported for a device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerStatus {
    /// Powered on
    On,
    /// Powered off
    Off,
    /// Anything else the API reports
    #[default]
    #[serde(other)]
    Unknown,
}

impl PowerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bare-metal device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalDevice {
    /// Hivelocity device ID
    pub device_id: i32,
    /// Hostname
    #[serde(default)]
    pub hostname: String,
    /// Tag list, including ownership tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Power status
    #[serde(default)]
    pub power_status: PowerStatus,
    /// Primary IPv4 address
    #[serde(default)]
    pub primary_ip: String,
    /// Installed operating system
    #[serde(default)]
    pub os_name: String,
    /// Last cloud-init payload sent with a provision request
    #[serde(default)]
    pub script: String,
    /// Data center
    #[serde(default)]
    pub location_name: String,
}

/// Body of a provision (reload) request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalDeviceUpdate {
    /// Hostname to set
    pub hostname: String,
    /// Tag list to keep on the device
    pub tags: Vec<String>,
    /// cloud-init user data
    pub script: String,
    /// Image to install
    pub os_name: String,
    /// SSH key to install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ssh_key_id: Option<i32>,
    /// Reinstall even if the image is unchanged
    pub force_reload: bool,
}

/// Detailed device state from the generic device endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDump {
    /// Hivelocity device ID
    pub device_id: i32,
    /// Power status
    #[serde(default)]
    pub power_status: PowerStatus,
    /// True while an OS reload is in progress
    #[serde(default)]
    pub is_reload: bool,
    /// Hostname
    #[serde(default)]
    pub hostname: String,
    /// Primary IPv4 address
    #[serde(default)]
    pub primary_ip: String,
}

/// A public SSH key registered in the account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SshKey {
    /// Key ID
    pub ssh_key_id: i32,
    /// Key name
    pub name: String,
    /// OpenSSH public key
    #[serde(default)]
    pub public_key: String,
}

/// Body of a tag update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceTags {
    /// Full replacement tag list
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_deserializes_api_payload() {
        let device: BareMetalDevice = serde_json::from_value(serde_json::json!({
            "deviceId": 51,
            "hostname": "host-51",
            "tags": ["caphv-use=allow"],
            "powerStatus": "ON",
            "primaryIp": "10.0.0.51",
            "osName": "Ubuntu 20.x",
            "productName": "ignored"
        }))
        .unwrap();
        assert_eq!(device.device_id, 51);
        assert_eq!(device.power_status, PowerStatus::On);
        assert_eq!(device.tags, vec!["caphv-use=allow".to_string()]);
    }

    #[test]
    fn test_unknown_power_status() {
        let dump: DeviceDump = serde_json::from_value(serde_json::json!({
            "deviceId": 1,
            "powerStatus": "REBOOTING",
            "isReload": true
        }))
        .unwrap();
        assert_eq!(dump.power_status, PowerStatus::Unknown);
        assert!(dump.is_reload);
    }

    #[test]
    fn test_update_omits_missing_ssh_key() {
        let update = BareMetalDeviceUpdate {
            hostname: "m1".to_string(),
            os_name: "Ubuntu 20.x".to_string(),
            force_reload: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("publicSshKeyId").is_none());
        assert_eq!(json["forceReload"], serde_json::json!(true));
    }
}
