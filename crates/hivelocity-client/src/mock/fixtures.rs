//! Fixture devices for the mock client

use crate::models::{BareMetalDevice, PowerStatus, SshKey};

/// Image installed on fixture devices
pub const DEFAULT_IMAGE: &str = "Ubuntu 20.x";

/// Name of the fixture SSH key
pub const DEFAULT_SSH_KEY_NAME: &str = "testsshkey";

/// Unclaimed device labelled `deviceType=hvCustom`
pub const FREE_DEVICE_ID: i32 = 1;

/// Device claimed by `other-cluster`
pub const OTHER_CLUSTER_DEVICE_ID: i32 = 2;

/// Device without any tags (not opted in)
pub const NO_TAGS_DEVICE_ID: i32 = 3;

/// Device with a primary IP and no tags
pub const WITH_PRIMARY_IP_DEVICE_ID: i32 = 4;

/// Unclaimed pool devices labelled `deviceType=pool`
pub const POOL_DEVICE_IDS: [i32; 3] = [51, 52, 53];

fn device(device_id: i32, hostname: &str, tags: &[&str]) -> BareMetalDevice {
    BareMetalDevice {
        device_id,
        hostname: hostname.to_string(),
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
        power_status: PowerStatus::On,
        os_name: DEFAULT_IMAGE.to_string(),
        ..Default::default()
    }
}

/// Unclaimed, opted-in device with the `hvCustom` device type
pub fn free_device() -> BareMetalDevice {
    device(FREE_DEVICE_ID, "host-free-device", &["caphvlabel:deviceType=hvCustom", "caphv-use=allow"])
}

/// Unclaimed, opted-in device with the `pool` device type
pub fn pool_device(device_id: i32) -> BareMetalDevice {
    device(device_id, &format!("host-pool-{device_id}"), &["caphvlabel:deviceType=pool", "caphv-use=allow"])
}

/// Device claimed by another cluster
pub fn other_cluster_device() -> BareMetalDevice {
    device(
        OTHER_CLUSTER_DEVICE_ID,
        "host2-other-cluster-device",
        &["caphv-cluster-name=other-cluster", "caphv-use=allow"],
    )
}

/// Device with an empty tag list
pub fn no_tags_device() -> BareMetalDevice {
    device(NO_TAGS_DEVICE_ID, "host3-unused", &[])
}

/// Labelled device that lacks the `caphv-use=allow` opt-in
pub fn not_allowed_device() -> BareMetalDevice {
    device(FREE_DEVICE_ID, "host-free-device", &["caphvlabel:deviceType=hvCustom"])
}

/// Opted-in device carrying two labels
pub fn multi_labels_device() -> BareMetalDevice {
    device(
        NO_TAGS_DEVICE_ID,
        "host3-unused",
        &["caphvlabel:foo1=bar1", "caphvlabel:foo2=bar2", "caphv-use=allow"],
    )
}

/// Untagged device with a primary IP
pub fn with_primary_ip_device() -> BareMetalDevice {
    BareMetalDevice {
        primary_ip: "127.0.0.1".to_string(),
        ..device(WITH_PRIMARY_IP_DEVICE_ID, "host4-with-ip", &[])
    }
}

/// The devices a `MockHivelocityClient::with_fixtures()` store starts with
pub fn default_devices() -> Vec<BareMetalDevice> {
    let mut devices = vec![free_device(), other_cluster_device(), no_tags_device(), with_primary_ip_device()];
    devices.extend(POOL_DEVICE_IDS.into_iter().map(pool_device));
    devices
}

/// Key named `DEFAULT_SSH_KEY_NAME`
pub fn default_ssh_key() -> SshKey {
    SshKey {
        ssh_key_id: 0,
        name: DEFAULT_SSH_KEY_NAME.to_string(),
        public_key: "AAAAB3NzaC1yc2EAAAADAQABAAABg...".to_string(),
    }
}
