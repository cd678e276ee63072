//! HivelocityClient trait for mocking
//!
//! This trait abstracts the HivelocityClient to enable mocking in unit tests.
//! The concrete HivelocityClient implements this trait, and tests use
//! `MockHivelocityClient`.
//!
//! Implementations must classify errors the same way: a rate-limited call
//! returns `HivelocityError::RateLimitExceeded` and a missing device returns
//! `HivelocityError::NotFound`. No method retries internally.

use crate::error::HivelocityError;
use crate::models::{BareMetalDevice, BareMetalDeviceUpdate, DeviceDump, SshKey};

/// Trait for Hivelocity API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait HivelocityClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Validate the API key
    async fn validate_token(&self) -> Result<(), HivelocityError>;

    // Bare-metal devices
    /// List every bare-metal device in the account
    async fn list_devices(&self) -> Result<Vec<BareMetalDevice>, HivelocityError>;
    /// Fetch one device
    async fn get_device(&self, device_id: i32) -> Result<BareMetalDevice, HivelocityError>;
    /// Replace the device's whole tag list
    async fn set_device_tags(&self, device_id: i32, tags: &[String]) -> Result<(), HivelocityError>;
    /// Reinstall the device with a new image and cloud-init script
    async fn provision_device(&self, device_id: i32, update: &BareMetalDeviceUpdate) -> Result<BareMetalDevice, HivelocityError>;

    // Power
    /// Power off; `DeviceShutDownAlready` if it is already off
    async fn shutdown_device(&self, device_id: i32) -> Result<(), HivelocityError>;
    /// Power on; `DeviceTurnedOnAlready` if it is already on
    async fn power_on_device(&self, device_id: i32) -> Result<(), HivelocityError>;
    /// Power and reload state of a device
    async fn get_device_dump(&self, device_id: i32) -> Result<DeviceDump, HivelocityError>;

    // Account
    /// List SSH keys registered in the account
    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, HivelocityError>;
}
