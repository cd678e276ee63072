//! Mock HivelocityClient for unit testing
//!
//! `MockHivelocityClient` is an explicit in-memory device store. Clones share
//! the same store, so several reconcilers (standing in for separate
//! controller processes) can compete for one pool in a single test, while
//! separate `new()` instances stay fully isolated.
//!
//! Beyond plain CRUD the mock can:
//! - inject failures for the next call of an operation (`fail_next`)
//! - count calls per operation (`call_count`)
//! - report devices as reloading (`set_reloading`)
//! - serve a frozen device listing to reproduce stale reads (`freeze_listing`)

/// Canned devices and keys
pub mod fixtures;

use crate::error::HivelocityError;
use crate::hivelocity_trait::HivelocityClientTrait;
use crate::models::{BareMetalDevice, BareMetalDeviceUpdate, DeviceDump, PowerStatus, SshKey};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operations of `HivelocityClientTrait`, used for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    /// `list_devices`
    ListDevices,
    /// `get_device`
    GetDevice,
    /// `set_device_tags`
    SetDeviceTags,
    /// `provision_device`
    ProvisionDevice,
    /// `shutdown_device`
    ShutdownDevice,
    /// `power_on_device`
    PowerOnDevice,
    /// `get_device_dump`
    GetDeviceDump,
    /// `list_ssh_keys`
    ListSshKeys,
}

#[derive(Debug, Clone)]
struct MockDevice {
    device: BareMetalDevice,
    is_reload: bool,
}

#[derive(Debug, Default)]
struct DeviceStore {
    devices: BTreeMap<i32, MockDevice>,
    ssh_keys: Vec<SshKey>,
    frozen_listing: Option<Vec<BareMetalDevice>>,
    failures: HashMap<MockOperation, VecDeque<HivelocityError>>,
    calls: HashMap<MockOperation, usize>,
    reload_on_provision: bool,
}

/// Mock HivelocityClient for testing
#[derive(Debug, Clone)]
pub struct MockHivelocityClient {
    base_url: String,
    store: Arc<Mutex<DeviceStore>>,
}

impl MockHivelocityClient {
    /// Create an empty mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            store: Arc::new(Mutex::new(DeviceStore::default())),
        }
    }

    /// Create a mock client seeded with the standard fixture devices and SSH key
    pub fn with_fixtures() -> Self {
        let client = Self::new("http://mock-hivelocity");
        for device in fixtures::default_devices() {
            client.add_device(device);
        }
        client.add_ssh_key(fixtures::default_ssh_key());
        client
    }

    fn lock(&self) -> MutexGuard<'_, DeviceStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call and return an injected failure, if any
    fn begin(&self, operation: MockOperation) -> Result<(), HivelocityError> {
        let mut store = self.lock();
        *store.calls.entry(operation).or_insert(0) += 1;
        match store.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Add or replace a device (for test setup)
    pub fn add_device(&self, device: BareMetalDevice) {
        self.lock()
            .devices
            .insert(device.device_id, MockDevice { device, is_reload: false });
    }

    /// Remove a device, as if it vanished from the inventory
    pub fn remove_device(&self, device_id: i32) {
        self.lock().devices.remove(&device_id);
    }

    /// Current state of a device
    pub fn device(&self, device_id: i32) -> Option<BareMetalDevice> {
        self.lock().devices.get(&device_id).map(|d| d.device.clone())
    }

    /// Current tags of a device (empty if unknown)
    pub fn tags(&self, device_id: i32) -> Vec<String> {
        self.device(device_id).map(|d| d.tags).unwrap_or_default()
    }

    /// Overwrite a device's tags without counting a call
    pub fn set_tags(&self, device_id: i32, tags: Vec<String>) {
        if let Some(d) = self.lock().devices.get_mut(&device_id) {
            d.device.tags = tags;
        }
    }

    pub fn set_power_status(&self, device_id: i32, power_status: PowerStatus) {
        if let Some(d) = self.lock().devices.get_mut(&device_id) {
            d.device.power_status = power_status;
        }
    }

    /// Report the device as reloading in its dump
    pub fn set_reloading(&self, device_id: i32, is_reload: bool) {
        if let Some(d) = self.lock().devices.get_mut(&device_id) {
            d.is_reload = is_reload;
        }
    }

    /// Make provisioned devices report a reload in progress
    pub fn set_reload_on_provision(&self, enabled: bool) {
        self.lock().reload_on_provision = enabled;
    }

    pub fn add_ssh_key(&self, key: SshKey) {
        self.lock().ssh_keys.push(key);
    }

    /// Serve the current device list to `list_devices` until `unfreeze_listing`
    pub fn freeze_listing(&self) {
        let mut store = self.lock();
        let snapshot = store.devices.values().map(|d| d.device.clone()).collect();
        store.frozen_listing = Some(snapshot);
    }

    pub fn unfreeze_listing(&self) {
        self.lock().frozen_listing = None;
    }

    /// Fail the next call of `operation` with `err`
    pub fn fail_next(&self, operation: MockOperation, err: HivelocityError) {
        self.lock().failures.entry(operation).or_default().push_back(err);
    }

    /// Number of calls made to `operation`, including failed ones
    pub fn call_count(&self, operation: MockOperation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    fn not_found(device_id: i32) -> HivelocityError {
        HivelocityError::NotFound(format!("device {device_id}"))
    }
}

#[async_trait::async_trait]
impl HivelocityClientTrait for MockHivelocityClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_token(&self) -> Result<(), HivelocityError> {
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<BareMetalDevice>, HivelocityError> {
        self.begin(MockOperation::ListDevices)?;
        let store = self.lock();
        Ok(match &store.frozen_listing {
            Some(snapshot) => snapshot.clone(),
            None => store.devices.values().map(|d| d.device.clone()).collect(),
        })
    }

    async fn get_device(&self, device_id: i32) -> Result<BareMetalDevice, HivelocityError> {
        self.begin(MockOperation::GetDevice)?;
        self.device(device_id).ok_or_else(|| Self::not_found(device_id))
    }

    async fn set_device_tags(&self, device_id: i32, tags: &[String]) -> Result<(), HivelocityError> {
        self.begin(MockOperation::SetDeviceTags)?;
        let mut store = self.lock();
        let d = store.devices.get_mut(&device_id).ok_or_else(|| Self::not_found(device_id))?;
        d.device.tags = tags.to_vec();
        Ok(())
    }

    async fn provision_device(
        &self,
        device_id: i32,
        update: &BareMetalDeviceUpdate,
    ) -> Result<BareMetalDevice, HivelocityError> {
        self.begin(MockOperation::ProvisionDevice)?;
        let mut store = self.lock();
        let reload = store.reload_on_provision;
        let d = store.devices.get_mut(&device_id).ok_or_else(|| Self::not_found(device_id))?;
        d.device.hostname.clone_from(&update.hostname);
        d.device.tags.clone_from(&update.tags);
        d.device.script.clone_from(&update.script);
        d.device.os_name.clone_from(&update.os_name);
        d.device.power_status = PowerStatus::On;
        d.is_reload = reload;
        Ok(d.device.clone())
    }

    async fn shutdown_device(&self, device_id: i32) -> Result<(), HivelocityError> {
        self.begin(MockOperation::ShutdownDevice)?;
        let mut store = self.lock();
        let d = store.devices.get_mut(&device_id).ok_or_else(|| Self::not_found(device_id))?;
        if d.device.power_status == PowerStatus::Off {
            return Err(HivelocityError::DeviceShutDownAlready(device_id));
        }
        d.device.power_status = PowerStatus::Off;
        Ok(())
    }

    async fn power_on_device(&self, device_id: i32) -> Result<(), HivelocityError> {
        self.begin(MockOperation::PowerOnDevice)?;
        let mut store = self.lock();
        let d = store.devices.get_mut(&device_id).ok_or_else(|| Self::not_found(device_id))?;
        if d.device.power_status == PowerStatus::On {
            return Err(HivelocityError::DeviceTurnedOnAlready(device_id));
        }
        d.device.power_status = PowerStatus::On;
        Ok(())
    }

    async fn get_device_dump(&self, device_id: i32) -> Result<DeviceDump, HivelocityError> {
        self.begin(MockOperation::GetDeviceDump)?;
        let store = self.lock();
        let d = store.devices.get(&device_id).ok_or_else(|| Self::not_found(device_id))?;
        Ok(DeviceDump {
            device_id,
            power_status: d.device.power_status,
            is_reload: d.is_reload,
            hostname: d.device.hostname.clone(),
            primary_ip: d.device.primary_ip.clone(),
        })
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, HivelocityError> {
        self.begin(MockOperation::ListSshKeys)?;
        Ok(self.lock().ssh_keys.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_store() {
        let a = MockHivelocityClient::with_fixtures();
        let b = a.clone();
        a.set_device_tags(fixtures::FREE_DEVICE_ID, &["x".to_string()]).await.unwrap();
        assert_eq!(b.tags(fixtures::FREE_DEVICE_ID), vec!["x".to_string()]);

        let isolated = MockHivelocityClient::with_fixtures();
        assert_ne!(isolated.tags(fixtures::FREE_DEVICE_ID), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let client = MockHivelocityClient::with_fixtures();
        client.fail_next(MockOperation::ListDevices, HivelocityError::RateLimitExceeded("429".into()));

        let err = client.list_devices().await.unwrap_err();
        assert!(err.is_rate_limit());
        assert!(client.list_devices().await.is_ok());
        assert_eq!(client.call_count(MockOperation::ListDevices), 2);
    }

    #[tokio::test]
    async fn test_power_transitions() {
        let client = MockHivelocityClient::with_fixtures();
        let id = fixtures::FREE_DEVICE_ID;
        assert!(matches!(
            client.power_on_device(id).await,
            Err(HivelocityError::DeviceTurnedOnAlready(_))
        ));
        client.shutdown_device(id).await.unwrap();
        assert!(matches!(
            client.shutdown_device(id).await,
            Err(HivelocityError::DeviceShutDownAlready(_))
        ));
        client.power_on_device(id).await.unwrap();
        assert_eq!(client.device(id).unwrap().power_status, PowerStatus::On);
    }

    #[tokio::test]
    async fn test_frozen_listing_is_stale() {
        let client = MockHivelocityClient::with_fixtures();
        client.freeze_listing();
        client.set_tags(fixtures::FREE_DEVICE_ID, vec![]);

        let listed = client.list_devices().await.unwrap();
        let free = listed.iter().find(|d| d.device_id == fixtures::FREE_DEVICE_ID).unwrap();
        assert!(!free.tags.is_empty());

        client.unfreeze_listing();
        let listed = client.list_devices().await.unwrap();
        let free = listed.iter().find(|d| d.device_id == fixtures::FREE_DEVICE_ID).unwrap();
        assert!(free.tags.is_empty());
    }

    #[tokio::test]
    async fn test_missing_device_is_not_found() {
        let client = MockHivelocityClient::new("http://mock");
        assert!(client.get_device(99).await.unwrap_err().is_not_found());
        assert!(client.get_device_dump(99).await.unwrap_err().is_not_found());
        assert!(client.set_device_tags(99, &[]).await.unwrap_err().is_not_found());
    }
}
