//! Hivelocity API client
//!
//! Implements the subset of the Hivelocity v2 REST API used to claim and
//! provision bare-metal devices:
//! `/bare-metal-devices/`, `/device/{id}`, `/device/{id}/tags`,
//! `/device/{id}/power` and `/ssh_key/`.

use crate::common::HttpClient;
use crate::error::{power_state_error, HivelocityError};
use crate::hivelocity_trait::HivelocityClientTrait;
use crate::models::{BareMetalDevice, BareMetalDeviceUpdate, DeviceDump, DeviceTags, SshKey};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Default API endpoint
pub const DEFAULT_API_URL: &str = "https://core.hivelocity.net/api/v2";

/// Hivelocity API client
#[derive(Debug)]
pub struct HivelocityClient {
    http: HttpClient,
}

impl HivelocityClient {
    /// Create a new Hivelocity client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://core.hivelocity.net/api/v2")
    /// * `api_key` - API key sent in the `X-API-KEY` header
    pub fn new(base_url: String, api_key: String) -> Result<Self, HivelocityError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http: HttpClient::new(client, base_url, api_key),
        })
    }

    /// `shutdown` or `boot`. A device already in the requested state yields
    /// `DeviceShutDownAlready` or `DeviceTurnedOnAlready`.
    async fn power_action(&self, device_id: i32, action: &str) -> Result<(), HivelocityError> {
        let path = format!("/device/{device_id}/power?action={action}");
        self.http
            .post_empty(&path)
            .await
            .map_err(|err| power_state_error(device_id, err))
    }
}

#[async_trait::async_trait]
impl HivelocityClientTrait for HivelocityClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn validate_token(&self) -> Result<(), HivelocityError> {
        debug!("Validating Hivelocity API key");
        let _: Vec<SshKey> = self.http.get("/ssh_key/").await?;
        debug!("API key validated successfully");
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<BareMetalDevice>, HivelocityError> {
        self.http.get("/bare-metal-devices/").await
    }

    async fn get_device(&self, device_id: i32) -> Result<BareMetalDevice, HivelocityError> {
        self.http.get(&format!("/bare-metal-devices/{device_id}")).await
    }

    async fn set_device_tags(&self, device_id: i32, tags: &[String]) -> Result<(), HivelocityError> {
        let body = serde_json::to_value(DeviceTags { tags: tags.to_vec() })?;
        let _: serde_json::Value = self.http.put(&format!("/device/{device_id}/tags"), &body).await?;
        Ok(())
    }

    async fn provision_device(
        &self,
        device_id: i32,
        update: &BareMetalDeviceUpdate,
    ) -> Result<BareMetalDevice, HivelocityError> {
        let body = serde_json::to_value(update)?;
        self.http.put(&format!("/bare-metal-devices/{device_id}"), &body).await
    }

    async fn shutdown_device(&self, device_id: i32) -> Result<(), HivelocityError> {
        self.power_action(device_id, "shutdown").await
    }

    async fn power_on_device(&self, device_id: i32) -> Result<(), HivelocityError> {
        self.power_action(device_id, "boot").await
    }

    async fn get_device_dump(&self, device_id: i32) -> Result<DeviceDump, HivelocityError> {
        self.http.get(&format!("/device/{device_id}")).await
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, HivelocityError> {
        self.http.get("/ssh_key/").await
    }
}
