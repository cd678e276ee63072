//! Integration tests for the Hivelocity client
//!
//! These tests require a Hivelocity account.
//! Set HIVELOCITY_API_KEY (and optionally HIVELOCITY_API_URL) to run.

use hivelocity_client::{HivelocityClient, HivelocityClientTrait};

fn client() -> HivelocityClient {
    let url = std::env::var("HIVELOCITY_API_URL")
        .unwrap_or_else(|_| "https://core.hivelocity.net/api/v2".to_string());
    let api_key = std::env::var("HIVELOCITY_API_KEY")
        .expect("HIVELOCITY_API_KEY environment variable must be set");

    HivelocityClient::new(url, api_key).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires Hivelocity API access
async fn test_validate_token() {
    let client = client();
    assert!(client.validate_token().await.is_ok(), "Failed to validate API key");
}

#[tokio::test]
#[ignore]
async fn test_list_devices() {
    let client = client();
    let devices = client.list_devices().await.expect("Failed to list devices");

    println!("Found {} devices", devices.len());
    for device in &devices {
        println!("  {} {} {:?}", device.device_id, device.power_status, device.tags);
    }
}

#[tokio::test]
#[ignore]
async fn test_get_unknown_device_is_not_found() {
    let client = client();
    let err = client.get_device(i32::MAX).await.expect_err("device must not exist");
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[tokio::test]
#[ignore]
async fn test_list_ssh_keys() {
    let client = client();
    let keys = client.list_ssh_keys().await.expect("Failed to list SSH keys");
    println!("Found {} SSH keys", keys.len());
}
