//! Hivelocity REST API Client
//!
//! A Rust client library for the Hivelocity bare-metal API, plus the tag
//! codec used to record device ownership in the device's own tag list.
//!
//! # Example
//!
//! ```no_run
//! use hivelocity_client::{HivelocityClient, HivelocityClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HivelocityClient::new(
//!     "https://core.hivelocity.net/api/v2".to_string(),
//!     "your-api-key".to_string(),
//! )?;
//!
//! for device in client.list_devices().await? {
//!     println!("{} {:?}", device.device_id, device.tags);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Devices**: list, fetch, tag, provision and power-cycle bare-metal devices
//! - **Tags**: parse and format `caphv-*` ownership tags ([`tag`])
//! - **Errors**: explicit rate-limit and not-found classification ([`HivelocityError`])
//! - **Mocking**: in-memory [`MockHivelocityClient`] behind the `test-util` feature

/// HTTP client
pub mod client;
/// Base URL and credential setup
pub mod common;
/// Error classification
pub mod error;
/// Wire models
pub mod models;
/// Device tag codec
pub mod tag;
/// Client trait
#[path = "trait.rs"]
pub mod hivelocity_trait;
/// In-memory client for tests
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::HivelocityClient;
pub use common::HttpClient;
pub use error::HivelocityError;
pub use hivelocity_trait::HivelocityClientTrait;
pub use models::*;
pub use tag::{DeviceTag, DeviceTagKey, TagError};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockHivelocityClient;
