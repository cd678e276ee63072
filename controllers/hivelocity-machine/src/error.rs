//! Controller-specific error types.
//!
//! This module defines error types specific to the Hivelocity machine
//! controller that are not covered by upstream library errors. Wrapped
//! causes stay reachable through `source()`.

use crds::{ProviderIdError, ProvisioningState, SelectorError};
use hivelocity_client::{HivelocityError, TagError};
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Hivelocity machine controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Hivelocity API error
    #[error("Hivelocity error: {0}")]
    Hivelocity(#[from] HivelocityError),

    /// Malformed device tag state
    #[error("device tag error: {0}")]
    Tag(#[from] TagError),

    /// Invalid device selector
    #[error("invalid device selector: {0}")]
    Selector(#[from] SelectorError),

    /// Provider ID could not be parsed
    #[error("invalid provider ID: {0}")]
    InvalidProviderId(#[from] ProviderIdError),

    /// A state that needs a claimed device has no provider ID
    #[error("machine {0} has no provider ID in state {1}")]
    MissingProviderId(String, ProvisioningState),

    /// The claimed device disappeared from the inventory
    #[error("device {0} not found")]
    DeviceNotFound(i32),

    /// The claimed device no longer carries this machine's tags
    #[error("device {device_id} has invalid tags: {reason}")]
    DeviceTagsInvalid { device_id: i32, reason: String },

    /// No handler registered for a provisioning state
    #[error("no handler for provisioning state {0}")]
    NoHandler(ProvisioningState),

    /// Optimistic concurrency conflict writing the machine record
    #[error("conflicting update of {0}")]
    Conflict(String),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_wrapped_cause_is_preserved() {
        let err: ControllerError = HivelocityError::RateLimitExceeded("429".to_string()).into();
        let source = err.source().and_then(|s| s.downcast_ref::<HivelocityError>());
        assert!(source.is_some_and(HivelocityError::is_rate_limit));
    }
}
