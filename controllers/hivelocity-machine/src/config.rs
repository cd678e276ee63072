//! Controller configuration
//!
//! Read once at start-up from environment variables.

use crate::error::ControllerError;
use hivelocity_client::client::DEFAULT_API_URL;
use std::env;
use std::fmt;
use std::time::Duration;

/// Default minimum wait between writing a claim and verifying it
pub const DEFAULT_VERIFY_GRACE_PERIOD: Duration = Duration::from_millis(100);

const DEFAULT_CONCURRENCY: u16 = 3;

/// Process-wide configuration
#[derive(Clone)]
pub struct ControllerConfig {
    pub api_url: String,
    pub api_key: String,
    /// Namespace to watch (all namespaces if unset)
    pub namespace: Option<String>,
    /// Cluster identity for machines without a cluster-name label
    pub cluster_name: Option<String>,
    pub verify_grace_period: Duration,
    pub concurrency: u16,
}

impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("api_url", &self.api_url)
            .field("namespace", &self.namespace)
            .field("cluster_name", &self.cluster_name)
            .field("verify_grace_period", &self.verify_grace_period)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

/// Settings the reconciler needs per invocation
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub verify_grace_period: Duration,
    pub default_cluster_name: Option<String>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            verify_grace_period: DEFAULT_VERIFY_GRACE_PERIOD,
            default_cluster_name: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let api_key = lookup("HIVELOCITY_API_KEY")
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "HIVELOCITY_API_KEY environment variable is required".to_string(),
                )
            })?;

        let verify_grace_period = match lookup("VERIFY_GRACE_PERIOD_MS") {
            Some(ms) => Duration::from_millis(ms.parse().map_err(|e| {
                ControllerError::InvalidConfig(format!("VERIFY_GRACE_PERIOD_MS={ms:?}: {e}"))
            })?),
            None => DEFAULT_VERIFY_GRACE_PERIOD,
        };

        let concurrency = match lookup("RECONCILE_CONCURRENCY") {
            Some(n) => n.parse().map_err(|e| {
                ControllerError::InvalidConfig(format!("RECONCILE_CONCURRENCY={n:?}: {e}"))
            })?,
            None => DEFAULT_CONCURRENCY,
        };

        Ok(Self {
            api_url: lookup("HIVELOCITY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key,
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            cluster_name: lookup("CLUSTER_NAME").filter(|name| !name.is_empty()),
            verify_grace_period,
            concurrency,
        })
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            verify_grace_period: self.verify_grace_period,
            default_cluster_name: self.cluster_name.clone(),
        }
    }
}
