//! Hivelocity client errors
//!
//! Callers branch on three classifications: [`HivelocityError::is_rate_limit`],
//! [`HivelocityError::is_not_found`] and [`HivelocityError::is_transient`].
//! They are decided once, from the HTTP status, in [`error_for_status`].

use reqwest::StatusCode;
use thiserror::Error;

/// Body fragment returned when shutting down a device that is already off
pub const SHUTDOWN_ALREADY_MESSAGE: &str = "Can't do this while server is powered off.";

/// Body fragment returned when booting a device that is already on
pub const POWERED_ON_ALREADY_MESSAGE: &str = "Can't do this while server is powered on.";

/// Errors that can occur when interacting with the Hivelocity API
#[derive(Debug, Error)]
pub enum HivelocityError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Hivelocity API returned an error
    #[error("Hivelocity API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 5xx from the API
    #[error("Hivelocity API unavailable: {0}")]
    Unavailable(String),

    /// Authentication failed (invalid or revoked API key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Device (or other resource) not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP 429 from the API
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Shutdown requested for a device that is already powered off
    #[error("device {0} is already shut down")]
    DeviceShutDownAlready(i32),

    /// Power-on requested for a device that is already powered on
    #[error("device {0} is already turned on")]
    DeviceTurnedOnAlready(i32),
}

impl HivelocityError {
    /// True if the API rejected the call because of rate limiting
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimitExceeded(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for failures worth retrying later without operator action
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimitExceeded(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// Map the rejection of a power action on a device that is already in the
/// requested power state to its typed error. Other errors pass through.
pub fn power_state_error(device_id: i32, err: HivelocityError) -> HivelocityError {
    match err {
        HivelocityError::Api(message) if message.contains(SHUTDOWN_ALREADY_MESSAGE) => {
            HivelocityError::DeviceShutDownAlready(device_id)
        }
        HivelocityError::Api(message) if message.contains(POWERED_ON_ALREADY_MESSAGE) => {
            HivelocityError::DeviceTurnedOnAlready(device_id)
        }
        other => other,
    }
}

/// Map a non-success response to an error.
///
/// This is the only place where HTTP statuses are classified.
pub fn error_for_status(status: StatusCode, path: &str, body: &str) -> HivelocityError {
    match status {
        StatusCode::NOT_FOUND => HivelocityError::NotFound(format!("{path} - {body}")),
        StatusCode::TOO_MANY_REQUESTS => HivelocityError::RateLimitExceeded(format!("{path} - {body}")),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            HivelocityError::Authentication(format!("{path}: {status} - {body}"))
        }
        s if s.is_server_error() => HivelocityError::Unavailable(format!("{path}: {status} - {body}")),
        _ => HivelocityError::Api(format!("{path} failed: {status} - {body}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        let err = error_for_status(StatusCode::TOO_MANY_REQUESTS, "/bare-metal-devices/", "slow down");
        assert!(err.is_rate_limit());
        assert!(err.is_transient());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_only_429_is_rate_limit() {
        for status in [
            StatusCode::NOT_FOUND,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::BAD_REQUEST,
        ] {
            let err = error_for_status(status, "/device/1", "");
            assert!(!err.is_rate_limit(), "{status} must not classify as rate limit");
        }
    }

    #[test]
    fn test_not_found_classification() {
        let err = error_for_status(StatusCode::NOT_FOUND, "/bare-metal-devices/7", "");
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_authentication_is_not_transient() {
        let err = error_for_status(StatusCode::FORBIDDEN, "/ssh_key/", "bad key");
        assert!(matches!(err, HivelocityError::Authentication(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_server_error_is_transient() {
        let err = error_for_status(StatusCode::BAD_GATEWAY, "/bare-metal-devices/", "");
        assert!(matches!(err, HivelocityError::Unavailable(_)));
        assert!(err.is_transient());

        let err = error_for_status(StatusCode::BAD_REQUEST, "/bare-metal-devices/1", "invalid osName");
        assert!(matches!(err, HivelocityError::Api(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_power_state_rejections() {
        let off = error_for_status(StatusCode::BAD_REQUEST, "/device/5/power", SHUTDOWN_ALREADY_MESSAGE);
        assert!(matches!(power_state_error(5, off), HivelocityError::DeviceShutDownAlready(5)));

        let on = error_for_status(
            StatusCode::BAD_REQUEST,
            "/device/5/power",
            r#"{"message": "Can't do this while server is powered on."}"#,
        );
        assert!(matches!(power_state_error(5, on), HivelocityError::DeviceTurnedOnAlready(5)));

        let other = error_for_status(StatusCode::BAD_REQUEST, "/device/5/power", "unknown action");
        assert!(matches!(power_state_error(5, other), HivelocityError::Api(_)));
        let limited = error_for_status(StatusCode::TOO_MANY_REQUESTS, "/device/5/power", "");
        assert!(power_state_error(5, limited).is_rate_limit());
    }
}
