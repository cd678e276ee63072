//! Common utilities for the Hivelocity API client
//!
//! Provides the authenticated request helpers used by every endpoint.

use crate::error::{error_for_status, HivelocityError};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// HTTP client wrapper with authentication
pub struct HttpClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Send a request and turn non-success statuses into errors
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, HivelocityError> {
        let url = self.build_url(path);
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, path, &body));
        }
        Ok(response)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HivelocityError> {
        let response = self.send(Method::GET, path, None).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(HivelocityError::Serialization)
    }

    /// Make a PUT request
    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, HivelocityError> {
        let response = self.send(Method::PUT, path, Some(body)).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(HivelocityError::Serialization)
    }

    /// Make a POST request whose response body is ignored
    pub async fn post_empty(&self, path: &str) -> Result<(), HivelocityError> {
        self.send(Method::POST, path, None).await?;
        Ok(())
    }
}
