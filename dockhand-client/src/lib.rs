//! Dockhand HTTP Client
//!
//! A simple, type-safe HTTP client for the Dockhand trigger server API.
//!
//! # Example
//!
//! ```no_run
//! use dockhand_client::DockhandClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = DockhandClient::new("http://localhost:8080");
//!
//!     let run = client.trigger_run().await?;
//!     println!("Started run: {}", run.id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod runs;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the trigger server API
#[derive(Debug, Clone)]
pub struct DockhandClient {
    /// Base URL of the trigger server (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl DockhandClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the trigger server (e.g., "http://localhost:8080")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the trigger server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Handle an API response and deserialize JSON
    ///
    /// Error bodies of the form `{"error": "..."}` are unwrapped to their message.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("API returned {}: {}", status, error_text);
            return Err(ClientError::api_error(
                status.as_u16(),
                error::error_message(&error_text),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = DockhandClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = DockhandClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
