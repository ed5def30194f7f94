//! Model hub authentication.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub request failed: {0}")]
    Request(String),

    #[error("hub rejected token ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected hub response: {0}")]
    Response(String),
}

/// Identity the hub associates with a token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HubIdentity {
    pub name: String,
}

#[async_trait]
pub trait HubAuthenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<HubIdentity, HubError>;
}

/// Hugging Face Hub client.
#[derive(Debug, Clone)]
pub struct HfHubClient {
    endpoint: String,
    client: Client,
}

impl HfHubClient {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into().trim_end_matches('/').to_string(), client: Client::new() }
    }
}

#[async_trait]
impl HubAuthenticator for HfHubClient {
    async fn authenticate(&self, token: &str) -> Result<HubIdentity, HubError> {
        let url = format!("{}/api/whoami-v2", self.endpoint);
        debug!(url = %url, "validating hub token");

        let response = self.client.get(&url).bearer_auth(token).send().await.map_err(|e| {
            error!(error = %e, "Failed to reach model hub");
            HubError::Request(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(HubError::Rejected { status: status.as_u16(), message });
        }

        response.json::<HubIdentity>().await.map_err(|e| HubError::Response(e.to_string()))
    }
}
