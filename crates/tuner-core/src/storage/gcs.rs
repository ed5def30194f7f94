//! Google Cloud Storage client.
//!
//! Authenticates with a service account key (RS256-signed JWT exchanged for
//! an OAuth access token) and uploads through the JSON API media endpoint.

use super::{ObjectStore, StorageCredentials, StorageError, StorageTarget, StoreConnector};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Body, Client};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

const DEVSTORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::Credentials(format!("malformed service account key: {e}")))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Builds authenticated [`GcsClient`]s for a [`StorageTarget`].
#[derive(Debug, Clone)]
pub struct GcsConnector {
    endpoint: String,
    token_uri: Option<String>,
    client: Client,
}

impl GcsConnector {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into().trim_end_matches('/').to_string(), token_uri: None, client: Client::new() }
    }

    /// Use `token_uri` instead of the one in the service account key.
    #[must_use]
    pub fn with_token_uri(mut self, token_uri: Option<String>) -> Self {
        self.token_uri = token_uri;
        self
    }

    async fn load_key(credentials: &StorageCredentials) -> Result<Option<ServiceAccountKey>, StorageError> {
        match credentials {
            StorageCredentials::Inline(json) => ServiceAccountKey::from_json(json).map(Some),
            StorageCredentials::File(path) => {
                let json = tokio::fs::read_to_string(path).await.map_err(|e| {
                    StorageError::Credentials(format!("cannot read {}: {e}", path.display()))
                })?;
                ServiceAccountKey::from_json(&json).map(Some)
            }
            StorageCredentials::Anonymous => Ok(None),
        }
    }

    async fn fetch_access_token(&self, key: &ServiceAccountKey) -> Result<String, StorageError> {
        let token_uri = self.token_uri.as_deref().unwrap_or(&key.token_uri);
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &key.client_email,
            scope: DEVSTORAGE_SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&key.private_key_id);
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| StorageError::Credentials(format!("invalid private key: {e}")))?;
        let assertion = encode(&header, &claims, &signing_key)
            .map_err(|e| StorageError::Credentials(format!("failed to sign token request: {e}")))?;

        let response = self
            .client
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, "token exchange rejected");
            return Err(StorageError::Auth(format!("token exchange returned {status}: {body}")));
        }

        let token: TokenResponse = response.json().await.map_err(|e| StorageError::Auth(e.to_string()))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl StoreConnector for GcsConnector {
    async fn connect(&self, target: &StorageTarget) -> Result<Box<dyn ObjectStore>, StorageError> {
        let access_token = match Self::load_key(&target.credentials).await? {
            Some(key) => {
                debug!(
                    bucket = %target.bucket,
                    project_id = ?target.project_id.as_ref().or(key.project_id.as_ref()),
                    account = %key.client_email,
                    "authenticating to cloud storage"
                );
                Some(self.fetch_access_token(&key).await?)
            }
            None => None,
        };

        Ok(Box::new(GcsClient {
            endpoint: self.endpoint.clone(),
            bucket: target.bucket.clone(),
            access_token,
            client: self.client.clone(),
        }))
    }
}

/// Bucket-scoped upload client.
#[derive(Clone)]
pub struct GcsClient {
    endpoint: String,
    bucket: String,
    access_token: Option<String>,
    client: Client,
}

impl GcsClient {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            access_token,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload_file(&self, local_path: &Path, object_name: &str) -> Result<(), StorageError> {
        let file = tokio::fs::File::open(local_path).await?;
        let len = file.metadata().await?.len();
        let url = format!("{}/upload/storage/v1/b/{}/o", self.endpoint, self.bucket);

        let mut request = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", object_name)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(Body::wrap_stream(ReaderStream::new(file)));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| StorageError::Upload {
            object: object_name.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StorageError::Upload { object: object_name.to_string(), message: format!("{status}: {body}") });
        }

        debug!(object = %object_name, bytes = len, "uploaded object");
        Ok(())
    }
}
