//! Object storage seam.
//!
//! Publication talks to an [`ObjectStore`] obtained from a [`StoreConnector`];
//! acquiring credentials happens inside `connect`, so credential problems
//! surface as publication failures.

pub mod gcs;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use gcs::{GcsClient, GcsConnector, ServiceAccountKey};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage credentials: {0}")]
    Credentials(String),

    #[error("storage authentication failed: {0}")]
    Auth(String),

    #[error("storage request failed: {0}")]
    Request(String),

    #[error("upload of {object} failed: {message}")]
    Upload { object: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub enum StorageCredentials {
    /// Service account key JSON supplied inline.
    Inline(String),
    /// Path to a service account key file.
    File(PathBuf),
    /// No authentication. Only chosen when `storage.anonymous` is set.
    Anonymous,
}

impl std::fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Inline(<redacted>)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Bucket plus the credentials needed to write into it.
#[derive(Debug, Clone)]
pub struct StorageTarget {
    pub bucket: String,
    pub project_id: Option<String>,
    pub credentials: StorageCredentials,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Upload one local file as `object_name`, overwriting any existing object.
    async fn upload_file(&self, local_path: &Path, object_name: &str) -> Result<(), StorageError>;
}

#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, target: &StorageTarget) -> Result<Box<dyn ObjectStore>, StorageError>;
}
