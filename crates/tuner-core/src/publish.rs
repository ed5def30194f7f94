//! Artifact publication.
//!
//! Copies every non-checkpoint file under a job's output location to
//! `gs://<bucket>/<prefix>/<user_id>/<model_identifier>/<relative_path>`.
//! Uploads are independent and not transactional: a failure part-way leaves
//! earlier objects in place and the whole publication counts as failed.

use crate::config::StorageConfig;
use crate::storage::{StorageCredentials, StorageError, StorageTarget, StoreConnector};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use tuner_training::{collect_publishable, model_identifier, remote_model_path, JobInput, TrainingError};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no upload destination: job has no gcs_config and storage.bucket is not configured")]
    MissingDestination,

    #[error("cannot derive model identifier: neither model_name nor hub_model_id is set")]
    MissingModelIdentifier,

    #[error("artifact traversal failed: {0}")]
    Artifacts(#[from] TrainingError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of a publication attempt, consumed by the job state machine.
#[derive(Debug)]
pub enum PublishOutcome {
    Published { uploaded: usize, remote_uri: String },
    Failed { cause: PublishError },
}

/// Where a job's artifacts go.
#[derive(Debug, Clone)]
pub struct PublishPlan {
    pub target: StorageTarget,
    /// `<prefix>/<user_id>/<model_identifier>`
    pub remote_path: String,
}

impl PublishPlan {
    /// Resolve the destination from the job input, falling back to the
    /// worker's configured bucket when the job names none.
    ///
    /// Credentials come from the job's `credentials_json`, then
    /// `storage.credentials_file`. Unauthenticated access is only used when
    /// `storage.anonymous` is set.
    pub fn resolve(input: &JobInput, hub_model_id: Option<&str>, storage: &StorageConfig) -> Result<Self, PublishError> {
        let fallback_credentials = |missing: &str| match &storage.credentials_file {
            Some(path) => Ok(StorageCredentials::File(path.clone())),
            None if storage.anonymous => Ok(StorageCredentials::Anonymous),
            None => Err(PublishError::Storage(StorageError::Credentials(format!("missing {missing}")))),
        };

        let (target, prefix) = if let Some(gcs) = &input.gcs_config {
            let credentials = match gcs.credentials_json.as_deref().filter(|json| !json.trim().is_empty()) {
                Some(json) => StorageCredentials::Inline(json.to_string()),
                None => fallback_credentials("credentials_json")?,
            };
            let target = StorageTarget {
                bucket: gcs.bucket_name.clone(),
                project_id: gcs.project_id.clone(),
                credentials,
            };
            (target, gcs.gcs_finetuned_model_path.clone())
        } else if let Some(bucket) = &storage.bucket {
            let target = StorageTarget {
                bucket: bucket.clone(),
                project_id: storage.project_id.clone(),
                credentials: fallback_credentials("storage.credentials_file")?,
            };
            (target, storage.prefix.clone().unwrap_or_default())
        } else {
            return Err(PublishError::MissingDestination);
        };

        let model = model_identifier(input.model_name.as_deref(), hub_model_id)
            .ok_or(PublishError::MissingModelIdentifier)?;

        Ok(Self { target, remote_path: remote_model_path(&prefix, &input.user_id, &model) })
    }

    #[must_use]
    pub fn remote_uri(&self) -> String {
        format!("gs://{}/{}", self.target.bucket, self.remote_path)
    }
}

/// Upload the publishable files under `local_root`. Returns the upload count.
pub async fn publish_artifacts(
    connector: &dyn StoreConnector,
    local_root: &Path,
    plan: &PublishPlan,
) -> Result<usize, PublishError> {
    let store = connector.connect(&plan.target).await?;
    let root = local_root.to_path_buf();
    let files = tokio::task::spawn_blocking(move || collect_publishable(&root))
        .await
        .map_err(|e| TrainingError::Other(e.into()))??;
    debug!(files = files.len(), root = %local_root.display(), "publishing artifacts");

    let mut uploaded = 0;
    for file in &files {
        let object_name = format!("{}/{}", plan.remote_path, file.relative_path);
        store.upload_file(&file.path, &object_name).await?;
        uploaded += 1;
    }

    info!(files = uploaded, remote = %plan.remote_uri(), "Uploaded {} files to {}", uploaded, plan.remote_uri());
    Ok(uploaded)
}

/// Resolve, connect and upload, folding every failure into the outcome.
pub async fn publish(
    connector: &dyn StoreConnector,
    storage: &StorageConfig,
    input: &JobInput,
    hub_model_id: Option<&str>,
    local_root: &Path,
) -> PublishOutcome {
    let plan = match PublishPlan::resolve(input, hub_model_id, storage) {
        Ok(plan) => plan,
        Err(cause) => return PublishOutcome::Failed { cause },
    };

    match publish_artifacts(connector, local_root, &plan).await {
        Ok(uploaded) => PublishOutcome::Published { uploaded, remote_uri: plan.remote_uri() },
        Err(cause) => PublishOutcome::Failed { cause },
    }
}
