use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Open key-value mapping of training arguments, passed through to the trainer.
pub type TrainingArgs = Map<String, Value>;

/// Platform-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One fine-tuning request as delivered by the serverless platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: JobId,
    pub input: JobInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    pub run_id: String,
    pub user_id: String,
    #[serde(default)]
    pub args: TrainingArgs,
    #[serde(default)]
    pub credentials: Credentials,
    /// Upload destination. When absent the worker falls back to its configured bucket.
    #[serde(default)]
    pub gcs_config: Option<GcsConfig>,
    /// Explicit model identifier for the remote path; wins over `hub_model_id`.
    #[serde(default)]
    pub model_name: Option<String>,
}

/// Secret tokens supplied with the job.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub wandb_api_key: Option<String>,
    #[serde(default)]
    pub hf_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("wandb_api_key", &self.wandb_api_key.as_ref().map(|_| "<redacted>"))
            .field("hf_token", &self.hf_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Google Cloud Storage destination descriptor.
#[derive(Clone, Serialize, Deserialize)]
pub struct GcsConfig {
    pub bucket_name: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Inline service account key (JSON document as a string).
    #[serde(default)]
    pub credentials_json: Option<String>,
    pub gcs_finetuned_model_path: String,
}

impl std::fmt::Debug for GcsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsConfig")
            .field("bucket_name", &self.bucket_name)
            .field("project_id", &self.project_id)
            .field("credentials_json", &self.credentials_json.as_ref().map(|_| "<redacted>"))
            .field("gcs_finetuned_model_path", &self.gcs_finetuned_model_path)
            .finish()
    }
}

impl JobRequest {
    /// Parse a job from the platform's JSON payload.
    pub fn from_json(value: Value) -> TrainingResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| TrainingError::InvalidJob(format!("malformed job payload: {e}")))
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.id.0.trim().is_empty() {
            return Err(TrainingError::InvalidJob("id is required".to_string()));
        }
        validate_path_segment("run_id", &self.input.run_id)?;
        validate_path_segment("user_id", &self.input.user_id)?;
        Ok(())
    }
}

fn validate_path_segment(field: &str, value: &str) -> TrainingResult<()> {
    if value.trim().is_empty() {
        return Err(TrainingError::InvalidJob(format!("{field} is required")));
    }
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(TrainingError::InvalidJob(format!(
            "{field} must be a single path segment, got {value:?}"
        )));
    }
    Ok(())
}
