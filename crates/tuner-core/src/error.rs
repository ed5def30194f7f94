//! Error types for the job handler.
//!
//! Only intake, environment preparation and training failures are errors.
//! Publication failures are folded into a degraded success instead (see
//! [`crate::publish::PublishOutcome`]).

use crate::config::WorkerConfigError;
use crate::hub::HubError;
use thiserror::Error;
use tuner_training::TrainingError;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The job payload is malformed or fails validation.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// A required secret was not present after injection.
    #[error("required secret {key} not found for job {job_id}; it must be supplied in input.credentials")]
    MissingSecret { key: &'static str, job_id: String },

    /// Model hub login failed.
    #[error("model hub authentication failed: {0}")]
    Authentication(#[from] HubError),

    /// Writing the trainer configuration or running the trainer failed.
    #[error("training failed: {0}")]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Config(#[from] WorkerConfigError),

    /// Job queue communication failed.
    #[error("worker error: {0}")]
    Worker(String),
}

/// Result type alias for handler operations.
pub type Result<T> = std::result::Result<T, HandlerError>;
