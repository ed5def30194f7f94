//! Tuner Training
//!
//! Backend-agnostic primitives for one fine-tuning job:
//! - The job request data model (`JobRequest`)
//! - The on-volume output layout and the trainer configuration document
//! - Job-scoped secrets for the trainer process
//! - Training delegates (`TrainingDelegate`) and their progress streams
//! - Discovery of publishable artifacts

pub mod artifacts;
pub mod document;
pub mod error;
pub mod job;
pub mod layout;
pub mod progress;
pub mod secrets;
pub mod trainer;

pub use artifacts::{collect_publishable, is_transient_checkpoint, model_identifier, remote_model_path, ArtifactFile};
pub use document::TrainingConfigDocument;
pub use error::{TrainingError, TrainingResult};
pub use job::{Credentials, GcsConfig, JobId, JobInput, JobRequest, TrainingArgs};
pub use layout::TrainingLayout;
pub use progress::{ProgressEvent, ProgressSender, ProgressSink, ProgressStream, TracingProgressSink};
pub use secrets::{JobSecrets, HF_TOKEN, REQUIRED_SECRETS, WANDB_API_KEY};
pub use trainer::{SubprocessTrainer, TrainingDelegate};
