//! Tuner Core - fine-tuning job handler for serverless GPU workers.
//!
//! This crate provides:
//! - The job lifecycle orchestrator (`FineTuneHandler`)
//! - Worker configuration
//! - Model hub authentication and object storage clients
//! - Artifact publication with checkpoint filtering
//! - The serverless worker runtime (`Worker`)
//!
//! # Example
//!
//! ```rust,no_run
//! use tuner_core::{FineTuneHandler, Worker, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> tuner_core::Result<()> {
//!     let config = WorkerConfig::load(None)?;
//!     let worker = Worker::new(FineTuneHandler::from_config(&config), config.worker.clone());
//!     worker.run().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod publish;
pub mod storage;
pub mod worker;

pub use config::{LogFormat, WorkerConfig, WorkerConfigError};
pub use error::{HandlerError, Result};
pub use handler::{FineTuneHandler, JobOutput, JobReport, JobState, JobStatus};
pub use hub::{HfHubClient, HubAuthenticator, HubError, HubIdentity};
pub use publish::{publish, publish_artifacts, PublishError, PublishOutcome, PublishPlan};
pub use storage::{ObjectStore, StorageCredentials, StorageError, StorageTarget, StoreConnector};
pub use worker::{JobHandler, Worker};
