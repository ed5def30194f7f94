//! Fine-tuning job lifecycle.
//!
//! ```text
//! Running ──▶ TrainingFailed                      (error returned)
//!    └──────▶ TrainingSucceeded ──▶ PublishSucceeded   (COMPLETED, local output removed)
//!                              └──▶ PublishFailed      (COMPLETED, local output kept)
//! ```

use crate::config::{StorageConfig, WorkerConfig};
use crate::error::{HandlerError, Result};
use crate::hub::{HfHubClient, HubAuthenticator};
use crate::publish::{publish, PublishOutcome};
use crate::storage::{GcsConnector, StoreConnector};
use crate::worker::JobHandler;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tuner_training::{
    JobRequest, JobSecrets, ProgressSink, SubprocessTrainer, TracingProgressSink, TrainingConfigDocument,
    TrainingDelegate, TrainingError, TrainingLayout, TrainingResult, HF_TOKEN,
};

pub const MESSAGE_PUBLISHED: &str = "Training complete, model uploaded to GCS and local cleaned";
pub const MESSAGE_PUBLISH_FAILED: &str = "Training complete, but GCS upload failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Completed,
}

/// Response returned to the serverless platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    pub status: JobStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_gcs_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    TrainingFailed,
    TrainingSucceeded,
    PublishSucceeded,
    PublishFailed,
}

/// Terminal state of a job that did not fail, plus its response.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub state: JobState,
    pub uploaded: Option<usize>,
    pub output: JobOutput,
}

pub struct FineTuneHandler {
    layout: TrainingLayout,
    config_path: PathBuf,
    storage: StorageConfig,
    delegate: Arc<dyn TrainingDelegate>,
    hub: Arc<dyn HubAuthenticator>,
    connector: Arc<dyn StoreConnector>,
    sink: Arc<dyn ProgressSink>,
}

impl FineTuneHandler {
    #[must_use]
    pub fn new(
        config: &WorkerConfig,
        delegate: Arc<dyn TrainingDelegate>,
        hub: Arc<dyn HubAuthenticator>,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            layout: config.layout(),
            config_path: config.config_path.clone(),
            storage: config.storage.clone(),
            delegate,
            hub,
            connector,
            sink: Arc::new(TracingProgressSink),
        }
    }

    /// Production wiring: subprocess trainer, Hugging Face Hub, Cloud Storage.
    #[must_use]
    pub fn from_config(config: &WorkerConfig) -> Self {
        let mut trainer = SubprocessTrainer::new(&config.trainer.program, config.trainer.args.clone());
        if let Some(dir) = &config.trainer.working_dir {
            trainer = trainer.with_working_dir(dir);
        }
        let connector = GcsConnector::new(&config.storage.endpoint).with_token_uri(config.storage.token_uri.clone());

        Self::new(config, Arc::new(trainer), Arc::new(HfHubClient::new(&config.hub.endpoint)), Arc::new(connector))
    }

    #[must_use]
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run one job to a terminal state.
    pub async fn execute(&self, job: &JobRequest) -> Result<JobReport> {
        let span = info_span!("job", job_id = %job.id, run_id = %job.input.run_id, user_id = %job.input.user_id);
        async move {
            let result = self.train(job).await;
            match result {
                Ok(hub_model_id) => {
                    debug!(state = ?JobState::TrainingSucceeded, "training finished");
                    Ok(self.finish(job, hub_model_id.as_deref()).await)
                }
                Err(e) => {
                    error!(state = ?JobState::TrainingFailed, error = %e, "job failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Intake, environment preparation and training. Returns the withheld
    /// `hub_model_id` for naming the upload.
    async fn train(&self, job: &JobRequest) -> Result<Option<String>> {
        debug!(state = ?JobState::Running, "job accepted");
        job.validate().map_err(|e| match e {
            TrainingError::InvalidJob(message) => HandlerError::InvalidJob(message),
            other => HandlerError::Training(other),
        })?;

        let output_dir = self.layout.output_dir(&job.input.run_id, &job.input.user_id);
        let document = TrainingConfigDocument::prepare(job, &output_dir);
        let (pending, config_path) = (document.clone(), self.config_path.clone());
        blocking(move || pending.write(&config_path)).await?;
        debug!(config = %self.config_path.display(), output_dir = %output_dir.display(), "wrote training config");

        let mut secrets = JobSecrets::new();
        secrets.inject(&job.input.credentials);
        if let Some(key) = secrets.missing_required() {
            error!(job_id = %job.id, "Required secret {} not found; supply it in input.credentials", key);
            return Err(HandlerError::MissingSecret { key, job_id: job.id.0.clone() });
        }

        let token = secrets.get(HF_TOKEN).unwrap_or_default();
        let identity = self.hub.authenticate(token).await?;
        debug!(account = %identity.name, "authenticated to model hub");

        info!(trainer = self.delegate.id(), "Starting Training.");
        let mut progress = self.delegate.start(&self.config_path, &secrets).await?;
        while let Some(item) = progress.next().await {
            let event = item?;
            self.sink.on_event(&job.id, &event);
        }
        drop(secrets);
        info!("Training Complete.");

        Ok(document.hub_model_id().map(str::to_string))
    }

    async fn finish(&self, job: &JobRequest, hub_model_id: Option<&str>) -> JobReport {
        let output_dir = self.layout.output_dir(&job.input.run_id, &job.input.user_id);
        let outcome = publish(self.connector.as_ref(), &self.storage, &job.input, hub_model_id, &output_dir).await;

        match outcome {
            PublishOutcome::Published { uploaded, remote_uri } => {
                let (layout, run_id, user_id) = (self.layout.clone(), job.input.run_id.clone(), job.input.user_id.clone());
                match blocking(move || layout.remove_output_dir(&run_id, &user_id)).await {
                    Ok(_) => info!(output_dir = %output_dir.display(), "Cleaned local output dir"),
                    Err(e) => warn!(error = %e, output_dir = %output_dir.display(), "Failed to clean local output dir"),
                }
                debug!(state = ?JobState::PublishSucceeded, "job completed");
                JobReport {
                    state: JobState::PublishSucceeded,
                    uploaded: Some(uploaded),
                    output: JobOutput {
                        status: JobStatus::Completed,
                        message: MESSAGE_PUBLISHED.to_string(),
                        model_gcs_path: Some(remote_uri),
                    },
                }
            }
            PublishOutcome::Failed { cause } => {
                error!(error = %cause, output_dir = %output_dir.display(), "GCS upload failed; local output kept");
                JobReport {
                    state: JobState::PublishFailed,
                    uploaded: None,
                    output: JobOutput {
                        status: JobStatus::Completed,
                        message: MESSAGE_PUBLISH_FAILED.to_string(),
                        model_gcs_path: None,
                    },
                }
            }
        }
    }
}

/// Run filesystem work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> TrainingResult<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f).await.map_err(|e| TrainingError::Other(e.into()))?;
    Ok(result?)
}

#[async_trait]
impl JobHandler for FineTuneHandler {
    async fn handle(&self, job: JobRequest) -> Result<JobOutput> {
        self.execute(&job).await.map(|report| report.output)
    }
}
