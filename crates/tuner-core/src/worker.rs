//! Serverless worker runtime.
//!
//! Feeds jobs to a [`JobHandler`] one at a time, either from a local test
//! input file or by polling the platform's job queue over HTTP.

use crate::config::PollConfig;
use crate::error::{HandlerError, Result};
use crate::handler::JobOutput;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tuner_training::JobRequest;

/// Job id used for local test input that carries none.
pub const LOCAL_TEST_JOB_ID: &str = "local_test";

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: JobRequest) -> Result<JobOutput>;
}

pub struct Worker<H> {
    handler: H,
    config: PollConfig,
    client: Client,
}

impl<H: JobHandler> Worker<H> {
    #[must_use]
    pub fn new(handler: H, config: PollConfig) -> Self {
        Self { handler, config, client: Client::new() }
    }

    /// Run a single job read from a JSON file (`{"id": ..., "input": {...}}`).
    pub async fn run_local(&self, input_path: &Path) -> Result<JobOutput> {
        let raw = tokio::fs::read_to_string(input_path)
            .await
            .map_err(|e| HandlerError::InvalidJob(format!("cannot read {}: {e}", input_path.display())))?;
        let mut value: Value = serde_json::from_str(&raw)
            .map_err(|e| HandlerError::InvalidJob(format!("{} is not valid JSON: {e}", input_path.display())))?;
        if let Some(obj) = value.as_object_mut() {
            obj.entry("id").or_insert_with(|| Value::String(LOCAL_TEST_JOB_ID.to_string()));
        }

        let job = parse_job(value)?;
        info!(job_id = %job.id, "running local test job");
        self.handler.handle(job).await
    }

    /// Poll the job queue until the process is stopped.
    pub async fn run(&self) -> Result<()> {
        if self.config.job_take_url.is_none() {
            return Err(HandlerError::Worker("worker.job_take_url is not configured".to_string()));
        }
        let idle = Duration::from_millis(self.config.poll_interval_ms);
        info!(worker_id = %self.config.id, "worker started");

        loop {
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(idle).await,
                Err(e) => {
                    error!(error = %e, "job queue poll failed");
                    tokio::time::sleep(idle).await;
                }
            }
        }
    }

    /// Take at most one job, run it and report the result.
    ///
    /// Returns `false` when the queue had nothing to hand out.
    pub async fn poll_once(&self) -> Result<bool> {
        let (Some(take_url), Some(done_url)) = (&self.config.job_take_url, &self.config.job_done_url) else {
            return Err(HandlerError::Worker("job queue URLs are not configured".to_string()));
        };
        let take_url = take_url.replace("$ID", &self.config.id);

        let response = self.client.get(&take_url).send().await.map_err(|e| HandlerError::Worker(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(HandlerError::Worker(format!("job take returned {status}")));
        }

        let body = response.text().await.map_err(|e| HandlerError::Worker(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(false);
        }
        let value: Value =
            serde_json::from_str(&body).map_err(|e| HandlerError::Worker(format!("job take body is not JSON: {e}")))?;
        if value.as_object().is_some_and(|obj| obj.is_empty()) {
            return Ok(false);
        }

        let job_id = value.get("id").and_then(Value::as_str).map(str::to_string);
        let payload = match parse_job(value) {
            Ok(job) => {
                debug!(job_id = %job.id, "took job");
                match self.handler.handle(job).await {
                    Ok(output) => json!({ "output": output }),
                    Err(e) => json!({ "error": e.to_string() }),
                }
            }
            Err(e) => {
                warn!(error = %e, "rejected malformed job");
                json!({ "error": e.to_string() })
            }
        };

        let Some(job_id) = job_id else {
            return Err(HandlerError::Worker("job without id cannot be reported".to_string()));
        };
        self.report(done_url, &job_id, &payload).await?;
        Ok(true)
    }

    async fn report(&self, done_url: &str, job_id: &str, payload: &Value) -> Result<()> {
        let url = done_url.replace("$ID", job_id);
        let response =
            self.client.post(&url).json(payload).send().await.map_err(|e| HandlerError::Worker(e.to_string()))?;
        if !response.status().is_success() {
            return Err(HandlerError::Worker(format!("job result post returned {}", response.status())));
        }
        debug!(job_id = %job_id, "reported job result");
        Ok(())
    }
}

fn parse_job(value: Value) -> Result<JobRequest> {
    JobRequest::from_json(value).map_err(|e| HandlerError::InvalidJob(e.to_string()))
}
