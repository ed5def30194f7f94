//! Training configuration document handed to the trainer.
//!
//! The document is the job's `args` mapping plus run metadata. `hub_model_id`
//! is withheld from the trainer (written as `null`) and kept on the side for
//! naming the published artifacts.

use crate::error::TrainingResult;
use crate::job::{JobRequest, TrainingArgs};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct TrainingConfigDocument {
    args: TrainingArgs,
    hub_model_id: Option<String>,
}

impl TrainingConfigDocument {
    /// Build the document for `job`, pointing the trainer at `output_dir`.
    #[must_use]
    pub fn prepare(job: &JobRequest, output_dir: &Path) -> Self {
        let mut args = job.input.args.clone();
        args.insert("output_dir".to_string(), Value::String(output_dir.display().to_string()));
        args.insert("run_name".to_string(), Value::String(job.input.run_id.clone()));
        args.insert("runpod_job_id".to_string(), Value::String(job.id.0.clone()));

        let hub_model_id = match args.insert("hub_model_id".to_string(), Value::Null) {
            Some(Value::String(id)) => Some(id),
            _ => None,
        };

        Self { args, hub_model_id }
    }

    #[must_use]
    pub fn args(&self) -> &TrainingArgs {
        &self.args
    }

    /// The `hub_model_id` that was set aside before serialization.
    #[must_use]
    pub fn hub_model_id(&self) -> Option<&str> {
        self.hub_model_id.as_deref()
    }

    pub fn to_yaml(&self) -> TrainingResult<String> {
        Ok(serde_yaml::to_string(&self.args)?)
    }

    /// Serialize to `path`, replacing any previous content.
    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}
