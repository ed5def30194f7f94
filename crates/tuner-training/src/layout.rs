use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

/// Filesystem layout for fine-tuning outputs on the worker volume.
///
/// Outputs live under `<base_volume>/fine-tuning/<run_id>/<user_id>`.
#[derive(Debug, Clone)]
pub struct TrainingLayout {
    base_volume: PathBuf,
}

impl TrainingLayout {
    #[must_use]
    pub fn new(base_volume: PathBuf) -> Self {
        Self { base_volume }
    }

    #[must_use]
    pub fn base_volume(&self) -> &Path {
        &self.base_volume
    }

    #[must_use]
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.base_volume.join("fine-tuning").join(run_id)
    }

    /// Output location the trainer writes artifacts into.
    #[must_use]
    pub fn output_dir(&self, run_id: &str, user_id: &str) -> PathBuf {
        self.run_dir(run_id).join(user_id)
    }

    pub fn ensure_base_volume(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.base_volume)?;
        Ok(())
    }

    /// Recursively delete a job's output location. A missing directory is not an error.
    pub fn remove_output_dir(&self, run_id: &str, user_id: &str) -> TrainingResult<bool> {
        let dir = self.output_dir(run_id, user_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
