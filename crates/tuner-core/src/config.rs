//! Worker configuration.
//!
//! Precedence (later wins):
//! 1. Built-in defaults
//! 2. Config file (`--config <path>`, else `./tuner.toml` when present)
//! 3. `TUNER_*` environment variables, `__` separating nested keys
//!    (e.g. `TUNER_STORAGE__BUCKET`)
//! 4. `BASE_VOLUME`, which overrides `base_volume`

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tuner_training::{TrainingLayout, TrainingResult};

pub const DEFAULT_CONFIG_FILE: &str = "tuner.toml";
pub const DEFAULT_BASE_VOLUME: &str = "/runpod-volume";
pub const DEFAULT_TRAINING_CONFIG_PATH: &str = "/workspace/test_config.yaml";

#[derive(Debug, Error)]
pub enum WorkerConfigError {
    #[error("failed to load worker configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid worker configuration: {0}")]
    Invalid(String),
}

pub type WorkerConfigResult<T> = std::result::Result<T, WorkerConfigError>;

/// Output format for the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Root of the persistent volume that holds training outputs.
    #[serde(default = "default_base_volume")]
    pub base_volume: PathBuf,
    /// Where the trainer configuration document is written.
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: PollConfig,
}

/// Command used to run the external trainer. The config path is appended.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainerConfig {
    #[serde(default = "default_trainer_program")]
    pub program: String,
    #[serde(default = "default_trainer_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self { program: default_trainer_program(), args: default_trainer_args(), working_dir: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_hub_endpoint")]
    pub endpoint: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { endpoint: default_hub_endpoint() }
    }
}

/// Object storage settings. `bucket`/`prefix` are the fallback destination
/// for jobs that carry no `gcs_config`.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Service account key file for the fallback destination.
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    #[serde(default = "default_storage_endpoint")]
    pub endpoint: String,
    /// Overrides the token URI found in the service account key.
    #[serde(default)]
    pub token_uri: Option<String>,
    /// Upload without credentials when neither the job nor `credentials_file`
    /// provides any. Only meant for emulators.
    #[serde(default)]
    pub anonymous: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: None,
            project_id: None,
            credentials_file: None,
            endpoint: default_storage_endpoint(),
            token_uri: None,
            anonymous: false,
        }
    }
}

/// Job queue polling. Without `job_take_url` the worker only runs local test input.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_worker_id")]
    pub id: String,
    #[serde(default)]
    pub job_take_url: Option<String>,
    #[serde(default)]
    pub job_done_url: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            job_take_url: None,
            job_done_url: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_base_volume() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_VOLUME)
}

fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_TRAINING_CONFIG_PATH)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_trainer_program() -> String {
    "python3".to_string()
}

fn default_trainer_args() -> Vec<String> {
    vec!["-m".to_string(), "train".to_string()]
}

fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}

fn default_storage_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_worker_id() -> String {
    "local".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_volume: default_base_volume(),
            config_path: default_config_path(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            trainer: TrainerConfig::default(),
            hub: HubConfig::default(),
            storage: StorageConfig::default(),
            worker: PollConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Load from the optional config file and the process environment.
    pub fn load(file: Option<&Path>) -> WorkerConfigResult<Self> {
        Self::load_from(file, None)
    }

    /// Like [`WorkerConfig::load`], reading variables from `env` instead of
    /// the process environment when it is given.
    pub fn load_from(file: Option<&Path>, env: Option<HashMap<String, String>>) -> WorkerConfigResult<Self> {
        let legacy_volume = match &env {
            Some(vars) => vars.get("BASE_VOLUME").cloned(),
            None => std::env::var("BASE_VOLUME").ok(),
        };

        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix("TUNER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(" ")
                    .with_list_parse_key("trainer.args")
                    .try_parsing(true)
                    .source(env),
            )
            .set_override_option("base_volume", legacy_volume)?
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> WorkerConfigResult<()> {
        if self.trainer.program.trim().is_empty() {
            return Err(WorkerConfigError::Invalid("trainer.program must not be empty".to_string()));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(WorkerConfigError::Invalid("worker.poll_interval_ms must be > 0".to_string()));
        }
        if self.worker.job_take_url.is_some() != self.worker.job_done_url.is_some() {
            return Err(WorkerConfigError::Invalid(
                "worker.job_take_url and worker.job_done_url must be set together".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn layout(&self) -> TrainingLayout {
        TrainingLayout::new(self.base_volume.clone())
    }

    /// Create the base volume if it does not exist yet.
    pub fn prepare_base_volume(&self) -> TrainingResult<()> {
        self.layout().ensure_base_volume()
    }
}
