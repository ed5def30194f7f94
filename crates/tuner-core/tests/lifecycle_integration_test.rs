//! Integration tests for the fine-tuning job lifecycle.
//!
//! Covers intake, secret validation, hub login, training stream consumption,
//! checkpoint-filtered publication, cleanup and degraded success.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tuner_core::handler::{MESSAGE_PUBLISHED, MESSAGE_PUBLISH_FAILED};
use tuner_core::{
    FineTuneHandler, HandlerError, HubAuthenticator, HubError, HubIdentity, JobHandler, JobState, JobStatus,
    ObjectStore, StorageError, StorageTarget, StoreConnector, WorkerConfig,
};
use tuner_training::{
    JobId, JobRequest, JobSecrets, ProgressEvent, ProgressSink, ProgressStream, TrainingDelegate, TrainingError,
    TrainingResult, HF_TOKEN, WANDB_API_KEY,
};

/// Trainer double: reads the config it is given, writes artifacts into the
/// configured output_dir and replays scripted progress.
#[derive(Default)]
struct MockTrainer {
    calls: AtomicUsize,
    files: Vec<&'static str>,
    events: Vec<&'static str>,
    fail_with: Option<&'static str>,
    seen_config: Mutex<Option<String>>,
    seen_secrets: Mutex<Option<JobSecrets>>,
}

impl MockTrainer {
    fn producing(files: &[&'static str]) -> Self {
        Self { files: files.to_vec(), ..Self::default() }
    }
}

#[async_trait]
impl TrainingDelegate for MockTrainer {
    fn id(&self) -> &'static str {
        "mock"
    }

    async fn start(&self, config_path: &Path, secrets: &JobSecrets) -> TrainingResult<ProgressStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = std::fs::read_to_string(config_path)?;
        *self.seen_config.lock().unwrap() = Some(raw.clone());
        *self.seen_secrets.lock().unwrap() = Some(secrets.clone());

        let doc: serde_yaml::Value = serde_yaml::from_str(&raw)?;
        let output_dir = PathBuf::from(doc["output_dir"].as_str().unwrap());
        for rel in &self.files {
            let path = output_dir.join(rel);
            std::fs::create_dir_all(path.parent().unwrap())?;
            std::fs::write(path, rel.as_bytes())?;
        }

        let mut items: Vec<TrainingResult<ProgressEvent>> =
            self.events.iter().map(|e| Ok(ProgressEvent::Text((*e).to_string()))).collect();
        if let Some(message) = self.fail_with {
            items.push(Err(TrainingError::Trainer(message.to_string())));
        }
        Ok(ProgressStream::from_items(items))
    }
}

#[derive(Default)]
struct MockHub {
    reject: bool,
    tokens: Mutex<Vec<String>>,
}

#[async_trait]
impl HubAuthenticator for MockHub {
    async fn authenticate(&self, token: &str) -> Result<HubIdentity, HubError> {
        self.tokens.lock().unwrap().push(token.to_string());
        if self.reject {
            return Err(HubError::Rejected { status: 401, message: "Invalid credentials".to_string() });
        }
        Ok(HubIdentity { name: "trainer-bot".to_string() })
    }
}

/// In-memory object store keyed by object name.
#[derive(Default)]
struct MemoryConnector {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    fail_connect: bool,
    fail_after: Option<usize>,
    /// Replaced by a regular file once an upload lands, so cleanup cannot remove it.
    block_cleanup_of: Option<PathBuf>,
    targets: Mutex<Vec<StorageTarget>>,
}

struct MemoryStore {
    bucket: String,
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    fail_after: Option<usize>,
    block_cleanup_of: Option<PathBuf>,
    uploads: AtomicUsize,
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, target: &StorageTarget) -> Result<Box<dyn ObjectStore>, StorageError> {
        self.targets.lock().unwrap().push(target.clone());
        if self.fail_connect {
            return Err(StorageError::Credentials("malformed service account key".to_string()));
        }
        Ok(Box::new(MemoryStore {
            bucket: target.bucket.clone(),
            objects: Arc::clone(&self.objects),
            fail_after: self.fail_after,
            block_cleanup_of: self.block_cleanup_of.clone(),
            uploads: AtomicUsize::new(0),
        }))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload_file(&self, local_path: &Path, object_name: &str) -> Result<(), StorageError> {
        let done = self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| done >= limit) {
            return Err(StorageError::Upload { object: object_name.to_string(), message: "503".to_string() });
        }
        let bytes = std::fs::read(local_path)?;
        self.objects.lock().unwrap().insert(object_name.to_string(), bytes);
        if let Some(dir) = &self.block_cleanup_of {
            std::fs::remove_dir_all(dir)?;
            std::fs::write(dir, b"not a directory")?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn on_event(&self, _job_id: &JobId, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

struct Fixture {
    _temp: TempDir,
    config: WorkerConfig,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let config = WorkerConfig {
            base_volume: temp.path().join("volume"),
            config_path: temp.path().join("workspace/test_config.yaml"),
            ..WorkerConfig::default()
        };
        config.prepare_base_volume().unwrap();
        Self { _temp: temp, config }
    }

    fn output_dir(&self) -> PathBuf {
        self.config.base_volume.join("fine-tuning/r1/u1")
    }

    fn handler(&self, trainer: &Arc<MockTrainer>, hub: &Arc<MockHub>, store: &Arc<MemoryConnector>) -> FineTuneHandler {
        FineTuneHandler::new(&self.config, trainer.clone(), hub.clone(), store.clone())
    }
}

fn job_with(credentials: serde_json::Value) -> JobRequest {
    JobRequest::from_json(json!({
        "id": "job-42",
        "input": {
            "run_id": "r1",
            "user_id": "u1",
            "args": { "base_model": "llama-3-8b", "hub_model_id": "org/model-v3", "num_epochs": 1 },
            "credentials": credentials,
            "gcs_config": {
                "bucket_name": "models",
                "project_id": "proj",
                "credentials_json": "{\"type\": \"service_account\"}",
                "gcs_finetuned_model_path": "finetuned"
            }
        }
    }))
    .unwrap()
}

fn standard_job() -> JobRequest {
    job_with(json!({ "wandb_api_key": "wb-key", "hf_token": "hf-token" }))
}

#[tokio::test]
async fn test_end_to_end_publishes_final_artifacts_only() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer::producing(&["final.bin", "checkpoint-500/state.pt"]));
    let hub = Arc::new(MockHub::default());
    let store = Arc::new(MemoryConnector::default());

    let report = fixture.handler(&trainer, &hub, &store).execute(&standard_job()).await.unwrap();

    assert_eq!(report.state, JobState::PublishSucceeded);
    assert_eq!(report.uploaded, Some(1));
    assert_eq!(report.output.status, JobStatus::Completed);
    assert_eq!(report.output.message, MESSAGE_PUBLISHED);
    assert_eq!(report.output.model_gcs_path.as_deref(), Some("gs://models/finetuned/u1/v3"));

    let objects = store.objects.lock().unwrap();
    let names: Vec<&str> = objects.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["finetuned/u1/v3/final.bin"]);
    assert_eq!(objects["finetuned/u1/v3/final.bin"], b"final.bin");

    assert!(!fixture.output_dir().exists());
    assert_eq!(trainer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*hub.tokens.lock().unwrap(), vec!["hf-token".to_string()]);
}

#[tokio::test]
async fn test_config_document_hides_hub_model_id() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer::producing(&["final.bin"]));
    let handler = fixture.handler(&trainer, &Arc::new(MockHub::default()), &Arc::new(MemoryConnector::default()));

    handler.execute(&standard_job()).await.unwrap();

    let written = trainer.seen_config.lock().unwrap().clone().unwrap();
    assert!(!written.contains("org/model-v3"));
    let doc: serde_yaml::Value = serde_yaml::from_str(&written).unwrap();
    assert_eq!(doc["hub_model_id"], serde_yaml::Value::Null);
    assert_eq!(doc["run_name"].as_str(), Some("r1"));
    assert_eq!(doc["runpod_job_id"].as_str(), Some("job-42"));
    assert_eq!(doc["base_model"].as_str(), Some("llama-3-8b"));
    assert_eq!(doc["output_dir"].as_str(), Some(fixture.output_dir().to_str().unwrap()));
}

#[tokio::test]
async fn test_secrets_are_passed_to_trainer_not_process() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer::producing(&["final.bin"]));
    let handler = fixture.handler(&trainer, &Arc::new(MockHub::default()), &Arc::new(MemoryConnector::default()));

    let wandb_before = std::env::var_os(WANDB_API_KEY);
    handler.execute(&standard_job()).await.unwrap();

    let secrets = trainer.seen_secrets.lock().unwrap().clone().unwrap();
    assert_eq!(secrets.get(HF_TOKEN), Some("hf-token"));
    assert_eq!(secrets.get(WANDB_API_KEY), Some("wb-key"));
    assert_eq!(std::env::var_os(WANDB_API_KEY), wandb_before);
}

#[tokio::test]
async fn test_progress_events_relayed_in_order() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer {
        files: vec!["final.bin"],
        events: vec!["step 1", "step 2", "step 3"],
        ..MockTrainer::default()
    });
    let sink = Arc::new(RecordingSink::default());
    let handler = fixture
        .handler(&trainer, &Arc::new(MockHub::default()), &Arc::new(MemoryConnector::default()))
        .with_progress_sink(sink.clone());

    handler.execute(&standard_job()).await.unwrap();

    assert_eq!(*sink.events.lock().unwrap(), vec!["step 1", "step 2", "step 3"]);
}

#[tokio::test]
async fn test_missing_secret_aborts_before_training() {
    for credentials in [
        json!({ "hf_token": "hf-token" }),
        json!({ "wandb_api_key": "wb-key" }),
        json!({ "wandb_api_key": "", "hf_token": "hf-token" }),
        json!({}),
    ] {
        let fixture = Fixture::new();
        let trainer = Arc::new(MockTrainer::producing(&["final.bin"]));
        let hub = Arc::new(MockHub::default());
        let store = Arc::new(MemoryConnector::default());

        let err = fixture.handler(&trainer, &hub, &store).execute(&job_with(credentials)).await.unwrap_err();

        match err {
            HandlerError::MissingSecret { job_id, .. } => assert_eq!(job_id, "job-42"),
            other => panic!("expected MissingSecret, got {other:?}"),
        }
        assert_eq!(trainer.calls.load(Ordering::SeqCst), 0);
        assert!(hub.tokens.lock().unwrap().is_empty());
        assert!(store.targets.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_hub_login_failure_is_fatal() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer::producing(&["final.bin"]));
    let hub = Arc::new(MockHub { reject: true, ..MockHub::default() });

    let err = fixture
        .handler(&trainer, &hub, &Arc::new(MemoryConnector::default()))
        .execute(&standard_job())
        .await
        .unwrap_err();

    assert!(matches!(err, HandlerError::Authentication(_)));
    assert_eq!(trainer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_training_error_propagates_without_publication() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer {
        files: vec!["final.bin"],
        events: vec!["step 1"],
        fail_with: Some("CUDA out of memory"),
        ..MockTrainer::default()
    });
    let store = Arc::new(MemoryConnector::default());

    let err = fixture
        .handler(&trainer, &Arc::new(MockHub::default()), &store)
        .execute(&standard_job())
        .await
        .unwrap_err();

    assert!(matches!(err, HandlerError::Training(TrainingError::Trainer(_))));
    assert!(store.targets.lock().unwrap().is_empty());
    assert!(fixture.output_dir().join("final.bin").exists());
}

#[tokio::test]
async fn test_storage_credential_failure_is_degraded_success() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer::producing(&["final.bin", "config.json"]));
    let store = Arc::new(MemoryConnector { fail_connect: true, ..MemoryConnector::default() });

    let report = fixture
        .handler(&trainer, &Arc::new(MockHub::default()), &store)
        .execute(&standard_job())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::PublishFailed);
    assert_eq!(report.output.status, JobStatus::Completed);
    assert_eq!(report.output.message, MESSAGE_PUBLISH_FAILED);
    assert!(report.output.model_gcs_path.is_none());
    assert!(fixture.output_dir().join("final.bin").exists());
    assert!(fixture.output_dir().join("config.json").exists());
}

#[tokio::test]
async fn test_partial_upload_failure_keeps_local_output() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer::producing(&["a.bin", "b.bin", "c.bin"]));
    let store = Arc::new(MemoryConnector { fail_after: Some(1), ..MemoryConnector::default() });

    let report = fixture
        .handler(&trainer, &Arc::new(MockHub::default()), &store)
        .execute(&standard_job())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::PublishFailed);
    assert_eq!(report.output.message, MESSAGE_PUBLISH_FAILED);
    // One object made it before the failure; nothing is rolled back.
    assert_eq!(store.objects.lock().unwrap().len(), 1);
    assert!(fixture.output_dir().is_dir());
}

#[tokio::test]
async fn test_missing_model_identifier_is_degraded_success() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer::producing(&["final.bin"]));
    let store = Arc::new(MemoryConnector::default());
    let mut job = standard_job();
    job.input.args.remove("hub_model_id");

    let report = fixture.handler(&trainer, &Arc::new(MockHub::default()), &store).execute(&job).await.unwrap();

    assert_eq!(report.state, JobState::PublishFailed);
    assert!(store.objects.lock().unwrap().is_empty());
    assert!(fixture.output_dir().join("final.bin").exists());
}

#[tokio::test]
async fn test_worker_config_destination_with_model_name() {
    let mut fixture = Fixture::new();
    fixture.config.storage.bucket = Some("env-bucket".to_string());
    fixture.config.storage.prefix = Some("tuned".to_string());
    fixture.config.storage.credentials_file = Some(PathBuf::from("/secrets/sa.json"));
    let trainer = Arc::new(MockTrainer::producing(&["adapter_model.safetensors"]));
    let store = Arc::new(MemoryConnector::default());

    let mut job = standard_job();
    job.input.gcs_config = None;
    job.input.model_name = Some("support-bot".to_string());

    let output = fixture.handler(&trainer, &Arc::new(MockHub::default()), &store).handle(job).await.unwrap();

    assert_eq!(output.model_gcs_path.as_deref(), Some("gs://env-bucket/tuned/u1/support-bot"));
    assert!(store.objects.lock().unwrap().contains_key("tuned/u1/support-bot/adapter_model.safetensors"));
}

#[tokio::test]
async fn test_invalid_job_rejected_before_side_effects() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer::producing(&["final.bin"]));
    let mut job = standard_job();
    job.input.run_id = "..".to_string();

    let err = fixture
        .handler(&trainer, &Arc::new(MockHub::default()), &Arc::new(MemoryConnector::default()))
        .execute(&job)
        .await
        .unwrap_err();

    assert!(matches!(err, HandlerError::InvalidJob(_)));
    assert!(!fixture.config.config_path.exists());
    assert_eq!(trainer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rerun_computes_same_remote_path() {
    let mut paths = Vec::new();
    for _ in 0..2 {
        let fixture = Fixture::new();
        let trainer = Arc::new(MockTrainer::producing(&["final.bin"]));
        let report = fixture
            .handler(&trainer, &Arc::new(MockHub::default()), &Arc::new(MemoryConnector::default()))
            .execute(&standard_job())
            .await
            .unwrap();
        paths.push(report.output.model_gcs_path);
    }
    assert_eq!(paths[0], paths[1]);
}

#[tokio::test]
async fn test_cleanup_failure_keeps_published_status() {
    let fixture = Fixture::new();
    let trainer = Arc::new(MockTrainer::producing(&["final.bin"]));
    let store =
        Arc::new(MemoryConnector { block_cleanup_of: Some(fixture.output_dir()), ..MemoryConnector::default() });

    let report = fixture
        .handler(&trainer, &Arc::new(MockHub::default()), &store)
        .execute(&standard_job())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::PublishSucceeded);
    assert_eq!(report.output.status, JobStatus::Completed);
    assert_eq!(report.output.message, MESSAGE_PUBLISHED);
    assert_eq!(report.output.model_gcs_path.as_deref(), Some("gs://models/finetuned/u1/v3"));
    assert!(fixture.output_dir().is_file());
}

#[tokio::test]
async fn test_missing_storage_credentials_is_degraded_success() {
    for credentials_json in [None, Some("   ")] {
        let fixture = Fixture::new();
        let trainer = Arc::new(MockTrainer::producing(&["final.bin"]));
        let store = Arc::new(MemoryConnector::default());
        let mut job = standard_job();
        if let Some(gcs) = job.input.gcs_config.as_mut() {
            gcs.credentials_json = credentials_json.map(str::to_string);
        }

        let report = fixture.handler(&trainer, &Arc::new(MockHub::default()), &store).execute(&job).await.unwrap();

        assert_eq!(report.state, JobState::PublishFailed);
        assert_eq!(report.output.message, MESSAGE_PUBLISH_FAILED);
        assert!(store.targets.lock().unwrap().is_empty());
        assert!(fixture.output_dir().join("final.bin").exists());
    }
}
