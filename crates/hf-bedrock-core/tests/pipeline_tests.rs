//! Integration tests for the migration pipeline.
//!
//! The pipeline runs against the in-memory services and a hub fake that
//! serves snapshots from a temporary directory.

use async_trait::async_trait;
use hf_bedrock_core::remote::memory::{
    MemoryIdentityService, MemoryImportService, MemoryObjectStore,
};
use hf_bedrock_core::{
    ErrorKind, ImportJobStatus, ImporterError, ModelHub, NoProgress, Pipeline, PipelineOptions,
    RecordingSleeper, RemoteServices, Result, TransferProgress,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Hub fake returning a fixed local directory.
struct LocalHub {
    root: PathBuf,
    downloads: AtomicUsize,
}

#[async_trait]
impl ModelHub for LocalHub {
    async fn snapshot(&self, _repo_id: &str) -> Result<PathBuf> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(self.root.clone())
    }
}

struct TestEnv {
    _dir: TempDir,
    store: Arc<MemoryObjectStore>,
    iam: Arc<MemoryIdentityService>,
    models: Arc<MemoryImportService>,
    hub: Arc<LocalHub>,
    sleeper: Arc<RecordingSleeper>,
    pipeline: Pipeline,
}

/// Create a snapshot with three files and a pipeline over fresh services.
fn create_test_env(options: PipelineOptions) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir_all(dir.path().join("tokenizer")).unwrap();
    std::fs::write(dir.path().join("config.json"), b"{\"model_type\":\"llama\"}").unwrap();
    std::fs::write(dir.path().join("model.safetensors"), vec![7u8; 4096]).unwrap();
    std::fs::write(dir.path().join("tokenizer").join("tokenizer.json"), b"{}").unwrap();

    let store = Arc::new(MemoryObjectStore::new());
    let iam = Arc::new(MemoryIdentityService::new());
    let models = Arc::new(MemoryImportService::new());
    let hub = Arc::new(LocalHub {
        root: dir.path().to_path_buf(),
        downloads: AtomicUsize::new(0),
    });
    let sleeper = Arc::new(RecordingSleeper::new());

    let pipeline = Pipeline::builder(
        RemoteServices::new(store.clone(), iam.clone(), models.clone()),
        hub.clone(),
    )
    .options(options)
    .with_sleeper(sleeper.clone())
    .build();

    TestEnv {
        _dir: dir,
        store,
        iam,
        models,
        hub,
        sleeper,
        pipeline,
    }
}

#[tokio::test]
async fn test_end_to_end_migration() {
    let env = create_test_env(PipelineOptions::default());
    env.models.script_statuses([
        ImportJobStatus::in_progress(),
        ImportJobStatus::completed(
            "foo-bar-1",
            MemoryImportService::model_arn("foo-bar-1"),
        ),
    ]);
    let progress = TransferProgress::new();

    let model = env
        .pipeline
        .migrate("foo/bar-1", "my-bucket", &progress)
        .await
        .unwrap();

    assert_eq!(model.name, "foo-bar-1");
    assert_eq!(
        env.store.keys("my-bucket"),
        vec![
            "models/foo-bar-1/config.json".to_string(),
            "models/foo-bar-1/model.safetensors".to_string(),
            "models/foo-bar-1/tokenizer/tokenizer.json".to_string(),
        ]
    );
    assert!(env.iam.role_exists("MyImportModelRole"));
    let policy = env
        .iam
        .role_policy("MyImportModelRole", "MyImportModelRoleS3BucketPolicy")
        .unwrap();
    assert!(policy.contains("arn:aws:s3:::my-bucket/*"));
    let trust: serde_json::Value =
        serde_json::from_str(&env.iam.trust_policy("MyImportModelRole").unwrap()).unwrap();
    assert_eq!(
        trust["Statement"][0]["Principal"]["Service"],
        "bedrock.amazonaws.com"
    );
    assert_eq!(trust["Statement"][0]["Action"][0], "sts:AssumeRole");

    let submissions = env.models.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].source_uri, "s3://my-bucket/models/foo-bar-1");
    assert_eq!(submissions[0].role_arn, "arn:aws:iam::000000000000:role/MyImportModelRole");

    let snapshot = progress.snapshot();
    assert_eq!(snapshot.files, 3);
    assert!(snapshot.finished);
    assert_eq!(snapshot.transferred_bytes, snapshot.total_bytes);
    assert_eq!(env.sleeper.sleeps().len(), 2);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let env = create_test_env(PipelineOptions::default());

    let first = env
        .pipeline
        .migrate("foo/bar-1", "s3://my-bucket", &NoProgress)
        .await
        .unwrap();
    let uploads = env.store.upload_count();
    let second = env
        .pipeline
        .migrate("foo/bar-1", "s3://my-bucket", &NoProgress)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(uploads, 3);
    assert_eq!(env.store.upload_count(), 3);
    assert_eq!(env.iam.creation_count(), 1);
    assert_eq!(env.models.submission_count(), 1);
}

#[tokio::test]
async fn test_existing_model_skips_submission() {
    let env = create_test_env(PipelineOptions::default());
    let existing = env.models.insert_model("foo-bar-1");

    let model = env
        .pipeline
        .migrate("foo/bar-1", "my-bucket", &NoProgress)
        .await
        .unwrap();

    assert_eq!(model, existing);
    assert_eq!(env.models.submission_count(), 0);
}

#[tokio::test]
async fn test_input_errors_precede_remote_calls() {
    let env = create_test_env(PipelineOptions::default());

    let err = env
        .pipeline
        .migrate("foo bar", "my-bucket", &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, ImporterError::InvalidIdentifier { .. }));

    let err = env
        .pipeline
        .migrate("foo/bar-1", "s3://", &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, ImporterError::InvalidLocation { .. }));
    assert_eq!(err.kind(), ErrorKind::Input);

    assert_eq!(env.hub.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(env.store.head_count(), 0);
    assert_eq!(env.models.submission_count(), 0);
}

#[tokio::test]
async fn test_staging_failure_stops_before_role() {
    let env = create_test_env(PipelineOptions::default());
    env.store.fail_uploads_containing("model.safetensors");

    let err = env
        .pipeline
        .migrate("foo/bar-1", "my-bucket", &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(!env.iam.role_exists("MyImportModelRole"));
    assert_eq!(env.models.submission_count(), 0);
}

#[tokio::test]
async fn test_timeout_is_distinct_from_failure() {
    let options = PipelineOptions::new()
        .with_poll_interval(Duration::from_secs(10))
        .with_max_wait(Duration::from_secs(30));

    let env = create_test_env(options.clone());
    env.models
        .script_statuses(std::iter::repeat_with(ImportJobStatus::in_progress).take(5));
    let err = env
        .pipeline
        .migrate("foo/bar-1", "my-bucket", &NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(env.sleeper.total(), Duration::from_secs(30));

    let env = create_test_env(options);
    env.models.script_statuses([ImportJobStatus::failed(
        "The model architecture is not supported",
    )]);
    let err = env
        .pipeline
        .migrate("foo/bar-1", "my-bucket", &NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::JobFailed);
    assert!(err
        .to_string()
        .contains("The model architecture is not supported"));
}

#[tokio::test]
async fn test_custom_role_and_prefix() {
    let env = create_test_env(PipelineOptions::new().with_role_name("TeamImportRole"));

    env.pipeline
        .migrate("foo/bar-1", "s3://shared/team-a/", &NoProgress)
        .await
        .unwrap();

    assert!(env.iam.role_exists("TeamImportRole"));
    assert!(!env.iam.role_exists("MyImportModelRole"));
    assert!(env
        .store
        .contains("shared", "team-a/models/foo-bar-1/config.json"));
    assert_eq!(
        env.models.submissions()[0].source_uri,
        "s3://shared/team-a/models/foo-bar-1"
    );
}
