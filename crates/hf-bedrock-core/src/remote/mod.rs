//! Remote service ports.
//!
//! The pipeline talks to three remote services (object storage, identity and
//! model import) and to the model hub. Each is a trait here so the pipeline
//! can run against the AWS SDK in production and against the in-memory
//! implementations in [`memory`] in tests.
//!
//! Existence lookups return `Ok(None)` / `Ok(false)` for "not found" and
//! reserve `Err` for failures that should stop the caller.

pub mod aws;
pub mod memory;

use crate::error::Result;
use crate::staging::ProgressSink;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An IAM-style role the import service can assume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleHandle {
    pub name: String,
    pub arn: String,
}

/// A model registered with the import service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub name: String,
    pub arn: String,
}

/// A submitted import job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    pub arn: String,
}

/// Everything needed to submit an import job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJobRequest {
    pub job_name: String,
    pub model_name: String,
    pub role_arn: String,
    pub source_uri: String,
}

/// Reported state of an import job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    InProgress,
    Completed,
    Failed,
    /// Any status the importer does not know about.
    Other(String),
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::InProgress => f.write_str("InProgress"),
            JobState::Completed => f.write_str("Completed"),
            JobState::Failed => f.write_str("Failed"),
            JobState::Other(s) => f.write_str(s),
        }
    }
}

/// One status check of an import job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJobStatus {
    pub state: JobState,
    /// Failure message reported by the service, if any.
    pub failure_message: Option<String>,
    /// Name of the imported model, once known.
    pub model_name: Option<String>,
    /// ARN of the imported model, once known.
    pub model_arn: Option<String>,
}

impl ImportJobStatus {
    pub fn in_progress() -> Self {
        Self {
            state: JobState::InProgress,
            failure_message: None,
            model_name: None,
            model_arn: None,
        }
    }

    pub fn completed(model_name: impl Into<String>, model_arn: impl Into<String>) -> Self {
        Self {
            state: JobState::Completed,
            failure_message: None,
            model_name: Some(model_name.into()),
            model_arn: Some(model_arn.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            failure_message: Some(message.into()),
            model_name: None,
            model_arn: None,
        }
    }
}

/// Object storage used to stage model files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether an object exists at `key`.
    ///
    /// Returns `Ok(false)` only when the store reports the object as not
    /// found; any other failure (e.g. access denied) is an error.
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Upload a local file to `key`.
    ///
    /// The object must not become visible until the whole file is stored.
    /// Transferred bytes are reported to `progress` as they complete.
    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<()>;

    /// Delete every object whose key starts with `prefix`.
    ///
    /// Returns the number of deleted objects.
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<usize>;
}

/// Identity service holding the import role.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn find_role(&self, role_name: &str) -> Result<Option<RoleHandle>>;

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<RoleHandle>;

    async fn put_role_policy(&self, role_name: &str, policy_name: &str, policy: &str)
        -> Result<()>;

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<()>;

    async fn delete_role(&self, role_name: &str) -> Result<()>;
}

/// Model import service.
#[async_trait]
pub trait ModelImportService: Send + Sync {
    async fn find_imported_model(&self, model_name: &str) -> Result<Option<ModelHandle>>;

    async fn create_import_job(&self, request: &ImportJobRequest) -> Result<JobHandle>;

    async fn get_import_job(&self, job: &JobHandle) -> Result<ImportJobStatus>;

    async fn delete_imported_model(&self, model_name: &str) -> Result<()>;
}

/// Source of model snapshots.
#[async_trait]
pub trait ModelHub: Send + Sync {
    /// Make a complete local copy of a model repository and return its root.
    async fn snapshot(&self, repo_id: &str) -> Result<PathBuf>;
}

pub type DynObjectStore = Arc<dyn ObjectStore>;
pub type DynIdentityService = Arc<dyn IdentityService>;
pub type DynModelImportService = Arc<dyn ModelImportService>;
pub type DynModelHub = Arc<dyn ModelHub>;

/// The three remote services a migration needs.
#[derive(Clone)]
pub struct RemoteServices {
    pub store: DynObjectStore,
    pub identity: DynIdentityService,
    pub models: DynModelImportService,
}

impl RemoteServices {
    pub fn new(
        store: DynObjectStore,
        identity: DynIdentityService,
        models: DynModelImportService,
    ) -> Self {
        Self {
            store,
            identity,
            models,
        }
    }

    /// Services backed by the AWS SDK clients built from `config`.
    pub fn from_sdk_config(config: &aws_config::SdkConfig) -> Self {
        Self {
            store: Arc::new(aws::S3ObjectStore::new(config)),
            identity: Arc::new(aws::IamIdentityService::new(config)),
            models: Arc::new(aws::BedrockImportService::new(config)),
        }
    }
}
