//! Centralized configuration for the importer.
//!
//! Constants are grouped per stage. Values that callers may override at
//! runtime are carried by [`PipelineOptions`], which defaults to these
//! constants.

use std::time::Duration;

/// Configuration for staging model files in object storage.
pub struct StagingConfig;

impl StagingConfig {
    /// Number of files uploaded concurrently.
    pub const DEFAULT_CONCURRENCY: usize = 20;
    /// Directory under the destination prefix that holds staged models.
    pub const MODELS_DIR: &'static str = "models";
    /// Files larger than this are uploaded in parts.
    pub const MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;
    /// Size of each part of a multipart upload.
    pub const MULTIPART_PART_SIZE: u64 = 16 * 1024 * 1024;
    /// S3 DeleteObjects accepts at most this many keys per request.
    pub const DELETE_BATCH_SIZE: usize = 1000;
}

/// Configuration for the remote model import job.
pub struct ImportJobConfig;

impl ImportJobConfig {
    pub const POLL_INTERVAL: Duration = Duration::from_secs(10);
    pub const MAX_WAIT: Duration = Duration::from_secs(3600);
    pub const JOB_NAME_PREFIX: &'static str = "import";
    /// Characters of the model name kept in the job name.
    pub const JOB_NAME_MODEL_CHARS: usize = 20;
}

/// Configuration for the import service role.
pub struct AccessConfig;

impl AccessConfig {
    pub const DEFAULT_ROLE_NAME: &'static str = "MyImportModelRole";
    /// Appended to the role name to name its inline bucket policy.
    pub const POLICY_SUFFIX: &'static str = "S3BucketPolicy";
    pub const TRUST_SERVICE: &'static str = "bedrock.amazonaws.com";
    pub const POLICY_VERSION: &'static str = "2012-10-17";
}

/// Runtime options for a migration pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Name of the role the import service assumes.
    pub role_name: String,
    /// Maximum number of concurrent file uploads.
    pub upload_concurrency: usize,
    /// Delay between import job status checks.
    pub poll_interval: Duration,
    /// Ceiling on the total time spent waiting for the import job.
    pub max_wait: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            role_name: AccessConfig::DEFAULT_ROLE_NAME.to_string(),
            upload_concurrency: StagingConfig::DEFAULT_CONCURRENCY,
            poll_interval: ImportJobConfig::POLL_INTERVAL,
            max_wait: ImportJobConfig::MAX_WAIT,
        }
    }
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the import role name.
    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = role_name.into();
        self
    }

    /// Set the upload concurrency. Zero is clamped to one.
    pub fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency.max(1);
        self
    }

    /// Set the delay between status checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the total wait ceiling.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}
