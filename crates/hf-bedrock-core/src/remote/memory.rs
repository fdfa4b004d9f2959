//! In-memory implementations of the remote service ports.
//!
//! They keep state in process and count the calls made against them, so tests
//! can assert on how many existence checks, uploads or job submissions a run performed.
//! Failures can be injected per service.

use super::{
    IdentityService, ImportJobRequest, ImportJobStatus, JobHandle, JobState, ModelHandle,
    ModelImportService, ObjectStore, RoleHandle,
};
use crate::error::{ImporterError, Result};
use crate::staging::ProgressSink;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const ACCOUNT_ID: &str = "000000000000";
const REGION: &str = "us-east-1";

/// Object store holding object sizes keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), u64>>,
    head_error: Mutex<Option<String>>,
    failing_uploads: Mutex<Vec<String>>,
    delete_error: Mutex<Option<String>>,
    heads: AtomicUsize,
    uploads: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object.
    pub fn insert(&self, bucket: &str, key: &str, size: u64) {
        self.objects
            .lock()
            .expect("object store lock poisoned")
            .insert((bucket.to_string(), key.to_string()), size);
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.object_size(bucket, key).is_some()
    }

    pub fn object_size(&self, bucket: &str, key: &str) -> Option<u64> {
        self.objects
            .lock()
            .expect("object store lock poisoned")
            .get(&(bucket.to_string(), key.to_string()))
            .copied()
    }

    /// All keys stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .expect("object store lock poisoned")
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Make every existence check fail with `message`.
    pub fn deny_existence_checks(&self, message: &str) {
        *self.head_error.lock().expect("object store lock poisoned") = Some(message.to_string());
    }

    /// Make uploads of keys containing `pattern` fail.
    pub fn fail_uploads_containing(&self, pattern: &str) {
        self.failing_uploads
            .lock()
            .expect("object store lock poisoned")
            .push(pattern.to_string());
    }

    /// Make prefix deletion fail with `message`.
    pub fn fail_deletes(&self, message: &str) {
        *self.delete_error.lock().expect("object store lock poisoned") = Some(message.to_string());
    }

    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self
            .head_error
            .lock()
            .expect("object store lock poisoned")
            .clone()
        {
            return Err(ImporterError::remote("s3", "HeadObject", message));
        }
        Ok(self.contains(bucket, key))
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let failing = self
            .failing_uploads
            .lock()
            .expect("object store lock poisoned")
            .iter()
            .any(|p| key.contains(p.as_str()));
        if failing {
            return Err(ImporterError::remote(
                "s3",
                "PutObject",
                format!("injected failure for {key}"),
            ));
        }

        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| ImporterError::io_with_path(e, path))?
            .len();
        self.insert(bucket, key, size);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        progress.advance(size);
        Ok(())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<usize> {
        if let Some(message) = self
            .delete_error
            .lock()
            .expect("object store lock poisoned")
            .clone()
        {
            return Err(ImporterError::remote("s3", "DeleteObjects", message));
        }
        let mut objects = self.objects.lock().expect("object store lock poisoned");
        let before = objects.len();
        objects.retain(|(b, k), _| !(b == bucket && k.starts_with(prefix)));
        Ok(before - objects.len())
    }
}

#[derive(Debug, Clone)]
struct StoredRole {
    handle: RoleHandle,
    trust_policy: String,
    policies: BTreeMap<String, String>,
}

/// Identity service holding roles and their inline policies.
#[derive(Debug, Default)]
pub struct MemoryIdentityService {
    roles: Mutex<HashMap<String, StoredRole>>,
    put_policy_error: Mutex<Option<String>>,
    creations: AtomicUsize,
}

impl MemoryIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role_exists(&self, role_name: &str) -> bool {
        self.roles
            .lock()
            .expect("identity lock poisoned")
            .contains_key(role_name)
    }

    pub fn trust_policy(&self, role_name: &str) -> Option<String> {
        self.roles
            .lock()
            .expect("identity lock poisoned")
            .get(role_name)
            .map(|r| r.trust_policy.clone())
    }

    pub fn role_policy(&self, role_name: &str, policy_name: &str) -> Option<String> {
        self.roles
            .lock()
            .expect("identity lock poisoned")
            .get(role_name)
            .and_then(|r| r.policies.get(policy_name).cloned())
    }

    /// Make attaching inline policies fail with `message`.
    pub fn fail_put_policy(&self, message: &str) {
        *self.put_policy_error.lock().expect("identity lock poisoned") = Some(message.to_string());
    }

    pub fn creation_count(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    fn role_arn(role_name: &str) -> String {
        format!("arn:aws:iam::{ACCOUNT_ID}:role/{role_name}")
    }

    fn no_such_entity(operation: &'static str, role_name: &str) -> ImporterError {
        ImporterError::remote(
            "iam",
            operation,
            format!("NoSuchEntity: role {role_name} does not exist"),
        )
    }
}

#[async_trait]
impl IdentityService for MemoryIdentityService {
    async fn find_role(&self, role_name: &str) -> Result<Option<RoleHandle>> {
        Ok(self
            .roles
            .lock()
            .expect("identity lock poisoned")
            .get(role_name)
            .map(|r| r.handle.clone()))
    }

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<RoleHandle> {
        let mut roles = self.roles.lock().expect("identity lock poisoned");
        if roles.contains_key(role_name) {
            return Err(ImporterError::remote(
                "iam",
                "CreateRole",
                format!("EntityAlreadyExists: role {role_name}"),
            ));
        }
        let handle = RoleHandle {
            name: role_name.to_string(),
            arn: Self::role_arn(role_name),
        };
        roles.insert(
            role_name.to_string(),
            StoredRole {
                handle: handle.clone(),
                trust_policy: trust_policy.to_string(),
                policies: BTreeMap::new(),
            },
        );
        self.creations.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy: &str,
    ) -> Result<()> {
        if let Some(message) = self
            .put_policy_error
            .lock()
            .expect("identity lock poisoned")
            .clone()
        {
            return Err(ImporterError::remote("iam", "PutRolePolicy", message));
        }
        let mut roles = self.roles.lock().expect("identity lock poisoned");
        let role = roles
            .get_mut(role_name)
            .ok_or_else(|| Self::no_such_entity("PutRolePolicy", role_name))?;
        role.policies
            .insert(policy_name.to_string(), policy.to_string());
        Ok(())
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<()> {
        let mut roles = self.roles.lock().expect("identity lock poisoned");
        let role = roles
            .get_mut(role_name)
            .ok_or_else(|| Self::no_such_entity("DeleteRolePolicy", role_name))?;
        role.policies.remove(policy_name).map(|_| ()).ok_or_else(|| {
            ImporterError::remote(
                "iam",
                "DeleteRolePolicy",
                format!("NoSuchEntity: policy {policy_name}"),
            )
        })
    }

    async fn delete_role(&self, role_name: &str) -> Result<()> {
        let mut roles = self.roles.lock().expect("identity lock poisoned");
        let role = roles
            .get(role_name)
            .ok_or_else(|| Self::no_such_entity("DeleteRole", role_name))?;
        if !role.policies.is_empty() {
            return Err(ImporterError::remote(
                "iam",
                "DeleteRole",
                format!("DeleteConflict: role {role_name} still has inline policies"),
            ));
        }
        roles.remove(role_name);
        Ok(())
    }
}

/// Import service with scripted job status sequences.
///
/// Each status check of a job pops the next scripted status. Once the script
/// is exhausted the job completes and its model is registered.
#[derive(Debug, Default)]
pub struct MemoryImportService {
    models: Mutex<HashMap<String, ModelHandle>>,
    /// Model name of each submitted job, keyed by job ARN.
    jobs: Mutex<HashMap<String, String>>,
    script: Mutex<VecDeque<ImportJobStatus>>,
    submissions: Mutex<Vec<ImportJobRequest>>,
    status_checks: AtomicUsize,
    status_error: Mutex<Option<String>>,
}

impl MemoryImportService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the statuses returned by the next status checks, in order.
    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = ImportJobStatus>) {
        self.script
            .lock()
            .expect("import service lock poisoned")
            .extend(statuses);
    }

    /// Register an existing model.
    pub fn insert_model(&self, model_name: &str) -> ModelHandle {
        let handle = ModelHandle {
            name: model_name.to_string(),
            arn: Self::model_arn(model_name),
        };
        self.models
            .lock()
            .expect("import service lock poisoned")
            .insert(model_name.to_string(), handle.clone());
        handle
    }

    pub fn model_exists(&self, model_name: &str) -> bool {
        self.models
            .lock()
            .expect("import service lock poisoned")
            .contains_key(model_name)
    }

    /// Make every status check fail with `message`.
    pub fn fail_status_checks(&self, message: &str) {
        *self.status_error.lock().expect("import service lock poisoned") =
            Some(message.to_string());
    }

    pub fn submissions(&self) -> Vec<ImportJobRequest> {
        self.submissions
            .lock()
            .expect("import service lock poisoned")
            .clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions
            .lock()
            .expect("import service lock poisoned")
            .len()
    }

    pub fn status_check_count(&self) -> usize {
        self.status_checks.load(Ordering::SeqCst)
    }

    pub fn model_arn(model_name: &str) -> String {
        format!("arn:aws:bedrock:{REGION}:{ACCOUNT_ID}:imported-model/{model_name}")
    }
}

#[async_trait]
impl ModelImportService for MemoryImportService {
    async fn find_imported_model(&self, model_name: &str) -> Result<Option<ModelHandle>> {
        Ok(self
            .models
            .lock()
            .expect("import service lock poisoned")
            .get(model_name)
            .cloned())
    }

    async fn create_import_job(&self, request: &ImportJobRequest) -> Result<JobHandle> {
        let handle = JobHandle {
            name: request.job_name.clone(),
            arn: format!(
                "arn:aws:bedrock:{REGION}:{ACCOUNT_ID}:model-import-job/{}",
                request.job_name
            ),
        };
        self.jobs
            .lock()
            .expect("import service lock poisoned")
            .insert(handle.arn.clone(), request.model_name.clone());
        self.submissions
            .lock()
            .expect("import service lock poisoned")
            .push(request.clone());
        Ok(handle)
    }

    async fn get_import_job(&self, job: &JobHandle) -> Result<ImportJobStatus> {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self
            .status_error
            .lock()
            .expect("import service lock poisoned")
            .clone()
        {
            return Err(ImporterError::remote("bedrock", "GetModelImportJob", message));
        }

        let model_name = self
            .jobs
            .lock()
            .expect("import service lock poisoned")
            .get(&job.arn)
            .cloned()
            .ok_or_else(|| {
                ImporterError::remote(
                    "bedrock",
                    "GetModelImportJob",
                    format!("ResourceNotFound: job {}", job.arn),
                )
            })?;

        let scripted = self
            .script
            .lock()
            .expect("import service lock poisoned")
            .pop_front();
        let status = scripted.unwrap_or_else(|| {
            ImportJobStatus::completed(model_name.clone(), Self::model_arn(&model_name))
        });

        if status.state == JobState::Completed && status.model_arn.is_some() {
            self.insert_model(&model_name);
        }
        Ok(status)
    }

    async fn delete_imported_model(&self, model_name: &str) -> Result<()> {
        self.models
            .lock()
            .expect("import service lock poisoned")
            .remove(model_name)
            .map(|_| ())
            .ok_or_else(|| {
                ImporterError::remote(
                    "bedrock",
                    "DeleteImportedModel",
                    format!("ResourceNotFound: model {model_name}"),
                )
            })
    }
}
