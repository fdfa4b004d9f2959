//! AWS SDK implementations of the remote service ports.
//!
//! - [`S3ObjectStore`]: HeadObject existence checks, single or multipart uploads,
//!   prefix deletion via ListObjectsV2 + DeleteObjects.
//! - [`IamIdentityService`]: role lookup/creation and inline policies.
//! - [`BedrockImportService`]: custom model import jobs.

use super::{
    IdentityService, ImportJobRequest, ImportJobStatus, JobHandle, JobState, ModelHandle,
    ModelImportService, ObjectStore, RoleHandle,
};
use crate::config::StagingConfig;
use crate::error::{ImporterError, Result};
use crate::staging::ProgressSink;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_bedrock::types::{ModelDataSource, ModelImportJobStatus, S3DataSource};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use std::future::Future;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Render an SDK error with its full source chain.
fn sdk_error<E>(service: &'static str, operation: &'static str, err: &E) -> ImporterError
where
    E: std::error::Error,
{
    ImporterError::remote(service, operation, DisplayErrorContext(err).to_string())
}

/// Run `work`, and run `abort` before returning when it fails.
///
/// Covers every step after a multipart upload was created, so no failure
/// leaves uploaded parts behind.
async fn abort_on_error<T, W, A, AF>(work: W, abort: A) -> Result<T>
where
    W: Future<Output = Result<T>>,
    A: FnOnce() -> AF,
    AF: Future<Output = std::result::Result<(), String>>,
{
    match work.await {
        Ok(value) => Ok(value),
        Err(err) => {
            if let Err(abort_err) = abort().await {
                warn!("Failed to abort multipart upload of {}", abort_err);
            }
            Err(err)
        }
    }
}

/// S3-backed object store.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    multipart_threshold: u64,
    part_size: u64,
}

impl S3ObjectStore {
    pub fn new(config: &SdkConfig) -> Self {
        Self::from_client(aws_sdk_s3::Client::new(config))
    }

    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self {
            client,
            multipart_threshold: StagingConfig::MULTIPART_THRESHOLD,
            part_size: StagingConfig::MULTIPART_PART_SIZE,
        }
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| ImporterError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
                source: None,
            })?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error("s3", "PutObject", &e))?;
        progress.advance(size);
        Ok(())
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("s3", "CreateMultipartUpload", &e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| {
                ImporterError::remote("s3", "CreateMultipartUpload", "response carried no upload id")
            })?
            .to_string();

        abort_on_error(
            async {
                let parts = self
                    .upload_parts(bucket, key, &upload_id, path, size, progress)
                    .await?;
                self.complete_upload(bucket, key, &upload_id, parts).await
            },
            || self.abort_upload(bucket, key, &upload_id),
        )
        .await
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| sdk_error("s3", "CompleteMultipartUpload", &e))?;
        Ok(())
    }

    async fn abort_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> std::result::Result<(), String> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| format!("{}: {}", key, DisplayErrorContext(&e)))
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
        size: u64,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ImporterError::io_with_path(e, path))?;

        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1i32;
        while offset < size {
            let len = self.part_size.min(size - offset);
            let mut buf = vec![0u8; len as usize];
            file.read_exact(&mut buf)
                .await
                .map_err(|e| ImporterError::io_with_path(e, path))?;

            let uploaded = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buf))
                .send()
                .await
                .map_err(|e| sdk_error("s3", "UploadPart", &e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            progress.advance(len);
            debug!("Uploaded part {} of {}", part_number, key);

            offset += len;
            part_number += 1;
        }
        Ok(parts)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(sdk_error("s3", "HeadObject", &err))
                }
            }
        }
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| ImporterError::io_with_path(e, path))?
            .len();

        if size > self.multipart_threshold {
            self.put_multipart(bucket, key, path, size, progress).await
        } else {
            self.put_single(bucket, key, path, size, progress).await
        }
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<usize> {
        if prefix.is_empty() {
            return Err(ImporterError::InvalidLocation {
                location: format!("s3://{bucket}"),
                message: "refusing to delete an entire bucket".to_string(),
            });
        }

        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| sdk_error("s3", "ListObjectsV2", &e))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }

        for chunk in keys.chunks(StagingConfig::DELETE_BATCH_SIZE) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ImporterError::remote("s3", "DeleteObjects", e.to_string()))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| ImporterError::remote("s3", "DeleteObjects", e.to_string()))?;

            let output = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| sdk_error("s3", "DeleteObjects", &e))?;

            if let Some(failed) = output.errors().first() {
                return Err(ImporterError::remote(
                    "s3",
                    "DeleteObjects",
                    format!(
                        "{}: {}",
                        failed.key().unwrap_or("<unknown key>"),
                        failed.message().unwrap_or("unknown error")
                    ),
                ));
            }
        }

        Ok(keys.len())
    }
}

/// IAM-backed identity service.
#[derive(Debug, Clone)]
pub struct IamIdentityService {
    client: aws_sdk_iam::Client,
}

impl IamIdentityService {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_iam::Client::new(config),
        }
    }
}

fn role_handle(role: &aws_sdk_iam::types::Role) -> RoleHandle {
    RoleHandle {
        name: role.role_name().to_string(),
        arn: role.arn().to_string(),
    }
}

#[async_trait]
impl IdentityService for IamIdentityService {
    async fn find_role(&self, role_name: &str) -> Result<Option<RoleHandle>> {
        match self.client.get_role().role_name(role_name).send().await {
            Ok(output) => Ok(output.role().map(role_handle)),
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_no_such_entity_exception())
                    .unwrap_or(false);
                if missing {
                    Ok(None)
                } else {
                    Err(sdk_error("iam", "GetRole", &err))
                }
            }
        }
    }

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<RoleHandle> {
        let output = self
            .client
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(trust_policy)
            .send()
            .await
            .map_err(|e| sdk_error("iam", "CreateRole", &e))?;
        output
            .role()
            .map(role_handle)
            .ok_or_else(|| ImporterError::remote("iam", "CreateRole", "response carried no role"))
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy: &str,
    ) -> Result<()> {
        self.client
            .put_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .policy_document(policy)
            .send()
            .await
            .map_err(|e| sdk_error("iam", "PutRolePolicy", &e))?;
        Ok(())
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<()> {
        self.client
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| sdk_error("iam", "DeleteRolePolicy", &e))?;
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> Result<()> {
        self.client
            .delete_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| sdk_error("iam", "DeleteRole", &e))?;
        Ok(())
    }
}

/// Bedrock-backed model import service.
#[derive(Debug, Clone)]
pub struct BedrockImportService {
    client: aws_sdk_bedrock::Client,
}

impl BedrockImportService {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_bedrock::Client::new(config),
        }
    }
}

fn job_state(status: Option<&ModelImportJobStatus>) -> JobState {
    match status {
        Some(ModelImportJobStatus::InProgress) => JobState::InProgress,
        Some(ModelImportJobStatus::Completed) => JobState::Completed,
        Some(ModelImportJobStatus::Failed) => JobState::Failed,
        Some(other) => JobState::Other(other.as_str().to_string()),
        None => JobState::Other("Unknown".to_string()),
    }
}

#[async_trait]
impl ModelImportService for BedrockImportService {
    async fn find_imported_model(&self, model_name: &str) -> Result<Option<ModelHandle>> {
        match self
            .client
            .get_imported_model()
            .model_identifier(model_name)
            .send()
            .await
        {
            Ok(output) => {
                let arn = output.model_arn().ok_or_else(|| {
                    ImporterError::remote("bedrock", "GetImportedModel", "response carried no model ARN")
                })?;
                Ok(Some(ModelHandle {
                    name: output.model_name().unwrap_or(model_name).to_string(),
                    arn: arn.to_string(),
                }))
            }
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_resource_not_found_exception())
                    .unwrap_or(false);
                if missing {
                    Ok(None)
                } else {
                    Err(sdk_error("bedrock", "GetImportedModel", &err))
                }
            }
        }
    }

    async fn create_import_job(&self, request: &ImportJobRequest) -> Result<JobHandle> {
        let source = S3DataSource::builder()
            .s3_uri(&request.source_uri)
            .build()
            .map_err(|e| ImporterError::remote("bedrock", "CreateModelImportJob", e.to_string()))?;

        let output = self
            .client
            .create_model_import_job()
            .job_name(&request.job_name)
            .imported_model_name(&request.model_name)
            .role_arn(&request.role_arn)
            .model_data_source(ModelDataSource::S3DataSource(source))
            .send()
            .await
            .map_err(|e| sdk_error("bedrock", "CreateModelImportJob", &e))?;

        Ok(JobHandle {
            name: request.job_name.clone(),
            arn: output.job_arn().to_string(),
        })
    }

    async fn get_import_job(&self, job: &JobHandle) -> Result<ImportJobStatus> {
        let output = self
            .client
            .get_model_import_job()
            .job_identifier(&job.arn)
            .send()
            .await
            .map_err(|e| sdk_error("bedrock", "GetModelImportJob", &e))?;

        Ok(ImportJobStatus {
            state: job_state(output.status()),
            failure_message: output.failure_message().map(str::to_string),
            model_name: output.imported_model_name().map(str::to_string),
            model_arn: output.imported_model_arn().map(str::to_string),
        })
    }

    async fn delete_imported_model(&self, model_name: &str) -> Result<()> {
        self.client
            .delete_imported_model()
            .model_identifier(model_name)
            .send()
            .await
            .map_err(|e| sdk_error("bedrock", "DeleteImportedModel", &e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn upload_failure(operation: &'static str) -> ImporterError {
        ImporterError::remote("s3", operation, "connection reset")
    }

    #[tokio::test]
    async fn test_failed_completion_aborts_upload() {
        let aborts = AtomicUsize::new(0);
        let result: Result<()> = abort_on_error(
            async { Err(upload_failure("CompleteMultipartUpload")) },
            || async {
                aborts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("CompleteMultipartUpload"));
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_failure_keeps_original_error() {
        let result: Result<()> = abort_on_error(
            async { Err(upload_failure("UploadPart")) },
            || async { Err("my-key: access denied".to_string()) },
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("UploadPart"));
        assert!(!err.to_string().contains("access denied"));
    }

    #[tokio::test]
    async fn test_successful_upload_is_not_aborted() {
        let aborts = AtomicUsize::new(0);
        let value = abort_on_error(
            async { Ok(3usize) },
            || async {
                aborts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_job_state_mapping() {
        assert_eq!(
            job_state(Some(&ModelImportJobStatus::InProgress)),
            JobState::InProgress
        );
        assert_eq!(
            job_state(Some(&ModelImportJobStatus::Completed)),
            JobState::Completed
        );
        assert_eq!(job_state(Some(&ModelImportJobStatus::Failed)), JobState::Failed);
        assert_eq!(job_state(None), JobState::Other("Unknown".to_string()));
    }
}
