//! Import job submission and polling.
//!
//! ```text
//! CheckExisting --found--> Done
//!       | not found
//!       v
//!    Submit --> Polling --in progress--> Polling (after poll interval)
//!                  |  \--waited >= max wait--> timeout error
//!                  v
//!      completed --> Done, failed / other --> job failed error
//! ```
//!
//! A submitted job is never resubmitted. On timeout the remote job keeps
//! running; it is only the wait that ends.

use crate::config::ImportJobConfig;
use crate::clock::DynSleeper;
use crate::error::{ImporterError, Result};
use crate::location::StagedLocation;
use crate::naming::job_name;
use crate::remote::{
    DynModelImportService, ImportJobRequest, ImportJobStatus, JobHandle, JobState, ModelHandle,
    RoleHandle,
};
use std::time::Duration;
use tracing::{debug, info};

/// Controller states.
#[derive(Debug)]
enum Phase {
    CheckExisting,
    Submit,
    Polling { job: JobHandle, waited: Duration },
    Done(ModelHandle),
}

/// Drives one model import to a terminal outcome.
pub struct ImportJobController {
    service: DynModelImportService,
    sleeper: DynSleeper,
    poll_interval: Duration,
    max_wait: Duration,
}

impl ImportJobController {
    pub fn new(service: DynModelImportService, sleeper: DynSleeper) -> Self {
        Self {
            service,
            sleeper,
            poll_interval: ImportJobConfig::POLL_INTERVAL,
            max_wait: ImportJobConfig::MAX_WAIT,
        }
    }

    /// Set the delay between status checks (at least one millisecond).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the total wait ceiling.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Import the model staged at `location` as `canonical_name`.
    ///
    /// Returns the existing model without submitting a job when one with
    /// that name is already registered.
    pub async fn import(
        &self,
        location: &StagedLocation,
        canonical_name: &str,
        role: &RoleHandle,
    ) -> Result<ModelHandle> {
        let mut phase = Phase::CheckExisting;
        loop {
            phase = match phase {
                Phase::CheckExisting => {
                    match self.service.find_imported_model(canonical_name).await? {
                        Some(model) => {
                            info!("Model {} already exists, skipping import", canonical_name);
                            Phase::Done(model)
                        }
                        None => Phase::Submit,
                    }
                }
                Phase::Submit => {
                    let job = self.submit(location, canonical_name, role).await?;
                    info!(
                        "Waiting for import job {} (this may take a while depending on model size)",
                        job.name
                    );
                    Phase::Polling {
                        job,
                        waited: Duration::ZERO,
                    }
                }
                Phase::Polling { job, waited } => {
                    if waited >= self.max_wait {
                        return Err(ImporterError::ImportJobTimeout {
                            job: job.name,
                            waited,
                        });
                    }
                    self.sleeper.sleep(self.poll_interval).await;
                    let waited = waited + self.poll_interval;

                    let status = self.service.get_import_job(&job).await?;
                    debug!("Import job {} status {} after {:?}", job.name, status.state, waited);
                    match classify(&job, canonical_name, status)? {
                        Some(model) => Phase::Done(model),
                        None => Phase::Polling { job, waited },
                    }
                }
                Phase::Done(model) => {
                    info!("Imported model ARN: {}", model.arn);
                    return Ok(model);
                }
            };
        }
    }

    async fn submit(
        &self,
        location: &StagedLocation,
        canonical_name: &str,
        role: &RoleHandle,
    ) -> Result<JobHandle> {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let request = ImportJobRequest {
            job_name: job_name(canonical_name, nanos),
            model_name: canonical_name.to_string(),
            role_arn: role.arn.clone(),
            source_uri: location.uri(),
        };
        info!("Creating model import job {}", request.job_name);
        self.service.create_import_job(&request).await
    }
}

/// Classify one status check.
///
/// `Ok(None)` while the job is in progress, `Ok(Some(model))` once it
/// completed, and an error for every other terminal status.
pub fn classify(
    job: &JobHandle,
    canonical_name: &str,
    status: ImportJobStatus,
) -> Result<Option<ModelHandle>> {
    if status.state == JobState::InProgress {
        return Ok(None);
    }
    info!("Finished model import with status '{}'", status.state);

    if let Some(message) = status.failure_message {
        return Err(ImporterError::ImportJobFailed {
            job: job.name.clone(),
            message,
        });
    }

    match status.state {
        JobState::Completed => match status.model_arn {
            Some(arn) => Ok(Some(ModelHandle {
                name: status
                    .model_name
                    .unwrap_or_else(|| canonical_name.to_string()),
                arn,
            })),
            None => Err(ImporterError::MissingModelArn {
                job: job.name.clone(),
                status: status.state.to_string(),
            }),
        },
        other => Err(ImporterError::ImportJobFailed {
            job: job.name.clone(),
            message: format!("job ended with status {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RecordingSleeper;
    use crate::error::ErrorKind;
    use crate::remote::memory::MemoryImportService;
    use std::sync::Arc;

    struct Fixture {
        service: Arc<MemoryImportService>,
        sleeper: Arc<RecordingSleeper>,
        controller: ImportJobController,
    }

    fn fixture() -> Fixture {
        let service = Arc::new(MemoryImportService::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let controller = ImportJobController::new(service.clone(), sleeper.clone());
        Fixture {
            service,
            sleeper,
            controller,
        }
    }

    fn role() -> RoleHandle {
        RoleHandle {
            name: "R".into(),
            arn: "arn:aws:iam::000000000000:role/R".into(),
        }
    }

    fn location() -> StagedLocation {
        StagedLocation::parse("my-bucket").unwrap().working_root("foo-bar-1")
    }

    fn job() -> JobHandle {
        JobHandle {
            name: "j".into(),
            arn: "arn:j".into(),
        }
    }

    #[tokio::test]
    async fn test_existing_model_short_circuits() {
        let f = fixture();
        let existing = f.service.insert_model("foo-bar-1");

        let model = f.controller.import(&location(), "foo-bar-1", &role()).await.unwrap();

        assert_eq!(model, existing);
        assert_eq!(f.service.submission_count(), 0);
        assert_eq!(f.service.status_check_count(), 0);
        assert!(f.sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_polls_until_complete() {
        let f = fixture();
        let arn = MemoryImportService::model_arn("foo-bar-1");
        f.service.script_statuses([
            ImportJobStatus::in_progress(),
            ImportJobStatus::in_progress(),
            ImportJobStatus::completed("foo-bar-1", arn.clone()),
        ]);

        let model = f.controller.import(&location(), "foo-bar-1", &role()).await.unwrap();

        assert_eq!(model.arn, arn);
        assert_eq!(model.name, "foo-bar-1");
        assert_eq!(f.service.status_check_count(), 3);
        assert_eq!(f.sleeper.sleeps(), vec![Duration::from_secs(10); 3]);
    }

    #[tokio::test]
    async fn test_submission_request() {
        let f = fixture();
        f.controller.import(&location(), "foo-bar-1", &role()).await.unwrap();

        let submissions = f.service.submissions();
        assert_eq!(submissions.len(), 1);
        let request = &submissions[0];
        assert!(request.job_name.starts_with("import-foo-bar-1-"));
        assert_eq!(request.model_name, "foo-bar-1");
        assert_eq!(request.role_arn, role().arn);
        assert_eq!(request.source_uri, "s3://my-bucket/models/foo-bar-1");
    }

    #[tokio::test]
    async fn test_times_out_at_ceiling() {
        let f = fixture();
        f.service
            .script_statuses(std::iter::repeat_with(ImportJobStatus::in_progress).take(361));

        let err = f
            .controller
            .import(&location(), "foo-bar-1", &role())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(f.service.status_check_count(), 360);
        assert_eq!(f.sleeper.total(), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_custom_ceiling() {
        let service = Arc::new(MemoryImportService::new());
        service.script_statuses(std::iter::repeat_with(ImportJobStatus::in_progress).take(10));
        let controller = ImportJobController::new(service.clone(), Arc::new(RecordingSleeper::new()))
            .with_poll_interval(Duration::from_secs(1))
            .with_max_wait(Duration::from_secs(3));

        let err = controller.import(&location(), "m", &role()).await.unwrap_err();
        assert!(matches!(err, ImporterError::ImportJobTimeout { waited, .. } if waited == Duration::from_secs(3)));
        assert_eq!(service.status_check_count(), 3);
    }

    #[tokio::test]
    async fn test_reported_failure_is_fatal() {
        let f = fixture();
        f.service.script_statuses([
            ImportJobStatus::in_progress(),
            ImportJobStatus::failed("Unsupported model architecture"),
        ]);

        let err = f
            .controller
            .import(&location(), "foo-bar-1", &role())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::JobFailed);
        assert!(err.to_string().contains("Unsupported model architecture"));
        assert_eq!(f.service.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_status_check_error_propagates() {
        let f = fixture();
        f.service.fail_status_checks("ThrottlingException");

        let err = f
            .controller
            .import(&location(), "foo-bar-1", &role())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Remote);
        assert_eq!(f.service.status_check_count(), 1);
    }

    #[test]
    fn test_classify_completed_without_arn() {
        let status = ImportJobStatus {
            state: JobState::Completed,
            failure_message: None,
            model_name: None,
            model_arn: None,
        };
        let err = classify(&job(), "m", status).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invariant);
    }

    #[test]
    fn test_classify_other_status() {
        let status = ImportJobStatus {
            state: JobState::Other("Stopped".into()),
            failure_message: None,
            model_name: None,
            model_arn: None,
        };
        let err = classify(&job(), "m", status).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JobFailed);
        assert!(err.to_string().contains("Stopped"));
    }

    #[test]
    fn test_classify_in_progress_ignores_message() {
        let mut status = ImportJobStatus::in_progress();
        status.failure_message = Some("transient".into());
        assert!(classify(&job(), "m", status).unwrap().is_none());
    }

    #[test]
    fn test_classify_falls_back_to_canonical_name() {
        let status = ImportJobStatus {
            state: JobState::Completed,
            failure_message: None,
            model_name: None,
            model_arn: Some("arn:m".into()),
        };
        let model = classify(&job(), "foo-bar-1", status).unwrap().unwrap();
        assert_eq!(model.name, "foo-bar-1");
    }
}
