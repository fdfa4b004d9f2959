//! End-to-end migration of one hub model into the model import service.

use crate::access::AccessProvisioner;
use crate::clock::{DynSleeper, TokioSleeper};
use crate::config::PipelineOptions;
use crate::error::Result;
use crate::import_job::ImportJobController;
use crate::location::StagedLocation;
use crate::naming::{canonical_name, validate_model_id};
use crate::reclaim::Reclaimer;
use crate::remote::{DynModelHub, ModelHandle, RemoteServices};
use crate::staging::{ProgressSink, Stager};
use std::sync::Arc;
use tracing::info;

/// Builder for [`Pipeline`].
///
/// # Example
///
/// ```rust,ignore
/// let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
/// let pipeline = Pipeline::builder(
///     RemoteServices::from_sdk_config(&config),
///     Arc::new(HfHub::from_env()),
/// )
/// .options(PipelineOptions::new().with_role_name("ImportRole"))
/// .build();
///
/// let model = pipeline.migrate("org/model", "s3://bucket", &NoProgress).await?;
/// ```
pub struct PipelineBuilder {
    services: RemoteServices,
    hub: DynModelHub,
    sleeper: DynSleeper,
    options: PipelineOptions,
}

impl PipelineBuilder {
    pub fn new(services: RemoteServices, hub: DynModelHub) -> Self {
        Self {
            services,
            hub,
            sleeper: Arc::new(TokioSleeper),
            options: PipelineOptions::default(),
        }
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the sleeper used between import job status checks.
    ///
    /// Default: [`TokioSleeper`]
    pub fn with_sleeper(mut self, sleeper: DynSleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> Pipeline {
        let stager = Stager::new(self.services.store.clone())
            .with_concurrency(self.options.upload_concurrency);
        let provisioner =
            AccessProvisioner::new(self.services.identity.clone(), self.options.role_name.clone());
        let controller = ImportJobController::new(self.services.models.clone(), self.sleeper)
            .with_poll_interval(self.options.poll_interval)
            .with_max_wait(self.options.max_wait);

        Pipeline {
            hub: self.hub,
            stager,
            provisioner,
            controller,
            services: self.services,
            options: self.options,
        }
    }
}

/// Runs snapshot, staging, role provisioning and import in order.
///
/// A failed stage stops the run. Nothing is rolled back; see
/// [`Pipeline::reclaimer`].
pub struct Pipeline {
    hub: DynModelHub,
    stager: Stager,
    provisioner: AccessProvisioner,
    controller: ImportJobController,
    services: RemoteServices,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn builder(services: RemoteServices, hub: DynModelHub) -> PipelineBuilder {
        PipelineBuilder::new(services, hub)
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Migrate `artifact_id` from the hub to the import service, staging
    /// files under `destination`.
    ///
    /// The identifier and destination are checked before any download or
    /// remote call.
    pub async fn migrate(
        &self,
        artifact_id: &str,
        destination: &str,
        progress: &dyn ProgressSink,
    ) -> Result<ModelHandle> {
        validate_model_id(artifact_id)?;
        let destination = StagedLocation::parse(destination)?;

        info!("Downloading model {}", artifact_id);
        let local_root = self.hub.snapshot(artifact_id).await?;
        let canonical = canonical_name(artifact_id);

        let staged = self
            .stager
            .stage(&local_root, &destination, &canonical, progress)
            .await?;

        let role = self.provisioner.ensure_role(staged.location.bucket()).await?;

        self.controller
            .import(&staged.location, &canonical, &role)
            .await
    }

    /// Reclaimer sharing this pipeline's services and role name.
    pub fn reclaimer(&self) -> Reclaimer {
        Reclaimer::new(self.services.clone(), self.options.role_name.clone())
    }
}
