//! HF Bedrock Core - Headless library for migrating HuggingFace models into
//! Amazon Bedrock Custom Model Import.
//!
//! A migration downloads a model snapshot from the hub, stages its files in
//! S3, provisions the IAM role the import service assumes, and drives the
//! import job to completion. Every remote service sits behind a trait in
//! [`remote`], so the same pipeline runs against the AWS SDK or against the
//! in-memory implementations used by the tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use hf_bedrock_core::{HfHub, NoProgress, Pipeline, RemoteServices};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> hf_bedrock_core::Result<()> {
//!     let config = aws_config::load_from_env().await;
//!     let pipeline = Pipeline::builder(
//!         RemoteServices::from_sdk_config(&config),
//!         Arc::new(HfHub::from_env()),
//!     )
//!     .build();
//!
//!     let model = pipeline
//!         .migrate("deepseek-ai/DeepSeek-R1-Distill-Llama-8B", "s3://my-bucket", &NoProgress)
//!         .await?;
//!     println!("Imported {}", model.arn);
//!
//!     // Undo it again
//!     let report = pipeline
//!         .reclaimer()
//!         .reclaim(&"s3://my-bucket".parse()?, "deepseek-ai/DeepSeek-R1-Distill-Llama-8B")
//!         .await;
//!     assert!(report.is_complete());
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod clock;
pub mod config;
pub mod error;
pub mod hub;
pub mod import_job;
pub mod location;
pub mod naming;
pub mod pipeline;
pub mod reclaim;
pub mod remote;
pub mod staging;

// Re-export commonly used types
pub use access::{AccessProvisioner, PolicyDocument};
pub use clock::{DynSleeper, RecordingSleeper, Sleeper, TokioSleeper};
pub use config::{AccessConfig, ImportJobConfig, PipelineOptions, StagingConfig};
pub use error::{ErrorKind, ImporterError, Result};
pub use hub::{CachedRepo, HfHub, HubCache};
pub use import_job::ImportJobController;
pub use location::StagedLocation;
pub use naming::{canonical_name, format_size, validate_model_id};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use reclaim::{reclaim_local, LocalReclaim, ReclaimAction, ReclaimOutcome, ReclaimReport, Reclaimer};
pub use remote::{
    IdentityService, ImportJobStatus, JobHandle, JobState, ModelHandle, ModelHub,
    ModelImportService, ObjectStore, RemoteServices, RoleHandle,
};
pub use staging::{NoProgress, ProgressSink, StageOutcome, Stager, TransferProgress};
