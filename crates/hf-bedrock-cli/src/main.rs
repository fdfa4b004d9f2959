//! HF Bedrock Importer - download a HuggingFace model and import it into
//! Amazon Bedrock, or remove what a previous import created.

use anyhow::{bail, Context, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use clap::Parser;
use hf_bedrock_core::{
    format_size, reclaim_local, AccessConfig, HfHub, LocalReclaim, Pipeline, PipelineOptions,
    ProgressSink, Reclaimer, RemoteServices, StagedLocation, StagingConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_MODEL_ID: &str = "deepseek-ai/DeepSeek-R1-Distill-Llama-8B";

#[derive(Parser, Debug)]
#[command(name = "hf-bedrock-importer")]
#[command(about = "Download and deploy a Hugging Face model to Amazon Bedrock")]
struct Args {
    /// Hugging Face model ID
    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    model_id: String,

    /// S3 location for model files: a bucket name or a prefix (e.g. s3://bucket/my_models)
    #[arg(long)]
    s3_uri: Option<String>,

    /// Remove the imported model, the IAM role and the staged S3 files
    #[arg(long)]
    cleanup_resources: bool,

    /// Remove the model from the local HuggingFace cache
    #[arg(long)]
    cleanup_model: bool,

    /// AWS region (defaults to the standard AWS environment)
    #[arg(long)]
    region: Option<String>,

    /// IAM role assumed by the import job
    #[arg(long, default_value = AccessConfig::DEFAULT_ROLE_NAME)]
    role_name: String,

    /// Maximum number of concurrent file uploads
    #[arg(long, default_value_t = StagingConfig::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Seconds between import job status checks
    #[arg(long, default_value_t = 10)]
    poll_interval_secs: u64,

    /// Seconds to wait for the import job before giving up
    #[arg(long, default_value_t = 3600)]
    max_wait_secs: u64,

    /// HuggingFace cache directory (defaults to HF_HOME)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// HuggingFace access token for gated models
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn options(&self) -> PipelineOptions {
        PipelineOptions::new()
            .with_role_name(self.role_name.clone())
            .with_upload_concurrency(self.concurrency)
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_max_wait(Duration::from_secs(self.max_wait_secs))
    }

    fn hub(&self) -> HfHub {
        let hub = HfHub::from_env().with_token(self.hf_token.clone());
        match &self.cache_dir {
            Some(dir) => hub.with_cache_dir(dir.clone()),
            None => hub,
        }
    }
}

/// Upload progress rendered as a terminal progress bar.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")?
                .progress_chars("#>-"),
        );
        Ok(Self { bar })
    }
}

impl ProgressSink for BarProgress {
    fn begin(&self, total_bytes: u64, files: usize) {
        self.bar.set_length(total_bytes);
        self.bar.set_message(format!("{files} files"));
    }

    fn advance(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn finish(&self) {
        self.bar.finish_with_message("upload complete");
    }
}

/// Console link to the Bedrock text playground for an imported model.
///
/// The region is the fourth `:`-separated field of the ARN.
fn playground_url(model_arn: &str) -> Option<String> {
    let region = model_arn.split(':').nth(3).filter(|r| !r.is_empty())?;
    Some(format!(
        "https://{}.console.aws.amazon.com/bedrock/home#/text-generation-playground?mode=text&modelId={}",
        region,
        urlencoding::encode(model_arn)
    ))
}

/// Remove the remote resources of a previous import.
///
/// Every removal is attempted; the returned names are those that failed.
async fn cleanup_resources(args: &Args, services: RemoteServices) -> Result<Vec<String>> {
    let Some(s3_uri) = &args.s3_uri else {
        bail!("Please provide both --model-id and --s3-uri to clean up resources");
    };
    let destination: StagedLocation = s3_uri.parse()?;

    warn!("Destroying remote entities (Bedrock custom model, IAM role, S3 model files)...");
    let report = Reclaimer::new(services, args.role_name.clone())
        .reclaim(&destination, &args.model_id)
        .await;

    let failed: Vec<String> = report
        .failures()
        .map(|o| o.action.to_string())
        .collect();
    if failed.is_empty() {
        info!("Done.");
    }
    Ok(failed)
}

/// Run the requested cleanups. A failed remote removal does not stop the
/// local cache cleanup, but still fails the command.
async fn run_cleanups(args: &Args, services: RemoteServices) -> Result<()> {
    let failed = if args.cleanup_resources {
        cleanup_resources(args, services).await?
    } else {
        Vec::new()
    };
    if args.cleanup_model {
        cleanup_model(args)?;
    }
    if !failed.is_empty() {
        bail!("Cleanup incomplete, failed to remove: {}", failed.join(", "));
    }
    Ok(())
}

fn cleanup_model(args: &Args) -> Result<()> {
    warn!("Cleaning up local model resources...");
    match reclaim_local(&args.hub(), &args.model_id)? {
        LocalReclaim::NotFound => info!("Model {} not found in local cache", args.model_id),
        LocalReclaim::Deleted {
            repo_id,
            freed_bytes,
        } => info!("Deleted {} ({} freed)", repo_id, format_size(freed_bytes)),
    }
    info!("Done.");
    Ok(())
}

async fn import(args: &Args, services: RemoteServices) -> Result<()> {
    let Some(s3_uri) = &args.s3_uri else {
        bail!("Please provide both --model-id and --s3-uri to import a model");
    };
    info!("Using model ID: {}", args.model_id);
    info!("Using S3 location: {}", s3_uri);

    let pipeline = Pipeline::builder(services, Arc::new(args.hub()))
        .options(args.options())
        .build();
    let progress = BarProgress::new()?;
    let model = pipeline
        .migrate(&args.model_id, s3_uri, &progress)
        .await
        .with_context(|| format!("Failed to import {}", args.model_id))?;
    progress.bar.finish_and_clear();

    info!("Process completed successfully!");
    if let Some(url) = playground_url(&model.arn) {
        println!("Link to the Bedrock playground for the model: {url}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let region = RegionProviderChain::first_try(args.region.clone().map(Region::new))
        .or_default_provider();
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .load()
        .await;
    let services = RemoteServices::from_sdk_config(&config);

    if !args.cleanup_resources && !args.cleanup_model {
        return import(&args, services).await;
    }

    run_cleanups(&args, services).await
}
