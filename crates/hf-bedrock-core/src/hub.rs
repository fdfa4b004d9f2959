//! HuggingFace Hub access: snapshot downloads and the local download cache.
//!
//! Cache layout (as written by `hf-hub` and `huggingface_hub`):
//!
//! ```text
//! <cache>/models--<org>--<name>/
//!     blobs/<etag>            file contents
//!     refs/main               revision hash
//!     snapshots/<revision>/   symlinks into blobs/
//! <cache>/.locks/models--<org>--<name>/
//! ```

use crate::error::{ImporterError, Result};
use crate::remote::ModelHub;
use async_trait::async_trait;
use hf_hub::api::tokio::{Api, ApiBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const REPO_DIR_PREFIX: &str = "models--";
const LOCKS_DIR: &str = ".locks";

/// A model repository present in the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRepo {
    pub repo_id: String,
    pub path: PathBuf,
    /// Bytes held by the repo directory. Snapshot symlinks are not counted.
    pub size_on_disk: u64,
    /// Snapshot revisions present, sorted.
    pub revisions: Vec<String>,
}

/// Local cache of hub downloads.
pub trait HubCache: Send + Sync {
    /// Look up a cached repository. `Ok(None)` when it is not cached.
    fn find_repo(&self, repo_id: &str) -> Result<Option<CachedRepo>>;

    /// Remove a cached repository and everything it references.
    fn delete_repo(&self, repo: &CachedRepo) -> Result<()>;
}

/// Directory name of a model repository inside the cache.
pub fn repo_dir_name(repo_id: &str) -> String {
    format!("{}{}", REPO_DIR_PREFIX, repo_id.replace('/', "--"))
}

/// Root of the snapshot that `file` was downloaded into.
///
/// `file` is the local path of the repository file `rfilename`.
fn snapshot_root(file: &Path, rfilename: &str) -> Option<PathBuf> {
    let depth = Path::new(rfilename).components().count();
    file.ancestors().nth(depth).map(Path::to_path_buf)
}

/// HuggingFace Hub client backed by `hf-hub`.
#[derive(Debug, Clone)]
pub struct HfHub {
    cache_dir: PathBuf,
    token: Option<String>,
}

impl HfHub {
    /// Use the cache location from the environment (`HF_HOME`, defaulting
    /// to `~/.cache/huggingface/hub`).
    pub fn from_env() -> Self {
        Self {
            cache_dir: hf_hub::Cache::default().path().clone(),
            token: None,
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Access token for gated or private repositories.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn api(&self, repo_id: &str) -> Result<Api> {
        let mut builder = ApiBuilder::new()
            .with_cache_dir(self.cache_dir.clone())
            .with_progress(false);
        if let Some(token) = &self.token {
            builder = builder.with_token(Some(token.clone()));
        }
        builder.build().map_err(|e| ImporterError::Hub {
            repo_id: repo_id.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ModelHub for HfHub {
    async fn snapshot(&self, repo_id: &str) -> Result<PathBuf> {
        let hub_error = |message: String| ImporterError::Hub {
            repo_id: repo_id.to_string(),
            message,
        };

        let repo = self.api(repo_id)?.model(repo_id.to_string());
        let info = repo.info().await.map_err(|e| hub_error(e.to_string()))?;
        if info.siblings.is_empty() {
            return Err(hub_error("repository lists no files".to_string()));
        }

        info!(
            "Downloading {} files of {} at revision {}",
            info.siblings.len(),
            repo_id,
            info.sha
        );

        let mut root = None;
        for sibling in &info.siblings {
            let path = repo
                .get(&sibling.rfilename)
                .await
                .map_err(|e| hub_error(format!("{}: {}", sibling.rfilename, e)))?;
            debug!("Cached {} at {}", sibling.rfilename, path.display());
            if root.is_none() {
                root = snapshot_root(&path, &sibling.rfilename);
            }
        }

        let root = root.ok_or_else(|| hub_error("could not locate snapshot directory".into()))?;
        info!("Model snapshot ready at {}", root.display());
        Ok(root)
    }
}

impl HubCache for HfHub {
    fn find_repo(&self, repo_id: &str) -> Result<Option<CachedRepo>> {
        let path = self.cache_dir.join(repo_dir_name(repo_id));
        if !path.is_dir() {
            return Ok(None);
        }

        let mut size_on_disk = 0;
        for entry in WalkDir::new(&path) {
            let entry = entry?;
            if entry.file_type().is_file() {
                size_on_disk += entry.metadata()?.len();
            }
        }

        let mut revisions = Vec::new();
        let snapshots = path.join("snapshots");
        if snapshots.is_dir() {
            for entry in std::fs::read_dir(&snapshots)
                .map_err(|e| ImporterError::io_with_path(e, &snapshots))?
            {
                let entry = entry.map_err(|e| ImporterError::io_with_path(e, &snapshots))?;
                if entry.path().is_dir() {
                    revisions.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        revisions.sort();

        Ok(Some(CachedRepo {
            repo_id: repo_id.to_string(),
            path,
            size_on_disk,
            revisions,
        }))
    }

    fn delete_repo(&self, repo: &CachedRepo) -> Result<()> {
        std::fs::remove_dir_all(&repo.path)
            .map_err(|e| ImporterError::io_with_path(e, &repo.path))?;

        let locks = self
            .cache_dir
            .join(LOCKS_DIR)
            .join(repo_dir_name(&repo.repo_id));
        if locks.exists() {
            std::fs::remove_dir_all(&locks).map_err(|e| ImporterError::io_with_path(e, &locks))?;
        }
        Ok(())
    }
}
