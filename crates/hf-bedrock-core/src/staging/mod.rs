//! Staging of local model files in object storage.
//!
//! Staging is incremental: a file is uploaded only when no object exists at
//! its destination key. Existence is the only check, so a file that changed
//! locally after it was staged is not uploaded again.

mod progress;

pub use progress::{NoProgress, ProgressSink, TransferProgress, TransferSnapshot};

use crate::config::StagingConfig;
use crate::error::{ImporterError, Result};
use crate::location::StagedLocation;
use crate::naming::format_size;
use crate::remote::DynObjectStore;
use futures::stream::{self, TryStreamExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// A local file that has no counterpart in object storage yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    /// Path relative to the snapshot root, `/`-separated.
    pub relative_path: String,
    /// Absolute local path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Result of one staging call.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Working root the files were staged under.
    pub location: StagedLocation,
    /// Files uploaded by this call.
    pub uploaded: Vec<PendingFile>,
    /// Files that were already present.
    pub skipped: usize,
}

impl StageOutcome {
    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded.iter().map(|f| f.size).sum()
    }
}

/// Uploads the missing files of a local snapshot.
pub struct Stager {
    store: DynObjectStore,
    concurrency: usize,
}

impl Stager {
    pub fn new(store: DynObjectStore) -> Self {
        Self {
            store,
            concurrency: StagingConfig::DEFAULT_CONCURRENCY,
        }
    }

    /// Set the maximum number of concurrent uploads.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Stage `local_root` under `destination/models/<canonical_name>`.
    ///
    /// Returns once every missing file is uploaded. The first failed existence check or
    /// upload aborts the call.
    pub async fn stage(
        &self,
        local_root: &Path,
        destination: &StagedLocation,
        canonical_name: &str,
        progress: &dyn ProgressSink,
    ) -> Result<StageOutcome> {
        let working_root = destination.working_root(canonical_name);
        info!("Staging model files at {}", working_root);

        let (pending, skipped) = self.compute_delta(local_root, &working_root).await?;

        if pending.is_empty() {
            info!("All model files already uploaded");
            return Ok(StageOutcome {
                location: working_root,
                uploaded: pending,
                skipped,
            });
        }

        let total_bytes: u64 = pending.iter().map(|f| f.size).sum();
        info!(
            "Uploading {} files ({}), {} already present",
            pending.len(),
            format_size(total_bytes),
            skipped
        );

        progress.begin(total_bytes, pending.len());
        self.upload_all(&working_root, &pending, progress).await?;
        progress.finish();

        Ok(StageOutcome {
            location: working_root,
            uploaded: pending,
            skipped,
        })
    }

    /// Check every local file and return those missing remotely, plus the
    /// count of files already present.
    pub async fn compute_delta(
        &self,
        local_root: &Path,
        working_root: &StagedLocation,
    ) -> Result<(Vec<PendingFile>, usize)> {
        let files = list_local_files(local_root)?;
        let mut pending = Vec::new();
        let mut skipped = 0;

        for file in files {
            let key = working_root.key_for(&file.relative_path);
            if self.store.object_exists(working_root.bucket(), &key).await? {
                debug!("Already staged: {}", key);
                skipped += 1;
            } else {
                debug!("Missing remotely: {}", key);
                pending.push(file);
            }
        }

        Ok((pending, skipped))
    }

    async fn upload_all(
        &self,
        working_root: &StagedLocation,
        pending: &[PendingFile],
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let store = &self.store;
        stream::iter(pending.iter().map(Ok::<_, ImporterError>))
            .try_for_each_concurrent(self.concurrency, |file| {
                let key = working_root.key_for(&file.relative_path);
                async move {
                    store
                        .upload_file(working_root.bucket(), &key, &file.path, progress)
                        .await?;
                    debug!("Uploaded {}", key);
                    Ok(())
                }
            })
            .await
    }
}

/// Walk `root` (following symlinks) and list every regular file, sorted by
/// relative path.
pub fn list_local_files(root: &Path) -> Result<Vec<PendingFile>> {
    if !root.is_dir() {
        return Err(ImporterError::Io {
            message: "snapshot root is not a directory".to_string(),
            path: Some(root.to_path_buf()),
            source: None,
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(ImporterError::from)?
            .len();
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| ImporterError::Io {
                message: e.to_string(),
                path: Some(entry.path().to_path_buf()),
                source: None,
            })?;
        // Object keys are UTF-8; a lossy conversion would stage under another name.
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ImporterError::Io {
                message: "file name is not valid UTF-8".to_string(),
                path: Some(entry.path().to_path_buf()),
                source: None,
            })?
            .join("/");

        files.push(PendingFile {
            relative_path,
            path: entry.path().to_path_buf(),
            size,
        });
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryObjectStore;
    use crate::remote::ObjectStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn snapshot(files: &[(&str, usize)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, size) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, vec![b'x'; *size]).unwrap();
        }
        dir
    }

    #[test]
    fn test_list_local_files_is_recursive() {
        let dir = snapshot(&[("config.json", 3), ("sub/dir/weights.bin", 10)]);
        let files = list_local_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["config.json", "sub/dir/weights.bin"]);
        assert_eq!(files[1].size, 10);
    }

    #[cfg(unix)]
    #[test]
    fn test_list_local_files_follows_symlinks() {
        let blobs = snapshot(&[("blob", 7)]);
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(blobs.path().join("blob"), dir.path().join("model.bin"))
            .unwrap();

        let files = list_local_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "model.bin");
        assert_eq!(files[0].size, 7);
    }

    #[cfg(unix)]
    #[test]
    fn test_list_local_files_rejects_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = snapshot(&[("config.json", 3)]);
        let name = OsStr::from_bytes(b"weights-\xff.bin");
        std::fs::write(dir.path().join(name), b"x").unwrap();

        let err = list_local_files(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_list_local_files_rejects_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(list_local_files(&dir.path().join("nope")).is_err());
    }

    #[tokio::test]
    async fn test_stage_uploads_then_skips() {
        let dir = snapshot(&[("a.json", 5), ("b.bin", 20), ("nested/c.txt", 1)]);
        let store = Arc::new(MemoryObjectStore::new());
        let stager = Stager::new(store.clone());
        let dest = StagedLocation::parse("my-bucket").unwrap();

        let progress = TransferProgress::new();
        let first = stager.stage(dir.path(), &dest, "foo-bar-1", &progress).await.unwrap();
        assert_eq!(first.uploaded.len(), 3);
        assert_eq!(first.uploaded_bytes(), 26);
        assert_eq!(first.location.uri(), "s3://my-bucket/models/foo-bar-1");
        assert!(store.contains("my-bucket", "models/foo-bar-1/nested/c.txt"));
        assert_eq!(progress.snapshot().transferred_bytes, 26);

        let second = stager.stage(dir.path(), &dest, "foo-bar-1", &NoProgress).await.unwrap();
        assert!(second.uploaded.is_empty());
        assert_eq!(second.skipped, 3);
        assert_eq!(store.upload_count(), 3);
    }

    /// Store that tracks how many uploads are running at once.
    #[derive(Default)]
    struct GaugeStore {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for GaugeStore {
        async fn object_exists(&self, _bucket: &str, _key: &str) -> Result<bool> {
            Ok(false)
        }

        async fn upload_file(
            &self,
            _bucket: &str,
            _key: &str,
            _path: &Path,
            progress: &dyn ProgressSink,
        ) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.uploads.fetch_add(1, Ordering::SeqCst);
            progress.advance(1);
            Ok(())
        }

        async fn delete_prefix(&self, _bucket: &str, _prefix: &str) -> Result<usize> {
            Ok(0)
        }
    }

    fn many_files(count: usize) -> TempDir {
        let names: Vec<String> = (0..count).map(|i| format!("shard-{i:03}.bin")).collect();
        let files: Vec<(&str, usize)> = names.iter().map(|n| (n.as_str(), 1)).collect();
        snapshot(&files)
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_pool_runs_twenty_uploads_at_once() {
        let dir = many_files(50);
        let store = Arc::new(GaugeStore::default());
        let stager = Stager::new(store.clone());
        let dest = StagedLocation::parse("b").unwrap();

        stager.stage(dir.path(), &dest, "m", &NoProgress).await.unwrap();

        assert_eq!(store.uploads.load(Ordering::SeqCst), 50);
        assert_eq!(
            store.peak.load(Ordering::SeqCst),
            StagingConfig::DEFAULT_CONCURRENCY
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_of_one_uploads_sequentially() {
        let dir = many_files(50);
        let store = Arc::new(GaugeStore::default());
        let stager = Stager::new(store.clone()).with_concurrency(1);
        let dest = StagedLocation::parse("b").unwrap();

        stager.stage(dir.path(), &dest, "m", &NoProgress).await.unwrap();

        assert_eq!(store.uploads.load(Ordering::SeqCst), 50);
        assert_eq!(store.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delta_only_grows_with_new_local_files() {
        let dir = snapshot(&[("a.json", 5)]);
        let store = Arc::new(MemoryObjectStore::new());
        let stager = Stager::new(store.clone());
        let root = StagedLocation::parse("b").unwrap().working_root("m");

        let (before, _) = stager.compute_delta(dir.path(), &root).await.unwrap();
        std::fs::write(dir.path().join("extra.bin"), b"12").unwrap();
        let (after, _) = stager.compute_delta(dir.path(), &root).await.unwrap();

        assert!(before.iter().all(|f| after.contains(f)));
        assert_eq!(after.len(), before.len() + 1);
    }

    #[tokio::test]
    async fn test_changed_file_is_not_reuploaded() {
        let dir = snapshot(&[("a.json", 5)]);
        let store = Arc::new(MemoryObjectStore::new());
        let stager = Stager::new(store.clone());
        let dest = StagedLocation::parse("b").unwrap();

        stager.stage(dir.path(), &dest, "m", &NoProgress).await.unwrap();
        std::fs::write(dir.path().join("a.json"), b"changed contents").unwrap();
        let outcome = stager.stage(dir.path(), &dest, "m", &NoProgress).await.unwrap();

        assert!(outcome.uploaded.is_empty());
        assert_eq!(store.object_size("b", "models/m/a.json"), Some(5));
    }

    #[tokio::test]
    async fn test_existence_check_failure_is_fatal() {
        let dir = snapshot(&[("a.json", 5)]);
        let store = Arc::new(MemoryObjectStore::new());
        store.deny_existence_checks("AccessDenied");
        let stager = Stager::new(store.clone());
        let dest = StagedLocation::parse("b").unwrap();

        let err = stager.stage(dir.path(), &dest, "m", &NoProgress).await.unwrap_err();
        assert!(err.to_string().contains("AccessDenied"));
        assert_eq!(store.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_fatal() {
        let dir = snapshot(&[("a.json", 5), ("b.bin", 5)]);
        let store = Arc::new(MemoryObjectStore::new());
        store.fail_uploads_containing("b.bin");
        let stager = Stager::new(store.clone()).with_concurrency(1);
        let dest = StagedLocation::parse("b").unwrap();

        let progress = TransferProgress::new();
        let result = stager.stage(dir.path(), &dest, "m", &progress).await;
        assert!(result.is_err());
        assert!(!progress.snapshot().finished);
    }
}
