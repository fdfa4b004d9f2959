//! Upload progress reporting.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Receives aggregate upload progress from the stager.
///
/// `begin` is called once with the byte total of the files about to be
/// uploaded, `advance` as bytes complete (from several uploads at once), and
/// `finish` after the last upload succeeds.
pub trait ProgressSink: Send + Sync {
    fn begin(&self, _total_bytes: u64, _files: usize) {}

    fn advance(&self, bytes: u64);

    fn finish(&self) {}
}

/// Plain byte-count callbacks are progress sinks.
impl<F> ProgressSink for F
where
    F: Fn(u64) + Send + Sync,
{
    fn advance(&self, bytes: u64) {
        self(bytes)
    }
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn advance(&self, _bytes: u64) {}
}

/// Point-in-time view of a [`TransferProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferSnapshot {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub files: usize,
    pub finished: bool,
}

impl TransferSnapshot {
    /// Fraction of bytes transferred, 1.0 for an empty transfer.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.transferred_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// Thread-safe progress counter.
#[derive(Debug, Default)]
pub struct TransferProgress {
    total_bytes: AtomicU64,
    transferred_bytes: AtomicU64,
    files: AtomicUsize,
    finished: AtomicBool,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            total_bytes: self.total_bytes.load(Ordering::SeqCst),
            transferred_bytes: self.transferred_bytes.load(Ordering::SeqCst),
            files: self.files.load(Ordering::SeqCst),
            finished: self.finished.load(Ordering::SeqCst),
        }
    }
}

impl ProgressSink for TransferProgress {
    fn begin(&self, total_bytes: u64, files: usize) {
        self.total_bytes.fetch_add(total_bytes, Ordering::SeqCst);
        self.files.fetch_add(files, Ordering::SeqCst);
    }

    fn advance(&self, bytes: u64) {
        self.transferred_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}
