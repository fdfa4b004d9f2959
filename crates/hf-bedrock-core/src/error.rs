//! Error types for the importer.
//!
//! Every failure the migration pipeline can surface maps to one variant here,
//! and every variant maps to one [`ErrorKind`] so callers can tell an input
//! problem from a remote failure, a failed import job from a timed-out one.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the importer.
#[derive(Debug, Error)]
pub enum ImporterError {
    // Input errors
    #[error("Invalid model identifier {identifier:?}: {message}")]
    InvalidIdentifier { identifier: String, message: String },

    #[error("Invalid storage location {location:?}: {message}")]
    InvalidLocation { location: String, message: String },

    // Remote service errors
    #[error("{service} {operation} failed: {message}")]
    Remote {
        service: &'static str,
        operation: &'static str,
        message: String,
    },

    // Import job outcomes
    #[error("Failed to import model (job {job}): {message}")]
    ImportJobFailed { job: String, message: String },

    #[error("Import job {job} still in progress after {waited:?}")]
    ImportJobTimeout { job: String, waited: Duration },

    #[error("Import job {job} finished with status {status} but reported no model ARN")]
    MissingModelArn { job: String, status: String },

    // Hub errors
    #[error("HuggingFace Hub error for {repo_id}: {message}")]
    Hub { repo_id: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for importer operations.
pub type Result<T> = std::result::Result<T, ImporterError>;

/// Coarse classification of an [`ImporterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad identifier or location, detected before any remote call.
    Input,
    /// A remote existence check, transfer, lookup or status check failed.
    Remote,
    /// The import job reported a failure.
    JobFailed,
    /// The import job never left the in-progress state within the wait ceiling.
    Timeout,
    /// A remote response broke an expected invariant.
    Invariant,
    /// Local filesystem, serialization, hub or configuration problem.
    Local,
}

impl From<std::io::Error> for ImporterError {
    fn from(err: std::io::Error) -> Self {
        ImporterError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ImporterError {
    fn from(err: serde_json::Error) -> Self {
        ImporterError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<walkdir::Error> for ImporterError {
    fn from(err: walkdir::Error) -> Self {
        let message = err.to_string();
        let path = err.path().map(|p| p.to_path_buf());
        ImporterError::Io {
            message,
            path,
            source: err.into_io_error(),
        }
    }
}

impl ImporterError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ImporterError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a remote service error.
    pub fn remote(
        service: &'static str,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        ImporterError::Remote {
            service,
            operation,
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImporterError::InvalidIdentifier { .. } | ImporterError::InvalidLocation { .. } => {
                ErrorKind::Input
            }
            ImporterError::Remote { .. } => ErrorKind::Remote,
            ImporterError::ImportJobFailed { .. } => ErrorKind::JobFailed,
            ImporterError::ImportJobTimeout { .. } => ErrorKind::Timeout,
            ImporterError::MissingModelArn { .. } => ErrorKind::Invariant,
            ImporterError::Hub { .. }
            | ImporterError::Io { .. }
            | ImporterError::Json { .. }
            | ImporterError::Config { .. } => ErrorKind::Local,
        }
    }
}
