//! Object storage locations.
//!
//! A destination is given either as a bare bucket name (`my-bucket`) or as a
//! URI with a prefix (`s3://my-bucket/some/prefix`). Both forms decompose into
//! a bucket and a normalized key prefix.

use crate::config::StagingConfig;
use crate::error::{ImporterError, Result};
use std::fmt;
use std::str::FromStr;

const S3_SCHEME: &str = "s3://";

/// A bucket plus a normalized key prefix (no leading, trailing or doubled `/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagedLocation {
    bucket: String,
    prefix: String,
}

impl StagedLocation {
    /// Decompose a caller-supplied location string.
    ///
    /// `.` segments and repeated slashes are dropped and `..` removes the
    /// previous segment. An empty bucket is an error.
    pub fn parse(location: &str) -> Result<Self> {
        let invalid = |message: &str| ImporterError::InvalidLocation {
            location: location.to_string(),
            message: message.to_string(),
        };

        let trimmed = location.trim();
        let rest = trimmed.strip_prefix(S3_SCHEME).unwrap_or(trimmed);
        if rest.starts_with('/') {
            return Err(invalid("bucket name is empty"));
        }

        let mut segments = Vec::new();
        push_segments(&mut segments, rest).map_err(|m| invalid(m))?;

        let mut segments = segments.into_iter();
        let bucket = segments
            .next()
            .ok_or_else(|| invalid("bucket name is empty"))?;
        if bucket.chars().any(char::is_whitespace) {
            return Err(invalid("bucket name contains whitespace"));
        }

        Ok(Self {
            bucket,
            prefix: segments.collect::<Vec<_>>().join("/"),
        })
    }

    /// Bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key prefix, empty for the bucket root.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Extend the prefix with one or more `/`-separated segments.
    pub fn join(&self, path: &str) -> Self {
        let mut segments: Vec<String> = if self.prefix.is_empty() {
            Vec::new()
        } else {
            self.prefix.split('/').map(str::to_string).collect()
        };
        // `..` past the bucket root stays at the root.
        if push_segments(&mut segments, path).is_err() {
            segments.clear();
        }
        Self {
            bucket: self.bucket.clone(),
            prefix: segments.join("/"),
        }
    }

    /// Working root for a model: `<prefix>/models/<canonical name>`.
    pub fn working_root(&self, canonical_name: &str) -> Self {
        self.join(StagingConfig::MODELS_DIR).join(canonical_name)
    }

    /// Object key for a `/`-separated path relative to this location.
    pub fn key_for(&self, relative_path: &str) -> String {
        if self.prefix.is_empty() {
            relative_path.to_string()
        } else {
            format!("{}/{}", self.prefix, relative_path)
        }
    }

    /// `s3://bucket/prefix` form of this location.
    pub fn uri(&self) -> String {
        if self.prefix.is_empty() {
            format!("{}{}", S3_SCHEME, self.bucket)
        } else {
            format!("{}{}/{}", S3_SCHEME, self.bucket, self.prefix)
        }
    }
}

fn push_segments(segments: &mut Vec<String>, path: &str) -> std::result::Result<(), &'static str> {
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err("path escapes the bucket");
                }
            }
            other => segments.push(other.to_string()),
        }
    }
    Ok(())
}

impl FromStr for StagedLocation {
    type Err = ImporterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for StagedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}
