//! Destination-side naming derived from a HuggingFace model identifier.
//!
//! The canonical name is the only name used on the destination side: it
//! becomes the staging directory, the imported model name and the stem of
//! the import job name.

use crate::config::ImportJobConfig;
use crate::error::{ImporterError, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Regex for anything that is not an ASCII letter, digit or hyphen.
static NON_NAME_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-a-zA-Z0-9]").unwrap());

/// Derive the canonical name of a model identifier.
///
/// Every character outside `[-a-zA-Z0-9]` becomes `-`. The mapping is
/// character-for-character, so the result is as long as the input (in chars)
/// and applying it twice changes nothing.
///
/// # Examples
///
/// ```
/// use hf_bedrock_core::naming::canonical_name;
///
/// assert_eq!(
///     canonical_name("deepseek-ai/DeepSeek-R1-Distill-Llama-8B"),
///     "deepseek-ai-DeepSeek-R1-Distill-Llama-8B"
/// );
/// assert_eq!(canonical_name("Qwen/Qwen2.5-7B"), "Qwen-Qwen2-5-7B");
/// ```
pub fn canonical_name(model_id: &str) -> String {
    NON_NAME_CHAR.replace_all(model_id, "-").into_owned()
}

/// Check a model identifier before any remote call is made.
pub fn validate_model_id(model_id: &str) -> Result<()> {
    if model_id.trim().is_empty() {
        return Err(ImporterError::InvalidIdentifier {
            identifier: model_id.to_string(),
            message: "identifier is empty".to_string(),
        });
    }
    if model_id.chars().any(char::is_whitespace) {
        return Err(ImporterError::InvalidIdentifier {
            identifier: model_id.to_string(),
            message: "identifier contains whitespace".to_string(),
        });
    }
    Ok(())
}

/// Build an import job name from a canonical name and a nanosecond timestamp.
///
/// The model part is truncated so the name stays well inside the service's
/// 63 character limit.
pub fn job_name(canonical_name: &str, timestamp_nanos: i64) -> String {
    let stem: String = canonical_name
        .chars()
        .take(ImportJobConfig::JOB_NAME_MODEL_CHARS)
        .collect();
    format!(
        "{}-{}-{}",
        ImportJobConfig::JOB_NAME_PREFIX,
        stem,
        timestamp_nanos
    )
}

/// Format bytes as a human-readable string.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
