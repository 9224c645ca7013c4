//! Error types for Hashi
//!
//! One error enum for every failure mode across the sync service. Transport
//! failures, remote application errors (error envelopes inside otherwise
//! successful exchanges), local inconsistencies and parse failures are kept
//! as distinct variants so callers can tell them apart without string matching.

use thiserror::Error;

/// Result type alias for Hashi operations
pub type Result<T> = std::result::Result<T, HashiError>;

/// Comprehensive error type for Hashi operations
#[derive(Error, Debug)]
pub enum HashiError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage/database errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network/HTTP errors
    #[error("Network error: {0}")]
    Network(String),

    /// Parsing errors (webhook payloads, repo slugs)
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Asana client errors that were not classified by the adapter
    #[error("Asana error: {0}")]
    Asana(#[from] asana::Error),

    /// Integration errors (GitHub, Asana)
    #[error("Integration error: {0}")]
    Integration(String),

    /// The task tracker refused a task create or update
    #[error("Task '{task}' rejected: {message}")]
    TaskRejected { task: String, message: String },

    /// The issue tracker already has a hook for this repository
    #[error("Hook already exists on {repo}")]
    HookExists { repo: String },

    /// Any other error envelope returned by a remote service
    #[error("{service} returned HTTP {status}: {message}")]
    Remote {
        service: String,
        status: u16,
        message: String,
    },

    /// A mirrored record could not be read back
    #[error("Corrupt {collection} record: {reason} (payload: {payload})")]
    CorruptRecord {
        collection: String,
        payload: String,
        reason: String,
    },

    /// An issue reached the reconciler without a target project/workspace
    #[error("Issue {0} has no resolved project/workspace")]
    Unresolved(String),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Rate limited (with optional retry-after duration in seconds)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),
}

impl HashiError {
    /// True for errors raised by a remote service inside a well-formed response
    pub fn is_remote_application_error(&self) -> bool {
        matches!(
            self,
            HashiError::TaskRejected { .. } | HashiError::HookExists { .. } | HashiError::Remote { .. }
        )
    }
}

impl crate::integrations::retry::RetryableError for HashiError {
    fn retry_decision(&self) -> crate::integrations::retry::RetryDecision {
        use crate::integrations::retry::RetryDecision;
        use std::time::Duration;

        match self {
            HashiError::Network(_) => RetryDecision::Retry,
            HashiError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else if e.is_status() {
                    match e.status().map(|s| s.as_u16()) {
                        Some(429) => RetryDecision::RetryAfter(Duration::from_secs(60)),
                        Some(500..=599) => RetryDecision::Retry,
                        _ => RetryDecision::NoRetry,
                    }
                } else {
                    RetryDecision::Retry
                }
            }
            HashiError::Asana(e) => match e {
                asana::Error::RateLimited(secs) => {
                    RetryDecision::RetryAfter(Duration::from_secs(*secs))
                }
                asana::Error::Api { status, .. } if *status >= 500 => RetryDecision::Retry,
                e if e.is_transport() => RetryDecision::Retry,
                _ => RetryDecision::NoRetry,
            },
            HashiError::RateLimited(secs) => RetryDecision::RetryAfter(Duration::from_secs(*secs)),
            HashiError::Remote { status, .. } if *status >= 500 => RetryDecision::Retry,
            HashiError::Integration(msg) => {
                if msg.contains("Rate limited") || msg.contains("rate limit") {
                    match extract_retry_after(msg) {
                        Some(secs) => RetryDecision::RetryAfter(Duration::from_secs(secs)),
                        None => RetryDecision::RetryAfter(Duration::from_secs(60)),
                    }
                } else if msg.contains("timeout") || msg.contains("connection") {
                    RetryDecision::Retry
                } else {
                    RetryDecision::NoRetry
                }
            }
            HashiError::Config(_)
            | HashiError::Storage(_)
            | HashiError::Parse(_)
            | HashiError::Io(_)
            | HashiError::Auth(_)
            | HashiError::Json(_)
            | HashiError::Yaml(_)
            | HashiError::Database(_)
            | HashiError::TaskRejected { .. }
            | HashiError::HookExists { .. }
            | HashiError::Remote { .. }
            | HashiError::CorruptRecord { .. }
            | HashiError::Unresolved(_)
            | HashiError::Other(_) => RetryDecision::NoRetry,
        }
    }
}

/// Extract retry-after seconds from an error message
fn extract_retry_after(msg: &str) -> Option<u64> {
    let msg_lower = msg.to_lowercase();
    let pos = msg_lower.find("retry after")?;
    let num_str: String = msg[pos + 11..]
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    num_str.parse().ok()
}
