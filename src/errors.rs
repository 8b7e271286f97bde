//! Error taxonomy for the sync pipeline.
//!
//! Every stage has its own typed error so the run coordinator can record
//! per-target outcomes instead of collapsing failures into one opaque bucket:
//!
//! - [`FetchError`]: retrieval failed; carries the URL, the attempt count,
//!   and a [`FetchCause`] classified as transient or permanent
//! - [`ExtractError`]: the payload could not be interpreted as a document
//! - [`StoreError`]: existence check or write against the object store failed
//! - [`NotifyError`]: the downstream event could not be enqueued (non-fatal)
//! - [`ConfigError`]: the run configuration is unreadable or invalid (fatal)
//!
//! Only `ConfigError` and a store probe failure abort a run; everything else
//! is target-scoped.

use thiserror::Error;

/// Root cause of a failed retrieval.
///
/// Transient causes (timeouts, connection failures, 5xx responses) are
/// eligible for retry with backoff; permanent causes (4xx responses,
/// malformed URLs) fail the target immediately.
#[derive(Debug, Error)]
pub enum FetchCause {
    /// The request exceeded its timeout.
    #[error("request timed out")]
    Timeout,
    /// A connection to the host could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The server answered with a non-success status code.
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    /// The target URL could not be parsed.
    #[error("invalid target URL: {0}")]
    InvalidUrl(String),
    /// Any other transport-level failure (resets, interrupted bodies).
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchCause {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchCause::Timeout | FetchCause::Connect(_) | FetchCause::Transport(_) => true,
            FetchCause::Status(code) => *code >= 500 || *code == 429,
            FetchCause::InvalidUrl(_) => false,
        }
    }
}

/// A failed retrieval, reported after retries were exhausted (or skipped
/// for permanent causes).
#[derive(Debug, Error)]
#[error("fetch of {url} failed after {attempts} attempt(s): {cause}")]
pub struct FetchError {
    /// The URL that was being fetched.
    pub url: String,
    /// How many attempts were made before giving up.
    pub attempts: usize,
    /// The classified root cause of the final attempt.
    pub cause: FetchCause,
}

/// A payload that could not be interpreted as the expected document type.
///
/// Absent optional fields are never an error; this fires only when the
/// document as a whole is unusable.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The payload declared a content type that is not a markup document.
    #[error("unsupported content type `{content_type}`")]
    UnsupportedContentType { content_type: String },
    /// A selector expression in the target's rules failed to parse.
    #[error("invalid selector `{selector}`: {message}")]
    BadSelector { selector: String, message: String },
    /// A JSON payload was not the expected array of file URLs.
    #[error("malformed JSON listing: {message}")]
    MalformedListing { message: String },
}

/// A failure talking to the object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Local filesystem failure underneath the store.
    #[error("object store I/O failure at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The record could not be serialized for storage.
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Remote backend failure (network, permissions, quota).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A failure enqueueing a downstream event.
///
/// Never fatal: the object is already durably stored by the time the
/// notifier runs, so at worst a consumer misses a timely trigger.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("event spool I/O failure at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("queue backend error: {0}")]
    Backend(String),
}

/// A fatal configuration problem, detected before any target is attempted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
