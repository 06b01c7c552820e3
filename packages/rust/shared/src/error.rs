//! Error types for novelpull.
//!
//! Library crates use [`NovelPullError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Chapter-level failures never become a [`NovelPullError`]: they travel as a
//! [`FetchError`] tagged with an [`ErrorKind`] assigned where the failure happened,
//! and end up in the failure ledger instead of aborting the job.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all job-level operations.
#[derive(Debug, thiserror::Error)]
pub enum NovelPullError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of chapter retrieval (client setup, catalog fetch).
    #[error("network error: {0}")]
    Network(String),

    /// HTML or JSON parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Snapshot, report, or record persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad work id, malformed charset, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The chapter list could not be resolved. Aborts the whole job.
    #[error("chapter list unavailable for work {work_id}: {reason}")]
    ListUnavailable { work_id: String, reason: String },

    /// Charset table loading error.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NovelPullError>;

impl NovelPullError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a job-fatal list resolution error.
    pub fn list_unavailable(work_id: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::ListUnavailable {
            work_id: work_id.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chapter-level error taxonomy
// ---------------------------------------------------------------------------

/// Classification of a chapter-level (or list-level) failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No chapter anchors or no title/status markers on the catalog page.
    ListUnavailable,
    /// The response decoded to nothing, or to fewer characters than required.
    EmptyOrShortContent,
    /// Connection, timeout, HTTP status, or body parse failure.
    TransportError,
    /// Neither substitution table produced usable text.
    DecodeFailure,
    /// The remote service rejected the session token.
    SessionInvalid,
    /// Every attempt failed; the chapter is recorded as failed.
    RetriesExhausted,
}

impl ErrorKind {
    /// Stable label used in logs and the failure report.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListUnavailable => "list_unavailable",
            Self::EmptyOrShortContent => "empty_or_short_content",
            Self::TransportError => "transport_error",
            Self::DecodeFailure => "decode_failure",
            Self::SessionInvalid => "session_invalid",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed retrieval attempt, classified at the point of failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }

    pub fn session_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SessionInvalid, message)
    }

    pub fn short_content(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyOrShortContent, message)
    }

    /// Merge a fallback failure into this (primary) failure, keeping the primary kind.
    pub fn with_fallback(self, fallback: &FetchError) -> Self {
        Self {
            kind: self.kind,
            message: format!("primary: {}; fallback: {fallback}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = NovelPullError::config("missing base_url");
        assert_eq!(err.to_string(), "config error: missing base_url");

        let err = NovelPullError::list_unavailable(42, "no chapter anchors");
        assert_eq!(
            err.to_string(),
            "chapter list unavailable for work 42: no chapter anchors"
        );
    }

    #[test]
    fn fallback_concatenates_both_causes() {
        let primary = FetchError::transport("HTTP 502");
        let fallback = FetchError::transport("missing data.chapterData.content");
        let merged = primary.with_fallback(&fallback);

        assert_eq!(merged.kind, ErrorKind::TransportError);
        assert!(merged.message.contains("HTTP 502"));
        assert!(merged.message.contains("missing data.chapterData.content"));
    }

    #[test]
    fn error_kind_labels_are_snake_case() {
        assert_eq!(ErrorKind::EmptyOrShortContent.to_string(), "empty_or_short_content");
        let json = serde_json::to_string(&ErrorKind::RetriesExhausted).unwrap();
        assert_eq!(json, "\"retries_exhausted\"");
    }
}
