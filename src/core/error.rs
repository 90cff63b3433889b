//! Domain-specific error types and error handling utilities.
//!
//! This module defines [`MirrorError`] which covers every failure mode of the
//! mirror pipeline. It uses `thiserror` for ergonomic error definitions and
//! includes constructors for the common failure scenarios.
//!
//! # Public API
//! - [`MirrorError`]: Main error enum covering all failure modes
//! - [`Result<T>`]: Type alias for `std::result::Result<T, MirrorError>`
//!
//! # Error Categories
//! - **Upstream**: non-2xx responses and transport failures
//! - **Integrity**: received bytes hash to something other than expected
//! - **Lookup**: version or asset absent from its index
//! - **Archive**: archives that cannot be parsed, paths that escape the output tree
//! - **Publish**: commit/push failures, split into transient and terminal

use std::path::PathBuf;
use thiserror::Error;

/// Domain-specific error types for asset-mirror
#[derive(Error, Debug)]
pub enum MirrorError {
    // Fetch errors
    #[error("Upstream request to {url} failed: {message}")]
    Upstream {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Integrity check failed for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid {algorithm} digest: '{value}'")]
    InvalidDigest {
        algorithm: &'static str,
        value: String,
    },

    // Archive errors
    #[error("Corrupt archive '{path}': {source}")]
    CorruptArchive {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[error("Path '{path}' escapes the output tree")]
    UnsafePath { path: String },

    // Publish errors
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    PublishTransient {
        operation: &'static str,
        attempts: u32,
        message: String,
    },

    #[error("{operation} failed: {message}")]
    PublishTerminal {
        operation: &'static str,
        message: String,
    },

    #[error("Failed to {action} overlay at '{path}': {message}")]
    Mount {
        action: &'static str,
        path: PathBuf,
        message: String,
    },

    // Restore errors
    #[error("Restore ledger '{path}' is malformed at line {line}")]
    MalformedLedger { path: PathBuf, line: usize },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Ambient errors
    #[error("Git repository error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for Results using MirrorError
pub type Result<T> = std::result::Result<T, MirrorError>;

impl MirrorError {
    /// Create an upstream error for a non-2xx response
    pub fn upstream_status(url: impl Into<String>, status: u16) -> Self {
        Self::Upstream {
            url: url.into(),
            status: Some(status),
            message: format!("server returned status {status}"),
        }
    }

    /// Create an upstream error for a transport failure
    pub fn upstream_transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            url: url.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Create an integrity error
    pub fn integrity(
        url: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Integrity {
            url: url.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a corrupt archive error
    pub fn corrupt_archive(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::CorruptArchive {
            path: path.into(),
            source,
        }
    }

    /// Create a terminal publish error
    pub fn publish_terminal(operation: &'static str, message: impl Into<String>) -> Self {
        Self::PublishTerminal {
            operation,
            message: message.into(),
        }
    }

    /// Create a transient publish error
    pub fn publish_transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::PublishTransient {
            operation,
            attempts: 1,
            message: message.into(),
        }
    }

    /// Create a mount error
    pub fn mount(action: &'static str, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Mount {
            action,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Upstream failures may succeed on another attempt at the fetch layer.
    /// 4xx responses other than 408/429 will not.
    pub fn is_retryable_fetch(&self) -> bool {
        match self {
            Self::Upstream { status: None, .. } => true,
            Self::Upstream {
                status: Some(code), ..
            } => *code >= 500 || *code == 408 || *code == 429,
            _ => false,
        }
    }

    pub fn is_transient_publish(&self) -> bool {
        matches!(self, Self::PublishTransient { .. })
    }
}
