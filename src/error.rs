//! Error types for the udpz library.

use std::io;

use serde_derive::Serialize;
use thiserror::Error;

/// Errors raised while validating a [`ScanConfig`](crate::scanner::ScanConfig).
///
/// These are the only errors fatal to a scan session, and they are always
/// raised before the first datagram is sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Host or port concurrency was zero.
    #[error("concurrency value must be > 0")]
    Concurrency,

    /// The per-attempt timeout was zero.
    #[error("timeout value must be > 0")]
    Timeout,

    /// The port set is empty.
    #[error("no ports to scan")]
    NoPorts,

    /// A port outside of 1-65535 was requested.
    #[error("port {0} must be between 1 and 65535")]
    InvalidPort(u16),

    /// The proxy configuration cannot be used.
    #[error("proxy configuration error: {0}")]
    Proxy(String),
}

/// A target that could not be turned into any network address.
///
/// Recorded on the session; the target is skipped and the scan continues.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("could not resolve {target:?}: {reason}")]
pub struct ResolutionError {
    /// The target as supplied by the user.
    pub target: String,
    /// Why resolution failed.
    pub reason: String,
}

impl ResolutionError {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while writing or reading exported results.
#[derive(Error, Debug)]
pub enum OutputError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CSV/TSV serialization/deserialization error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A text table row could not be parsed.
    #[error("malformed row {line}: {reason}")]
    Malformed { line: usize, reason: String },

    /// The format is meant for humans only and cannot be read back.
    #[error("format {0} cannot be parsed")]
    Unparseable(&'static str),
}
