use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Run-level errors for Hermes.
///
/// These are fatal: they are raised before any worker starts and mean the
/// batch cannot make progress at all. Per-address problems are
/// [`FetchError`]s and never surface here.
#[derive(Error, Debug)]
pub enum AppError {
    /// Run configuration is out of range.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The address list could not be read.
    #[error("Input error: {0}")]
    InputError(String),

    /// Filesystem operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Persisting a record or failure entry failed.
    #[error("Sink error: {0}")]
    SinkError(String),
}

/// Classification of a failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// The attempt exceeded its per-fetch timeout.
    Timeout,
    /// Connection, DNS, transport or upstream 5xx failure.
    NetworkFailure,
    /// The site refused to serve the page (403/429, challenge page).
    Blocked,
    /// The response can never yield a document (bad URL, 404, empty body).
    Malformed,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::NetworkFailure => "network_failure",
            FetchErrorKind::Blocked => "blocked",
            FetchErrorKind::Malformed => "malformed",
        }
    }

    /// Returns true if another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchErrorKind::Timeout | FetchErrorKind::NetworkFailure)
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of a single fetch attempt.
///
/// Every fetcher must map its failures onto one of the four
/// [`FetchErrorKind`]s; nothing else crosses the fetch boundary.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind} fetching {address} (attempt {attempt}): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub address: String,
    /// 1-based attempt number; stamped by the retry controller.
    pub attempt: u32,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, address: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            attempt: 1,
            message: message.into(),
        }
    }

    pub fn timeout(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, address, message)
    }

    pub fn network(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NetworkFailure, address, message)
    }

    pub fn blocked(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Blocked, address, message)
    }

    pub fn malformed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Malformed, address, message)
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
