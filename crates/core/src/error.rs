//! Error types for the snaplist-core library.
//!
//! This module provides granular error variants for different failure modes,
//! enabling precise error handling and user-friendly error messages.
//!
//! Analysis failures carry an [`AnalysisErrorKind`] so the caller can tell a
//! dropped connection from a content-safety refusal without parsing strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failed analysis call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisErrorKind {
    /// Transport failure: connection refused, DNS, TLS, timeout.
    Network,
    /// The provider or backend answered with a non-2xx status.
    Api,
    /// The provider refused on content-safety grounds.
    Safety,
    /// The caller supplied no images or malformed image data.
    Format,
    /// The provider answered with text that is not valid structured output.
    Parse,
}

impl AnalysisErrorKind {
    /// Stable lowercase identifier.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Api => "api",
            Self::Safety => "safety",
            Self::Format => "format",
            Self::Parse => "parse",
        }
    }
}

impl fmt::Display for AnalysisErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur within the snaplist-core library.
///
/// Each variant represents a specific failure mode with contextual information
/// to help diagnose and handle errors appropriately.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (missing keys, invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required environment variable was not found.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Image decoding, processing or encoding failed.
    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    /// The crop rectangle does not describe a usable region.
    #[error("Invalid crop: {0}")]
    InvalidCrop(String),

    /// An analysis call failed; `kind` tells how.
    #[error("Analysis failed ({kind}): {message}")]
    Analysis {
        kind: AnalysisErrorKind,
        status: Option<u16>,
        message: String,
    },

    /// An operation exceeded its time bound.
    #[error("Timed out while {0}")]
    Timeout(String),

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Reading or writing listing history failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The requested transition is not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// UI-related errors (rendering, window management).
    #[error("UI error: {0}")]
    Ui(String),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an image processing error with the given message.
    pub fn image(msg: impl Into<String>) -> Self {
        Self::ImageProcessing(msg.into())
    }

    /// Creates a storage error with the given message.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates an invalid-state error with the given message.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Creates a UI error with the given message.
    pub fn ui(msg: impl Into<String>) -> Self {
        Self::Ui(msg.into())
    }

    /// Creates an analysis error of the given kind.
    pub fn analysis(kind: AnalysisErrorKind, msg: impl Into<String>) -> Self {
        Self::Analysis {
            kind,
            status: None,
            message: msg.into(),
        }
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::analysis(AnalysisErrorKind::Network, msg)
    }

    /// Creates an API error carrying the HTTP status returned by the backend.
    pub fn api(status: u16, msg: impl Into<String>) -> Self {
        Self::Analysis {
            kind: AnalysisErrorKind::Api,
            status: Some(status),
            message: msg.into(),
        }
    }

    pub fn safety(msg: impl Into<String>) -> Self {
        Self::analysis(AnalysisErrorKind::Safety, msg)
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::analysis(AnalysisErrorKind::Format, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::analysis(AnalysisErrorKind::Parse, msg)
    }

    /// Returns the analysis classification, if this is an analysis failure.
    ///
    /// Timeouts surface as [`AnalysisErrorKind::Network`].
    pub fn analysis_kind(&self) -> Option<AnalysisErrorKind> {
        match self {
            Self::Analysis { kind, .. } => Some(*kind),
            Self::Timeout(_) => Some(AnalysisErrorKind::Network),
            _ => None,
        }
    }

    /// Whether a manual retry of the same action can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Analysis {
                kind: AnalysisErrorKind::Network,
                ..
            } => true,
            Self::Analysis {
                kind: AnalysisErrorKind::Api,
                status,
                ..
            } => matches!(status, Some(s) if *s == 429 || *s >= 500),
            Self::Timeout(_) | Self::Storage(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout("waiting for the provider".to_string());
        }
        if err.is_decode() {
            return Self::parse(format!("Malformed response body: {}", err));
        }
        if let Some(status) = err.status() {
            return Self::api(status.as_u16(), err.to_string());
        }
        Self::network(err.to_string())
    }
}

/// A convenient alias for Result with [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
