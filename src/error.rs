//! Anonyma error types
//!
//! Error messages carry entity types, offsets and counts only. A detected
//! value never appears in an error string.

use serde::Serialize;
use thiserror::Error;

/// Anonyma error type
#[derive(Error, Debug)]
pub enum Error {
    /// Bad configuration: invalid custom pattern, unknown entity type, bad threshold
    #[error("Configuration error: {0}")]
    Config(String),

    /// A detector failed, or every detector of the ensemble failed
    #[error("Detection error: {0}")]
    Detection(String),

    /// Invalid request input: empty text, out-of-range offsets
    #[error("Validation error: {0}")]
    Validation(String),

    /// A detector's model could not be loaded
    #[error("Model loading error: {0}")]
    ModelLoading(String),

    /// Unsupported or corrupt document
    #[error("Document processing error: {0}")]
    DocumentProcessing(String),

    /// Reconstruction target escapes its designated scope
    #[error("Security error: {0}")]
    Security(String),

    /// Job was cancelled before completion
    #[error("Job cancelled")]
    Cancelled,

    /// A phase exceeded its time budget
    #[error("Timed out after {secs}s during {phase}")]
    Timeout { phase: String, secs: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable classification of an [`Error`], reported on failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Detection,
    Validation,
    ModelLoading,
    DocumentProcessing,
    Security,
    Cancelled,
    Timeout,
    Io,
    Serialization,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::Detection(_) => ErrorKind::Detection,
            Error::Validation(_) => ErrorKind::Validation,
            Error::ModelLoading(_) => ErrorKind::ModelLoading,
            Error::DocumentProcessing(_) => ErrorKind::DocumentProcessing,
            Error::Security(_) => ErrorKind::Security,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether the ensemble can keep going after this error from one detector.
    pub fn is_recoverable_in_ensemble(&self) -> bool {
        matches!(self, Error::Detection(_) | Error::ModelLoading(_))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::DocumentProcessing(format!("Corrupt container: {}", e))
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::DocumentProcessing(format!("Image codec failure: {}", e))
    }
}

/// Result type alias for Anonyma operations
pub type Result<T> = std::result::Result<T, Error>;
