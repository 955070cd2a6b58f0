//! Error types for docchat.
//!
//! Library code returns [`Error`]; the worker turns every failure into a
//! single `error` event tagged with its [`ErrorKind`].

use serde::Serialize;
use thiserror::Error;

/// Main error type for index, cache and pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A document or its index is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A document's text could not be read.
    #[error("could not extract text from '{document}': {message}")]
    Extraction { document: String, message: String },

    /// The embedding or language-model endpoint failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Index storage could not be written or removed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration or input.
    #[error("config error: {0}")]
    Config(String),
}

/// Taxonomy tag carried by task error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ExtractionFailure,
    ProviderFailure,
    StorageFailure,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Extraction { .. } => ErrorKind::ExtractionFailure,
            Error::Provider(_) => ErrorKind::ProviderFailure,
            Error::Storage(_) => ErrorKind::StorageFailure,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn extraction(document: &str, message: impl Into<String>) -> Self {
        Error::Extraction {
            document: document.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ExtractionFailure => "ExtractionFailure",
            ErrorKind::ProviderFailure => "ProviderFailure",
            ErrorKind::StorageFailure => "StorageFailure",
            ErrorKind::Config => "Config",
        };
        f.write_str(s)
    }
}

/// Result type alias for docchat operations.
pub type Result<T> = std::result::Result<T, Error>;
