//! Error types for deltapager
//!
//! This module defines the error taxonomy used by the enumeration engine,
//! along with the classifiers that route a fetch failure to a reset, a
//! fallback, or an abort.

use std::path::PathBuf;
use thiserror::Error;

/// Error message returned by the service when a query cannot be served
/// incrementally.
pub const DELTA_TOKEN_NOT_SUPPORTED: &str =
    "Parameter 'DeltaToken' not supported for this request";

/// Service error codes meaning the previous delta token can no longer be used.
const INVALID_DELTA_CODES: [&str; 3] = ["SyncStateNotFound", "ResyncRequired", "SyncStateInvalid"];

/// Main error type for enumeration operations
#[derive(Error, Debug)]
pub enum PagerError {
    /// Error response returned by the remote service
    #[error("service error (status {status:?}, code '{code}'): {message}")]
    Service {
        status: Option<u16>,
        code: String,
        message: String,
    },

    /// Transport-level failure while fetching a page
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The previous delta token is stale or expired
    #[error("invalid previous delta token")]
    InvalidDelta,

    /// The endpoint cannot serve this query incrementally
    #[error("delta queries not supported")]
    DeltaNotSupported,

    /// The caller's context was cancelled
    #[error("enumeration cancelled while {0}")]
    Cancelled(String),

    /// An item does not provide the getters a classification strategy needs
    #[error("item of type '{item_type}' does not provide {missing}")]
    Classification {
        item_type: &'static str,
        missing: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error while reading configuration or fixtures
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed configuration or fixture document
    #[error("parse error: {0}")]
    Parse(String),

    /// The producer task panicked or was aborted
    #[error("enumeration task failed: {0}")]
    TaskFailed(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PagerError>,
    },
}

impl PagerError {
    /// Create a service error from an OData-style response
    pub fn service(
        status: Option<u16>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Service {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a fetch error
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch(message.into())
    }

    /// Create a cancellation error describing what was interrupted
    pub fn cancelled(during: impl Into<String>) -> Self {
        Self::Cancelled(during.into())
    }

    /// Create a classification capability error for item type `T`
    pub fn classification<T>(missing: impl Into<String>) -> Self {
        Self::Classification {
            item_type: std::any::type_name::<T>(),
            missing: missing.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &PagerError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error is recoverable inside the engine, either by a
    /// delta reset or by falling back to a full enumeration
    pub fn is_recoverable(&self) -> bool {
        is_err_invalid_delta(self) || is_err_delta_not_supported(self)
    }

    /// Check if this error stems from cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled(_))
    }
}

/// Result type alias for enumeration operations
pub type Result<T> = std::result::Result<T, PagerError>;

impl From<std::io::Error> for PagerError {
    fn from(err: std::io::Error) -> Self {
        PagerError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for PagerError {
    fn from(err: serde_json::Error) -> Self {
        PagerError::Parse(err.to_string())
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    /// Wrap the error, if any, with a context message
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

/// Check whether the error says the previous delta token is stale, expired,
/// or otherwise unusable
pub fn is_err_invalid_delta(err: &PagerError) -> bool {
    match err.root() {
        PagerError::InvalidDelta => true,
        PagerError::Service { code, .. } => INVALID_DELTA_CODES
            .iter()
            .any(|c| c.eq_ignore_ascii_case(code)),
        _ => false,
    }
}

/// Check whether the error says the endpoint cannot answer delta queries
pub fn is_err_delta_not_supported(err: &PagerError) -> bool {
    match err.root() {
        PagerError::DeltaNotSupported => true,
        PagerError::Service { message, .. } => message
            .to_lowercase()
            .contains(&DELTA_TOKEN_NOT_SUPPORTED.to_lowercase()),
        _ => false,
    }
}
