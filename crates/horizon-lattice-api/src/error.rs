//! Error types for the API client pipeline.
//!
//! Every pipeline stage returns [`Result`]; nothing is swallowed on the way to
//! the caller. The variants follow the stage that produced them, so a caller can
//! tell a request that never left the process from one the server rejected.

use std::path::PathBuf;

use bytes::Bytes;

/// Boxed error produced by an external collaborator (decoder, custom validator).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A specialized Result type for API client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Why multipart body construction failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingFailure {
    /// A part could not be serialized (unreadable file, invalid mime type).
    Part {
        /// The form key of the offending part.
        key: String,
        /// Human readable description.
        message: String,
    },
    /// The scratch directory or the encoded body file could not be written.
    Storage {
        /// The path that failed.
        path: PathBuf,
        /// Human readable description.
        message: String,
    },
}

impl std::fmt::Display for EncodingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Part { key, message } => write!(f, "part '{key}': {message}"),
            Self::Storage { path, message } => {
                write!(f, "storage at '{}': {message}", path.display())
            }
        }
    }
}

/// Errors produced by the request pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The endpoint could not be resolved to a URL.
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    /// The endpoint parameters (headers, body) could not be encoded.
    #[error("Malformed parameters: {0}")]
    MalformedParameters(String),

    /// Multipart body construction or the temp-file write failed.
    #[error("Multipart encoding failed: {reason}")]
    MultipartEncodingFailed {
        /// Which class of failure occurred.
        reason: EncodingFailure,
    },

    /// The transport succeeded but returned no usable status/body pair.
    #[error("Malformed response")]
    MalformedResponse,

    /// The server answered with a status outside `200..300`.
    #[error("HTTP {status}")]
    FailureStatusCode {
        /// The HTTP status code.
        status: u16,
        /// The raw response body, kept for diagnostics.
        body: Bytes,
    },

    /// The response body could not be decoded into the expected type.
    #[error("Malformed JSON response: {0}")]
    MalformedJsonResponse(#[source] BoxError),

    /// The caller or a validator cancelled the operation.
    #[error("Request was cancelled")]
    RequestCanceled,

    /// The request timed out in the transport.
    #[error("Request timed out")]
    Timeout,

    /// Connection refused or failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The worker queue is stopped or cannot take the task.
    #[error("Worker queue unavailable: {0}")]
    WorkerUnavailable(String),

    /// Unclassified transport failure.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Coarse classification of an [`ApiError`] for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request could not be built; no network I/O happened.
    Request,
    /// The multipart body could not be produced.
    Encoding,
    /// The transport failed (connection, timeout, unknown).
    Transport,
    /// The server answered with a failure status.
    Status,
    /// The body could not be decoded.
    Decoding,
    /// The operation was cancelled.
    Cancelled,
}

impl ApiError {
    /// Shorthand for a [`ApiError::MultipartEncodingFailed`] caused by a part.
    pub fn part_failed(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MultipartEncodingFailed {
            reason: EncodingFailure::Part {
                key: key.into(),
                message: message.into(),
            },
        }
    }

    /// Shorthand for a [`ApiError::MultipartEncodingFailed`] caused by storage.
    pub fn storage_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MultipartEncodingFailed {
            reason: EncodingFailure::Storage {
                path: path.into(),
                message: message.into(),
            },
        }
    }

    /// Categorize the error for reporting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedUrl(_) | Self::MalformedParameters(_) => ErrorCategory::Request,
            Self::MultipartEncodingFailed { .. } => ErrorCategory::Encoding,
            Self::MalformedResponse
            | Self::Timeout
            | Self::Connection(_)
            | Self::WorkerUnavailable(_)
            | Self::Unknown(_) => ErrorCategory::Transport,
            Self::FailureStatusCode { .. } => ErrorCategory::Status,
            Self::MalformedJsonResponse(_) => ErrorCategory::Decoding,
            Self::RequestCanceled => ErrorCategory::Cancelled,
        }
    }

    /// The HTTP status carried by a [`ApiError::FailureStatusCode`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::FailureStatusCode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The response body carried by a [`ApiError::FailureStatusCode`].
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::FailureStatusCode { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Whether this is a `401 Unauthorized` failure.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Whether the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::RequestCanceled)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_builder() {
            Self::MalformedParameters(err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        Self::MalformedUrl(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for ApiError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::MalformedParameters(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for ApiError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::MalformedParameters(err.to_string())
    }
}
