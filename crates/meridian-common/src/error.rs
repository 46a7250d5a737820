//! Error types for Meridian
//!
//! One taxonomy is shared by every component so the HTTP layer can map any
//! failure to a stable machine-readable kind and status code. Validation and
//! authorization errors are raised before any cluster mutation; cluster
//! errors arrive through [`ResourceError`] and are folded in via `From`.

use thiserror::Error;

use crate::resources::ResourceError;

/// Main error type for Meridian operations
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input; never touches cluster state
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid bearer credential
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Caller may not act on the requested tenant namespace
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Requested model or published model does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists or changed underneath us
    #[error("conflict: {0}")]
    Conflict(String),

    /// Model is not ready to serve or has no external URL yet
    #[error("model not ready: {0}")]
    ModelNotReady(String),

    /// The model server answered with a non-2xx status
    #[error("backend returned status {status}")]
    Backend {
        /// Status code returned by the model server
        status: u16,
        /// Raw response body returned by the model server
        body: String,
    },

    /// The model server could not be reached (DNS, connect, timeout)
    #[error("proxy error: {0}")]
    Proxy(String),

    /// The cluster API is transiently unavailable; safe for the caller to retry
    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(String),

    /// Rollback of a multi-step orchestration did not complete
    #[error("partial failure: {message} (resources needing reconciliation: {})", resources.join(", "))]
    PartialFailure {
        /// What failed in the first place
        message: String,
        /// Resources that may remain and need manual reconciliation
        resources: Vec<String>,
    },

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a forbidden error with the given message
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Machine-readable kind reported to API clients
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::ModelNotReady(_) => "ModelNotReady",
            Self::Backend { .. } => "BackendError",
            Self::Proxy(_) => "ProxyError",
            Self::ClusterUnavailable(_) => "ClusterUnavailable",
            Self::PartialFailure { .. } => "PartialFailure",
            Self::Internal(_) => "Internal",
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::ModelNotReady(_) => 400,
            Self::Unauthenticated(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Backend { .. } | Self::Proxy(_) => 502,
            Self::ClusterUnavailable(_) => 503,
            Self::PartialFailure { .. } | Self::Internal(_) => 500,
        }
    }
}

impl From<ResourceError> for Error {
    fn from(e: ResourceError) -> Self {
        match e {
            ResourceError::NotFound { .. } => Error::NotFound(e.to_string()),
            ResourceError::AlreadyExists { .. } | ResourceError::Conflict { .. } => {
                Error::Conflict(e.to_string())
            }
            ResourceError::Invalid { .. } => Error::Validation(e.to_string()),
            ResourceError::Denied { .. } => Error::Internal(e.to_string()),
            ResourceError::Unavailable(_) => Error::ClusterUnavailable(e.to_string()),
        }
    }
}
