/*!
Error types for the package engine.
*/

use thiserror::Error;

use crate::dispatch::{DispatchError, FailureKind};

/// Result type used throughout the package engine.
pub type Result<T> = std::result::Result<T, PackageError>;

/// Errors that can occur during package import/export operations.
#[derive(Error, Debug)]
pub enum PackageError {
    /// Malformed or missing required input (wrong extension, multi-file
    /// upload, missing descriptor, empty schema/data section)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A referenced application or entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Archive open/write failure, download failure, downstream persistence
    /// failure, or an unresolved storage service
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip container errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// A fatal failure from the service dispatch collaborator
    #[error("Dispatch to service '{service}' failed: {source}")]
    Dispatch {
        service: String,
        #[source]
        source: DispatchError,
    },
}

impl PackageError {
    /// Create a new bad request error
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a new archive error
    pub fn archive<S: Into<String>>(msg: S) -> Self {
        Self::Archive(msg.into())
    }

    /// Dispatch failure classification, when this error wraps one
    pub fn classification(&self) -> Option<FailureKind> {
        match self {
            Self::Dispatch { source, .. } => Some(source.kind),
            _ => None,
        }
    }
}
