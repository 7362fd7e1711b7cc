/*!
Service dispatch collaborator interface.

The dispatch layer routes a verb + service + resource + payload tuple to its
handler elsewhere in the platform. The engine only depends on this trait and
on the failure classification it returns; it never inspects transport-level
status codes.
*/

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Request verbs understood by the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a dispatch failure.
///
/// Sub-importers switch on this classification to decide whether a failure
/// aborts the whole import or is tolerated and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The target service or resource does not exist
    NotFound,
    /// The target already exists (duplicate schema, duplicate record)
    Conflict,
    /// The target service exists but failed to process the request
    Internal,
    /// The request was refused for any other reason
    Rejected,
}

impl FailureKind {
    /// Whether this failure aborts an import.
    ///
    /// Missing targets and hard failures are fatal; everything else
    /// (already-exists and the like) is tolerated.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::NotFound | FailureKind::Internal)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::NotFound => "not-found",
            FailureKind::Conflict => "conflict",
            FailureKind::Internal => "internal",
            FailureKind::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// A classified failure returned by the dispatch collaborator.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct DispatchError {
    pub kind: FailureKind,
    pub message: String,
}

impl DispatchError {
    pub fn new<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::new(FailureKind::Conflict, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self::new(FailureKind::Rejected, message)
    }
}

/// Abstract "submit a request to a named service/resource" capability.
///
/// Schema and data sub-imports go through this trait; the engine never talks
/// to the target services directly.
pub trait ServiceDispatch {
    fn dispatch(
        &self,
        verb: Verb,
        service: &str,
        resource: &str,
        payload: Value,
    ) -> std::result::Result<Value, DispatchError>;
}
