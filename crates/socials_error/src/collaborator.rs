//! Errors raised by external collaborators (generators, publishers).

use crate::ErrorCode;

/// Kinds of collaborator failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum CollaboratorErrorKind {
    /// Content generation failed
    #[display("Content generation failed: {_0}")]
    Generation(String),
    /// Publishing failed
    #[display("Publishing failed: {_0}")]
    Publishing(String),
    /// Collaborator call exceeded its timeout
    #[display("{operation} timed out after {secs} seconds")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout in seconds
        secs: u64,
    },
    /// The request was refused before reaching the collaborator
    #[display("Request rejected: {_0}")]
    Rejected(String),
}

impl CollaboratorErrorKind {
    /// Closed error code used for error statistics.
    pub fn code(&self) -> ErrorCode {
        match self {
            CollaboratorErrorKind::Generation(_) => ErrorCode::GenerationFailed,
            CollaboratorErrorKind::Publishing(_) => ErrorCode::PublishingFailed,
            CollaboratorErrorKind::Timeout { .. } => ErrorCode::CollaboratorTimeout,
            CollaboratorErrorKind::Rejected(_) => ErrorCode::RequestRejected,
        }
    }
}

/// Collaborator error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Collaborator Error: {} at line {} in {}", kind, line, file)]
pub struct CollaboratorError {
    /// The kind of error that occurred
    pub kind: CollaboratorErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl CollaboratorError {
    /// Create a new collaborator error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: CollaboratorErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &CollaboratorErrorKind {
        &self.kind
    }
}

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;
