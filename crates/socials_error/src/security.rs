//! Security error types for request gating.

use crate::ErrorCode;

/// Kinds of security errors.
///
/// Messages never contain the rejected input or any decrypted material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum SecurityErrorKind {
    /// Input failed a validation rule
    #[display("Validation failed for {field}: {reason}")]
    Validation {
        /// Field or argument that failed
        field: String,
        /// Human-readable reason
        reason: String,
    },
    /// Validation requested against a rule that is not registered
    #[display("Unknown validation rule: {_0}")]
    UnknownRule(String),
    /// Rate limit exceeded for an identifier
    #[display("Rate limit exceeded for {limit_type}, retry after {retry_after_secs} seconds")]
    RateLimitExceeded {
        /// Limit type that rejected the request
        limit_type: String,
        /// Seconds until the caller may retry
        retry_after_secs: u64,
    },
    /// Content moderation rejected generated text
    #[display("Content rejected by moderation: {_0}")]
    ContentRejected(String),
    /// Encryption failed
    #[display("Encryption failed: {_0}")]
    Encryption(String),
    /// Decryption failed (wrong key or malformed ciphertext)
    #[display("Decryption failed: {_0}")]
    Decryption(String),
    /// Audit sink could not be written
    #[display("Audit write failed: {_0}")]
    AuditWrite(String),
    /// Security component misconfigured
    #[display("Security configuration error: {_0}")]
    Configuration(String),
    /// Review not found
    #[display("Review '{_0}' not found")]
    ReviewNotFound(String),
    /// Review has expired and can no longer be decided
    #[display("Review '{_0}' has expired")]
    ReviewExpired(String),
    /// Reviewer rejected the draft
    #[display("Review '{review_id}' was rejected: {reason}")]
    ReviewRejected {
        /// Review identifier
        review_id: String,
        /// Reason given by the reviewer
        reason: String,
    },
    /// Review was already approved, rejected or modified
    #[display("Review '{_0}' was already decided")]
    ReviewAlreadyDecided(String),
    /// Approved draft was already published or is being published
    #[display("Review '{_0}' was already published")]
    ReviewAlreadyPublished(String),
    /// Draft still awaits a human decision
    #[display("Review '{_0}' is pending approval")]
    ApprovalRequired(String),
}

impl SecurityErrorKind {
    /// Closed error code used for error statistics.
    pub fn code(&self) -> ErrorCode {
        match self {
            SecurityErrorKind::Validation { .. } | SecurityErrorKind::UnknownRule(_) => {
                ErrorCode::ValidationFailed
            }
            SecurityErrorKind::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            SecurityErrorKind::ContentRejected(_) => ErrorCode::ContentRejected,
            SecurityErrorKind::Encryption(_) => ErrorCode::EncryptionFailed,
            SecurityErrorKind::Decryption(_) => ErrorCode::DecryptionFailed,
            SecurityErrorKind::AuditWrite(_) => ErrorCode::AuditWriteFailed,
            SecurityErrorKind::Configuration(_) => ErrorCode::SecurityConfiguration,
            SecurityErrorKind::ReviewNotFound(_)
            | SecurityErrorKind::ReviewExpired(_)
            | SecurityErrorKind::ReviewRejected { .. }
            | SecurityErrorKind::ReviewAlreadyDecided(_)
            | SecurityErrorKind::ReviewAlreadyPublished(_)
            | SecurityErrorKind::ApprovalRequired(_) => ErrorCode::ReviewDenied,
        }
    }
}

/// Security error with location tracking.
///
/// # Examples
///
/// ```
/// use socials_error::{SecurityError, SecurityErrorKind};
///
/// let err = SecurityError::new(SecurityErrorKind::UnknownRule("zip".to_string()));
/// assert!(format!("{}", err).contains("Unknown validation rule"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Security Error: {} at line {} in {}", kind, line, file)]
pub struct SecurityError {
    /// The kind of error that occurred
    pub kind: SecurityErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl SecurityError {
    /// Create a new security error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: SecurityErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &SecurityErrorKind {
        &self.kind
    }

    /// Seconds to wait before retrying, for rate-limit rejections.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match &self.kind {
            SecurityErrorKind::RateLimitExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Result type for security operations.
pub type SecurityResult<T> = Result<T, SecurityError>;
