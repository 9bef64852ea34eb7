//! Error types for the socials content pipeline.
//!
//! Each component owns a `*ErrorKind` enum wrapped in a location-tracking
//! error struct. [`SocialsError`] unifies them for application code, and
//! every kind maps onto a closed [`ErrorCode`] for statistics.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod collaborator;
mod config;
mod scheduling;
mod security;
mod tracker;

pub use collaborator::{CollaboratorError, CollaboratorErrorKind, CollaboratorResult};
pub use config::ConfigError;
pub use scheduling::{SchedulingError, SchedulingErrorKind, SchedulingResult};
pub use security::{SecurityError, SecurityErrorKind, SecurityResult};
pub use tracker::{ErrorCategory, ErrorCode, ErrorTracker};

/// Crate-level error variants.
#[derive(Debug, derive_more::From)]
pub enum SocialsErrorKind {
    /// Configuration error
    Config(ConfigError),
    /// Validation, rate limiting, encryption, audit or review error
    Security(SecurityError),
    /// Scheduler error
    Scheduling(SchedulingError),
    /// Generator or publisher error
    Collaborator(CollaboratorError),
}

impl SocialsErrorKind {
    /// Closed error code for statistics.
    pub fn code(&self) -> ErrorCode {
        match self {
            SocialsErrorKind::Config(_) => ErrorCode::Configuration,
            SocialsErrorKind::Security(e) => e.kind.code(),
            SocialsErrorKind::Scheduling(e) => e.kind.code(),
            SocialsErrorKind::Collaborator(e) => e.kind.code(),
        }
    }
}

impl std::fmt::Display for SocialsErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocialsErrorKind::Config(e) => write!(f, "{}", e),
            SocialsErrorKind::Security(e) => write!(f, "{}", e),
            SocialsErrorKind::Scheduling(e) => write!(f, "{}", e),
            SocialsErrorKind::Collaborator(e) => write!(f, "{}", e),
        }
    }
}

/// Socials error with kind discrimination.
#[derive(Debug)]
pub struct SocialsError(Box<SocialsErrorKind>);

impl SocialsError {
    /// Create a new error from a kind.
    pub fn new(kind: SocialsErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &SocialsErrorKind {
        &self.0
    }

    /// Closed error code for statistics.
    pub fn code(&self) -> ErrorCode {
        self.0.code()
    }
}

impl std::fmt::Display for SocialsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Socials Error: {}", self.0)
    }
}

impl std::error::Error for SocialsError {}

// Generic From implementation for any type that converts to SocialsErrorKind
impl<T> From<T> for SocialsError
where
    T: Into<SocialsErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for socials operations.
pub type SocialsResult<T> = Result<T, SocialsError>;
