//! Scheduling error types.

use crate::ErrorCode;

/// Kinds of scheduling errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum SchedulingErrorKind {
    /// Trigger definition is malformed
    #[display("Invalid trigger: {_0}")]
    InvalidTrigger(String),
    /// No job with this identifier
    #[display("Job not found: {_0}")]
    JobNotFound(String),
    /// Job store could not be read or written
    #[display("Job persistence failed: {_0}")]
    Persistence(String),
    /// Scheduler loop already started
    #[display("Scheduler is already running")]
    AlreadyRunning,
    /// Scheduler loop not started
    #[display("Scheduler is not running")]
    NotRunning,
}

impl SchedulingErrorKind {
    /// Closed error code used for error statistics.
    pub fn code(&self) -> ErrorCode {
        match self {
            SchedulingErrorKind::InvalidTrigger(_) => ErrorCode::InvalidTrigger,
            SchedulingErrorKind::JobNotFound(_) => ErrorCode::JobNotFound,
            SchedulingErrorKind::Persistence(_) => ErrorCode::JobPersistence,
            SchedulingErrorKind::AlreadyRunning | SchedulingErrorKind::NotRunning => {
                ErrorCode::SchedulerState
            }
        }
    }
}

/// Scheduling error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Scheduling Error: {} at line {} in {}", kind, line, file)]
pub struct SchedulingError {
    /// The kind of error that occurred
    pub kind: SchedulingErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl SchedulingError {
    /// Create a new scheduling error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: SchedulingErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &SchedulingErrorKind {
        &self.kind
    }
}

/// Result type for scheduling operations.
pub type SchedulingResult<T> = Result<T, SchedulingError>;
