//! Closed error classification and per-process error counters.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Coarse error category used for reporting and log routing.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing or malformed settings
    Configuration,
    /// Content generation collaborator
    ContentGeneration,
    /// Publishing collaborator
    Publishing,
    /// Job scheduling
    Scheduling,
    /// Input validation and moderation
    Validation,
    /// Rate limiting
    RateLimit,
    /// Encryption and decryption
    Encryption,
    /// Audit trail
    Audit,
    /// Human review workflow
    Review,
    /// Anything else
    System,
}

/// Every error kind the workspace can produce.
///
/// Pairs each component failure with its category so statistics keep the
/// same granularity as `category:kind` strings without free-form keys.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    /// Settings failed to load or validate
    Configuration,
    /// Input rejected by a validation rule
    ValidationFailed,
    /// Generated text rejected by moderation
    ContentRejected,
    /// Identifier exceeded a rate limit
    RateLimitExceeded,
    /// Encryption failed
    EncryptionFailed,
    /// Decryption failed
    DecryptionFailed,
    /// Audit sink write failed
    AuditWriteFailed,
    /// Security component misconfigured
    SecurityConfiguration,
    /// Review missing, expired, rejected or pending
    ReviewDenied,
    /// Malformed trigger
    InvalidTrigger,
    /// Unknown job id
    JobNotFound,
    /// Job store failure
    JobPersistence,
    /// Scheduler started or stopped twice
    SchedulerState,
    /// Generator failure
    GenerationFailed,
    /// Publisher failure
    PublishingFailed,
    /// Collaborator call timed out
    CollaboratorTimeout,
    /// Request refused by the gate before any collaborator call
    RequestRejected,
}

impl ErrorCode {
    /// Category this code reports under.
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::Configuration => ErrorCategory::Configuration,
            ErrorCode::ValidationFailed | ErrorCode::ContentRejected => ErrorCategory::Validation,
            ErrorCode::RateLimitExceeded => ErrorCategory::RateLimit,
            ErrorCode::EncryptionFailed | ErrorCode::DecryptionFailed => ErrorCategory::Encryption,
            ErrorCode::AuditWriteFailed => ErrorCategory::Audit,
            ErrorCode::SecurityConfiguration => ErrorCategory::Configuration,
            ErrorCode::ReviewDenied => ErrorCategory::Review,
            ErrorCode::InvalidTrigger
            | ErrorCode::JobNotFound
            | ErrorCode::JobPersistence
            | ErrorCode::SchedulerState => ErrorCategory::Scheduling,
            ErrorCode::GenerationFailed => ErrorCategory::ContentGeneration,
            ErrorCode::PublishingFailed => ErrorCategory::Publishing,
            ErrorCode::CollaboratorTimeout | ErrorCode::RequestRejected => ErrorCategory::System,
        }
    }

    /// Report key in `category:code` form.
    pub fn report_key(self) -> String {
        format!("{}:{}", self.category(), self)
    }
}

/// Thread-safe error counters keyed by [`ErrorCode`].
#[derive(Debug, Default)]
pub struct ErrorTracker {
    counts: Mutex<HashMap<ErrorCode, u64>>,
}

impl ErrorTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `code`.
    pub fn record(&self, code: ErrorCode) {
        *self.counts.lock().entry(code).or_insert(0) += 1;
    }

    /// Occurrences of `code` so far.
    pub fn count(&self, code: ErrorCode) -> u64 {
        self.counts.lock().get(&code).copied().unwrap_or(0)
    }

    /// Occurrences per category.
    pub fn by_category(&self) -> BTreeMap<ErrorCategory, u64> {
        let mut out = BTreeMap::new();
        for (code, count) in self.counts.lock().iter() {
            *out.entry(code.category()).or_insert(0) += count;
        }
        out
    }

    /// Snapshot keyed by `category:code`.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .lock()
            .iter()
            .map(|(code, count)| (code.report_key(), *count))
            .collect()
    }
}
