//! Security layer for the socials content pipeline.
//!
//! Every request that reaches a content generator or publisher passes
//! through these components first.
//!
//! # Components
//!
//! 1. **Validation** - named rules, sanitization and injection screening
//! 2. **Rate limiting** - sliding windows per identifier with burst caps and blocks
//! 3. **Moderation** - keyword scoring of captions and hashtags
//! 4. **Review** - human approval of drafts before publishing
//! 5. **Encryption** - AES-256-GCM for stored secrets, PBKDF2 hashing
//!
//! Every rejection is written to an append-only audit trail.
//! [`SecurityContext`] bundles the shared components.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod audit;
mod context;
mod encryption;
mod moderation;
mod rate_limit;
mod review;
mod validation;

pub use audit::{AuditEvent, AuditLogger, AuditSink, JsonLinesSink, MemorySink, RiskLevel};
pub use context::SecurityContext;
pub use encryption::{DerivedKey, EncryptionManager, HashedData, PBKDF2_ITERATIONS};
pub use moderation::{ContentModerator, ModerationResult, UNSAFE_THRESHOLD, WARNING_THRESHOLD};
pub use rate_limit::{
    MAX_DURATION_SECS, RateLimitConfig, RateLimitDecision, RateLimitStats, RateLimiter,
    default_limits,
};
pub use review::{
    HISTORY_LIMIT, PendingReview, REVIEW_TTL_HOURS, ReviewDraft, ReviewHistoryEntry,
    ReviewQueue, ReviewStats, ReviewStatus,
};
pub use validation::{FieldValidation, InputValidator, ValidationOutcome, ValidationRule};
