//! Human review of generated drafts before publishing.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use socials_error::{SecurityError, SecurityErrorKind, SecurityResult};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, instrument, warn};

/// Hours a draft stays open for review.
pub const REVIEW_TTL_HOURS: i64 = 24;
/// Decided reviews kept in history.
pub const HISTORY_LIMIT: usize = 1000;

/// Review decision state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReviewStatus {
    /// Awaiting a decision
    Pending,
    /// Approved as submitted
    Approved,
    /// Rejected
    Rejected,
    /// Approved with an edited caption
    Modified,
    /// Approved draft handed to the publisher
    Publishing,
    /// Approved draft posted
    Published,
}

/// Draft content submitted for review.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Default,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
    derive_new::new,
)]
#[setters(prefix = "with_")]
pub struct ReviewDraft {
    /// Kind of content, such as `instagram_post`
    #[setters(into)]
    content_type: String,
    /// Generated image path
    #[serde(default)]
    #[new(default)]
    #[setters(strip_option, into)]
    image_path: Option<String>,
    /// Generated caption
    #[serde(default)]
    #[new(default)]
    #[setters(strip_option, into)]
    caption: Option<String>,
    /// Prompt that produced the draft
    #[serde(default)]
    #[new(default)]
    #[setters(strip_option, into)]
    prompt: Option<String>,
    /// Free-form context
    #[serde(default)]
    #[new(default)]
    metadata: Map<String, Value>,
}

/// A draft and its review state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_getters::Getters)]
pub struct PendingReview {
    /// Review identifier
    id: String,
    /// Submitted content
    draft: ReviewDraft,
    /// Submission time
    created_at: DateTime<Utc>,
    /// Time after which the draft can no longer be decided
    expires_at: DateTime<Utc>,
    /// Decision state
    status: ReviewStatus,
    /// Reviewer who decided
    decided_by: Option<String>,
    /// Reason given with the decision
    decision_reason: Option<String>,
    /// Decision time
    reviewed_at: Option<DateTime<Utc>>,
    /// Caption supplied by a modification
    edited_caption: Option<String>,
    /// Post identifier once published
    #[serde(default)]
    post_id: Option<String>,
}

impl PendingReview {
    /// Whether the review window has closed.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Caption to publish: the edited caption if any, else the draft's.
    pub fn final_caption(&self) -> Option<&str> {
        self.edited_caption
            .as_deref()
            .or(self.draft.caption.as_deref())
    }
}

/// One decided review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_getters::Getters)]
pub struct ReviewHistoryEntry {
    /// Review identifier
    review_id: String,
    /// Kind of content
    content_type: String,
    /// Decision
    status: ReviewStatus,
    /// Submission time
    created_at: DateTime<Utc>,
    /// Decision time
    reviewed_at: DateTime<Utc>,
    /// Reviewer
    decided_by: String,
}

/// Review counts and rates. Rates are percentages of processed reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_getters::Getters)]
pub struct ReviewStats {
    /// Reviews currently held
    total_reviews: usize,
    /// Reviews awaiting a decision
    pending_reviews: usize,
    /// Approved in history
    approved_count: usize,
    /// Rejected in history
    rejected_count: usize,
    /// Modified in history
    modified_count: usize,
    /// Decisions in history
    total_processed: usize,
    /// Approved share, percent
    approval_rate: f64,
    /// Rejected share, percent
    rejection_rate: f64,
    /// Modified share, percent
    modification_rate: f64,
    /// Mean minutes from submission to decision
    avg_review_minutes: f64,
    /// Decisions made today (UTC)
    reviews_today: usize,
}

/// Review workflow manager.
#[derive(Debug)]
pub struct ReviewQueue {
    reviews: Mutex<HashMap<String, PendingReview>>,
    history: Mutex<VecDeque<ReviewHistoryEntry>>,
    ttl: TimeDelta,
}

impl ReviewQueue {
    /// Create a queue with the default 24 hour review window.
    pub fn new() -> Self {
        Self::with_ttl(TimeDelta::hours(REVIEW_TTL_HOURS))
    }

    /// Create a queue with a custom review window.
    pub fn with_ttl(ttl: TimeDelta) -> Self {
        Self {
            reviews: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            ttl,
        }
    }

    /// Submit a draft and return its review id.
    #[instrument(skip(self, draft), fields(content_type = %draft.content_type))]
    pub fn submit(&self, draft: ReviewDraft) -> String {
        let id = format!("review_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let now = Utc::now();
        let review = PendingReview {
            id: id.clone(),
            draft,
            created_at: now,
            expires_at: now + self.ttl,
            status: ReviewStatus::Pending,
            decided_by: None,
            decision_reason: None,
            reviewed_at: None,
            edited_caption: None,
            post_id: None,
        };
        info!(review_id = %id, "Draft submitted for review");
        self.reviews.lock().insert(id.clone(), review);
        id
    }

    /// Get a review by id.
    pub fn get(&self, id: &str) -> Option<PendingReview> {
        self.reviews.lock().get(id).cloned()
    }

    fn decide(
        &self,
        id: &str,
        decided_by: &str,
        status: ReviewStatus,
        reason: Option<String>,
        edited_caption: Option<String>,
    ) -> SecurityResult<()> {
        let mut reviews = self.reviews.lock();
        let review = reviews.get_mut(id).ok_or_else(|| {
            SecurityError::new(SecurityErrorKind::ReviewNotFound(id.to_string()))
        })?;

        if review.status != ReviewStatus::Pending {
            return Err(SecurityError::new(SecurityErrorKind::ReviewAlreadyDecided(
                id.to_string(),
            )));
        }
        if review.is_expired() {
            debug!("Review has expired");
            return Err(SecurityError::new(SecurityErrorKind::ReviewExpired(
                id.to_string(),
            )));
        }

        let now = Utc::now();
        review.status = status;
        review.decided_by = Some(decided_by.to_string());
        review.decision_reason = reason;
        review.reviewed_at = Some(now);
        if edited_caption.is_some() {
            review.edited_caption = edited_caption;
        }

        let entry = ReviewHistoryEntry {
            review_id: review.id.clone(),
            content_type: review.draft.content_type.clone(),
            status,
            created_at: review.created_at,
            reviewed_at: now,
            decided_by: decided_by.to_string(),
        };
        drop(reviews);

        let mut history = self.history.lock();
        history.push_back(entry);
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
        info!(review_id = id, %status, decided_by, "Review decided");
        Ok(())
    }

    /// Approve a pending draft.
    #[instrument(skip(self))]
    pub fn approve(&self, id: &str, decided_by: &str, reason: Option<String>) -> SecurityResult<()> {
        self.decide(id, decided_by, ReviewStatus::Approved, reason, None)
    }

    /// Reject a pending draft.
    #[instrument(skip(self))]
    pub fn reject(&self, id: &str, decided_by: &str, reason: Option<String>) -> SecurityResult<()> {
        self.decide(id, decided_by, ReviewStatus::Rejected, reason, None)
    }

    /// Approve a pending draft with a replacement caption.
    #[instrument(skip(self, new_caption))]
    pub fn modify(&self, id: &str, decided_by: &str, new_caption: &str) -> SecurityResult<()> {
        self.decide(
            id,
            decided_by,
            ReviewStatus::Modified,
            Some("Caption modified".to_string()),
            Some(new_caption.to_string()),
        )
    }

    /// Return the review if it may be published.
    ///
    /// Approved and modified drafts pass. Rejected, expired, pending and
    /// already published drafts return an error.
    #[instrument(skip(self))]
    pub fn check(&self, id: &str) -> SecurityResult<PendingReview> {
        let reviews = self.reviews.lock();
        let review = reviews.get(id).ok_or_else(|| {
            SecurityError::new(SecurityErrorKind::ReviewNotFound(id.to_string()))
        })?;
        publishable(review)?;
        Ok(review.clone())
    }

    /// Check the review and mark it as publishing, so one approval yields
    /// at most one post. Follow with [`ReviewQueue::mark_published`] or
    /// [`ReviewQueue::release`].
    #[instrument(skip(self))]
    pub fn claim_for_publishing(&self, id: &str) -> SecurityResult<PendingReview> {
        let mut reviews = self.reviews.lock();
        let review = reviews.get_mut(id).ok_or_else(|| {
            SecurityError::new(SecurityErrorKind::ReviewNotFound(id.to_string()))
        })?;
        publishable(review)?;
        review.status = ReviewStatus::Publishing;
        debug!("Review claimed for publishing");
        Ok(review.clone())
    }

    /// Record the post created from a claimed review.
    #[instrument(skip(self))]
    pub fn mark_published(&self, id: &str, post_id: &str) {
        let mut reviews = self.reviews.lock();
        match reviews.get_mut(id) {
            Some(review) => {
                review.status = ReviewStatus::Published;
                review.post_id = Some(post_id.to_string());
                info!("Reviewed draft published");
            }
            None => warn!("Published review is no longer held"),
        }
    }

    /// Return a claimed review to its approved state after a failed publish.
    #[instrument(skip(self))]
    pub fn release(&self, id: &str) {
        let mut reviews = self.reviews.lock();
        if let Some(review) = reviews.get_mut(id)
            && review.status == ReviewStatus::Publishing
        {
            review.status = if review.edited_caption.is_some() {
                ReviewStatus::Modified
            } else {
                ReviewStatus::Approved
            };
            debug!("Review released after failed publish");
        }
    }

    /// Open drafts awaiting a decision, oldest first.
    pub fn pending(&self) -> Vec<PendingReview> {
        let mut pending: Vec<PendingReview> = self
            .reviews
            .lock()
            .values()
            .filter(|r| r.status == ReviewStatus::Pending && !r.is_expired())
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Most recent decisions, newest first.
    pub fn history(&self, limit: usize) -> Vec<ReviewHistoryEntry> {
        self.history.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Counts and rates over held reviews and history.
    pub fn stats(&self) -> ReviewStats {
        let (total_reviews, pending_reviews) = {
            let reviews = self.reviews.lock();
            let pending = reviews
                .values()
                .filter(|r| r.status == ReviewStatus::Pending)
                .count();
            (reviews.len(), pending)
        };

        let history = self.history.lock();
        let count = |status| history.iter().filter(|h| h.status == status).count();
        let approved = count(ReviewStatus::Approved);
        let rejected = count(ReviewStatus::Rejected);
        let modified = count(ReviewStatus::Modified);
        let total = history.len();
        let rate = |n: usize| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64 * 100.0
            }
        };
        let avg_review_minutes = if total == 0 {
            0.0
        } else {
            history
                .iter()
                .map(|h| (h.reviewed_at - h.created_at).num_milliseconds() as f64 / 60_000.0)
                .sum::<f64>()
                / total as f64
        };
        let today = Utc::now().date_naive();
        let reviews_today = history
            .iter()
            .filter(|h| h.reviewed_at.date_naive() == today)
            .count();

        ReviewStats {
            total_reviews,
            pending_reviews,
            approved_count: approved,
            rejected_count: rejected,
            modified_count: modified,
            total_processed: total,
            approval_rate: rate(approved),
            rejection_rate: rate(rejected),
            modification_rate: rate(modified),
            avg_review_minutes,
            reviews_today,
        }
    }

    /// Drop reviews whose window has closed. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut reviews = self.reviews.lock();
        let before = reviews.len();
        reviews.retain(|_, review| !review.is_expired());
        let removed = before - reviews.len();
        if removed > 0 {
            debug!(removed, "Cleaned up expired reviews");
        }
        removed
    }
}

impl Default for ReviewQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn publishable(review: &PendingReview) -> SecurityResult<()> {
    let id = review.id.clone();
    match review.status {
        ReviewStatus::Approved | ReviewStatus::Modified => Ok(()),
        ReviewStatus::Publishing | ReviewStatus::Published => Err(SecurityError::new(
            SecurityErrorKind::ReviewAlreadyPublished(id),
        )),
        ReviewStatus::Rejected => Err(SecurityError::new(SecurityErrorKind::ReviewRejected {
            review_id: id,
            reason: review
                .decision_reason
                .clone()
                .unwrap_or_else(|| "Rejected by reviewer".to_string()),
        })),
        ReviewStatus::Pending if review.is_expired() => Err(SecurityError::new(
            SecurityErrorKind::ReviewExpired(id),
        )),
        ReviewStatus::Pending => Err(SecurityError::new(SecurityErrorKind::ApprovalRequired(id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ReviewDraft {
        ReviewDraft::new("instagram_post".to_string())
            .with_image_path("out/sunset.png")
            .with_caption("Golden hour")
    }

    #[test]
    fn test_submit_and_approve() {
        let queue = ReviewQueue::new();
        let id = queue.submit(draft());
        assert!(id.starts_with("review_"));
        assert_eq!(id.len(), "review_".len() + 8);

        let err = queue.check(&id).unwrap_err();
        assert!(matches!(err.kind(), SecurityErrorKind::ApprovalRequired(_)));

        queue.approve(&id, "alice", None).unwrap();
        let review = queue.check(&id).unwrap();
        assert_eq!(review.final_caption(), Some("Golden hour"));
        assert_eq!(review.decided_by().as_deref(), Some("alice"));
    }

    #[test]
    fn test_modify_replaces_caption() {
        let queue = ReviewQueue::new();
        let id = queue.submit(draft());
        queue.modify(&id, "bob", "Blue hour").unwrap();
        let review = queue.check(&id).unwrap();
        assert_eq!(*review.status(), ReviewStatus::Modified);
        assert_eq!(review.final_caption(), Some("Blue hour"));
    }

    #[test]
    fn test_approval_is_consumed_by_publishing() {
        let queue = ReviewQueue::new();
        let id = queue.submit(draft());
        queue.modify(&id, "bob", "Blue hour").unwrap();

        let claimed = queue.claim_for_publishing(&id).unwrap();
        assert_eq!(claimed.final_caption(), Some("Blue hour"));
        let busy = queue.claim_for_publishing(&id).unwrap_err();
        assert!(matches!(busy.kind(), SecurityErrorKind::ReviewAlreadyPublished(_)));

        // A failed publish hands the approval back
        queue.release(&id);
        assert_eq!(*queue.get(&id).unwrap().status(), ReviewStatus::Modified);

        queue.claim_for_publishing(&id).unwrap();
        queue.mark_published(&id, "post_1");
        let review = queue.get(&id).unwrap();
        assert_eq!(*review.status(), ReviewStatus::Published);
        assert_eq!(review.post_id().as_deref(), Some("post_1"));

        let err = queue.check(&id).unwrap_err();
        assert!(matches!(err.kind(), SecurityErrorKind::ReviewAlreadyPublished(_)));
        queue.release(&id);
        assert_eq!(*queue.get(&id).unwrap().status(), ReviewStatus::Published);
    }

    #[test]
    fn test_reject_carries_reason() {
        let queue = ReviewQueue::new();
        let id = queue.submit(draft());
        queue
            .reject(&id, "carol", Some("Off brand".to_string()))
            .unwrap();
        let err = queue.check(&id).unwrap_err();
        assert!(matches!(
            err.kind(),
            SecurityErrorKind::ReviewRejected { reason, .. } if reason == "Off brand"
        ));
        let again = queue.approve(&id, "carol", None).unwrap_err();
        assert!(matches!(again.kind(), SecurityErrorKind::ReviewAlreadyDecided(_)));
    }

    #[test]
    fn test_expired_cannot_be_decided() {
        let queue = ReviewQueue::with_ttl(TimeDelta::seconds(-1));
        let id = queue.submit(draft());
        let err = queue.approve(&id, "dave", None).unwrap_err();
        assert!(matches!(err.kind(), SecurityErrorKind::ReviewExpired(_)));
        assert!(queue.pending().is_empty());
        assert_eq!(queue.cleanup_expired(), 1);
        assert!(queue.get(&id).is_none());
    }

    #[test]
    fn test_unknown_review() {
        let queue = ReviewQueue::new();
        let err = queue.check("review_missing").unwrap_err();
        assert!(matches!(err.kind(), SecurityErrorKind::ReviewNotFound(_)));
    }

    #[test]
    fn test_stats_and_history() {
        let queue = ReviewQueue::new();
        let a = queue.submit(draft());
        let b = queue.submit(draft());
        let c = queue.submit(draft());
        let _pending = queue.submit(draft());
        queue.approve(&a, "eve", None).unwrap();
        queue.approve(&b, "eve", None).unwrap();
        queue.reject(&c, "eve", None).unwrap();

        let stats = queue.stats();
        assert_eq!(*stats.total_reviews(), 4);
        assert_eq!(*stats.pending_reviews(), 1);
        assert_eq!(*stats.total_processed(), 3);
        assert_eq!(*stats.reviews_today(), 3);
        assert!((stats.approval_rate() - 200.0 / 3.0).abs() < 1e-9);
        assert!((stats.rejection_rate() - 100.0 / 3.0).abs() < 1e-9);

        let history = queue.history(2);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].review_id(), &c);
        assert_eq!(queue.pending().len(), 1);
    }
}
