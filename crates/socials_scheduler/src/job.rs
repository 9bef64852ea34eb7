//! Job definitions and their persisted state.

use crate::Trigger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of work a job performs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    /// Generate an image and caption
    ContentGeneration,
    /// Publish a post
    InstagramPublishing,
    /// Follow up on a human review
    ContentReview,
    /// Housekeeping
    Maintenance,
}

/// Outcome of the most recent run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for the next run
    Pending,
    /// Running now
    Running,
    /// Last run succeeded
    Completed,
    /// Last run failed
    Failed,
    /// Last run was skipped because it fired too late
    Missed,
}

/// What a job does when it fires.
///
/// Payloads are plain data so job definitions survive restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Generate content from a prompt
    GenerateContent {
        /// Image prompt
        prompt: String,
        /// Caption style
        style: String,
        /// Optional content theme
        #[serde(default, skip_serializing_if = "Option::is_none")]
        theme: Option<String>,
    },
    /// Publish an image with a caption
    PublishContent {
        /// Path of the image to publish
        image_path: String,
        /// Post caption
        caption: String,
    },
    /// Act on a review decision
    ReviewContent {
        /// Review identifier
        review_id: String,
    },
    /// Run housekeeping
    Maintenance,
}

impl JobPayload {
    /// Job type implied by the payload.
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::GenerateContent { .. } => JobType::ContentGeneration,
            JobPayload::PublishContent { .. } => JobType::InstagramPublishing,
            JobPayload::ReviewContent { .. } => JobType::ContentReview,
            JobPayload::Maintenance => JobType::Maintenance,
        }
    }
}

/// A job as registered with the scheduler.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
)]
#[setters(prefix = "with_")]
pub struct JobDefinition {
    /// Unique job identifier
    #[setters(into)]
    id: String,
    /// Firing rule
    trigger: Trigger,
    /// Work to perform
    #[setters(skip)]
    payload: JobPayload,
    /// Free-form context
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl JobDefinition {
    /// Create a definition with a generated `<type>_<8 hex>` identifier.
    pub fn new(payload: JobPayload, trigger: Trigger) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}_{}", payload.job_type(), &suffix[..8]),
            trigger,
            payload,
            metadata: Map::new(),
        }
    }

    /// Job type implied by the payload.
    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }
}

/// A job and its run state, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_getters::Getters)]
pub struct JobRecord {
    /// The registered definition
    definition: JobDefinition,
    /// Outcome of the most recent run
    status: JobStatus,
    /// Paused jobs are skipped until resumed
    #[serde(default)]
    paused: bool,
    /// Registration time
    created_at: DateTime<Utc>,
    /// Start of the most recent run
    #[serde(default)]
    last_run: Option<DateTime<Utc>>,
    /// Next firing time, `None` once exhausted
    #[serde(default)]
    next_run: Option<DateTime<Utc>>,
    /// Successful runs
    #[serde(default)]
    run_count: u64,
    /// Failed runs
    #[serde(default)]
    error_count: u64,
    /// Failures since the last success
    #[serde(default)]
    consecutive_failures: u32,
    /// Message of the most recent failure
    #[serde(default)]
    last_error: Option<String>,
    /// Job this one retries, if it is a retry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_of: Option<String>,
}

impl JobRecord {
    pub(crate) fn new(definition: JobDefinition, now: DateTime<Utc>) -> Self {
        let next_run = definition.trigger().first_run(now);
        Self {
            definition,
            status: JobStatus::Pending,
            paused: false,
            created_at: now,
            last_run: None,
            next_run,
            run_count: 0,
            error_count: 0,
            consecutive_failures: 0,
            last_error: None,
            retry_of: None,
        }
    }

    pub(crate) fn retry(parent: &JobRecord, attempt: u32, at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let definition = parent
            .definition
            .clone()
            .with_id(format!("{}_retry_{}", parent.id(), attempt))
            .with_trigger(Trigger::once(at));
        let mut record = Self::new(definition, now);
        record.retry_of = Some(parent.id().to_string());
        record
    }

    /// Job identifier.
    pub fn id(&self) -> &str {
        self.definition.id()
    }

    /// Job type.
    pub fn job_type(&self) -> JobType {
        self.definition.job_type()
    }

    pub(crate) fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.paused
            && self.status != JobStatus::Running
            && self.next_run.is_some_and(|next| next <= now)
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub(crate) fn set_next_run(&mut self, next_run: Option<DateTime<Utc>>) {
        self.next_run = next_run;
    }

    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.last_run = Some(now);
    }

    pub(crate) fn mark_missed(&mut self) {
        self.status = JobStatus::Missed;
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.run_count += 1;
        self.consecutive_failures = 0;
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.error_count += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error);
    }

    /// A firing that fell due while the job was running moves to
    /// `finished_at`, so the overrun is not judged a misfire.
    pub(crate) fn defer_overrun(&mut self, finished_at: DateTime<Utc>) {
        if self.next_run.is_some_and(|next| next < finished_at) {
            self.next_run = Some(finished_at);
        }
    }

    /// Recovered records cannot still be running.
    pub(crate) fn reset_interrupted(&mut self) {
        if self.status == JobStatus::Running {
            self.status = JobStatus::Pending;
        }
    }

    pub(crate) fn absorb_retry_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub(crate) fn absorb_retry_failure(&mut self, error: String) {
        self.error_count += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_uses_job_type() {
        let definition = JobDefinition::new(JobPayload::Maintenance, Trigger::interval(60));
        let (prefix, suffix) = definition.id().rsplit_once('_').unwrap();
        assert_eq!(prefix, "maintenance");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

        let custom = definition.with_id("nightly_cleanup");
        assert_eq!(custom.id(), "nightly_cleanup");
    }

    #[test]
    fn test_payload_serialization() {
        let payload = JobPayload::GenerateContent {
            prompt: "sunset".to_string(),
            style: "engaging".to_string(),
            theme: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "generate_content");
        assert!(json.get("theme").is_none());
        assert_eq!(payload.job_type(), JobType::ContentGeneration);
        assert_eq!(JobType::InstagramPublishing.to_string(), "instagram_publishing");
    }

    #[test]
    fn test_overrun_defers_next_firing() {
        let now = Utc::now();
        let definition = JobDefinition::new(JobPayload::Maintenance, Trigger::interval(60));
        let mut record = JobRecord::new(definition, now);
        let first = record.next_run().unwrap();

        record.defer_overrun(first - chrono::TimeDelta::seconds(1));
        assert_eq!(*record.next_run(), Some(first));

        let finished_at = first + chrono::TimeDelta::seconds(30);
        record.defer_overrun(finished_at);
        assert_eq!(*record.next_run(), Some(finished_at));
    }

    #[test]
    fn test_retry_record_is_one_shot() {
        let now = Utc::now();
        let definition = JobDefinition::new(
            JobPayload::PublishContent {
                image_path: "out/a.png".to_string(),
                caption: "hi".to_string(),
            },
            Trigger::interval(3600),
        )
        .with_id("publish");
        let parent = JobRecord::new(definition, now);
        let at = now + chrono::TimeDelta::seconds(120);
        let retry = JobRecord::retry(&parent, 1, at, now);

        assert_eq!(retry.id(), "publish_retry_1");
        assert_eq!(retry.retry_of().as_deref(), Some("publish"));
        assert_eq!(*retry.next_run(), Some(at));
        assert!(!retry.definition().trigger().is_recurring());
    }

    #[test]
    fn test_failure_counters() {
        let now = Utc::now();
        let mut record = JobRecord::new(
            JobDefinition::new(JobPayload::Maintenance, Trigger::interval(60)),
            now,
        );
        record.mark_failed("boom".to_string());
        record.mark_failed("boom".to_string());
        assert_eq!(*record.consecutive_failures(), 2);
        record.mark_completed();
        assert_eq!(*record.consecutive_failures(), 0);
        assert_eq!(*record.error_count(), 2);
        assert_eq!(*record.run_count(), 1);
    }
}
