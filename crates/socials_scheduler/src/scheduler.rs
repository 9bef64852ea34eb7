//! The content scheduler.

use crate::{JobDefinition, JobPayload, JobRecord, JobRunner, JobStatus, JobStore, JobType, Trigger};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use socials_error::{
    CollaboratorError, CollaboratorErrorKind, CollaboratorResult, SchedulingError,
    SchedulingErrorKind, SchedulingResult,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

/// Scheduler tuning.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
)]
#[setters(prefix = "with_")]
pub struct SchedulerConfig {
    /// Seconds between checks for due jobs
    #[serde(default = "default_tick_interval")]
    tick_interval_secs: u64,
    /// Seconds a run may start late before it is recorded as missed
    #[serde(default = "default_misfire_grace")]
    misfire_grace_secs: u64,
    /// Retry jobs created after consecutive failures
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    /// Seconds a single run may take
    #[serde(default = "default_job_timeout")]
    job_timeout_secs: u64,
    /// Runs executing at once
    #[serde(default = "default_max_concurrent_jobs")]
    max_concurrent_jobs: usize,
    /// History entries kept
    #[serde(default = "default_history_limit")]
    history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            misfire_grace_secs: default_misfire_grace(),
            max_retries: default_max_retries(),
            job_timeout_secs: default_job_timeout(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_tick_interval() -> u64 {
    1
}

fn default_misfire_grace() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_job_timeout() -> u64 {
    600
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_history_limit() -> usize {
    1000
}

/// Delay before retry `attempt`: `min(60 * 2^attempt, 3600)` seconds.
pub fn retry_delay(attempt: u32) -> Duration {
    let secs = 2u64
        .checked_pow(attempt)
        .and_then(|factor| factor.checked_mul(60))
        .map_or(3600, |secs| secs.min(3600));
    Duration::from_secs(secs)
}

/// One recorded run, skipped run or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct JobHistoryEntry {
    /// Job identifier
    job_id: String,
    /// Job type
    job_type: JobType,
    /// Outcome
    status: JobStatus,
    /// When the run started, or when the miss was detected
    executed_at: DateTime<Utc>,
    /// Run duration in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    /// Runner summary on success
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    /// Error message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Scheduler statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct SchedulerStatus {
    /// Whether the background loop is running
    running: bool,
    /// Registered jobs
    total_jobs: usize,
    /// Jobs with a future run that are not paused
    active_jobs: usize,
    /// Paused jobs
    paused_jobs: usize,
    /// Jobs whose last run failed
    failed_jobs: usize,
    /// Jobs whose last run succeeded
    completed_jobs: usize,
    /// Successful runs across all jobs
    total_executions: u64,
    /// Failed runs across all jobs
    total_errors: u64,
    /// History entries kept
    history_entries: usize,
}

#[derive(Debug, Default)]
struct SchedulerState {
    jobs: BTreeMap<String, JobRecord>,
    history: VecDeque<JobHistoryEntry>,
}

impl SchedulerState {
    fn push_history(&mut self, entry: JobHistoryEntry, limit: usize) {
        self.history.push_back(entry);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    store: Arc<dyn JobStore>,
    runner: Arc<dyn JobRunner>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    persist_lock: tokio::sync::Mutex<()>,
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

/// Runs persisted jobs on cron, interval and one-time triggers.
///
/// The background loop keeps ticking while jobs run, up to
/// `max_concurrent_jobs` at once. At most one run of a job is in flight at a
/// time, and a firing that falls due during that run moves to when it ends.
/// Missed firings coalesce into a single run, and a run that starts more
/// than the misfire grace late is recorded as missed instead. A failed run schedules a one-shot
/// retry job `<id>_retry_<n>` until `max_retries` consecutive failures.
/// Every change to the job table is written to the [`JobStore`].
pub struct ContentScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for ContentScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentScheduler")
            .field("config", &self.shared.config)
            .field("jobs", &self.shared.state.lock().jobs.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ContentScheduler {
    /// Create a stopped scheduler with an empty job table.
    ///
    /// Call [`ContentScheduler::recover`] to load persisted jobs.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                store,
                runner,
                config,
                permits,
                persist_lock: tokio::sync::Mutex::new(()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Load persisted jobs, keeping any already registered under the same id.
    ///
    /// Jobs interrupted mid-run are reset to pending. Returns the number of
    /// jobs loaded.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> SchedulingResult<usize> {
        let records = self.shared.store.load().await?;
        let loaded = {
            let mut state = self.shared.state.lock();
            let mut loaded = 0;
            for mut record in records {
                record.reset_interrupted();
                let id = record.id().to_string();
                if !state.jobs.contains_key(&id) {
                    state.jobs.insert(id, record);
                    loaded += 1;
                }
            }
            loaded
        };
        info!(loaded, "Recovered persisted jobs");
        Ok(loaded)
    }

    /// Register a job, replacing any job with the same id. Returns the id.
    #[instrument(skip(self, definition), fields(job_id = %definition.id(), trigger = %definition.trigger()))]
    pub async fn add_job(&self, definition: JobDefinition) -> SchedulingResult<String> {
        definition.trigger().validate()?;
        let id = definition.id().to_string();
        let job_type = definition.job_type();
        let record = JobRecord::new(definition, Utc::now());
        let next_run = *record.next_run();
        {
            let mut state = self.shared.state.lock();
            if state.jobs.insert(id.clone(), record).is_some() {
                debug!("Replacing existing job");
            }
        }
        self.shared.persist().await?;
        info!(%job_type, next_run = ?next_run, "Job scheduled");
        Ok(id)
    }

    /// Remove a job. Returns whether it existed.
    #[instrument(skip(self))]
    pub async fn remove_job(&self, job_id: &str) -> SchedulingResult<bool> {
        let removed = self.shared.state.lock().jobs.remove(job_id).is_some();
        if removed {
            self.shared.persist().await?;
            info!("Job removed");
        } else {
            warn!("No job to remove");
        }
        Ok(removed)
    }

    /// Stop a job from firing until resumed.
    #[instrument(skip(self))]
    pub async fn pause_job(&self, job_id: &str) -> SchedulingResult<()> {
        self.update_job(job_id, |record, _| record.set_paused(true))?;
        self.shared.persist().await?;
        info!("Job paused");
        Ok(())
    }

    /// Resume a paused job. Recurring jobs restart from the next firing
    /// after now.
    #[instrument(skip(self))]
    pub async fn resume_job(&self, job_id: &str) -> SchedulingResult<()> {
        self.update_job(job_id, |record, now| {
            record.set_paused(false);
            let trigger = record.definition().trigger().clone();
            if trigger.is_recurring() {
                record.set_next_run(trigger.next_execution(now));
            }
        })?;
        self.shared.persist().await?;
        info!("Job resumed");
        Ok(())
    }

    fn update_job(
        &self,
        job_id: &str,
        update: impl FnOnce(&mut JobRecord, DateTime<Utc>),
    ) -> SchedulingResult<()> {
        let mut state = self.shared.state.lock();
        let record = state.jobs.get_mut(job_id).ok_or_else(|| {
            SchedulingError::new(SchedulingErrorKind::JobNotFound(job_id.to_string()))
        })?;
        update(record, Utc::now());
        Ok(())
    }

    /// A job and its run state.
    pub fn job_info(&self, job_id: &str) -> Option<JobRecord> {
        self.shared.state.lock().jobs.get(job_id).cloned()
    }

    /// All jobs, optionally of one type, ordered by id.
    pub fn list_jobs(&self, job_type: Option<JobType>) -> Vec<JobRecord> {
        self.shared
            .state
            .lock()
            .jobs
            .values()
            .filter(|record| job_type.is_none_or(|t| record.job_type() == t))
            .cloned()
            .collect()
    }

    /// The most recent `limit` history entries, oldest first.
    pub fn history(&self, limit: usize) -> Vec<JobHistoryEntry> {
        let state = self.shared.state.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Scheduler statistics.
    pub fn status(&self) -> SchedulerStatus {
        let running = self.is_running();
        let state = self.shared.state.lock();
        let count = |status: JobStatus| {
            state
                .jobs
                .values()
                .filter(|record| *record.status() == status)
                .count()
        };
        SchedulerStatus {
            running,
            total_jobs: state.jobs.len(),
            active_jobs: state
                .jobs
                .values()
                .filter(|record| !record.paused() && record.next_run().is_some())
                .count(),
            paused_jobs: state.jobs.values().filter(|record| *record.paused()).count(),
            failed_jobs: count(JobStatus::Failed),
            completed_jobs: count(JobStatus::Completed),
            total_executions: state.jobs.values().map(|record| *record.run_count()).sum(),
            total_errors: state.jobs.values().map(|record| *record.error_count()).sum(),
            history_entries: state.history.len(),
        }
    }

    /// Run every job due at `now` and wait for the runs to finish.
    ///
    /// Returns the history entries recorded by this pass.
    pub async fn run_pending(&self, now: DateTime<Utc>) -> SchedulingResult<Vec<JobHistoryEntry>> {
        self.shared.run_pending(now).await
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Start the background loop. Must be called inside a tokio runtime.
    #[instrument(skip(self))]
    pub fn start(&self) -> SchedulingResult<()> {
        let mut worker = self.worker.lock();
        if worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
        {
            warn!("Scheduler is already running");
            return Err(SchedulingError::new(SchedulingErrorKind::AlreadyRunning));
        }

        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let shared = self.shared.clone();
        let tick = Duration::from_secs(self.shared.config.tick_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut runs = JoinSet::new();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = shared.dispatch_due(&mut runs, Utc::now()).await {
                            error!(error = %e, "Scheduler tick failed");
                        }
                    }
                    Some(joined) = runs.join_next(), if !runs.is_empty() => {
                        if let Err(e) = joined {
                            error!(error = %e, "Job task ended abnormally");
                        }
                    }
                    _ = signal.notified() => {
                        debug!("Shutdown signal received");
                        break;
                    }
                }
            }
            if !runs.is_empty() {
                info!(in_flight = runs.len(), "Waiting for running jobs");
            }
            while let Some(joined) = runs.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Job task ended abnormally");
                }
            }
        });

        *worker = Some(Worker { handle, shutdown });
        info!(tick_secs = tick.as_secs(), "Scheduler started");
        Ok(())
    }

    /// Stop the background loop. Runs already started finish either way;
    /// with `wait`, returns once they have.
    #[instrument(skip(self))]
    pub async fn stop(&self, wait: bool) -> SchedulingResult<()> {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            warn!("Scheduler is not running");
            return Err(SchedulingError::new(SchedulingErrorKind::NotRunning));
        };
        worker.shutdown.notify_one();
        if wait && let Err(e) = worker.handle.await {
            error!(error = %e, "Scheduler loop ended abnormally");
        }
        info!("Scheduler stopped");
        Ok(())
    }

    /// Generate content from `prompt` every `interval_hours`.
    pub async fn schedule_content_generation(
        &self,
        prompt: impl Into<String>,
        interval_hours: u64,
        style: impl Into<String>,
        theme: Option<String>,
    ) -> SchedulingResult<String> {
        let payload = JobPayload::GenerateContent {
            prompt: prompt.into(),
            style: style.into(),
            theme,
        };
        self.add_job(JobDefinition::new(payload, Trigger::every_hours(interval_hours)))
            .await
    }

    /// Publish `image_path` with `caption` once at `publish_time`.
    pub async fn schedule_instagram_publishing(
        &self,
        image_path: impl Into<String>,
        caption: impl Into<String>,
        publish_time: DateTime<Utc>,
    ) -> SchedulingResult<String> {
        let payload = JobPayload::PublishContent {
            image_path: image_path.into(),
            caption: caption.into(),
        };
        self.add_job(JobDefinition::new(payload, Trigger::once(publish_time)))
            .await
    }
}

impl Drop for ContentScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.handle.abort();
        }
    }
}

impl Shared {
    /// Write the job table. Snapshots are taken under `persist_lock`, so a
    /// later snapshot is never overwritten by an earlier one.
    async fn persist(&self) -> SchedulingResult<()> {
        let _guard = self.persist_lock.lock().await;
        let records: Vec<JobRecord> = self.state.lock().jobs.values().cloned().collect();
        self.store.save(&records).await
    }

    /// Claim every job due at `now`. Runs more than the misfire grace late
    /// are recorded as missed; the rest are marked running and returned.
    fn claim_due(&self, now: DateTime<Utc>) -> (Vec<JobHistoryEntry>, Vec<JobDefinition>) {
        let grace = i64::try_from(self.config.misfire_grace_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);

        let mut state = self.state.lock();
        let mut missed = Vec::new();
        let mut due = Vec::new();
        for record in state.jobs.values_mut() {
            if !record.is_due(now) {
                continue;
            }
            let scheduled = record.next_run().unwrap_or(now);
            let next = record.definition().trigger().next_execution(now);
            record.set_next_run(next);

            if now - scheduled > grace {
                warn!(
                    job_id = record.id(),
                    scheduled = %scheduled,
                    "Run missed its grace period"
                );
                record.mark_missed();
                missed.push(JobHistoryEntry {
                    job_id: record.id().to_string(),
                    job_type: record.job_type(),
                    status: JobStatus::Missed,
                    executed_at: now,
                    duration_ms: None,
                    output: None,
                    error: None,
                });
            } else {
                record.mark_running(now);
                due.push(record.definition().clone());
            }
        }
        for entry in &missed {
            state.push_history(entry.clone(), self.config.history_limit);
        }
        (missed, due)
    }

    /// Run every job due at `now` and wait for those runs.
    #[instrument(skip(self))]
    async fn run_pending(
        self: &Arc<Self>,
        now: DateTime<Utc>,
    ) -> SchedulingResult<Vec<JobHistoryEntry>> {
        let (mut entries, due) = self.claim_due(now);
        if due.is_empty() && entries.is_empty() {
            return Ok(entries);
        }
        debug!(due = due.len(), missed = entries.len(), "Dispatching due jobs");

        let handles: Vec<JoinHandle<JobHistoryEntry>> = due
            .into_iter()
            .map(|definition| tokio::spawn(self.clone().execute(definition, now)))
            .collect();
        for handle in handles {
            match handle.await {
                Ok(entry) => entries.push(entry),
                Err(e) => error!(error = %e, "Job task ended abnormally"),
            }
        }

        self.persist().await?;
        Ok(entries)
    }

    /// Start every job due at `now` in `runs` without waiting for them.
    async fn dispatch_due(
        self: &Arc<Self>,
        runs: &mut JoinSet<JobHistoryEntry>,
        now: DateTime<Utc>,
    ) -> SchedulingResult<()> {
        let (missed, due) = self.claim_due(now);
        if !due.is_empty() {
            debug!(due = due.len(), in_flight = runs.len(), "Dispatching due jobs");
        }
        for definition in due {
            runs.spawn(self.clone().execute(definition, now));
        }
        if !missed.is_empty() {
            self.persist().await?;
        }
        Ok(())
    }

    /// Run one claimed job under a concurrency permit and the job timeout,
    /// then record the outcome and write the job table.
    async fn execute(self: Arc<Self>, definition: JobDefinition, now: DateTime<Utc>) -> JobHistoryEntry {
        let _permit = self.permits.clone().acquire_owned().await.ok();
        let timeout = Duration::from_secs(self.config.job_timeout_secs);
        let runner = self.runner.clone();
        let job = definition.clone();
        let started = Instant::now();

        // Separate task so a panicking runner still records a failure
        let run = tokio::spawn(async move {
            match tokio::time::timeout(timeout, runner.run(&job)).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::new(CollaboratorErrorKind::Timeout {
                    operation: format!("Job {}", job.id()),
                    secs: timeout.as_secs(),
                })),
            }
        });
        let result = match run.await {
            Ok(result) => result,
            Err(e) => Err(CollaboratorError::new(CollaboratorErrorKind::Rejected(format!(
                "Job task aborted: {}",
                e
            )))),
        };

        let entry = self.finish(&definition, result, started.elapsed(), now);
        if let Err(e) = self.persist().await {
            error!(job_id = definition.id(), error = %e, "Failed to persist job table");
        }
        entry
    }

    fn finish(
        &self,
        definition: &JobDefinition,
        result: CollaboratorResult<String>,
        elapsed: Duration,
        now: DateTime<Utc>,
    ) -> JobHistoryEntry {
        let job_id = definition.id().to_string();
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut state = self.state.lock();

        let (status, output, error) = match result {
            Ok(output) => {
                info!(job_id = %job_id, duration_ms, "Job completed");
                let parent_id = state.jobs.get_mut(&job_id).and_then(|record| {
                    record.mark_completed();
                    record.retry_of().clone()
                });
                if let Some(parent_id) = parent_id
                    && let Some(parent) = state.jobs.get_mut(&parent_id)
                {
                    parent.absorb_retry_success();
                }
                (JobStatus::Completed, Some(output), None)
            }
            Err(e) => {
                let message = e.kind().to_string();
                error!(job_id = %job_id, error = %message, "Job failed");
                let retry_of = state.jobs.get_mut(&job_id).map(|record| {
                    record.mark_failed(message.clone());
                    record.retry_of().clone()
                });
                if let Some(retry_of) = retry_of {
                    let failed_retry = retry_of.is_some();
                    let owner = retry_of.unwrap_or_else(|| job_id.clone());
                    self.schedule_retry(&mut state, &owner, failed_retry, &message, now);
                }
                (JobStatus::Failed, None, Some(message))
            }
        };

        let finished_at = now + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::zero());
        if let Some(record) = state.jobs.get_mut(&job_id) {
            record.defer_overrun(finished_at);
        }

        let entry = JobHistoryEntry {
            job_id,
            job_type: definition.job_type(),
            status,
            executed_at: now,
            duration_ms: Some(duration_ms),
            output,
            error,
        };
        state.push_history(entry.clone(), self.config.history_limit);
        entry
    }

    /// Schedule the next retry of `owner` after a failure. Failures of a
    /// retry job count against the job it retries.
    fn schedule_retry(
        &self,
        state: &mut SchedulerState,
        owner: &str,
        failed_retry: bool,
        message: &str,
        now: DateTime<Utc>,
    ) {
        let Some(parent) = state.jobs.get_mut(owner) else {
            debug!(job_id = owner, "Retried job no longer exists");
            return;
        };
        if failed_retry {
            parent.absorb_retry_failure(message.to_string());
        }
        let attempt = *parent.consecutive_failures();
        if attempt > self.config.max_retries {
            error!(
                job_id = owner,
                max_retries = self.config.max_retries,
                total_errors = parent.error_count(),
                "Job exceeded maximum retries"
            );
            return;
        }

        let delay = retry_delay(attempt);
        let at = now + TimeDelta::from_std(delay).unwrap_or(TimeDelta::hours(1));
        let retry = JobRecord::retry(parent, attempt, at, now);
        info!(
            job_id = owner,
            retry_id = retry.id(),
            retry_attempt = attempt,
            retry_at = %at,
            "Scheduling retry"
        );
        state.jobs.insert(retry.id().to_string(), retry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_capped() {
        assert_eq!(retry_delay(0), Duration::from_secs(60));
        assert_eq!(retry_delay(1), Duration::from_secs(120));
        assert_eq!(retry_delay(3), Duration::from_secs(480));
        assert_eq!(retry_delay(6), Duration::from_secs(3600));
        assert_eq!(retry_delay(200), Duration::from_secs(3600));
    }

    #[test]
    fn test_config_defaults() {
        let config: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(*config.misfire_grace_secs(), 300);
        assert_eq!(*config.max_retries(), 3);
        assert_eq!(*config.history_limit(), 1000);
    }

    #[test]
    fn test_history_is_capped() {
        let mut state = SchedulerState::default();
        for i in 0..5 {
            state.push_history(
                JobHistoryEntry {
                    job_id: format!("job_{}", i),
                    job_type: JobType::Maintenance,
                    status: JobStatus::Completed,
                    executed_at: Utc::now(),
                    duration_ms: None,
                    output: None,
                    error: None,
                },
                3,
            );
        }
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history[0].job_id, "job_2");
    }
}
