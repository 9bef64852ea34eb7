//! Job execution for applications that supply the collaborators.
//!
//! The `socials` binary has no generator or publisher of its own, so it only
//! edits the job table. An application embedding this crate builds a
//! [`Pipeline`] over its collaborators and hands it to [`serve`].

use crate::{ContentGenerator, Pipeline, PipelineRunner, Publisher, SocialsConfig};
use socials_error::{ConfigError, SocialsResult};
use socials_scheduler::{ContentScheduler, JsonFileJobStore, SchedulerStatus};
use socials_security::ReviewQueue;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument};

/// Pipeline over `generator` and `publisher` with the configured security
/// gate, timeouts and content limits. Drafts are held for review when
/// `security.require_review` is set.
pub fn build_pipeline(
    config: &SocialsConfig,
    generator: Arc<dyn ContentGenerator>,
    publisher: Arc<dyn Publisher>,
) -> SocialsResult<Pipeline> {
    let mut pipeline = Pipeline::new(config.security_context()?, generator, publisher)
        .with_collaborator_settings(config.collaborators().clone())
        .with_content_settings(config.content().clone());
    if *config.security().require_review() {
        pipeline = pipeline.with_review_queue(Arc::new(ReviewQueue::new()));
    }
    Ok(pipeline)
}

/// Run the persisted jobs through `pipeline` until `shutdown` resolves.
///
/// Loads the job table from `scheduling.jobs_file`, starts the scheduler,
/// and on shutdown waits for runs in flight. Returns the final statistics.
#[instrument(skip_all, fields(jobs_file = %config.scheduling().jobs_file().display()))]
pub async fn serve(
    config: &SocialsConfig,
    pipeline: Arc<Pipeline>,
    shutdown: impl Future<Output = ()>,
) -> SocialsResult<SchedulerStatus> {
    if !*config.scheduling().enabled() {
        return Err(ConfigError::for_key(
            "scheduling.enabled",
            "Scheduling is disabled; set scheduling.enabled = true to run jobs",
        )
        .into());
    }

    let scheduler = ContentScheduler::new(
        config.scheduling().engine().clone(),
        Arc::new(JsonFileJobStore::new(config.scheduling().jobs_file())),
        Arc::new(PipelineRunner::new(pipeline)),
    );
    let loaded = scheduler.recover().await?;
    scheduler.start()?;
    info!(loaded, "Serving scheduled jobs");

    shutdown.await;
    scheduler.stop(true).await?;
    let status = scheduler.status();
    info!(
        executions = status.total_executions(),
        errors = status.total_errors(),
        "Stopped serving scheduled jobs"
    );
    Ok(status)
}
