//! Job management command handlers.

use super::JobsCommand;
use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use socials::SocialsConfig;
use socials_error::{CollaboratorError, CollaboratorErrorKind, CollaboratorResult};
use socials_scheduler::{
    ContentScheduler, JobDefinition, JobPayload, JobRecord, JobRunner, JsonFileJobStore, Trigger,
};
use std::sync::Arc;
use tracing::{info, instrument};

/// Runner for a scheduler that only edits the job table. Jobs run in the
/// application that owns the collaborators, through `socials::serve`.
struct TableOnlyRunner;

#[async_trait]
impl JobRunner for TableOnlyRunner {
    async fn run(&self, job: &JobDefinition) -> CollaboratorResult<String> {
        Err(CollaboratorError::new(CollaboratorErrorKind::Rejected(
            format!("Job {} cannot run from the command line", job.id()),
        )))
    }
}

async fn open_scheduler(config: &SocialsConfig) -> anyhow::Result<ContentScheduler> {
    let store = JsonFileJobStore::new(config.scheduling().jobs_file());
    let scheduler = ContentScheduler::new(
        config.scheduling().engine().clone(),
        Arc::new(store),
        Arc::new(TableOnlyRunner),
    );
    let loaded = scheduler.recover().await?;
    info!(loaded, "Opened job table");
    Ok(scheduler)
}

fn job_row(record: &JobRecord) -> serde_json::Value {
    json!({
        "id": record.id(),
        "type": record.job_type().to_string(),
        "trigger": record.definition().trigger().to_string(),
        "status": record.status().to_string(),
        "paused": record.paused(),
        "next_run": record.next_run(),
        "last_run": record.last_run(),
        "run_count": record.run_count(),
        "error_count": record.error_count(),
        "last_error": record.last_error(),
    })
}

/// Handles the jobs subcommands.
#[instrument(skip(config))]
pub async fn handle_jobs_command(
    config: &SocialsConfig,
    command: JobsCommand,
) -> anyhow::Result<()> {
    let scheduler = open_scheduler(config).await?;

    match command {
        JobsCommand::List { job_type } => {
            let rows: Vec<_> = scheduler.list_jobs(job_type).iter().map(job_row).collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        JobsCommand::Remove { id } => {
            if !scheduler.remove_job(&id).await? {
                bail!("Job '{}' not found", id);
            }
            println!("Removed {}", id);
        }
        JobsCommand::Pause { id } => {
            scheduler.pause_job(&id).await?;
            println!("Paused {}", id);
        }
        JobsCommand::Resume { id } => {
            scheduler.resume_job(&id).await?;
            println!("Resumed {}", id);
        }
        JobsCommand::AddGeneration {
            prompt,
            interval_hours,
            cron,
            style,
            theme,
        } => {
            let security = config.security_context()?;
            let mut fields = vec![("prompt", prompt.as_str(), "prompt")];
            if let Some(theme) = &theme {
                fields.push(("theme", theme.as_str(), "prompt"));
            }
            security.validate_inputs(&fields)?;

            let style = style.unwrap_or_else(|| config.content().default_style().clone());
            let trigger = match cron {
                Some(expression) => Trigger::cron(expression),
                None => Trigger::every_hours(
                    interval_hours.unwrap_or(*config.scheduling().interval_hours()),
                ),
            };
            let payload = JobPayload::GenerateContent {
                prompt,
                style,
                theme,
            };
            let id = scheduler
                .add_job(JobDefinition::new(payload, trigger))
                .await?;
            println!("{}", id);
        }
        JobsCommand::AddPublish {
            image_path,
            caption,
            at,
        } => {
            if at <= Utc::now() {
                bail!("Publish time {} is in the past", at);
            }
            let id = scheduler
                .schedule_instagram_publishing(image_path, caption, at)
                .await?;
            println!("{}", id);
        }
        JobsCommand::History { limit } => {
            let mut ran: Vec<JobRecord> = scheduler
                .list_jobs(None)
                .into_iter()
                .filter(|record| record.last_run().is_some())
                .collect();
            ran.sort_by(|a, b| b.last_run().cmp(a.last_run()));
            let rows: Vec<_> = ran.iter().take(limit).map(job_row).collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}
