//! Scheduled job execution through the pipeline.

use crate::Pipeline;
use async_trait::async_trait;
use socials_error::{
    CollaboratorError, CollaboratorErrorKind, CollaboratorResult, SocialsError, SocialsErrorKind,
};
use socials_scheduler::{JobDefinition, JobPayload, JobRunner};
use std::sync::Arc;
use tracing::{info, instrument};

/// Identifier that scheduled jobs are rate limited and audited under.
pub const SCHEDULER_IDENTIFIER: &str = "scheduler";

/// Runs job payloads through a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    pipeline: Arc<Pipeline>,
    identifier: String,
}

impl PipelineRunner {
    /// Run jobs as [`SCHEDULER_IDENTIFIER`].
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            identifier: SCHEDULER_IDENTIFIER.to_string(),
        }
    }

    /// Run jobs as `identifier`.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }
}

#[async_trait]
impl JobRunner for PipelineRunner {
    #[instrument(skip(self, job), fields(job_id = %job.id(), job_type = %job.job_type()))]
    async fn run(&self, job: &JobDefinition) -> CollaboratorResult<String> {
        let identifier = self.identifier.as_str();
        let outcome = match job.payload() {
            JobPayload::GenerateContent {
                prompt,
                style,
                theme,
            } => self
                .pipeline
                .generate_and_publish(identifier, prompt, style, theme.as_deref())
                .await
                .map(|outcome| outcome.summary()),
            JobPayload::PublishContent {
                image_path,
                caption,
            } => self
                .pipeline
                .publish_content(identifier, image_path, caption)
                .await
                .map(|post_id| format!("published {}", post_id)),
            JobPayload::ReviewContent { review_id } => self
                .pipeline
                .publish_reviewed(identifier, review_id)
                .await
                .map(|post_id| format!("published {}", post_id)),
            JobPayload::Maintenance => Ok(self.pipeline.maintenance()),
        };

        let summary = outcome.map_err(into_collaborator_error)?;
        info!(summary = %summary, "Job finished");
        Ok(summary)
    }
}

/// Collaborator errors pass through; gate refusals become `Rejected`.
pub fn into_collaborator_error(err: SocialsError) -> CollaboratorError {
    match err.kind() {
        SocialsErrorKind::Collaborator(e) => e.clone(),
        _ => CollaboratorError::new(CollaboratorErrorKind::Rejected(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socials_error::{ErrorCode, SecurityError, SecurityErrorKind};

    #[test]
    fn test_error_mapping() {
        let timeout: SocialsError = CollaboratorError::new(CollaboratorErrorKind::Timeout {
            operation: "Publishing".to_string(),
            secs: 30,
        })
        .into();
        assert_eq!(
            into_collaborator_error(timeout).kind().code(),
            ErrorCode::CollaboratorTimeout
        );

        let limited: SocialsError = SecurityError::new(SecurityErrorKind::RateLimitExceeded {
            limit_type: "api_generation".to_string(),
            retry_after_secs: 60,
        })
        .into();
        let mapped = into_collaborator_error(limited);
        assert!(matches!(mapped.kind(), CollaboratorErrorKind::Rejected(msg) if msg.contains("api_generation")));
    }
}
