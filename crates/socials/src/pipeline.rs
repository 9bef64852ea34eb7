//! Gated generation and publishing.
//!
//! Every operation runs the same sequence at the call site: validate the
//! untrusted arguments, consume a rate-limit slot, call the collaborator
//! under a timeout with retries, screen the result, and audit the outcome.

use crate::{
    CollaboratorSettings, ContentGenerator, ContentSettings, GeneratedContent, Publisher,
    extract_hashtags,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use socials_error::{
    CollaboratorError, CollaboratorErrorKind, CollaboratorResult, SecurityError,
    SecurityErrorKind, SocialsResult,
};
use socials_security::{ReviewDraft, ReviewQueue, RiskLevel, SecurityContext};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry2::strategy::{ExponentialBackoff, jitter};
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, info, instrument, warn};

/// Rate-limit type consumed by generation.
pub const GENERATION_LIMIT: &str = "api_generation";

/// Rate-limit type consumed by publishing.
pub const PUBLISHING_LIMIT: &str = "api_publishing";

/// Result of [`Pipeline::generate_and_publish`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Content was posted
    Published {
        /// Platform post identifier
        post_id: String,
        /// What was posted
        content: GeneratedContent,
    },
    /// Content awaits a reviewer
    PendingReview {
        /// Review identifier
        review_id: String,
        /// Draft held for review
        content: GeneratedContent,
    },
}

impl PublishOutcome {
    /// Short description for job history.
    pub fn summary(&self) -> String {
        match self {
            PublishOutcome::Published { post_id, .. } => format!("published {}", post_id),
            PublishOutcome::PendingReview { review_id, .. } => {
                format!("awaiting review {}", review_id)
            }
        }
    }
}

/// Composes the security gate with the generator and publisher.
#[derive(Clone)]
pub struct Pipeline {
    security: SecurityContext,
    generator: Arc<dyn ContentGenerator>,
    publisher: Arc<dyn Publisher>,
    reviews: Option<Arc<ReviewQueue>>,
    collaborators: CollaboratorSettings,
    content: ContentSettings,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("security", &self.security)
            .field("reviews", &self.reviews.is_some())
            .field("collaborators", &self.collaborators)
            .field("content", &self.content)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline with default timeouts and content limits.
    pub fn new(
        security: SecurityContext,
        generator: Arc<dyn ContentGenerator>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            security,
            generator,
            publisher,
            reviews: None,
            collaborators: CollaboratorSettings::default(),
            content: ContentSettings::default(),
        }
    }

    /// Use these timeouts and retries for collaborator calls.
    pub fn with_collaborator_settings(mut self, settings: CollaboratorSettings) -> Self {
        self.collaborators = settings;
        self
    }

    /// Use these content limits.
    pub fn with_content_settings(mut self, settings: ContentSettings) -> Self {
        self.content = settings;
        self
    }

    /// Hold generated drafts in `queue` instead of publishing them directly.
    pub fn with_review_queue(mut self, queue: Arc<ReviewQueue>) -> Self {
        self.reviews = Some(queue);
        self
    }

    /// Security components.
    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    /// Review queue, when drafts require approval.
    pub fn review_queue(&self) -> Option<&Arc<ReviewQueue>> {
        self.reviews.as_ref()
    }

    /// Generate an image and caption for `prompt` on behalf of `identifier`.
    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn generate_content(
        &self,
        identifier: &str,
        prompt: &str,
        style: &str,
        theme: Option<&str>,
    ) -> SocialsResult<GeneratedContent> {
        let mut fields = vec![
            ("identifier", identifier, "user_id"),
            ("prompt", prompt, "prompt"),
            ("style", style, "prompt"),
        ];
        if let Some(theme) = theme {
            fields.push(("theme", theme, "prompt"));
        }
        let clean = self.security.validate_inputs(&fields)?;
        let prompt = clean.get("prompt").map(String::as_str).unwrap_or(prompt);
        let style = clean.get("style").map(String::as_str).unwrap_or(style);
        let theme = clean.get("theme").map(String::as_str).or(theme);

        self.security.check_rate_limit(identifier, GENERATION_LIMIT)?;

        let generator = &self.generator;
        let generated = self
            .call_with_retry("Content generation", move || {
                generator.generate(prompt, style, theme)
            })
            .await;
        let content = match generated {
            Ok(content) => content,
            Err(e) => {
                self.audit_failure("content_generation", "content", identifier, &e);
                return Err(e.into());
            }
        };

        self.security
            .moderate_caption(content.caption(), content.hashtags())?;

        let mut details = Map::new();
        details.insert("image_path".to_string(), Value::from(content.image_path().as_str()));
        details.insert("hashtags".to_string(), Value::from(content.hashtags().len()));
        if let Some(theme) = theme {
            details.insert("theme".to_string(), Value::from(theme));
        }
        self.security.audit().log_action(
            "content_generation",
            "content",
            Some(identifier),
            details,
            true,
            RiskLevel::Low,
        );
        info!(image_path = %content.image_path(), "Content generated");
        Ok(content)
    }

    /// Publish an image with a caption on behalf of `identifier`.
    #[instrument(skip(self, caption), fields(caption_len = caption.len()))]
    pub async fn publish_content(
        &self,
        identifier: &str,
        image_path: &str,
        caption: &str,
    ) -> SocialsResult<String> {
        let file_name = Path::new(image_path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("");
        self.security.validate_inputs(&[
            ("identifier", identifier, "user_id"),
            ("image_path", file_name, "filename"),
        ])?;

        let limit = *self.content.max_caption_length();
        if caption.trim().is_empty() || caption.chars().count() > limit {
            let err = SecurityError::new(SecurityErrorKind::Validation {
                field: "caption".to_string(),
                reason: format!("Caption must be 1-{} characters", limit),
            });
            self.security.errors().record(err.kind().code());
            return Err(err.into());
        }
        self.security
            .moderate_caption(caption, &extract_hashtags(caption))?;

        self.security.check_rate_limit(identifier, PUBLISHING_LIMIT)?;

        let publisher = &self.publisher;
        let published = self
            .call_with_retry("Publishing", move || publisher.publish(image_path, caption))
            .await;
        let post_id = match published {
            Ok(post_id) => post_id,
            Err(e) => {
                self.audit_failure("instagram_publish", image_path, identifier, &e);
                return Err(e.into());
            }
        };

        let mut details = Map::new();
        details.insert("post_id".to_string(), Value::from(post_id.as_str()));
        details.insert(
            "caption_length".to_string(),
            Value::from(caption.chars().count()),
        );
        self.security.audit().log_action(
            "instagram_publish",
            image_path,
            Some(identifier),
            details,
            true,
            RiskLevel::Medium,
        );
        info!(post_id = %post_id, "Content published");
        Ok(post_id)
    }

    /// Generate content, then publish it or hold it for review.
    #[instrument(skip(self, prompt))]
    pub async fn generate_and_publish(
        &self,
        identifier: &str,
        prompt: &str,
        style: &str,
        theme: Option<&str>,
    ) -> SocialsResult<PublishOutcome> {
        let content = self.generate_content(identifier, prompt, style, theme).await?;

        if let Some(queue) = &self.reviews {
            let draft = ReviewDraft::new("instagram_post".to_string())
                .with_image_path(content.image_path().as_str())
                .with_caption(content.full_caption())
                .with_prompt(prompt);
            let review_id = queue.submit(draft);
            info!(review_id = %review_id, "Draft held for review");
            return Ok(PublishOutcome::PendingReview { review_id, content });
        }

        let post_id = self
            .publish_content(identifier, content.image_path(), &content.full_caption())
            .await?;
        Ok(PublishOutcome::Published { post_id, content })
    }

    /// Publish a reviewed draft using the approved or edited caption.
    ///
    /// Each approval publishes once. The review is claimed before posting
    /// and handed back if publishing fails.
    #[instrument(skip(self))]
    pub async fn publish_reviewed(&self, identifier: &str, review_id: &str) -> SocialsResult<String> {
        let queue = self.reviews.as_ref().ok_or_else(|| {
            SecurityError::new(SecurityErrorKind::Configuration(
                "Review queue is not enabled".to_string(),
            ))
        })?;
        let review = queue.claim_for_publishing(review_id)?;

        let Some(image_path) = review.draft().image_path().clone() else {
            queue.release(review_id);
            return Err(SecurityError::new(SecurityErrorKind::Validation {
                field: "image_path".to_string(),
                reason: "Reviewed draft has no image".to_string(),
            })
            .into());
        };
        let caption = review.final_caption().unwrap_or_default().to_string();
        match self.publish_content(identifier, &image_path, &caption).await {
            Ok(post_id) => {
                queue.mark_published(review_id, &post_id);
                Ok(post_id)
            }
            Err(e) => {
                queue.release(review_id);
                Err(e)
            }
        }
    }

    /// Drop stale rate-limit state and expired drafts.
    #[instrument(skip(self))]
    pub fn maintenance(&self) -> String {
        let purged = self.security.rate_limiter().purge_expired();
        let expired = self
            .reviews
            .as_ref()
            .map(|queue| queue.cleanup_expired())
            .unwrap_or(0);
        debug!(purged, expired, "Maintenance complete");
        format!(
            "purged {} rate limit entries, expired {} reviews",
            purged, expired
        )
    }

    /// Run `call` under the request timeout, retrying transient failures
    /// with jittered exponential backoff.
    async fn call_with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> CollaboratorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CollaboratorResult<T>>,
    {
        let secs = *self.collaborators.request_timeout_secs();
        let timeout = Duration::from_secs(secs);
        let mut attempt = 0u32;

        Retry::spawn(backoff(&self.collaborators), move || {
            attempt += 1;
            let number = attempt;
            let pending = call();
            async move {
                match tokio::time::timeout(timeout, pending).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) if is_permanent(&e) => RetryError::to_permanent(e),
                    Ok(Err(e)) => {
                        warn!(attempt = number, error = %e, "{} failed", operation);
                        RetryError::to_transient(e)
                    }
                    Err(_) => {
                        warn!(attempt = number, secs, "{} timed out", operation);
                        RetryError::to_transient(CollaboratorError::new(
                            CollaboratorErrorKind::Timeout {
                                operation: operation.to_string(),
                                secs,
                            },
                        ))
                    }
                }
            }
        })
        .await
    }

    fn audit_failure(&self, action: &str, resource: &str, identifier: &str, err: &CollaboratorError) {
        let mut details = Map::new();
        details.insert("error".to_string(), Value::from(err.kind().to_string()));
        self.security.audit().log_action(
            action,
            resource,
            Some(identifier),
            details,
            false,
            RiskLevel::Medium,
        );
        self.security.errors().record(err.kind().code());
    }
}

/// Delays between attempts before jitter: `retry_delay_ms` doubling up to
/// `max_retry_delay_ms`, for `retry_attempts - 1` retries.
fn delays(settings: &CollaboratorSettings) -> impl Iterator<Item = Duration> + use<> {
    let factor = (*settings.retry_delay_ms() / 2).max(1);
    let retries = settings.retry_attempts().saturating_sub(1) as usize;
    ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(Duration::from_millis(*settings.max_retry_delay_ms()))
        .take(retries)
}

fn backoff(settings: &CollaboratorSettings) -> impl Iterator<Item = Duration> + use<> {
    delays(settings).map(jitter)
}

fn is_permanent(err: &CollaboratorError) -> bool {
    matches!(err.kind(), CollaboratorErrorKind::Rejected(_))
}
