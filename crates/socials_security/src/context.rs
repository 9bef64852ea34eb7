//! Request gate composing validation, rate limiting, moderation and audit.

use crate::{
    AuditLogger, ContentModerator, InputValidator, ModerationResult, RateLimitDecision,
    RateLimiter, RiskLevel,
};
use serde_json::{Map, Value};
use socials_error::{ErrorTracker, SecurityError, SecurityErrorKind, SecurityResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Security components shared by every guarded operation.
///
/// Callers invoke the checks explicitly before reaching a collaborator:
/// 1. `validate_inputs` sanitizes untrusted arguments
/// 2. `check_rate_limit` consumes a request slot
/// 3. `moderate_caption` screens generated text
///
/// Every rejection is audited and counted in the error tracker.
#[derive(Debug, Clone, derive_getters::Getters)]
pub struct SecurityContext {
    validator: Arc<InputValidator>,
    rate_limiter: Arc<RateLimiter>,
    audit: Arc<AuditLogger>,
    moderator: Arc<ContentModerator>,
    errors: Arc<ErrorTracker>,
}

impl SecurityContext {
    /// Create a context with built-in rules and limits.
    pub fn new(audit: AuditLogger) -> SecurityResult<Self> {
        Ok(Self::from_parts(
            InputValidator::new()?,
            RateLimiter::new(),
            audit,
            ContentModerator::new(),
        ))
    }

    /// Create a context from configured components.
    pub fn from_parts(
        validator: InputValidator,
        rate_limiter: RateLimiter,
        audit: AuditLogger,
        moderator: ContentModerator,
    ) -> Self {
        Self {
            validator: Arc::new(validator),
            rate_limiter: Arc::new(rate_limiter),
            audit: Arc::new(audit),
            moderator: Arc::new(moderator),
            errors: Arc::new(ErrorTracker::new()),
        }
    }

    /// Validate `(field, value, rule)` triples and return sanitized values by field.
    ///
    /// Fails on the first invalid field. The error names the field and rule
    /// outcome but never the rejected value.
    #[instrument(skip_all, fields(fields = fields.len()))]
    pub fn validate_inputs(
        &self,
        fields: &[(&str, &str, &str)],
    ) -> SecurityResult<BTreeMap<String, String>> {
        let mut sanitized = BTreeMap::new();
        for (field, value, rule) in fields {
            match self.validator.validate(value, rule).into_result(field) {
                Ok(clean) => {
                    sanitized.insert(field.to_string(), clean);
                }
                Err(e) => {
                    warn!(field, rule, "Input validation failed");
                    let mut details = Map::new();
                    details.insert("field".to_string(), Value::from(*field));
                    details.insert("rule".to_string(), Value::from(*rule));
                    self.audit.log_action(
                        "input_validation",
                        field,
                        None,
                        details,
                        false,
                        RiskLevel::Medium,
                    );
                    self.errors.record(e.kind().code());
                    return Err(e);
                }
            }
        }
        debug!("All inputs valid");
        Ok(sanitized)
    }

    /// Consume one request slot for `identifier`.
    ///
    /// Rejections are audited as security events and returned as
    /// `RateLimitExceeded` carrying the retry delay.
    #[instrument(skip(self))]
    pub fn check_rate_limit(
        &self,
        identifier: &str,
        limit_type: &str,
    ) -> SecurityResult<RateLimitDecision> {
        let decision = self.rate_limiter.is_allowed(identifier, limit_type);
        if let Some(problem) = decision.error() {
            warn!(problem = %problem, "Rate limiter configuration problem");
        }
        if *decision.allowed() {
            debug!(remaining = decision.remaining_requests(), "Rate limit passed");
            return Ok(decision);
        }

        let mut details = Map::new();
        details.insert("limit_type".to_string(), Value::from(limit_type));
        details.insert(
            "retry_after".to_string(),
            Value::from(decision.retry_after().unwrap_or(1)),
        );
        details.insert(
            "current_requests".to_string(),
            Value::from(*decision.current_requests()),
        );
        self.audit.log_security_event(
            "rate_limit_exceeded",
            "Request rejected by rate limiter",
            Some(identifier),
            None,
            details,
        );
        let result = decision.into_result(limit_type);
        if let Err(e) = &result {
            self.errors.record(e.kind().code());
        }
        result
    }

    /// Screen a caption and its hashtags.
    #[instrument(skip_all, fields(hashtags = hashtags.len()))]
    pub fn moderate_caption(
        &self,
        caption: &str,
        hashtags: &[String],
    ) -> SecurityResult<ModerationResult> {
        let text = self.moderator.moderate_text(caption, Some("caption"));
        let tags = self.moderator.moderate_hashtags(hashtags);

        let mut issues: Vec<String> = text.issues().clone();
        issues.extend(tags.issues().iter().cloned());
        if issues.is_empty() {
            info!(
                confidence = text.confidence_score(),
                warnings = text.warnings().len() + tags.warnings().len(),
                "Caption passed moderation"
            );
            return Ok(text);
        }

        let mut details = Map::new();
        details.insert("issues".to_string(), Value::from(issues.clone()));
        details.insert("categories".to_string(), Value::from(text.categories().clone()));
        self.audit.log_action(
            "content_moderation",
            "caption",
            None,
            details,
            false,
            RiskLevel::High,
        );
        let err = SecurityError::new(SecurityErrorKind::ContentRejected(issues.join("; ")));
        self.errors.record(err.kind().code());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySink;
    use socials_error::ErrorCode;

    fn context() -> (SecurityContext, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let ctx = SecurityContext::new(AuditLogger::new(sink.clone())).unwrap();
        (ctx, sink)
    }

    #[test]
    fn test_validate_inputs_returns_sanitized() {
        let (ctx, sink) = context();
        let values = ctx
            .validate_inputs(&[("user", "user_123", "user_id"), ("tag", "#sunset", "hashtag")])
            .unwrap();
        assert_eq!(values["user"], "user_123");
        assert_eq!(values["tag"], "#sunset");
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_validate_inputs_audits_rejection() {
        let (ctx, sink) = context();
        let err = ctx
            .validate_inputs(&[("prompt", "<script>alert(1)</script>", "prompt")])
            .unwrap_err();
        assert!(!err.to_string().contains("script"));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action(), "input_validation");
        assert_eq!(ctx.errors().count(ErrorCode::ValidationFailed), 1);
    }

    #[test]
    fn test_rate_limit_rejection_is_audited() {
        let (ctx, sink) = context();
        for _ in 0..10 {
            ctx.check_rate_limit("bot", "api_publishing").unwrap();
        }
        let err = ctx.check_rate_limit("bot", "api_publishing").unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(300));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action(), "security_event_rate_limit_exceeded");
        assert_eq!(ctx.errors().count(ErrorCode::RateLimitExceeded), 1);
    }

    #[test]
    fn test_moderate_caption_rejects_spam() {
        let (ctx, sink) = context();
        assert!(
            ctx.moderate_caption("A calm morning by the lake.", &["#lake".to_string()])
                .is_ok()
        );
        let err = ctx
            .moderate_caption("Nice view", &["#follow4follow".to_string()])
            .unwrap_err();
        assert!(matches!(err.kind(), SecurityErrorKind::ContentRejected(_)));
        assert_eq!(sink.events().len(), 1);
    }
}
