//! Application settings.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `SOCIALS__*` environment variables (`SOCIALS__LOGGING__LEVEL=debug`
//! overrides `[logging] level`). Call [`SocialsConfig::validate`] before
//! building components; configuration errors are fatal at startup.

use serde::{Deserialize, Serialize};
use socials_error::{ConfigError, SecurityResult, SocialsResult};
use socials_scheduler::SchedulerConfig;
use socials_security::{
    AuditLogger, ContentModerator, EncryptionManager, InputValidator, RateLimitConfig,
    RateLimiter, SecurityContext, default_limits,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SOCIALS";

/// Instagram caption limit.
pub const MAX_CAPTION_LENGTH: usize = 2200;

/// Deployment environment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Pre-production
    Staging,
    /// Production
    Production,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, derive_getters::Getters)]
pub struct SocialsConfig {
    /// Deployment environment
    #[serde(default)]
    environment: Environment,
    /// Gating and audit settings
    #[serde(default)]
    security: SecuritySettings,
    /// Job scheduling settings
    #[serde(default)]
    scheduling: SchedulingSettings,
    /// Log output settings
    #[serde(default)]
    logging: LoggingSettings,
    /// Timeouts and retries for generator and publisher calls
    #[serde(default)]
    collaborators: CollaboratorSettings,
    /// Content limits
    #[serde(default)]
    content: ContentSettings,
    /// Instagram account
    #[serde(default)]
    instagram: InstagramSettings,
    /// Telegram review bot
    #[serde(default)]
    telegram: TelegramSettings,
}

/// Gating and audit settings.
#[derive(Debug, Clone, Serialize, Deserialize, derive_getters::Getters)]
pub struct SecuritySettings {
    /// JSON Lines audit log
    #[serde(default = "default_audit_log_path")]
    audit_log_path: PathBuf,
    /// Base64 encryption key; a fresh key is generated per process when unset
    #[serde(default, skip_serializing)]
    encryption_key: Option<String>,
    /// Hold generated drafts for human approval before publishing
    #[serde(default)]
    require_review: bool,
    /// Extra or overriding rate limits by limit type
    #[serde(default)]
    rate_limits: BTreeMap<String, RateLimitConfig>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            audit_log_path: default_audit_log_path(),
            encryption_key: None,
            require_review: false,
            rate_limits: BTreeMap::new(),
        }
    }
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("logs/audit.log")
}

/// Job scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize, derive_getters::Getters)]
pub struct SchedulingSettings {
    /// Run the background scheduler
    #[serde(default)]
    enabled: bool,
    /// Persisted job table
    #[serde(default = "default_jobs_file")]
    jobs_file: PathBuf,
    /// Default interval for generation jobs
    #[serde(default = "default_interval_hours")]
    interval_hours: u64,
    /// Scheduler tuning
    #[serde(default)]
    engine: SchedulerConfig,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            jobs_file: default_jobs_file(),
            interval_hours: default_interval_hours(),
            engine: SchedulerConfig::default(),
        }
    }
}

fn default_jobs_file() -> PathBuf {
    PathBuf::from("data/jobs.json")
}

fn default_interval_hours() -> u64 {
    24
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize, derive_getters::Getters)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    level: String,
    /// Emit JSON records instead of text
    #[serde(default)]
    json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Timeouts and retries for collaborator calls.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters, derive_setters::Setters,
)]
#[setters(prefix = "with_")]
pub struct CollaboratorSettings {
    /// Seconds one call may take
    #[serde(default = "default_request_timeout")]
    request_timeout_secs: u64,
    /// Attempts per call, including the first
    #[serde(default = "default_retry_attempts")]
    retry_attempts: u32,
    /// Delay before the first retry in milliseconds
    #[serde(default = "default_retry_delay")]
    retry_delay_ms: u64,
    /// Upper bound on a single retry delay in milliseconds
    #[serde(default = "default_max_retry_delay")]
    max_retry_delay_ms: u64,
}

impl Default for CollaboratorSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_max_retry_delay() -> u64 {
    30_000
}

/// Content limits.
#[derive(Debug, Clone, Serialize, Deserialize, derive_getters::Getters, derive_setters::Setters)]
#[setters(prefix = "with_")]
pub struct ContentSettings {
    /// Where generated images are written
    #[serde(default = "default_output_directory")]
    output_directory: PathBuf,
    /// Caption length limit
    #[serde(default = "default_max_caption_length")]
    max_caption_length: usize,
    /// Hashtags requested per caption
    #[serde(default = "default_hashtag_count")]
    hashtag_count: usize,
    /// Caption style used when none is given
    #[serde(default = "default_style")]
    #[setters(into)]
    default_style: String,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            max_caption_length: default_max_caption_length(),
            hashtag_count: default_hashtag_count(),
            default_style: default_style(),
        }
    }
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("generated_content")
}

fn default_max_caption_length() -> usize {
    MAX_CAPTION_LENGTH
}

fn default_hashtag_count() -> usize {
    10
}

fn default_style() -> String {
    "engaging".to_string()
}

/// Instagram account settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, derive_getters::Getters)]
pub struct InstagramSettings {
    /// Graph API access token
    #[serde(default, skip_serializing)]
    access_token: Option<String>,
    /// Instagram business account id
    #[serde(default)]
    user_id: Option<String>,
}

/// Telegram review bot settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, derive_getters::Getters)]
pub struct TelegramSettings {
    /// Bot token
    #[serde(default, skip_serializing)]
    bot_token: Option<String>,
    /// Chat that receives review requests
    #[serde(default)]
    chat_id: Option<String>,
}

impl SocialsConfig {
    /// Load defaults, then `path` if it exists, then `SOCIALS__*` variables.
    #[instrument]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_layered(path, environment_source())
    }

    /// Load a configuration file that must exist. Environment variables
    /// still apply on top.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::new(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Self::load(Some(path))
    }

    pub(crate) fn load_layered(
        path: Option<&Path>,
        env: ::config::Environment,
    ) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Adding config file layer");
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(env)
            .build()
            .map_err(|e| ConfigError::new(format!("Failed to read config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))
    }

    /// Check every setting, failing on the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging
            .level
            .parse::<tracing::Level>()
            .map_err(|_| {
                ConfigError::for_key(
                    "logging.level",
                    format!(
                        "Invalid log level '{}', expected trace, debug, info, warn or error",
                        self.logging.level
                    ),
                )
            })?;

        if let Some(key) = &self.security.encryption_key {
            EncryptionManager::from_base64_key(key)
                .map_err(|e| ConfigError::for_key("security.encryption_key", e.to_string()))?;
        }
        for (name, limit) in &self.security.rate_limits {
            limit.validate().map_err(|e| {
                ConfigError::for_key(format!("security.rate_limits.{}", name), e.to_string())
            })?;
        }

        let collaborators = &self.collaborators;
        if collaborators.request_timeout_secs == 0 {
            return Err(ConfigError::for_key(
                "collaborators.request_timeout_secs",
                "Request timeout must be positive",
            ));
        }
        if collaborators.retry_attempts == 0 {
            return Err(ConfigError::for_key(
                "collaborators.retry_attempts",
                "Retry attempts must be positive",
            ));
        }
        if collaborators.max_retry_delay_ms < collaborators.retry_delay_ms {
            return Err(ConfigError::for_key(
                "collaborators.max_retry_delay_ms",
                "Maximum retry delay is shorter than the initial delay",
            ));
        }

        let scheduling = &self.scheduling;
        if scheduling.interval_hours == 0 {
            return Err(ConfigError::for_key(
                "scheduling.interval_hours",
                "Scheduling interval must be positive",
            ));
        }
        let engine = &scheduling.engine;
        for (key, value) in [
            ("scheduling.engine.tick_interval_secs", *engine.tick_interval_secs()),
            ("scheduling.engine.job_timeout_secs", *engine.job_timeout_secs()),
        ] {
            if value == 0 {
                return Err(ConfigError::for_key(key, "Must be positive"));
            }
        }
        if *engine.max_concurrent_jobs() == 0 {
            return Err(ConfigError::for_key(
                "scheduling.engine.max_concurrent_jobs",
                "Must be positive",
            ));
        }

        let content = &self.content;
        if content.max_caption_length == 0 || content.max_caption_length > MAX_CAPTION_LENGTH {
            return Err(ConfigError::for_key(
                "content.max_caption_length",
                format!("Caption limit must be between 1 and {}", MAX_CAPTION_LENGTH),
            ));
        }

        if self.instagram.access_token.is_some() && self.instagram.user_id.is_none() {
            return Err(ConfigError::for_key(
                "instagram.user_id",
                "Instagram user_id is required when access_token is provided",
            ));
        }
        if self.telegram.bot_token.is_some() && self.telegram.chat_id.is_none() {
            return Err(ConfigError::for_key(
                "telegram.chat_id",
                "Telegram chat_id is required when bot_token is provided",
            ));
        }
        Ok(())
    }

    /// Non-secret summary of the effective settings.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "environment": self.environment.to_string(),
            "audit_log_path": self.security.audit_log_path.display().to_string(),
            "encryption_key_configured": self.security.encryption_key.is_some(),
            "require_review": self.security.require_review,
            "custom_rate_limits": self.security.rate_limits.keys().collect::<Vec<_>>(),
            "scheduling_enabled": self.scheduling.enabled,
            "jobs_file": self.scheduling.jobs_file.display().to_string(),
            "log_level": &self.logging.level,
            "instagram_configured": self.instagram.access_token.is_some(),
            "telegram_configured": self.telegram.bot_token.is_some(),
        })
    }
}

impl SocialsConfig {
    /// Build the security gate: built-in rules, built-in limits overlaid
    /// with configured ones, and a file-backed audit log.
    pub fn security_context(&self) -> SocialsResult<SecurityContext> {
        let mut limits = default_limits();
        limits.extend(
            self.security
                .rate_limits
                .iter()
                .map(|(name, limit)| (name.clone(), limit.clone())),
        );
        let audit = AuditLogger::with_file(&self.security.audit_log_path)?;
        Ok(SecurityContext::from_parts(
            InputValidator::new()?,
            RateLimiter::with_limits(limits),
            audit,
            ContentModerator::new(),
        ))
    }

    /// Encryption manager over the configured key, or a fresh key when unset.
    pub fn encryption_manager(&self) -> SecurityResult<EncryptionManager> {
        match &self.security.encryption_key {
            Some(key) => EncryptionManager::from_base64_key(key),
            None => Ok(EncryptionManager::new()),
        }
    }
}

fn environment_source() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
