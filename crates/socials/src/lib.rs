//! Gated AI content generation and Instagram publishing.
//!
//! This crate wires the security gate from `socials_security` and the job
//! scheduler from `socials_scheduler` around two external collaborators, a
//! [`ContentGenerator`] and a [`Publisher`].
//!
//! The `socials` binary manages configuration, security tooling and the job
//! table. It has no collaborators of its own, so scheduled jobs run in the
//! application that embeds this crate, through [`serve`].
//!
//! # Example
//!
//! ```no_run
//! use socials::{Pipeline, SocialsConfig};
//! # use socials::{ContentGenerator, Publisher};
//! use socials_security::{AuditLogger, SecurityContext};
//! # use std::sync::Arc;
//! # async fn run(
//! #     generator: Arc<dyn ContentGenerator>,
//! #     publisher: Arc<dyn Publisher>,
//! # ) -> socials_error::SocialsResult<()> {
//! let config = SocialsConfig::load(None)?;
//! config.validate()?;
//!
//! let audit = AuditLogger::with_file(config.security().audit_log_path())?;
//! let pipeline = Pipeline::new(SecurityContext::new(audit)?, generator, publisher)
//!     .with_collaborator_settings(config.collaborators().clone());
//!
//! let outcome = pipeline
//!     .generate_and_publish("user_123", "a dog in a sunflower field", "engaging", None)
//!     .await?;
//! println!("{}", outcome.summary());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod collaborators;
mod config;
mod logging;
mod pipeline;
mod runner;
mod service;

pub use collaborators::{ContentGenerator, GeneratedContent, Publisher, extract_hashtags};
pub use config::{
    CollaboratorSettings, ContentSettings, ENV_PREFIX, Environment, InstagramSettings,
    LoggingSettings, MAX_CAPTION_LENGTH, SchedulingSettings, SecuritySettings, SocialsConfig,
    TelegramSettings,
};
pub use logging::{filter_directive, init_tracing};
pub use pipeline::{GENERATION_LIMIT, PUBLISHING_LIMIT, Pipeline, PublishOutcome};
pub use runner::{PipelineRunner, SCHEDULER_IDENTIFIER, into_collaborator_error};
pub use service::{build_pipeline, serve};
