//! Execution of job payloads.

use crate::JobDefinition;
use async_trait::async_trait;
use socials_error::CollaboratorResult;

/// Executes a job when it fires.
///
/// The application implements this over its content generator and
/// publisher. The returned string is a short summary recorded in the job
/// history, such as a post identifier.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run one job.
    async fn run(&self, job: &JobDefinition) -> CollaboratorResult<String>;
}
