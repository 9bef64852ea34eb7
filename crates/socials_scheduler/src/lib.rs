//! Persistent job scheduling for the socials pipeline.
//!
//! Jobs pair a [`Trigger`] with a serializable [`JobPayload`]. The
//! [`ContentScheduler`] fires due jobs through a [`JobRunner`] supplied by
//! the application and writes the job table to a [`JobStore`] after every
//! change, so definitions survive restarts.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod job;
mod runner;
mod scheduler;
mod store;
mod trigger;

pub use job::{JobDefinition, JobPayload, JobRecord, JobStatus, JobType};
pub use runner::JobRunner;
pub use scheduler::{
    ContentScheduler, JobHistoryEntry, SchedulerConfig, SchedulerStatus, retry_delay,
};
pub use store::{JobStore, JsonFileJobStore, MemoryJobStore};
pub use trigger::Trigger;
