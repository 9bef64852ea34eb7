//! When a job fires.
//!
//! Triggers support cron expressions, fixed intervals and one-time
//! execution. Cron expressions use the seven-field form of the `cron`
//! crate: `sec min hour day month weekday year`.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use socials_error::{SchedulingError, SchedulingErrorKind, SchedulingResult};
use std::str::FromStr;

/// Firing rule for a scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Cron expression (7 fields: sec min hour day month weekday year)
    ///
    /// Example: "0 0 9 * * * *" = 9 AM daily
    Cron {
        /// Cron expression string
        expression: String,
    },

    /// Fixed interval in seconds
    Interval {
        /// Interval duration in seconds
        seconds: u64,
    },

    /// One-time execution at a specific time
    Once {
        /// Execution timestamp
        at: DateTime<Utc>,
    },
}

impl Trigger {
    /// Cron trigger.
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.into(),
        }
    }

    /// Interval trigger in seconds.
    pub fn interval(seconds: u64) -> Self {
        Self::Interval { seconds }
    }

    /// Interval trigger in whole hours.
    pub fn every_hours(hours: u64) -> Self {
        Self::Interval {
            seconds: hours.saturating_mul(3600),
        }
    }

    /// One-time trigger.
    pub fn once(at: DateTime<Utc>) -> Self {
        Self::Once { at }
    }

    /// Short label used in logs and listings.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Cron { .. } => "cron",
            Trigger::Interval { .. } => "interval",
            Trigger::Once { .. } => "date",
        }
    }

    /// Whether the trigger fires more than once.
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Trigger::Once { .. })
    }

    /// Reject malformed triggers.
    pub fn validate(&self) -> SchedulingResult<()> {
        match self {
            Trigger::Cron { expression } => {
                parse_cron(expression)?;
            }
            Trigger::Interval { seconds } => {
                if *seconds == 0 {
                    return Err(SchedulingError::new(SchedulingErrorKind::InvalidTrigger(
                        "Interval must be at least one second".to_string(),
                    )));
                }
                if i64::try_from(*seconds).is_err() {
                    return Err(SchedulingError::new(SchedulingErrorKind::InvalidTrigger(
                        format!("Interval of {} seconds is too large", seconds),
                    )));
                }
            }
            Trigger::Once { .. } => {}
        }
        Ok(())
    }

    /// First firing time for a job registered at `now`.
    ///
    /// One-time triggers keep their timestamp even when it has passed, so a
    /// late registration is handled by the misfire rules.
    pub fn first_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Once { at } => Some(*at),
            _ => self.next_execution(now),
        }
    }

    /// Next firing time strictly after `after`, or `None` when exhausted.
    pub fn next_execution(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Once { at } => (after < *at).then_some(*at),
            Trigger::Interval { seconds } => {
                let seconds = i64::try_from(*seconds).ok()?;
                after.checked_add_signed(TimeDelta::try_seconds(seconds)?)
            }
            Trigger::Cron { expression } => parse_cron(expression).ok()?.after(&after).next(),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Cron { expression } => write!(f, "cron({})", expression),
            Trigger::Interval { seconds } => write!(f, "every {}s", seconds),
            Trigger::Once { at } => write!(f, "once at {}", at.to_rfc3339()),
        }
    }
}

fn parse_cron(expression: &str) -> SchedulingResult<cron::Schedule> {
    cron::Schedule::from_str(expression).map_err(|e| {
        SchedulingError::new(SchedulingErrorKind::InvalidTrigger(format!(
            "Invalid cron expression '{}': {}",
            expression, e
        )))
    })
}
