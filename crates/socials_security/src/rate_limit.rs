//! Sliding-window rate limiting with abuse blocking.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use socials_error::{SecurityError, SecurityErrorKind, SecurityResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Longest window, burst window or block duration accepted, one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

fn default_block_duration() -> u64 {
    300
}

fn default_burst_window() -> u64 {
    60
}

/// Limits for one named limit type.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
)]
#[setters(prefix = "with_")]
pub struct RateLimitConfig {
    /// Requests allowed per window
    #[setters(skip)]
    max_requests: u32,
    /// Window length in seconds
    #[setters(skip)]
    time_window: u64,
    /// Requests allowed within the burst window
    #[serde(default)]
    #[setters(strip_option)]
    burst_limit: Option<u32>,
    /// Seconds an identifier stays blocked after exhausting the window
    #[serde(default = "default_block_duration")]
    block_duration: u64,
    /// Burst window in seconds, clamped to the time window
    #[serde(default = "default_burst_window")]
    burst_window: u64,
}

impl RateLimitConfig {
    /// Create a config with the default block duration and no burst limit.
    pub fn new(max_requests: u32, time_window: u64) -> Self {
        Self {
            max_requests,
            time_window,
            burst_limit: None,
            block_duration: default_block_duration(),
            burst_window: default_burst_window(),
        }
    }

    /// Reject zero limits, durations above [`MAX_DURATION_SECS`] and burst
    /// limits above the window limit.
    pub fn validate(&self) -> SecurityResult<()> {
        let too_long = [
            ("time_window", self.time_window),
            ("block_duration", self.block_duration),
            ("burst_window", self.burst_window),
        ]
        .into_iter()
        .find(|(_, secs)| *secs > MAX_DURATION_SECS);

        let problem = if self.max_requests == 0 {
            Some("max_requests must be positive".to_string())
        } else if self.time_window == 0 {
            Some("time_window must be positive".to_string())
        } else if self.block_duration == 0 {
            Some("block_duration must be positive".to_string())
        } else if self.burst_window == 0 {
            Some("burst_window must be positive".to_string())
        } else if let Some((field, secs)) = too_long {
            Some(format!(
                "{} of {} seconds exceeds the maximum of {}",
                field, secs, MAX_DURATION_SECS
            ))
        } else {
            match self.burst_limit {
                Some(0) => Some("burst_limit must be positive".to_string()),
                Some(burst) if burst > self.max_requests => Some(format!(
                    "burst_limit {} exceeds max_requests {}",
                    burst, self.max_requests
                )),
                _ => None,
            }
        };
        match problem {
            Some(reason) => Err(SecurityError::new(SecurityErrorKind::Configuration(
                reason,
            ))),
            None => Ok(()),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.time_window.min(MAX_DURATION_SECS))
    }

    fn burst_span(&self) -> Duration {
        Duration::from_secs(self.burst_window.min(self.time_window).min(MAX_DURATION_SECS))
    }

    fn block(&self) -> Duration {
        Duration::from_secs(self.block_duration.min(MAX_DURATION_SECS))
    }
}

/// Built-in limit types.
pub fn default_limits() -> HashMap<String, RateLimitConfig> {
    HashMap::from([
        ("api_general".to_string(), RateLimitConfig::new(100, 3600)),
        (
            "api_generation".to_string(),
            RateLimitConfig::new(20, 3600).with_burst_limit(5),
        ),
        ("api_publishing".to_string(), RateLimitConfig::new(10, 3600)),
        (
            "login_attempts".to_string(),
            RateLimitConfig::new(5, 900).with_block_duration(1800),
        ),
        (
            "content_moderation".to_string(),
            RateLimitConfig::new(1000, 3600),
        ),
    ])
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    allowed: bool,
    /// Requests counted in the current window
    current_requests: u32,
    /// Window limit
    max_requests: u32,
    /// Requests left in the current window
    remaining_requests: u32,
    /// Seconds to wait before retrying, on rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    /// When the identifier's block ends, if blocked
    #[serde(skip_serializing_if = "Option::is_none")]
    blocked_until: Option<DateTime<Utc>>,
    /// Configuration problem, such as an unknown limit type
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl RateLimitDecision {
    /// Convert a rejection into a typed error.
    pub fn into_result(self, limit_type: &str) -> SecurityResult<Self> {
        if self.allowed {
            return Ok(self);
        }
        Err(SecurityError::new(SecurityErrorKind::RateLimitExceeded {
            limit_type: limit_type.to_string(),
            retry_after_secs: self.retry_after.unwrap_or(1),
        }))
    }

    fn rejected(current: u32, max: u32, retry_after: Duration, blocked: bool) -> Self {
        let retry_secs = ceil_secs(retry_after);
        Self {
            allowed: false,
            current_requests: current,
            max_requests: max,
            remaining_requests: max.saturating_sub(current),
            retry_after: Some(retry_secs),
            blocked_until: if blocked {
                chrono::TimeDelta::from_std(retry_after)
                    .ok()
                    .map(|d| Utc::now() + d)
            } else {
                None
            },
            error: None,
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

/// Aggregate limiter statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct RateLimitStats {
    /// Identifiers with a non-empty window
    active_limits: usize,
    /// Identifiers currently blocked
    blocked_identifiers: usize,
    /// Identifiers with any tracked state
    total_identifiers: usize,
    /// Registered limit types
    limit_types: usize,
}

#[derive(Debug, Default)]
struct LimiterState {
    windows: HashMap<(String, String), VecDeque<Instant>>,
    blocked: HashMap<String, Instant>,
}

/// Per-identifier sliding-window rate limiter.
///
/// Windows are keyed by identifier and limit type. Blocks are keyed by
/// identifier alone, so exhausting one limit type blocks the identifier for
/// every type until the block expires or [`RateLimiter::reset_limit`] runs.
/// State lives in memory only.
#[derive(Debug)]
pub struct RateLimiter {
    configs: RwLock<HashMap<String, RateLimitConfig>>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter seeded with the built-in limit types.
    pub fn new() -> Self {
        Self::with_limits(default_limits())
    }

    /// Create a limiter with exactly the given limit types.
    pub fn with_limits(limits: HashMap<String, RateLimitConfig>) -> Self {
        Self {
            configs: RwLock::new(limits),
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Register or overwrite a limit type. Existing blocks are unaffected.
    #[instrument(skip(self, config), fields(limit_type = name))]
    pub fn add_custom_limit(&self, name: &str, config: RateLimitConfig) -> SecurityResult<()> {
        config.validate()?;
        debug!(
            max_requests = config.max_requests,
            time_window = config.time_window,
            "Adding rate limit"
        );
        self.configs.write().insert(name.to_string(), config);
        Ok(())
    }

    /// Configuration for a limit type.
    pub fn limit(&self, name: &str) -> Option<RateLimitConfig> {
        self.configs.read().get(name).cloned()
    }

    /// Check and record one request.
    #[instrument(skip(self))]
    pub fn is_allowed(&self, identifier: &str, limit_type: &str) -> RateLimitDecision {
        self.is_allowed_at(identifier, limit_type, Instant::now())
    }

    pub(crate) fn is_allowed_at(
        &self,
        identifier: &str,
        limit_type: &str,
        now: Instant,
    ) -> RateLimitDecision {
        let Some(config) = self.limit(limit_type) else {
            warn!("Unknown limit type, allowing request");
            return RateLimitDecision {
                allowed: true,
                current_requests: 0,
                max_requests: 0,
                remaining_requests: 0,
                retry_after: None,
                blocked_until: None,
                error: Some(format!("Unknown limit type: {}", limit_type)),
            };
        };
        let max = config.max_requests;

        let mut state = self.state.lock();
        let LimiterState { windows, blocked } = &mut *state;

        if let Some(until) = blocked.get(identifier).copied() {
            if until > now {
                let current = windows
                    .get(&(identifier.to_string(), limit_type.to_string()))
                    .map_or(0, |w| w.len() as u32);
                debug!("Identifier is blocked");
                return RateLimitDecision::rejected(current, max, until - now, true);
            }
            blocked.remove(identifier);
        }

        let window = windows
            .entry((identifier.to_string(), limit_type.to_string()))
            .or_default();
        prune(window, now, config.window());
        let current = window.len() as u32;

        if current >= max {
            // Limiters built with unvalidated limits still clamp the block
            let block = config.block();
            match now.checked_add(block) {
                Some(until) => {
                    blocked.insert(identifier.to_string(), until);
                }
                None => warn!("Block end is out of range, rejecting without a block"),
            }
            warn!(
                current_requests = current,
                block_secs = block.as_secs(),
                "Rate limit exceeded, blocking identifier"
            );
            return RateLimitDecision::rejected(current, max, block, true);
        }

        if let Some(burst) = config.burst_limit {
            let span = config.burst_span();
            let in_burst = window
                .iter()
                .rev()
                .take_while(|t| now.duration_since(**t) < span)
                .count();
            if in_burst >= burst as usize {
                let oldest = window[window.len() - in_burst];
                let wait = span.saturating_sub(now.duration_since(oldest));
                debug!(in_burst, burst_limit = burst, "Burst limit exceeded");
                return RateLimitDecision::rejected(current, max, wait, false);
            }
        }

        window.push_back(now);
        let current = current + 1;
        debug!(current_requests = current, "Request allowed");
        RateLimitDecision {
            allowed: true,
            current_requests: current,
            max_requests: max,
            remaining_requests: max.saturating_sub(current),
            retry_after: None,
            blocked_until: None,
            error: None,
        }
    }

    /// Clear every window and the block for `identifier`.
    #[instrument(skip(self))]
    pub fn reset_limit(&self, identifier: &str) {
        let mut state = self.state.lock();
        state.windows.retain(|(id, _), _| id != identifier);
        state.blocked.remove(identifier);
        debug!("Rate limits reset");
    }

    /// Drop empty windows and expired blocks. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let configs = self.configs.read();
        let mut state = self.state.lock();
        let before = state.windows.len() + state.blocked.len();
        state.windows.retain(|(_, limit_type), window| {
            match configs.get(limit_type) {
                Some(config) => prune(window, now, config.window()),
                None => window.clear(),
            }
            !window.is_empty()
        });
        state.blocked.retain(|_, until| *until > now);
        let removed = before - (state.windows.len() + state.blocked.len());
        if removed > 0 {
            debug!(removed, "Purged expired rate limit state");
        }
        removed
    }

    /// Aggregate counts.
    pub fn get_stats(&self) -> RateLimitStats {
        self.stats_at(Instant::now())
    }

    pub(crate) fn stats_at(&self, now: Instant) -> RateLimitStats {
        let limit_types = self.configs.read().len();
        let state = self.state.lock();
        let active: HashSet<&str> = state
            .windows
            .iter()
            .filter(|(_, w)| !w.is_empty())
            .map(|((id, _), _)| id.as_str())
            .collect();
        let blocked: HashSet<&str> = state
            .blocked
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(id, _)| id.as_str())
            .collect();
        RateLimitStats {
            active_limits: active.len(),
            blocked_identifiers: blocked.len(),
            total_identifiers: active.union(&blocked).count(),
            limit_types,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while window
        .front()
        .is_some_and(|t| now.duration_since(*t) >= span)
    {
        window.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(name: &str, config: RateLimitConfig) -> RateLimiter {
        RateLimiter::with_limits(HashMap::from([(name.to_string(), config)]))
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter_with("test", RateLimitConfig::new(2, 60));
        let start = Instant::now();
        assert!(limiter.is_allowed_at("a", "test", start).allowed);
        assert!(
            limiter
                .is_allowed_at("a", "test", start + Duration::from_secs(30))
                .allowed
        );
        // First request has left the window, but the identifier is not blocked
        // because the limit was never hit.
        let decision = limiter.is_allowed_at("a", "test", start + Duration::from_secs(61));
        assert!(decision.allowed);
        assert_eq!(decision.current_requests, 2);
    }

    #[test]
    fn test_block_outlasts_window() {
        let config = RateLimitConfig::new(1, 10).with_block_duration(100);
        let limiter = limiter_with("test", config);
        let start = Instant::now();
        assert!(limiter.is_allowed_at("a", "test", start).allowed);
        let rejected = limiter.is_allowed_at("a", "test", start + Duration::from_secs(1));
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after, Some(100));
        assert!(rejected.blocked_until.is_some());

        let still_blocked = limiter.is_allowed_at("a", "test", start + Duration::from_secs(50));
        assert!(!still_blocked.allowed);
        assert_eq!(still_blocked.retry_after, Some(51));

        assert!(
            limiter
                .is_allowed_at("a", "test", start + Duration::from_secs(102))
                .allowed
        );
    }

    #[test]
    fn test_burst_rejection_does_not_block() {
        let config = RateLimitConfig::new(20, 3600).with_burst_limit(2);
        let limiter = limiter_with("test", config);
        let start = Instant::now();
        assert!(limiter.is_allowed_at("a", "test", start).allowed);
        assert!(limiter.is_allowed_at("a", "test", start).allowed);

        let burst = limiter.is_allowed_at("a", "test", start + Duration::from_secs(10));
        assert!(!burst.allowed);
        assert_eq!(burst.retry_after, Some(50));
        assert!(burst.blocked_until.is_none());
        assert_eq!(burst.current_requests, 2);

        let later = limiter.is_allowed_at("a", "test", start + Duration::from_secs(60));
        assert!(later.allowed);
        assert_eq!(later.current_requests, 3);
    }

    #[test]
    fn test_burst_window_clamped_to_time_window() {
        let config = RateLimitConfig::new(3, 10)
            .with_burst_limit(1)
            .with_burst_window(600);
        assert_eq!(config.burst_span(), Duration::from_secs(10));
    }

    #[test]
    fn test_unknown_limit_type_fails_open() {
        let limiter = RateLimiter::new();
        let decision = limiter.is_allowed("a", "no_such_limit");
        assert!(decision.allowed);
        assert_eq!(
            decision.error.as_deref(),
            Some("Unknown limit type: no_such_limit")
        );
        assert_eq!(limiter.get_stats().active_limits, 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimitConfig::new(0, 60).validate().is_err());
        assert!(RateLimitConfig::new(5, 0).validate().is_err());
        assert!(
            RateLimitConfig::new(5, 60)
                .with_burst_limit(6)
                .validate()
                .is_err()
        );
        assert!(
            RateLimitConfig::new(5, 60)
                .with_block_duration(0)
                .validate()
                .is_err()
        );
        assert!(
            RateLimitConfig::new(5, 60)
                .with_burst_limit(5)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_durations_are_bounded() {
        let huge_block = RateLimitConfig::new(1, 60).with_block_duration(u64::MAX);
        assert!(huge_block.validate().is_err());
        assert!(RateLimitConfig::new(1, u64::MAX).validate().is_err());
        assert!(
            RateLimitConfig::new(1, 60)
                .with_burst_window(MAX_DURATION_SECS + 1)
                .validate()
                .is_err()
        );
        assert!(
            RateLimitConfig::new(1, MAX_DURATION_SECS)
                .with_block_duration(MAX_DURATION_SECS)
                .validate()
                .is_ok()
        );

        // Limiters built without validation clamp instead of overflowing
        let limiter = limiter_with("test", huge_block);
        assert!(limiter.is_allowed("a", "test").allowed);
        let rejected = limiter.is_allowed("a", "test");
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after, Some(MAX_DURATION_SECS));
        assert!(!limiter.is_allowed("a", "test").allowed);
    }

    #[test]
    fn test_purge_expired() {
        let config = RateLimitConfig::new(1, 10).with_block_duration(20);
        let limiter = limiter_with("test", config);
        let start = Instant::now();
        limiter.is_allowed_at("a", "test", start);
        limiter.is_allowed_at("a", "test", start);
        limiter.is_allowed_at("b", "test", start);

        let stats = limiter.stats_at(start);
        assert_eq!(stats.active_limits, 2);
        assert_eq!(stats.blocked_identifiers, 1);
        assert_eq!(stats.total_identifiers, 2);

        // Windows expire at 10s, the block at 20s.
        assert_eq!(limiter.purge_expired_at(start + Duration::from_secs(11)), 2);
        assert_eq!(limiter.purge_expired_at(start + Duration::from_secs(21)), 1);
        let stats = limiter.stats_at(start + Duration::from_secs(21));
        assert_eq!(stats.total_identifiers, 0);
    }
}
