//! Append-only audit trail for security-relevant actions.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use socials_error::{SecurityError, SecurityErrorKind, SecurityResult};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

/// Risk attached to an audited action.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    /// Routine action
    #[default]
    Low,
    /// Unusual but expected action
    Medium,
    /// Security event or failed sensitive action
    High,
    /// Requires immediate attention
    Critical,
}

/// One audit record. Never mutated after it is written.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
)]
#[setters(prefix = "with_")]
pub struct AuditEvent {
    /// When the event was recorded
    #[setters(skip)]
    timestamp: DateTime<Utc>,
    /// Action performed
    #[setters(skip)]
    action: String,
    /// Resource affected
    #[setters(skip)]
    resource: String,
    /// Acting user, if known
    #[setters(strip_option, into)]
    user_id: Option<String>,
    /// Additional structured context
    details: Map<String, Value>,
    /// Whether the action succeeded
    success: bool,
    /// Risk level
    risk_level: RiskLevel,
    /// Client address, if known
    #[setters(strip_option, into)]
    ip_address: Option<String>,
    /// Client user agent, if known
    #[setters(strip_option, into)]
    user_agent: Option<String>,
}

impl AuditEvent {
    /// Create a successful low-risk event timestamped now.
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            resource: resource.into(),
            user_id: None,
            details: Map::new(),
            success: true,
            risk_level: RiskLevel::Low,
            ip_address: None,
            user_agent: None,
        }
    }
}

/// Durable destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Append one event.
    fn write(&self, event: &AuditEvent) -> SecurityResult<()>;
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it and its parent directory.
    pub fn open(path: impl AsRef<Path>) -> SecurityResult<Self> {
        let path = path.as_ref().to_path_buf();
        let audit_error = |e: std::io::Error| {
            SecurityError::new(SecurityErrorKind::AuditWrite(format!(
                "Failed to open {}: {}",
                path.display(),
                e
            )))
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(audit_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(audit_error)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesSink {
    fn write(&self, event: &AuditEvent) -> SecurityResult<()> {
        let line = serde_json::to_string(event).map_err(|e| {
            SecurityError::new(SecurityErrorKind::AuditWrite(format!(
                "Failed to serialize event: {}",
                e
            )))
        })?;
        let mut file = self.file.lock();
        writeln!(file, "{}", line)
            .and_then(|_| file.flush())
            .map_err(|e| SecurityError::new(SecurityErrorKind::AuditWrite(e.to_string())))
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events written so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

impl AuditSink for MemorySink {
    fn write(&self, event: &AuditEvent) -> SecurityResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Fire-and-forget audit logger.
///
/// Write failures are counted and traced but never returned to the caller,
/// so auditing cannot fail the operation being audited.
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    written: AtomicU64,
    write_failures: AtomicU64,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("written", &self.written)
            .field("write_failures", &self.write_failures)
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Create a logger over `sink`.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    /// Create a logger appending JSON lines to `path`.
    pub fn with_file(path: impl AsRef<Path>) -> SecurityResult<Self> {
        Ok(Self::new(Arc::new(JsonLinesSink::open(path)?)))
    }

    /// Record a fully built event.
    pub fn record(&self, event: AuditEvent) {
        let user = event.user_id.as_deref().unwrap_or("anonymous");
        match event.risk_level {
            RiskLevel::Critical | RiskLevel::High => error!(
                action = %event.action,
                resource = %event.resource,
                user,
                success = event.success,
                risk = %event.risk_level,
                "AUDIT"
            ),
            RiskLevel::Medium => warn!(
                action = %event.action,
                resource = %event.resource,
                user,
                success = event.success,
                "AUDIT"
            ),
            RiskLevel::Low => info!(
                action = %event.action,
                resource = %event.resource,
                user,
                success = event.success,
                "AUDIT"
            ),
        }

        match self.sink.write(&event) {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, action = %event.action, "Failed to write audit event");
            }
        }
    }

    /// Record an action on a resource.
    pub fn log_action(
        &self,
        action: &str,
        resource: &str,
        user_id: Option<&str>,
        details: Map<String, Value>,
        success: bool,
        risk_level: RiskLevel,
    ) {
        let mut event = AuditEvent::new(action, resource)
            .with_details(details)
            .with_success(success)
            .with_risk_level(risk_level);
        event.user_id = user_id.map(str::to_string);
        self.record(event);
    }

    /// Record a security event as a failed high-risk action.
    pub fn log_security_event(
        &self,
        event_type: &str,
        description: &str,
        user_id: Option<&str>,
        ip_address: Option<&str>,
        details: Map<String, Value>,
    ) {
        let mut merged = Map::new();
        merged.insert("event_type".to_string(), Value::from(event_type));
        merged.insert("description".to_string(), Value::from(description));
        merged.extend(details);

        let mut event = AuditEvent::new(format!("security_event_{}", event_type), "security")
            .with_details(merged)
            .with_success(false)
            .with_risk_level(RiskLevel::High);
        event.user_id = user_id.map(str::to_string);
        event.ip_address = ip_address.map(str::to_string);
        self.record(event);
    }

    /// Record an API call. Status codes 200-399 count as success.
    pub fn log_api_access(
        &self,
        endpoint: &str,
        method: &str,
        user_id: Option<&str>,
        ip_address: Option<&str>,
        status: u16,
        details: Map<String, Value>,
    ) {
        let ok = (200..400).contains(&status);
        let mut merged = Map::new();
        merged.insert("endpoint".to_string(), Value::from(endpoint));
        merged.insert("method".to_string(), Value::from(method));
        merged.insert("response_code".to_string(), Value::from(status));
        merged.extend(details);

        let mut event = AuditEvent::new(
            format!("api_access_{}", method.to_lowercase()),
            format!("api_endpoint_{}", endpoint),
        )
        .with_details(merged)
        .with_success(ok)
        .with_risk_level(if ok { RiskLevel::Low } else { RiskLevel::Medium });
        event.user_id = user_id.map(str::to_string);
        event.ip_address = ip_address.map(str::to_string);
        self.record(event);
    }

    /// Events written successfully.
    pub fn events_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Events that could not be written.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn write(&self, _event: &AuditEvent) -> SecurityResult<()> {
            Err(SecurityError::new(SecurityErrorKind::AuditWrite(
                "disk full".to_string(),
            )))
        }
    }

    #[test]
    fn test_security_event_shape() {
        let sink = Arc::new(MemorySink::new());
        let logger = AuditLogger::new(sink.clone());
        let mut extra = Map::new();
        extra.insert("attempts".to_string(), Value::from(3));
        logger.log_security_event("brute_force", "Too many logins", Some("u1"), None, extra);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.action(), "security_event_brute_force");
        assert_eq!(event.resource(), "security");
        assert!(!event.success());
        assert_eq!(*event.risk_level(), RiskLevel::High);
        assert_eq!(event.details()["description"], "Too many logins");
        assert_eq!(event.details()["attempts"], 3);
    }

    #[test]
    fn test_api_access_success_range() {
        let sink = Arc::new(MemorySink::new());
        let logger = AuditLogger::new(sink.clone());
        logger.log_api_access("/generate", "POST", None, Some("10.0.0.1"), 201, Map::new());
        logger.log_api_access("/generate", "POST", None, None, 429, Map::new());

        let events = sink.events();
        assert_eq!(events[0].action(), "api_access_post");
        assert_eq!(events[0].resource(), "api_endpoint_/generate");
        assert!(*events[0].success());
        assert_eq!(*events[0].risk_level(), RiskLevel::Low);
        assert!(!events[1].success());
        assert_eq!(*events[1].risk_level(), RiskLevel::Medium);
    }

    #[test]
    fn test_write_failures_are_counted() {
        let logger = AuditLogger::new(Arc::new(FailingSink));
        logger.log_action("publish", "instagram_post", None, Map::new(), true, RiskLevel::Low);
        logger.log_action("publish", "instagram_post", None, Map::new(), true, RiskLevel::Low);
        assert_eq!(logger.write_failures(), 2);
        assert_eq!(logger.events_written(), 0);
    }

    #[test]
    fn test_risk_level_serializes_lowercase() {
        let json = serde_json::to_string(&RiskLevel::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        assert_eq!("medium".parse::<RiskLevel>().unwrap(), RiskLevel::Medium);
    }
}
