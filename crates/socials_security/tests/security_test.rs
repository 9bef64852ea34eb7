//! Integration tests for the socials security layer.

use serde_json::{Map, Value};
use socials_security::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

// ============================================================================
// Input Validation Tests
// ============================================================================

const INJECTION_CORPUS: &[&str] = &[
    "<script>alert('xss')</script>",
    "'; DROP TABLE users; --",
    "1' OR '1'='1",
    "<img src=x onerror=alert(1)>",
    "admin' --",
    "1 UNION SELECT password FROM users",
];

#[test]
fn test_injection_corpus_rejected_for_prompt() {
    let validator = InputValidator::new().unwrap();
    for payload in INJECTION_CORPUS {
        let outcome = validator.validate(payload, "prompt");
        assert!(!outcome.valid(), "payload accepted: {}", payload);
        assert!(outcome.sanitized_value().is_none());
        let reason = outcome.error().as_deref().unwrap();
        assert!(!reason.contains(payload), "reason echoes payload: {}", reason);
    }
}

#[test]
fn test_ordinary_prompt_accepted() {
    let validator = InputValidator::new().unwrap();
    let outcome = validator.validate("  A misty   forest at dawn, watercolor  ", "prompt");
    assert!(*outcome.valid());
    assert_eq!(
        outcome.sanitized_value().as_deref(),
        Some("A misty forest at dawn, watercolor")
    );
}

#[test]
fn test_sanitize_is_idempotent() {
    let validator = InputValidator::new().unwrap();
    let inputs = [
        "plain text",
        "  spaced \t out \n text ",
        "<b>bold</b> and <i>italic</i>",
        "<script>alert('xss')</script>after",
        "<style>body{}</style>styled",
        "<<a>>nested<</a>>",
        "a < b > c",
        "",
    ];
    for input in inputs {
        let once = validator.sanitize(input, "prompt");
        let twice = validator.sanitize(&once, "prompt");
        assert_eq!(once, twice, "not idempotent for {:?}", input);
    }
}

#[test]
fn test_hashtag_scenario() {
    let validator = InputValidator::new().unwrap();
    assert!(*validator.validate("#sunset", "hashtag").valid());
    assert!(!validator.validate("sunset", "hashtag").valid());
    assert!(!validator.validate("#sun set", "hashtag").valid());
}

#[test]
fn test_markup_reduced_before_pattern_match() {
    let validator = InputValidator::new().unwrap();
    let outcome = validator.validate("<b>#sunset</b>", "hashtag");
    assert!(*outcome.valid());
    assert_eq!(outcome.sanitized_value().as_deref(), Some("#sunset"));
}

#[test]
fn test_unknown_rule_fails_closed() {
    let validator = InputValidator::new().unwrap();
    let outcome = validator.validate("anything", "no_such_rule");
    assert!(!outcome.valid());
    assert_eq!(
        outcome.error().as_deref(),
        Some("Unknown validation rule: no_such_rule")
    );
}

#[test]
fn test_builtin_rules() {
    let validator = InputValidator::new().unwrap();
    assert!(*validator.validate("user_123-abc", "user_id").valid());
    assert!(!validator.validate("user 123", "user_id").valid());
    assert!(*validator.validate("photo_01.png", "filename").valid());
    assert!(!validator.validate("../etc/passwd", "filename").valid());
    assert!(!validator.validate("dir/photo.png", "filename").valid());
    assert!(*validator.validate("https://example.com/a?b=c", "url").valid());
    assert!(!validator.validate("ftp://example.com", "url").valid());
    assert!(*validator.validate("someone@example.org", "email").valid());
    assert!(!validator.validate("someone@", "email").valid());
    assert!(*validator.validate("sk-abcdefghijklmnopqrstuvwxyz", "api_key").valid());
    assert!(!validator.validate("short", "api_key").valid());
}

#[test]
fn test_custom_rule_registration() {
    let validator = InputValidator::new().unwrap();
    validator
        .register_rule(
            ValidationRule::new("style")
                .with_min_length(3)
                .with_max_length(20)
                .with_pattern(r"^[a-z_]+$")
                .with_error_message("Unknown style"),
        )
        .unwrap();
    assert!(validator.rule_names().contains(&"style".to_string()));
    assert!(*validator.validate("watercolor", "style").valid());
    assert_eq!(
        validator.validate("Water Color", "style").error().as_deref(),
        Some("Unknown style")
    );

    let broken = ValidationRule::new("broken").with_pattern("(unclosed");
    assert!(validator.register_rule(broken).is_err());
}

#[test]
fn test_validate_multiple_collects_errors() {
    let validator = InputValidator::new().unwrap();
    let result = validator.validate_multiple([
        ("user", "user_1", "user_id"),
        ("tag", "nohash", "hashtag"),
    ]);
    assert!(!result.valid());
    assert_eq!(result.sanitized()["user"], "user_1");
    assert!(result.errors().contains_key("tag"));
}

#[test]
fn test_validation_outcome_serialization() {
    let validator = InputValidator::new().unwrap();
    let ok = serde_json::to_value(validator.validate("#tag", "hashtag")).unwrap();
    assert_eq!(ok["valid"], true);
    assert_eq!(ok["sanitized_value"], "#tag");
    assert!(ok.get("error").is_none());

    let bad = serde_json::to_value(validator.validate("tag", "hashtag")).unwrap();
    assert_eq!(bad["valid"], false);
    assert!(bad.get("sanitized_value").is_none());
    assert!(bad["error"].is_string());
}

// ============================================================================
// Rate Limiter Tests
// ============================================================================

fn limiter_with(name: &str, config: RateLimitConfig) -> RateLimiter {
    RateLimiter::with_limits(HashMap::from([(name.to_string(), config)]))
}

#[test]
fn test_threshold_allows_n_rejects_n_plus_one() {
    let limiter = limiter_with("test", RateLimitConfig::new(3, 60));
    for i in 1..=3 {
        let decision = limiter.is_allowed("alice", "test");
        assert!(*decision.allowed(), "call {} rejected", i);
        assert_eq!(*decision.current_requests(), i);
        assert_eq!(*decision.remaining_requests(), 3 - i);
    }
    let rejected = limiter.is_allowed("alice", "test");
    assert!(!rejected.allowed());
    assert!(rejected.retry_after().unwrap() > 0);
    assert!(rejected.blocked_until().is_some());
}

#[test]
fn test_identifiers_are_isolated() {
    let limiter = limiter_with("test", RateLimitConfig::new(2, 60));
    for _ in 0..3 {
        limiter.is_allowed("alice", "test");
    }
    assert!(!limiter.is_allowed("alice", "test").allowed());
    assert!(*limiter.is_allowed("bob", "test").allowed());
    assert!(*limiter.is_allowed("bob", "test").allowed());
}

#[test]
fn test_reset_clears_window_and_block() {
    let limiter = limiter_with("test", RateLimitConfig::new(2, 60));
    for _ in 0..3 {
        limiter.is_allowed("alice", "test");
    }
    assert!(!limiter.is_allowed("alice", "test").allowed());

    limiter.reset_limit("alice");
    let decision = limiter.is_allowed("alice", "test");
    assert!(*decision.allowed());
    assert_eq!(*decision.current_requests(), 1);
}

#[test]
fn test_generation_burst_scenario() {
    let limiter = RateLimiter::new();
    for i in 1..=5 {
        assert!(
            *limiter.is_allowed("user_123", "api_generation").allowed(),
            "call {} rejected",
            i
        );
    }
    let sixth = limiter.is_allowed("user_123", "api_generation");
    assert!(!sixth.allowed());
    assert_eq!(*sixth.current_requests(), 5);
    assert_eq!(*sixth.max_requests(), 20);
    assert!(sixth.retry_after().unwrap() > 0);
    assert!(sixth.blocked_until().is_none());
}

#[test]
fn test_default_limits_match_published_thresholds() {
    let limits = default_limits();
    let max = |name: &str| *limits[name].max_requests();
    assert_eq!(max("api_general"), 100);
    assert_eq!(max("api_generation"), 20);
    assert_eq!(*limits["api_generation"].burst_limit(), Some(5));
    assert_eq!(max("api_publishing"), 10);
    assert_eq!(max("login_attempts"), 5);
    assert_eq!(*limits["login_attempts"].time_window(), 900);
    assert_eq!(max("content_moderation"), 1000);
}

#[test]
fn test_custom_limit_must_be_valid() {
    let limiter = RateLimiter::new();
    assert!(limiter.add_custom_limit("zero", RateLimitConfig::new(0, 60)).is_err());
    assert!(
        limiter
            .add_custom_limit("burst", RateLimitConfig::new(5, 60).with_burst_limit(10))
            .is_err()
    );
    limiter
        .add_custom_limit("webhook", RateLimitConfig::new(2, 60))
        .unwrap();
    assert_eq!(*limiter.limit("webhook").unwrap().max_requests(), 2);
}

#[test]
fn test_stats_report_active_and_blocked() {
    let limiter = limiter_with("test", RateLimitConfig::new(1, 60));
    limiter.is_allowed("alice", "test");
    limiter.is_allowed("alice", "test");
    limiter.is_allowed("bob", "test");

    let stats = limiter.get_stats();
    assert_eq!(*stats.active_limits(), 2);
    assert_eq!(*stats.blocked_identifiers(), 1);
    assert_eq!(*stats.limit_types(), 1);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["active_limits"], 2);
    assert_eq!(json["blocked_identifiers"], 1);
}

#[test]
fn test_concurrent_callers_admit_exactly_max() {
    let limiter = Arc::new(limiter_with("shared", RateLimitConfig::new(50, 3600)));
    let admitted = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    if *limiter.is_allowed("bot", "shared").allowed() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 50);
}

#[test]
fn test_rate_limit_error_carries_retry_after() {
    let limiter = limiter_with("test", RateLimitConfig::new(1, 60));
    limiter.is_allowed("alice", "test");
    let err = limiter
        .is_allowed("alice", "test")
        .into_result("test")
        .unwrap_err();
    assert_eq!(err.retry_after_secs(), Some(300));
}

// ============================================================================
// Audit Tests
// ============================================================================

#[test]
fn test_audit_lines_are_json_with_utc_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("audit.jsonl");
    let logger = AuditLogger::with_file(&path).unwrap();

    logger.log_action(
        "generate",
        "instagram_post",
        Some("user_123"),
        Map::new(),
        true,
        RiskLevel::Low,
    );
    logger.log_security_event("login_failed", "Bad password", None, Some("10.0.0.7"), Map::new());
    assert_eq!(logger.events_written(), 2);

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in &lines {
        let value: Value = serde_json::from_str(line).unwrap();
        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(timestamp.ends_with('Z'), "timestamp not UTC: {}", timestamp);
        assert!(value["risk_level"].is_string());
    }
    let second: Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["risk_level"], "high");
    assert_eq!(second["ip_address"], "10.0.0.7");
    assert_eq!(second["success"], false);
}

#[test]
fn test_audit_file_is_appended_across_loggers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    {
        let logger = AuditLogger::with_file(&path).unwrap();
        logger.log_action("a", "r", None, Map::new(), true, RiskLevel::Low);
    }
    let logger = AuditLogger::with_file(&path).unwrap();
    logger.log_action("b", "r", None, Map::new(), true, RiskLevel::Low);

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 2);
}

#[test]
fn test_concurrent_audit_writers_produce_whole_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let logger = Arc::new(AuditLogger::with_file(&path).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let mut details = Map::new();
                    details.insert("thread".to_string(), Value::from(t));
                    details.insert("seq".to_string(), Value::from(i));
                    logger.log_action("tick", "test", None, details, true, RiskLevel::Low);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    let parsed: Vec<Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(parsed.len(), 100);
}

// ============================================================================
// Encryption Tests
// ============================================================================

#[test]
fn test_encryption_round_trip() {
    let manager = EncryptionManager::new();
    let long = "x".repeat(4096);
    for plaintext in ["", "a", "instagram token", "ünïcødé ✓", long.as_str()] {
        let ciphertext = manager.encrypt(plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        assert_eq!(manager.decrypt(&ciphertext).unwrap(), plaintext);
    }
}

#[test]
fn test_encryption_is_non_deterministic() {
    let manager = EncryptionManager::new();
    let a = manager.encrypt("same value").unwrap();
    let b = manager.encrypt("same value").unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_wrong_key_fails() {
    let first = EncryptionManager::new();
    let second = EncryptionManager::new();
    let ciphertext = first.encrypt("secret").unwrap();
    let err = second.decrypt(&ciphertext).unwrap_err();
    assert!(!err.to_string().contains("secret"));
}

#[test]
fn test_dict_round_trip() {
    let manager = EncryptionManager::new();
    let mut data = Map::new();
    data.insert("access_token".to_string(), Value::from("abc123"));
    data.insert("expires_in".to_string(), Value::from(3600));

    let ciphertext = manager.encrypt_dict(&data).unwrap();
    assert!(!ciphertext.contains("abc123"));
    assert_eq!(manager.decrypt_dict(&ciphertext).unwrap(), data);
}

#[test]
fn test_password_hash_with_given_salt_is_stable() {
    let first = EncryptionManager::hash_data("token", Some("fixed-salt"));
    let second = EncryptionManager::hash_data("token", Some("fixed-salt"));
    assert_eq!(first, second);
    assert!(EncryptionManager::verify_hash("token", first.hash(), "fixed-salt"));
}

// ============================================================================
// Moderation Tests
// ============================================================================

#[test]
fn test_spammy_text_flagged() {
    let moderator = ContentModerator::new();
    let result = moderator.moderate_text(
        "Spam scam fake bot giveaway, guaranteed miracle results",
        None,
    );
    assert!(!result.is_safe());
    assert!(result.categories().contains(&"inappropriate".to_string()));
}

#[test]
fn test_clean_text_passes() {
    let moderator = ContentModerator::new();
    let result = moderator.moderate_text(
        "An original, inspiring sunrise over the harbor this morning.",
        Some("caption"),
    );
    assert!(*result.is_safe());
    assert!(result.issues().is_empty());
}

#[test]
fn test_inappropriate_hashtag_flagged() {
    let moderator = ContentModerator::new();
    let result = moderator.moderate_hashtags(&["#sunset", "#f4f", "#travel"]);
    assert!(!result.is_safe());
    assert_eq!(result.issues().len(), 1);
    assert!(result.issues()[0].contains("#f4f"));
}

// ============================================================================
// Review Tests
// ============================================================================

#[test]
fn test_review_workflow() {
    let queue = ReviewQueue::new();
    let draft = ReviewDraft::new("instagram_post".to_string())
        .with_caption("Golden hour")
        .with_prompt("sunset over hills");
    let id = queue.submit(draft);

    assert!(queue.check(&id).is_err());
    queue
        .modify(&id, "editor", "Golden hour over the hills")
        .unwrap();
    let approved = queue.check(&id).unwrap();
    assert_eq!(approved.final_caption(), Some("Golden hour over the hills"));
    assert!(queue.approve(&id, "editor", None).is_err());
    assert_eq!(*queue.stats().modified_count(), 1);
}

// ============================================================================
// Security Context Tests
// ============================================================================

#[test]
fn test_context_gates_requests() {
    let sink = Arc::new(MemorySink::new());
    let context = SecurityContext::new(AuditLogger::new(sink.clone())).unwrap();

    let inputs = context
        .validate_inputs(&[("prompt", "quiet harbor at dawn", "prompt")])
        .unwrap();
    assert_eq!(inputs["prompt"], "quiet harbor at dawn");

    for _ in 0..5 {
        context.check_rate_limit("user_123", "api_generation").unwrap();
    }
    let err = context
        .check_rate_limit("user_123", "api_generation")
        .unwrap_err();
    assert!(err.retry_after_secs().unwrap() > 0);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(*events[0].risk_level(), RiskLevel::High);
    assert_eq!(events[0].user_id().as_deref(), Some("user_123"));
}
