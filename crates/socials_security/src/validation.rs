//! Input validation against named rule sets.
//!
//! Values are checked in a fixed order: length bounds (in characters),
//! forbidden characters and prohibited patterns against the raw value, then
//! the value is sanitized and the rule's pattern must match the whole
//! sanitized string.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use socials_error::{SecurityError, SecurityErrorKind, SecurityResult};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

/// Markup and whitespace normalizer shared by every rule.
#[derive(Debug, Clone)]
struct Sanitizer {
    script_block: Regex,
    style_block: Regex,
    tag: Regex,
    whitespace: Regex,
}

impl Sanitizer {
    fn new() -> SecurityResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                SecurityError::new(SecurityErrorKind::Configuration(format!(
                    "Invalid sanitizer pattern: {}",
                    e
                )))
            })
        };
        Ok(Self {
            script_block: compile(r"(?is)<script\b[^>]*>.*?</script\s*>")?,
            style_block: compile(r"(?is)<style\b[^>]*>.*?</style\s*>")?,
            tag: compile(r"<[^>]*>")?,
            whitespace: compile(r"\s+")?,
        })
    }

    /// Drops NUL and other control characters, removes script/style blocks
    /// and tag constructs, collapses whitespace runs to one space and trims.
    /// Applying it twice yields the same result as applying it once.
    fn apply(&self, value: &str) -> String {
        let visible: String = value
            .chars()
            .filter(|c| !c.is_control() || c.is_whitespace())
            .collect();
        let without_scripts = self.script_block.replace_all(&visible, "");
        let without_styles = self.style_block.replace_all(&without_scripts, "");
        let without_tags = self.tag.replace_all(&without_styles, "");
        self.whitespace
            .replace_all(&without_tags, " ")
            .trim()
            .to_string()
    }
}

/// A named validation rule.
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
pub struct ValidationRule {
    /// Unique rule name
    #[setters(skip)]
    name: String,
    /// Minimum length in characters
    #[serde(default)]
    #[setters(strip_option)]
    min_length: Option<usize>,
    /// Maximum length in characters
    #[serde(default)]
    #[setters(strip_option)]
    max_length: Option<usize>,
    /// Regex the full sanitized value must match
    #[serde(default)]
    #[setters(strip_option, into)]
    pattern: Option<String>,
    /// Characters rejected anywhere in the raw value
    #[serde(default)]
    #[setters(strip_option, into)]
    forbidden_chars: Option<String>,
    /// Regexes rejected anywhere in the raw value
    #[serde(default)]
    prohibited_patterns: Vec<String>,
    /// Message returned when the pattern or a prohibited pattern matches
    #[setters(into)]
    error_message: String,
}

impl ValidationRule {
    /// Create a rule with no constraints.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_length: None,
            max_length: None,
            pattern: None,
            forbidden_chars: None,
            prohibited_patterns: Vec::new(),
            error_message: "Validation failed".to_string(),
        }
    }
}

/// Outcome of validating one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters)]
pub struct ValidationOutcome {
    /// Whether the value passed
    valid: bool,
    /// Sanitized value, present on success
    #[serde(skip_serializing_if = "Option::is_none")]
    sanitized_value: Option<String>,
    /// Reason, present on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ValidationOutcome {
    fn accept(sanitized: String) -> Self {
        Self {
            valid: true,
            sanitized_value: Some(sanitized),
            error: None,
        }
    }

    fn reject(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            sanitized_value: None,
            error: Some(error.into()),
        }
    }

    /// Convert into a typed error naming `field`.
    pub fn into_result(self, field: &str) -> SecurityResult<String> {
        match (self.valid, self.sanitized_value, self.error) {
            (true, Some(value), _) => Ok(value),
            (_, _, error) => Err(SecurityError::new(SecurityErrorKind::Validation {
                field: field.to_string(),
                reason: error.unwrap_or_else(|| "Validation failed".to_string()),
            })),
        }
    }
}

/// Result of validating several fields at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize, derive_getters::Getters)]
pub struct FieldValidation {
    /// Whether every field passed
    valid: bool,
    /// Errors by field name
    errors: BTreeMap<String, String>,
    /// Sanitized values by field name
    sanitized: BTreeMap<String, String>,
}

#[derive(Debug)]
struct CompiledRule {
    rule: ValidationRule,
    pattern: Option<Regex>,
    prohibited: Vec<Regex>,
}

impl CompiledRule {
    fn compile(rule: ValidationRule) -> SecurityResult<Self> {
        let invalid = |e: regex::Error| {
            SecurityError::new(SecurityErrorKind::Configuration(format!(
                "Invalid pattern in rule '{}': {}",
                rule.name, e
            )))
        };
        let pattern = rule
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(invalid)?;
        let prohibited = rule
            .prohibited_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        Ok(Self {
            rule,
            pattern,
            prohibited,
        })
    }

    fn check(&self, value: &str, sanitizer: &Sanitizer) -> ValidationOutcome {
        let rule = &self.rule;
        let length = value.chars().count();

        if let Some(min) = rule.min_length
            && length < min
        {
            return ValidationOutcome::reject(format!(
                "Value too short (minimum {} characters)",
                min
            ));
        }
        if let Some(max) = rule.max_length
            && length > max
        {
            return ValidationOutcome::reject(format!(
                "Value too long (maximum {} characters)",
                max
            ));
        }

        if let Some(forbidden) = &rule.forbidden_chars
            && value.chars().any(|c| forbidden.contains(c))
        {
            return ValidationOutcome::reject(format!(
                "Value contains forbidden characters: {}",
                forbidden
            ));
        }

        if self.prohibited.iter().any(|re| re.is_match(value)) {
            return ValidationOutcome::reject(rule.error_message.clone());
        }

        let sanitized = sanitizer.apply(value);
        if let Some(pattern) = &self.pattern {
            let full_match = pattern
                .find(&sanitized)
                .is_some_and(|m| m.start() == 0 && m.end() == sanitized.len());
            if !full_match {
                return ValidationOutcome::reject(rule.error_message.clone());
            }
        }

        ValidationOutcome::accept(sanitized)
    }
}

fn builtin_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new("prompt")
            .with_min_length(1)
            .with_max_length(2000)
            .with_forbidden_chars("<>{}[]|\\`")
            .with_prohibited_patterns(vec![
                r"(?i)\b(drop|delete|insert|update|alter|truncate|create)\s+(table|from|into|database)\b"
                    .to_string(),
                r"(?i)\bunion\s+(all\s+)?select\b".to_string(),
                r"(?i)'\s*(or|and)\s+'".to_string(),
                r"'\s*;".to_string(),
                r"--".to_string(),
            ])
            .with_error_message(
                "Prompt must be 1-2000 characters and not contain special characters",
            ),
        ValidationRule::new("api_key")
            .with_min_length(20)
            .with_max_length(200)
            .with_pattern(r"^[a-zA-Z0-9\-_\.]+$")
            .with_error_message("Invalid API key format"),
        ValidationRule::new("user_id")
            .with_min_length(1)
            .with_max_length(100)
            .with_pattern(r"^[a-zA-Z0-9_\-]+$")
            .with_error_message("User ID must be alphanumeric with underscores and hyphens only"),
        ValidationRule::new("filename")
            .with_max_length(255)
            .with_pattern(r"^[a-zA-Z0-9_\-\.]+$")
            .with_forbidden_chars("<>:\"/\\|?*")
            .with_prohibited_patterns(vec![r"\.\.".to_string()])
            .with_error_message("Invalid filename format"),
        ValidationRule::new("hashtag")
            .with_min_length(2)
            .with_max_length(100)
            .with_pattern(r"^#[a-zA-Z0-9_]+$")
            .with_error_message(
                "Hashtag must start with # and contain only alphanumeric characters and underscores",
            ),
        ValidationRule::new("url")
            .with_max_length(2048)
            .with_pattern(r#"^https?://[^\s<>"{}|\\^`\[\]]+$"#)
            .with_error_message("Invalid URL format"),
        ValidationRule::new("email")
            .with_max_length(254)
            .with_pattern(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .with_error_message("Invalid email format"),
    ]
}

/// Validates untrusted strings against registered rules.
///
/// Seeded with the built-in rules (`prompt`, `api_key`, `user_id`,
/// `filename`, `hashtag`, `url`, `email`). Unknown rule names fail closed.
#[derive(Debug)]
pub struct InputValidator {
    rules: RwLock<HashMap<String, CompiledRule>>,
    sanitizer: Sanitizer,
}

impl InputValidator {
    /// Create a validator with the built-in rules registered.
    pub fn new() -> SecurityResult<Self> {
        let mut rules = HashMap::new();
        for rule in builtin_rules() {
            let compiled = CompiledRule::compile(rule)?;
            rules.insert(compiled.rule.name.clone(), compiled);
        }
        Ok(Self {
            rules: RwLock::new(rules),
            sanitizer: Sanitizer::new()?,
        })
    }

    /// Register a rule, replacing any rule with the same name.
    #[instrument(skip(self, rule), fields(rule = %rule.name))]
    pub fn register_rule(&self, rule: ValidationRule) -> SecurityResult<()> {
        let compiled = CompiledRule::compile(rule)?;
        debug!("Registering validation rule");
        self.rules
            .write()
            .insert(compiled.rule.name.clone(), compiled);
        Ok(())
    }

    /// Look up a registered rule.
    pub fn rule(&self, name: &str) -> Option<ValidationRule> {
        self.rules.read().get(name).map(|c| c.rule.clone())
    }

    /// Names of all registered rules, sorted.
    pub fn rule_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rules.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate `value` against the rule named `rule_name`.
    #[instrument(skip(self, value), fields(rule = rule_name, length = value.len()))]
    pub fn validate(&self, value: &str, rule_name: &str) -> ValidationOutcome {
        let rules = self.rules.read();
        let Some(rule) = rules.get(rule_name) else {
            debug!("Unknown validation rule");
            return ValidationOutcome::reject(format!("Unknown validation rule: {}", rule_name));
        };
        let outcome = rule.check(value, &self.sanitizer);
        debug!(valid = outcome.valid, "Validation complete");
        outcome
    }

    /// Sanitize `value` for use under `rule_name`.
    ///
    /// Sanitization is the same for every rule; the name is only recorded
    /// in the trace.
    #[instrument(skip(self, value), fields(rule = rule_name))]
    pub fn sanitize(&self, value: &str, rule_name: &str) -> String {
        self.sanitizer.apply(value)
    }

    /// Validate several `(field, value, rule)` triples.
    pub fn validate_multiple<'a, I>(&self, fields: I) -> FieldValidation
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    {
        let mut result = FieldValidation {
            valid: true,
            ..Default::default()
        };
        for (field, value, rule_name) in fields {
            let outcome = self.validate(value, rule_name);
            match (outcome.sanitized_value, outcome.error) {
                (Some(sanitized), None) if outcome.valid => {
                    result.sanitized.insert(field.to_string(), sanitized);
                }
                (_, error) => {
                    result.valid = false;
                    result.errors.insert(
                        field.to_string(),
                        error.unwrap_or_else(|| "Validation failed".to_string()),
                    );
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_markup() {
        let sanitizer = Sanitizer::new().unwrap();
        assert_eq!(sanitizer.apply("<b>bold</b>  text"), "bold text");
        assert_eq!(sanitizer.apply("<script>alert('x')</script>hello"), "hello");
        assert_eq!(sanitizer.apply("a<style>p{}</style>b"), "ab");
        assert_eq!(sanitizer.apply("  tab\tand\nnewline  "), "tab and newline");
        assert_eq!(sanitizer.apply("nul\0byte"), "nulbyte");
    }

    #[test]
    fn test_sanitize_nested_tags_idempotent() {
        let sanitizer = Sanitizer::new().unwrap();
        let once = sanitizer.apply("<scr<script>x</script>ipt>alert(1)</script>");
        assert_eq!(once, "alert(1)");
        assert_eq!(sanitizer.apply(&once), once);
    }

    #[test]
    fn test_length_counts_characters() {
        let validator = InputValidator::new().unwrap();
        validator
            .register_rule(ValidationRule::new("short").with_max_length(3))
            .unwrap();
        assert!(validator.validate("äöü", "short").valid);
        assert!(!validator.validate("äöüx", "short").valid);
    }

    #[test]
    fn test_error_messages() {
        let validator = InputValidator::new().unwrap();
        let outcome = validator.validate("", "prompt");
        assert_eq!(
            outcome.error().as_deref(),
            Some("Value too short (minimum 1 characters)")
        );
        let outcome = validator.validate(&"a".repeat(2001), "prompt");
        assert_eq!(
            outcome.error().as_deref(),
            Some("Value too long (maximum 2000 characters)")
        );
        let outcome = validator.validate("x", "nope");
        assert_eq!(outcome.error().as_deref(), Some("Unknown validation rule: nope"));
    }

    #[test]
    fn test_invalid_rule_pattern_rejected() {
        let validator = InputValidator::new().unwrap();
        let result = validator.register_rule(ValidationRule::new("bad").with_pattern("("));
        assert!(result.is_err());
        assert!(validator.rule("bad").is_none());
    }

    #[test]
    fn test_outcome_into_result() {
        let validator = InputValidator::new().unwrap();
        let err = validator
            .validate("bad id!", "user_id")
            .into_result("user_id")
            .unwrap_err();
        assert!(matches!(err.kind(), SecurityErrorKind::Validation { field, .. } if field == "user_id"));
        assert!(!err.to_string().contains("bad id!"));
    }
}
