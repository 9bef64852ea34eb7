//! Keyword-based moderation of generated captions and hashtags.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

/// Inappropriate score above which text is unsafe.
pub const UNSAFE_THRESHOLD: f64 = 0.7;
/// Inappropriate score above which text gets a warning.
pub const WARNING_THRESHOLD: f64 = 0.3;

const INAPPROPRIATE: &[(&str, &[&str])] = &[
    (
        "spam",
        &["spam", "scam", "fake", "bot", "follow4follow", "f4f", "l4l"],
    ),
    (
        "offensive",
        &["hate", "racist", "sexist", "discrimination", "harassment"],
    ),
    ("adult", &["adult", "nsfw", "explicit", "sexual"]),
    ("violence", &["violence", "kill", "death", "murder", "weapon"]),
    ("illegal", &["illegal", "drugs", "piracy", "fraud", "stolen"]),
    (
        "misleading",
        &["miracle", "guaranteed", "instant", "secret", "hack"],
    ),
];

const BRAND_UNSAFE: &[&str] = &[
    "controversy",
    "scandal",
    "lawsuit",
    "bankruptcy",
    "crisis",
    "disaster",
    "tragedy",
    "accident",
    "emergency",
];

const QUALITY_INDICATORS: &[&str] = &[
    "authentic",
    "genuine",
    "honest",
    "transparent",
    "valuable",
    "helpful",
    "informative",
    "inspiring",
    "creative",
    "original",
];

const ENGAGEMENT_RED_FLAGS: &[&str] = &[
    "like if",
    "comment if",
    "follow me",
    "check my bio",
    "link in bio",
    "dm me",
    "click link",
    "swipe up",
];

const GENERIC_HASHTAGS: &[&str] = &[
    "#love",
    "#instagood",
    "#photooftheday",
    "#beautiful",
    "#happy",
];

/// Outcome of a moderation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_getters::Getters)]
pub struct ModerationResult {
    /// No blocking issues were found
    is_safe: bool,
    /// Confidence in the assessment, 0 to 1
    confidence_score: f64,
    /// Blocking problems
    issues: Vec<String>,
    /// Non-blocking concerns
    warnings: Vec<String>,
    /// Categories that were flagged
    categories: Vec<String>,
    /// Individual scores
    details: Map<String, Value>,
}

/// Scores captions and hashtags against keyword tables.
///
/// Text keywords match whole words, so "skill" does not trip "kill". Each
/// matched inappropriate keyword adds `keyword_weight` to the inappropriate
/// score, capped at 1.
#[derive(Debug, Clone, derive_getters::Getters, derive_setters::Setters)]
#[setters(prefix = "with_")]
pub struct ContentModerator {
    /// Score added per matched inappropriate keyword
    keyword_weight: f64,
    /// Hashtag count above which a list looks spammy
    max_hashtags: usize,
    /// Share of generic hashtags above which a warning is raised
    generic_ratio_limit: f64,
}

impl ContentModerator {
    /// Create a moderator with the built-in tables.
    pub fn new() -> Self {
        Self {
            keyword_weight: 0.25,
            max_hashtags: 30,
            generic_ratio_limit: 0.7,
        }
    }

    /// Assess caption or prompt text. `context` only labels the trace.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub fn moderate_text(&self, text: &str, context: Option<&str>) -> ModerationResult {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let word_set: HashSet<&str> = words.iter().copied().collect();

        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let mut categories = Vec::new();
        let mut details = Map::new();

        let (inappropriate, flagged) = self.inappropriate_score(&word_set);
        if inappropriate > UNSAFE_THRESHOLD {
            issues.push("Contains potentially inappropriate content".to_string());
            categories.push("inappropriate".to_string());
            categories.extend(flagged.iter().map(|c| c.to_string()));
        } else if inappropriate > WARNING_THRESHOLD {
            warnings.push("May contain questionable content".to_string());
        }
        details.insert("inappropriate_score".to_string(), Value::from(inappropriate));

        let brand_safety = brand_safety_score(&word_set);
        if brand_safety < 0.5 {
            warnings.push("Content may not be brand-safe".to_string());
            categories.push("brand_risk".to_string());
        }
        details.insert("brand_safety_score".to_string(), Value::from(brand_safety));

        let quality = quality_score(&lower, &words, &word_set);
        if quality < 0.3 {
            warnings.push("Content quality may be low".to_string());
        }
        details.insert("quality_score".to_string(), Value::from(quality));

        let engagement = engagement_manipulation_score(&lower);
        if engagement > 0.5 {
            warnings.push("Contains potential engagement manipulation tactics".to_string());
            categories.push("engagement_manipulation".to_string());
        }
        details.insert(
            "engagement_manipulation_score".to_string(),
            Value::from(engagement),
        );

        warnings.extend(structure_warnings(text));

        let is_safe = issues.is_empty();
        let confidence_score = brand_safety.min(1.0 - inappropriate).min(quality);
        debug!(
            is_safe,
            confidence_score,
            issues = issues.len(),
            warnings = warnings.len(),
            context,
            "Content moderation completed"
        );

        ModerationResult {
            is_safe,
            confidence_score,
            issues,
            warnings,
            categories,
            details,
        }
    }

    /// Assess a hashtag list. Any hashtag containing an inappropriate
    /// keyword makes the list unsafe.
    #[instrument(skip(self, hashtags), fields(count = hashtags.len()))]
    pub fn moderate_hashtags<S: AsRef<str>>(&self, hashtags: &[S]) -> ModerationResult {
        let tags: Vec<&str> = hashtags.iter().map(AsRef::<str>::as_ref).collect();
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let mut categories = Vec::new();

        let inappropriate: Vec<String> = tags
            .iter()
            .copied()
            .filter(|tag| {
                let clean = tag.replace('#', "").to_lowercase();
                INAPPROPRIATE
                    .iter()
                    .flat_map(|(_, keywords)| keywords.iter())
                    .any(|keyword| clean.contains(*keyword))
            })
            .map(str::to_string)
            .collect();

        if !inappropriate.is_empty() {
            issues.push(format!(
                "Inappropriate hashtags detected: {}",
                inappropriate.join(", ")
            ));
            categories.push("inappropriate_hashtags".to_string());
        }

        if tags.len() > self.max_hashtags {
            warnings.push("Excessive number of hashtags may appear spammy".to_string());
        }

        let generic = tags
            .iter()
            .filter(|tag| GENERIC_HASHTAGS.contains(&tag.to_lowercase().as_str()))
            .count();
        let generic_ratio = if tags.is_empty() {
            0.0
        } else {
            generic as f64 / tags.len() as f64
        };
        if generic_ratio > self.generic_ratio_limit {
            warnings.push("Too many generic hashtags, consider more specific ones".to_string());
        }

        let confidence_score = if tags.is_empty() {
            1.0
        } else {
            1.0 - inappropriate.len() as f64 / tags.len() as f64
        };

        let mut details = Map::new();
        details.insert(
            "inappropriate_hashtags".to_string(),
            Value::from(inappropriate),
        );
        details.insert("generic_ratio".to_string(), Value::from(generic_ratio));

        ModerationResult {
            is_safe: issues.is_empty(),
            confidence_score,
            issues,
            warnings,
            categories,
            details,
        }
    }

    fn inappropriate_score(&self, words: &HashSet<&str>) -> (f64, Vec<&'static str>) {
        let mut hits_by_category: HashMap<&'static str, usize> = HashMap::new();
        for (category, keywords) in INAPPROPRIATE {
            let hits = keywords.iter().filter(|k| words.contains(*k)).count();
            if hits > 0 {
                hits_by_category.insert(*category, hits);
            }
        }
        let hits: usize = hits_by_category.values().sum();
        let mut flagged: Vec<&'static str> = hits_by_category.into_keys().collect();
        flagged.sort_unstable();
        ((hits as f64 * self.keyword_weight).min(1.0), flagged)
    }
}

impl Default for ContentModerator {
    fn default() -> Self {
        Self::new()
    }
}

fn brand_safety_score(words: &HashSet<&str>) -> f64 {
    let unsafe_count = BRAND_UNSAFE.iter().filter(|k| words.contains(*k)).count();
    let indicators = QUALITY_INDICATORS
        .iter()
        .filter(|k| words.contains(*k))
        .count();
    if unsafe_count > 0 {
        (0.5 - unsafe_count as f64 * 0.2).max(0.0)
    } else {
        (0.7 + indicators as f64 * 0.1).min(1.0)
    }
}

fn quality_score(lower: &str, words: &[&str], word_set: &HashSet<&str>) -> f64 {
    let mut score = 0.5;
    score += QUALITY_INDICATORS
        .iter()
        .filter(|k| word_set.contains(*k))
        .count() as f64
        * 0.1;
    if lower.split('.').count() > 1 {
        score += 0.1;
    }
    if !words.is_empty() {
        score += word_set.len() as f64 / words.len() as f64 * 0.2;
    }
    if words.len() > 10 {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for word in words {
            *counts.entry(word).or_insert(0) += 1;
        }
        let max_repetition = counts.values().copied().max().unwrap_or(1);
        if max_repetition as f64 > words.len() as f64 * 0.3 {
            score -= 0.2;
        }
    }
    score.clamp(0.0, 1.0)
}

fn engagement_manipulation_score(lower: &str) -> f64 {
    let hits = ENGAGEMENT_RED_FLAGS
        .iter()
        .filter(|phrase| lower.contains(*phrase))
        .count();
    (hits as f64 * 0.3).min(1.0)
}

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F600..=0x1F64F | 0x1F300..=0x1F5FF | 0x1F680..=0x1F6FF | 0x1F1E0..=0x1F1FF
    )
}

fn structure_warnings(text: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    let chars = text.chars().count();

    let has_letters = text.chars().any(char::is_alphabetic);
    if has_letters && chars > 20 && !text.chars().any(char::is_lowercase) {
        warnings.push("Excessive use of capital letters".to_string());
    }

    let punctuation = text.chars().filter(|c| matches!(c, '!' | '?' | '.')).count();
    if punctuation as f64 > chars as f64 * 0.1 {
        warnings.push("Excessive punctuation usage".to_string());
    }

    let mut emoji_runs = 0;
    let mut in_run = false;
    for c in text.chars() {
        let emoji = is_emoji(c);
        if emoji && !in_run {
            emoji_runs += 1;
        }
        in_run = emoji;
    }
    if emoji_runs as f64 > text.split_whitespace().count() as f64 * 0.5 {
        warnings.push("Excessive emoji usage".to_string());
    }

    warnings
}
