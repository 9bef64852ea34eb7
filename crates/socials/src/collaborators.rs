//! External services the pipeline drives.
//!
//! Image and caption generation and Instagram publishing live outside this
//! workspace. The pipeline only sees these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use socials_error::CollaboratorResult;

/// Image and caption produced by a generator.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
    derive_new::new,
)]
#[setters(prefix = "with_")]
pub struct GeneratedContent {
    /// Path of the generated image
    #[setters(into)]
    image_path: String,
    /// Caption text without hashtags
    #[setters(into)]
    caption: String,
    /// Hashtags, each starting with `#`
    #[new(default)]
    #[serde(default)]
    hashtags: Vec<String>,
}

impl GeneratedContent {
    /// Caption followed by its hashtags, as posted.
    pub fn full_caption(&self) -> String {
        if self.hashtags.is_empty() {
            self.caption.clone()
        } else {
            format!("{}\n\n{}", self.caption, self.hashtags.join(" "))
        }
    }
}

/// Produces an image and caption from a prompt.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate content for `prompt` in the given caption `style`.
    async fn generate(
        &self,
        prompt: &str,
        style: &str,
        theme: Option<&str>,
    ) -> CollaboratorResult<GeneratedContent>;
}

/// Posts an image with a caption and returns the post identifier.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `image_path` with `caption`.
    async fn publish(&self, image_path: &str, caption: &str) -> CollaboratorResult<String>;
}

/// Hashtags in `text`: whitespace-separated words starting with `#`.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|word| word.starts_with('#') && word.len() > 1)
        .map(|word| {
            word.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_')
                .to_string()
        })
        .filter(|tag| tag.len() > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_caption_appends_hashtags() {
        let content = GeneratedContent::new("img.png".to_string(), "Golden hour".to_string());
        assert_eq!(content.full_caption(), "Golden hour");

        let tagged = content.with_hashtags(vec!["#sunset".to_string(), "#dogs".to_string()]);
        assert_eq!(tagged.full_caption(), "Golden hour\n\n#sunset #dogs");
    }

    #[test]
    fn test_extract_hashtags() {
        let tags = extract_hashtags("Sunflowers! #sunset, #dogs_life and # alone #");
        assert_eq!(tags, vec!["#sunset", "#dogs_life"]);
    }
}
