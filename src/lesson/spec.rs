//! Lesson specification: the immutable input of one generation run.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_target_words() -> usize {
    900
}

/// What to generate for one lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonSpec {
    pub lesson_id: String,
    pub title: String,
    /// Target length of the finished lesson, in words.
    #[serde(default = "default_target_words")]
    pub target_words: usize,
    #[serde(default)]
    pub audience: Option<String>,
    /// Pedagogical objectives the lesson must meet.
    #[serde(default)]
    pub objectives: Vec<String>,
    /// Topic keywords expected in both the grounding context and the lesson text.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Tone and style directives passed to drafting prompts.
    #[serde(default)]
    pub style: Vec<String>,
    /// Section headings the lesson must contain.
    #[serde(default)]
    pub required_sections: Vec<String>,
}

impl LessonSpec {
    pub fn from_toml_str(raw: &str) -> Result<Self, ApiError> {
        toml::from_str(raw)
            .map_err(|e| ApiError::InvalidSpec(format!("Failed to parse lesson spec: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ApiError::InvalidSpec(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject specs no stage could work from.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.lesson_id.trim().is_empty() {
            return Err(ApiError::InvalidSpec("lesson_id cannot be empty".to_string()));
        }
        if self.lesson_id.chars().any(char::is_control) {
            return Err(ApiError::InvalidSpec(
                "lesson_id cannot contain control characters".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(ApiError::InvalidSpec("title cannot be empty".to_string()));
        }
        if self.target_words == 0 {
            return Err(ApiError::InvalidSpec(
                "target_words must be greater than zero".to_string(),
            ));
        }
        if self.objectives.is_empty() && self.required_sections.is_empty() {
            return Err(ApiError::InvalidSpec(
                "spec needs at least one objective or required section".to_string(),
            ));
        }
        if self
            .required_sections
            .iter()
            .chain(self.topics.iter())
            .any(|s| s.trim().is_empty())
        {
            return Err(ApiError::InvalidSpec(
                "required sections and topics cannot be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Retrieval query text: title, objectives and topics.
    pub fn query_text(&self) -> String {
        let mut parts = vec![self.title.clone()];
        parts.extend(self.objectives.iter().cloned());
        parts.extend(self.topics.iter().cloned());
        parts.join(" ")
    }
}
