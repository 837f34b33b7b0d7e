//! Lesson document: the candidate produced by the smoother and the accepted output of a run.

use crate::markdown;
use serde::{Deserialize, Serialize};

/// Source reference attached to retrieved context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Marker as it appears in the text, e.g. `[2]`.
    pub marker: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonDocument {
    pub title: String,
    pub markdown: String,
    pub word_count: usize,
    pub citations: Vec<Citation>,
    /// blake3 of the markdown, hex encoded.
    pub fingerprint: String,
}

impl LessonDocument {
    pub fn new(title: impl Into<String>, markdown: impl Into<String>, citations: Vec<Citation>) -> Self {
        let markdown = markdown.into();
        let word_count = markdown::word_count(&markdown);
        let fingerprint = hex::encode(blake3::hash(markdown.as_bytes()).as_bytes());
        Self {
            title: title.into(),
            markdown,
            word_count,
            citations,
            fingerprint,
        }
    }

    /// Short fingerprint for logs and trace events.
    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..self.fingerprint.len().min(12)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_tracks_content() {
        let a = LessonDocument::new("T", "# T\n\nSome words here.", Vec::new());
        let b = LessonDocument::new("T", "# T\n\nSome words here.", Vec::new());
        let c = LessonDocument::new("T", "# T\n\nOther words here.", Vec::new());
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.short_fingerprint().len(), 12);
    }

    #[test]
    fn word_count_ignores_markup() {
        let doc = LessonDocument::new("T", "# Title\n\nOne two three.", Vec::new());
        assert_eq!(doc.word_count, 4);
    }
}
