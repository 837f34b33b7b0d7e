//! Corpus search capability and an in-memory keyword-ranked corpus.

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// One retrievable piece of course material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusChunk {
    pub course_id: String,
    pub source: String,
    pub text: String,
}

/// A search hit with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub source: String,
    pub text: String,
    pub score: f32,
}

/// Ranked-chunk search over a pre-embedded course corpus.
#[async_trait]
pub trait CorpusSearch: Send + Sync {
    async fn search(
        &self,
        course_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, ApiError>;
}

/// Keyword-overlap ranking over chunks held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    courses: HashMap<String, Vec<CorpusChunk>>,
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: impl IntoIterator<Item = CorpusChunk>) -> Self {
        let mut corpus = Self::new();
        for chunk in chunks {
            corpus.insert(chunk);
        }
        corpus
    }

    /// Load a JSON array of [`CorpusChunk`].
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ApiError::CorpusUnavailable(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let chunks: Vec<CorpusChunk> = serde_json::from_str(&raw).map_err(|e| {
            ApiError::CorpusUnavailable(format!("Invalid corpus file {}: {}", path.display(), e))
        })?;
        Ok(Self::from_chunks(chunks))
    }

    pub fn insert(&mut self, chunk: CorpusChunk) {
        self.courses
            .entry(chunk.course_id.clone())
            .or_default()
            .push(chunk);
    }

    pub fn len(&self) -> usize {
        self.courses.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CorpusSearch for InMemoryCorpus {
    async fn search(
        &self,
        course_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, ApiError> {
        let Some(chunks) = self.courses.get(course_id) else {
            return Ok(Vec::new());
        };
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<ScoredChunk> = chunks
            .iter()
            .filter_map(|chunk| {
                let chunk_terms = terms(&chunk.text);
                let overlap = query_terms.intersection(&chunk_terms).count();
                (overlap > 0).then(|| ScoredChunk {
                    source: chunk.source.clone(),
                    text: chunk.text.clone(),
                    score: overlap as f32 / query_terms.len() as f32,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.source.cmp(&b.source))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
