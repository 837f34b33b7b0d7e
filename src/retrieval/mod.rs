//! Context retrieval: grounds generation in course material.
//!
//! Retrieval is advisory. An unavailable corpus yields an empty, degraded bundle and the run
//! continues. Bundles are cached per (course, lesson) so every attempt of one retry sequence
//! is grounded identically.

pub mod cache;
pub mod corpus;

pub use cache::{CacheKey, CacheStats, ContextCache};
pub use corpus::{CorpusChunk, CorpusSearch, InMemoryCorpus, ScoredChunk};

use crate::error::ApiError;
use crate::lesson::{Citation, LessonSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

fn default_max_chunks() -> usize {
    8
}
fn default_search_timeout_ms() -> u64 {
    5000
}

/// Corpus location and search bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    /// JSON array of corpus chunks; no corpus means ungrounded generation
    #[serde(default)]
    pub corpus_path: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_chunks: default_max_chunks(),
            search_timeout_ms: default_search_timeout_ms(),
            corpus_path: None,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunks == 0 {
            return Err("max_chunks must be at least 1".to_string());
        }
        if self.search_timeout_ms == 0 {
            return Err("search_timeout_ms must be positive".to_string());
        }
        Ok(())
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    /// The configured corpus, or an empty one.
    pub fn load_corpus(&self) -> Result<InMemoryCorpus, ApiError> {
        match &self.corpus_path {
            Some(path) => InMemoryCorpus::load(path),
            None => Ok(InMemoryCorpus::new()),
        }
    }
}

/// A retrieved chunk with its citation marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedChunk {
    pub rank: usize,
    pub citation: Citation,
    pub text: String,
    pub score: f32,
}

/// Ranked context for one lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub chunks: Vec<CitedChunk>,
    /// Fraction of the spec's topics found in the chunks.
    pub coverage: f64,
    pub matched_topics: Vec<String>,
    /// True when the corpus could not be reached.
    pub degraded: bool,
}

impl ContextBundle {
    pub fn unavailable() -> Self {
        Self {
            chunks: Vec::new(),
            coverage: 0.0,
            matched_topics: Vec::new(),
            degraded: true,
        }
    }

    pub fn citations(&self) -> Vec<Citation> {
        self.chunks.iter().map(|c| c.citation.clone()).collect()
    }

    /// Chunks mentioning any term of `text`, best first, at most `limit`.
    pub fn relevant_to(&self, text: &str, limit: usize) -> Vec<&CitedChunk> {
        let needle: Vec<String> = text
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(str::to_lowercase)
            .collect();
        let mut picked: Vec<&CitedChunk> = self
            .chunks
            .iter()
            .filter(|c| {
                let hay = c.text.to_lowercase();
                needle.iter().any(|n| hay.contains(n.as_str()))
            })
            .collect();
        if picked.is_empty() {
            picked = self.chunks.iter().collect();
        }
        picked.truncate(limit);
        picked
    }
}

/// Build a bundle from ranked hits: cite in rank order and score topic coverage.
pub fn bundle_from_hits(hits: Vec<ScoredChunk>, topics: &[String]) -> ContextBundle {
    let chunks: Vec<CitedChunk> = hits
        .into_iter()
        .enumerate()
        .map(|(idx, hit)| CitedChunk {
            rank: idx + 1,
            citation: Citation {
                marker: format!("[{}]", idx + 1),
                source: hit.source,
            },
            text: hit.text,
            score: hit.score,
        })
        .collect();

    let haystack: Vec<String> = chunks.iter().map(|c| c.text.to_lowercase()).collect();
    let matched_topics: Vec<String> = topics
        .iter()
        .filter(|topic| {
            let needle = topic.to_lowercase();
            haystack.iter().any(|text| text.contains(&needle))
        })
        .cloned()
        .collect();
    let coverage = if topics.is_empty() {
        1.0
    } else {
        matched_topics.len() as f64 / topics.len() as f64
    };

    ContextBundle {
        chunks,
        coverage,
        matched_topics,
        degraded: false,
    }
}

pub struct ContextRetriever {
    corpus: Arc<dyn CorpusSearch>,
    cache: Arc<ContextCache>,
    max_chunks: usize,
    search_timeout: Duration,
}

impl ContextRetriever {
    pub fn new(
        corpus: Arc<dyn CorpusSearch>,
        cache: Arc<ContextCache>,
        max_chunks: usize,
        search_timeout: Duration,
    ) -> Self {
        Self {
            corpus,
            cache,
            max_chunks,
            search_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<ContextCache> {
        &self.cache
    }

    /// Cached context for the lesson; computes once per retry sequence.
    pub async fn retrieve(&self, course_id: &str, spec: &LessonSpec) -> Arc<ContextBundle> {
        let key = CacheKey::new(course_id, spec.lesson_id.as_str());
        if let Some(bundle) = self.cache.get(&key) {
            debug!(key = %key, "Context cache hit");
            return bundle;
        }
        let bundle = self.compute(course_id, spec).await;
        self.cache.insert_if_absent(key, bundle)
    }

    /// End of a lesson's retry sequence.
    pub fn release(&self, course_id: &str, lesson_id: &str) {
        self.cache.evict(&CacheKey::new(course_id, lesson_id));
    }

    async fn compute(&self, course_id: &str, spec: &LessonSpec) -> ContextBundle {
        let query = spec.query_text();
        let search = self.corpus.search(course_id, &query, self.max_chunks);
        let result = match tokio::time::timeout(self.search_timeout, search).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::CorpusUnavailable(format!(
                "search exceeded {}ms",
                self.search_timeout.as_millis()
            ))),
        };
        match result {
            Ok(hits) => {
                let bundle = bundle_from_hits(hits, &spec.topics);
                debug!(
                    course_id = %course_id,
                    lesson_id = %spec.lesson_id,
                    chunks = bundle.chunks.len(),
                    coverage = bundle.coverage,
                    "Context retrieved"
                );
                bundle
            }
            Err(err) => {
                warn!(
                    course_id = %course_id,
                    lesson_id = %spec.lesson_id,
                    error = %err,
                    "Corpus unavailable, continuing without context"
                );
                ContextBundle::unavailable()
            }
        }
    }
}
