//! Integration tests for the per-lesson retrieval cache
//!
//! Tests cover:
//! - One corpus search per retry sequence
//! - Eviction when the run ends
//! - Concurrent retrieval of the same key
//! - Runs continuing without context when the corpus is down

use crate::integration::test_utils::*;
use async_trait::async_trait;
use lessonsmith::error::ApiError;
use lessonsmith::retrieval::{
    CacheKey, ContextCache, ContextRetriever, CorpusChunk, CorpusSearch, InMemoryCorpus,
    ScoredChunk,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingCorpus {
    inner: InMemoryCorpus,
    calls: AtomicUsize,
    offline: bool,
}

impl CountingCorpus {
    fn new(offline: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryCorpus::from_chunks(vec![
                CorpusChunk {
                    course_id: COURSE.to_string(),
                    source: "notes/loops.md".to_string(),
                    text: "Iteration lets a loop repeat one step over a collection.".to_string(),
                },
                CorpusChunk {
                    course_id: "other-course".to_string(),
                    source: "notes/other.md".to_string(),
                    text: "Iteration in another course.".to_string(),
                },
            ]),
            calls: AtomicUsize::new(0),
            offline,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CorpusSearch for CountingCorpus {
    async fn search(
        &self,
        course_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(ApiError::CorpusUnavailable("index offline".to_string()));
        }
        self.inner.search(course_id, query, limit).await
    }
}

#[tokio::test]
async fn corpus_is_searched_once_across_regenerations() {
    let corpus = CountingCorpus::new(false);
    let cache = ContextCache::shared();
    let client = ScriptedClient::new(Script::smoothing(&[
        broken_lesson(),
        broken_lesson(),
        clean_lesson(),
    ]));
    let pipeline = pipeline_with(client, &test_config(), corpus.clone(), cache.clone());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    assert!(report.is_accepted());
    assert_eq!(report.attempts, 3);
    assert_eq!(corpus.calls(), 1);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
    // released when the run ended
    assert_eq!(stats.entries, 0);
}

#[tokio::test]
async fn rejected_runs_release_their_entry_too() {
    let corpus = CountingCorpus::new(false);
    let cache = ContextCache::shared();
    let client = ScriptedClient::new(Script::smoothing(&[broken_lesson()]));
    let pipeline = pipeline_with(client, &test_config(), corpus.clone(), cache.clone());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    assert!(!report.is_accepted());
    assert_eq!(corpus.calls(), 1);
    assert_eq!(cache.stats().entries, 0);
}

#[tokio::test]
async fn concurrent_retrievals_observe_one_bundle() {
    let corpus = CountingCorpus::new(false);
    let cache = ContextCache::shared();
    let retriever = Arc::new(ContextRetriever::new(
        corpus.clone(),
        cache.clone(),
        4,
        Duration::from_secs(1),
    ));
    let spec = lesson_spec("loops");

    let (a, b) = tokio::join!(
        retriever.retrieve(COURSE, &spec),
        retriever.retrieve(COURSE, &spec)
    );

    assert_eq!(a, b);
    assert!(corpus.calls() >= 1);
    assert_eq!(a.chunks.len(), 1);
    assert_eq!(a.chunks[0].citation.source, "notes/loops.md");
    assert_eq!(a.matched_topics, vec!["iteration".to_string()]);

    let again = retriever.retrieve(COURSE, &spec).await;
    assert!(Arc::ptr_eq(&again, &cache.get(&CacheKey::new(COURSE, "loops")).unwrap()));
    let calls = corpus.calls();
    retriever.retrieve(COURSE, &spec).await;
    assert_eq!(corpus.calls(), calls);
}

#[tokio::test]
async fn lessons_are_cached_independently() {
    let corpus = CountingCorpus::new(false);
    let cache = ContextCache::shared();
    let retriever = ContextRetriever::new(corpus.clone(), cache.clone(), 4, Duration::from_secs(1));

    retriever.retrieve(COURSE, &lesson_spec("loops")).await;
    retriever.retrieve(COURSE, &lesson_spec("closures")).await;
    retriever.retrieve("other-course", &lesson_spec("loops")).await;

    assert_eq!(corpus.calls(), 3);
    assert_eq!(cache.stats().entries, 3);
    retriever.release(COURSE, "loops");
    assert_eq!(cache.stats().entries, 2);
    assert!(cache.get(&CacheKey::new("other-course", "loops")).is_some());
}

#[tokio::test]
async fn offline_corpus_degrades_without_failing_the_run() {
    let corpus = CountingCorpus::new(true);
    let cache = ContextCache::shared();
    let client = ScriptedClient::new(Script::smoothing(&[clean_lesson()]));
    let pipeline = pipeline_with(client, &test_config(), corpus.clone(), cache.clone());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    assert!(report.is_accepted());
    assert_eq!(corpus.calls(), 1);
    assert!(report.document.unwrap().citations.is_empty());
}
