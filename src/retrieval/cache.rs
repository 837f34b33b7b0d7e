//! Per-lesson context cache.
//!
//! Read-through: a miss computes outside any lock, then the first insert wins and every caller
//! returns the stored bundle. Two workers racing on the same key may both compute, but they
//! observe the same result afterwards.

use crate::retrieval::ContextBundle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache key for one lesson of one course.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub course_id: String,
    pub lesson_id: String,
}

impl CacheKey {
    pub fn new(course_id: impl Into<String>, lesson_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            lesson_id: lesson_id.into(),
        }
    }

    /// Self-delimiting flat form: `<len>:<course><len>:<lesson>`.
    ///
    /// Lengths are byte lengths, so no choice of ids can make two distinct keys collide or
    /// make one key a prefix of another.
    pub fn storage_key(&self) -> String {
        format!(
            "{}:{}{}:{}",
            self.course_id.len(),
            self.course_id,
            self.lesson_id.len(),
            self.lesson_id
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
pub struct ContextCache {
    entries: RwLock<HashMap<CacheKey, Arc<ContextBundle>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<ContextBundle>> {
        let found = self.entries.read().get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store `bundle` unless another caller got there first; returns the stored bundle.
    pub fn insert_if_absent(&self, key: CacheKey, bundle: ContextBundle) -> Arc<ContextBundle> {
        let mut entries = self.entries.write();
        entries.entry(key).or_insert_with(|| Arc::new(bundle)).clone()
    }

    /// Drop the entry once the lesson's retry sequence has ended.
    pub fn evict(&self, key: &CacheKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
