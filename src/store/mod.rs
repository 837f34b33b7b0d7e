//! Durable run store on sled.
//!
//! One record per lesson run sequence plus its ordered transition events. Both trees are keyed
//! by the length-prefixed (course, lesson) key, so ids may contain any character.

use crate::error::{ApiError, StorageError};
use crate::evaluation::{Issue, Verdict};
use crate::lesson::LessonDocument;
use crate::pipeline::{FailureReason, RunPhase, RunReport};
use crate::usage::CostSummary;
use crate::retrieval::CacheKey;
use crate::telemetry::{ProgressSink, TransitionEvent};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use std::path::Path;
use std::sync::Arc;

const TREE_RUNS: &str = "runs";
const TREE_EVENTS: &str = "run_events";
const EVENT_KEY_PAD: usize = 20;

/// Persisted outcome of one lesson's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub course_id: String,
    pub lesson_id: String,
    pub phase: RunPhase,
    pub verdict: Option<Verdict>,
    pub failure: Option<FailureReason>,
    pub retry_count: u32,
    pub attempts: u32,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    /// Present only for accepted runs.
    pub terminal_content: Option<LessonDocument>,
    pub trace: Vec<TransitionEvent>,
    pub issues: Vec<Issue>,
    pub updated_at: String,
}

impl RunRecord {
    pub fn from_report(report: &RunReport) -> Self {
        let issues = report
            .evaluation
            .as_ref()
            .map(|e| e.issues.clone())
            .unwrap_or_default();
        Self {
            course_id: report.course_id.clone(),
            lesson_id: report.lesson_id.clone(),
            phase: report.phase,
            verdict: report.verdict,
            failure: report.failure.as_ref().map(|f| f.reason.clone()),
            retry_count: report.retry_count,
            attempts: report.attempts,
            total_tokens: report.cost.tokens,
            total_cost_usd: report.cost.cost_usd,
            terminal_content: report.document.clone(),
            trace: report.trace.clone(),
            issues,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Record of a run dropped before it finished, built from the events it had emitted.
    pub fn cancelled(course_id: &str, lesson_id: &str, trace: Vec<TransitionEvent>) -> Self {
        let mut report = RunReport::cancelled(course_id, lesson_id);
        let mut cost = CostSummary::default();
        for event in &trace {
            cost.tokens += event.tokens_delta;
            cost.cost_usd += event.cost_delta_usd;
        }
        report.retry_count = trace.last().map(|e| e.retry_count).unwrap_or(0);
        report.cost = cost;
        if let Some(failure) = report.failure.as_mut() {
            failure.retry_count = report.retry_count;
            failure.cost = cost;
        }
        report.trace = trace;
        Self::from_report(&report)
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.course_id.as_str(), self.lesson_id.as_str())
    }
}

#[derive(Clone)]
pub struct RunStore {
    db: Db,
    runs: Tree,
    events: Tree,
}

impl RunStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "Failed to open run store at {}: {}",
                    path.as_ref().display(),
                    e
                ),
            ))
        })?;
        Self::new(db)
    }

    pub fn new(db: Db) -> Result<Self, StorageError> {
        let runs = db.open_tree(TREE_RUNS)?;
        let events = db.open_tree(TREE_EVENTS)?;
        Ok(Self { db, runs, events })
    }

    pub fn shared(db: Db) -> Result<Arc<Self>, StorageError> {
        Ok(Arc::new(Self::new(db)?))
    }

    /// Store a record and make its trace the run's only events, in one transaction.
    pub fn put_record(&self, record: &RunRecord) -> Result<(), StorageError> {
        let key = record.key().storage_key();
        let value = serde_json::to_vec(record).map_err(to_storage_data)?;

        let mut batch = Batch::default();
        for stale in self.event_keys(&key) {
            batch.remove(stale);
        }
        for event in &record.trace {
            let event_value = serde_json::to_vec(event).map_err(to_storage_data)?;
            batch.insert(encode_event_key(&key, event.seq).into_bytes(), event_value);
        }

        (&self.runs, &self.events)
            .transaction(
                |(runs, events)| -> ConflictableTransactionResult<(), StorageError> {
                    events.apply_batch(&batch)?;
                    runs.insert(key.as_bytes(), value.as_slice())?;
                    Ok(())
                },
            )
            .map_err(|e| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => StorageError::from(err),
            })
    }

    /// Persist a cancelled record over whatever the interrupted run left behind.
    pub fn record_cancelled(&self, course_id: &str, lesson_id: &str) -> Result<(), StorageError> {
        let trace = self.read_events(course_id, lesson_id)?;
        self.put_record(&RunRecord::cancelled(course_id, lesson_id, trace))
    }

    pub fn get_record(
        &self,
        course_id: &str,
        lesson_id: &str,
    ) -> Result<Option<RunRecord>, StorageError> {
        let key = CacheKey::new(course_id, lesson_id).storage_key();
        let Some(raw) = self.runs.get(key.as_bytes())? else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw).map_err(to_storage_data)?;
        Ok(Some(parsed))
    }

    /// All records, most recently updated first.
    pub fn list_records(&self) -> Result<Vec<RunRecord>, StorageError> {
        let mut out = Vec::new();
        for result in self.runs.iter() {
            let (_, value) = result?;
            let record: RunRecord = serde_json::from_slice(&value).map_err(to_storage_data)?;
            out.push(record);
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    pub fn append_event(&self, event: &TransitionEvent) -> Result<(), StorageError> {
        let key = encode_event_key(&event.run, event.seq);
        let value = serde_json::to_vec(event).map_err(to_storage_data)?;
        self.events.insert(key.as_bytes(), value)?;
        Ok(())
    }

    pub fn read_events(
        &self,
        course_id: &str,
        lesson_id: &str,
    ) -> Result<Vec<TransitionEvent>, StorageError> {
        let prefix = format!("{}/", CacheKey::new(course_id, lesson_id).storage_key());
        let mut out = Vec::new();
        for result in self.events.scan_prefix(prefix.as_bytes()) {
            let (_, value) = result?;
            let parsed: TransitionEvent =
                serde_json::from_slice(&value).map_err(to_storage_data)?;
            out.push(parsed);
        }
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    /// Drop a run's record and events, e.g. before regenerating the lesson from scratch.
    pub fn delete_run(&self, course_id: &str, lesson_id: &str) -> Result<(), StorageError> {
        let run = CacheKey::new(course_id, lesson_id).storage_key();
        self.runs.remove(run.as_bytes())?;
        for key in self.event_keys(&run) {
            self.events.remove(key)?;
        }
        Ok(())
    }

    fn event_keys(&self, run: &str) -> Vec<Vec<u8>> {
        let prefix = format!("{}/", run);
        self.events
            .scan_prefix(prefix.as_bytes())
            .filter_map(|r| r.ok().map(|(k, _)| k.to_vec()))
            .collect()
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn encode_event_key(run: &str, seq: u64) -> String {
        encode_event_key(run, seq)
    }
}

impl ProgressSink for RunStore {
    fn emit(&self, event: &TransitionEvent) -> Result<(), ApiError> {
        self.append_event(event).map_err(ApiError::from)
    }
}

fn encode_event_key(run: &str, seq: u64) -> String {
    format!("{}/{:0width$}", run, seq, width = EVENT_KEY_PAD)
}

fn to_storage_data(err: serde_json::Error) -> StorageError {
    StorageError::Serialization(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(course: &str, lesson: &str, seq: u64) -> TransitionEvent {
        TransitionEvent::with_now(
            &CacheKey::new(course, lesson),
            seq,
            RunPhase::Planning,
            RunPhase::Expanding,
            1,
            0,
            CostSummary::default(),
            None,
        )
    }

    #[test]
    fn key_encoding_is_lexicographic() {
        let k1 = RunStore::encode_event_key("1:a1:b", 2);
        let k2 = RunStore::encode_event_key("1:a1:b", 10);
        assert!(k1 < k2);
    }

    #[test]
    fn events_are_read_back_sorted_and_scoped() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        store.append_event(&event("c", "l", 2)).unwrap();
        store.append_event(&event("c", "l", 1)).unwrap();
        store.append_event(&event("c", "l2", 1)).unwrap();
        let events = store.read_events("c", "l").unwrap();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn ambiguous_concatenations_stay_apart() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        store.append_event(&event("ab", "c", 1)).unwrap();
        store.append_event(&event("a", "bc", 1)).unwrap();
        store.append_event(&event("a", "bc", 2)).unwrap();
        assert_eq!(store.read_events("ab", "c").unwrap().len(), 1);
        assert_eq!(store.read_events("a", "bc").unwrap().len(), 2);
    }

    #[test]
    fn put_record_replaces_leftover_events_with_its_trace() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        for seq in 1..=5 {
            store.append_event(&event("c", "l", seq)).unwrap();
        }
        let trace = vec![event("c", "l", 1), event("c", "l", 2)];
        let mut report = RunReport::cancelled("c", "l");
        report.trace = trace.clone();
        store.put_record(&RunRecord::from_report(&report)).unwrap();

        assert_eq!(store.read_events("c", "l").unwrap(), trace);
        assert_eq!(store.get_record("c", "l").unwrap().unwrap().trace, trace);
    }

    #[test]
    fn cancelled_record_adopts_the_emitted_events() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        store.append_event(&event("c", "l", 1)).unwrap();
        store.append_event(&event("c", "l", 2)).unwrap();

        store.record_cancelled("c", "l").unwrap();

        let record = store.get_record("c", "l").unwrap().unwrap();
        assert_eq!(record.phase, RunPhase::Rejected);
        assert_eq!(record.verdict, Some(Verdict::Reject));
        assert_eq!(record.failure, Some(FailureReason::Cancelled));
        assert_eq!(record.trace.len(), 2);
        assert_eq!(store.read_events("c", "l").unwrap(), record.trace);
    }

    #[test]
    fn missing_record_is_none() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        assert!(store.get_record("c", "l").unwrap().is_none());
        assert!(store.list_records().unwrap().is_empty());
    }
}
