//! Integration tests for persisted runs

use crate::integration::test_utils::*;
use lessonsmith::evaluation::Verdict;
use lessonsmith::pipeline::{FailureReason, Pipeline, RunPhase};
use lessonsmith::queue::{LessonJob, LessonJobQueue, QueueConfig};
use lessonsmith::retrieval::{ContextCache, InMemoryCorpus};
use lessonsmith::store::{RunRecord, RunStore};
use lessonsmith::telemetry::{FanoutSink, ProgressSink, TracingSink};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn stored_pipeline(client: Arc<ScriptedClient>, store: Arc<RunStore>) -> Pipeline {
    let sink = FanoutSink::new(vec![
        Arc::new(TracingSink) as Arc<dyn ProgressSink>,
        store.clone() as Arc<dyn ProgressSink>,
    ]);
    Pipeline::assemble(
        &test_config(),
        client,
        Arc::new(InMemoryCorpus::new()),
        ContextCache::shared(),
        Arc::new(sink),
    )
    .with_store(store)
}

#[tokio::test]
async fn accepted_run_is_recorded_with_its_trace() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RunStore::open(dir.path()).unwrap());
    let client = ScriptedClient::new(Script::smoothing(&[broken_lesson(), clean_lesson()]));
    let pipeline = stored_pipeline(client, store.clone());

    let report = pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    let record = store.get_record(COURSE, "loops").unwrap().unwrap();
    assert_eq!(record.phase, RunPhase::Accepted);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.retry_count, 1);
    assert_eq!(record.terminal_content, report.document);
    assert_eq!(record.total_tokens, report.cost.tokens);

    let events = store.read_events(COURSE, "loops").unwrap();
    assert_eq!(events.len(), report.trace.len());
    assert_eq!(events, record.trace);
}

#[tokio::test]
async fn rejected_run_keeps_no_terminal_content() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RunStore::open(dir.path()).unwrap());
    let client = ScriptedClient::new(Script::smoothing(&[broken_lesson()]));
    let pipeline = stored_pipeline(client, store.clone());

    pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;

    let record = store.get_record(COURSE, "loops").unwrap().unwrap();
    assert_eq!(record.phase, RunPhase::Rejected);
    assert_eq!(record.failure, Some(FailureReason::MaxRetriesExhausted));
    assert_eq!(record.verdict, Some(Verdict::Reject));
    assert!(record.terminal_content.is_none());
    assert!(!record.issues.is_empty());
}

#[tokio::test]
async fn rerunning_a_lesson_replaces_the_previous_run() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RunStore::open(dir.path()).unwrap());

    let first = stored_pipeline(
        ScriptedClient::new(Script::smoothing(&[broken_lesson(), clean_lesson()])),
        store.clone(),
    );
    first.run(Arc::new(lesson_spec("loops")), COURSE).await;
    let second = stored_pipeline(
        ScriptedClient::new(Script::smoothing(&[clean_lesson()])),
        store.clone(),
    );
    let report = second.run(Arc::new(lesson_spec("loops")), COURSE).await;

    let records = store.list_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 1);
    let events = store.read_events(COURSE, "loops").unwrap();
    assert_eq!(events.len(), report.trace.len());
    assert_eq!(events[0].seq, 1);
}

#[tokio::test]
async fn cancelled_rerun_leaves_a_consistent_record() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RunStore::open(dir.path()).unwrap());
    let first = stored_pipeline(
        ScriptedClient::new(Script::smoothing(&[broken_lesson(), clean_lesson()])),
        store.clone(),
    );
    first.run(Arc::new(lesson_spec("loops")), COURSE).await;

    let slow = Script {
        latency: Some(Duration::from_millis(200)),
        ..Script::smoothing(&[clean_lesson()])
    };
    let queue = LessonJobQueue::new(
        Arc::new(stored_pipeline(ScriptedClient::new(slow), store.clone())),
        &QueueConfig { workers: 1, ..QueueConfig::default() },
    );
    let handle = queue.submit(LessonJob::new(COURSE, lesson_spec("loops")));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(queue.cancel(handle.job_id()));
    handle.wait().await.unwrap();

    let record = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(record) = store.get_record(COURSE, "loops").unwrap() {
                if record.failure == Some(FailureReason::Cancelled) {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(record.phase, RunPhase::Rejected);
    assert!(record.terminal_content.is_none());
    assert!(!record.trace.is_empty());
    assert!(record.trace.iter().all(|e| e.to != RunPhase::Accepted));
    let events = store.read_events(COURSE, "loops").unwrap();
    assert_eq!(events, record.trace);
    for (idx, event) in events.iter().enumerate() {
        assert_eq!(event.seq, idx as u64 + 1);
    }
    assert_eq!(store.list_records().unwrap().len(), 1);
}

#[tokio::test]
async fn records_survive_reopening() {
    let dir = TempDir::new().unwrap();
    {
        let store = Arc::new(RunStore::open(dir.path()).unwrap());
        let pipeline = stored_pipeline(
            ScriptedClient::new(Script::smoothing(&[clean_lesson()])),
            store.clone(),
        );
        pipeline.run(Arc::new(lesson_spec("loops")), COURSE).await;
        pipeline.run(Arc::new(lesson_spec("closures")), COURSE).await;
        store.flush().unwrap();
    }

    let store = RunStore::open(dir.path()).unwrap();
    let mut ids: Vec<String> = store
        .list_records()
        .unwrap()
        .into_iter()
        .map(|r: RunRecord| r.lesson_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["closures".to_string(), "loops".to_string()]);
}
