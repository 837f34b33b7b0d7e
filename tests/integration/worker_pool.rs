//! Integration tests for the lesson job queue
//!
//! Tests cover:
//! - Batch results in submission order
//! - Bounded concurrency
//! - Deduplication of in-flight and completed jobs
//! - Cancellation of pending and running jobs
//! - Bounded memory of completed reports

use crate::integration::test_utils::*;
use lessonsmith::pipeline::{FailureReason, RunPhase};
use lessonsmith::queue::{LessonJob, LessonJobQueue, QueueConfig};
use lessonsmith::retrieval::CacheKey;
use std::sync::Arc;
use std::time::Duration;

fn queue(script: Script, workers: usize) -> (LessonJobQueue, Arc<ScriptedClient>) {
    bounded_queue(script, workers, QueueConfig::default().completed_capacity)
}

fn bounded_queue(
    script: Script,
    workers: usize,
    completed_capacity: usize,
) -> (LessonJobQueue, Arc<ScriptedClient>) {
    let client = ScriptedClient::new(script);
    let pipeline = Arc::new(pipeline(client.clone(), &test_config()));
    let config = QueueConfig {
        workers,
        completed_capacity,
    };
    (LessonJobQueue::new(pipeline, &config), client)
}

fn slow(latency_ms: u64) -> Script {
    Script {
        latency: Some(Duration::from_millis(latency_ms)),
        ..Script::smoothing(&[clean_lesson()])
    }
}

#[tokio::test]
async fn batch_reports_come_back_in_submission_order() {
    let (queue, client) = queue(Script::smoothing(&[clean_lesson()]), 4);
    let jobs: Vec<LessonJob> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|id| LessonJob::new(COURSE, lesson_spec(id)))
        .collect();

    let results = queue.run_batch(jobs).await;

    let ids: Vec<String> = results
        .iter()
        .map(|r| r.as_ref().unwrap().lesson_id.clone())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    assert!(results.iter().all(|r| r.as_ref().unwrap().is_accepted()));
    assert_eq!(client.count("planner"), 5);
    let stats = queue.stats();
    assert_eq!(stats.accepted, 5);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn pool_never_runs_more_than_its_workers() {
    let (queue, _client) = queue(slow(150), 2);
    let handles: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|id| queue.submit(LessonJob::new(COURSE, lesson_spec(id))))
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = queue.stats();
    assert_eq!(stats.running, 2);
    assert_eq!(stats.pending, 2);

    for handle in handles {
        assert!(handle.wait().await.unwrap().is_accepted());
    }
    assert_eq!(queue.stats().accepted, 4);
}

#[tokio::test]
async fn duplicate_in_flight_submission_shares_one_run() {
    let (queue, client) = queue(slow(20), 2);
    let first = queue.submit(LessonJob::new(COURSE, lesson_spec("loops")));
    let second = queue.submit(LessonJob::new(COURSE, lesson_spec("loops")));
    assert_eq!(first.job_id(), second.job_id());

    let (a, b) = tokio::join!(first.wait(), second.wait());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(client.count("planner"), 1);
    assert_eq!(queue.stats().deduplicated, 1);
}

#[tokio::test]
async fn completed_job_is_not_generated_again() {
    let (queue, client) = queue(Script::smoothing(&[clean_lesson()]), 2);
    let job = LessonJob::new(COURSE, lesson_spec("loops"));

    let first = queue.run(job.clone()).await.unwrap();
    let again = queue.run(job.clone()).await.unwrap();

    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(client.count("smoother"), 1);
    assert!(queue.completed(&job.job_id).is_some());
    assert_eq!(queue.stats().deduplicated, 1);
}

#[tokio::test]
async fn completed_reports_are_bounded() {
    let (queue, client) = bounded_queue(Script::smoothing(&[clean_lesson()]), 2, 2);
    let jobs: Vec<LessonJob> = ["loops", "closures", "traits"]
        .into_iter()
        .map(|id| LessonJob::new(COURSE, lesson_spec(id)))
        .collect();
    for job in &jobs {
        queue.run(job.clone()).await.unwrap();
    }

    assert_eq!(queue.completed_len(), 2);
    assert!(queue.completed(&jobs[0].job_id).is_none());
    assert!(queue.completed(&jobs[2].job_id).is_some());

    // the evicted job runs again instead of answering from memory
    queue.run(jobs[0].clone()).await.unwrap();
    assert_eq!(client.count("smoother"), 4);
    assert_eq!(queue.stats().deduplicated, 0);
}

#[tokio::test]
async fn explicit_job_ids_are_honoured() {
    let (queue, client) = queue(Script::smoothing(&[clean_lesson()]), 2);

    let first = queue
        .run(LessonJob::new(COURSE, lesson_spec("loops")).with_job_id("delivery-1"))
        .await
        .unwrap();
    let second = queue
        .run(LessonJob::new(COURSE, lesson_spec("loops")).with_job_id("delivery-2"))
        .await
        .unwrap();

    assert!(first.is_accepted() && second.is_accepted());
    assert_eq!(client.count("smoother"), 2);
}

#[tokio::test]
async fn cancelling_answers_every_waiter() {
    let (queue, _client) = queue(slow(5_000), 1);
    let running = queue.submit(LessonJob::new(COURSE, lesson_spec("running")));
    let pending = queue.submit(LessonJob::new(COURSE, lesson_spec("pending")));
    let pending_twin = queue.submit(LessonJob::new(COURSE, lesson_spec("pending")));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(queue.cancel(pending.job_id()));
    assert!(queue.cancel(running.job_id()));
    assert!(!queue.cancel("rust-101/unknown"));

    for handle in [running, pending, pending_twin] {
        let report = handle.wait().await.unwrap();
        assert_eq!(report.phase, RunPhase::Rejected);
        assert_eq!(
            report.failure.as_ref().map(|f| f.reason.clone()),
            Some(FailureReason::Cancelled)
        );
    }
    let stats = queue.stats();
    assert_eq!(stats.cancelled, 2);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn cancelled_run_releases_its_cache_entry() {
    let client = ScriptedClient::new(slow(5_000));
    let cache = lessonsmith::retrieval::ContextCache::shared();
    let pipeline = Arc::new(pipeline_with(
        client,
        &test_config(),
        Arc::new(lessonsmith::retrieval::InMemoryCorpus::new()),
        cache.clone(),
    ));
    let queue = LessonJobQueue::new(
        pipeline,
        &QueueConfig {
            workers: 1,
            ..QueueConfig::default()
        },
    );

    let handle = queue.submit(LessonJob::new(COURSE, lesson_spec("loops")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache.get(&CacheKey::new(COURSE, "loops")).is_some());

    queue.cancel(handle.job_id());
    handle.wait().await.unwrap();
    assert!(cache.get(&CacheKey::new(COURSE, "loops")).is_none());
}
