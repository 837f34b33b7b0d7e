//! Lesson Job Queue
//!
//! Bounded worker pool running independent pipeline instances, one per lesson. Each job owns its
//! own run state; only the retrieval cache is shared through the pipeline.
//!
//! Deliveries are at-least-once: a job id already in flight attaches the caller as an extra
//! waiter, and a job id already completed returns the recorded report without running again.
//! Only the most recent `completed_capacity` reports are remembered.

use crate::error::ApiError;
use crate::lesson::LessonSpec;
use crate::pipeline::{Pipeline, RunReport};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

fn default_workers() -> usize {
    16
}

fn default_completed_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Lessons generated concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Completed reports kept for deduplication; the oldest is evicted first
    #[serde(default = "default_completed_capacity")]
    pub completed_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            completed_capacity: default_completed_capacity(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        if self.completed_capacity == 0 {
            return Err("completed_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

/// One lesson to generate.
#[derive(Debug, Clone)]
pub struct LessonJob {
    pub job_id: String,
    pub course_id: String,
    pub spec: LessonSpec,
}

impl LessonJob {
    /// Job id derived from the (course, lesson) pair.
    pub fn new(course_id: impl Into<String>, spec: LessonSpec) -> Self {
        let course_id = course_id.into();
        Self {
            job_id: format!("{}/{}", course_id, spec.lesson_id),
            course_id,
            spec,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }
}

type JobResult = Result<Arc<RunReport>, ApiError>;

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs waiting for a worker
    pub pending: usize,
    /// Jobs currently running
    pub running: usize,
    /// Jobs finished with an accepted lesson
    pub accepted: usize,
    /// Jobs finished with a generation failure
    pub failed: usize,
    pub cancelled: usize,
    /// Submissions answered by an in-flight or completed job
    pub deduplicated: usize,
}

struct InFlight {
    course_id: String,
    lesson_id: String,
    running: bool,
    waiters: Vec<oneshot::Sender<JobResult>>,
    abort: Option<AbortHandle>,
}

/// Pending result of one submission.
pub struct JobHandle {
    job_id: String,
    receiver: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn wait(self) -> JobResult {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(ApiError::QueueError(format!(
                "job {} ended without reporting",
                self.job_id
            ))),
        }
    }
}

/// Completed reports in insertion order, bounded by `capacity`.
struct CompletedJobs {
    reports: HashMap<String, Arc<RunReport>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl CompletedJobs {
    fn new(capacity: usize) -> Self {
        Self {
            reports: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, job_id: &str) -> Option<Arc<RunReport>> {
        self.reports.get(job_id).cloned()
    }

    fn insert(&mut self, job_id: String, report: Arc<RunReport>) {
        if self.reports.insert(job_id.clone(), report).is_none() {
            self.order.push_back(job_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.reports.remove(&oldest);
                debug!(job_id = %oldest, "Evicted completed job report");
            }
        }
    }

    fn len(&self) -> usize {
        self.reports.len()
    }
}

struct Shared {
    pipeline: Arc<Pipeline>,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    completed: RwLock<CompletedJobs>,
    stats: RwLock<QueueStats>,
}

impl Shared {
    fn finish(&self, job_id: &str, report: RunReport) {
        let report = Arc::new(report);
        let entry = {
            let mut in_flight = self.in_flight.lock();
            let Some(entry) = in_flight.remove(job_id) else {
                // cancelled while finishing
                return;
            };
            self.completed
                .write()
                .insert(job_id.to_string(), report.clone());
            entry
        };
        {
            let mut stats = self.stats.write();
            stats.running = stats.running.saturating_sub(1);
            if report.is_accepted() {
                stats.accepted += 1;
            } else {
                stats.failed += 1;
            }
        }
        for waiter in entry.waiters {
            let _ = waiter.send(Ok(report.clone()));
        }
    }
}

/// Bounded pool of lesson generation jobs.
pub struct LessonJobQueue {
    shared: Arc<Shared>,
    workers: usize,
}

impl LessonJobQueue {
    pub fn new(pipeline: Arc<Pipeline>, config: &QueueConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            shared: Arc::new(Shared {
                pipeline,
                semaphore: Arc::new(Semaphore::new(workers)),
                in_flight: Mutex::new(HashMap::new()),
                completed: RwLock::new(CompletedJobs::new(config.completed_capacity)),
                stats: RwLock::new(QueueStats::default()),
            }),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Schedule a job. Must be called within a tokio runtime.
    pub fn submit(&self, job: LessonJob) -> JobHandle {
        let (tx, rx) = oneshot::channel();
        let handle = JobHandle {
            job_id: job.job_id.clone(),
            receiver: rx,
        };

        let mut in_flight = self.shared.in_flight.lock();
        if let Some(report) = self.shared.completed.read().get(&job.job_id) {
            drop(in_flight);
            self.shared.stats.write().deduplicated += 1;
            debug!(job_id = %job.job_id, "Job already completed, returning recorded report");
            let _ = tx.send(Ok(report));
            return handle;
        }
        if let Some(entry) = in_flight.get_mut(&job.job_id) {
            entry.waiters.push(tx);
            drop(in_flight);
            self.shared.stats.write().deduplicated += 1;
            debug!(job_id = %job.job_id, "Job already in flight, attaching waiter");
            return handle;
        }

        in_flight.insert(
            job.job_id.clone(),
            InFlight {
                course_id: job.course_id.clone(),
                lesson_id: job.spec.lesson_id.clone(),
                running: false,
                waiters: vec![tx],
                abort: None,
            },
        );
        self.shared.stats.write().pending += 1;

        let shared = self.shared.clone();
        let job_id = job.job_id.clone();
        let task = tokio::spawn(async move {
            let _permit = match shared.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(job_id = %job.job_id, "Worker pool closed before job started");
                    return;
                }
            };
            {
                let mut in_flight = shared.in_flight.lock();
                match in_flight.get_mut(&job.job_id) {
                    Some(entry) => entry.running = true,
                    None => return,
                }
                let mut stats = shared.stats.write();
                stats.pending = stats.pending.saturating_sub(1);
                stats.running += 1;
            }
            debug!(job_id = %job.job_id, "Job started");
            let report = shared
                .pipeline
                .run(Arc::new(job.spec), &job.course_id)
                .await;
            shared.finish(&job.job_id, report);
        });
        if let Some(entry) = in_flight.get_mut(&job_id) {
            entry.abort = Some(task.abort_handle());
        }
        handle
    }

    /// Submit and wait for one job.
    pub async fn run(&self, job: LessonJob) -> JobResult {
        self.submit(job).wait().await
    }

    /// Run every job through the pool; reports come back in submission order.
    pub async fn run_batch(&self, jobs: Vec<LessonJob>) -> Vec<JobResult> {
        let total = jobs.len();
        let handles: Vec<JobHandle> = jobs.into_iter().map(|job| self.submit(job)).collect();
        let mut results = Vec::with_capacity(total);
        for handle in handles {
            results.push(handle.wait().await);
        }
        let accepted = results
            .iter()
            .filter(|r| matches!(r, Ok(report) if report.is_accepted()))
            .count();
        info!(total, accepted, workers = self.workers, "Batch finished");
        results
    }

    /// Abort a pending or running job. Waiters receive a cancelled report.
    pub fn cancel(&self, job_id: &str) -> bool {
        let Some(entry) = self.shared.in_flight.lock().remove(job_id) else {
            return false;
        };
        if let Some(abort) = &entry.abort {
            abort.abort();
        }
        self.shared
            .pipeline
            .orchestrator()
            .retriever()
            .release(&entry.course_id, &entry.lesson_id);
        {
            let mut stats = self.shared.stats.write();
            if entry.running {
                stats.running = stats.running.saturating_sub(1);
            } else {
                stats.pending = stats.pending.saturating_sub(1);
            }
            stats.cancelled += 1;
        }
        let report = Arc::new(RunReport::cancelled(&entry.course_id, &entry.lesson_id));
        for waiter in entry.waiters {
            let _ = waiter.send(Ok(report.clone()));
        }
        info!(job_id = %job_id, "Job cancelled");
        true
    }

    /// Recorded report of a completed job.
    pub fn completed(&self, job_id: &str) -> Option<Arc<RunReport>> {
        self.shared.completed.read().get(job_id)
    }

    /// Number of completed reports currently remembered.
    pub fn completed_len(&self) -> usize {
        self.shared.completed.read().len()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats.read().clone()
    }
}
