//! Pipeline facade: wires the stages, the cascade and retrieval from configuration, and
//! exposes the single entry point for lesson generation.

use crate::config::LessonsmithConfig;
use crate::evaluation::CascadeEvaluator;
use crate::lesson::{LessonDocument, LessonSpec};
use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::outcome::{GenerationFailure, RunReport};
use crate::pipeline::stages::StageSet;
use crate::provider::CompletionClient;
use crate::retrieval::{ContextCache, ContextRetriever, CorpusSearch};
use crate::store::{RunRecord, RunStore};
use crate::telemetry::ProgressSink;
use crate::logging::run_span;
use crate::usage::MeteredClient;
use std::sync::Arc;
use tracing::{warn, Instrument};

pub struct Pipeline {
    orchestrator: Orchestrator,
    store: Option<Arc<RunStore>>,
}

impl Pipeline {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            store: None,
        }
    }

    /// Standard pipeline: one metered client shared by every stage and every tier.
    pub fn assemble(
        config: &LessonsmithConfig,
        client: Arc<dyn CompletionClient>,
        corpus: Arc<dyn CorpusSearch>,
        cache: Arc<ContextCache>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let metered = MeteredClient::new(
            client,
            config.models.clone(),
            config.pipeline.call_timeout(),
        );
        let stages = StageSet::standard(metered.clone(), &config.pipeline);
        let evaluator = Arc::new(CascadeEvaluator::new(metered, config.cascade.clone()));
        let retriever = Arc::new(ContextRetriever::new(
            corpus,
            cache,
            config.retrieval.max_chunks,
            config.retrieval.search_timeout(),
        ));
        Self::new(Orchestrator::new(
            stages,
            evaluator,
            retriever,
            sink,
            config.pipeline.clone(),
        ))
    }

    /// Persist a [`RunRecord`] after every run.
    pub fn with_store(mut self, store: Arc<RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run one lesson. A stored previous run of the same lesson is replaced; a run dropped
    /// midway (e.g. cancelled by the job queue) is stored as cancelled with its partial trace.
    pub async fn run(&self, spec: Arc<LessonSpec>, course_id: &str) -> RunReport {
        let lesson_id = spec.lesson_id.clone();
        let guard = InterruptedRun {
            store: self.store.as_deref(),
            course_id,
            lesson_id: &lesson_id,
        };
        if let Some(store) = &self.store {
            if let Err(err) = store.delete_run(course_id, &spec.lesson_id) {
                warn!(
                    course_id = %course_id,
                    lesson_id = %spec.lesson_id,
                    error = %err,
                    "Failed to clear previous run"
                );
            }
        }
        let span = run_span(course_id, &spec.lesson_id);
        let report = self.orchestrator.run(spec, course_id).instrument(span).await;
        guard.disarm();
        if let Some(store) = &self.store {
            if let Err(err) = store.put_record(&RunRecord::from_report(&report)) {
                warn!(
                    course_id = %report.course_id,
                    lesson_id = %report.lesson_id,
                    error = %err,
                    "Failed to persist run record"
                );
            }
        }
        report
    }

    /// Generate one lesson: a complete document, or a structured failure.
    pub async fn execute_lesson_generation(
        &self,
        spec: LessonSpec,
        course_id: &str,
    ) -> Result<LessonDocument, GenerationFailure> {
        self.run(Arc::new(spec), course_id).await.into_result()
    }
}

/// Records a cancelled run if dropped while still armed.
struct InterruptedRun<'a> {
    store: Option<&'a RunStore>,
    course_id: &'a str,
    lesson_id: &'a str,
}

impl InterruptedRun<'_> {
    fn disarm(mut self) {
        self.store = None;
    }
}

impl Drop for InterruptedRun<'_> {
    fn drop(&mut self) {
        let Some(store) = self.store else {
            return;
        };
        if let Err(err) = store.record_cancelled(self.course_id, self.lesson_id) {
            warn!(
                course_id = %self.course_id,
                lesson_id = %self.lesson_id,
                error = %err,
                "Failed to persist cancelled run"
            );
        }
    }
}
