//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use crate::cli::output::CommandOutput;
use crate::cli::parse::{command_name, Commands, RunsCommands};
use crate::cli::presentation::{
    format_batch_json, format_batch_text, format_check_json, format_check_text,
    format_report_json, format_report_text, format_run_show_json, format_run_show_text,
    format_runs_list_json, format_runs_list_text, BatchEntry,
};
use crate::config::{ConfigLoader, LessonsmithConfig};
use crate::error::{ApiError, StorageError};
use crate::evaluation::HeuristicFilter;
use crate::lesson::{LessonDocument, LessonSpec};
use crate::markdown;
use crate::pipeline::Pipeline;
use crate::provider::build_client;
use crate::queue::{LessonJob, LessonJobQueue, QueueConfig};
use crate::retrieval::{ContextCache, CorpusSearch};
use crate::store::RunStore;
use crate::telemetry::{FanoutSink, ProgressSink, TracingSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Runtime context for CLI execution: workspace and loaded configuration.
pub struct RunContext {
    workspace_root: PathBuf,
    config: LessonsmithConfig,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self {
            workspace_root,
            config: config.validated()?,
        })
    }

    pub fn config(&self) -> &LessonsmithConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<CommandOutput, ApiError> {
        let started = Instant::now();
        let result = match command {
            Commands::Generate {
                spec,
                course,
                out,
                format,
            } => self.handle_generate(spec, course, out.as_deref(), format),
            Commands::Batch {
                specs,
                course,
                out_dir,
                workers,
                format,
            } => self.handle_batch(specs, course, out_dir.as_deref(), *workers, format),
            Commands::Check { file, spec, format } => {
                self.handle_check(file, spec.as_deref(), format)
            }
            Commands::Runs { command } => match command {
                RunsCommands::List { course, format } => {
                    self.handle_runs_list(course.as_deref(), format)
                }
                RunsCommands::Show {
                    course,
                    lesson,
                    format,
                } => self.handle_runs_show(course, lesson, format),
            },
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(output) => info!(
                command = command_name(command),
                success = output.success,
                duration_ms,
                "Command finished"
            ),
            Err(err) => warn!(
                command = command_name(command),
                error = %err,
                duration_ms,
                "Command failed"
            ),
        }
        result
    }

    fn open_store(&self) -> Result<Arc<RunStore>, ApiError> {
        let path = self
            .config
            .storage
            .resolve_store_path(&self.workspace_root);
        std::fs::create_dir_all(&path)
            .map_err(|e| ApiError::StorageError(StorageError::IoError(e)))?;
        Ok(Arc::new(RunStore::open(&path)?))
    }

    fn runtime() -> Result<tokio::runtime::Runtime, ApiError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to start async runtime: {}", e)))
    }

    fn build_pipeline(&self, store: Arc<RunStore>) -> Result<Pipeline, ApiError> {
        let client = build_client(&self.config.provider, &self.config.models)?;
        let corpus: Arc<dyn CorpusSearch> = Arc::new(self.config.retrieval.load_corpus()?);
        let sink = FanoutSink::new(vec![
            Arc::new(TracingSink) as Arc<dyn ProgressSink>,
            store.clone() as Arc<dyn ProgressSink>,
        ]);
        Ok(Pipeline::assemble(
            &self.config,
            client,
            corpus,
            ContextCache::shared(),
            Arc::new(sink),
        )
        .with_store(store))
    }

    fn handle_generate(
        &self,
        spec_path: &Path,
        course: &str,
        out: Option<&Path>,
        format: &str,
    ) -> Result<CommandOutput, ApiError> {
        let spec = LessonSpec::load(spec_path)?;
        let store = self.open_store()?;
        let pipeline = self.build_pipeline(store.clone())?;
        let report = Self::runtime()?.block_on(pipeline.run(Arc::new(spec), course));
        store.flush()?;

        if let (Some(path), Some(document)) = (out, report.document.as_ref()) {
            write_document(path, document)?;
        }
        let text = match format {
            "json" => format_report_json(&report)?,
            _ => format_report_text(&report),
        };
        Ok(CommandOutput::with_success(text, report.is_accepted()))
    }

    fn handle_batch(
        &self,
        spec_paths: &[PathBuf],
        course: &str,
        out_dir: Option<&Path>,
        workers: Option<usize>,
        format: &str,
    ) -> Result<CommandOutput, ApiError> {
        let jobs = spec_paths
            .iter()
            .map(|path| LessonSpec::load(path).map(|spec| LessonJob::new(course, spec)))
            .collect::<Result<Vec<_>, _>>()?;
        let queue_config = QueueConfig {
            workers: workers.unwrap_or(self.config.queue.workers),
            ..self.config.queue.clone()
        };
        queue_config.validate().map_err(ApiError::ConfigError)?;

        let store = self.open_store()?;
        let pipeline = Arc::new(self.build_pipeline(store.clone())?);
        let queue = LessonJobQueue::new(pipeline, &queue_config);
        let job_ids: Vec<String> = jobs.iter().map(|j| j.job_id.clone()).collect();
        let results = Self::runtime()?.block_on(queue.run_batch(jobs));
        store.flush()?;

        let entries: Vec<BatchEntry> = job_ids
            .into_iter()
            .zip(results)
            .map(|(job_id, result)| BatchEntry {
                job_id,
                outcome: result.map_err(|e| e.to_string()),
            })
            .collect();
        if let Some(dir) = out_dir {
            for entry in &entries {
                if let Ok(report) = &entry.outcome {
                    if let Some(document) = &report.document {
                        write_document(&dir.join(format!("{}.md", report.lesson_id)), document)?;
                    }
                }
            }
        }
        let success = entries
            .iter()
            .all(|e| matches!(&e.outcome, Ok(report) if report.is_accepted()));
        let text = match format {
            "json" => format_batch_json(&entries)?,
            _ => format_batch_text(&entries),
        };
        Ok(CommandOutput::with_success(text, success))
    }

    fn handle_check(
        &self,
        file: &Path,
        spec_path: Option<&Path>,
        format: &str,
    ) -> Result<CommandOutput, ApiError> {
        let raw = std::fs::read_to_string(file).map_err(|e| {
            ApiError::ConfigError(format!("Failed to read {}: {}", file.display(), e))
        })?;
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "lesson".to_string());
        let title = markdown::parse(&raw)
            .headings
            .iter()
            .find(|h| h.level == 1)
            .map(|h| h.text.clone())
            .unwrap_or_else(|| name.clone());
        let document = LessonDocument::new(title.as_str(), raw, Vec::new());
        let spec = match spec_path {
            Some(path) => LessonSpec::load(path)?,
            None => LessonSpec {
                lesson_id: name,
                title,
                target_words: document.word_count.max(1),
                audience: None,
                objectives: Vec::new(),
                topics: Vec::new(),
                style: Vec::new(),
                required_sections: Vec::new(),
            },
        };

        let result = HeuristicFilter::new(self.config.cascade.clone()).filter(&document, &spec);
        let label = file.display().to_string();
        let text = match format {
            "json" => format_check_json(&label, &result)?,
            _ => format_check_text(&label, &result),
        };
        Ok(CommandOutput::with_success(text, !result.has_critical()))
    }

    fn handle_runs_list(
        &self,
        course: Option<&str>,
        format: &str,
    ) -> Result<CommandOutput, ApiError> {
        let store = self.open_store()?;
        let records: Vec<_> = store
            .list_records()?
            .into_iter()
            .filter(|r| course.map_or(true, |c| r.course_id == c))
            .collect();
        let text = match format {
            "json" => format_runs_list_json(&records)?,
            _ => format_runs_list_text(&records),
        };
        Ok(CommandOutput::ok(text))
    }

    fn handle_runs_show(
        &self,
        course: &str,
        lesson: &str,
        format: &str,
    ) -> Result<CommandOutput, ApiError> {
        let store = self.open_store()?;
        let record = store.get_record(course, lesson)?.ok_or_else(|| {
            ApiError::StorageError(StorageError::RecordNotFound(format!(
                "{}/{}",
                course, lesson
            )))
        })?;
        let events = store.read_events(course, lesson)?;
        let text = match format {
            "json" => format_run_show_json(&record, &events)?,
            _ => format_run_show_text(&record, &events),
        };
        Ok(CommandOutput::ok(text))
    }
}

fn write_document(path: &Path, document: &LessonDocument) -> Result<(), ApiError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| ApiError::StorageError(StorageError::IoError(e)))?;
    }
    std::fs::write(path, &document.markdown)
        .map_err(|e| ApiError::StorageError(StorageError::IoError(e)))
}
