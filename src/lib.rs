//! Lessonsmith: Lesson Document Generation
//!
//! Turns a lesson specification into a finished markdown lesson through four sequential
//! stages (plan, expand, assemble, smooth), then gates the candidate with a tiered quality
//! cascade: deterministic heuristics, a single model judge, and a multi-rater vote.
//! Regeneration is bounded; every run ends with a document or a structured failure.

pub mod cli;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod lesson;
pub mod logging;
pub mod markdown;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod queue;
pub mod retrieval;
pub mod store;
pub mod telemetry;
pub mod usage;

pub use error::{ApiError, StageError, StorageError};
pub use lesson::{LessonDocument, LessonSpec};
pub use pipeline::{GenerationFailure, Pipeline, RunReport};
