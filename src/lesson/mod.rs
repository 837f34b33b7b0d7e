//! Lesson domain types: the input spec and the produced document.

pub mod document;
pub mod spec;

pub use document::{Citation, LessonDocument};
pub use spec::LessonSpec;
