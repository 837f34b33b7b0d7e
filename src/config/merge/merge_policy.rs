//! Merge rules: defaults, override order, conflict handling.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with merge policy defaults applied.
///
/// Section defaults live on the serde types; only values that must exist before any file is
/// read are seeded here.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("storage.store_path", ".lessonsmith/store")?
        .set_default("queue.workers", 16)
}
