//! Configuration System
//!
//! Layered configuration for the generator: built-in defaults, the global user file, the
//! workspace `config/` directory, then `LESSONSMITH__SECTION__KEY` environment overrides.
//! `validate()` reports every violation at once.

use crate::error::ApiError;
use crate::evaluation::CascadeConfig;
use crate::logging::LoggingConfig;
use crate::pipeline::PipelineConfig;
use crate::queue::QueueConfig;
use crate::retrieval::RetrievalConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use crate::provider::{ModelProfile, ModelsConfig, ProviderConfig, ProviderType};

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

/// Prefix of environment overrides, e.g. `LESSONSMITH__QUEUE__WORKERS=4`.
pub const ENV_PREFIX: &str = "LESSONSMITH";
const ENV_SEPARATOR: &str = "__";

/// Run store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".lessonsmith/store")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
        }
    }
}

impl StorageConfig {
    /// Store path, relative paths taken from the workspace root.
    pub fn resolve_store_path(&self, workspace_root: &Path) -> PathBuf {
        if self.store_path.is_absolute() {
            self.store_path.clone()
        } else {
            workspace_root.join(&self.store_path)
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LessonsmithConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cascade: CascadeConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Provider(String),
    Models(String),
    Pipeline(String),
    Cascade(String),
    Retrieval(String),
    Queue(String),
    Storage(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(msg) => write!(f, "provider: {}", msg),
            ValidationError::Models(msg) => write!(f, "models: {}", msg),
            ValidationError::Pipeline(msg) => write!(f, "pipeline: {}", msg),
            ValidationError::Cascade(msg) => write!(f, "cascade: {}", msg),
            ValidationError::Retrieval(msg) => write!(f, "retrieval: {}", msg),
            ValidationError::Queue(msg) => write!(f, "queue: {}", msg),
            ValidationError::Storage(msg) => write!(f, "storage: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl LessonsmithConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.provider.validate() {
            errors.push(ValidationError::Provider(e));
        }
        if let Err(e) = self.models.validate() {
            errors.push(ValidationError::Models(e));
        }
        if let Err(e) = self.pipeline.validate() {
            errors.push(ValidationError::Pipeline(e));
        }
        if let Err(e) = self.cascade.validate() {
            errors.push(ValidationError::Cascade(e));
        }
        if let Err(e) = self.retrieval.validate() {
            errors.push(ValidationError::Retrieval(e));
        }
        if let Err(e) = self.queue.validate() {
            errors.push(ValidationError::Queue(e));
        }
        if self.storage.store_path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "Store path cannot be empty".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding every violation into one error.
    pub fn validated(self) -> Result<Self, ApiError> {
        self.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                msgs.join("\n")
            ))
        })?;
        Ok(self)
    }
}

/// Layered configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): defaults, global file, `config/config.toml`,
    /// `config/{LESSONSMITH_ENV}.toml`, environment.
    pub fn load(workspace_root: &Path) -> Result<LessonsmithConfig, ApiError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder
            .add_source(Self::environment())
            .build()?
            .try_deserialize::<LessonsmithConfig>()?;
        Ok(config)
    }

    /// Load a single TOML file over the defaults, ignoring other layers.
    pub fn load_from_file(path: &Path) -> Result<LessonsmithConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config = Config::builder()
            .add_source(File::from(path.to_path_buf()))
            .build()?
            .try_deserialize::<LessonsmithConfig>()?;
        Ok(config)
    }

    /// Path of the global user config file, if a home can be determined.
    pub fn global_config_path() -> Option<PathBuf> {
        sources::global_file::global_config_path()
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }
}
