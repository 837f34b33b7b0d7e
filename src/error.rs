//! Error types for the lesson generation pipeline.

use crate::pipeline::StageKind;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::IoError(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}

/// Errors raised by external capabilities, configuration and storage.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimit(String),

    #[error("Provider request timed out: {0}")]
    ProviderTimeout(String),

    #[error("Provider model not found: {0}")]
    ProviderModelNotFound(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Corpus unavailable: {0}")]
    CorpusUnavailable(String),

    #[error("Invalid lesson spec: {0}")]
    InvalidSpec(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ApiError {
    /// Transient capability failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::ProviderRateLimit(_)
                | ApiError::ProviderTimeout(_)
                | ApiError::ProviderRequestFailed(_)
        )
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

/// Failure of one stage node execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Transient failure; the orchestrator retries the stage locally.
    #[error("{stage} failed transiently: {reason}")]
    Retryable { stage: StageKind, reason: String },

    /// Malformed spec or unrecoverable output; aborts the run.
    #[error("{stage} failed: {reason}")]
    Terminal { stage: StageKind, reason: String },

    /// Retryable failures outlasted the stage-local budget.
    #[error("{stage} exhausted {attempts} attempts: {last}")]
    Exhausted {
        stage: StageKind,
        attempts: u32,
        last: String,
    },
}

impl StageError {
    pub fn retryable(stage: StageKind, reason: impl Into<String>) -> Self {
        StageError::Retryable {
            stage,
            reason: reason.into(),
        }
    }

    pub fn terminal(stage: StageKind, reason: impl Into<String>) -> Self {
        StageError::Terminal {
            stage,
            reason: reason.into(),
        }
    }

    pub fn stage(&self) -> StageKind {
        match self {
            StageError::Retryable { stage, .. }
            | StageError::Terminal { stage, .. }
            | StageError::Exhausted { stage, .. } => *stage,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Retryable { .. })
    }

    /// Classify a capability error raised while a stage was running.
    pub fn from_capability(stage: StageKind, err: ApiError) -> Self {
        if err.is_transient() {
            StageError::retryable(stage, err.to_string())
        } else {
            StageError::terminal(stage, err.to_string())
        }
    }
}
