//! CLI output: error mapping and command results.

use crate::error::ApiError;

/// Map domain/service errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    e.to_string()
}

/// Rendered command output and whether the command met its goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(text: String) -> Self {
        Self {
            text,
            success: true,
        }
    }

    pub fn with_success(text: String, success: bool) -> Self {
        Self { text, success }
    }
}
