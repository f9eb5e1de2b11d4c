//! Error types for PostCodeMon.
//!
//! Every failure the execution core can report is a variant of [`Error`] with
//! explicit fields, so callers can pattern-match retryable execution failures
//! against fatal configuration and validation problems.
//!
//! # Agent-Facing Output
//!
//! Errors serialize to structured JSON through [`StructuredError`]:
//! ```json
//! {
//!   "code": "TOOL_NOT_FOUND",
//!   "category": "execution",
//!   "message": "Tool not found: mytool. Searched in: /usr/bin, /bin",
//!   "retryable": true,
//!   "context": { "tool_path": "mytool" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for PostCodeMon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing or invalid configuration, unknown tool.
    Config,
    /// Caller-supplied arguments rejected before spawning.
    Validation,
    /// Tool could not be located, spawned, or exited unsuccessfully.
    Execution,
    /// File I/O outside of a tool run.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Execution => write!(f, "execution"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for PostCodeMon.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{message}")]
    Configuration {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
        value: Option<String>,
    },

    #[error("Tool not found: {tool_path}{}", searched_suffix(.search_paths))]
    ToolNotFound {
        tool_path: String,
        search_paths: Vec<String>,
    },

    #[error("{message}")]
    ToolExecution {
        message: String,
        return_code: i32,
        stderr: String,
    },

    #[error("Tool execution timed out after {seconds} seconds")]
    Timeout { seconds: f64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn searched_suffix(search_paths: &[String]) -> String {
    if search_paths.is_empty() {
        String::new()
    } else {
        format!(". Searched in: {}", search_paths.join(", "))
    }
}

impl Error {
    /// Configuration error without an associated file.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            path: None,
        }
    }

    /// Validation error naming the offending field and value.
    pub fn validation(
        message: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Error::Validation {
            message: message.into(),
            field: Some(field.into()),
            value: Some(value.into()),
        }
    }

    /// Execution failure with the tool's return code and captured stderr.
    pub fn execution(message: impl Into<String>, return_code: i32, stderr: impl Into<String>) -> Self {
        Error::ToolExecution {
            message: message.into(),
            return_code,
            stderr: stderr.into(),
        }
    }

    /// Timeout after the given wall-clock limit.
    pub fn timeout(limit: std::time::Duration) -> Self {
        Error::Timeout {
            seconds: limit.as_secs_f64(),
        }
    }

    /// Returns the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration { .. } => "CONFIGURATION_ERROR",
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            Error::ToolExecution { .. } => "TOOL_EXECUTION_FAILED",
            Error::Timeout { .. } => "EXECUTION_TIMEOUT",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration { .. } => ErrorCategory::Config,
            Error::Validation { .. } => ErrorCategory::Validation,
            Error::ToolNotFound { .. } | Error::ToolExecution { .. } | Error::Timeout { .. } => {
                ErrorCategory::Execution
            }
            Error::Io(_) => ErrorCategory::Io,
        }
    }

    /// Whether the retry loop may attempt the operation again.
    ///
    /// Only execution-layer failures qualify. Configuration and validation
    /// problems indicate a caller error and fail fast.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Execution)
    }

    /// Suggested process exit code for a front end reporting this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Configuration { .. } => 2,
            Error::Validation { .. } => 3,
            Error::ToolNotFound { .. } => 127,
            Error::Timeout { .. } => 124,
            Error::ToolExecution { return_code, .. } => (*return_code).clamp(1, 255),
            Error::Io(_) => 1,
        }
    }
}

/// Serializable rendering of an [`Error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: String,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the retry loop treats this error as transient.
    pub retryable: bool,

    /// Additional structured context (path, field, return code).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::Configuration {
                path: Some(path), ..
            } => {
                context.insert(
                    "config_path".to_string(),
                    serde_json::json!(path.display().to_string()),
                );
            }
            Error::Validation { field, value, .. } => {
                if let Some(field) = field {
                    context.insert("field".to_string(), serde_json::json!(field));
                }
                if let Some(value) = value {
                    context.insert("value".to_string(), serde_json::json!(value));
                }
            }
            Error::ToolNotFound {
                tool_path,
                search_paths,
            } => {
                context.insert("tool_path".to_string(), serde_json::json!(tool_path));
                context.insert("search_paths".to_string(), serde_json::json!(search_paths));
            }
            Error::ToolExecution {
                return_code,
                stderr,
                ..
            } => {
                context.insert("return_code".to_string(), serde_json::json!(return_code));
                if !stderr.is_empty() {
                    context.insert("stderr".to_string(), serde_json::json!(stderr));
                }
            }
            Error::Timeout { seconds } => {
                context.insert("timeout_seconds".to_string(), serde_json::json!(seconds));
            }
            _ => {}
        }

        StructuredError {
            code: err.code().to_string(),
            category: err.category(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":"{}","error":"serialization_failed"}}"#, self.code)
        })
    }
}
