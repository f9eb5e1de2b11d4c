//! Outcome of a single tool execution attempt.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable result of one process run (or a synthesized dry-run/error result).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Process exit code. Negative values mean the process was killed by that signal.
    pub return_code: i32,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,

    /// Wall-clock duration, serialized as float seconds.
    #[serde(with = "duration_secs")]
    pub duration: Duration,

    /// Fully rendered command line.
    pub command: String,

    /// Configured name of the tool.
    pub tool_name: String,
}

impl ProcessResult {
    /// Check if the process succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.return_code == 0
    }

    /// Convert a failed result into a [`Error::ToolExecution`].
    pub fn check_status(self) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(Error::execution(
            format!(
                "Tool '{}' failed with return code {}",
                self.tool_name, self.return_code
            ),
            self.return_code,
            self.stderr,
        ))
    }

    /// Synthesized failure used when an execution never produced a result.
    pub fn from_error(tool_name: impl Into<String>, command: impl Into<String>, err: &Error) -> Self {
        ProcessResult {
            return_code: -1,
            stdout: String::new(),
            stderr: err.to_string(),
            duration: Duration::ZERO,
            command: command.into(),
            tool_name: tool_name.into(),
        }
    }
}

impl std::fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.success() {
            write!(
                f,
                "ProcessResult({}: SUCCESS, duration: {:.2}s)",
                self.tool_name,
                self.duration.as_secs_f64()
            )
        } else {
            write!(
                f,
                "ProcessResult({}: FAILED (code: {}), duration: {:.2}s)",
                self.tool_name,
                self.return_code,
                self.duration.as_secs_f64()
            )
        }
    }
}

/// Render a command line, double-quoting arguments that contain spaces.
pub fn render_command<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(|a| a.as_ref()))
        .map(|part| {
            if part.contains(' ') {
                format!("\"{}\"", part)
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
