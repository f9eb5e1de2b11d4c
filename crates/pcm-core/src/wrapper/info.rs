//! Tool introspection results.

use pcm_common::ProcessResult;
use pcm_config::ValidationRules;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Flags tried, in order, when probing a tool's version.
pub const VERSION_FLAGS: &[&str] = &["--version", "-v", "/version", "/?", "--help"];

/// Per-probe timeout.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest version string kept.
pub const VERSION_INFO_MAX_CHARS: usize = 200;

/// Configuration and probe results for one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub executable_path: String,
    /// Whether the executable resolves through the search locations.
    pub executable_exists: bool,
    pub default_args: Vec<String>,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub environment_vars: BTreeMap<String, String>,
    pub validation_rules: ValidationRules,
    pub version_info: Option<String>,
}

/// Entry of [`list_tools`](super::ToolWrapper::list_tools).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolListing {
    Info(ToolInfo),
    Error { name: String, error: String },
}

impl ToolListing {
    pub fn name(&self) -> &str {
        match self {
            ToolListing::Info(info) => &info.name,
            ToolListing::Error { name, .. } => name,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolListing::Error { .. })
    }
}

/// Version text from a probe: the trimmed stdout (or stderr when stdout
/// is empty) of a successful run, cut to [`VERSION_INFO_MAX_CHARS`].
pub fn version_text(result: &ProcessResult) -> Option<String> {
    if !result.success() {
        return None;
    }
    let output = if result.stdout.is_empty() {
        &result.stderr
    } else {
        &result.stdout
    };
    let text: String = output
        .trim()
        .chars()
        .take(VERSION_INFO_MAX_CHARS)
        .collect();
    (!text.is_empty()).then_some(text)
}
