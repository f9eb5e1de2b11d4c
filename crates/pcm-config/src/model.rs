//! Typed configuration structures.
//!
//! Every struct uses `#[serde(default)]` so partial files deserialize cleanly;
//! the merged tree from all layers is deserialized once into [`WrapperConfig`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default per-tool timeout in seconds.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

/// Default number of execution attempts per tool call.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default fixed delay between attempts in seconds.
pub const DEFAULT_RETRY_WAIT_SECS: f64 = 1.0;

/// Default wrapper-wide timeout in seconds.
pub const DEFAULT_GLOBAL_TIMEOUT_SECS: u64 = 600;

/// Default bound for batch and async execution.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 10;

/// Default log file size before rotation (10MB).
pub const DEFAULT_MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of rotated log files kept.
pub const DEFAULT_LOG_BACKUP_COUNT: usize = 5;

/// Default human log layout string.
pub const DEFAULT_LOG_FORMAT: &str = "%(asctime)s - %(name)s - %(levelname)s - %(message)s";

/// Configuration for one external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Tool name; taken from the key in the `tools` mapping.
    #[serde(skip)]
    pub name: String,

    /// Path or bare name of the executable.
    pub executable_path: String,

    /// Arguments prepended to every invocation.
    pub default_args: Vec<String>,

    /// Per-attempt timeout.
    pub timeout_seconds: u64,

    /// Total number of attempts (not extra retries).
    pub retry_attempts: u32,

    /// Fixed wait between attempts.
    pub retry_wait_seconds: f64,

    /// Environment overrides applied to the child.
    pub environment_vars: BTreeMap<String, String>,

    /// Argument checks run before spawning.
    pub validation_rules: ValidationRules,

    /// Working directory for the child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            executable_path: String::new(),
            default_args: Vec::new(),
            timeout_seconds: DEFAULT_TOOL_TIMEOUT_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_wait_seconds: DEFAULT_RETRY_WAIT_SECS,
            environment_vars: BTreeMap::new(),
            validation_rules: ValidationRules::default(),
            working_directory: None,
        }
    }
}

impl ToolConfig {
    /// Create a tool entry with default policy.
    pub fn new(name: impl Into<String>, executable_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable_path: executable_path.into(),
            ..Self::default()
        }
    }

    /// Set default arguments.
    pub fn with_default_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-attempt timeout in seconds.
    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }

    /// Set retry attempts and the wait between them.
    pub fn with_retries(mut self, attempts: u32, wait_seconds: f64) -> Self {
        self.retry_attempts = attempts;
        self.retry_wait_seconds = wait_seconds;
        self
    }

    /// Add an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_vars.insert(key.into(), value.into());
        self
    }

    /// Set validation rules.
    pub fn with_validation_rules(mut self, rules: ValidationRules) -> Self {
        self.validation_rules = rules;
        self
    }

    /// Set the working directory.
    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Per-attempt timeout as a `Duration`; `None` when configured as 0.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }

    /// Wait between attempts. Negative or NaN values collapse to zero and
    /// values too large for a `Duration` saturate.
    pub fn retry_wait(&self) -> Duration {
        if self.retry_wait_seconds > 0.0 {
            Duration::try_from_secs_f64(self.retry_wait_seconds).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}

/// Argument validation rules for a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    /// Flags that must appear literally in the caller's arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_args: Option<RequiredArgsRule>,

    /// Argument positions that must name existing filesystem paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_exists: Option<FileExistsRule>,

    /// Unrecognized rules, kept so a save/reload cycle does not drop them.
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

impl ValidationRules {
    /// Whether no rule is configured.
    pub fn is_empty(&self) -> bool {
        self.required_args.is_none() && self.file_exists.is_none() && self.other.is_empty()
    }

    /// Require each of `args` to be present.
    pub fn require_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_args = Some(RequiredArgsRule {
            args: args.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Require the arguments at `indices` to be existing paths.
    pub fn require_files(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.file_exists = Some(FileExistsRule {
            indices: indices.into_iter().collect(),
        });
        self
    }
}

/// `required_args: {args: [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequiredArgsRule {
    pub args: Vec<String>,
}

/// `file_exists: {indices: [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileExistsRule {
    pub indices: Vec<usize>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level name (case-insensitive).
    pub level: String,

    /// Human layout; `"compact"` selects the compact layout.
    pub format: String,

    /// Log file; enables the rotating file sink.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    /// Rotation threshold in bytes.
    pub max_file_size: u64,

    /// Number of rotated files kept next to the active one.
    pub backup_count: usize,

    /// Render records as JSON lines instead of human text.
    pub json_format: bool,

    /// Remote collector address (carried, not used by the core).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<String>,

    /// Emit records to stderr.
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: DEFAULT_LOG_FORMAT.to_string(),
            file_path: None,
            max_file_size: DEFAULT_MAX_LOG_FILE_SIZE,
            backup_count: DEFAULT_LOG_BACKUP_COUNT,
            json_format: false,
            remote_endpoint: None,
            console: true,
        }
    }
}

/// Process-wide configuration aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapperConfig {
    /// Configured tools keyed by name.
    pub tools: BTreeMap<String, ToolConfig>,

    /// Logging sinks and level.
    pub logging: LoggingConfig,

    /// Named partial override trees; never applied automatically.
    pub profiles: BTreeMap<String, serde_yaml::Value>,

    /// Fallback timeout when a tool sets none.
    pub global_timeout: u64,

    /// Worker pool bound for batch and async execution.
    pub max_concurrent_jobs: usize,

    /// Exported to children as TMPDIR/TEMP/TMP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_directory: Option<String>,

    /// Sample CPU/memory of running tools.
    pub monitoring_enabled: bool,

    /// Metrics collector address (carried, not used by the core).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_endpoint: Option<String>,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            tools: BTreeMap::new(),
            logging: LoggingConfig::default(),
            profiles: BTreeMap::new(),
            global_timeout: DEFAULT_GLOBAL_TIMEOUT_SECS,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            temp_directory: None,
            monitoring_enabled: true,
            metrics_endpoint: None,
        }
    }
}

impl WrapperConfig {
    /// Insert a tool, keyed by its name.
    pub fn with_tool(mut self, tool: ToolConfig) -> Self {
        self.tools.insert(tool.name.clone(), tool);
        self
    }

    /// Names of all configured tools, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Copy each mapping key into the tool's `name` field.
    pub(crate) fn assign_tool_names(&mut self) {
        for (name, tool) in self.tools.iter_mut() {
            tool.name = name.clone();
        }
    }

    /// Global timeout as a `Duration`; `None` when configured as 0.
    pub fn global_timeout(&self) -> Option<Duration> {
        (self.global_timeout > 0).then(|| Duration::from_secs(self.global_timeout))
    }
}
