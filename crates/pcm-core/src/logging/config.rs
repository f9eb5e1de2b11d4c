//! Logging settings derived from [`LoggingConfig`].

use pcm_common::{Error, Result};
use pcm_config::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug information.
    Debug,
    /// Standard operational info (default).
    #[default]
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
    /// Completely silent.
    Off,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "critical" | "fatal" => Ok(LogLevel::Error),
            "off" | "none" | "quiet" => Ok(LogLevel::Off),
            _ => Err(format!("unknown log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Off => write!(f, "off"),
        }
    }
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
            LogLevel::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
            LogLevel::Info => tracing_subscriber::filter::LevelFilter::INFO,
            LogLevel::Warn => tracing_subscriber::filter::LevelFilter::WARN,
            LogLevel::Error => tracing_subscriber::filter::LevelFilter::ERROR,
            LogLevel::Off => tracing_subscriber::filter::LevelFilter::OFF,
        }
    }
}

/// Human-readable line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HumanLayout {
    /// Timestamp, level, target, message and fields.
    #[default]
    Full,
    /// Abbreviated single-line layout.
    Compact,
}

impl HumanLayout {
    /// Any value other than `"compact"` selects the full layout, so legacy
    /// printf-style format strings keep working.
    pub fn from_format(format: &str) -> Self {
        if format.trim().eq_ignore_ascii_case("compact") {
            HumanLayout::Compact
        } else {
            HumanLayout::Full
        }
    }
}

/// Resolved sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LogLevel,
    pub json: bool,
    pub layout: HumanLayout,
    pub console: bool,
    pub file_path: Option<String>,
    pub max_file_size: u64,
    pub backup_count: usize,
}

impl LogSettings {
    /// Validate and convert the loaded logging section.
    pub fn from_config(config: &LoggingConfig) -> Result<Self> {
        let level = config
            .level
            .parse::<LogLevel>()
            .map_err(|e| Error::config(format!("invalid logging.level: {}", e)))?;
        Ok(Self {
            level,
            json: config.json_format,
            layout: HumanLayout::from_format(&config.format),
            console: config.console,
            file_path: config.file_path.clone().filter(|p| !p.trim().is_empty()),
            max_file_size: config.max_file_size,
            backup_count: config.backup_count,
        })
    }
}
