//! Structured logging for the execution core.
//!
//! Logging is carried by an explicit [`LogManager`] rather than a global
//! subscriber, so several wrappers in one process can log to different
//! sinks. Each manager owns a `tracing::Dispatch`:
//! - console layer on stderr (human or JSON lines)
//! - optional file layer through a size-rotating, non-blocking writer
//!
//! Component threads call [`LogManager::enter`] to make the dispatch their
//! thread default for the lifetime of the returned guard.
//!
//! # Usage
//!
//! ```ignore
//! let log = LogManager::new(&config.logging)?;
//! let _guard = log.enter();
//! tracing::info!("wrapper ready");
//! log.audit(event_names::TOOL_EXECUTION_START, serde_json::json!({"tool": "echo"}));
//! ```

pub mod config;
pub mod events;
pub mod rotate;

pub use config::{HumanLayout, LogLevel, LogSettings};
pub use events::{
    event_names, ExecutionRecord, OperationTimer, AUDIT_TARGET, EXECUTION_TARGET, METRICS_TARGET,
    PERFORMANCE_TARGET,
};
pub use rotate::RotatingFileWriter;

use pcm_common::{Error, Result};
use pcm_config::LoggingConfig;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::dispatcher::DefaultGuard;
use tracing::Dispatch;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Active sinks plus the guards that keep their writer threads alive.
struct Sinks {
    dispatch: Dispatch,
    settings: Option<LogSettings>,
    // Dropping a guard flushes its non-blocking writer.
    _guards: Vec<WorkerGuard>,
}

impl Sinks {
    fn silent() -> Self {
        Self {
            dispatch: Dispatch::none(),
            settings: None,
            _guards: Vec::new(),
        }
    }
}

/// Cloneable logging context shared by the wrapper and its workers.
#[derive(Clone)]
pub struct LogManager {
    run_id: Arc<str>,
    sinks: Arc<RwLock<Sinks>>,
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("run_id", &self.run_id)
            .field("settings", &self.settings())
            .finish()
    }
}

impl LogManager {
    /// Build sinks from a logging section.
    ///
    /// Fails with a configuration error when the level is unknown or the
    /// log file cannot be opened.
    pub fn new(config: &LoggingConfig) -> Result<Self> {
        let settings = LogSettings::from_config(config)?;
        let sinks = build_sinks(&settings)?;
        Ok(Self {
            run_id: generate_run_id().into(),
            sinks: Arc::new(RwLock::new(sinks)),
        })
    }

    /// A manager that discards every record.
    pub fn disabled() -> Self {
        Self {
            run_id: generate_run_id().into(),
            sinks: Arc::new(RwLock::new(Sinks::silent())),
        }
    }

    /// Correlation id attached to structured events.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Settings of the active sinks, `None` when disabled or shut down.
    pub fn settings(&self) -> Option<LogSettings> {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .settings
            .clone()
    }

    /// Current dispatch.
    pub fn dispatch(&self) -> Dispatch {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dispatch
            .clone()
    }

    /// Install this manager's dispatch as the current thread's default.
    pub fn enter(&self) -> DefaultGuard {
        tracing::dispatcher::set_default(&self.dispatch())
    }

    /// Rebuild the sinks from a new logging section.
    ///
    /// The previous file writer is flushed once the swap completes. On
    /// error the existing sinks stay in place.
    pub fn update_config(&self, config: &LoggingConfig) -> Result<()> {
        let settings = LogSettings::from_config(config)?;
        let sinks = build_sinks(&settings)?;
        let previous = {
            let mut guard = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, sinks)
        };
        drop(previous);
        Ok(())
    }

    /// Flush and detach all sinks. Later records are discarded.
    pub fn shutdown(&self) {
        let previous = {
            let mut guard = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, Sinks::silent())
        };
        drop(previous);
    }
}

fn build_sinks(settings: &LogSettings) -> Result<Sinks> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = Vec::new();

    if settings.console {
        let use_ansi = !settings.json && std::io::stderr().is_terminal();
        layers.push(sink_layer(std::io::stderr, settings, use_ansi));
    }

    if let Some(path) = &settings.file_path {
        let writer =
            RotatingFileWriter::open(path, settings.max_file_size, settings.backup_count)
                .map_err(|e| Error::Configuration {
                    message: format!("failed to open log file {}: {}", path, e),
                    path: Some(PathBuf::from(path)),
                })?;
        let (non_blocking, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .thread_name("pcm-log-writer")
            .finish(writer);
        guards.push(guard);
        layers.push(sink_layer(non_blocking, settings, false));
    }

    let subscriber = tracing_subscriber::registry().with(layers);
    Ok(Sinks {
        dispatch: Dispatch::new(subscriber),
        settings: Some(settings.clone()),
        _guards: guards,
    })
}

fn sink_layer<W>(writer: W, settings: &LogSettings, use_ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(use_ansi);

    if settings.json {
        return base
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_filter(level_filter(settings.level))
            .boxed();
    }

    match settings.layout {
        HumanLayout::Compact => base
            .compact()
            .with_filter(level_filter(settings.level))
            .boxed(),
        HumanLayout::Full => base.with_filter(level_filter(settings.level)).boxed(),
    }
}

/// `RUST_LOG` wins over the configured level when set.
fn level_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Generate a unique run ID for a wrapper instance.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &uuid[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn file_config(dir: &TempDir, json: bool) -> LoggingConfig {
        LoggingConfig {
            level: "debug".into(),
            json_format: json,
            console: false,
            file_path: Some(dir.path().join("pcm.log").display().to_string()),
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();

        assert!(id1.starts_with("run-"));
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 16);
        assert!(id1[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_file_sink_receives_records() {
        let dir = TempDir::new().unwrap();
        let log = LogManager::new(&file_config(&dir, false)).unwrap();
        {
            let _guard = log.enter();
            tracing::info!(target: "postcodemon::test", "hello from the file sink");
        }
        log.shutdown();

        let content = fs::read_to_string(dir.path().join("pcm.log")).unwrap();
        assert!(content.contains("hello from the file sink"));
        assert!(content.contains("postcodemon::test"));
    }

    #[test]
    fn test_json_file_sink_writes_objects() {
        let dir = TempDir::new().unwrap();
        let log = LogManager::new(&file_config(&dir, true)).unwrap();
        {
            let _guard = log.enter();
            tracing::warn!(target: "postcodemon::test", answer = 42, "structured");
        }
        log.shutdown();

        let content = fs::read_to_string(dir.path().join("pcm.log")).unwrap();
        let line = content.lines().next().expect("one record");
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["level"], "WARN");
        assert_eq!(value["target"], "postcodemon::test");
        assert_eq!(value["message"], "structured");
        assert_eq!(value["answer"], 42);
    }

    #[test]
    fn test_records_after_shutdown_are_dropped() {
        let dir = TempDir::new().unwrap();
        let log = LogManager::new(&file_config(&dir, false)).unwrap();
        log.shutdown();
        {
            let _guard = log.enter();
            tracing::error!("should not appear");
        }
        let content = fs::read_to_string(dir.path().join("pcm.log")).unwrap();
        assert!(!content.contains("should not appear"));
        assert!(log.settings().is_none());
    }

    #[test]
    fn test_update_config_switches_sinks() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let log = LogManager::new(&file_config(&first, false)).unwrap();
        log.update_config(&file_config(&second, false)).unwrap();
        {
            let _guard = log.enter();
            tracing::info!("after update");
        }
        log.shutdown();

        let old = fs::read_to_string(first.path().join("pcm.log")).unwrap();
        let new = fs::read_to_string(second.path().join("pcm.log")).unwrap();
        assert!(!old.contains("after update"));
        assert!(new.contains("after update"));
    }

    #[test]
    fn test_bad_level_keeps_existing_sinks() {
        let dir = TempDir::new().unwrap();
        let log = LogManager::new(&file_config(&dir, false)).unwrap();
        let bad = LoggingConfig {
            level: "shouty".into(),
            ..file_config(&dir, false)
        };
        assert!(log.update_config(&bad).is_err());
        assert_eq!(log.settings().unwrap().level, LogLevel::Debug);
    }

    #[test]
    fn test_clones_share_sinks() {
        let log = LogManager::disabled();
        let clone = log.clone();
        assert_eq!(log.run_id(), clone.run_id());
        assert!(clone.settings().is_none());
    }
}
