//! Structured audit, execution and performance events.
//!
//! Each helper enters the owning [`LogManager`] before emitting, so records
//! reach the right sinks from any thread.

use super::LogManager;
use crate::process::ResourceSummary;
use pcm_common::{Error, ProcessResult};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Target for audit events.
pub const AUDIT_TARGET: &str = "postcodemon::audit";
/// Target for per-execution records.
pub const EXECUTION_TARGET: &str = "postcodemon::execution";
/// Target for performance metrics.
pub const METRICS_TARGET: &str = "postcodemon::metrics";
/// Target for operation timing.
pub const PERFORMANCE_TARGET: &str = "postcodemon::performance";

/// Characters of stderr kept on failed execution records.
const STDERR_SAMPLE_CHARS: usize = 500;

/// Standard audit event types.
pub mod event_names {
    pub const TOOL_EXECUTION_START: &str = "tool_execution_start";
    pub const TOOL_EXECUTION_SUCCESS: &str = "tool_execution_success";
    pub const TOOL_EXECUTION_ERROR: &str = "tool_execution_error";
    pub const PROCESS_KILLED: &str = "process_killed";
    pub const CONFIG_RELOADED: &str = "config_reloaded";
    pub const WRAPPER_SHUTDOWN: &str = "wrapper_shutdown";
}

/// One finished execution, as written to the execution log.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord<'a> {
    pub tool_name: &'a str,
    pub command: &'a str,
    pub return_code: i32,
    pub duration_seconds: f64,
    pub success: bool,
    pub stdout_length: usize,
    pub stderr_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_sample: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_usage: Option<&'a ResourceSummary>,
}

impl<'a> ExecutionRecord<'a> {
    pub fn new(result: &'a ProcessResult, resources: Option<&'a ResourceSummary>) -> Self {
        let success = result.success();
        Self {
            tool_name: &result.tool_name,
            command: &result.command,
            return_code: result.return_code,
            duration_seconds: result.duration.as_secs_f64(),
            success,
            stdout_length: result.stdout.len(),
            stderr_length: result.stderr.len(),
            stderr_sample: (!success && !result.stderr.is_empty())
                .then(|| result.stderr.chars().take(STDERR_SAMPLE_CHARS).collect()),
            resource_usage: resources,
        }
    }
}

impl LogManager {
    /// Emit an audit event.
    pub fn audit(&self, event_type: &str, details: Value) {
        let _guard = self.enter();
        let user = current_user();
        tracing::info!(
            target: AUDIT_TARGET,
            run_id = %self.run_id(),
            event_type,
            user = %user,
            details = %details,
            "Audit event: {}",
            event_type
        );
    }

    /// Emit the structured record for a finished execution.
    pub fn tool_execution(&self, record: &ExecutionRecord<'_>) {
        let _guard = self.enter();
        let payload = serde_json::to_string(record).unwrap_or_default();
        if record.success {
            tracing::info!(
                target: EXECUTION_TARGET,
                run_id = %self.run_id(),
                tool = record.tool_name,
                return_code = record.return_code,
                duration_seconds = record.duration_seconds,
                record = %payload,
                "Tool execution completed: {}",
                record.tool_name
            );
        } else {
            tracing::warn!(
                target: EXECUTION_TARGET,
                run_id = %self.run_id(),
                tool = record.tool_name,
                return_code = record.return_code,
                duration_seconds = record.duration_seconds,
                record = %payload,
                "Tool execution failed: {}",
                record.tool_name
            );
        }
    }

    /// Emit a named metric.
    pub fn performance_metric(&self, name: &str, value: f64, unit: &str, context: Value) {
        let _guard = self.enter();
        tracing::info!(
            target: METRICS_TARGET,
            run_id = %self.run_id(),
            metric = name,
            value,
            unit,
            context = %context,
            "Performance metric: {} = {} {}",
            name,
            value,
            unit
        );
    }

    /// Start timing an operation.
    pub fn time_operation(&self, operation: impl Into<String>, context: Value) -> OperationTimer {
        OperationTimer::start(self.clone(), operation.into(), context)
    }
}

/// Logs start, completion or failure of an operation with its duration.
///
/// Dropping an unfinished timer logs the operation as abandoned.
#[must_use = "finish the timer with complete() or fail()"]
pub struct OperationTimer {
    log: LogManager,
    operation: String,
    context: Value,
    started: Instant,
    finished: bool,
}

impl OperationTimer {
    fn start(log: LogManager, operation: String, context: Value) -> Self {
        {
            let _guard = log.enter();
            tracing::debug!(
                target: PERFORMANCE_TARGET,
                run_id = %log.run_id(),
                operation = %operation,
                context = %context,
                "Starting operation: {}",
                operation
            );
        }
        Self {
            log,
            operation,
            context,
            started: Instant::now(),
            finished: false,
        }
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Log successful completion and return the elapsed time.
    pub fn complete(mut self) -> Duration {
        self.finished = true;
        let elapsed = self.started.elapsed();
        let _guard = self.log.enter();
        tracing::info!(
            target: PERFORMANCE_TARGET,
            run_id = %self.log.run_id(),
            operation = %self.operation,
            duration_seconds = elapsed.as_secs_f64(),
            context = %self.context,
            "Operation completed: {} ({:.3}s)",
            self.operation,
            elapsed.as_secs_f64()
        );
        elapsed
    }

    /// Log failure with the error code and return the elapsed time.
    pub fn fail(mut self, err: &Error) -> Duration {
        self.finished = true;
        let elapsed = self.started.elapsed();
        let _guard = self.log.enter();
        tracing::error!(
            target: PERFORMANCE_TARGET,
            run_id = %self.log.run_id(),
            operation = %self.operation,
            duration_seconds = elapsed.as_secs_f64(),
            error_code = err.code(),
            error = %err,
            context = %self.context,
            "Operation failed: {} ({:.3}s)",
            self.operation,
            elapsed.as_secs_f64()
        );
        elapsed
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let _guard = self.log.enter();
        tracing::warn!(
            target: PERFORMANCE_TARGET,
            run_id = %self.log.run_id(),
            operation = %self.operation,
            duration_seconds = self.started.elapsed().as_secs_f64(),
            "Operation abandoned: {}",
            self.operation
        );
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcm_config::LoggingConfig;
    use std::fs;
    use tempfile::TempDir;

    fn json_log(dir: &TempDir) -> LogManager {
        LogManager::new(&LoggingConfig {
            level: "debug".into(),
            json_format: true,
            console: false,
            file_path: Some(dir.path().join("events.log").display().to_string()),
            ..LoggingConfig::default()
        })
        .unwrap()
    }

    fn records(dir: &TempDir) -> Vec<Value> {
        fs::read_to_string(dir.path().join("events.log"))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn failed_result() -> ProcessResult {
        ProcessResult {
            return_code: 2,
            stdout: String::new(),
            stderr: "x".repeat(800),
            duration: Duration::from_millis(250),
            command: "tool --bad".into(),
            tool_name: "tool".into(),
        }
    }

    #[test]
    fn test_audit_event_fields() {
        let dir = TempDir::new().unwrap();
        let log = json_log(&dir);
        log.audit(
            event_names::PROCESS_KILLED,
            serde_json::json!({"tool": "sleeper", "pid": 42}),
        );
        log.shutdown();

        let records = records(&dir);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["target"], AUDIT_TARGET);
        assert_eq!(record["event_type"], "process_killed");
        assert_eq!(record["run_id"], log.run_id());
        let details: Value = serde_json::from_str(record["details"].as_str().unwrap()).unwrap();
        assert_eq!(details["pid"], 42);
    }

    #[test]
    fn test_execution_record_samples_stderr_on_failure() {
        let result = failed_result();
        let record = ExecutionRecord::new(&result, None);
        assert!(!record.success);
        assert_eq!(record.stderr_length, 800);
        assert_eq!(record.stderr_sample.as_ref().unwrap().len(), STDERR_SAMPLE_CHARS);

        let ok = ProcessResult {
            return_code: 0,
            ..failed_result()
        };
        assert!(ExecutionRecord::new(&ok, None).stderr_sample.is_none());
    }

    #[test]
    fn test_tool_execution_logged_as_warning_on_failure() {
        let dir = TempDir::new().unwrap();
        let log = json_log(&dir);
        let result = failed_result();
        log.tool_execution(&ExecutionRecord::new(&result, None));
        log.shutdown();

        let records = records(&dir);
        assert_eq!(records[0]["level"], "WARN");
        assert_eq!(records[0]["target"], EXECUTION_TARGET);
        assert_eq!(records[0]["return_code"], 2);
    }

    #[test]
    fn test_operation_timer_complete_and_fail() {
        let dir = TempDir::new().unwrap();
        let log = json_log(&dir);

        let timer = log.time_operation("execute_echo", serde_json::json!({"args": 1}));
        assert_eq!(timer.operation(), "execute_echo");
        timer.complete();

        let timer = log.time_operation("execute_sleeper", Value::Null);
        timer.fail(&Error::timeout(Duration::from_secs(1)));
        log.shutdown();

        let records = records(&dir);
        let messages: Vec<&str> = records
            .iter()
            .map(|r| r["message"].as_str().unwrap())
            .collect();
        assert!(messages[0].starts_with("Starting operation: execute_echo"));
        assert!(messages[1].starts_with("Operation completed: execute_echo"));
        assert!(messages[3].starts_with("Operation failed: execute_sleeper"));
        assert_eq!(records[3]["error_code"], "EXECUTION_TIMEOUT");
    }

    #[test]
    fn test_metric_event() {
        let dir = TempDir::new().unwrap();
        let log = json_log(&dir);
        log.performance_metric("echo_resource_usage", 1.5, "seconds", Value::Null);
        log.shutdown();

        let records = records(&dir);
        assert_eq!(records[0]["target"], METRICS_TARGET);
        assert_eq!(records[0]["metric"], "echo_resource_usage");
        assert_eq!(records[0]["unit"], "seconds");
    }
}
