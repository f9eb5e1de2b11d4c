//! Spawning, supervising and reaping tool processes.
//!
//! One execution:
//! - resolve the executable and spawn it with piped output
//! - register the child before any blocking wait
//! - stream stdout/stderr on reader threads, sample resources on another
//! - poll for exit against the deadline, escalating SIGTERM to SIGKILL on timeout
//! - deregister and emit the execution record

use super::locate::find_tool_executable;
use super::monitor::{ResourceMonitor, ResourceSummary};
use super::proc_stats::{clk_tck, read_stat, read_statm, state_name};
use super::registry::{ProcessRegistry, RegisteredProcess};
use super::signal::{exit_code, lock_child, terminate_all, terminate_with_grace, SharedChild};
use crate::logging::{event_names, ExecutionRecord, LogManager};
use crate::pool::{JobHandle, WorkerPool};
use chrono::{DateTime, Utc};
use pcm_common::{render_command, Error, ProcessResult, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Callback receiving each stdout line without its trailing newline.
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// What to run.
#[derive(Clone)]
pub struct ProcessSpec {
    pub tool_name: String,
    pub executable: String,
    pub args: Vec<String>,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub cwd: Option<PathBuf>,
    /// Overlaid on the inherited environment.
    pub env: BTreeMap<String, String>,
    pub monitor_resources: bool,
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for ProcessSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSpec")
            .field("tool_name", &self.tool_name)
            .field("executable", &self.executable)
            .field("args", &self.args)
            .field("timeout", &self.timeout)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("monitor_resources", &self.monitor_resources)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl ProcessSpec {
    pub fn new(tool_name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            executable: executable.into(),
            args: Vec::new(),
            timeout: None,
            cwd: None,
            env: BTreeMap::new(),
            monitor_resources: true,
            progress: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor_resources = enabled;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn with_progress_callback(mut self, callback: Option<ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Rendered command line used in results and logs.
    pub fn command_line(&self) -> String {
        render_command(&self.executable, &self.args)
    }
}

/// Timing knobs for process supervision.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Grace between SIGTERM and SIGKILL on timeout or kill.
    pub term_grace: Duration,
    /// Grace used by [`ProcessManager::shutdown`].
    pub shutdown_grace: Duration,
    pub sample_interval: Duration,
    /// Exit polling interval.
    pub poll_interval: Duration,
    /// How long to wait for each output reader after exit.
    pub reader_wait: Duration,
    /// Searched before the default locations.
    pub search_paths: Vec<PathBuf>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            term_grace: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
            sample_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
            reader_wait: Duration::from_secs(1),
            search_paths: Vec::new(),
        }
    }
}

/// Point-in-time view of a registered process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveProcessInfo {
    pub pid: u32,
    pub tool_name: String,
    pub status: String,
    /// Average over the process lifetime.
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub create_time: DateTime<Utc>,
}

impl ActiveProcessInfo {
    fn probe(entry: &RegisteredProcess) -> Self {
        let stat = read_stat(entry.pid);
        let status = stat
            .map(|s| state_name(s.state).to_string())
            .unwrap_or_else(|| "running".to_string());
        let alive_secs = (Utc::now() - entry.started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        let cpu_percent = match stat {
            Some(s) if alive_secs > 0.0 => {
                s.total_ticks() as f64 / clk_tck() as f64 / alive_secs * 100.0
            }
            _ => 0.0,
        };
        let memory_mb = read_statm(entry.pid)
            .map(|m| m.rss_bytes() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);
        Self {
            pid: entry.pid,
            tool_name: entry.tool_name.clone(),
            status,
            cpu_percent,
            memory_mb,
            create_time: entry.started_at,
        }
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut(Duration),
}

/// Lines read from one output pipe.
struct OutputCollector {
    buffer: Arc<Mutex<String>>,
    done: Receiver<()>,
}

impl OutputCollector {
    fn spawn<R>(
        stream: R,
        name: &str,
        on_line: Option<ProgressCallback>,
        log: LogManager,
    ) -> std::io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(String::new()));
        let (done_tx, done) = mpsc::channel();
        let sink = Arc::clone(&buffer);
        thread::Builder::new()
            .name(format!("pcm-{}-reader", name))
            .spawn(move || {
                let _guard = log.enter();
                let mut reader = BufReader::new(stream);
                let mut raw = Vec::new();
                loop {
                    raw.clear();
                    match reader.read_until(b'\n', &mut raw) {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&raw);
                            if let Some(callback) = &on_line {
                                callback(line.trim_end_matches(['\n', '\r']));
                            }
                            sink.lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push_str(&line);
                        }
                        Err(e) => {
                            debug!(error = %e, "output reader stopped");
                            break;
                        }
                    }
                }
                let _ = done_tx.send(());
            })?;
        Ok(Self { buffer, done })
    }

    /// Wait briefly for the reader, then take whatever it collected.
    ///
    /// On timeout, output the reader appends afterwards is not returned.
    fn finish(self, stream: &str, wait: Duration) -> String {
        if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(wait) {
            debug!(
                stream,
                wait_ms = wait.as_millis() as u64,
                "output reader still open after exit; output may be truncated"
            );
        }
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Runs tools and tracks the children it spawned.
#[derive(Clone)]
pub struct ProcessManager {
    registry: Arc<ProcessRegistry>,
    log: LogManager,
    settings: Arc<ExecutionSettings>,
    pool: Arc<WorkerPool>,
    shut_down: Arc<AtomicBool>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("active", &self.registry.len())
            .field("workers", &self.pool.size())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ProcessManager {
    /// Manager with default timings and `max_workers` background workers.
    pub fn new(max_workers: usize, log: LogManager) -> Result<Self> {
        Self::with_settings(max_workers, log, ExecutionSettings::default())
    }

    pub fn with_settings(
        max_workers: usize,
        log: LogManager,
        settings: ExecutionSettings,
    ) -> Result<Self> {
        let pool = WorkerPool::new("pcm-process", max_workers)?;
        Ok(Self {
            registry: Arc::new(ProcessRegistry::new()),
            log,
            settings: Arc::new(settings),
            pool: Arc::new(pool),
            shut_down: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn log(&self) -> &LogManager {
        &self.log
    }

    /// Run a tool to completion.
    ///
    /// A non-zero exit is returned as a result, not an error.
    pub fn execute_tool(&self, spec: &ProcessSpec) -> Result<ProcessResult> {
        let _guard = self.log.enter();
        let command = spec.command_line();
        let outcome = self.run(spec, &command);
        if let Err(err) = &outcome {
            warn!(tool = %spec.tool_name, error = %err, "tool execution failed");
            self.log.audit(
                event_names::TOOL_EXECUTION_ERROR,
                json!({
                    "tool": spec.tool_name,
                    "command": command,
                    "error": err.to_string(),
                    "error_code": err.code(),
                }),
            );
        }
        outcome
    }

    /// Run a tool on the manager's worker pool.
    pub fn execute_tool_async(&self, spec: ProcessSpec) -> JobHandle<Result<ProcessResult>> {
        let manager = self.clone();
        self.pool.submit(move || manager.execute_tool(&spec))
    }

    fn run(&self, spec: &ProcessSpec, command: &str) -> Result<ProcessResult> {
        let executable = find_tool_executable(&spec.executable, &self.settings.search_paths)?;

        let mut cmd = Command::new(&executable);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        debug!(tool = %spec.tool_name, executable = %executable.display(), "spawning tool");
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| wrap_failure(&spec.tool_name, &e))?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let child: SharedChild = Arc::new(Mutex::new(child));
        let entry = self.registry.register(&spec.tool_name, pid, Arc::clone(&child));

        self.log.audit(
            event_names::TOOL_EXECUTION_START,
            json!({"tool": spec.tool_name, "command": command, "pid": pid}),
        );

        let readers = self.spawn_readers(stdout, stderr, spec.progress.clone());
        let (out_reader, err_reader) = match readers {
            Ok(readers) => readers,
            Err(e) => {
                self.abandon(&entry);
                return Err(wrap_failure(&spec.tool_name, &e));
            }
        };

        let monitor = spec.monitor_resources.then(|| {
            ResourceMonitor::start(pid, self.settings.sample_interval, self.log.clone())
        });

        let waited = self.wait_for_exit(&child, spec.timeout, started);
        let resources = monitor.and_then(ResourceMonitor::stop);

        let status = match waited {
            Ok(WaitOutcome::Exited(status)) => status,
            Ok(WaitOutcome::TimedOut(limit)) => {
                warn!(
                    tool = %spec.tool_name,
                    pid,
                    timeout_secs = limit.as_secs_f64(),
                    "tool timed out, terminating"
                );
                self.abandon(&entry);
                return Err(Error::timeout(limit));
            }
            Err(e) => {
                self.abandon(&entry);
                return Err(wrap_failure(&spec.tool_name, &e));
            }
        };
        self.registry.deregister(&entry.key);

        let reader_wait = self.settings.reader_wait;
        let result = ProcessResult {
            return_code: exit_code(status),
            stdout: out_reader
                .map(|r| r.finish("stdout", reader_wait))
                .unwrap_or_default(),
            stderr: err_reader
                .map(|r| r.finish("stderr", reader_wait))
                .unwrap_or_default(),
            duration: started.elapsed(),
            command: command.to_string(),
            tool_name: spec.tool_name.clone(),
        };

        self.log
            .tool_execution(&ExecutionRecord::new(&result, resources.as_ref()));
        if let Some(summary) = &resources {
            self.record_resources(&spec.tool_name, summary);
        }
        Ok(result)
    }

    fn spawn_readers<O, E>(
        &self,
        stdout: Option<O>,
        stderr: Option<E>,
        progress: Option<ProgressCallback>,
    ) -> std::io::Result<(Option<OutputCollector>, Option<OutputCollector>)>
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        let out = stdout
            .map(|s| OutputCollector::spawn(s, "stdout", progress, self.log.clone()))
            .transpose()?;
        let err = stderr
            .map(|s| OutputCollector::spawn(s, "stderr", None, self.log.clone()))
            .transpose()?;
        Ok((out, err))
    }

    fn wait_for_exit(
        &self,
        child: &SharedChild,
        timeout: Option<Duration>,
        started: Instant,
    ) -> std::io::Result<WaitOutcome> {
        loop {
            if let Some(status) = lock_child(child).try_wait()? {
                return Ok(WaitOutcome::Exited(status));
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Ok(WaitOutcome::TimedOut(limit));
                }
            }
            thread::sleep(self.settings.poll_interval);
        }
    }

    /// Stop a child that will not produce a result and forget it.
    fn abandon(&self, entry: &RegisteredProcess) {
        if let Err(e) = terminate_with_grace(
            &entry.child,
            self.settings.term_grace,
            self.settings.poll_interval,
        ) {
            warn!(pid = entry.pid, error = %e, "failed to terminate process");
        }
        self.registry.deregister(&entry.key);
    }

    fn record_resources(&self, tool_name: &str, summary: &ResourceSummary) {
        self.log.performance_metric(
            &format!("{}_resource_usage", tool_name),
            summary.duration_seconds,
            "seconds",
            serde_json::to_value(summary).unwrap_or_default(),
        );
    }

    /// Terminate a tool's processes, or only `pid` when given.
    ///
    /// Returns whether any process was signalled.
    pub fn kill_process(&self, tool_name: &str, pid: Option<u32>) -> bool {
        let _guard = self.log.enter();
        let targets = self.registry.matching(tool_name, pid);
        if targets.is_empty() {
            debug!(tool = tool_name, ?pid, "no matching process to kill");
            return false;
        }

        let mut killed = false;
        for entry in targets {
            match terminate_with_grace(
                &entry.child,
                self.settings.term_grace,
                self.settings.poll_interval,
            ) {
                Ok(termination) => {
                    self.registry.deregister(&entry.key);
                    if termination.was_signalled() {
                        killed = true;
                        info!(tool = tool_name, pid = entry.pid, method = termination.method(), "process killed");
                        self.log.audit(
                            event_names::PROCESS_KILLED,
                            json!({
                                "tool": tool_name,
                                "pid": entry.pid,
                                "method": termination.method(),
                            }),
                        );
                    }
                }
                Err(e) => warn!(tool = tool_name, pid = entry.pid, error = %e, "failed to kill process"),
            }
        }
        killed
    }

    /// Registered processes that are still running.
    ///
    /// Entries whose child has exited are removed and omitted.
    pub fn get_active_processes(&self) -> BTreeMap<String, ActiveProcessInfo> {
        let mut active = BTreeMap::new();
        for entry in self.registry.snapshot() {
            let running = matches!(lock_child(&entry.child).try_wait(), Ok(None));
            if !running {
                self.registry.deregister(&entry.key);
                continue;
            }
            active.insert(entry.key.clone(), ActiveProcessInfo::probe(&entry));
        }
        active
    }

    /// Number of registered processes.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Terminate every registered process and drain the worker pool.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = self.log.enter();
        let entries = self.registry.drain();
        info!(active = entries.len(), "shutting down process manager");

        let children: Vec<&SharedChild> = entries.iter().map(|e| &e.child).collect();
        let outcomes = terminate_all(
            &children,
            self.settings.shutdown_grace,
            self.settings.poll_interval,
        );
        for (entry, outcome) in entries.iter().zip(outcomes) {
            match outcome {
                Ok(termination) if termination.was_signalled() => {
                    debug!(key = %entry.key, method = termination.method(), "stopped process");
                }
                Ok(_) => {}
                Err(e) => warn!(key = %entry.key, error = %e, "failed to stop process"),
            }
        }
        self.pool.shutdown();
    }
}

fn wrap_failure(tool_name: &str, cause: &dyn std::fmt::Display) -> Error {
    Error::execution(
        format!("Failed to execute tool '{}': {}", tool_name, cause),
        -1,
        cause.to_string(),
    )
}
