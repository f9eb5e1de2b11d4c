//! The tool wrapper: configured tools executed with validation, retries,
//! batching and introspection.
//!
//! # Usage
//!
//! ```ignore
//! let wrapper = ToolWrapper::new(ConfigOptions::default(), Some("flasher".into()))?;
//! let result = wrapper.execute_tool(&ExecuteRequest::new().with_args(["--image", "bios.bin"]))?;
//! println!("{}", result);
//! ```

pub mod batch;
pub mod info;
pub mod request;
pub mod validate;

pub use batch::{BatchOptions, BatchProgress};
pub use info::{ToolInfo, ToolListing, VERSION_FLAGS, VERSION_PROBE_TIMEOUT};
pub use request::ExecuteRequest;

use crate::logging::{event_names, LogManager};
use crate::pool::{JobHandle, WorkerPool};
use crate::process::{
    find_tool_executable, ActiveProcessInfo, ExecutionSettings, ProcessManager, ProcessSpec,
};
use pcm_common::{Error, ProcessResult, Result};
use pcm_config::{ConfigManager, ConfigOptions, ToolConfig, WrapperConfig};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use tracing::{error, info, warn};

/// Environment variables that receive `temp_directory`.
const TEMP_DIR_VARS: &[&str] = &["TMPDIR", "TEMP", "TMP"];

/// Fully resolved settings for one call.
struct ExecutionPlan {
    tool_name: String,
    tool: ToolConfig,
    spec: ProcessSpec,
    command: String,
}

impl ExecutionPlan {
    fn dry_run_result(&self) -> ProcessResult {
        ProcessResult {
            return_code: 0,
            stdout: format!("DRY RUN: {}", self.command),
            stderr: String::new(),
            duration: std::time::Duration::ZERO,
            command: self.command.clone(),
            tool_name: self.tool_name.clone(),
        }
    }
}

struct WrapperInner {
    config_manager: Option<ConfigManager>,
    config: RwLock<Arc<WrapperConfig>>,
    default_tool: Option<String>,
    log: LogManager,
    processes: ProcessManager,
    pool: WorkerPool,
    shut_down: AtomicBool,
}

/// Builder for [`ToolWrapper`].
#[derive(Debug, Default)]
pub struct ToolWrapperBuilder {
    options: Option<ConfigOptions>,
    config: Option<Arc<WrapperConfig>>,
    default_tool: Option<String>,
    settings: ExecutionSettings,
}

impl ToolWrapperBuilder {
    /// Load configuration through a [`ConfigManager`] with these options.
    pub fn config_options(mut self, options: ConfigOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Use an in-memory configuration. Takes precedence over options, and
    /// disables [`ToolWrapper::reload_config`].
    pub fn config(mut self, config: Arc<WrapperConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn default_tool(mut self, tool: Option<String>) -> Self {
        self.default_tool = tool;
        self
    }

    pub fn execution_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<ToolWrapper> {
        let (config_manager, config) = match self.config {
            Some(config) => (None, config),
            None => {
                let manager = ConfigManager::new(self.options.unwrap_or_default());
                let config = manager.load_config()?;
                (Some(manager), config)
            }
        };

        let log = LogManager::new(&config.logging)?;
        let processes =
            ProcessManager::with_settings(config.max_concurrent_jobs, log.clone(), self.settings)?;
        let pool = WorkerPool::new("pcm-wrapper", config.max_concurrent_jobs)?;

        {
            let _guard = log.enter();
            info!(
                run_id = %log.run_id(),
                default_tool = ?self.default_tool,
                tools = ?config.tool_names(),
                max_concurrent = config.max_concurrent_jobs,
                "PostCodeMon wrapper initialized"
            );
        }

        Ok(ToolWrapper {
            inner: Arc::new(WrapperInner {
                config_manager,
                config: RwLock::new(config),
                default_tool: self.default_tool,
                log,
                processes,
                pool,
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

/// Executes configured tools.
///
/// Shutdown runs on drop; call [`shutdown`](Self::shutdown) to do it
/// explicitly.
pub struct ToolWrapper {
    inner: Arc<WrapperInner>,
}

impl std::fmt::Debug for ToolWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolWrapper")
            .field("run_id", &self.inner.log.run_id())
            .field("default_tool", &self.inner.default_tool)
            .field("tools", &self.inner.config().tool_names())
            .finish()
    }
}

impl ToolWrapper {
    pub fn builder() -> ToolWrapperBuilder {
        ToolWrapperBuilder::default()
    }

    /// Load configuration from files and build the wrapper.
    pub fn new(options: ConfigOptions, default_tool: Option<String>) -> Result<Self> {
        Self::builder()
            .config_options(options)
            .default_tool(default_tool)
            .build()
    }

    /// Build from an in-memory configuration.
    pub fn from_config(config: Arc<WrapperConfig>, default_tool: Option<String>) -> Result<Self> {
        Self::builder()
            .config(config)
            .default_tool(default_tool)
            .build()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<WrapperConfig> {
        self.inner.config()
    }

    pub fn default_tool(&self) -> Option<&str> {
        self.inner.default_tool.as_deref()
    }

    pub fn log(&self) -> &LogManager {
        &self.inner.log
    }

    pub fn process_manager(&self) -> &ProcessManager {
        &self.inner.processes
    }

    /// Run a tool with validation and retries.
    pub fn execute_tool(&self, request: &ExecuteRequest) -> Result<ProcessResult> {
        self.inner.execute_tool(request)
    }

    /// Run [`execute_tool`](Self::execute_tool) on the wrapper's pool.
    pub fn execute_tool_async(&self, request: ExecuteRequest) -> JobHandle<Result<ProcessResult>> {
        let inner = Arc::clone(&self.inner);
        self.inner.pool.submit(move || inner.execute_tool(&request))
    }

    /// Run `tool` once per argument list. See [`BatchOptions`].
    pub fn execute_batch(
        &self,
        tool: &str,
        batch_args: &[Vec<String>],
        options: &BatchOptions,
    ) -> Vec<ProcessResult> {
        self.inner.execute_batch(tool, batch_args, options)
    }

    /// Describe a tool and probe its version.
    pub fn get_tool_info(&self, tool: Option<&str>) -> Result<ToolInfo> {
        self.inner.get_tool_info(tool)
    }

    /// Describe every configured tool.
    pub fn list_tools(&self) -> BTreeMap<String, ToolListing> {
        let config = self.inner.config();
        config
            .tool_names()
            .into_iter()
            .map(|name| {
                let listing = match self.inner.get_tool_info(Some(&name)) {
                    Ok(info) => ToolListing::Info(info),
                    Err(err) => ToolListing::Error {
                        name: name.clone(),
                        error: err.to_string(),
                    },
                };
                (name, listing)
            })
            .collect()
    }

    pub fn get_active_processes(&self) -> BTreeMap<String, ActiveProcessInfo> {
        self.inner.processes.get_active_processes()
    }

    pub fn kill_process(&self, tool: &str, pid: Option<u32>) -> bool {
        self.inner.processes.kill_process(tool, pid)
    }

    /// Re-read configuration files and reconfigure logging.
    pub fn reload_config(&self) -> Result<Arc<WrapperConfig>> {
        self.inner.reload_config()
    }

    /// Stop the pools, terminate running tools and flush logs. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for ToolWrapper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl WrapperInner {
    fn config(&self) -> Arc<WrapperConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn plan(&self, config: &WrapperConfig, request: &ExecuteRequest) -> Result<ExecutionPlan> {
        let tool_name = request
            .tool
            .as_deref()
            .or(self.default_tool.as_deref())
            .ok_or_else(|| Error::config("No tool name provided and no default tool configured"))?;
        let tool = validate::tool_config(config, tool_name)?;
        let args = validate::prepare_args(tool_name, tool, &request.args)?;

        let timeout = request
            .timeout
            .or_else(|| tool.timeout())
            .or_else(|| config.global_timeout());
        let cwd = request
            .cwd
            .clone()
            .or_else(|| tool.working_directory.as_ref().map(PathBuf::from));

        let mut env = BTreeMap::new();
        if let Some(temp) = &config.temp_directory {
            for var in TEMP_DIR_VARS {
                env.insert(var.to_string(), temp.clone());
            }
        }
        env.extend(tool.environment_vars.clone());
        env.extend(request.env.clone());

        let spec = ProcessSpec::new(tool_name, tool.executable_path.clone())
            .with_args(args)
            .with_timeout(timeout)
            .with_cwd(cwd)
            .with_envs(env)
            .with_monitoring(config.monitoring_enabled)
            .with_progress_callback(request.progress.clone());
        let command = spec.command_line();

        Ok(ExecutionPlan {
            tool_name: tool_name.to_string(),
            tool: tool.clone(),
            spec,
            command,
        })
    }

    fn execute_tool(&self, request: &ExecuteRequest) -> Result<ProcessResult> {
        let _guard = self.log.enter();
        let config = self.config();
        let plan = self.plan(&config, request)?;

        if request.dry_run {
            info!(
                tool = %plan.tool_name,
                args = ?plan.spec.args,
                cwd = ?plan.spec.cwd,
                timeout_secs = ?plan.spec.timeout.map(|t| t.as_secs_f64()),
                dry_run = true,
                "DRY RUN - Would execute: {}",
                plan.command
            );
            return Ok(plan.dry_run_result());
        }

        self.run_with_retry(&plan)
    }

    fn run_with_retry(&self, plan: &ExecutionPlan) -> Result<ProcessResult> {
        let attempts = plan.tool.retry_attempts.max(1);
        let wait = plan.tool.retry_wait();
        let timer = self.log.time_operation(
            format!("execute_{}", plan.tool_name),
            json!({"command": plan.command, "max_attempts": attempts}),
        );

        let mut last_error = None;
        for attempt in 1..=attempts {
            info!(
                tool = %plan.tool_name,
                command = %plan.command,
                attempt,
                max_attempts = attempts,
                "Executing tool (attempt {}/{}): {}",
                attempt,
                attempts,
                plan.tool_name
            );

            let outcome = self
                .processes
                .execute_tool(&plan.spec)
                .and_then(ProcessResult::check_status);
            match outcome {
                Ok(result) => {
                    self.log.audit(
                        event_names::TOOL_EXECUTION_SUCCESS,
                        json!({
                            "tool_name": plan.tool_name,
                            "duration": result.duration.as_secs_f64(),
                            "return_code": result.return_code,
                            "attempt": attempt,
                        }),
                    );
                    if attempt > 1 {
                        info!(tool = %plan.tool_name, attempt, "Tool succeeded after retry");
                    }
                    timer.complete();
                    return Ok(result);
                }
                Err(err) if err.is_retryable() => {
                    if attempt < attempts {
                        warn!(
                            tool = %plan.tool_name,
                            attempt,
                            wait_secs = wait.as_secs_f64(),
                            error = %err,
                            "Tool execution failed, retrying in {:.1}s: {}",
                            wait.as_secs_f64(),
                            err
                        );
                        thread::sleep(wait);
                    } else {
                        error!(
                            tool = %plan.tool_name,
                            total_attempts = attempts,
                            error = %err,
                            "Tool execution failed after {} attempts: {}",
                            attempts,
                            err
                        );
                    }
                    last_error = Some(err);
                }
                Err(err) => {
                    timer.fail(&err);
                    return Err(err);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| {
            Error::execution(
                format!(
                    "Tool '{}' failed after {} attempts",
                    plan.tool_name, attempts
                ),
                -1,
                "Unknown error",
            )
        });
        timer.fail(&err);
        Err(err)
    }

    fn execute_batch(
        &self,
        tool: &str,
        batch_args: &[Vec<String>],
        options: &BatchOptions,
    ) -> Vec<ProcessResult> {
        let _guard = self.log.enter();
        let workers = options
            .max_concurrent
            .filter(|n| *n > 0)
            .unwrap_or_else(|| self.config().max_concurrent_jobs);
        info!(
            tool,
            batch_size = batch_args.len(),
            max_concurrent = workers,
            "Starting batch execution of {} commands",
            batch_args.len()
        );

        let results = batch::run_batch(tool, batch_args, workers, options, |args| {
            let request = ExecuteRequest {
                tool: Some(tool.to_string()),
                args: args.to_vec(),
                ..options.base.clone()
            };
            self.execute_tool(&request)
        });

        if options.fail_fast && results.len() < batch_args.len() {
            error!(
                tool,
                completed = results.len(),
                total = batch_args.len(),
                "Batch execution failed fast"
            );
        }
        let successful = results.iter().filter(|r| r.success()).count();
        info!(
            tool,
            successful,
            total = results.len(),
            success_rate = if results.is_empty() {
                0.0
            } else {
                successful as f64 / results.len() as f64
            },
            "Batch execution completed: {}/{} successful",
            successful,
            results.len()
        );
        results
    }

    fn get_tool_info(&self, tool: Option<&str>) -> Result<ToolInfo> {
        let _guard = self.log.enter();
        let tool_name = tool
            .or(self.default_tool.as_deref())
            .ok_or_else(|| Error::config("No tool name provided"))?;
        let config = self.config();
        let tool = validate::tool_config(&config, tool_name)?;

        let version_info = VERSION_FLAGS.iter().find_map(|flag| {
            let request = ExecuteRequest::for_tool(tool_name)
                .with_args([*flag])
                .with_timeout(VERSION_PROBE_TIMEOUT);
            let plan = self.plan(&config, &request).ok()?;
            let spec = plan.spec.with_monitoring(false);
            let result = self.processes.execute_tool(&spec).ok()?;
            info::version_text(&result)
        });

        Ok(ToolInfo {
            name: tool_name.to_string(),
            executable_path: tool.executable_path.clone(),
            executable_exists: find_tool_executable(
                &tool.executable_path,
                &self.processes.settings().search_paths,
            )
            .is_ok(),
            default_args: tool.default_args.clone(),
            timeout_seconds: tool.timeout_seconds,
            retry_attempts: tool.retry_attempts,
            environment_vars: tool.environment_vars.clone(),
            validation_rules: tool.validation_rules.clone(),
            version_info,
        })
    }

    fn reload_config(&self) -> Result<Arc<WrapperConfig>> {
        let _guard = self.log.enter();
        let manager = self.config_manager.as_ref().ok_or_else(|| {
            Error::config("Configuration was supplied in memory and cannot be reloaded")
        })?;
        let config = manager.reload()?;
        self.log.update_config(&config.logging)?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&config);

        info!(
            tools_count = config.tools.len(),
            log_level = %config.logging.level,
            "Configuration reloaded"
        );
        self.log.audit(
            event_names::CONFIG_RELOADED,
            json!({"tools": config.tool_names()}),
        );
        Ok(config)
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let _guard = self.log.enter();
            info!("Shutting down PostCodeMon wrapper");
            self.log
                .audit(event_names::WRAPPER_SHUTDOWN, json!({"run_id": self.log.run_id()}));
        }
        self.pool.shutdown();
        self.processes.shutdown();
        self.log.shutdown();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wrapper(config: WrapperConfig, default_tool: Option<&str>) -> ToolWrapper {
        let config = WrapperConfig {
            logging: pcm_config::LoggingConfig {
                console: false,
                ..Default::default()
            },
            ..config
        };
        ToolWrapper::from_config(Arc::new(config), default_tool.map(String::from)).unwrap()
    }

    #[test]
    fn test_plan_resolves_effective_settings() {
        let config = WrapperConfig {
            temp_directory: Some("/var/tmp/pcm".into()),
            global_timeout: 42,
            monitoring_enabled: false,
            ..WrapperConfig::default()
        }
        .with_tool(
            ToolConfig::new("flasher", "flashrom")
                .with_default_args(["-p", "internal"])
                .with_timeout_seconds(0)
                .with_env("MODE", "tool")
                .with_env("TMP", "/tool/tmp")
                .with_working_directory("/opt/flash"),
        );
        let w = wrapper(config.clone(), None);

        let request = ExecuteRequest::for_tool("flasher")
            .with_args(["-r", "out.bin"])
            .with_env("MODE", "caller");
        let plan = w.inner.plan(&config, &request).unwrap();

        assert_eq!(plan.spec.args, vec!["-p", "internal", "-r", "out.bin"]);
        assert_eq!(plan.spec.timeout, Some(Duration::from_secs(42)));
        assert_eq!(plan.spec.cwd, Some(PathBuf::from("/opt/flash")));
        assert_eq!(plan.spec.env["TMPDIR"], "/var/tmp/pcm");
        assert_eq!(plan.spec.env["TMP"], "/tool/tmp");
        assert_eq!(plan.spec.env["MODE"], "caller");
        assert!(!plan.spec.monitor_resources);
        assert_eq!(plan.command, "flashrom -p internal -r out.bin");
    }

    #[test]
    fn test_explicit_timeout_wins() {
        let config = WrapperConfig::default()
            .with_tool(ToolConfig::new("t", "true").with_timeout_seconds(30));
        let w = wrapper(config.clone(), Some("t"));
        let plan = w
            .inner
            .plan(&config, &ExecuteRequest::new().with_timeout(Duration::from_secs(3)))
            .unwrap();
        assert_eq!(plan.spec.timeout, Some(Duration::from_secs(3)));
        let plan = w.inner.plan(&config, &ExecuteRequest::new()).unwrap();
        assert_eq!(plan.spec.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_missing_tool_name() {
        let w = wrapper(WrapperConfig::default(), None);
        let err = w.execute_tool(&ExecuteRequest::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No tool name provided and no default tool configured"
        );
    }

    #[test]
    fn test_reload_requires_config_manager() {
        let w = wrapper(WrapperConfig::default(), None);
        assert_eq!(w.reload_config().unwrap_err().code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let w = wrapper(WrapperConfig::default(), None);
        w.shutdown();
        w.shutdown();
        assert!(w.inner.shut_down.load(Ordering::SeqCst));
    }
}
