//! Per-call execution requests.

use crate::process::ProgressCallback;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One `execute_tool` call. Unset fields fall back to tool and global
/// configuration.
#[derive(Clone, Default)]
pub struct ExecuteRequest {
    /// Falls back to the wrapper's default tool.
    pub tool: Option<String>,
    /// Appended after the tool's default arguments.
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Applied last, over the tool's environment.
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub dry_run: bool,
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for ExecuteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteRequest")
            .field("tool", &self.tool)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("timeout", &self.timeout)
            .field("dry_run", &self.dry_run)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl ExecuteRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request for a named tool.
    pub fn for_tool(tool: impl Into<String>) -> Self {
        Self::new().with_tool(tool)
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }
}
