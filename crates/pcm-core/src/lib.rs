//! PostCodeMon Core Library
//!
//! This library provides the execution core for wrapping external tools:
//! - Structured logging with audit, execution and performance events
//! - Child process execution with timeouts, termination and resource sampling
//! - The tool wrapper: validation, retries, batching and tool introspection
//!
//! Configuration lives in `pcm-config`; shared errors and results in `pcm-common`.

pub mod logging;
pub mod pool;
pub mod process;
pub mod wrapper;

pub use logging::LogManager;
pub use pcm_common::{Error, ProcessResult, Result};
pub use pool::{JobError, JobHandle, WorkerPool};
pub use process::{ActiveProcessInfo, ExecutionSettings, ProcessManager, ProcessSpec};
pub use wrapper::{
    BatchOptions, ExecuteRequest, ToolInfo, ToolListing, ToolWrapper, ToolWrapperBuilder,
};
