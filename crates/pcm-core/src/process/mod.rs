//! Process execution: resolution, supervision, monitoring and termination.

pub mod locate;
pub mod manager;
pub mod monitor;
pub mod proc_stats;
pub mod registry;
pub mod signal;

pub use locate::{find_tool_executable, search_dirs, SYSTEM_SEARCH_DIRS};
pub use manager::{
    ActiveProcessInfo, ExecutionSettings, ProcessManager, ProcessSpec, ProgressCallback,
};
pub use monitor::{ResourceMonitor, ResourceSample, ResourceSummary, SeriesStats};
pub use registry::{ProcessRegistry, RegisteredProcess};
pub use signal::{exit_code, terminate_with_grace, SharedChild, Termination};
