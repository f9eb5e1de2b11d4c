//! Minimal `/proc/[pid]` readers used for resource sampling.
//!
//! Only the fields the monitor needs are extracted. Each reader has a
//! `_content` variant taking the raw file text, used by tests and fuzzing.

use serde::Serialize;
use std::fs;

/// Fields of `/proc/[pid]/stat` used by the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatSnapshot {
    /// Single-letter scheduler state (R, S, D, Z, T, ...).
    pub state: char,
    /// User-mode CPU time in clock ticks.
    pub utime: u64,
    /// Kernel-mode CPU time in clock ticks.
    pub stime: u64,
    /// Number of threads.
    pub num_threads: u64,
    /// Start time in clock ticks after boot.
    pub starttime: u64,
}

impl StatSnapshot {
    /// Total CPU ticks consumed.
    pub fn total_ticks(&self) -> u64 {
        self.utime.saturating_add(self.stime)
    }

    /// Whether the process has exited but not yet been reaped.
    pub fn is_zombie(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }
}

/// Fields of `/proc/[pid]/statm` (in pages).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemSnapshot {
    /// Total program size.
    pub size: u64,
    /// Resident set size.
    pub resident: u64,
    /// Shared pages.
    pub shared: u64,
}

impl MemSnapshot {
    /// Resident set size in bytes.
    pub fn rss_bytes(&self) -> u64 {
        self.resident.saturating_mul(page_size())
    }
}

/// Read `/proc/[pid]/stat`.
pub fn read_stat(pid: u32) -> Option<StatSnapshot> {
    let content = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat_content(&content)
}

/// Parse stat file content.
///
/// Format: `pid (comm) state ppid pgrp session tty_nr tpgid flags minflt
/// cminflt majflt cmajflt utime stime cutime cstime priority nice
/// num_threads itrealvalue starttime ...`. The comm field may contain
/// spaces and parentheses, so parsing resumes after the last `)`.
pub fn parse_stat_content(content: &str) -> Option<StatSnapshot> {
    let comm_end = content.rfind(')')?;
    let after_comm = content.get(comm_end + 1..)?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    if fields.len() < 20 {
        return None;
    }

    Some(StatSnapshot {
        state: fields[0].chars().next()?,
        utime: fields[11].parse().ok()?,
        stime: fields[12].parse().ok()?,
        num_threads: fields[17].parse().ok()?,
        starttime: fields[19].parse().ok()?,
    })
}

/// Read `/proc/[pid]/statm`.
pub fn read_statm(pid: u32) -> Option<MemSnapshot> {
    let content = fs::read_to_string(format!("/proc/{}/statm", pid)).ok()?;
    parse_statm_content(&content)
}

/// Parse statm file content.
pub fn parse_statm_content(content: &str) -> Option<MemSnapshot> {
    let mut parts = content.split_whitespace();
    Some(MemSnapshot {
        size: parts.next()?.parse().ok()?,
        resident: parts.next()?.parse().ok()?,
        shared: parts.next()?.parse().ok()?,
    })
}

/// Human-readable name for a scheduler state letter.
pub fn state_name(state: char) -> &'static str {
    match state {
        'R' => "running",
        'S' => "sleeping",
        'D' => "disk-sleep",
        'T' => "stopped",
        't' => "tracing-stop",
        'Z' => "zombie",
        'X' | 'x' => "dead",
        'I' => "idle",
        'W' => "waking",
        'P' => "parked",
        _ => "unknown",
    }
}

/// Clock ticks per second.
#[cfg(unix)]
pub fn clk_tck() -> u64 {
    static CLK_TCK: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *CLK_TCK.get_or_init(|| {
        let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if tck > 0 {
            tck as u64
        } else {
            100
        }
    })
}

#[cfg(not(unix))]
pub fn clk_tck() -> u64 {
    100
}

/// Memory page size in bytes.
#[cfg(unix)]
pub fn page_size() -> u64 {
    static PAGE_SIZE: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as u64
        } else {
            4096
        }
    })
}

#[cfg(not(unix))]
pub fn page_size() -> u64 {
    4096
}
