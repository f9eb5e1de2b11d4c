//! Executable resolution.

use pcm_common::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

/// System directories searched after the caller-supplied and home paths.
pub const SYSTEM_SEARCH_DIRS: &[&str] = &[
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/usr/local/sbin",
    "/usr/sbin",
    "/sbin",
];

/// Ordered, de-duplicated list of directories to probe.
///
/// Order: `extra`, the current directory, `~/bin`, [`SYSTEM_SEARCH_DIRS`],
/// then each `PATH` entry.
pub fn search_dirs(extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = extra.to_vec();
    if let Ok(cwd) = env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join("bin"));
    }
    dirs.extend(SYSTEM_SEARCH_DIRS.iter().map(PathBuf::from));
    if let Some(path) = env::var_os("PATH") {
        dirs.extend(env::split_paths(&path).filter(|p| !p.as_os_str().is_empty()));
    }

    let mut seen = std::collections::HashSet::new();
    dirs.retain(|dir| seen.insert(dir.clone()));
    dirs
}

/// Resolve a configured executable to a file on disk.
///
/// An absolute path, or a path relative to the current directory, is used
/// when it names a file. Relative hits are anchored to the current
/// directory so a child started elsewhere still finds them. Otherwise each
/// directory from [`search_dirs`] is probed for `name` and then `name.exe`.
pub fn find_tool_executable(tool_path: &str, extra: &[PathBuf]) -> Result<PathBuf> {
    let direct = Path::new(tool_path);
    if direct.is_file() {
        if direct.is_absolute() {
            return Ok(direct.to_path_buf());
        }
        return Ok(env::current_dir()?.join(direct));
    }

    let dirs = search_dirs(extra);
    if !direct.is_absolute() {
        let with_exe = format!("{}.exe", tool_path);
        for dir in &dirs {
            for name in [tool_path, with_exe.as_str()] {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }

    Err(Error::ToolNotFound {
        tool_path: tool_path.to_string(),
        search_paths: dirs.iter().map(|d| d.display().to_string()).collect(),
    })
}
