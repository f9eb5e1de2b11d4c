//! Registry of running child processes.

use super::signal::SharedChild;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One registered child.
#[derive(Debug, Clone)]
pub struct RegisteredProcess {
    /// `"<tool_name>_<pid>"`.
    pub key: String,
    pub pid: u32,
    pub tool_name: String,
    pub started_at: DateTime<Utc>,
    pub child: SharedChild,
}

/// Running children keyed by `"<tool_name>_<pid>"`.
///
/// The map lock is held only for inserts, removals and copies; callers wait
/// on children through the cloned handles.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<String, RegisteredProcess>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry key for a tool and pid.
    pub fn key(tool_name: &str, pid: u32) -> String {
        format!("{}_{}", tool_name, pid)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RegisteredProcess>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a freshly spawned child.
    pub fn register(&self, tool_name: &str, pid: u32, child: SharedChild) -> RegisteredProcess {
        let entry = RegisteredProcess {
            key: Self::key(tool_name, pid),
            pid,
            tool_name: tool_name.to_string(),
            started_at: Utc::now(),
            child,
        };
        self.lock().insert(entry.key.clone(), entry.clone());
        entry
    }

    /// Remove an entry; `None` if it was already removed.
    pub fn deregister(&self, key: &str) -> Option<RegisteredProcess> {
        self.lock().remove(key)
    }

    /// Entries for `tool_name`, narrowed to `pid` when given.
    pub fn matching(&self, tool_name: &str, pid: Option<u32>) -> Vec<RegisteredProcess> {
        self.lock()
            .values()
            .filter(|e| e.tool_name == tool_name && pid.map_or(true, |p| e.pid == p))
            .cloned()
            .collect()
    }

    /// Copy of all entries, ordered by key.
    pub fn snapshot(&self) -> Vec<RegisteredProcess> {
        let mut entries: Vec<_> = self.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<RegisteredProcess> {
        self.lock().drain().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::sync::{Arc, Mutex};

    fn child() -> SharedChild {
        let child = Command::new("true").stdout(Stdio::null()).spawn().unwrap();
        Arc::new(Mutex::new(child))
    }

    fn reap(entry: &RegisteredProcess) {
        let _ = super::super::signal::lock_child(&entry.child).wait();
    }

    #[test]
    fn test_register_and_deregister() {
        let registry = ProcessRegistry::new();
        let shared = child();
        let pid = shared.lock().unwrap().id();
        let entry = registry.register("echo", pid, shared);

        assert_eq!(entry.key, format!("echo_{}", pid));
        assert_eq!(registry.len(), 1);
        assert!(registry.deregister(&entry.key).is_some());
        assert!(registry.deregister(&entry.key).is_none());
        assert!(registry.is_empty());
        reap(&entry);
    }

    #[test]
    fn test_matching_by_tool_and_pid() {
        let registry = ProcessRegistry::new();
        let a = registry.register("flash", 100, child());
        let b = registry.register("flash", 101, child());
        let c = registry.register("flash_extra", 102, child());

        assert_eq!(registry.matching("flash", None).len(), 2);
        let narrowed = registry.matching("flash", Some(101));
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].key, "flash_101");
        assert!(registry.matching("flash", Some(102)).is_empty());
        assert_eq!(registry.matching("flash_extra", None).len(), 1);

        for entry in [a, b, c] {
            reap(&entry);
        }
    }

    #[test]
    fn test_snapshot_sorted_and_drain() {
        let registry = ProcessRegistry::new();
        let entries = [
            registry.register("b", 2, child()),
            registry.register("a", 1, child()),
        ];
        let keys: Vec<_> = registry.snapshot().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["a_1", "b_2"]);
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
        for entry in &entries {
            reap(entry);
        }
    }
}
