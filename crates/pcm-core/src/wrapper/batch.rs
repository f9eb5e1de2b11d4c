//! Bounded-concurrency batch execution.

use super::request::ExecuteRequest;
use pcm_common::{render_command, ProcessResult, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Called after each item with `(completed, total, command)`.
pub type BatchProgress = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// Options for [`execute_batch`](super::ToolWrapper::execute_batch).
#[derive(Clone, Default)]
pub struct BatchOptions {
    /// Worker count; `None` uses `max_concurrent_jobs`.
    pub max_concurrent: Option<usize>,
    /// Stop scheduling new items after the first failed result.
    pub fail_fast: bool,
    pub progress: Option<BatchProgress>,
    /// Settings shared by every item. Its tool and args are replaced.
    pub base: ExecuteRequest,
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("max_concurrent", &self.max_concurrent)
            .field("fail_fast", &self.fail_fast)
            .field("progress", &self.progress.is_some())
            .field("base", &self.base)
            .finish()
    }
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, workers: usize) -> Self {
        self.max_concurrent = Some(workers);
        self
    }

    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize, &str) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn with_base(mut self, base: ExecuteRequest) -> Self {
        self.base = base;
        self
    }
}

/// Run `execute` over every argument list on up to `workers` threads.
///
/// Results come back in submission order. An error becomes a result with
/// return code -1 and the message as stderr. With `fail_fast`, items not
/// yet started when a failure is recorded are skipped and omitted.
pub(crate) fn run_batch<F>(
    tool_name: &str,
    batch_args: &[Vec<String>],
    workers: usize,
    options: &BatchOptions,
    execute: F,
) -> Vec<ProcessResult>
where
    F: Fn(&[String]) -> Result<ProcessResult> + Sync,
{
    let total = batch_args.len();
    let slots: Vec<Mutex<Option<ProcessResult>>> = (0..total).map(|_| Mutex::new(None)).collect();
    let cursor = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);

    let work = || loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let index = cursor.fetch_add(1, Ordering::SeqCst);
        let Some(args) = batch_args.get(index) else {
            break;
        };

        let result = execute(args).unwrap_or_else(|err| {
            ProcessResult::from_error(tool_name, render_command(tool_name, args), &err)
        });
        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(progress) = &options.progress {
            progress(done, total, &result.command);
        }
        if options.fail_fast && !result.success() {
            stop.store(true, Ordering::SeqCst);
        }
        *slots[index].lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    };

    let workers = workers.clamp(1, total.max(1));
    thread::scope(|scope| {
        // The calling thread is one of the workers.
        for index in 1..workers {
            let spawned = thread::Builder::new()
                .name(format!("pcm-batch-{}", index))
                .spawn_scoped(scope, &work);
            if let Err(e) = spawned {
                tracing::warn!(error = %e, "failed to start batch worker");
                break;
            }
        }
        work();
    });

    slots
        .into_iter()
        .filter_map(|slot| slot.into_inner().unwrap_or_else(PoisonError::into_inner))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcm_common::Error;
    use std::time::{Duration, Instant};

    fn ok(args: &[String]) -> ProcessResult {
        ProcessResult {
            return_code: 0,
            stdout: args.join(" "),
            stderr: String::new(),
            duration: Duration::ZERO,
            command: render_command("tool", args),
            tool_name: "tool".into(),
        }
    }

    fn batch(n: usize) -> Vec<Vec<String>> {
        (0..n).map(|i| vec![i.to_string()]).collect()
    }

    #[test]
    fn test_results_in_submission_order() {
        let args = batch(12);
        let results = run_batch("tool", &args, 4, &BatchOptions::new(), |a| {
            // Later items finish first.
            let i: u64 = a[0].parse().unwrap();
            std::thread::sleep(Duration::from_millis(40 - i * 3));
            Ok(ok(a))
        });
        let outputs: Vec<_> = results.iter().map(|r| r.stdout.clone()).collect();
        let expected: Vec<_> = (0..12).map(|i| i.to_string()).collect();
        assert_eq!(outputs, expected);
    }

    #[test]
    fn test_errors_become_results() {
        let args = batch(3);
        let results = run_batch("tool", &args, 2, &BatchOptions::new(), |a| {
            if a[0] == "1" {
                Err(Error::config("boom"))
            } else {
                Ok(ok(a))
            }
        });
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].return_code, -1);
        assert_eq!(results[1].stderr, "boom");
        assert_eq!(results[1].command, "tool 1");
    }

    #[test]
    fn test_fail_fast_stops_scheduling() {
        let args = batch(20);
        let options = BatchOptions::new().fail_fast(true);
        let results = run_batch("tool", &args, 1, &options, |a| {
            if a[0] == "2" {
                Err(Error::execution("bad", 1, ""))
            } else {
                Ok(ok(a))
            }
        });
        assert_eq!(results.len(), 3);
        assert!(!results[2].success());
    }

    #[test]
    fn test_progress_counts_every_item() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = BatchOptions::new().with_progress(move |done, total, command| {
            sink.lock().unwrap().push((done, total, command.to_string()));
        });
        run_batch("tool", &batch(5), 3, &options, |a| Ok(ok(a)));

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        let counts: Vec<_> = seen.iter().map(|(d, t, _)| (*d, *t)).collect();
        assert_eq!(counts, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    }

    #[test]
    fn test_concurrency_bounded() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let started = Instant::now();
        run_batch("tool", &batch(8), 2, &BatchOptions::new(), |a| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(ok(a))
        });
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_empty_batch() {
        let results = run_batch("tool", &[], 4, &BatchOptions::new(), |a| Ok(ok(a)));
        assert!(results.is_empty());
    }
}
