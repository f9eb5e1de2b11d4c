//! Fixed-size worker pool for background executions.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Failure to obtain a job's result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job was cancelled before producing a result")]
    Cancelled,

    #[error("timed out waiting for job after {0:?}")]
    TimedOut(Duration),
}

/// Handle to a job submitted to a [`WorkerPool`].
#[derive(Debug)]
pub struct JobHandle<T> {
    result: Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Block until the job finishes.
    ///
    /// Returns [`JobError::Cancelled`] when the job panicked or was
    /// rejected by a pool that had already shut down.
    pub fn join(self) -> Result<T, JobError> {
        self.result.recv().map_err(|_| JobError::Cancelled)
    }

    /// Wait up to `timeout`; the handle stays usable after a timeout.
    pub fn join_timeout(&self, timeout: Duration) -> Result<T, JobError> {
        self.result.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => JobError::TimedOut(timeout),
            RecvTimeoutError::Disconnected => JobError::Cancelled,
        })
    }
}

/// mpsc job queue drained by a fixed set of named threads.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    size: usize,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `size` workers (at least one).
    pub fn new(name: impl Into<String>, size: usize) -> std::io::Result<Self> {
        let name = name.into();
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || worker_loop(&receiver))?;
            workers.push(handle);
        }

        Ok(Self {
            name,
            size,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job. After [`shutdown`](Self::shutdown) the job is dropped
    /// and its handle reports [`JobError::Cancelled`].
    pub fn submit<T, F>(&self, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let wrapped: Job = Box::new(move || {
            let _ = tx.send(job());
        });
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(wrapped).is_err() {
                    tracing::warn!(pool = %self.name, "worker pool queue closed, job dropped");
                }
            }
            None => tracing::debug!(pool = %self.name, "job submitted after shutdown"),
        }
        JobHandle { result: rx }
    }

    /// Stop accepting jobs, let queued jobs finish, and join the workers.
    ///
    /// Idempotent. A worker calling this does not join itself.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!(pool = %self.name, "worker thread panicked");
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
    loop {
        let job = {
            let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.recv()
        };
        match job {
            // A panicking job drops its result sender, which cancels the handle.
            Ok(job) => {
                let _ = panic::catch_unwind(AssertUnwindSafe(job));
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_submit_and_join() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let handle = pool.submit(|| 21 * 2);
        assert_eq!(handle.join(), Ok(42));
    }

    #[test]
    fn test_runs_in_parallel() {
        let pool = WorkerPool::new("test", 4).unwrap();
        let started = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| pool.submit(|| thread::sleep(Duration::from_millis(200))))
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(700));
    }

    #[test]
    fn test_join_timeout() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let handle = pool.submit(|| {
            thread::sleep(Duration::from_millis(300));
            "done"
        });
        assert_eq!(
            handle.join_timeout(Duration::from_millis(10)),
            Err(JobError::TimedOut(Duration::from_millis(10)))
        );
        assert_eq!(handle.join_timeout(Duration::from_secs(5)), Ok("done"));
    }

    #[test]
    fn test_panic_cancels_handle_and_keeps_worker() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let handle = pool.submit(|| -> u32 { panic!("boom") });
        assert_eq!(handle.join(), Err(JobError::Cancelled));
        assert_eq!(pool.submit(|| 7).join(), Ok(7));
    }

    #[test]
    fn test_shutdown_drains_queue_and_rejects_new_jobs() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(10));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(pool.is_shut_down());

        pool.shutdown();
        assert_eq!(pool.submit(|| 1).join(), Err(JobError::Cancelled));
    }

    #[test]
    fn test_size_is_at_least_one() {
        let pool = WorkerPool::new("test", 0).unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.submit(|| "ok").join(), Ok("ok"));
    }
}
