//! Background CPU and memory sampling of a running child.

use super::proc_stats::{clk_tck, read_stat, read_statm};
use crate::logging::LogManager;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest single sleep between stop-flag checks.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(25);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One resource sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    /// Seconds since sampling started.
    pub offset_seconds: f64,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub num_threads: u64,
}

/// Min, max and mean of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl SeriesStats {
    fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for v in values {
            count += 1;
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        (count > 0).then(|| SeriesStats {
            min,
            max,
            avg: sum / count as f64,
        })
    }
}

/// Aggregated samples for one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSummary {
    pub samples: usize,
    /// Sample count times the sampling interval.
    pub duration_seconds: f64,
    pub cpu_percent: SeriesStats,
    pub memory_mb: SeriesStats,
    pub max_threads: u64,
}

impl ResourceSummary {
    /// Summarize samples; `None` when there are none.
    pub fn from_samples(samples: &[ResourceSample], interval: Duration) -> Option<Self> {
        Some(Self {
            samples: samples.len(),
            duration_seconds: samples.len() as f64 * interval.as_secs_f64(),
            cpu_percent: SeriesStats::from_values(samples.iter().map(|s| s.cpu_percent))?,
            memory_mb: SeriesStats::from_values(samples.iter().map(|s| s.memory_mb))?,
            max_threads: samples.iter().map(|s| s.num_threads).max().unwrap_or(0),
        })
    }
}

/// CPU percentage from a tick delta over a wall-clock delta.
pub fn cpu_percent(tick_delta: u64, wall: Duration, ticks_per_sec: u64) -> f64 {
    let wall_secs = wall.as_secs_f64();
    if wall_secs <= 0.0 || ticks_per_sec == 0 {
        return 0.0;
    }
    tick_delta as f64 / ticks_per_sec as f64 / wall_secs * 100.0
}

/// Sampler thread for one pid.
pub struct ResourceMonitor {
    interval: Duration,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Vec<ResourceSample>>>,
}

impl ResourceMonitor {
    /// Start sampling `pid` every `interval`.
    ///
    /// Sampling ends on [`stop`](Self::stop), or when the process exits or
    /// its `/proc` entry stops matching the original start time.
    pub fn start(pid: u32, interval: Duration, log: LogManager) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let sampler_log = log.clone();
        let handle = thread::Builder::new()
            .name(format!("pcm-monitor-{}", pid))
            .spawn(move || {
                let _guard = sampler_log.enter();
                sample_loop(pid, interval, &flag)
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                let _guard = log.enter();
                tracing::warn!(pid, error = %e, "failed to start resource monitor");
                None
            }
        };
        Self {
            interval,
            stop,
            handle,
        }
    }

    /// Stop sampling and summarize what was collected.
    pub fn stop(mut self) -> Option<ResourceSummary> {
        self.stop.store(true, Ordering::SeqCst);
        let samples = self.handle.take()?.join().ok()?;
        ResourceSummary::from_samples(&samples, self.interval)
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn sample_loop(pid: u32, interval: Duration, stop: &AtomicBool) -> Vec<ResourceSample> {
    let started = Instant::now();
    let mut samples = Vec::new();
    let mut previous: Option<(u64, Instant)> = None;
    let mut start_ticks: Option<u64> = None;

    while !stop.load(Ordering::SeqCst) {
        let Some(stat) = read_stat(pid) else {
            break;
        };
        if stat.is_zombie() || *start_ticks.get_or_insert(stat.starttime) != stat.starttime {
            break;
        }

        let now = Instant::now();
        let ticks = stat.total_ticks();
        let cpu = previous
            .map(|(prev_ticks, prev_at)| {
                cpu_percent(ticks.saturating_sub(prev_ticks), now - prev_at, clk_tck())
            })
            .unwrap_or(0.0);
        previous = Some((ticks, now));

        let memory_mb = read_statm(pid)
            .map(|m| m.rss_bytes() as f64 / BYTES_PER_MB)
            .unwrap_or(0.0);

        let sample = ResourceSample {
            offset_seconds: (now - started).as_secs_f64(),
            cpu_percent: cpu,
            memory_mb,
            num_threads: stat.num_threads,
        };
        tracing::trace!(
            pid,
            cpu_percent = sample.cpu_percent,
            memory_mb = sample.memory_mb,
            "resource sample"
        );
        samples.push(sample);

        sleep_unless_stopped(interval, stop);
    }
    samples
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        let now = Instant::now();
        if stop.load(Ordering::SeqCst) || now >= deadline {
            return;
        }
        thread::sleep(STOP_CHECK_SLICE.min(deadline - now));
    }
}
