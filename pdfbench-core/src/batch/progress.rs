//! Progress tracking for batch operations

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Snapshot of a batch's progress
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    /// Units that failed, timeouts included
    pub failed_jobs: usize,
    pub timed_out_jobs: usize,
    pub cancelled_jobs: usize,
    pub running_jobs: usize,
    pub start_time: Instant,
    pub estimated_remaining: Option<Duration>,
    /// Units finished per second
    pub throughput: f64,
}

impl ProgressInfo {
    /// Units with a final result
    pub fn processed(&self) -> usize {
        self.completed_jobs + self.failed_jobs + self.cancelled_jobs
    }

    /// Progress percentage (0.0 - 100.0)
    pub fn percentage(&self) -> f64 {
        if self.total_jobs == 0 {
            100.0
        } else {
            (self.processed() as f64 / self.total_jobs as f64) * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.processed() >= self.total_jobs
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn calculate_eta(&self) -> Option<Duration> {
        let processed = self.processed();
        if processed == 0 || self.throughput <= 0.0 {
            return None;
        }

        let remaining = self.total_jobs.saturating_sub(processed);
        Some(Duration::from_secs_f64(remaining as f64 / self.throughput))
    }

    pub fn format_progress(&self) -> String {
        format!(
            "{}/{} ({:.1}%) - {} running, {} failed, {} timed out",
            self.processed(),
            self.total_jobs,
            self.percentage(),
            self.running_jobs,
            self.failed_jobs,
            self.timed_out_jobs
        )
    }

    pub fn format_eta(&self) -> String {
        match self.estimated_remaining {
            Some(duration) => {
                let secs = duration.as_secs();
                if secs < 60 {
                    format!("{secs}s")
                } else if secs < 3600 {
                    format!("{}m {}s", secs / 60, secs % 60)
                } else {
                    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
                }
            }
            None => "calculating...".to_string(),
        }
    }
}

/// Lock-free progress counters shared between the scheduler and observers
pub struct BatchProgress {
    total_jobs: AtomicUsize,
    completed_jobs: AtomicUsize,
    failed_jobs: AtomicUsize,
    timed_out_jobs: AtomicUsize,
    cancelled_jobs: AtomicUsize,
    running_jobs: AtomicUsize,
    start_time: Instant,
}

impl Default for BatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchProgress {
    pub fn new() -> Self {
        Self {
            total_jobs: AtomicUsize::new(0),
            completed_jobs: AtomicUsize::new(0),
            failed_jobs: AtomicUsize::new(0),
            timed_out_jobs: AtomicUsize::new(0),
            cancelled_jobs: AtomicUsize::new(0),
            running_jobs: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn add_jobs(&self, count: usize) {
        self.total_jobs.fetch_add(count, Ordering::SeqCst);
    }

    pub fn start_job(&self) {
        self.running_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn complete_job(&self) {
        self.running_jobs.fetch_sub(1, Ordering::SeqCst);
        self.completed_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_job(&self) {
        self.running_jobs.fetch_sub(1, Ordering::SeqCst);
        self.failed_jobs.fetch_add(1, Ordering::SeqCst);
    }

    /// A running unit exceeded its deadline
    pub fn time_out_job(&self) {
        self.timed_out_jobs.fetch_add(1, Ordering::SeqCst);
        self.fail_job();
    }

    /// A unit ended because of cancellation
    pub fn cancel_job(&self, was_running: bool) {
        if was_running {
            self.running_jobs.fetch_sub(1, Ordering::SeqCst);
        }
        self.cancelled_jobs.fetch_add(1, Ordering::SeqCst);
    }

    /// A unit failed before it could start
    pub fn reject_job(&self) {
        self.failed_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_info(&self) -> ProgressInfo {
        let elapsed = self.start_time.elapsed();
        let mut info = ProgressInfo {
            total_jobs: self.total_jobs.load(Ordering::SeqCst),
            completed_jobs: self.completed_jobs.load(Ordering::SeqCst),
            failed_jobs: self.failed_jobs.load(Ordering::SeqCst),
            timed_out_jobs: self.timed_out_jobs.load(Ordering::SeqCst),
            cancelled_jobs: self.cancelled_jobs.load(Ordering::SeqCst),
            running_jobs: self.running_jobs.load(Ordering::SeqCst),
            start_time: self.start_time,
            estimated_remaining: None,
            throughput: 0.0,
        };

        if elapsed.as_secs_f64() > 0.0 {
            info.throughput = info.processed() as f64 / elapsed.as_secs_f64();
        }
        info.estimated_remaining = info.calculate_eta();
        info
    }
}

/// Receives progress snapshots while a batch runs
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, info: &ProgressInfo);
}

impl<F> ProgressCallback for F
where
    F: Fn(&ProgressInfo) + Send + Sync,
{
    fn on_progress(&self, info: &ProgressInfo) {
        self(info)
    }
}

/// Single-line terminal progress bar
pub struct ProgressBar {
    width: usize,
    show_eta: bool,
    show_throughput: bool,
}

impl Default for ProgressBar {
    fn default() -> Self {
        Self {
            width: 40,
            show_eta: true,
            show_throughput: true,
        }
    }
}

impl ProgressBar {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            ..Default::default()
        }
    }

    pub fn render(&self, info: &ProgressInfo) -> String {
        let percentage = info.percentage();
        let filled = ((percentage / 100.0 * self.width as f64) as usize).min(self.width);
        let empty = self.width - filled;

        let mut parts = vec![
            format!(
                "[{}{}] {:.1}%",
                "=".repeat(filled),
                " ".repeat(empty),
                percentage
            ),
            format!("{}/{}", info.processed(), info.total_jobs),
        ];

        if info.failed_jobs > 0 {
            parts.push(format!("{} failed", info.failed_jobs));
        }

        if self.show_throughput && info.throughput > 0.0 {
            parts.push(format!("{:.1} units/s", info.throughput));
        }

        if self.show_eta {
            parts.push(format!("ETA: {}", info.format_eta()));
        }

        parts.join(" | ")
    }
}
