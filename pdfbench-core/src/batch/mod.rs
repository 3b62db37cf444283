//! Resilient batch execution
//!
//! Every benchmark operation runs through this module. A batch is a list of
//! [`BatchJob`] units executed by a bounded [`WorkerPool`]; each unit gets a
//! private temporary directory and a hard deadline. Units that fail, panic or
//! time out become structured [`JobResult::Failed`] records carrying the
//! unit's [`UnitIdentity`], so a batch of N units always yields N results.
//!
//! # Features
//!
//! - **Bounded parallelism**: never more than `parallelism` units at once
//! - **Hard timeouts**: overrunning units are abandoned and their processes killed
//! - **Crash isolation**: errors and panics never abort sibling units
//! - **Two-phase batches**: [`map_reduce`] groups map results by key before reducing
//! - **Progress tracking**: counters plus an optional callback
//! - **Cancellation**: queued units become `Cancelled` records
//!
//! # Example
//!
//! ```rust
//! use pdfbench::batch::{BatchOptions, BatchProcessor, CustomJob, UnitIdentity};
//! use std::time::Duration;
//!
//! let options = BatchOptions::default()
//!     .with_parallelism(4)
//!     .with_job_timeout(Duration::from_secs(30));
//!
//! let mut processor = BatchProcessor::new(options);
//! for name in ["a.pdf", "b.pdf", "c.pdf"] {
//!     processor.add_job(CustomJob::new(UnitIdentity::new(name), move |_ctx| {
//!         Ok(name.len())
//!     }));
//! }
//!
//! let summary = processor.execute();
//! assert_eq!(summary.total_jobs, 3);
//! assert_eq!(summary.successful, 3);
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

pub mod context;
pub mod job;
pub mod progress;
pub mod result;
pub mod worker;

pub use context::{panic_message, CancelToken, TaskContext};
pub use job::{BatchJob, CustomJob, UnitIdentity};
pub use progress::{BatchProgress, ProgressBar, ProgressCallback, ProgressInfo};
pub use result::{BatchSummary, FailureKind, JobError, JobResult};
pub use worker::{WorkerOptions, WorkerPool};

/// Options for batch processing
#[derive(Clone)]
pub struct BatchOptions {
    /// Number of parallel workers
    pub parallelism: usize,
    /// Progress update interval
    pub progress_interval: Duration,
    /// Whether to cancel the remaining units after the first failure
    pub stop_on_error: bool,
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
    /// Hard deadline for each unit
    pub job_timeout: Option<Duration>,
    /// Parent directory for per-unit temporary directories
    pub temp_root: Option<PathBuf>,
    /// Cancellation shared by every phase run with these options
    pub cancel_token: CancelToken,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallelism: num_cpus::get().min(8),
            progress_interval: Duration::from_millis(100),
            stop_on_error: false,
            progress_callback: None,
            job_timeout: Some(Duration::from_secs(300)),
            temp_root: None,
            cancel_token: CancelToken::new(),
        }
    }
}

impl BatchOptions {
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressInfo) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn without_job_timeout(mut self) -> Self {
        self.job_timeout = None;
        self
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel_token = token;
        self
    }

    fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            num_workers: self.parallelism.max(1),
            job_timeout: self.job_timeout,
            temp_root: self.temp_root.clone(),
            stop_on_error: self.stop_on_error,
        }
    }
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("parallelism", &self.parallelism)
            .field("job_timeout", &self.job_timeout)
            .field("stop_on_error", &self.stop_on_error)
            .field("temp_root", &self.temp_root)
            .finish()
    }
}

/// Batch processor for a homogeneous list of units
pub struct BatchProcessor<J: BatchJob> {
    options: BatchOptions,
    jobs: Vec<J>,
    progress: Arc<BatchProgress>,
}

impl<J: BatchJob> BatchProcessor<J> {
    pub fn new(options: BatchOptions) -> Self {
        Self {
            options,
            jobs: Vec::new(),
            progress: Arc::new(BatchProgress::new()),
        }
    }

    pub fn add_job(&mut self, job: J) {
        self.jobs.push(job);
        self.progress.add_jobs(1);
    }

    pub fn add_jobs(&mut self, jobs: impl IntoIterator<Item = J>) {
        for job in jobs {
            self.add_job(job);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Cancel the batch; queued units will not start
    pub fn cancel(&self) {
        self.options.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.options.cancel_token.is_cancelled()
    }

    pub fn get_progress(&self) -> ProgressInfo {
        self.progress.get_info()
    }

    /// Run every unit and collect one result per unit, in input order
    pub fn execute(self) -> BatchSummary<J::Output> {
        let start_time = Instant::now();
        let total_jobs = self.jobs.len();

        if total_jobs == 0 {
            return BatchSummary::empty();
        }

        info!(
            units = total_jobs,
            workers = self.options.parallelism,
            timeout_secs = self.options.job_timeout.map(|t| t.as_secs_f64()),
            "starting batch"
        );

        let finished = Arc::new(AtomicBool::new(false));
        let progress_handle = self.options.progress_callback.as_ref().map(|callback| {
            let progress = Arc::clone(&self.progress);
            let callback = Arc::clone(callback);
            let interval = self.options.progress_interval;
            let finished = Arc::clone(&finished);

            thread::spawn(move || {
                while !finished.load(Ordering::SeqCst) {
                    callback.on_progress(&progress.get_info());
                    thread::sleep(interval);
                }
            })
        });

        let pool = WorkerPool::new(self.options.worker_options());
        let results = pool.process_jobs(
            self.jobs,
            Arc::clone(&self.progress),
            self.options.cancel_token.clone(),
        );

        finished.store(true, Ordering::SeqCst);
        if let Some(handle) = progress_handle {
            let _ = handle.join();
        }
        if let Some(callback) = &self.options.progress_callback {
            callback.on_progress(&self.progress.get_info());
        }

        let summary = BatchSummary::from_results(
            results,
            self.options.cancel_token.is_cancelled(),
            start_time.elapsed(),
        );
        info!(
            successful = summary.successful,
            failed = summary.failed,
            timed_out = summary.timed_out,
            elapsed_secs = summary.duration.as_secs_f64(),
            "batch finished"
        );
        summary
    }
}

/// Run units with a given worker bound and per-unit deadline
pub fn run_all<J: BatchJob>(
    jobs: Vec<J>,
    max_workers: usize,
    timeout: Option<Duration>,
) -> Vec<JobResult<J::Output>> {
    let mut options = BatchOptions::default().with_parallelism(max_workers);
    options.job_timeout = timeout;

    let mut processor = BatchProcessor::new(options);
    processor.add_jobs(jobs);
    processor.execute().results
}

/// Two-phase batch: run the map units, group their results by key, then run
/// one reduce unit per group
///
/// Every map result of a key, failures included, is collected before that
/// key's reduce unit is built. Both phases use the same options.
pub fn map_reduce<M, K, R, KeyFn, ReduceFn>(
    map_jobs: Vec<M>,
    key: KeyFn,
    reduce: ReduceFn,
    options: BatchOptions,
) -> BatchSummary<R::Output>
where
    M: BatchJob,
    K: Ord,
    R: BatchJob,
    KeyFn: Fn(&UnitIdentity) -> K,
    ReduceFn: Fn(K, Vec<JobResult<M::Output>>) -> R,
{
    let mut mapper = BatchProcessor::new(options.clone());
    mapper.add_jobs(map_jobs);
    let mapped = mapper.execute();

    let mut groups: BTreeMap<K, Vec<JobResult<M::Output>>> = BTreeMap::new();
    for result in mapped.results {
        groups.entry(key(result.identity())).or_default().push(result);
    }

    let mut reducer = BatchProcessor::new(options);
    reducer.add_jobs(groups.into_iter().map(|(k, results)| reduce(k, results)));
    reducer.execute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchError;

    fn unit(name: &str, value: usize) -> CustomJob<usize> {
        CustomJob::new(UnitIdentity::new(name), move |_| Ok(value))
    }

    #[test]
    fn test_batch_options_default() {
        let options = BatchOptions::default();
        assert!(options.parallelism > 0);
        assert!(options.parallelism <= 8);
        assert!(!options.stop_on_error);
        assert_eq!(options.job_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_batch_options_builder() {
        let options = BatchOptions::default()
            .with_parallelism(0)
            .stop_on_error(true)
            .with_job_timeout(Duration::from_secs(60))
            .with_progress_callback(|_info| {});

        assert_eq!(options.parallelism, 1);
        assert!(options.stop_on_error);
        assert_eq!(options.job_timeout, Some(Duration::from_secs(60)));
        assert!(options.progress_callback.is_some());
        assert_eq!(options.without_job_timeout().job_timeout, None);
    }

    #[test]
    fn test_empty_batch_execution() {
        let processor: BatchProcessor<CustomJob<()>> = BatchProcessor::new(BatchOptions::default());
        let summary = processor.execute();
        assert_eq!(summary.total_jobs, 0);
        assert!(!summary.cancelled);
    }

    #[test]
    fn test_cancelled_processor_reports_every_unit() {
        let mut processor = BatchProcessor::new(BatchOptions::default());
        processor.add_jobs(vec![unit("a", 1), unit("b", 2)]);
        processor.cancel();
        assert!(processor.is_cancelled());

        let summary = processor.execute();
        assert_eq!(summary.total_jobs, 2);
        assert!(summary.cancelled);
        assert!(summary.results.iter().all(|r| r.is_cancelled()));
    }

    #[test]
    fn test_stop_on_error_cancels_queue() {
        let options = BatchOptions::default().with_parallelism(1).stop_on_error(true);
        let mut processor = BatchProcessor::new(options);
        processor.add_job(CustomJob::new(UnitIdentity::new("bad"), |_| {
            Err(BenchError::Probe("broken".to_string()))
        }));
        processor.add_job(unit("later", 2));

        let summary = processor.execute();
        assert!(summary.results[0].is_failed());
        assert!(summary.results[1].is_cancelled());
    }

    #[test]
    fn test_progress_callback_sees_final_state() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = BatchOptions::default().with_progress_callback(move |info| {
            sink.lock().unwrap().push(info.processed());
        });

        let mut processor = BatchProcessor::new(options);
        processor.add_jobs((0..3).map(|i| unit(&format!("u{i}"), i)));
        processor.execute();

        assert_eq!(seen.lock().unwrap().last(), Some(&3));
    }

    #[test]
    fn test_map_reduce_groups_by_key() {
        let jobs: Vec<_> = ["a.pdf", "b.pdf", "a.pdf", "a.pdf"]
            .iter()
            .enumerate()
            .map(|(run, path)| {
                CustomJob::new(UnitIdentity::new(*path).with_label("run", run), move |_| Ok(run))
            })
            .collect();

        let summary = map_reduce(
            jobs,
            |identity| identity.path.clone(),
            |path, results| {
                CustomJob::new(UnitIdentity::new(path), move |_| {
                    Ok(results.iter().filter_map(|r| r.output().copied()).collect::<Vec<_>>())
                })
            },
            BatchOptions::default().with_parallelism(2),
        );

        assert_eq!(summary.total_jobs, 2);
        assert_eq!(summary.results[0].identity().path, "a.pdf");
        assert_eq!(summary.results[0].output(), Some(&vec![0, 2, 3]));
        assert_eq!(summary.results[1].output(), Some(&vec![1]));
    }

    #[test]
    fn test_run_all_completeness() {
        let jobs = vec![
            unit("a", 1),
            CustomJob::new(UnitIdentity::new("b"), |_| panic!("crash")),
            unit("c", 3),
        ];
        let results = run_all(jobs, 2, Some(Duration::from_secs(10)));
        assert_eq!(results.len(), 3);
        assert!(results[1].is_failed());
    }
}
