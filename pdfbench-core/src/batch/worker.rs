//! Worker pool for parallel batch processing
//!
//! The pool runs each unit on its own named thread, never more than
//! `num_workers` at a time. The scheduling loop owns all bookkeeping: it
//! waits for completion messages until the nearest deadline, and when a unit
//! overruns it records a `TimedOut` failure, sets the unit's cancel token (so
//! its external processes get killed), removes its scratch directory and
//! hands the slot to the next queued unit. A message arriving from an
//! abandoned unit is ignored.

use crate::batch::{
    panic_message, BatchJob, BatchProgress, CancelToken, JobError, JobResult, TaskContext,
    UnitIdentity,
};
use crate::error::{BenchError, Result};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often the scheduler wakes up to observe batch cancellation
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Options for worker pool
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Maximum number of units running at once
    pub num_workers: usize,
    /// Hard deadline for each unit
    pub job_timeout: Option<Duration>,
    /// Parent directory for per-task temporary directories
    pub temp_root: Option<PathBuf>,
    /// Cancel the remaining units after the first failure
    pub stop_on_error: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            num_workers: 1,
            job_timeout: None,
            temp_root: None,
            stop_on_error: false,
        }
    }
}

/// What a unit's thread reports back
enum TaskOutcome<T> {
    Done(T),
    Failed(JobError),
    Cancelled,
}

struct Finished<T> {
    index: usize,
    duration: Duration,
    outcome: TaskOutcome<T>,
}

/// Bookkeeping for a unit currently holding a slot
struct RunningTask {
    identity: UnitIdentity,
    cancel: CancelToken,
    temp_path: PathBuf,
    started: Instant,
    deadline: Option<Instant>,
}

/// Remove the scratch directory of an abandoned unit
///
/// The unit's own `TempDir` guard still runs when its thread finishes and
/// ignores the directory being gone.
fn remove_scratch(identity: &UnitIdentity, path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!(unit = %identity, path = %path.display(), "removed scratch directory"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            unit = %identity,
            path = %path.display(),
            %error,
            "could not remove scratch directory"
        ),
    }
}

/// Worker pool for parallel processing
pub struct WorkerPool {
    options: WorkerOptions,
}

impl WorkerPool {
    pub fn new(options: WorkerOptions) -> Self {
        Self { options }
    }

    pub fn num_workers(&self) -> usize {
        self.options.num_workers.max(1)
    }

    /// Run every job and return exactly one result per job, in input order
    pub fn process_jobs<J: BatchJob>(
        &self,
        jobs: Vec<J>,
        progress: Arc<BatchProgress>,
        cancelled: CancelToken,
    ) -> Vec<JobResult<J::Output>> {
        let total = jobs.len();
        let identities: Vec<UnitIdentity> = jobs.iter().map(|job| job.identity()).collect();
        let mut slots: Vec<Option<JobResult<J::Output>>> = (0..total).map(|_| None).collect();
        let mut pending: VecDeque<(usize, J)> = jobs.into_iter().enumerate().collect();
        let mut running: HashMap<usize, RunningTask> = HashMap::new();
        let (sender, receiver) = mpsc::channel::<Finished<J::Output>>();

        loop {
            while running.len() < self.num_workers() {
                let Some((index, job)) = pending.pop_front() else {
                    break;
                };
                let identity = identities[index].clone();

                if cancelled.is_cancelled() {
                    progress.cancel_job(false);
                    slots[index] = Some(JobResult::Cancelled { index, identity });
                    continue;
                }

                match self.spawn(index, job, identity.clone(), sender.clone()) {
                    Ok(task) => {
                        progress.start_job();
                        running.insert(index, task);
                    }
                    Err(error) => {
                        warn!(unit = %identity, %error, "could not start unit");
                        progress.reject_job();
                        slots[index] = Some(JobResult::Failed {
                            index,
                            identity,
                            duration: Duration::ZERO,
                            error: JobError::crashed(format!("could not start unit: {error}")),
                        });
                    }
                }
            }

            if running.is_empty() {
                break;
            }

            let now = Instant::now();
            let wait = running
                .values()
                .filter_map(|task| task.deadline)
                .min()
                .map_or(CANCEL_POLL, |deadline| {
                    deadline.saturating_duration_since(now).min(CANCEL_POLL)
                });

            match receiver.recv_timeout(wait) {
                Ok(finished) => {
                    if let Some(task) = running.remove(&finished.index) {
                        let index = finished.index;
                        let identity = task.identity;
                        slots[index] = Some(match finished.outcome {
                            TaskOutcome::Done(output) => {
                                progress.complete_job();
                                debug!(unit = %identity, "unit completed");
                                JobResult::Success {
                                    index,
                                    identity,
                                    duration: finished.duration,
                                    output,
                                }
                            }
                            TaskOutcome::Failed(error) => {
                                progress.fail_job();
                                warn!(unit = %identity, error = %error, "unit failed");
                                if self.options.stop_on_error {
                                    cancelled.cancel();
                                }
                                JobResult::Failed {
                                    index,
                                    identity,
                                    duration: finished.duration,
                                    error,
                                }
                            }
                            TaskOutcome::Cancelled => {
                                progress.cancel_job(true);
                                JobResult::Cancelled { index, identity }
                            }
                        });
                    } else {
                        debug!(index = finished.index, "ignoring result of abandoned unit");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Some(limit) = self.options.job_timeout {
                let now = Instant::now();
                let expired: Vec<usize> = running
                    .iter()
                    .filter(|(_, task)| task.deadline.is_some_and(|deadline| deadline <= now))
                    .map(|(index, _)| *index)
                    .collect();

                for index in expired {
                    if let Some(task) = running.remove(&index) {
                        task.cancel.cancel();
                        remove_scratch(&task.identity, &task.temp_path);
                        progress.time_out_job();
                        warn!(
                            unit = %task.identity,
                            timeout_secs = limit.as_secs_f64(),
                            "unit timed out, abandoning it"
                        );
                        slots[index] = Some(JobResult::Failed {
                            index,
                            identity: task.identity,
                            duration: task.started.elapsed(),
                            error: JobError::timed_out(limit),
                        });
                    }
                }
            }

            if cancelled.is_cancelled() {
                for task in running.values() {
                    task.cancel.cancel();
                }
            }
        }

        slots
            .into_iter()
            .zip(identities)
            .enumerate()
            .map(|(index, (slot, identity))| {
                slot.unwrap_or_else(|| JobResult::Failed {
                    index,
                    identity,
                    duration: Duration::ZERO,
                    error: JobError::crashed("unit produced no result"),
                })
            })
            .collect()
    }

    fn spawn<J: BatchJob>(
        &self,
        index: usize,
        job: J,
        identity: UnitIdentity,
        sender: mpsc::Sender<Finished<J::Output>>,
    ) -> Result<RunningTask> {
        let cancel = CancelToken::new();
        let mut builder = tempfile::Builder::new();
        builder.prefix("pdfbench-task-");
        let temp_dir = match &self.options.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let temp_path = temp_dir.path().to_path_buf();
        let ctx = TaskContext::new(
            index,
            identity.clone(),
            cancel.clone(),
            temp_dir,
            self.options.job_timeout,
        );

        let started = Instant::now();
        thread::Builder::new()
            .name(format!("pdfbench-unit-{index}"))
            .spawn(move || {
                let outcome = match catch_unwind(AssertUnwindSafe(|| job.run(&ctx))) {
                    Ok(Ok(output)) => TaskOutcome::Done(output),
                    Ok(Err(BenchError::Cancelled)) => TaskOutcome::Cancelled,
                    Ok(Err(error)) => TaskOutcome::Failed(JobError::from_error(&error)),
                    Err(payload) => TaskOutcome::Failed(JobError::crashed(format!(
                        "unit panicked: {}",
                        panic_message(payload.as_ref())
                    ))),
                };
                let duration = started.elapsed();
                drop(ctx);
                let _ = sender.send(Finished {
                    index,
                    duration,
                    outcome,
                });
            })?;

        Ok(RunningTask {
            identity,
            cancel,
            temp_path,
            started,
            deadline: self.options.job_timeout.map(|limit| started + limit),
        })
    }
}
