//! Per-task execution context

use crate::batch::UnitIdentity;
use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Shared cancellation flag
///
/// Cloning yields a handle to the same flag. Long-running probes poll it and
/// external processes are killed once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a running unit may use besides its own input
///
/// The temporary directory is private to the task. It is removed when the
/// context is dropped after success, failure or panic, and by the scheduler
/// as soon as the task overruns its deadline.
#[derive(Debug)]
pub struct TaskContext {
    index: usize,
    identity: UnitIdentity,
    cancel: CancelToken,
    temp_dir: TempDir,
    started: Instant,
    timeout: Option<Duration>,
}

impl TaskContext {
    pub fn new(
        index: usize,
        identity: UnitIdentity,
        cancel: CancelToken,
        temp_dir: TempDir,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            index,
            identity,
            cancel,
            temp_dir,
            started: Instant::now(),
            timeout,
        }
    }

    /// Position of the unit in its batch
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn identity(&self) -> &UnitIdentity {
        &self.identity
    }

    /// Cancellation flag set by the harness on timeout or batch cancel
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Time left before the harness gives up on this task
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout
            .map(|limit| limit.saturating_sub(self.started.elapsed()))
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
