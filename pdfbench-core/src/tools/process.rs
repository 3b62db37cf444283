//! Running external programs under a deadline
//!
//! Output is redirected to files rather than pipes so a chatty tool can never
//! block on a full pipe while we wait for it. On Unix the child gets its own
//! process group and the whole group is killed on timeout or cancellation,
//! which also takes down helper processes the tool may have spawned.

use crate::batch::CancelToken;
use crate::error::{BenchError, Result};
use std::fs::{self, File};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn succeeded(&self, success_codes: &[i32]) -> bool {
        self.exit_code
            .is_some_and(|code| success_codes.contains(&code))
    }
}

/// Run `program` in `cwd`, killing it once `timeout` elapses or `cancel` is set
pub fn run_command(
    program: &str,
    args: &[String],
    cwd: &Path,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<ProcessOutput> {
    let capture = tempfile::Builder::new()
        .prefix("capture-")
        .tempdir_in(cwd)?;
    let stdout_path = capture.path().join("stdout");
    let stderr_path = capture.path().join("stderr");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(File::create(&stdout_path)?)
        .stderr(File::create(&stderr_path)?)
        .current_dir(cwd);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!(program, ?args, "spawning tool");
    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| BenchError::Process(format!("failed to spawn {program}: {e}")))?;

    let status: ExitStatus = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Some(limit) = timeout {
            if start.elapsed() > limit {
                warn!(program, timeout_secs = limit.as_secs_f64(), "killing tool after timeout");
                terminate(&mut child);
                return Err(BenchError::Timeout(limit));
            }
        }
        if cancel.is_cancelled() {
            warn!(program, "killing tool of cancelled task");
            terminate(&mut child);
            return Err(BenchError::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let output = ProcessOutput {
        exit_code: status.code(),
        stdout: fs::read(&stdout_path)?,
        stderr: String::from_utf8_lossy(&fs::read(&stderr_path)?).into_owned(),
        duration: start.elapsed(),
    };
    debug!(
        program,
        exit_code = ?output.exit_code,
        elapsed_ms = output.duration.as_millis() as u64,
        "tool finished"
    );
    Ok(output)
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // The child leads its own group, so its pid is the group id
        let pgid = child.id() as libc::pid_t;
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
