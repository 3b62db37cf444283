//! Results and summaries for batch operations

use crate::batch::UnitIdentity;
use crate::error::BenchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a unit did not produce output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The unit exceeded its deadline and was abandoned
    TimedOut,
    /// The unit panicked or its worker could not be started
    Crashed,
    /// The unit returned an error
    Failed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::TimedOut => write!(f, "TimedOut"),
            FailureKind::Crashed => write!(f, "Crashed"),
            FailureKind::Failed => write!(f, "Failed"),
        }
    }
}

/// Structured error of a failed unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timed_out(limit: Duration) -> Self {
        Self::new(FailureKind::TimedOut, BenchError::Timeout(limit).to_string())
    }

    pub fn crashed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Crashed, message)
    }

    /// Classify an error returned by a unit
    pub fn from_error(error: &BenchError) -> Self {
        let kind = if error.is_timeout() {
            FailureKind::TimedOut
        } else {
            FailureKind::Failed
        };
        Self::new(kind, error.to_string())
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of a single unit in the batch
#[derive(Debug, Clone)]
pub enum JobResult<T> {
    /// Unit completed
    Success {
        index: usize,
        identity: UnitIdentity,
        duration: Duration,
        output: T,
    },

    /// Unit failed, timed out, or crashed
    Failed {
        index: usize,
        identity: UnitIdentity,
        duration: Duration,
        error: JobError,
    },

    /// Unit was never run, or stopped, because the batch was cancelled
    Cancelled { index: usize, identity: UnitIdentity },
}

impl<T> JobResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobResult::Failed { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, JobResult::Failed { error, .. } if error.kind == FailureKind::TimedOut)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobResult::Cancelled { .. })
    }

    /// Position of the unit in its batch
    pub fn index(&self) -> usize {
        match self {
            JobResult::Success { index, .. }
            | JobResult::Failed { index, .. }
            | JobResult::Cancelled { index, .. } => *index,
        }
    }

    pub fn identity(&self) -> &UnitIdentity {
        match self {
            JobResult::Success { identity, .. }
            | JobResult::Failed { identity, .. }
            | JobResult::Cancelled { identity, .. } => identity,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            JobResult::Success { duration, .. } | JobResult::Failed { duration, .. } => {
                Some(*duration)
            }
            JobResult::Cancelled { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            JobResult::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn output(&self) -> Option<&T> {
        match self {
            JobResult::Success { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn into_output(self) -> Option<T> {
        match self {
            JobResult::Success { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Short status used in tables and logs
    pub fn status_label(&self) -> String {
        match self {
            JobResult::Success { .. } => "Success".to_string(),
            JobResult::Failed { error, .. } => error.kind.to_string(),
            JobResult::Cancelled { .. } => "Cancelled".to_string(),
        }
    }
}

impl<T> fmt::Display for JobResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobResult::Success {
                identity, duration, ..
            } => {
                write!(
                    f,
                    "✓ {identity} - completed in {:.2}s",
                    duration.as_secs_f64()
                )
            }
            JobResult::Failed {
                identity,
                duration,
                error,
                ..
            } => {
                write!(
                    f,
                    "✗ {identity} - {} after {:.2}s: {}",
                    error.kind,
                    duration.as_secs_f64(),
                    error.message
                )
            }
            JobResult::Cancelled { identity, .. } => {
                write!(f, "⚠ {identity} - cancelled")
            }
        }
    }
}

/// Summary of a batch operation, one result per input unit in input order
#[derive(Debug)]
pub struct BatchSummary<T> {
    pub total_jobs: usize,
    pub successful: usize,
    /// Units that failed for any reason, timeouts included
    pub failed: usize,
    pub timed_out: usize,
    /// Whether the batch was cancelled
    pub cancelled: bool,
    pub duration: Duration,
    pub results: Vec<JobResult<T>>,
}

impl<T> BatchSummary<T> {
    pub fn empty() -> Self {
        Self {
            total_jobs: 0,
            successful: 0,
            failed: 0,
            timed_out: 0,
            cancelled: false,
            duration: Duration::from_secs(0),
            results: Vec::new(),
        }
    }

    /// Build a summary by counting the given results
    pub fn from_results(results: Vec<JobResult<T>>, cancelled: bool, duration: Duration) -> Self {
        Self {
            total_jobs: results.len(),
            successful: results.iter().filter(|r| r.is_success()).count(),
            failed: results.iter().filter(|r| r.is_failed()).count(),
            timed_out: results.iter().filter(|r| r.is_timed_out()).count(),
            cancelled,
            duration,
            results,
        }
    }

    /// Success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_jobs == 0 {
            100.0
        } else {
            (self.successful as f64 / self.total_jobs as f64) * 100.0
        }
    }

    pub fn average_duration(&self) -> Option<Duration> {
        let durations: Vec<_> = self.results.iter().filter_map(|r| r.duration()).collect();

        if durations.is_empty() {
            None
        } else {
            let total: Duration = durations.iter().sum();
            Some(total / durations.len() as u32)
        }
    }

    /// Outputs of the successful units, in input order
    pub fn outputs(&self) -> impl Iterator<Item = &T> {
        self.results.iter().filter_map(|r| r.output())
    }

    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str(&format!(
            "Batch Summary\n\
             =============\n\
             Total Units: {}\n\
             Successful: {} ({:.1}%)\n\
             Failed: {} ({} timed out)\n\
             Duration: {:.2}s\n",
            self.total_jobs,
            self.successful,
            self.success_rate(),
            self.failed,
            self.timed_out,
            self.duration.as_secs_f64()
        ));

        if let Some(avg_duration) = self.average_duration() {
            report.push_str(&format!(
                "Average Duration: {:.2}s\n",
                avg_duration.as_secs_f64()
            ));
        }

        if self.cancelled {
            report.push_str("\n⚠️  Batch was cancelled\n");
        }

        let failed: Vec<_> = self.results.iter().filter(|r| r.is_failed()).collect();
        if !failed.is_empty() {
            report.push_str("\nFailed Units:\n");
            for result in failed {
                report.push_str(&format!("  - {result}\n"));
            }
        }

        report
    }
}

impl<T> fmt::Display for BatchSummary<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(path: &str) -> UnitIdentity {
        UnitIdentity::new(path).with_label("tool", "mock")
    }

    #[test]
    fn test_job_result_success() {
        let result = JobResult::Success {
            index: 0,
            identity: identity("a.pdf"),
            duration: Duration::from_secs(5),
            output: 42,
        };

        assert!(result.is_success());
        assert!(!result.is_failed());
        assert_eq!(result.index(), 0);
        assert_eq!(result.identity().path, "a.pdf");
        assert_eq!(result.duration(), Some(Duration::from_secs(5)));
        assert_eq!(result.output(), Some(&42));
        assert_eq!(result.status_label(), "Success");
    }

    #[test]
    fn test_job_result_timed_out() {
        let result: JobResult<()> = JobResult::Failed {
            index: 1,
            identity: identity("slow.pdf"),
            duration: Duration::from_secs(2),
            error: JobError::timed_out(Duration::from_secs(2)),
        };

        assert!(result.is_failed());
        assert!(result.is_timed_out());
        assert_eq!(result.status_label(), "TimedOut");
        assert!(result.error().unwrap().message.contains("2.0s"));
        assert!(result.to_string().contains("slow.pdf [tool=mock]"));
    }

    #[test]
    fn test_job_error_classification() {
        let error = JobError::from_error(&BenchError::Timeout(Duration::from_secs(9)));
        assert_eq!(error.kind, FailureKind::TimedOut);

        let error = JobError::from_error(&BenchError::Probe("bad".to_string()));
        assert_eq!(error.kind, FailureKind::Failed);
        assert_eq!(error.to_string(), "Failed: Probe failed: bad");
    }

    #[test]
    fn test_batch_summary_counts() {
        let results = vec![
            JobResult::Success {
                index: 0,
                identity: identity("a.pdf"),
                duration: Duration::from_secs(3),
                output: (),
            },
            JobResult::Failed {
                index: 1,
                identity: identity("b.pdf"),
                duration: Duration::from_secs(1),
                error: JobError::timed_out(Duration::from_secs(1)),
            },
            JobResult::Failed {
                index: 2,
                identity: identity("c.pdf"),
                duration: Duration::from_secs(2),
                error: JobError::crashed("boom"),
            },
            JobResult::Cancelled {
                index: 3,
                identity: identity("d.pdf"),
            },
        ];

        let summary = BatchSummary::from_results(results, true, Duration::from_secs(10));
        assert_eq!(summary.total_jobs, 4);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.success_rate(), 25.0);
        assert_eq!(summary.average_duration(), Some(Duration::from_secs(2)));

        let report = summary.format_report();
        assert!(report.contains("Total Units: 4"));
        assert!(report.contains("Failed: 2 (1 timed out)"));
        assert!(report.contains("Batch was cancelled"));
        assert!(report.contains("c.pdf"));
    }

    #[test]
    fn test_empty_summary() {
        let summary: BatchSummary<()> = BatchSummary::empty();
        assert_eq!(summary.total_jobs, 0);
        assert_eq!(summary.success_rate(), 100.0);
        assert!(summary.average_duration().is_none());
    }
}
