//! Batch benchmark operations and their tabular output
//!
//! Each operation takes an explicit list of documents and a
//! [`ToolRegistry`], validates its configuration eagerly, runs through the
//! batch harness and returns a [`Table`] with one row per unit of work.
//! Units that fail, crash or time out still produce a row, with the failure
//! in the `status` and `message` columns.
//!
//! | Operation | Unit | Question answered |
//! |-----------|------|-------------------|
//! | [`highlight`] | document x tool | how does each tool handle each document? |
//! | [`spotlight`] | document | do the tools render the same pages? |
//! | [`detect_chaos`] | document x tool | does a tool give the same answer every run? |
//! | [`floodlight`] | document | is the document valid, recoverable, or ambiguous? |
//! | [`astrotruth`] | document | do the tools agree, and what did they say? |

use crate::batch::{BatchOptions, JobResult, TaskContext, UnitIdentity};
use crate::capability::{Capability, ToolOptions, ValidationTolerance, ValidityOutcome};
use crate::document::DocumentHandle;
use crate::error::{BenchError, Result};
use crate::fingerprint::PageSelection;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub mod astrotruth;
pub mod chaos;
pub mod floodlight;
pub mod highlight;
pub mod spotlight;

pub use astrotruth::{astrotruth, AstroTruthRow, Consensus};
pub use chaos::{detect_chaos, ChaosRow};
pub use floodlight::{floodlight, FloodLightRow};
pub use highlight::{highlight, HighlightRow};
pub use spotlight::{spotlight, SpotlightRow};

/// Options shared by every batch operation
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub batch: BatchOptions,
    /// Template for every tool session; the harness fills in the scratch
    /// directory and cancellation of each unit
    pub tool_options: ToolOptions,
    pub tolerance: ValidationTolerance,
    /// Pages that contribute to render fingerprints
    pub pages: PageSelection,
    /// Deadline for each page comparison
    pub compare_timeout: Option<Duration>,
    /// Where spotlight writes structural difference images
    pub diff_dir: Option<PathBuf>,
    /// How many times chaos detection runs each tool
    pub chaos_runs: usize,
    /// Collect trace messages during floodlight
    pub gather_traces: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            batch: BatchOptions::default(),
            tool_options: ToolOptions::default(),
            tolerance: ValidationTolerance::default(),
            pages: PageSelection::default(),
            compare_timeout: Some(Duration::from_secs(60)),
            diff_dir: None,
            chaos_runs: 3,
            gather_traces: false,
        }
    }
}

impl ReportOptions {
    pub fn with_batch(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_tool_options(mut self, options: ToolOptions) -> Self {
        self.tool_options = options;
        self
    }

    pub fn with_tolerance(mut self, tolerance: ValidationTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_pages(mut self, pages: PageSelection) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_compare_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.compare_timeout = timeout;
        self
    }

    pub fn with_diff_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diff_dir = Some(dir.into());
        self
    }

    pub fn with_chaos_runs(mut self, runs: usize) -> Self {
        self.chaos_runs = runs;
        self
    }

    pub fn gather_traces(mut self, gather: bool) -> Self {
        self.gather_traces = gather;
        self
    }

    /// Reject settings no operation can run with
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: Option<Duration>| match value {
            Some(limit) if limit.is_zero() => {
                Err(BenchError::Config(format!("{name} must be positive")))
            }
            _ => Ok(()),
        };
        positive("job timeout", self.batch.job_timeout)?;
        positive("tool timeout", self.tool_options.timeout)?;
        positive("comparison timeout", self.compare_timeout)?;
        if self.batch.parallelism == 0 {
            return Err(BenchError::Config("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Fail before scheduling when an input cannot possibly be read
pub fn check_documents(documents: &[DocumentHandle]) -> Result<()> {
    for document in documents {
        if let DocumentHandle::Path(path) = document {
            if !path.is_file() {
                return Err(BenchError::InvalidInput(format!(
                    "input does not exist: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

/// Session options for one unit: the template bound to the unit's scratch
/// space, cancellation and remaining time
pub(crate) fn session_options(template: &ToolOptions, ctx: &TaskContext) -> ToolOptions {
    let mut options = template
        .clone()
        .with_temp_dir(ctx.temp_path())
        .with_cancel(ctx.cancel_token().clone());
    options.timeout = match (options.timeout, ctx.remaining()) {
        (Some(own), Some(left)) => Some(own.min(left)),
        (own, left) => own.or(left),
    };
    options
}

/// `Role=Outcome` pairs joined by `;`
pub(crate) fn join_outcomes<K: fmt::Display>(outcomes: &BTreeMap<K, ValidityOutcome>) -> String {
    outcomes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

pub(crate) fn join_roles(roles: &[Capability]) -> String {
    roles
        .iter()
        .map(|r| r.key())
        .collect::<Vec<_>>()
        .join("|")
}

/// Split harness results into successful outputs and failure rows
pub(crate) fn collect_rows<T, R>(
    results: Vec<JobResult<T>>,
    mut success: impl FnMut(UnitIdentity, T) -> R,
    failure: impl Fn(&UnitIdentity, String, String) -> R,
) -> Vec<R> {
    results
        .into_iter()
        .map(|result| match result {
            JobResult::Success {
                identity, output, ..
            } => success(identity, output),
            JobResult::Failed {
                identity, error, ..
            } => failure(&identity, error.kind.to_string(), error.message),
            JobResult::Cancelled { identity, .. } => {
                failure(&identity, "Cancelled".to_string(), "cancelled".to_string())
            }
        })
        .collect()
}

/// A row that can be written as delimited text
pub trait Record: Serialize {
    fn columns() -> &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

pub(crate) fn cell<T: fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// Output format for tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableFormat {
    #[default]
    Csv,
    Tsv,
    JsonLines,
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableFormat::Csv => write!(f, "csv"),
            TableFormat::Tsv => write!(f, "tsv"),
            TableFormat::JsonLines => write!(f, "jsonl"),
        }
    }
}

impl FromStr for TableFormat {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(TableFormat::Csv),
            "tsv" => Ok(TableFormat::Tsv),
            "jsonl" | "json-lines" | "ndjson" => Ok(TableFormat::JsonLines),
            other => Err(BenchError::Config(format!(
                "unknown table format '{other}' (expected csv, tsv or jsonl)"
            ))),
        }
    }
}

/// Quote a field when it contains the delimiter, a quote, or a line break
pub fn quote_field(field: &str, delimiter: char) -> Cow<'_, str> {
    if field.contains(delimiter) || field.contains(['"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Rows produced by one operation
#[derive(Debug, Clone)]
pub struct Table<R> {
    pub operation: &'static str,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<R>,
}

impl<R: Record> Table<R> {
    pub fn new(operation: &'static str, rows: Vec<R>) -> Self {
        Self {
            operation,
            generated_at: Utc::now(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header plus one line per row
    pub fn to_delimited(&self, delimiter: char) -> String {
        let separator = delimiter.to_string();
        let line = |fields: &mut dyn Iterator<Item = String>| {
            let quoted: Vec<String> = fields
                .map(|f| quote_field(&f, delimiter).into_owned())
                .collect();
            quoted.join(&separator) + "\n"
        };

        let mut out = line(&mut R::columns().iter().map(|c| c.to_string()));
        for row in &self.rows {
            out.push_str(&line(&mut row.cells().into_iter()));
        }
        out
    }

    pub fn to_csv(&self) -> String {
        self.to_delimited(',')
    }

    pub fn to_tsv(&self) -> String {
        self.to_delimited('\t')
    }

    /// One JSON object per row
    pub fn to_json_lines(&self) -> Result<String> {
        let mut out = String::new();
        for row in &self.rows {
            out.push_str(&serde_json::to_string(row)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn write<W: Write>(&self, format: TableFormat, writer: &mut W) -> Result<()> {
        let text = match format {
            TableFormat::Csv => self.to_csv(),
            TableFormat::Tsv => self.to_tsv(),
            TableFormat::JsonLines => self.to_json_lines()?,
        };
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Rows whose unit did not complete
    pub fn failures(&self) -> impl Iterator<Item = &R>
    where
        R: HasStatus,
    {
        self.rows.iter().filter(|r| r.status() != STATUS_SUCCESS)
    }
}

/// Status of a row whose unit completed
pub const STATUS_SUCCESS: &str = "Success";

/// Rows carrying a harness status column
pub trait HasStatus {
    fn status(&self) -> &str;
}
