//! DetectChaos: does a tool give the same answer on every run?
//!
//! Each tool processes each document several times. Every run is
//! fingerprinted, and the fingerprints of one (document, tool) pair are
//! compared against the first completed run.

use super::{
    cell, check_documents, join_roles, session_options, HasStatus, Record, ReportOptions, Table,
    STATUS_SUCCESS,
};
use crate::batch::{map_reduce, CustomJob, JobResult, UnitIdentity};
use crate::capability::{Capability, ToolSession};
use crate::document::DocumentHandle;
use crate::error::{BenchError, Result};
use crate::fingerprint::{fingerprint, Fingerprint, FingerprintComparator};
use crate::tools::ToolRegistry;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Repeatability of one tool on one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChaosRow {
    pub path: String,
    pub tool: String,
    pub status: String,
    pub runs: usize,
    pub completed: usize,
    /// Absent when fewer than two runs completed
    pub deterministic: Option<bool>,
    /// Roles whose output changed between runs
    pub differing: Vec<Capability>,
    pub message: Option<String>,
}

impl HasStatus for ChaosRow {
    fn status(&self) -> &str {
        &self.status
    }
}

impl Record for ChaosRow {
    fn columns() -> &'static [&'static str] {
        &[
            "path",
            "tool",
            "status",
            "runs",
            "completed",
            "deterministic",
            "differing",
            "message",
        ]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.path.clone(),
            self.tool.clone(),
            self.status.clone(),
            self.runs.to_string(),
            self.completed.to_string(),
            cell(&self.deterministic),
            join_roles(&self.differing),
            cell(&self.message),
        ]
    }
}

struct Repeatability {
    completed: usize,
    deterministic: Option<bool>,
    differing: Vec<Capability>,
    message: Option<String>,
}

fn repeatability(runs: usize, results: Vec<JobResult<Fingerprint>>) -> Repeatability {
    let failures: Vec<String> = results
        .iter()
        .filter_map(|r| {
            let run = r.identity().label("run").unwrap_or("?");
            r.error().map(|e| format!("run {run}: {e}"))
        })
        .collect();
    let prints: Vec<Fingerprint> = results.into_iter().filter_map(|r| r.into_output()).collect();

    let mut comparator = FingerprintComparator::new();
    let mut differing: Vec<Capability> = Vec::new();
    if let Some((first, rest)) = prints.split_first() {
        for other in rest {
            for role in comparator.differing_roles(first, other) {
                if !differing.contains(&role) {
                    differing.push(role);
                }
            }
        }
    }
    differing.sort();

    let completed = prints.len();
    let mut notes = Vec::new();
    if completed < runs {
        notes.push(format!("only {completed} of {runs} runs completed"));
    }
    notes.extend(failures);

    Repeatability {
        completed,
        deterministic: (completed >= 2).then(|| differing.is_empty()),
        differing,
        message: (!notes.is_empty()).then(|| notes.join("; ")),
    }
}

/// Run every selected tool several times on every document
pub fn detect_chaos(
    documents: &[DocumentHandle],
    registry: &ToolRegistry,
    tools: &[String],
    options: &ReportOptions,
) -> Result<Table<ChaosRow>> {
    options.validate()?;
    check_documents(documents)?;
    if options.chaos_runs < 2 {
        return Err(BenchError::Config(
            "chaos detection needs at least two runs".to_string(),
        ));
    }
    let tools = registry.select(tools)?;
    let runs = options.chaos_runs;

    let mut map_jobs = Vec::new();
    for document in documents {
        for tool in &tools {
            for run in 0..runs {
                let identity = UnitIdentity::new(document.identity())
                    .with_label("tool", tool.name())
                    .with_label("run", run);
                let tool = Arc::clone(tool);
                let document = document.clone();
                let template = options.tool_options.clone();
                let pages = options.pages;
                map_jobs.push(CustomJob::new(identity, move |ctx| {
                    let mut session = ToolSession::open(
                        tool.as_ref(),
                        document,
                        session_options(&template, ctx),
                    )?;
                    Ok(fingerprint(&mut session, &pages, run))
                }));
            }
        }
    }

    let summary = map_reduce(
        map_jobs,
        |identity| identity.project(&["tool"]),
        move |key: UnitIdentity, results: Vec<JobResult<Fingerprint>>| {
            CustomJob::new(key, move |_ctx| Ok(repeatability(runs, results)))
        },
        options.batch.clone(),
    );
    info!(
        documents = documents.len(),
        tools = tools.len(),
        runs,
        failed = summary.failed,
        "chaos detection finished"
    );

    let tool_of = |identity: &UnitIdentity| identity.label("tool").unwrap_or_default().to_string();
    let rows = super::collect_rows(
        summary.results,
        |identity, outcome| ChaosRow {
            tool: tool_of(&identity),
            path: identity.path,
            status: STATUS_SUCCESS.to_string(),
            runs,
            completed: outcome.completed,
            deterministic: outcome.deterministic,
            differing: outcome.differing,
            message: outcome.message,
        },
        |identity, status, message| ChaosRow {
            path: identity.path.clone(),
            tool: tool_of(identity),
            status,
            runs,
            completed: 0,
            deterministic: None,
            differing: Vec::new(),
            message: Some(message),
        },
    );
    Ok(Table::new("detect_chaos", rows))
}
