//! Spotlight: page-by-page render comparison between tools
//!
//! The map phase renders every document with every tool; the reduce phase
//! compares each pair of tools page by page for one document.

use super::{
    cell, check_documents, session_options, HasStatus, Record, ReportOptions, Table,
    STATUS_SUCCESS,
};
use crate::batch::{map_reduce, CustomJob, JobResult, UnitIdentity};
use crate::capability::{Capability, RenderMap, ToolSession};
use crate::compare::{compare_renders, SimilarityResult};
use crate::document::DocumentHandle;
use crate::error::{BenchError, Result};
use crate::tools::{require_capability, ToolRegistry};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// One page compared between two tools
#[derive(Debug, Clone, Serialize)]
pub struct SpotlightRow {
    pub path: String,
    pub tool_a: String,
    pub tool_b: String,
    pub page: Option<usize>,
    pub status: String,
    #[serde(flatten)]
    pub similarity: Option<SimilarityResult>,
    /// Written structural difference image
    pub diff: Option<String>,
    pub message: Option<String>,
}

impl HasStatus for SpotlightRow {
    fn status(&self) -> &str {
        &self.status
    }
}

fn score(value: f64) -> String {
    format!("{value:.6}")
}

impl Record for SpotlightRow {
    fn columns() -> &'static [&'static str] {
        &[
            "path",
            "tool_a",
            "tool_b",
            "page",
            "status",
            "combined",
            "entropy",
            "phash",
            "dhash",
            "template_sqdiff",
            "template_ccoeff",
            "size_ratio",
            "structural",
            "outcome",
            "diff",
            "message",
        ]
    }

    fn cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.path.clone(),
            self.tool_a.clone(),
            self.tool_b.clone(),
            cell(&self.page),
            self.status.clone(),
        ];
        match &self.similarity {
            Some(s) => {
                cells.push(score(s.combined));
                cells.extend(s.sub_scores().into_iter().map(score));
                cells.push(s.structural.map(score).unwrap_or_default());
                cells.push(s.outcome.clone());
            }
            None => cells.extend((0..9).map(|_| String::new())),
        }
        cells.push(cell(&self.diff));
        cells.push(cell(&self.message));
        cells
    }
}

fn file_safe(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn save_diff(
    dir: &Path,
    document: &str,
    pair: (&str, &str),
    page: usize,
    result: &SimilarityResult,
) -> Result<Option<String>> {
    let Some(diff) = &result.diff else {
        return Ok(None);
    };
    let stem = Path::new(document)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| document.to_string());
    let target = dir.join(format!(
        "{}.{}-{}.p{page}.png",
        file_safe(&stem),
        file_safe(pair.0),
        file_safe(pair.1)
    ));
    diff.save(&target)?;
    Ok(Some(target.display().to_string()))
}

/// Compare the renders of every pair of tools for every document
pub fn spotlight(
    documents: &[DocumentHandle],
    registry: &ToolRegistry,
    tools: &[String],
    options: &ReportOptions,
) -> Result<Table<SpotlightRow>> {
    options.validate()?;
    check_documents(documents)?;
    let tools = if tools.is_empty() {
        registry.with_capability(Capability::Render)
    } else {
        let selected = registry.select(tools)?;
        require_capability(&selected, Capability::Render)?;
        selected
    };
    if tools.len() < 2 {
        return Err(BenchError::Config(
            "spotlight needs at least two rendering tools".to_string(),
        ));
    }
    if let Some(dir) = &options.diff_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut map_jobs = Vec::new();
    for document in documents {
        for tool in &tools {
            let identity = UnitIdentity::new(document.identity()).with_label("tool", tool.name());
            let tool = Arc::clone(tool);
            let document = document.clone();
            let template = options.tool_options.clone();
            map_jobs.push(CustomJob::new(identity, move |ctx| {
                let mut session =
                    ToolSession::open(tool.as_ref(), document, session_options(&template, ctx))?;
                session.renders()
            }));
        }
    }

    let compare_timeout = options.compare_timeout;
    let diff_dir: Option<PathBuf> = options.diff_dir.clone();
    let summary = map_reduce(
        map_jobs,
        |identity| identity.path.clone(),
        move |path: String, rendered: Vec<JobResult<RenderMap>>| {
            let diff_dir = diff_dir.clone();
            CustomJob::new(UnitIdentity::new(path.clone()), move |ctx| {
                let renders: Vec<(String, RenderMap)> = rendered
                    .into_iter()
                    .map(|result| {
                        let tool = result.identity().label("tool").unwrap_or_default().to_string();
                        if let Some(error) = result.error() {
                            warn!(document = %path, %tool, %error, "render unit failed");
                        }
                        (tool, result.into_output().unwrap_or_default())
                    })
                    .collect();

                let mut rows = Vec::new();
                for (i, (tool_a, pages_a)) in renders.iter().enumerate() {
                    for (tool_b, pages_b) in &renders[i + 1..] {
                        if ctx.is_cancelled() {
                            return Err(BenchError::Cancelled);
                        }
                        let want_diff = diff_dir.is_some();
                        let compared = compare_renders(pages_a, pages_b, want_diff, compare_timeout);
                        if compared.is_empty() {
                            rows.push(SpotlightRow {
                                path: path.clone(),
                                tool_a: tool_a.clone(),
                                tool_b: tool_b.clone(),
                                page: None,
                                status: STATUS_SUCCESS.to_string(),
                                similarity: Some(SimilarityResult::rendering_failed()),
                                diff: None,
                                message: None,
                            });
                        }
                        for (page, result) in compared {
                            let diff = match &diff_dir {
                                Some(dir) => {
                                    save_diff(dir, &path, (tool_a.as_str(), tool_b.as_str()), page, &result)?
                                }
                                None => None,
                            };
                            rows.push(SpotlightRow {
                                path: path.clone(),
                                tool_a: tool_a.clone(),
                                tool_b: tool_b.clone(),
                                page: Some(page),
                                status: STATUS_SUCCESS.to_string(),
                                similarity: Some(result),
                                diff,
                                message: None,
                            });
                        }
                    }
                }
                Ok(rows)
            })
        },
        options.batch.clone(),
    );
    info!(
        documents = documents.len(),
        tools = tools.len(),
        failed = summary.failed,
        "spotlight finished"
    );

    let mut rows = Vec::new();
    for result in summary.results {
        match result {
            JobResult::Success { output, .. } => rows.extend(output),
            other => rows.push(SpotlightRow {
                path: other.identity().path.clone(),
                tool_a: String::new(),
                tool_b: String::new(),
                page: None,
                status: other.status_label(),
                similarity: None,
                diff: None,
                message: Some(
                    other
                        .error()
                        .map(|e| e.message.clone())
                        .unwrap_or_else(|| "cancelled".to_string()),
                ),
            }),
        }
    }
    Ok(Table::new("spotlight", rows))
}
