//! Highlight: how each tool handles each document

use super::{
    cell, check_documents, collect_rows, join_outcomes, session_options, HasStatus, Record,
    ReportOptions, Table, STATUS_SUCCESS,
};
use crate::batch::{BatchProcessor, CustomJob, UnitIdentity};
use crate::capability::{Capability, CapabilitySet, ToolSession, ValidityOutcome};
use crate::document::DocumentHandle;
use crate::error::Result;
use crate::tools::ToolRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// One document under one tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighlightRow {
    pub path: String,
    pub tool: String,
    pub status: String,
    pub validity: Option<ValidityOutcome>,
    pub info: Option<String>,
    pub roles: BTreeMap<Capability, ValidityOutcome>,
    pub pages: Option<usize>,
    pub message: Option<String>,
}

impl HasStatus for HighlightRow {
    fn status(&self) -> &str {
        &self.status
    }
}

impl Record for HighlightRow {
    fn columns() -> &'static [&'static str] {
        &["path", "tool", "status", "validity", "info", "roles", "pages", "message"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.path.clone(),
            self.tool.clone(),
            self.status.clone(),
            cell(&self.validity),
            cell(&self.info),
            join_outcomes(&self.roles),
            cell(&self.pages),
            cell(&self.message),
        ]
    }
}

struct Observation {
    validity: crate::capability::Validity,
    roles: BTreeMap<Capability, ValidityOutcome>,
    pages: Option<usize>,
}

/// Classify every document with every selected tool
pub fn highlight(
    documents: &[DocumentHandle],
    registry: &ToolRegistry,
    tools: &[String],
    options: &ReportOptions,
) -> Result<Table<HighlightRow>> {
    options.validate()?;
    check_documents(documents)?;
    let tools = registry.select(tools)?;

    let mut processor = BatchProcessor::new(options.batch.clone());
    for document in documents {
        for tool in &tools {
            let identity = UnitIdentity::new(document.identity()).with_label("tool", tool.name());
            let tool = Arc::clone(tool);
            let document = document.clone();
            let template = options.tool_options.clone();
            processor.add_job(CustomJob::new(identity, move |ctx| {
                let mut session =
                    ToolSession::open(tool.as_ref(), document, session_options(&template, ctx))?;
                let validity = session.overall_validity();
                let roles = session
                    .validities()
                    .into_iter()
                    .map(|(role, v)| (role, v.outcome))
                    .collect();
                // the validity pass has already rendered when Render is selected
                let pages = if session.selected_roles().contains(CapabilitySet::RENDER) {
                    let timings = session.render_timings();
                    (!timings.is_empty()).then_some(timings.len())
                } else if session.supports(Capability::Render) {
                    session.renders().ok().map(|r| r.len())
                } else {
                    None
                };
                Ok(Observation {
                    validity,
                    roles,
                    pages,
                })
            }));
        }
    }

    let summary = processor.execute();
    info!(
        documents = documents.len(),
        tools = tools.len(),
        failed = summary.failed,
        "highlight finished"
    );

    let tool_of = |identity: &UnitIdentity| identity.label("tool").unwrap_or_default().to_string();
    let rows = collect_rows(
        summary.results,
        |identity, observed| HighlightRow {
            tool: tool_of(&identity),
            path: identity.path,
            status: STATUS_SUCCESS.to_string(),
            validity: Some(observed.validity.outcome),
            info: observed.validity.info,
            roles: observed.roles,
            pages: observed.pages,
            message: None,
        },
        |identity, status, message| HighlightRow {
            path: identity.path.clone(),
            tool: tool_of(identity),
            status,
            validity: None,
            info: None,
            roles: BTreeMap::new(),
            pages: None,
            message: Some(message),
        },
    );
    Ok(Table::new("highlight", rows))
}
