//! AstroTruth: ground-truth labels from tool consensus
//!
//! Every selected tool classifies every document. A document is labelled
//! `Valid` when all tools find it usable under the configured tolerance,
//! `Invalid` when none do, and `Disputed` otherwise. The union of trace
//! messages is kept alongside the label.

use super::{
    cell, check_documents, collect_rows, join_outcomes, session_options, HasStatus, Record,
    ReportOptions, Table, STATUS_SUCCESS,
};
use crate::batch::{BatchProcessor, CustomJob, TaskContext, UnitIdentity};
use crate::capability::{
    Capability, CapabilitySet, ToolOptions, ToolSession, ValidationTolerance, Validity,
    ValidityOutcome,
};
use crate::document::DocumentHandle;
use crate::error::{BenchError, Result};
use crate::tools::{ToolFactory, ToolRegistry};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Agreement between tools on one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Consensus {
    Valid,
    Invalid,
    Disputed,
}

impl Consensus {
    /// Label a set of validities; `None` for an empty set
    pub fn of<'a>(
        validities: impl IntoIterator<Item = &'a Validity>,
        tolerance: ValidationTolerance,
    ) -> Option<Self> {
        let (mut usable, mut unusable) = (0usize, 0usize);
        for validity in validities {
            if tolerance.accepts(validity) {
                usable += 1;
            } else {
                unusable += 1;
            }
        }
        match (usable, unusable) {
            (0, 0) => None,
            (_, 0) => Some(Consensus::Valid),
            (0, _) => Some(Consensus::Invalid),
            _ => Some(Consensus::Disputed),
        }
    }
}

impl fmt::Display for Consensus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Consensus::Valid => "Valid",
            Consensus::Invalid => "Invalid",
            Consensus::Disputed => "Disputed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AstroTruthRow {
    pub path: String,
    pub status: String,
    pub label: Option<Consensus>,
    pub validities: BTreeMap<String, ValidityOutcome>,
    pub messages: Vec<String>,
    pub message: Option<String>,
}

impl HasStatus for AstroTruthRow {
    fn status(&self) -> &str {
        &self.status
    }
}

impl Record for AstroTruthRow {
    fn columns() -> &'static [&'static str] {
        &["path", "status", "label", "validities", "messages", "message"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.path.clone(),
            self.status.clone(),
            cell(&self.label),
            join_outcomes(&self.validities),
            self.messages.join(" | "),
            cell(&self.message),
        ]
    }
}

struct Labelled {
    label: Option<Consensus>,
    validities: BTreeMap<String, ValidityOutcome>,
    messages: Vec<String>,
}

fn observe(
    tool: &dyn ToolFactory,
    document: &DocumentHandle,
    options: ToolOptions,
    messages: &mut BTreeSet<String>,
) -> Validity {
    let mut session = match ToolSession::open(tool, document.clone(), options) {
        Ok(session) => session,
        Err(BenchError::Cancelled) => return Validity::rejected("cancelled"),
        Err(error) => {
            debug!(tool = tool.name(), %error, "session failed to open");
            return Validity::rejected(error.to_string());
        }
    };
    let validity = session.overall_validity();
    if session.supports(Capability::Trace) {
        let _ = session.trace_messages();
    }
    messages.extend(session.collected_messages().iter().map(|m| m.to_string()));
    validity
}

fn label_document(
    document: &DocumentHandle,
    tools: &[Arc<dyn ToolFactory>],
    template: &ToolOptions,
    tolerance: ValidationTolerance,
    ctx: &TaskContext,
) -> Result<Labelled> {
    let mut messages = BTreeSet::new();
    let mut observed = BTreeMap::new();
    for tool in tools {
        if ctx.is_cancelled() {
            return Err(BenchError::Cancelled);
        }
        let validity = observe(
            tool.as_ref(),
            document,
            session_options(template, ctx),
            &mut messages,
        );
        observed.insert(tool.name().to_string(), validity);
    }
    Ok(Labelled {
        label: Consensus::of(observed.values(), tolerance),
        validities: observed.into_iter().map(|(k, v)| (k, v.outcome)).collect(),
        messages: messages.into_iter().collect(),
    })
}

/// Label every document by the agreement of the selected tools
pub fn astrotruth(
    documents: &[DocumentHandle],
    registry: &ToolRegistry,
    tools: &[String],
    options: &ReportOptions,
) -> Result<Table<AstroTruthRow>> {
    options.validate()?;
    check_documents(documents)?;
    let tools: Vec<Arc<dyn ToolFactory>> = registry
        .select(tools)?
        .into_iter()
        .filter(|t| t.capabilities().intersects(CapabilitySet::VALIDATING))
        .collect();
    if tools.is_empty() {
        return Err(BenchError::Config(
            "astrotruth needs at least one validating tool".to_string(),
        ));
    }

    let mut processor = BatchProcessor::new(options.batch.clone());
    for document in documents {
        let identity = UnitIdentity::new(document.identity());
        let document = document.clone();
        let tools = tools.clone();
        let template = options.tool_options.clone();
        let tolerance = options.tolerance;
        processor.add_job(CustomJob::new(identity, move |ctx| {
            label_document(&document, &tools, &template, tolerance, ctx)
        }));
    }

    let summary = processor.execute();
    info!(
        documents = documents.len(),
        tools = tools.len(),
        failed = summary.failed,
        "astrotruth finished"
    );

    let rows = collect_rows(
        summary.results,
        |identity, labelled| AstroTruthRow {
            path: identity.path,
            status: STATUS_SUCCESS.to_string(),
            label: labelled.label,
            validities: labelled.validities,
            messages: labelled.messages,
            message: None,
        },
        |identity, status, message| AstroTruthRow {
            path: identity.path.clone(),
            status,
            label: None,
            validities: BTreeMap::new(),
            messages: Vec::new(),
            message: Some(message),
        },
    );
    Ok(Table::new("astrotruth", rows))
}
