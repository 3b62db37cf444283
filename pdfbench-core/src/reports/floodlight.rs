//! FloodLight: recoverability verdict per document

use super::{
    cell, check_documents, collect_rows, session_options, HasStatus, Record, ReportOptions, Table,
    STATUS_SUCCESS,
};
use crate::batch::{BatchProcessor, CustomJob, UnitIdentity};
use crate::capability::{Capability, CapabilitySet, ValidityOutcome};
use crate::document::DocumentHandle;
use crate::error::{BenchError, Result};
use crate::recoverability::{assess, Recoverability, RecoverabilityOptions, Verdict};
use crate::tools::{require_capability, ToolFactory, ToolRegistry};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloodLightRow {
    pub path: String,
    pub status: String,
    pub verdict: Option<Verdict>,
    pub reason: Option<String>,
    pub reforgers_invoked: Vec<String>,
    pub original: BTreeMap<String, ValidityOutcome>,
    pub messages: Option<BTreeSet<String>>,
    pub message: Option<String>,
}

impl HasStatus for FloodLightRow {
    fn status(&self) -> &str {
        &self.status
    }
}

impl Record for FloodLightRow {
    fn columns() -> &'static [&'static str] {
        &[
            "path",
            "status",
            "verdict",
            "reason",
            "reforgers_invoked",
            "original",
            "messages",
            "message",
        ]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.path.clone(),
            self.status.clone(),
            cell(&self.verdict),
            cell(&self.reason),
            self.reforgers_invoked.join("|"),
            super::join_outcomes(&self.original),
            self.messages
                .as_ref()
                .map(|m| m.iter().cloned().collect::<Vec<_>>().join(" | "))
                .unwrap_or_default(),
            cell(&self.message),
        ]
    }
}

impl FloodLightRow {
    fn from_report(identity: UnitIdentity, report: Recoverability) -> Self {
        Self {
            path: identity.path,
            status: STATUS_SUCCESS.to_string(),
            verdict: Some(report.verdict),
            reason: Some(report.reason),
            reforgers_invoked: report.reforgers_invoked,
            original: report
                .original
                .into_iter()
                .map(|(tool, validity)| (tool, validity.outcome))
                .collect(),
            messages: report.messages,
            message: None,
        }
    }
}

/// Decide recoverability for every document
///
/// `validators` default to every tool with a validating role and
/// `reforgers` to every tool that can reforge, in registry order.
pub fn floodlight(
    documents: &[DocumentHandle],
    registry: &ToolRegistry,
    validators: &[String],
    reforgers: &[String],
    options: &ReportOptions,
) -> Result<Table<FloodLightRow>> {
    options.validate()?;
    check_documents(documents)?;

    let validators: Vec<Arc<dyn ToolFactory>> = if validators.is_empty() {
        registry
            .iter()
            .filter(|t| t.capabilities().intersects(CapabilitySet::VALIDATING))
            .cloned()
            .collect()
    } else {
        registry.select(validators)?
    };
    if validators.is_empty() {
        return Err(BenchError::Config("floodlight needs at least one validator".to_string()));
    }
    let reforgers = if reforgers.is_empty() {
        registry.with_capability(Capability::Reforge)
    } else {
        let selected = registry.select(reforgers)?;
        require_capability(&selected, Capability::Reforge)?;
        selected
    };

    let mut processor = BatchProcessor::new(options.batch.clone());
    for document in documents {
        let identity = UnitIdentity::new(document.identity());
        let document = document.clone();
        let validators = validators.clone();
        let reforgers = reforgers.clone();
        let template = options.tool_options.clone();
        let tolerance = options.tolerance;
        let gather = options.gather_traces;
        processor.add_job(CustomJob::new(identity, move |ctx| {
            let check = RecoverabilityOptions::default()
                .with_tool_options(session_options(&template, ctx))
                .with_tolerance(tolerance)
                .gather_traces(gather);
            assess(&document, &validators, &reforgers, &check)
        }));
    }

    let summary = processor.execute();
    info!(
        documents = documents.len(),
        validators = validators.len(),
        reforgers = reforgers.len(),
        failed = summary.failed,
        "floodlight finished"
    );

    let rows = collect_rows(
        summary.results,
        FloodLightRow::from_report,
        |identity, status, message| FloodLightRow {
            path: identity.path.clone(),
            status,
            verdict: None,
            reason: None,
            reforgers_invoked: Vec::new(),
            original: BTreeMap::new(),
            messages: None,
            message: Some(message),
        },
    );
    Ok(Table::new("floodlight", rows))
}
