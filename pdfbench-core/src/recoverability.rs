//! Reforge-and-revalidate recoverability check
//!
//! A document is checked in stages:
//!
//! 1. Every validating tool looks at the original. If all of them accept it
//!    the verdict is [`Verdict::Valid`] and no reforger runs.
//! 2. Otherwise each reforger, in the order given, rewrites the original. A
//!    reforger that fails or produces nothing makes the verdict
//!    [`Verdict::Ambiguous`].
//! 3. Every validator re-checks each rewritten document. A single rejection
//!    makes the verdict [`Verdict::Ambiguous`].
//! 4. If every rewrite passes every validator the document is
//!    [`Verdict::Recoverable`].
//!
//! The check never concludes that a document is definitively broken: the
//! only [`Verdict::Failed`] case is a rejected original with no reforger to
//! try.
//!
//! # Example
//!
//! ```rust
//! use pdfbench::document::DocumentHandle;
//! use pdfbench::recoverability::{assess, RecoverabilityOptions, Verdict};
//! use pdfbench::tools::{MockTool, ToolFactory};
//! use std::sync::Arc;
//!
//! let validators: Vec<Arc<dyn ToolFactory>> = vec![Arc::new(MockTool::validator("alpha"))];
//! let reforgers: Vec<Arc<dyn ToolFactory>> = vec![Arc::new(MockTool::reforger("fixer"))];
//! let doc = DocumentHandle::from_bytes("doc.pdf", b"%PDF-1.7 %%BROKEN".to_vec());
//!
//! let report = assess(&doc, &validators, &reforgers, &RecoverabilityOptions::default()).unwrap();
//! assert_eq!(report.verdict, Verdict::Recoverable);
//! assert_eq!(report.reason, "All translations valid");
//! ```

use crate::capability::{Capability, ToolOptions, ToolSession, ValidationTolerance, Validity};
use crate::document::DocumentHandle;
use crate::error::{BenchError, Result};
use crate::tools::{require_capability, ToolFactory};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a recoverability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Valid,
    Recoverable,
    Ambiguous,
    Failed,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Valid => "Valid",
            Verdict::Recoverable => "Recoverable",
            Verdict::Ambiguous => "Ambiguous",
            Verdict::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

/// Options for [`assess`]
#[derive(Debug, Clone, Default)]
pub struct RecoverabilityOptions {
    /// Options for every session opened during the check
    pub tool_options: ToolOptions,
    /// Which validity outcomes count as accepted
    pub tolerance: ValidationTolerance,
    /// Collect every trace message observed along the way
    pub gather_traces: bool,
}

impl RecoverabilityOptions {
    pub fn with_tool_options(mut self, options: ToolOptions) -> Self {
        self.tool_options = options;
        self
    }

    pub fn with_tolerance(mut self, tolerance: ValidationTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn gather_traces(mut self, gather: bool) -> Self {
        self.gather_traces = gather;
        self
    }
}

/// Result of a recoverability check
#[derive(Debug, Clone, Serialize)]
pub struct Recoverability {
    pub verdict: Verdict,
    pub reason: String,
    /// Overall validity of each validator on the original document
    pub original: BTreeMap<String, Validity>,
    /// Reforgers run, in order
    pub reforgers_invoked: Vec<String>,
    /// Union of observed trace messages, when gathering was requested
    pub messages: Option<BTreeSet<String>>,
    pub tolerance: ValidationTolerance,
}

/// Validate one document with one tool, converting open failures to rejections
fn validate(
    factory: &dyn ToolFactory,
    document: &DocumentHandle,
    options: &ToolOptions,
    messages: &mut Option<BTreeSet<String>>,
) -> Validity {
    let mut session = match ToolSession::open(factory, document.clone(), options.clone()) {
        Ok(session) => session,
        Err(error) => {
            debug!(tool = factory.name(), %error, "session failed to open");
            return Validity::rejected(error.to_string());
        }
    };
    let validity = session.overall_validity();
    if let Some(seen) = messages.as_mut() {
        if session.supports(Capability::Trace) {
            let _ = session.trace_messages();
        }
        seen.extend(session.collected_messages().iter().map(|m| m.to_string()));
    }
    validity
}

/// Decide whether `document` is valid, recoverable, or ambiguous
///
/// Validators must declare at least one validating role and reforgers must
/// declare [`Capability::Reforge`]; anything else is a configuration error.
/// Tool failures during the check are part of the verdict, not errors.
pub fn assess(
    document: &DocumentHandle,
    validators: &[Arc<dyn ToolFactory>],
    reforgers: &[Arc<dyn ToolFactory>],
    options: &RecoverabilityOptions,
) -> Result<Recoverability> {
    if validators.is_empty() {
        return Err(BenchError::Config("no validating tools given".to_string()));
    }
    if let Some(tool) = validators
        .iter()
        .find(|t| t.capabilities().roles().all(|r| r == Capability::Reforge))
    {
        return Err(BenchError::Config(format!(
            "tool '{}' has no validating capabilities",
            tool.name()
        )));
    }
    require_capability(reforgers, Capability::Reforge)?;

    let tolerance = options.tolerance;
    let mut messages = options.gather_traces.then(BTreeSet::new);
    let report = |verdict: Verdict,
                  reason: String,
                  original: BTreeMap<String, Validity>,
                  invoked: Vec<String>,
                  messages: Option<BTreeSet<String>>| {
        info!(document = %document.identity(), %verdict, %reason, "recoverability decided");
        Recoverability {
            verdict,
            reason,
            original,
            reforgers_invoked: invoked,
            messages,
            tolerance,
        }
    };

    let original: BTreeMap<String, Validity> = validators
        .iter()
        .map(|tool| {
            let validity = validate(tool.as_ref(), document, &options.tool_options, &mut messages);
            (tool.name().to_string(), validity)
        })
        .collect();

    if original.values().all(|v| tolerance.accepts(v)) {
        return Ok(report(
            Verdict::Valid,
            "Original Valid".to_string(),
            original,
            Vec::new(),
            messages,
        ));
    }
    if reforgers.is_empty() {
        return Ok(report(
            Verdict::Failed,
            "No reforgers available".to_string(),
            original,
            Vec::new(),
            messages,
        ));
    }

    let mut invoked = Vec::new();
    for reforger in reforgers {
        invoked.push(reforger.name().to_string());
        let rewritten = ToolSession::open(
            reforger.as_ref(),
            document.clone(),
            options.tool_options.clone(),
        )
        .and_then(|mut session| session.reforge().map(|doc| (session, doc)));

        // The session owns the rewritten file, so it stays alive until
        // revalidation is done
        let (_session, rewritten) = match rewritten {
            Ok(pair) => pair,
            Err(error) => {
                debug!(reforger = reforger.name(), %error, "reforge failed");
                return Ok(report(
                    Verdict::Ambiguous,
                    format!("{} translation failed", reforger.name()),
                    original,
                    invoked,
                    messages,
                ));
            }
        };

        for validator in validators {
            let validity = validate(
                validator.as_ref(),
                &rewritten,
                &options.tool_options,
                &mut messages,
            );
            if !tolerance.accepts(&validity) {
                debug!(
                    reforger = reforger.name(),
                    validator = validator.name(),
                    %validity,
                    "rewritten document rejected"
                );
                return Ok(report(
                    Verdict::Ambiguous,
                    format!(
                        "{} translation failed for {}",
                        reforger.name(),
                        validator.name()
                    ),
                    original,
                    invoked,
                    messages,
                ));
            }
        }
    }

    Ok(report(
        Verdict::Recoverable,
        "All translations valid".to_string(),
        original,
        invoked,
        messages,
    ))
}
