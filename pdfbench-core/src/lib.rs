//! # pdfbench
//!
//! Differential benchmarking of PDF tools. Several tools process the same
//! documents; their observations are classified, compared and aggregated into
//! tabular reports.
//!
//! ## Features
//!
//! - **Capability Model**: Tools declare roles (trace, render, text, metadata,
//!   fonts, images, reforge); sessions observe each role lazily and classify it
//! - **Similarity Comparator**: Perceptual comparison of rendered pages with six
//!   metrics, a template-matching fallback for pages of different sizes and an
//!   optional structural difference map
//! - **Content Fingerprints**: Stable per-role digests used to detect
//!   nondeterministic tools
//! - **Recoverability**: Decide whether a document is valid, recoverable by
//!   rewriting, or ambiguous
//! - **Resilient Batches**: Parallel units with per-unit timeouts, panic
//!   isolation and cancellation, plus a map/reduce layer
//! - **Reports**: DetectChaos, FloodLight, Spotlight, Highlight and AstroTruth
//!   tables in CSV, TSV or JSON lines
//!
//! ## Quick Start
//!
//! ```rust
//! use pdfbench::document::DocumentHandle;
//! use pdfbench::reports::{highlight, ReportOptions, TableFormat};
//! use pdfbench::tools::{MockTool, ToolRegistry};
//!
//! # fn main() -> pdfbench::Result<()> {
//! let registry = ToolRegistry::new()
//!     .with(MockTool::validator("alpha"))?
//!     .with(MockTool::validator("beta"))?;
//! let documents = vec![
//!     DocumentHandle::from_bytes("fine.pdf", b"%PDF-1.7 fine".to_vec()),
//!     DocumentHandle::from_bytes("broken.pdf", b"%PDF-1.7 %%BROKEN".to_vec()),
//! ];
//!
//! let table = highlight(&documents, &registry, &[], &ReportOptions::default())?;
//! assert_eq!(table.len(), 4);
//!
//! let mut out = Vec::new();
//! table.write(TableFormat::Csv, &mut out)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Recoverability
//!
//! ```rust
//! use std::sync::Arc;
//! use pdfbench::recoverability::{assess, RecoverabilityOptions, Verdict};
//! use pdfbench::tools::{MockTool, ToolFactory};
//! use pdfbench::DocumentHandle;
//!
//! # fn main() -> pdfbench::Result<()> {
//! let validators: Vec<Arc<dyn ToolFactory>> = vec![Arc::new(MockTool::validator("alpha"))];
//! let reforgers: Vec<Arc<dyn ToolFactory>> = vec![Arc::new(MockTool::reforger("fixer"))];
//! let broken = DocumentHandle::from_bytes("broken.pdf", b"%PDF-1.7 %%BROKEN".to_vec());
//!
//! let report = assess(&broken, &validators, &reforgers, &RecoverabilityOptions::default())?;
//! assert_eq!(report.verdict, Verdict::Recoverable);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod capability;
pub mod compare;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod recoverability;
pub mod reports;
pub mod tools;

pub use capability::{
    Capability, CapabilitySet, ToolOptions, ToolSession, ValidationTolerance, Validity,
    ValidityOutcome,
};
pub use compare::{compare, SimilarityResult};
pub use document::DocumentHandle;
pub use error::{BenchError, Result};
pub use fingerprint::{Fingerprint, PageSelection};
pub use recoverability::{assess, Recoverability, Verdict};
pub use tools::{ToolFactory, ToolRegistry};

/// Current version of pdfbench
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
