//! Capability roles and validity outcomes
//!
//! Every tool adapter declares the set of [`Capability`] roles it supports.
//! For each supported role a [`ToolSession`] computes a [`Validity`] once and
//! caches it. The overall validity of a tool for a document is the worst
//! outcome across its selected roles, using the severity order
//!
//! ```text
//! Valid < ValidWithWarnings < RejectedAmbiguous < Rejected < TimedOut
//! ```
//!
//! so that any rejecting role vetoes the others.
//!
//! # Example
//!
//! ```rust
//! use pdfbench::capability::{Validity, ValidityOutcome};
//!
//! let overall = Validity::worst([
//!     Validity::valid(),
//!     Validity::rejected("broken xref table"),
//!     Validity::with_warnings("font substituted"),
//! ]);
//! assert_eq!(overall.outcome, ValidityOutcome::Rejected);
//! assert!(!overall.is_usable());
//! ```

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod probes;
pub mod session;


pub use probes::{
    FontExtractor, ImageDataExtractor, MetadataExtractor, Observed, PageOutcome, ProbeContext,
    Reforger, RenderMap, RenderPage, Renderer, Severity, TextExtractor, TextMap, ToolProbes,
    TraceMessage, Tracer,
};
pub use session::{RenderTiming, ToolOptions, ToolSession};

/// A function a tool adapter may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    Trace,
    Render,
    ExtractText,
    ExtractMetadata,
    ExtractFonts,
    ExtractImageData,
    Reforge,
}

impl Capability {
    /// Every role, in declaration order
    pub const ALL: [Capability; 7] = [
        Capability::Trace,
        Capability::Render,
        Capability::ExtractText,
        Capability::ExtractMetadata,
        Capability::ExtractFonts,
        Capability::ExtractImageData,
        Capability::Reforge,
    ];

    /// The flag for this role
    pub fn flag(self) -> CapabilitySet {
        match self {
            Capability::Trace => CapabilitySet::TRACE,
            Capability::Render => CapabilitySet::RENDER,
            Capability::ExtractText => CapabilitySet::EXTRACT_TEXT,
            Capability::ExtractMetadata => CapabilitySet::EXTRACT_METADATA,
            Capability::ExtractFonts => CapabilitySet::EXTRACT_FONTS,
            Capability::ExtractImageData => CapabilitySet::EXTRACT_IMAGE_DATA,
            Capability::Reforge => CapabilitySet::REFORGE,
        }
    }

    /// Short lowercase name used in configuration and table columns
    pub fn key(self) -> &'static str {
        match self {
            Capability::Trace => "trace",
            Capability::Render => "render",
            Capability::ExtractText => "text",
            Capability::ExtractMetadata => "metadata",
            Capability::ExtractFonts => "fonts",
            Capability::ExtractImageData => "images",
            Capability::Reforge => "reforge",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Trace => "Trace",
            Capability::Render => "Render",
            Capability::ExtractText => "ExtractText",
            Capability::ExtractMetadata => "ExtractMetadata",
            Capability::ExtractFonts => "ExtractFonts",
            Capability::ExtractImageData => "ExtractImageData",
            Capability::Reforge => "Reforge",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Capability {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        Capability::ALL
            .into_iter()
            .find(|cap| cap.key().eq_ignore_ascii_case(s) || cap.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| BenchError::Config(format!("unknown capability '{s}'")))
    }
}

bitflags::bitflags! {
    /// Set of roles declared by a tool
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CapabilitySet: u8 {
        const TRACE = 1 << 0;
        const RENDER = 1 << 1;
        const EXTRACT_TEXT = 1 << 2;
        const EXTRACT_METADATA = 1 << 3;
        const EXTRACT_FONTS = 1 << 4;
        const EXTRACT_IMAGE_DATA = 1 << 5;
        const REFORGE = 1 << 6;

        /// Roles that observe a document rather than rewrite it
        const VALIDATING = Self::TRACE.bits()
            | Self::RENDER.bits()
            | Self::EXTRACT_TEXT.bits()
            | Self::EXTRACT_METADATA.bits()
            | Self::EXTRACT_FONTS.bits()
            | Self::EXTRACT_IMAGE_DATA.bits();
    }
}

impl CapabilitySet {
    /// Check whether a role is part of the set
    pub fn supports(&self, capability: Capability) -> bool {
        self.contains(capability.flag())
    }

    /// Iterate over the roles in the set, in declaration order
    pub fn roles(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .into_iter()
            .filter(move |cap| self.supports(*cap))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(CapabilitySet::empty(), |set, cap| set | cap.flag())
    }
}

/// Classification of how a tool handled a document for one role
///
/// Variants are declared in increasing severity; the derived ordering is the
/// contract used to combine roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValidityOutcome {
    Valid,
    ValidWithWarnings,
    RejectedAmbiguous,
    Rejected,
    TimedOut,
}

impl ValidityOutcome {
    /// Whether the tool produced usable output
    pub fn is_usable(self) -> bool {
        matches!(self, ValidityOutcome::Valid | ValidityOutcome::ValidWithWarnings)
    }
}

impl fmt::Display for ValidityOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidityOutcome::Valid => "Valid",
            ValidityOutcome::ValidWithWarnings => "ValidWithWarnings",
            ValidityOutcome::RejectedAmbiguous => "RejectedAmbiguous",
            ValidityOutcome::Rejected => "Rejected",
            ValidityOutcome::TimedOut => "TimedOut",
        };
        write!(f, "{name}")
    }
}

/// Outcome plus explanation for one (document, tool, role)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    pub outcome: ValidityOutcome,
    pub info: Option<String>,
}

impl Validity {
    pub fn new(outcome: ValidityOutcome, info: Option<String>) -> Self {
        Self { outcome, info }
    }

    pub fn valid() -> Self {
        Self::new(ValidityOutcome::Valid, None)
    }

    pub fn with_warnings(info: impl Into<String>) -> Self {
        Self::new(ValidityOutcome::ValidWithWarnings, Some(info.into()))
    }

    pub fn rejected(info: impl Into<String>) -> Self {
        Self::new(ValidityOutcome::Rejected, Some(info.into()))
    }

    pub fn ambiguous(info: impl Into<String>) -> Self {
        Self::new(ValidityOutcome::RejectedAmbiguous, Some(info.into()))
    }

    pub fn timed_out(info: impl Into<String>) -> Self {
        Self::new(ValidityOutcome::TimedOut, Some(info.into()))
    }

    pub fn is_usable(&self) -> bool {
        self.outcome.is_usable()
    }

    /// Combine several validities into the most severe one
    ///
    /// When several inputs share the worst outcome their explanations are
    /// joined. An empty input is `Valid`.
    pub fn worst<I: IntoIterator<Item = Validity>>(validities: I) -> Validity {
        let mut worst: Option<Validity> = None;
        for validity in validities {
            worst = Some(match worst {
                None => validity,
                Some(current) if validity.outcome > current.outcome => validity,
                Some(mut current) if validity.outcome == current.outcome => {
                    current.info = match (current.info.take(), validity.info) {
                        (Some(a), Some(b)) if a != b => Some(format!("{a}; {b}")),
                        (Some(a), _) => Some(a),
                        (None, b) => b,
                    };
                    current
                }
                Some(current) => current,
            });
        }
        worst.unwrap_or_else(Validity::valid)
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.info {
            Some(info) => write!(f, "{} ({info})", self.outcome),
            None => write!(f, "{}", self.outcome),
        }
    }
}

/// Which outcomes count as passing validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationTolerance {
    /// `Valid` and `ValidWithWarnings` pass
    #[default]
    Lenient,
    /// Only `Valid` passes
    Strict,
}

impl ValidationTolerance {
    pub fn accepts(self, validity: &Validity) -> bool {
        match self {
            ValidationTolerance::Lenient => validity.is_usable(),
            ValidationTolerance::Strict => validity.outcome == ValidityOutcome::Valid,
        }
    }
}

impl fmt::Display for ValidationTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationTolerance::Lenient => write!(f, "lenient"),
            ValidationTolerance::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for ValidationTolerance {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lenient" => Ok(ValidationTolerance::Lenient),
            "strict" => Ok(ValidationTolerance::Strict),
            other => Err(BenchError::Config(format!(
                "unknown validation tolerance '{other}' (expected lenient or strict)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order_is_pinned() {
        use ValidityOutcome::*;
        let mut outcomes = vec![TimedOut, Valid, Rejected, RejectedAmbiguous, ValidWithWarnings];
        outcomes.sort();
        assert_eq!(
            outcomes,
            vec![Valid, ValidWithWarnings, RejectedAmbiguous, Rejected, TimedOut]
        );
    }

    #[test]
    fn test_is_usable() {
        assert!(ValidityOutcome::Valid.is_usable());
        assert!(ValidityOutcome::ValidWithWarnings.is_usable());
        assert!(!ValidityOutcome::RejectedAmbiguous.is_usable());
        assert!(!ValidityOutcome::Rejected.is_usable());
        assert!(!ValidityOutcome::TimedOut.is_usable());
    }

    #[test]
    fn test_worst_rejection_vetoes() {
        let overall = Validity::worst(vec![
            Validity::valid(),
            Validity::with_warnings("w"),
            Validity::ambiguous("partial"),
            Validity::rejected("broken"),
        ]);
        assert_eq!(overall.outcome, ValidityOutcome::Rejected);
        assert_eq!(overall.info.as_deref(), Some("broken"));

        let overall = Validity::worst(vec![Validity::rejected("a"), Validity::timed_out("t")]);
        assert_eq!(overall.outcome, ValidityOutcome::TimedOut);
    }

    #[test]
    fn test_worst_joins_tied_infos() {
        let overall = Validity::worst(vec![Validity::rejected("a"), Validity::rejected("b")]);
        assert_eq!(overall.info.as_deref(), Some("a; b"));
    }

    #[test]
    fn test_worst_of_nothing_is_valid() {
        assert_eq!(Validity::worst(Vec::new()), Validity::valid());
    }

    #[test]
    fn test_capability_set() {
        let set: CapabilitySet = [Capability::Trace, Capability::Render].into_iter().collect();
        assert!(set.supports(Capability::Trace));
        assert!(!set.supports(Capability::Reforge));
        assert_eq!(
            set.roles().collect::<Vec<_>>(),
            vec![Capability::Trace, Capability::Render]
        );
        assert!(!CapabilitySet::VALIDATING.supports(Capability::Reforge));
        assert_eq!(CapabilitySet::VALIDATING.roles().count(), 6);
    }

    #[test]
    fn test_capability_parse() {
        assert_eq!("render".parse::<Capability>().unwrap(), Capability::Render);
        assert_eq!("ExtractText".parse::<Capability>().unwrap(), Capability::ExtractText);
        assert_eq!("images".parse::<Capability>().unwrap(), Capability::ExtractImageData);
        assert!("ocr".parse::<Capability>().is_err());
    }

    #[test]
    fn test_tolerance() {
        let warn = Validity::with_warnings("w");
        assert!(ValidationTolerance::Lenient.accepts(&warn));
        assert!(!ValidationTolerance::Strict.accepts(&warn));
        assert!(ValidationTolerance::Strict.accepts(&Validity::valid()));
        assert_eq!(
            "STRICT".parse::<ValidationTolerance>().unwrap(),
            ValidationTolerance::Strict
        );
    }

    #[test]
    fn test_validity_display() {
        assert_eq!(Validity::valid().to_string(), "Valid");
        assert_eq!(
            Validity::rejected("no trailer").to_string(),
            "Rejected (no trailer)"
        );
    }
}
