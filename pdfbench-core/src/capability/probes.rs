//! Probe traits and raw observations
//!
//! Each capability role has its own small trait. A tool adapter is a
//! [`ToolProbes`] value holding one boxed probe per supported role; the
//! capability set of the adapter is exactly the set of filled slots.
//!
//! Probes are stateless with respect to caching: a [`ToolSession`] owns the
//! caches and decides when a probe runs.
//!
//! [`ToolSession`]: super::ToolSession

use super::{Capability, CapabilitySet};
use crate::batch::CancelToken;
use crate::document::DocumentHandle;
use crate::error::{BenchError, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Severity of a message reported by a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One diagnostic line reported by a tool
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraceMessage {
    pub severity: Severity,
    pub text: String,
}

impl TraceMessage {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Severity::Error, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(Severity::Warning, text)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Severity::Info, text)
    }
}

impl fmt::Display for TraceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Info => write!(f, "info: {}", self.text),
            Severity::Warning => write!(f, "warning: {}", self.text),
            Severity::Error => write!(f, "error: {}", self.text),
        }
    }
}

/// Outcome of rendering a single page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Success,
    SuccessWithWarnings,
    TimedOut,
    Failed(String),
}

impl PageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PageOutcome::Success | PageOutcome::SuccessWithWarnings)
    }
}

impl fmt::Display for PageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageOutcome::Success => write!(f, "Success"),
            PageOutcome::SuccessWithWarnings => write!(f, "SuccessWithWarnings"),
            PageOutcome::TimedOut => write!(f, "TimedOut"),
            PageOutcome::Failed(reason) => write!(f, "{reason}"),
        }
    }
}

/// A rendered page
#[derive(Debug, Clone)]
pub struct RenderPage {
    /// Decoded raster, absent when the page failed
    pub image: Option<RgbImage>,
    /// Wall-clock time spent producing the page
    pub duration: Duration,
    pub outcome: PageOutcome,
}

impl RenderPage {
    pub fn success(image: RgbImage, duration: Duration) -> Self {
        Self {
            image: Some(image),
            duration,
            outcome: PageOutcome::Success,
        }
    }

    pub fn failed(reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            image: None,
            duration,
            outcome: PageOutcome::Failed(reason.into()),
        }
    }

    /// Pixel dimensions, if an image is present
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|img| img.dimensions())
    }
}

/// Rendered pages keyed by zero-based page index
pub type RenderMap = BTreeMap<usize, RenderPage>;

/// Extracted text keyed by zero-based page index
pub type TextMap = BTreeMap<usize, String>;

/// A probe result together with the messages emitted while producing it
#[derive(Debug, Clone)]
pub struct Observed<T> {
    pub value: T,
    pub messages: Vec<TraceMessage>,
}

impl<T> Observed<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            messages: Vec::new(),
        }
    }

    pub fn with_messages(value: T, messages: Vec<TraceMessage>) -> Self {
        Self { value, messages }
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Warning)
    }
}

/// Everything a probe needs besides the document itself
#[derive(Debug, Clone)]
pub struct ProbeContext {
    /// Scratch directory owned by the session
    pub workdir: PathBuf,
    /// Deadline for a single probe invocation
    pub timeout: Option<Duration>,
    /// Set when the owning task must stop
    pub cancel: CancelToken,
    /// Per-tool keyword arguments
    pub kwargs: BTreeMap<String, String>,
}

impl ProbeContext {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: None,
            cancel: CancelToken::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Create a fresh directory inside the session's scratch space
    pub fn scratch_dir(&self, prefix: &str) -> Result<TempDir> {
        Ok(tempfile::Builder::new()
            .prefix(&format!("{prefix}-"))
            .tempdir_in(&self.workdir)?)
    }

    /// Fail fast when the owning task has been cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(BenchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Collects diagnostic messages for a document
pub trait Tracer: Send {
    fn trace(&self, document: &DocumentHandle, ctx: &ProbeContext) -> Result<Vec<TraceMessage>>;
}

/// Rasterises every page of a document
pub trait Renderer: Send {
    fn render(&self, document: &DocumentHandle, ctx: &ProbeContext) -> Result<Observed<RenderMap>>;
}

/// Extracts text per page
pub trait TextExtractor: Send {
    fn extract_text(
        &self,
        document: &DocumentHandle,
        ctx: &ProbeContext,
    ) -> Result<Observed<TextMap>>;
}

/// Extracts the document information/metadata tree
pub trait MetadataExtractor: Send {
    fn extract_metadata(
        &self,
        document: &DocumentHandle,
        ctx: &ProbeContext,
    ) -> Result<Observed<serde_json::Value>>;
}

/// Lists the fonts used by a document
pub trait FontExtractor: Send {
    fn extract_fonts(
        &self,
        document: &DocumentHandle,
        ctx: &ProbeContext,
    ) -> Result<Observed<Vec<String>>>;
}

/// Lists embedded image data
pub trait ImageDataExtractor: Send {
    fn extract_image_data(
        &self,
        document: &DocumentHandle,
        ctx: &ProbeContext,
    ) -> Result<Observed<Vec<String>>>;
}

/// Rewrites a document into `output`
pub trait Reforger: Send {
    fn reforge(
        &self,
        document: &DocumentHandle,
        output: &Path,
        ctx: &ProbeContext,
    ) -> Result<Observed<PathBuf>>;
}

/// One probe object per supported role
#[derive(Default)]
pub struct ToolProbes {
    pub tracer: Option<Box<dyn Tracer>>,
    pub renderer: Option<Box<dyn Renderer>>,
    pub text: Option<Box<dyn TextExtractor>>,
    pub metadata: Option<Box<dyn MetadataExtractor>>,
    pub fonts: Option<Box<dyn FontExtractor>>,
    pub images: Option<Box<dyn ImageDataExtractor>>,
    pub reforger: Option<Box<dyn Reforger>>,
}

impl ToolProbes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracer(mut self, probe: impl Tracer + 'static) -> Self {
        self.tracer = Some(Box::new(probe));
        self
    }

    pub fn with_renderer(mut self, probe: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(probe));
        self
    }

    pub fn with_text(mut self, probe: impl TextExtractor + 'static) -> Self {
        self.text = Some(Box::new(probe));
        self
    }

    pub fn with_metadata(mut self, probe: impl MetadataExtractor + 'static) -> Self {
        self.metadata = Some(Box::new(probe));
        self
    }

    pub fn with_fonts(mut self, probe: impl FontExtractor + 'static) -> Self {
        self.fonts = Some(Box::new(probe));
        self
    }

    pub fn with_images(mut self, probe: impl ImageDataExtractor + 'static) -> Self {
        self.images = Some(Box::new(probe));
        self
    }

    pub fn with_reforger(mut self, probe: impl Reforger + 'static) -> Self {
        self.reforger = Some(Box::new(probe));
        self
    }

    /// The roles this adapter provides
    pub fn capabilities(&self) -> CapabilitySet {
        let slots = [
            (Capability::Trace, self.tracer.is_some()),
            (Capability::Render, self.renderer.is_some()),
            (Capability::ExtractText, self.text.is_some()),
            (Capability::ExtractMetadata, self.metadata.is_some()),
            (Capability::ExtractFonts, self.fonts.is_some()),
            (Capability::ExtractImageData, self.images.is_some()),
            (Capability::Reforge, self.reforger.is_some()),
        ];
        slots
            .into_iter()
            .filter(|(_, present)| *present)
            .map(|(cap, _)| cap)
            .collect()
    }
}

impl fmt::Debug for ToolProbes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolProbes")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
