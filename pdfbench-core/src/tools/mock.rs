//! Deterministic in-process tool for tests and demos
//!
//! A [`MockTool`] decides what to report from the document bytes alone:
//! content containing the reject marker is treated as broken, content
//! containing the warn marker as slightly damaged. Rendered pages are
//! generated from a seed derived from the content, so two mocks see the
//! same pages for the same document unless `nondeterministic` is set.
//!
//! # Example
//!
//! ```rust
//! use pdfbench::capability::{ToolOptions, ToolSession, ValidityOutcome};
//! use pdfbench::document::DocumentHandle;
//! use pdfbench::tools::MockTool;
//!
//! let tool = MockTool::validator("alpha");
//! let doc = DocumentHandle::from_bytes("broken.pdf", b"%PDF-1.7 %%BROKEN".to_vec());
//! let mut session = ToolSession::open(&tool, doc, ToolOptions::default()).unwrap();
//! assert_eq!(session.overall_validity().outcome, ValidityOutcome::Rejected);
//! ```

use super::ToolFactory;
use crate::capability::{
    Capability, CapabilitySet, FontExtractor, ImageDataExtractor, MetadataExtractor, Observed,
    PageOutcome, ProbeContext, Reforger, RenderMap, RenderPage, Renderer, TextExtractor, TextMap,
    ToolProbes, TraceMessage, Tracer,
};
use crate::document::DocumentHandle;
use crate::error::{BenchError, Result};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// What a mock reforger writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReforgeMode {
    /// Copy the content with the reject and warn markers removed
    Clean,
    /// Copy the content unchanged
    Passthrough,
    /// Produce nothing and report an error
    Fail,
}

/// Configurable test double for a PDF tool
#[derive(Debug, Clone)]
pub struct MockTool {
    name: String,
    capabilities: CapabilitySet,
    reject_marker: Vec<u8>,
    warn_marker: Vec<u8>,
    reforge_mode: ReforgeMode,
    delay: Duration,
    panic_on: Option<Capability>,
    pages: usize,
    page_size: (u32, u32),
    nondeterministic: bool,
    render_calls: Arc<AtomicUsize>,
    reforge_calls: Arc<AtomicUsize>,
}

impl MockTool {
    pub fn new(name: impl Into<String>, capabilities: CapabilitySet) -> Self {
        Self {
            name: name.into(),
            capabilities,
            reject_marker: b"%%BROKEN".to_vec(),
            warn_marker: b"%%WARN".to_vec(),
            reforge_mode: ReforgeMode::Clean,
            delay: Duration::ZERO,
            panic_on: None,
            pages: 1,
            page_size: (48, 64),
            nondeterministic: false,
            render_calls: Arc::new(AtomicUsize::new(0)),
            reforge_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A mock supporting every observing role
    pub fn validator(name: impl Into<String>) -> Self {
        Self::new(name, CapabilitySet::VALIDATING)
    }

    /// A mock that can only reforge
    pub fn reforger(name: impl Into<String>) -> Self {
        Self::new(name, CapabilitySet::REFORGE)
    }

    pub fn with_markers(mut self, reject: &[u8], warn: &[u8]) -> Self {
        self.reject_marker = reject.to_vec();
        self.warn_marker = warn.to_vec();
        self
    }

    pub fn with_reforge_mode(mut self, mode: ReforgeMode) -> Self {
        self.reforge_mode = mode;
        self
    }

    /// Sleep this long in every probe
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Panic inside the probe for one role
    pub fn panicking_on(mut self, capability: Capability) -> Self {
        self.panic_on = Some(capability);
        self
    }

    pub fn with_pages(mut self, pages: usize) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_page_size(mut self, width: u32, height: u32) -> Self {
        self.page_size = (width, height);
        self
    }

    /// Mix randomness into every output
    pub fn nondeterministic(mut self, enabled: bool) -> Self {
        self.nondeterministic = enabled;
        self
    }

    /// How many times any session of this tool has rendered
    pub fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }

    /// How many times any session of this tool has reforged
    pub fn reforge_calls(&self) -> usize {
        self.reforge_calls.load(Ordering::SeqCst)
    }
}

impl ToolFactory for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn probes(&self) -> Result<ToolProbes> {
        let probe = || MockProbe {
            tool: Arc::new(self.clone()),
        };
        let mut probes = ToolProbes::new();
        for capability in self.capabilities.roles() {
            probes = match capability {
                Capability::Trace => probes.with_tracer(probe()),
                Capability::Render => probes.with_renderer(probe()),
                Capability::ExtractText => probes.with_text(probe()),
                Capability::ExtractMetadata => probes.with_metadata(probe()),
                Capability::ExtractFonts => probes.with_fonts(probe()),
                Capability::ExtractImageData => probes.with_images(probe()),
                Capability::Reforge => probes.with_reforger(probe()),
            };
        }
        Ok(probes)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn remove_all(haystack: &[u8], needle: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

/// What the mock sees in a document
struct Inspection {
    broken: bool,
    damaged: bool,
    seed: u64,
    digest: String,
}

struct MockProbe {
    tool: Arc<MockTool>,
}

impl MockProbe {
    /// Shared prologue of every probe: delay, panic injection, inspection
    fn begin(
        &self,
        capability: Capability,
        document: &DocumentHandle,
        ctx: &ProbeContext,
    ) -> Result<Inspection> {
        self.wait(ctx)?;
        if self.tool.panic_on == Some(capability) {
            panic!("{} crashed while probing {capability}", self.tool.name);
        }

        let content = document.read_bytes()?;
        let hash = md5::compute(&content).0;
        let mut seed = u64::from_le_bytes([
            hash[0], hash[1], hash[2], hash[3], hash[4], hash[5], hash[6], hash[7],
        ]);
        if self.tool.nondeterministic {
            seed ^= rand::random::<u64>();
        }

        Ok(Inspection {
            broken: contains(&content, &self.tool.reject_marker),
            damaged: contains(&content, &self.tool.warn_marker),
            seed,
            digest: format!("{seed:016x}"),
        })
    }

    /// Sleep for the configured delay, honouring cancellation and the deadline
    fn wait(&self, ctx: &ProbeContext) -> Result<()> {
        let start = Instant::now();
        while start.elapsed() < self.tool.delay {
            ctx.check_cancelled()?;
            if let Some(limit) = ctx.timeout {
                if start.elapsed() >= limit {
                    return Err(BenchError::Timeout(limit));
                }
            }
            thread::sleep(Duration::from_millis(5).min(self.tool.delay));
        }
        Ok(())
    }

    fn page_image(&self, seed: u64, page: usize) -> RgbImage {
        let (width, height) = self.tool.page_size;
        let page_seed = seed.wrapping_add(page as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        RgbImage::from_fn(width, height, |x, y| {
            let cell = ((x / 8) as u64).wrapping_mul(31) ^ ((y / 8) as u64).wrapping_mul(17);
            let v = (page_seed ^ cell.wrapping_mul(0x2545_F491_4F6C_DD1D)) >> 29;
            if v % 3 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([(v & 0xff) as u8, ((v >> 8) & 0xff) as u8, ((v >> 16) & 0xff) as u8])
            }
        })
    }
}

impl Tracer for MockProbe {
    fn trace(&self, document: &DocumentHandle, ctx: &ProbeContext) -> Result<Vec<TraceMessage>> {
        let seen = self.begin(Capability::Trace, document, ctx)?;
        let mut messages = Vec::new();
        if seen.broken {
            messages.push(TraceMessage::error(format!("{}: broken xref table", self.tool.name)));
        }
        if seen.damaged {
            messages.push(TraceMessage::warning(format!("{}: repaired stream length", self.tool.name)));
        }
        if self.tool.nondeterministic {
            messages.push(TraceMessage::info(format!("run {}", seen.digest)));
        }
        Ok(messages)
    }
}

impl Renderer for MockProbe {
    fn render(&self, document: &DocumentHandle, ctx: &ProbeContext) -> Result<Observed<RenderMap>> {
        let seen = self.begin(Capability::Render, document, ctx)?;
        self.tool.render_calls.fetch_add(1, Ordering::SeqCst);
        if seen.broken {
            return Ok(Observed::with_messages(
                RenderMap::new(),
                vec![TraceMessage::error(format!("{}: cannot open document", self.tool.name))],
            ));
        }

        let mut messages = Vec::new();
        let mut pages = RenderMap::new();
        for index in 0..self.tool.pages {
            let start = Instant::now();
            let mut page = RenderPage::success(self.page_image(seen.seed, index), start.elapsed());
            if seen.damaged {
                page.outcome = PageOutcome::SuccessWithWarnings;
            }
            pages.insert(index, page);
        }
        if seen.damaged {
            messages.push(TraceMessage::warning(format!("{}: substituted font", self.tool.name)));
        }
        Ok(Observed::with_messages(pages, messages))
    }
}

impl TextExtractor for MockProbe {
    fn extract_text(&self, document: &DocumentHandle, ctx: &ProbeContext) -> Result<Observed<TextMap>> {
        let seen = self.begin(Capability::ExtractText, document, ctx)?;
        if seen.broken {
            return Err(BenchError::Probe("no text layer".to_string()));
        }
        let pages = (0..self.tool.pages)
            .map(|i| (i, format!("page {} of {}", i + 1, seen.digest)))
            .collect();
        Ok(Observed::new(pages))
    }
}

impl MetadataExtractor for MockProbe {
    fn extract_metadata(
        &self,
        document: &DocumentHandle,
        ctx: &ProbeContext,
    ) -> Result<Observed<serde_json::Value>> {
        let seen = self.begin(Capability::ExtractMetadata, document, ctx)?;
        if seen.broken {
            return Err(BenchError::Probe("trailer has no Info dictionary".to_string()));
        }
        Ok(Observed::new(serde_json::json!({
            "Pages": self.tool.pages,
            "Producer": "pdfbench mock",
            "ID": seen.digest,
        })))
    }
}

impl FontExtractor for MockProbe {
    fn extract_fonts(&self, document: &DocumentHandle, ctx: &ProbeContext) -> Result<Observed<Vec<String>>> {
        let seen = self.begin(Capability::ExtractFonts, document, ctx)?;
        if seen.broken {
            return Err(BenchError::Probe("font dictionary unreadable".to_string()));
        }
        Ok(Observed::new(vec!["Helvetica".to_string(), "Times-Roman".to_string()]))
    }
}

impl ImageDataExtractor for MockProbe {
    fn extract_image_data(
        &self,
        document: &DocumentHandle,
        ctx: &ProbeContext,
    ) -> Result<Observed<Vec<String>>> {
        let seen = self.begin(Capability::ExtractImageData, document, ctx)?;
        if seen.broken {
            return Err(BenchError::Probe("image stream truncated".to_string()));
        }
        let (width, height) = self.tool.page_size;
        Ok(Observed::new(vec![format!("Im0 {width}x{height} DeviceRGB")]))
    }
}

impl Reforger for MockProbe {
    fn reforge(
        &self,
        document: &DocumentHandle,
        output: &Path,
        ctx: &ProbeContext,
    ) -> Result<Observed<PathBuf>> {
        self.begin(Capability::Reforge, document, ctx)?;
        self.tool.reforge_calls.fetch_add(1, Ordering::SeqCst);

        let content = document.read_bytes()?;
        let rewritten = match self.tool.reforge_mode {
            ReforgeMode::Fail => {
                return Err(BenchError::Probe(format!(
                    "{} could not rewrite the document",
                    self.tool.name
                )))
            }
            ReforgeMode::Passthrough => content,
            ReforgeMode::Clean => remove_all(
                &remove_all(&content, &self.tool.reject_marker),
                &self.tool.warn_marker,
            ),
        };
        std::fs::write(output, rewritten)?;
        Ok(Observed::new(output.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ToolOptions, ToolSession, ValidityOutcome};
    use tempfile::TempDir;

    fn session(tool: &MockTool, content: &[u8], dir: &TempDir) -> ToolSession {
        ToolSession::open(
            tool,
            DocumentHandle::from_bytes("doc.pdf", content.to_vec()),
            ToolOptions::default().with_temp_dir(dir.path()),
        )
        .unwrap()
    }

    #[test]
    fn test_marker_helpers() {
        assert!(contains(b"abc%%BROKENdef", b"%%BROKEN"));
        assert!(!contains(b"abc", b""));
        assert_eq!(remove_all(b"a%%Xb%%X", b"%%X"), b"ab");
    }

    #[test]
    fn test_clean_document_is_valid() {
        let dir = TempDir::new().unwrap();
        let tool = MockTool::validator("alpha").with_pages(3);
        let mut session = session(&tool, b"%PDF-1.7 clean", &dir);

        assert_eq!(session.overall_validity().outcome, ValidityOutcome::Valid);
        assert_eq!(session.renders().unwrap().len(), 3);
        assert_eq!(session.fonts().unwrap().len(), 2);
    }

    #[test]
    fn test_markers_drive_outcomes() {
        let dir = TempDir::new().unwrap();
        let tool = MockTool::validator("alpha");

        let mut broken = session(&tool, b"%PDF %%BROKEN", &dir);
        assert_eq!(broken.overall_validity().outcome, ValidityOutcome::Rejected);
        assert_eq!(
            broken.validity(Capability::Render).unwrap().outcome,
            ValidityOutcome::Rejected
        );

        let mut damaged = session(&tool, b"%PDF %%WARN", &dir);
        assert_eq!(
            damaged.overall_validity().outcome,
            ValidityOutcome::ValidWithWarnings
        );
    }

    #[test]
    fn test_renders_are_deterministic() {
        let dir = TempDir::new().unwrap();
        let a = MockTool::validator("a");
        let b = MockTool::validator("b");
        let left = session(&a, b"%PDF same", &dir).renders().unwrap();
        let right = session(&b, b"%PDF same", &dir).renders().unwrap();
        assert_eq!(left[&0].image, right[&0].image);
    }

    #[test]
    fn test_reforge_modes() {
        let dir = TempDir::new().unwrap();
        let clean = MockTool::reforger("fixer");
        let reforged = session(&clean, b"%PDF %%BROKEN body", &dir).reforge().unwrap();
        assert_eq!(reforged.read_bytes().unwrap(), b"%PDF  body");
        assert_eq!(clean.reforge_calls(), 1);

        let failing = MockTool::reforger("fails").with_reforge_mode(ReforgeMode::Fail);
        let mut failed = session(&failing, b"%PDF", &dir);
        assert!(failed.reforge().is_err());
        assert_eq!(
            failed.validity(Capability::Reforge).unwrap().outcome,
            ValidityOutcome::Rejected
        );
    }

    #[test]
    fn test_delay_respects_probe_timeout() {
        let dir = TempDir::new().unwrap();
        let tool = MockTool::validator("slow").with_delay(Duration::from_secs(30));
        let mut session = ToolSession::open(
            &tool,
            DocumentHandle::from_bytes("doc.pdf", b"%PDF".to_vec()),
            ToolOptions::default()
                .with_temp_dir(dir.path())
                .with_timeout(Duration::from_millis(50)),
        )
        .unwrap();

        assert_eq!(
            session.validity(Capability::Trace).unwrap().outcome,
            ValidityOutcome::TimedOut
        );
    }

    #[test]
    fn test_panic_is_contained() {
        let dir = TempDir::new().unwrap();
        let tool = MockTool::validator("fragile").panicking_on(Capability::ExtractText);
        let mut session = session(&tool, b"%PDF", &dir);
        let text = session.validity(Capability::ExtractText).unwrap();
        assert_eq!(text.outcome, ValidityOutcome::Rejected);
        assert!(session.validity(Capability::Trace).unwrap().is_usable());
    }
}
