//! Tool sessions
//!
//! A [`ToolSession`] binds one tool adapter to one document. It owns every
//! cache for that pair: raw observations per role and the [`Validity`]
//! derived from them. Sessions are never shared between tasks.

use super::probes::{Observed, ProbeContext, RenderMap, TextMap, ToolProbes, TraceMessage};
use super::{Capability, CapabilitySet, RenderPage, Severity, Validity};
use crate::batch::{panic_message, CancelToken};
use crate::document::DocumentHandle;
use crate::error::{BenchError, Result};
use crate::tools::ToolFactory;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::debug;

/// Construction options for a [`ToolSession`]
#[derive(Debug, Clone)]
pub struct ToolOptions {
    /// Skip the readability check on the document
    pub skip_precheck: bool,
    /// Deadline for each probe invocation
    pub timeout: Option<Duration>,
    /// Base directory for the session's scratch space
    pub temp_dir: Option<PathBuf>,
    /// Keep renders for the lifetime of the session
    pub cache_renders: bool,
    /// Roles that count towards overall validity (defaults to every
    /// validating role the tool declares)
    pub capabilities: Option<CapabilitySet>,
    /// Cancellation signal of the owning task
    pub cancel: CancelToken,
    /// Extra keyword arguments, merged over the tool's own
    pub kwargs: BTreeMap<String, String>,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            skip_precheck: false,
            timeout: Some(Duration::from_secs(120)),
            temp_dir: None,
            cache_renders: true,
            capabilities: None,
            cancel: CancelToken::new(),
            kwargs: BTreeMap::new(),
        }
    }
}

impl ToolOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn skip_precheck(mut self, skip: bool) -> Self {
        self.skip_precheck = skip;
        self
    }

    pub fn cache_renders(mut self, cache: bool) -> Self {
        self.cache_renders = cache;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

/// Timing of one rendered page, recorded whenever the render probe runs
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTiming {
    pub page: usize,
    pub duration: Duration,
    pub outcome: String,
}

/// A probe failure kept in the observation cache
#[derive(Debug, Clone)]
struct ProbeFailure {
    timeout: Option<Duration>,
    message: String,
}

impl ProbeFailure {
    fn from_error(error: BenchError) -> Self {
        match error {
            BenchError::Timeout(limit) => Self {
                timeout: Some(limit),
                message: BenchError::Timeout(limit).to_string(),
            },
            other => Self {
                timeout: None,
                message: other.to_string(),
            },
        }
    }

    fn to_error(&self) -> BenchError {
        match self.timeout {
            Some(limit) => BenchError::Timeout(limit),
            None => BenchError::Probe(self.message.clone()),
        }
    }

    fn to_validity(&self) -> Validity {
        match self.timeout {
            Some(_) => Validity::timed_out(self.message.clone()),
            None => Validity::rejected(self.message.clone()),
        }
    }
}

type ProbeOutcome<T> = std::result::Result<T, ProbeFailure>;

/// Run a probe, converting both errors and panics into a cached failure
fn guarded<T>(
    tool: &str,
    capability: Capability,
    probe: impl FnOnce() -> Result<T>,
) -> ProbeOutcome<T> {
    debug!(tool, %capability, "running probe");
    let start = Instant::now();
    let outcome = match catch_unwind(AssertUnwindSafe(probe)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(ProbeFailure::from_error(error)),
        Err(payload) => Err(ProbeFailure {
            timeout: None,
            message: format!("probe panicked: {}", panic_message(payload.as_ref())),
        }),
    };
    debug!(
        tool,
        %capability,
        elapsed_ms = start.elapsed().as_millis() as u64,
        ok = outcome.is_ok(),
        "probe finished"
    );
    outcome
}

/// Classify a role from the messages its probe reported
///
/// Errors reject the role; when the probe still produced output the
/// rejection is ambiguous. Warnings alone keep the role usable.
pub fn classify_messages(messages: &[TraceMessage], produced_output: bool) -> Validity {
    let first = |severity: Severity| {
        messages
            .iter()
            .find(|m| m.severity == severity)
            .map(|m| m.text.clone())
    };

    if let Some(error) = first(Severity::Error) {
        if produced_output {
            Validity::ambiguous(error)
        } else {
            Validity::rejected(error)
        }
    } else if let Some(warning) = first(Severity::Warning) {
        Validity::with_warnings(warning)
    } else {
        Validity::valid()
    }
}

/// Classify a render observation from its per-page outcomes
pub fn classify_render(observed: &Observed<RenderMap>) -> Validity {
    use super::PageOutcome;

    let pages = &observed.value;
    if pages.is_empty() {
        let reason = observed
            .messages
            .iter()
            .find(|m| m.severity == Severity::Error)
            .map(|m| m.text.clone())
            .unwrap_or_else(|| "no pages rendered".to_string());
        return Validity::rejected(reason);
    }

    if let Some((index, _)) = pages
        .iter()
        .find(|(_, page)| page.outcome == PageOutcome::TimedOut)
    {
        return Validity::timed_out(format!("page {index} timed out"));
    }

    let failures: Vec<String> = pages
        .iter()
        .filter_map(|(index, page)| match &page.outcome {
            PageOutcome::Failed(reason) => Some(format!("page {index}: {reason}")),
            _ => None,
        })
        .collect();
    let page_validity = if failures.is_empty() {
        if pages
            .values()
            .any(|p| p.outcome == PageOutcome::SuccessWithWarnings)
        {
            Validity::with_warnings("pages rendered with warnings")
        } else {
            Validity::valid()
        }
    } else if failures.len() < pages.len() {
        Validity::ambiguous(failures.join("; "))
    } else {
        Validity::rejected(failures.join("; "))
    };

    Validity::worst([page_validity, classify_messages(&observed.messages, true)])
}

/// One tool applied to one document
pub struct ToolSession {
    name: String,
    document: DocumentHandle,
    probes: ToolProbes,
    options: ToolOptions,
    ctx: ProbeContext,
    _workdir: TempDir,
    validity: HashMap<Capability, Validity>,
    trace: Option<ProbeOutcome<Vec<TraceMessage>>>,
    renders: Option<ProbeOutcome<Observed<RenderMap>>>,
    render_log: Vec<RenderTiming>,
    text: Option<ProbeOutcome<Observed<TextMap>>>,
    metadata: Option<ProbeOutcome<Observed<serde_json::Value>>>,
    fonts: Option<ProbeOutcome<Observed<Vec<String>>>>,
    images: Option<ProbeOutcome<Observed<Vec<String>>>>,
    reforged: Option<ProbeOutcome<Observed<PathBuf>>>,
}

impl ToolSession {
    /// Open a session for a registered tool
    pub fn open(
        factory: &dyn ToolFactory,
        document: DocumentHandle,
        options: ToolOptions,
    ) -> Result<Self> {
        let probes = factory.probes()?;
        if probes.capabilities() != factory.capabilities() {
            return Err(BenchError::Config(format!(
                "{} declares {:?} but provides {:?}",
                factory.name(),
                factory.capabilities(),
                probes.capabilities()
            )));
        }
        let mut options = options;
        for (key, value) in factory.kwargs() {
            options.kwargs.entry(key).or_insert(value);
        }
        Self::with_probes(factory.name(), document, probes, options)
    }

    /// Open a session around an explicit set of probes
    pub fn with_probes(
        name: impl Into<String>,
        document: DocumentHandle,
        probes: ToolProbes,
        options: ToolOptions,
    ) -> Result<Self> {
        let name = name.into();
        if !options.skip_precheck {
            document.precheck()?;
        }

        let prefix = format!("pdfbench-{}-", sanitize(&name));
        let workdir = match &options.temp_dir {
            Some(base) => tempfile::Builder::new().prefix(&prefix).tempdir_in(base)?,
            None => tempfile::Builder::new().prefix(&prefix).tempdir()?,
        };

        let ctx = ProbeContext {
            workdir: workdir.path().to_path_buf(),
            timeout: options.timeout,
            cancel: options.cancel.clone(),
            kwargs: options.kwargs.clone(),
        };

        Ok(Self {
            name,
            document,
            probes,
            options,
            ctx,
            _workdir: workdir,
            validity: HashMap::new(),
            trace: None,
            renders: None,
            render_log: Vec::new(),
            text: None,
            metadata: None,
            fonts: None,
            images: None,
            reforged: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &DocumentHandle {
        &self.document
    }

    /// Roles this tool provides
    pub fn capabilities(&self) -> CapabilitySet {
        self.probes.capabilities()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().supports(capability)
    }

    /// Roles that make up the overall validity
    pub fn selected_roles(&self) -> CapabilitySet {
        let selected = self
            .options
            .capabilities
            .unwrap_or(CapabilitySet::VALIDATING);
        selected & self.capabilities()
    }

    fn unsupported(&self, capability: Capability) -> BenchError {
        BenchError::Unsupported {
            tool: self.name.clone(),
            capability: capability.to_string(),
        }
    }

    /// Validity for one role, computed on first access and cached
    ///
    /// Probe failures never escape: they become `Rejected` (or `TimedOut`)
    /// outcomes. The only error is asking for a role the tool lacks.
    pub fn validity(&mut self, capability: Capability) -> Result<Validity> {
        if !self.supports(capability) {
            return Err(self.unsupported(capability));
        }
        if let Some(validity) = self.validity.get(&capability) {
            debug!(tool = %self.name, %capability, "validity cache hit");
            return Ok(validity.clone());
        }

        let validity = self.compute_validity(capability)?;
        debug!(tool = %self.name, %capability, outcome = %validity.outcome, "validity computed");
        self.validity.insert(capability, validity.clone());
        Ok(validity)
    }

    /// Worst validity across the selected roles
    pub fn overall_validity(&mut self) -> Validity {
        let roles: Vec<Capability> = self.selected_roles().roles().collect();
        if roles.is_empty() {
            return Validity::rejected(format!("{} has no validating capabilities", self.name));
        }
        let validities: Vec<Validity> = roles
            .into_iter()
            .map(|role| {
                self.validity(role)
                    .unwrap_or_else(|e| Validity::rejected(e.to_string()))
            })
            .collect();
        Validity::worst(validities)
    }

    /// Every role's validity, in declaration order
    pub fn validities(&mut self) -> BTreeMap<Capability, Validity> {
        let roles: Vec<Capability> = self.selected_roles().roles().collect();
        roles
            .into_iter()
            .filter_map(|role| self.validity(role).ok().map(|v| (role, v)))
            .collect()
    }

    fn compute_validity(&mut self, capability: Capability) -> Result<Validity> {
        let validity = match capability {
            Capability::Trace => match self.trace_outcome()? {
                Ok(messages) => classify_messages(messages, false),
                Err(failure) => failure.to_validity(),
            },
            Capability::Render => match self.render_outcome()? {
                Ok(observed) => classify_render(&observed),
                Err(failure) => failure.to_validity(),
            },
            Capability::ExtractText => match self.text_outcome()? {
                Ok(observed) => classify_messages(&observed.messages, !observed.value.is_empty()),
                Err(failure) => failure.to_validity(),
            },
            Capability::ExtractMetadata => match self.metadata_outcome()? {
                Ok(observed) => classify_messages(&observed.messages, !observed.value.is_null()),
                Err(failure) => failure.to_validity(),
            },
            Capability::ExtractFonts => match self.fonts_outcome()? {
                Ok(observed) => classify_messages(&observed.messages, !observed.value.is_empty()),
                Err(failure) => failure.to_validity(),
            },
            Capability::ExtractImageData => match self.images_outcome()? {
                Ok(observed) => classify_messages(&observed.messages, !observed.value.is_empty()),
                Err(failure) => failure.to_validity(),
            },
            Capability::Reforge => match self.reforge_outcome()? {
                Ok(observed) => classify_messages(&observed.messages, true),
                Err(failure) => failure.to_validity(),
            },
        };
        Ok(validity)
    }

    /// Forget the observation and cached validity of one role
    pub fn clear_observations(&mut self, capability: Capability) {
        self.validity.remove(&capability);
        match capability {
            Capability::Trace => self.trace = None,
            Capability::Render => {
                self.renders = None;
                self.render_log.clear();
            }
            Capability::ExtractText => self.text = None,
            Capability::ExtractMetadata => self.metadata = None,
            Capability::ExtractFonts => self.fonts = None,
            Capability::ExtractImageData => self.images = None,
            Capability::Reforge => self.reforged = None,
        }
    }

    fn trace_outcome(&mut self) -> Result<&ProbeOutcome<Vec<TraceMessage>>> {
        if self.trace.is_none() {
            let tracer = self
                .probes
                .tracer
                .as_ref()
                .ok_or_else(|| self.unsupported(Capability::Trace))?;
            let (document, ctx) = (&self.document, &self.ctx);
            let outcome = guarded(&self.name, Capability::Trace, || {
                tracer.trace(document, ctx)
            });
            self.trace = Some(outcome);
        }
        self.trace
            .as_ref()
            .ok_or_else(|| BenchError::Probe("trace observation missing".to_string()))
    }

    /// Renders are recomputed on every call unless caching is enabled
    fn render_outcome(&mut self) -> Result<ProbeOutcome<Observed<RenderMap>>> {
        if let Some(outcome) = &self.renders {
            debug!(tool = %self.name, "render cache hit");
            return Ok(outcome.clone());
        }
        let renderer = self
            .probes
            .renderer
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::Render))?;
        let (document, ctx) = (&self.document, &self.ctx);
        let outcome = guarded(&self.name, Capability::Render, || {
            renderer.render(document, ctx)
        });

        if let Ok(observed) = &outcome {
            self.render_log = observed
                .value
                .iter()
                .map(|(page, render)| RenderTiming {
                    page: *page,
                    duration: render.duration,
                    outcome: render.outcome.to_string(),
                })
                .collect();
        }
        if self.options.cache_renders {
            self.renders = Some(outcome.clone());
        }
        Ok(outcome)
    }

    fn text_outcome(&mut self) -> Result<&ProbeOutcome<Observed<TextMap>>> {
        if self.text.is_none() {
            let probe = self
                .probes
                .text
                .as_ref()
                .ok_or_else(|| self.unsupported(Capability::ExtractText))?;
            let (document, ctx) = (&self.document, &self.ctx);
            let outcome = guarded(&self.name, Capability::ExtractText, || {
                probe.extract_text(document, ctx)
            });
            self.text = Some(outcome);
        }
        self.text
            .as_ref()
            .ok_or_else(|| BenchError::Probe("text observation missing".to_string()))
    }

    fn metadata_outcome(&mut self) -> Result<&ProbeOutcome<Observed<serde_json::Value>>> {
        if self.metadata.is_none() {
            let probe = self
                .probes
                .metadata
                .as_ref()
                .ok_or_else(|| self.unsupported(Capability::ExtractMetadata))?;
            let (document, ctx) = (&self.document, &self.ctx);
            let outcome = guarded(&self.name, Capability::ExtractMetadata, || {
                probe.extract_metadata(document, ctx)
            });
            self.metadata = Some(outcome);
        }
        self.metadata
            .as_ref()
            .ok_or_else(|| BenchError::Probe("metadata observation missing".to_string()))
    }

    fn fonts_outcome(&mut self) -> Result<&ProbeOutcome<Observed<Vec<String>>>> {
        if self.fonts.is_none() {
            let probe = self
                .probes
                .fonts
                .as_ref()
                .ok_or_else(|| self.unsupported(Capability::ExtractFonts))?;
            let (document, ctx) = (&self.document, &self.ctx);
            let outcome = guarded(&self.name, Capability::ExtractFonts, || {
                probe.extract_fonts(document, ctx)
            });
            self.fonts = Some(outcome);
        }
        self.fonts
            .as_ref()
            .ok_or_else(|| BenchError::Probe("font observation missing".to_string()))
    }

    fn images_outcome(&mut self) -> Result<&ProbeOutcome<Observed<Vec<String>>>> {
        if self.images.is_none() {
            let probe = self
                .probes
                .images
                .as_ref()
                .ok_or_else(|| self.unsupported(Capability::ExtractImageData))?;
            let (document, ctx) = (&self.document, &self.ctx);
            let outcome = guarded(&self.name, Capability::ExtractImageData, || {
                probe.extract_image_data(document, ctx)
            });
            self.images = Some(outcome);
        }
        self.images
            .as_ref()
            .ok_or_else(|| BenchError::Probe("image observation missing".to_string()))
    }

    fn reforge_outcome(&mut self) -> Result<&ProbeOutcome<Observed<PathBuf>>> {
        if self.reforged.is_none() {
            let probe = self
                .probes
                .reforger
                .as_ref()
                .ok_or_else(|| self.unsupported(Capability::Reforge))?;
            let output = self.ctx.workdir.join(format!(
                "{}.{}.pdf",
                self.document.stem(),
                sanitize(&self.name)
            ));
            let (document, ctx) = (&self.document, &self.ctx);
            let outcome = guarded(&self.name, Capability::Reforge, || {
                let observed = probe.reforge(document, &output, ctx)?;
                let produced = std::fs::metadata(&observed.value)
                    .map(|m| m.len() > 0)
                    .unwrap_or(false);
                if produced {
                    Ok(observed)
                } else {
                    Err(BenchError::Probe("reforge produced no output".to_string()))
                }
            });
            self.reforged = Some(outcome);
        }
        self.reforged
            .as_ref()
            .ok_or_else(|| BenchError::Probe("reforge observation missing".to_string()))
    }

    /// Messages reported by the trace probe
    pub fn trace_messages(&mut self) -> Result<&[TraceMessage]> {
        match self.trace_outcome()? {
            Ok(messages) => Ok(messages.as_slice()),
            Err(failure) => Err(failure.to_error()),
        }
    }

    /// All rendered pages
    pub fn renders(&mut self) -> Result<RenderMap> {
        match self.render_outcome()? {
            Ok(observed) => Ok(observed.value),
            Err(failure) => Err(failure.to_error()),
        }
    }

    /// One rendered page, `None` when the page index does not exist
    pub fn render_page(&mut self, page: usize) -> Result<Option<RenderPage>> {
        Ok(self.renders()?.remove(&page))
    }

    /// Per-page timings recorded by the last render probe
    pub fn render_timings(&self) -> &[RenderTiming] {
        &self.render_log
    }

    pub fn text(&mut self) -> Result<&TextMap> {
        match self.text_outcome()? {
            Ok(observed) => Ok(&observed.value),
            Err(failure) => Err(failure.to_error()),
        }
    }

    pub fn metadata(&mut self) -> Result<&serde_json::Value> {
        match self.metadata_outcome()? {
            Ok(observed) => Ok(&observed.value),
            Err(failure) => Err(failure.to_error()),
        }
    }

    pub fn fonts(&mut self) -> Result<&[String]> {
        match self.fonts_outcome()? {
            Ok(observed) => Ok(observed.value.as_slice()),
            Err(failure) => Err(failure.to_error()),
        }
    }

    pub fn image_data(&mut self) -> Result<&[String]> {
        match self.images_outcome()? {
            Ok(observed) => Ok(observed.value.as_slice()),
            Err(failure) => Err(failure.to_error()),
        }
    }

    /// Rewrite the document with this tool
    ///
    /// The rewritten file lives in the session's scratch directory and is
    /// removed when the session is dropped.
    pub fn reforge(&mut self) -> Result<DocumentHandle> {
        match self.reforge_outcome()? {
            Ok(observed) => Ok(DocumentHandle::from_path(&observed.value)),
            Err(failure) => Err(failure.to_error()),
        }
    }

    /// Every message observed by any probe run so far
    pub fn collected_messages(&self) -> Vec<TraceMessage> {
        let mut messages = Vec::new();
        if let Some(Ok(trace)) = &self.trace {
            messages.extend(trace.iter().cloned());
        }
        let observed = [
            self.renders
                .as_ref()
                .and_then(|o| o.as_ref().ok())
                .map(|o| &o.messages),
            self.text
                .as_ref()
                .and_then(|o| o.as_ref().ok())
                .map(|o| &o.messages),
            self.metadata
                .as_ref()
                .and_then(|o| o.as_ref().ok())
                .map(|o| &o.messages),
            self.fonts
                .as_ref()
                .and_then(|o| o.as_ref().ok())
                .map(|o| &o.messages),
            self.images
                .as_ref()
                .and_then(|o| o.as_ref().ok())
                .map(|o| &o.messages),
        ];
        for list in observed.into_iter().flatten() {
            messages.extend(list.iter().cloned());
        }
        messages
    }
}

impl std::fmt::Debug for ToolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSession")
            .field("name", &self.name)
            .field("document", &self.document)
            .field("capabilities", &self.capabilities())
            .field("cached", &self.validity.len())
            .finish()
    }
}

/// File-name friendly version of a tool name
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
