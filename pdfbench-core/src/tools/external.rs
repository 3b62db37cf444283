//! Adapter for tools driven through command lines
//!
//! Each capability of an [`ExternalTool`] is one [`CommandSpec`]. Arguments
//! may contain placeholders that are substituted per invocation:
//!
//! | placeholder    | value                                          |
//! |----------------|------------------------------------------------|
//! | `{input}`      | path of the document (materialized if needed)  |
//! | `{output}`     | path the reforge command must write            |
//! | `{output_dir}` | directory the render command writes pages into |
//! | `{<kwarg>}`    | value of a keyword argument                    |

use super::process::{run_command, ProcessOutput};
use super::ToolFactory;
use crate::capability::{
    Capability, CapabilitySet, FontExtractor, ImageDataExtractor, MetadataExtractor, Observed,
    ProbeContext, Reforger, RenderMap, RenderPage, Renderer, TextExtractor, TextMap, ToolProbes,
    TraceMessage, Tracer,
};
use crate::document::DocumentHandle;
use crate::error::{BenchError, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

const BUILTIN_PLACEHOLDERS: [&str; 3] = ["input", "output", "output_dir"];
const RASTER_EXTENSIONS: [&str; 6] = ["png", "ppm", "pgm", "pnm", "jpg", "jpeg"];

fn default_success_codes() -> Vec<i32> {
    vec![0]
}

/// One command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Exit codes treated as success
    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<i32>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            success_codes: default_success_codes(),
        }
    }
}

/// Configuration of an external tool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub kwargs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fonts: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reforge: Option<CommandSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The command configured for a role
    pub fn command(&self, capability: Capability) -> Option<&CommandSpec> {
        match capability {
            Capability::Trace => self.trace.as_ref(),
            Capability::Render => self.render.as_ref(),
            Capability::ExtractText => self.text.as_ref(),
            Capability::ExtractMetadata => self.metadata.as_ref(),
            Capability::ExtractFonts => self.fonts.as_ref(),
            Capability::ExtractImageData => self.images.as_ref(),
            Capability::Reforge => self.reforge.as_ref(),
        }
    }

    pub fn capabilities(&self) -> CapabilitySet {
        Capability::ALL
            .into_iter()
            .filter(|cap| self.command(*cap).is_some())
            .collect()
    }

    /// Check names, commands and placeholders
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BenchError::Config("tool name must not be empty".to_string()));
        }
        if self.capabilities().is_empty() {
            return Err(BenchError::Config(format!(
                "tool '{}' has no commands",
                self.name
            )));
        }

        for capability in self.capabilities().roles() {
            let Some(command) = self.command(capability) else {
                continue;
            };
            if command.program.trim().is_empty() {
                return Err(BenchError::Config(format!(
                    "tool '{}': {} command has no program",
                    self.name,
                    capability.key()
                )));
            }
            if command.success_codes.is_empty() {
                return Err(BenchError::Config(format!(
                    "tool '{}': {} command has no success codes",
                    self.name,
                    capability.key()
                )));
            }
            for arg in &command.args {
                for placeholder in placeholders(arg) {
                    let known = BUILTIN_PLACEHOLDERS.contains(&placeholder)
                        || self.kwargs.contains_key(placeholder);
                    if !known {
                        return Err(BenchError::Config(format!(
                            "tool '{}': unknown placeholder {{{placeholder}}} in {} command",
                            self.name,
                            capability.key()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
static SEVERITY_PREFIX: OnceLock<Regex> = OnceLock::new();
static ERROR_WORD: OnceLock<Regex> = OnceLock::new();
static WARNING_WORD: OnceLock<Regex> = OnceLock::new();
static TRAILING_NUMBER: OnceLock<Regex> = OnceLock::new();

/// Compile a literal pattern once
fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("literal pattern compiles"))
}

fn placeholder_pattern() -> &'static Regex {
    pattern(&PLACEHOLDER, r"\{([^{}]*)\}")
}

/// Names of the `{...}` placeholders in an argument
fn placeholders(arg: &str) -> Vec<&str> {
    placeholder_pattern()
        .captures_iter(arg)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Substitute known placeholders; unknown ones are left as written
fn expand(arg: &str, vars: &BTreeMap<String, String>) -> String {
    placeholder_pattern()
        .replace_all(arg, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// An external tool configured from a [`ToolSpec`]
#[derive(Debug, Clone)]
pub struct ExternalTool {
    spec: ToolSpec,
}

impl ExternalTool {
    pub fn new(spec: ToolSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self { spec })
    }

    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn probe(&self, capability: Capability) -> Option<CommandProbe> {
        self.spec.command(capability).map(|command| CommandProbe {
            tool: self.spec.name.clone(),
            command: command.clone(),
        })
    }
}

impl ToolFactory for ExternalTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn capabilities(&self) -> CapabilitySet {
        self.spec.capabilities()
    }

    fn kwargs(&self) -> BTreeMap<String, String> {
        self.spec.kwargs.clone()
    }

    fn probes(&self) -> Result<ToolProbes> {
        let mut probes = ToolProbes::new();
        if let Some(probe) = self.probe(Capability::Trace) {
            probes = probes.with_tracer(probe);
        }
        if let Some(probe) = self.probe(Capability::Render) {
            probes = probes.with_renderer(probe);
        }
        if let Some(probe) = self.probe(Capability::ExtractText) {
            probes = probes.with_text(probe);
        }
        if let Some(probe) = self.probe(Capability::ExtractMetadata) {
            probes = probes.with_metadata(probe);
        }
        if let Some(probe) = self.probe(Capability::ExtractFonts) {
            probes = probes.with_fonts(probe);
        }
        if let Some(probe) = self.probe(Capability::ExtractImageData) {
            probes = probes.with_images(probe);
        }
        if let Some(probe) = self.probe(Capability::Reforge) {
            probes = probes.with_reforger(probe);
        }
        Ok(probes)
    }
}

/// Classify one line of diagnostic output
///
/// An explicit level at the start of the line (`Error:`, `Syntax Warning:`,
/// `mutool: warning:`) decides the severity. Otherwise whole-word keywords
/// are used, errors first.
pub fn classify_line(line: &str) -> Option<TraceMessage> {
    let text = line.trim();
    if text.is_empty() {
        return None;
    }

    let prefix = pattern(
        &SEVERITY_PREFIX,
        r"(?i)^(?:[^\s:]+:\s*){0,2}(?:syntax\s+)?(?P<level>fatal|error|warning|warn|note|info)\b",
    );
    if let Some(level) = prefix.captures(text).and_then(|caps| caps.name("level")) {
        return Some(match level.as_str().to_ascii_lowercase().as_str() {
            "fatal" | "error" => TraceMessage::error(text),
            "warning" | "warn" => TraceMessage::warning(text),
            _ => TraceMessage::info(text),
        });
    }

    let error = pattern(
        &ERROR_WORD,
        r"(?i)\b(?:error|fatal|corrupt(?:ed)?|invalid|failed|cannot|can't)\b",
    );
    let warning = pattern(
        &WARNING_WORD,
        r"(?i)\b(?:warning|warn|recover(?:ed|ing)?|repair(?:ed|ing)?|ignoring)\b",
    );
    Some(if error.is_match(text) {
        TraceMessage::error(text)
    } else if warning.is_match(text) {
        TraceMessage::warning(text)
    } else {
        TraceMessage::info(text)
    })
}

/// Trailing page number of a rendered file name, e.g. `page-12.png` -> 12
fn page_number(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    pattern(&TRAILING_NUMBER, r"(\d+)$")
        .captures(stem)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Parse metadata output: JSON when possible, otherwise `Key: Value` lines
fn parse_metadata(stdout: &str) -> serde_json::Value {
    if stdout.trim().is_empty() {
        return serde_json::Value::Null;
    }
    if let Ok(value) = serde_json::from_str(stdout) {
        return value;
    }
    let map: serde_json::Map<String, serde_json::Value> = stdout
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), serde_json::Value::String(v.trim().to_string())))
        .filter(|(k, _)| !k.is_empty())
        .collect();
    if map.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::Value::Object(map)
    }
}

fn split_pages(stdout: &str) -> TextMap {
    let mut pages: Vec<&str> = stdout.split('\x0c').collect();
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i, text.to_string()))
        .collect()
}

fn non_empty_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// A probe implemented by running one command
#[derive(Debug, Clone)]
struct CommandProbe {
    tool: String,
    command: CommandSpec,
}

impl CommandProbe {
    fn invoke(
        &self,
        document: &DocumentHandle,
        ctx: &ProbeContext,
        extra: &[(&str, &Path)],
    ) -> Result<(ProcessOutput, Vec<TraceMessage>)> {
        ctx.check_cancelled()?;
        let input = document.materialize(&ctx.workdir)?;

        let mut vars = ctx.kwargs.clone();
        vars.insert("input".to_string(), input.path().display().to_string());
        for (key, path) in extra {
            vars.insert(key.to_string(), path.display().to_string());
        }
        let args: Vec<String> = self.command.args.iter().map(|a| expand(a, &vars)).collect();

        let output = run_command(
            &self.command.program,
            &args,
            &ctx.workdir,
            ctx.timeout,
            &ctx.cancel,
        )?;

        let mut messages: Vec<TraceMessage> =
            output.stderr.lines().filter_map(classify_line).collect();
        if !output.succeeded(&self.command.success_codes) {
            messages.push(TraceMessage::error(match output.exit_code {
                Some(code) => format!("{} exited with status {code}", self.tool),
                None => format!("{} was terminated by a signal", self.tool),
            }));
        }
        Ok((output, messages))
    }
}

impl Tracer for CommandProbe {
    fn trace(&self, document: &DocumentHandle, ctx: &ProbeContext) -> Result<Vec<TraceMessage>> {
        let (_, messages) = self.invoke(document, ctx, &[])?;
        Ok(messages)
    }
}

impl Renderer for CommandProbe {
    fn render(&self, document: &DocumentHandle, ctx: &ProbeContext) -> Result<Observed<RenderMap>> {
        let out_dir = ctx.scratch_dir("render")?;
        let (output, messages) = self.invoke(document, ctx, &[("output_dir", out_dir.path())])?;

        let mut files: Vec<PathBuf> = std::fs::read_dir(out_dir.path())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| RASTER_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort_by_key(|path| (page_number(path), path.clone()));

        let per_page = if files.is_empty() {
            Duration::ZERO
        } else {
            output.duration / files.len() as u32
        };
        let pages = files
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let page = match image::open(path) {
                    Ok(img) => RenderPage::success(img.to_rgb8(), per_page),
                    Err(e) => RenderPage::failed(format!("undecodable page image: {e}"), per_page),
                };
                (index, page)
            })
            .collect();
        Ok(Observed::with_messages(pages, messages))
    }
}

impl TextExtractor for CommandProbe {
    fn extract_text(&self, document: &DocumentHandle, ctx: &ProbeContext) -> Result<Observed<TextMap>> {
        let (output, messages) = self.invoke(document, ctx, &[])?;
        let stdout = output.stdout_text();
        let pages = if stdout.trim().is_empty() {
            TextMap::new()
        } else {
            split_pages(&stdout)
        };
        Ok(Observed::with_messages(pages, messages))
    }
}

impl MetadataExtractor for CommandProbe {
    fn extract_metadata(
        &self,
        document: &DocumentHandle,
        ctx: &ProbeContext,
    ) -> Result<Observed<serde_json::Value>> {
        let (output, messages) = self.invoke(document, ctx, &[])?;
        Ok(Observed::with_messages(
            parse_metadata(&output.stdout_text()),
            messages,
        ))
    }
}

impl FontExtractor for CommandProbe {
    fn extract_fonts(&self, document: &DocumentHandle, ctx: &ProbeContext) -> Result<Observed<Vec<String>>> {
        let (output, messages) = self.invoke(document, ctx, &[])?;
        Ok(Observed::with_messages(
            non_empty_lines(&output.stdout_text()),
            messages,
        ))
    }
}

impl ImageDataExtractor for CommandProbe {
    fn extract_image_data(
        &self,
        document: &DocumentHandle,
        ctx: &ProbeContext,
    ) -> Result<Observed<Vec<String>>> {
        let (output, messages) = self.invoke(document, ctx, &[])?;
        Ok(Observed::with_messages(
            non_empty_lines(&output.stdout_text()),
            messages,
        ))
    }
}

impl Reforger for CommandProbe {
    fn reforge(
        &self,
        document: &DocumentHandle,
        output: &Path,
        ctx: &ProbeContext,
    ) -> Result<Observed<PathBuf>> {
        let (_, messages) = self.invoke(document, ctx, &[("output", output)])?;
        Ok(Observed::with_messages(output.to_path_buf(), messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Severity, ToolOptions, ToolSession, ValidityOutcome};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_spec_from_json() {
        let spec: ToolSpec = serde_json::from_str(
            r#"{
                "name": "qpdf",
                "kwargs": {"password": ""},
                "trace": {"program": "qpdf", "args": ["--check", "{input}"], "success_codes": [0, 3]},
                "reforge": {"program": "qpdf", "args": ["{input}", "{output}"]}
            }"#,
        )
        .unwrap();

        assert_eq!(spec.capabilities(), CapabilitySet::TRACE | CapabilitySet::REFORGE);
        assert_eq!(spec.reforge.as_ref().unwrap().success_codes, vec![0]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        assert!(ToolSpec::new("empty").validate().is_err());

        let mut spec = ToolSpec::new("bad");
        spec.trace = Some(CommandSpec::new("tool", &["{inptu}"]));
        let error = spec.validate().unwrap_err().to_string();
        assert!(error.contains("unknown placeholder {inptu}"));

        spec.kwargs.insert("inptu".to_string(), "x".to_string());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_placeholders_and_expansion() {
        assert_eq!(placeholders("-o{output_dir}/p-%d.png"), vec!["output_dir"]);
        assert_eq!(placeholders("{a}{b} {c"), vec!["a", "b"]);

        let vars = BTreeMap::from([("dpi".to_string(), "150".to_string())]);
        assert_eq!(expand("-r{dpi}", &vars), "-r150");
        assert_eq!(expand("{dpi}x{dpi}", &vars), "150x150");
        assert_eq!(expand("{page}-{dpi}", &vars), "{page}-150");
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("   "), None);
        assert_eq!(
            classify_line("Error: xref table broken").unwrap().severity,
            Severity::Error
        );
        assert_eq!(
            classify_line("WARNING: repairing file").unwrap().severity,
            Severity::Warning
        );
        assert_eq!(classify_line("page 1 done").unwrap().severity, Severity::Info);
    }

    #[test]
    fn test_classify_line_explicit_level_wins() {
        let severity = |line: &str| classify_line(line).unwrap().severity;

        assert_eq!(
            severity(
                "Syntax Warning: Invalid least number of objects reading page offset hints table"
            ),
            Severity::Warning
        );
        assert_eq!(
            severity("warning: cannot find ExtGState resource 'GS0'"),
            Severity::Warning
        );
        assert_eq!(
            severity("mutool: warning: invalid page tree"),
            Severity::Warning
        );
        assert_eq!(severity("Syntax Error (1234): Illegal character"), Severity::Error);
        assert_eq!(severity("qpdf: error: file is damaged"), Severity::Error);
        assert_eq!(severity("Note: linearization hints ignored"), Severity::Info);
    }

    #[test]
    fn test_classify_line_matches_whole_words() {
        let severity = |line: &str| classify_line(line).unwrap().severity;

        assert_eq!(
            severity("No syntax or stream encoding errors found; the file appears to be fine"),
            Severity::Info
        );
        assert_eq!(severity("checking file.pdf: invalid object 12"), Severity::Error);
        assert_eq!(severity("xref stream recovered from scan"), Severity::Warning);
        assert_eq!(severity("terrorism.pdf processed"), Severity::Info);
    }

    #[test]
    fn test_page_number_ordering() {
        assert_eq!(page_number(Path::new("out/page-12.png")), Some(12));
        assert_eq!(page_number(Path::new("out/cover.png")), None);
        assert_eq!(page_number(Path::new("out/p7-003.ppm")), Some(3));
    }

    #[test]
    fn test_output_parsers() {
        let pages = split_pages("first\x0csecond\x0c");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[&1], "second");

        let json = parse_metadata(r#"{"Title": "x"}"#);
        assert_eq!(json["Title"], "x");
        let lines = parse_metadata("Title: Report\nPages: 3\n");
        assert_eq!(lines["Pages"], "3");
        assert!(parse_metadata("  ").is_null());

        assert_eq!(non_empty_lines("a\n\n b \n"), vec!["a", "b"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_tool_session() {
        let dir = TempDir::new().unwrap();
        let doc_path = dir.path().join("doc.pdf");
        std::fs::write(&doc_path, b"%PDF-1.4\n%%EOF").unwrap();

        let mut spec = ToolSpec::new("shell");
        spec.trace = Some(CommandSpec::new(
            "sh",
            &["-c", "echo 'warning: fixing trailer' >&2; test -s \"$0\"", "{input}"],
        ));
        spec.text = Some(CommandSpec::new("sh", &["-c", "printf 'one\\fTwo'"]));
        spec.reforge = Some(CommandSpec::new("cp", &["{input}", "{output}"]));
        let tool = ExternalTool::new(spec).unwrap();

        let mut session = ToolSession::open(
            &tool,
            DocumentHandle::from_path(&doc_path),
            ToolOptions::default().with_temp_dir(dir.path()),
        )
        .unwrap();

        let trace = session.validity(Capability::Trace).unwrap();
        assert_eq!(trace.outcome, ValidityOutcome::ValidWithWarnings);
        assert_eq!(session.text().unwrap().len(), 2);

        let reforged = session.reforge().unwrap();
        assert_eq!(reforged.read_bytes().unwrap(), b"%PDF-1.4\n%%EOF");
    }
}
