//! End-to-end report scenarios over mock tools and documents on disk

use pdfbench::batch::BatchOptions;
use pdfbench::compare::{OUTCOME_RENDER_FAILED, OUTCOME_SUCCESS};
use pdfbench::recoverability::Verdict;
use pdfbench::reports::{
    astrotruth, detect_chaos, floodlight, highlight, spotlight, Consensus, ReportOptions,
    TableFormat,
};
use pdfbench::tools::{MockTool, ReforgeMode, ToolRegistry};
use pdfbench::{BenchError, DocumentHandle, ValidityOutcome};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write_doc(dir: &Path, name: &str, body: &str) -> DocumentHandle {
    let path = dir.join(name);
    std::fs::write(&path, format!("%PDF-1.7\n{body}\n%%EOF\n")).unwrap();
    DocumentHandle::from_path(path)
}

#[test]
fn test_floodlight_valid_document_never_reforges() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(dir.path(), "clean.pdf", "1 0 obj << >> endobj");
    let fixer = MockTool::reforger("fixer");
    let registry = ToolRegistry::new()
        .with(MockTool::validator("one"))
        .unwrap()
        .with(MockTool::validator("two"))
        .unwrap()
        .with(MockTool::validator("three"))
        .unwrap()
        .with(fixer.clone())
        .unwrap();

    let table = floodlight(&[doc], &registry, &[], &[], &ReportOptions::default()).unwrap();
    assert_eq!(table.len(), 1);
    let row = &table.rows[0];
    assert_eq!(row.verdict, Some(Verdict::Valid));
    assert_eq!(row.reason.as_deref(), Some("Original Valid"));
    assert!(row.reforgers_invoked.is_empty());
    assert_eq!(row.original.len(), 3);
    assert_eq!(fixer.reforge_calls(), 0);
}

#[test]
fn test_floodlight_verdicts_across_reforgers() {
    let dir = TempDir::new().unwrap();
    let broken = write_doc(dir.path(), "broken.pdf", "%%BROKEN xref");
    let validators = ["one".to_string(), "two".to_string()];
    let registry = ToolRegistry::new()
        .with(MockTool::validator("one"))
        .unwrap()
        .with(MockTool::validator("two"))
        .unwrap()
        .with(MockTool::reforger("fixer"))
        .unwrap()
        .with(MockTool::reforger("copier").with_reforge_mode(ReforgeMode::Passthrough))
        .unwrap()
        .with(MockTool::reforger("dud").with_reforge_mode(ReforgeMode::Fail))
        .unwrap();
    let options = ReportOptions::default().gather_traces(true);
    let run = |reforgers: &[&str]| {
        let reforgers: Vec<String> = reforgers.iter().map(|s| s.to_string()).collect();
        let table =
            floodlight(&[broken.clone()], &registry, &validators, &reforgers, &options).unwrap();
        table.rows.into_iter().next().unwrap()
    };

    let fixed = run(&["fixer"]);
    assert_eq!(fixed.verdict, Some(Verdict::Recoverable));
    assert_eq!(fixed.reason.as_deref(), Some("All translations valid"));
    assert!(!fixed.messages.as_ref().unwrap().is_empty());

    let copied = run(&["fixer", "copier"]);
    assert_eq!(copied.verdict, Some(Verdict::Ambiguous));
    assert_eq!(copied.reason.as_deref(), Some("copier translation failed for one"));
    assert_eq!(copied.reforgers_invoked, vec!["fixer", "copier"]);

    let failed = run(&["dud", "fixer"]);
    assert_eq!(failed.verdict, Some(Verdict::Ambiguous));
    assert_eq!(failed.reason.as_deref(), Some("dud translation failed"));
    assert_eq!(failed.reforgers_invoked, vec!["dud"]);
}

#[test]
fn test_spotlight_identical_single_page_renders() {
    let dir = TempDir::new().unwrap();
    let diffs = dir.path().join("diffs");
    let doc = write_doc(dir.path(), "page.pdf", "BT (Hello) Tj ET");
    let registry = ToolRegistry::new()
        .with(MockTool::validator("left"))
        .unwrap()
        .with(MockTool::validator("right"))
        .unwrap();

    let table = spotlight(
        &[doc],
        &registry,
        &[],
        &ReportOptions::default().with_diff_dir(&diffs),
    )
    .unwrap();
    assert_eq!(table.len(), 1);
    let row = &table.rows[0];
    let similarity = row.similarity.as_ref().unwrap();
    assert_eq!(similarity.outcome, OUTCOME_SUCCESS);
    assert!((similarity.combined - 1.0).abs() < 1e-6);
    assert!(Path::new(row.diff.as_ref().unwrap()).is_file());
}

#[test]
fn test_spotlight_missing_render_has_no_diff() {
    let dir = TempDir::new().unwrap();
    let diffs = dir.path().join("diffs");
    let doc = write_doc(dir.path(), "broken.pdf", "%%BROKEN");
    let registry = ToolRegistry::new()
        .with(MockTool::validator("left"))
        .unwrap()
        .with(MockTool::validator("right").with_markers(b"%%NEVER", b"%%WARN"))
        .unwrap();

    let table = spotlight(
        &[doc],
        &registry,
        &[],
        &ReportOptions::default().with_diff_dir(&diffs),
    )
    .unwrap();
    assert_eq!(table.len(), 1);
    let similarity = table.rows[0].similarity.as_ref().unwrap();
    assert_eq!(similarity.outcome, OUTCOME_RENDER_FAILED);
    assert_eq!(similarity.combined, 0.0);
    assert!(table.rows[0].diff.is_none());
}

#[test]
fn test_missing_input_aborts_before_scheduling() {
    let dir = TempDir::new().unwrap();
    let registry = ToolRegistry::new().with(MockTool::validator("one")).unwrap();
    let missing = DocumentHandle::from_path(dir.path().join("nope.pdf"));

    let result = highlight(&[missing], &registry, &[], &ReportOptions::default());
    assert!(matches!(result, Err(BenchError::InvalidInput(_))));
}

#[test]
fn test_every_report_keeps_one_row_per_unit_under_timeouts() {
    let dir = TempDir::new().unwrap();
    let docs = vec![
        write_doc(dir.path(), "a.pdf", "fine"),
        write_doc(dir.path(), "b.pdf", "%%WARN"),
    ];
    let registry = ToolRegistry::new()
        .with(MockTool::validator("quick"))
        .unwrap()
        .with(MockTool::validator("stuck").with_delay(Duration::from_secs(30)))
        .unwrap();
    let options = ReportOptions::default().with_batch(
        BatchOptions::default()
            .with_parallelism(4)
            .with_job_timeout(Duration::from_millis(400)),
    );

    let labelled = astrotruth(&docs, &registry, &["quick".to_string()], &options).unwrap();
    assert_eq!(labelled.len(), 2);
    assert_eq!(labelled.rows[0].label, Some(Consensus::Valid));
    assert_eq!(
        labelled.rows[1].validities["quick"],
        ValidityOutcome::ValidWithWarnings
    );

    let chaos = detect_chaos(&docs, &registry, &[], &options.clone().with_chaos_runs(2)).unwrap();
    assert_eq!(chaos.len(), 4);
    let stuck: Vec<_> = chaos.rows.iter().filter(|r| r.tool == "stuck").collect();
    assert_eq!(stuck.len(), 2);
    for row in stuck {
        assert_eq!(row.completed, 0);
        assert_eq!(row.deterministic, None);
    }

    let mut out = Vec::new();
    chaos.write(TableFormat::Csv, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), 5);
}
