//! Perceptual similarity between rendered pages
//!
//! [`compare`] scores two rasters with six independent metrics:
//!
//! - entropy of the packed 24-bit pixel histogram
//! - DCT perceptual hash and difference hash
//! - template matching by normalized squared difference and by normalized
//!   correlation coefficient
//! - the ratio of the two sizes
//!
//! The combined score is the mean of the six, weighted by the squared size
//! ratio. A failing metric scores zero and is named in the outcome string;
//! the others are still computed.
//!
//! When a structural difference image is requested, images with identical
//! dimensions are compared directly. Otherwise the smaller image is treated
//! as a template, placed at the best position found by each template
//! matching method, and the placement with the highest structural
//! similarity wins.
//!
//! # Example
//!
//! ```rust
//! use image::{Rgb, RgbImage};
//! use pdfbench::compare::{compare, OUTCOME_RENDER_FAILED, OUTCOME_SUCCESS};
//!
//! let page = RgbImage::from_fn(40, 60, |x, y| Rgb([(x * 6) as u8, (y * 4) as u8, 90]));
//!
//! let same = compare(Some(&page), Some(&page), false);
//! assert_eq!(same.outcome, OUTCOME_SUCCESS);
//! assert!((same.combined - 1.0).abs() < 1e-6);
//!
//! let missing = compare(Some(&page), None, true);
//! assert_eq!(missing.outcome, OUTCOME_RENDER_FAILED);
//! assert_eq!(missing.combined, 0.0);
//! ```

use crate::batch::panic_message;
use crate::capability::{RenderMap, RenderPage};
use crate::error::BenchError;
use image::{GrayImage, RgbImage};
use serde::Serialize;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

pub mod metrics;
pub mod ssim;

use metrics::{Plane, TemplateMatch, TemplateMethod, WHITE};
pub use ssim::{structural_similarity, StructuralMap};

pub const OUTCOME_SUCCESS: &str = "Successfully Compared";
pub const OUTCOME_RENDER_FAILED: &str = "Rendering failed";
pub const OUTCOME_TIMED_OUT: &str = "Comparison Timed Out";

/// Longest side, in pixels, at which template matching runs
pub const WORKING_SIZE: u32 = 128;

/// Scores for one pair of pages
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityResult {
    pub entropy: f64,
    pub phash: f64,
    pub dhash: f64,
    pub template_sqdiff: f64,
    pub template_ccoeff: f64,
    pub size_ratio: f64,
    pub combined: f64,
    /// Mean structural similarity, when a difference image was computed
    pub structural: Option<f64>,
    #[serde(skip)]
    pub diff: Option<GrayImage>,
    pub outcome: String,
    /// Extra context for sentinel outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SimilarityResult {
    fn sentinel(outcome: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            entropy: 0.0,
            phash: 0.0,
            dhash: 0.0,
            template_sqdiff: 0.0,
            template_ccoeff: 0.0,
            size_ratio: 0.0,
            combined: 0.0,
            structural: None,
            diff: None,
            outcome: outcome.into(),
            detail,
        }
    }

    /// Result for a pair where at least one page is missing
    pub fn rendering_failed() -> Self {
        Self::sentinel(OUTCOME_RENDER_FAILED, None)
    }

    /// Result for a comparison that exceeded its deadline
    pub fn timed_out(limit: Duration) -> Self {
        Self::sentinel(
            OUTCOME_TIMED_OUT,
            Some(BenchError::Timeout(limit).to_string()),
        )
    }

    fn aborted(reason: String) -> Self {
        Self::sentinel(format!("Failed to compute comparison: {reason}"), None)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == OUTCOME_SUCCESS
    }

    pub fn is_timed_out(&self) -> bool {
        self.outcome == OUTCOME_TIMED_OUT
    }

    /// The six sub-scores in reporting order
    pub fn sub_scores(&self) -> [f64; 6] {
        [
            self.entropy,
            self.phash,
            self.dhash,
            self.template_sqdiff,
            self.template_ccoeff,
            self.size_ratio,
        ]
    }
}

fn guarded<T>(f: impl FnOnce() -> crate::Result<T>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(BenchError::Comparison(reason))) => Err(reason),
        Ok(Err(error)) => Err(error.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

/// Records the failures of individual metrics
#[derive(Default)]
struct Failures(Vec<String>);

impl Failures {
    fn score(&mut self, name: &str, result: Result<f64, String>) -> f64 {
        match result {
            Ok(value) if value.is_finite() => value.clamp(0.0, 1.0),
            Ok(value) => {
                self.0.push(format!("Failed to compute {name}: got {value}"));
                0.0
            }
            Err(reason) => {
                self.0.push(format!("Failed to compute {name}: {reason}"));
                0.0
            }
        }
    }

    fn outcome(self) -> String {
        if self.0.is_empty() {
            OUTCOME_SUCCESS.to_string()
        } else {
            self.0.join("; ")
        }
    }
}

/// Both images at working scale: the larger padded to the common canvas, the
/// smaller as a template
struct Alignment<'a> {
    larger: &'a RgbImage,
    smaller: &'a RgbImage,
    scale: f64,
    canvas: Plane,
    template: Plane,
}

impl<'a> Alignment<'a> {
    fn new(a: &'a RgbImage, b: &'a RgbImage) -> crate::Result<Self> {
        for img in [a, b] {
            if img.width() == 0 || img.height() == 0 {
                return Err(BenchError::Comparison("image has no pixels".to_string()));
            }
        }
        let key = |img: &RgbImage| {
            (
                img.width() as u64 * img.height() as u64,
                img.width(),
                img.height(),
            )
        };
        let (larger, smaller) = if key(b) > key(a) { (b, a) } else { (a, b) };

        let longest = larger
            .width()
            .max(larger.height())
            .max(smaller.width())
            .max(smaller.height());
        let scale = (WORKING_SIZE as f64 / longest as f64).min(1.0);

        let template = Plane::scaled(smaller, scale);
        let scaled_larger = Plane::scaled(larger, scale);
        let canvas = scaled_larger.pad(template.width, template.height, WHITE);
        Ok(Self {
            larger,
            smaller,
            scale,
            canvas,
            template,
        })
    }

    /// Full-resolution top-left corner for a working-scale placement
    fn full_position(&self, m: &TemplateMatch) -> (u32, u32) {
        let canvas_w = self.larger.width().max(self.smaller.width());
        let canvas_h = self.larger.height().max(self.smaller.height());
        let x = (m.x as f64 / self.scale).round() as u32;
        let y = (m.y as f64 / self.scale).round() as u32;
        (
            x.min(canvas_w - self.smaller.width()),
            y.min(canvas_h - self.smaller.height()),
        )
    }

    /// Structural similarity of the smaller image against each placement
    fn best_structural(
        &self,
        placements: &[(TemplateMethod, TemplateMatch)],
    ) -> crate::Result<StructuralMap> {
        let canvas_w = self.larger.width().max(self.smaller.width());
        let canvas_h = self.larger.height().max(self.smaller.height());
        let canvas = Plane::from_rgb(self.larger).pad(canvas_w, canvas_h, WHITE);
        let template = Plane::from_rgb(self.smaller);

        let mut best: Option<StructuralMap> = None;
        let mut tried = BTreeSet::new();
        for (method, placement) in placements {
            let (x, y) = self.full_position(placement);
            if !tried.insert((x, y)) {
                continue;
            }
            let window = canvas.crop(x, y, template.width, template.height)?;
            let map = structural_similarity(&window, &template)?;
            debug!(method = method.name(), x, y, score = map.score, "placement scored");
            match &best {
                Some(current) if map.score <= current.score => {}
                _ => best = Some(map),
            }
        }
        best.ok_or_else(|| BenchError::Comparison("no placement available".to_string()))
    }
}

/// Compare two rendered pages
///
/// A missing page on either side yields the `"Rendering failed"` sentinel.
pub fn compare(a: Option<&RgbImage>, b: Option<&RgbImage>, want_diff: bool) -> SimilarityResult {
    let (Some(a), Some(b)) = (a, b) else {
        return SimilarityResult::rendering_failed();
    };

    let mut failures = Failures::default();
    let entropy = failures.score("entropy", guarded(|| metrics::entropy_similarity(a, b)));
    let phash = failures.score(
        "phash",
        guarded(|| Ok(metrics::hash_similarity(metrics::phash(a)?, metrics::phash(b)?))),
    );
    let dhash = failures.score(
        "dhash",
        guarded(|| Ok(metrics::hash_similarity(metrics::dhash(a)?, metrics::dhash(b)?))),
    );

    let alignment = guarded(|| Alignment::new(a, b));
    let matched = |method: TemplateMethod| match &alignment {
        Ok(al) => guarded(|| metrics::match_template(&al.canvas, &al.template, method)),
        Err(reason) => Err(reason.clone()),
    };
    let matches: Vec<(TemplateMethod, Result<TemplateMatch, String>)> = TemplateMethod::ALL
        .iter()
        .map(|&method| (method, matched(method)))
        .collect();
    let score_of = |method: TemplateMethod| {
        matches
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, r)| r.clone().map(|m| m.score))
            .unwrap_or_else(|| Err("not computed".to_string()))
    };
    let template_sqdiff = failures.score("template_sqdiff", score_of(TemplateMethod::SqDiffNormed));
    let template_ccoeff = failures.score("template_ccoeff", score_of(TemplateMethod::CCoeffNormed));

    let size_ratio = failures.score(
        "size_ratio",
        guarded(|| metrics::size_ratio(a.dimensions(), b.dimensions())),
    );

    let mean = (entropy + phash + dhash + template_sqdiff + template_ccoeff + size_ratio) / 6.0;
    let combined = (mean * size_ratio * size_ratio).clamp(0.0, 1.0);

    let structural = if want_diff {
        let result = if a.dimensions() == b.dimensions() {
            guarded(|| structural_similarity(&Plane::from_rgb(a), &Plane::from_rgb(b)))
        } else {
            let placements: Vec<(TemplateMethod, TemplateMatch)> = matches
                .iter()
                .filter_map(|(method, r)| r.as_ref().ok().map(|m| (*method, *m)))
                .collect();
            match &alignment {
                Ok(al) => guarded(|| al.best_structural(&placements)),
                Err(reason) => Err(reason.clone()),
            }
        };
        match result {
            Ok(map) => Some(map),
            Err(reason) => {
                debug!(%reason, "no structural difference image");
                None
            }
        }
    } else {
        None
    };

    let outcome = failures.outcome();
    debug!(combined, %outcome, "pages compared");
    SimilarityResult {
        entropy,
        phash,
        dhash,
        template_sqdiff,
        template_ccoeff,
        size_ratio,
        combined,
        structural: structural.as_ref().map(|m| m.score),
        diff: structural.map(|m| m.diff),
        outcome,
        detail: None,
    }
}

/// [`compare`] on two render-map entries
pub fn compare_pages(
    a: Option<&RenderPage>,
    b: Option<&RenderPage>,
    want_diff: bool,
) -> SimilarityResult {
    compare(
        a.and_then(|p| p.image.as_ref()),
        b.and_then(|p| p.image.as_ref()),
        want_diff,
    )
}

/// [`compare`] bounded by a deadline
///
/// The comparison runs on its own thread. When the deadline passes first the
/// thread is left to finish in the background and the
/// `"Comparison Timed Out"` sentinel is returned.
pub fn compare_with_deadline(
    a: Option<RgbImage>,
    b: Option<RgbImage>,
    want_diff: bool,
    timeout: Option<Duration>,
) -> SimilarityResult {
    let Some(limit) = timeout else {
        return compare(a.as_ref(), b.as_ref(), want_diff);
    };
    if a.is_none() || b.is_none() {
        return SimilarityResult::rendering_failed();
    }

    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("pdfbench-compare".to_string())
        .spawn(move || {
            let _ = tx.send(compare(a.as_ref(), b.as_ref(), want_diff));
        });
    if let Err(error) = spawned {
        return SimilarityResult::aborted(error.to_string());
    }

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(timeout_secs = limit.as_secs_f64(), "comparison timed out");
            SimilarityResult::timed_out(limit)
        }
        Err(RecvTimeoutError::Disconnected) => {
            SimilarityResult::aborted("comparison thread exited without a result".to_string())
        }
    }
}

/// Compare two render maps page by page over the union of their indices
pub fn compare_renders(
    a: &RenderMap,
    b: &RenderMap,
    want_diff: bool,
    timeout: Option<Duration>,
) -> Vec<(usize, SimilarityResult)> {
    let pages: BTreeSet<usize> = a.keys().chain(b.keys()).copied().collect();
    pages
        .into_iter()
        .map(|page| {
            let left = a.get(&page).and_then(|p| p.image.clone());
            let right = b.get(&page).and_then(|p| p.image.clone());
            (page, compare_with_deadline(left, right, want_diff, timeout))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::time::Instant;

    fn page(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x / 6 + y / 9) % 3 == 0 {
                Rgb([30, 30, 30])
            } else {
                Rgb([(x * 3 % 256) as u8, 240, (y * 5 % 256) as u8])
            }
        })
    }

    #[test]
    fn test_identical_pages() {
        let img = page(48, 64);
        let result = compare(Some(&img), Some(&img), true);
        assert_eq!(result.outcome, OUTCOME_SUCCESS);
        assert!((result.combined - 1.0).abs() < 1e-6);
        for score in result.sub_scores() {
            assert!((score - 1.0).abs() < 1e-6);
        }
        assert!((result.structural.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(result.diff.unwrap().dimensions(), (48, 64));
    }

    #[test]
    fn test_missing_page_sentinel() {
        let img = page(10, 10);
        for result in [
            compare(None, Some(&img), true),
            compare(Some(&img), None, true),
            compare(None, None, false),
        ] {
            assert_eq!(result.outcome, OUTCOME_RENDER_FAILED);
            assert_eq!(result.combined, 0.0);
            assert!(result.diff.is_none());
        }
    }

    #[test]
    fn test_size_ratio_is_squared() {
        let a = page(40, 40);
        let b = page(20, 40);
        let result = compare(Some(&a), Some(&b), false);
        assert_eq!(result.size_ratio, 0.5);
        let mean = result.sub_scores().iter().sum::<f64>() / 6.0;
        assert!((result.combined - mean * 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_symmetric_with_mismatched_sizes() {
        let a = page(50, 70);
        let b = page(44, 70);
        let ab = compare(Some(&a), Some(&b), true);
        let ba = compare(Some(&b), Some(&a), true);
        assert!((ab.combined - ba.combined).abs() < 1e-12);
        assert_eq!(ab.structural, ba.structural);
        assert_eq!(ab.diff.unwrap().dimensions(), (44, 70));
    }

    #[test]
    fn test_embedded_page_found_by_fallback() {
        let big = page(60, 60);
        let small = image::imageops::crop_imm(&big, 0, 0, 40, 60).to_image();
        let result = compare(Some(&big), Some(&small), true);
        assert!((result.template_sqdiff - 1.0).abs() < 1e-9);
        assert!((result.structural.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_metrics_are_named() {
        let empty = RgbImage::new(0, 0);
        let img = page(8, 8);
        let result = compare(Some(&empty), Some(&img), true);
        assert_eq!(result.combined, 0.0);
        assert!(result.outcome.contains("Failed to compute entropy"));
        assert!(result.outcome.contains("Failed to compute size_ratio"));
        assert!(result.outcome.contains("; "));
        assert!(result.diff.is_none());
    }

    #[test]
    fn test_deadline_sentinel_carries_timeout() {
        let img = page(1200, 1600);
        let start = Instant::now();
        let result = compare_with_deadline(
            Some(img.clone()),
            Some(img),
            true,
            Some(Duration::from_nanos(1)),
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(result.outcome, OUTCOME_TIMED_OUT);
        assert_eq!(result.combined, 0.0);
        assert!(result.detail.unwrap().contains("Timed out after"));
    }

    #[test]
    fn test_deadline_passes_through_result() {
        let img = page(16, 16);
        let result = compare_with_deadline(
            Some(img.clone()),
            Some(img),
            false,
            Some(Duration::from_secs(30)),
        );
        assert!(result.is_success());
    }

    #[test]
    fn test_compare_renders_union_of_pages() {
        let mut a = RenderMap::new();
        let mut b = RenderMap::new();
        a.insert(0, RenderPage::success(page(8, 8), Duration::ZERO));
        b.insert(0, RenderPage::success(page(8, 8), Duration::ZERO));
        b.insert(1, RenderPage::success(page(8, 8), Duration::ZERO));

        let results = compare_renders(&a, &b, false, None);
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_success());
        assert_eq!(results[1].1.outcome, OUTCOME_RENDER_FAILED);
    }
}
