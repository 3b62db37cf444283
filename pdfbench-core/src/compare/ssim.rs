//! Structural similarity over luma planes
//!
//! Local statistics use a 7x7 box window, clipped at the borders, computed
//! from summed-area tables so the cost does not depend on the window size.

use super::metrics::Plane;
use crate::error::{BenchError, Result};
use image::{GrayImage, Luma};

const WINDOW_RADIUS: i64 = 3;
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Mean structural similarity and the per-pixel similarity map
#[derive(Debug, Clone)]
pub struct StructuralMap {
    pub score: f64,
    /// Local similarity scaled to `0..=255`; white where the planes agree
    pub diff: GrayImage,
}

struct SummedArea {
    width: usize,
    table: Vec<f64>,
}

impl SummedArea {
    fn new(width: u32, height: u32, value: impl Fn(usize) -> f64) -> Self {
        let (w, h) = (width as usize, height as usize);
        let stride = w + 1;
        let mut table = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0.0;
            for x in 0..w {
                row += value(y * w + x);
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
            }
        }
        Self { width: w, table }
    }

    /// Sum over `[x0, x1) x [y0, y1)`
    fn sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let stride = self.width + 1;
        self.table[y1 * stride + x1] - self.table[y0 * stride + x1] - self.table[y1 * stride + x0]
            + self.table[y0 * stride + x0]
    }
}

/// Compare two planes of identical dimensions
pub fn structural_similarity(a: &Plane, b: &Plane) -> Result<StructuralMap> {
    if a.dimensions() != b.dimensions() {
        return Err(BenchError::Comparison(format!(
            "structural similarity needs equal dimensions, got {:?} and {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }
    let (width, height) = a.dimensions();
    if width == 0 || height == 0 {
        return Err(BenchError::Comparison("image has no pixels".to_string()));
    }

    let sum_a = SummedArea::new(width, height, |i| a.data[i]);
    let sum_b = SummedArea::new(width, height, |i| b.data[i]);
    let sum_aa = SummedArea::new(width, height, |i| a.data[i] * a.data[i]);
    let sum_bb = SummedArea::new(width, height, |i| b.data[i] * b.data[i]);
    let sum_ab = SummedArea::new(width, height, |i| a.data[i] * b.data[i]);

    let clip = |v: i64, limit: u32| v.clamp(0, limit as i64) as usize;
    let mut diff = GrayImage::new(width, height);
    let mut total = 0.0;

    for y in 0..height {
        let (y0, y1) = (
            clip(y as i64 - WINDOW_RADIUS, height),
            clip(y as i64 + WINDOW_RADIUS + 1, height),
        );
        for x in 0..width {
            let (x0, x1) = (
                clip(x as i64 - WINDOW_RADIUS, width),
                clip(x as i64 + WINDOW_RADIUS + 1, width),
            );
            let n = ((x1 - x0) * (y1 - y0)) as f64;
            let mu_a = sum_a.sum(x0, y0, x1, y1) / n;
            let mu_b = sum_b.sum(x0, y0, x1, y1) / n;
            let var_a = (sum_aa.sum(x0, y0, x1, y1) / n - mu_a * mu_a).max(0.0);
            let var_b = (sum_bb.sum(x0, y0, x1, y1) / n - mu_b * mu_b).max(0.0);
            let cov = sum_ab.sum(x0, y0, x1, y1) / n - mu_a * mu_b;

            let local = ((2.0 * mu_a * mu_b + C1) * (2.0 * cov + C2))
                / ((mu_a * mu_a + mu_b * mu_b + C1) * (var_a + var_b + C2));
            total += local;
            let level = (local.clamp(0.0, 1.0) * 255.0).round() as u8;
            diff.put_pixel(x, y, Luma([level]));
        }
    }

    let score = total / (width as f64 * height as f64);
    Ok(StructuralMap {
        score: score.clamp(0.0, 1.0),
        diff,
    })
}
