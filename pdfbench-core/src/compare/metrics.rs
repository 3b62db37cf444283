//! Individual similarity metrics
//!
//! Entropy and the perceptual hashes work on the packed 24-bit value of each
//! pixel (`r << 16 | g << 8 | b`). Template matching and structural
//! similarity work on single-channel luma planes.

use crate::error::{BenchError, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::collections::HashMap;

/// Side length of the DCT input for the perceptual hash
const PHASH_SIZE: usize = 32;
/// Side length of the low-frequency block kept from the DCT
const PHASH_BLOCK: usize = 8;
/// Fill value used when padding planes
pub const WHITE: f64 = 255.0;

fn ensure_non_empty(img: &RgbImage) -> Result<()> {
    if img.width() == 0 || img.height() == 0 {
        Err(BenchError::Comparison("image has no pixels".to_string()))
    } else {
        Ok(())
    }
}

fn pack(pixel: &image::Rgb<u8>) -> u32 {
    let [r, g, b] = pixel.0;
    (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// Shannon entropy, in bits, of the packed 24-bit pixel histogram
pub fn entropy(img: &RgbImage) -> Result<f64> {
    ensure_non_empty(img)?;
    let mut histogram: HashMap<u32, usize> = HashMap::new();
    for pixel in img.pixels() {
        *histogram.entry(pack(pixel)).or_default() += 1;
    }
    let total = (img.width() as f64) * (img.height() as f64);
    Ok(histogram
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum())
}

/// Ratio of the smaller entropy to the larger one
pub fn entropy_similarity(a: &RgbImage, b: &RgbImage) -> Result<f64> {
    let (ea, eb) = (entropy(a)?, entropy(b)?);
    let high = ea.max(eb);
    if high == 0.0 {
        Ok(1.0)
    } else {
        Ok((ea.min(eb) / high).clamp(0.0, 1.0))
    }
}

fn packed_values(img: &RgbImage, width: u32, height: u32) -> Vec<f64> {
    imageops::resize(img, width, height, FilterType::Triangle)
        .pixels()
        .map(|p| pack(p) as f64)
        .collect()
}

fn dct_1d(input: &[f64], cos_table: &[f64], n: usize) -> Vec<f64> {
    (0..n)
        .map(|k| (0..n).map(|i| input[i] * cos_table[k * n + i]).sum())
        .collect()
}

/// 64-bit DCT perceptual hash
///
/// The image is reduced to 32x32, transformed with a 2D DCT-II, and each of
/// the 8x8 lowest-frequency coefficients becomes one bit: set when above the
/// median of the block.
pub fn phash(img: &RgbImage) -> Result<u64> {
    ensure_non_empty(img)?;
    let n = PHASH_SIZE;
    let values = packed_values(img, n as u32, n as u32);

    let cos_table: Vec<f64> = (0..n * n)
        .map(|idx| {
            let (k, i) = (idx / n, idx % n);
            (std::f64::consts::PI / n as f64 * (i as f64 + 0.5) * k as f64).cos()
        })
        .collect();

    let rows: Vec<f64> = values
        .chunks(n)
        .flat_map(|row| dct_1d(row, &cos_table, n))
        .collect();
    let mut block = vec![0.0; PHASH_BLOCK * PHASH_BLOCK];
    for col in 0..PHASH_BLOCK {
        let column: Vec<f64> = (0..n).map(|row| rows[row * n + col]).collect();
        let transformed = dct_1d(&column, &cos_table, n);
        for row in 0..PHASH_BLOCK {
            block[row * PHASH_BLOCK + col] = transformed[row];
        }
    }

    let mut sorted = block.clone();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median = (sorted[mid - 1] + sorted[mid]) / 2.0;

    Ok(block
        .iter()
        .enumerate()
        .fold(0u64, |hash, (bit, &v)| if v > median { hash | 1 << bit } else { hash }))
}

/// 64-bit difference hash over a 9x8 reduction
pub fn dhash(img: &RgbImage) -> Result<u64> {
    ensure_non_empty(img)?;
    let values = packed_values(img, 9, 8);
    let mut hash = 0u64;
    let mut bit = 0;
    for row in values.chunks(9) {
        for pair in row.windows(2) {
            if pair[1] > pair[0] {
                hash |= 1 << bit;
            }
            bit += 1;
        }
    }
    Ok(hash)
}

/// `1 - hamming / 64`
pub fn hash_similarity(a: u64, b: u64) -> f64 {
    1.0 - (a ^ b).count_ones() as f64 / 64.0
}

/// Product of the width ratio and the height ratio
pub fn size_ratio(a: (u32, u32), b: (u32, u32)) -> Result<f64> {
    if a.0 == 0 || a.1 == 0 || b.0 == 0 || b.1 == 0 {
        return Err(BenchError::Comparison("image has no pixels".to_string()));
    }
    let ratio = |x: u32, y: u32| x.min(y) as f64 / x.max(y) as f64;
    Ok(ratio(a.0, b.0) * ratio(a.1, b.1))
}

/// A single-channel image of `f64` samples
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f64>,
}

impl Plane {
    /// Luma plane (BT.601 weights) of an image
    pub fn from_rgb(img: &RgbImage) -> Self {
        let data = img
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64
            })
            .collect();
        Self {
            width: img.width(),
            height: img.height(),
            data,
        }
    }

    /// Luma plane of an image resized by `scale`
    pub fn scaled(img: &RgbImage, scale: f64) -> Self {
        if scale >= 1.0 {
            return Self::from_rgb(img);
        }
        let width = ((img.width() as f64 * scale).round() as u32).max(1);
        let height = ((img.height() as f64 * scale).round() as u32).max(1);
        Self::from_rgb(&imageops::resize(img, width, height, FilterType::Triangle))
    }

    pub fn get(&self, x: u32, y: u32) -> f64 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Extend to `width` x `height`, anchoring at the top-left corner
    pub fn pad(&self, width: u32, height: u32, fill: f64) -> Self {
        let (width, height) = (width.max(self.width), height.max(self.height));
        let mut data = vec![fill; (width * height) as usize];
        for y in 0..self.height {
            let src = (y * self.width) as usize;
            let dst = (y * width) as usize;
            data[dst..dst + self.width as usize]
                .copy_from_slice(&self.data[src..src + self.width as usize]);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Copy a rectangle; the rectangle must lie inside the plane
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Self> {
        if x + width > self.width || y + height > self.height {
            return Err(BenchError::Comparison(format!(
                "crop {width}x{height}+{x}+{y} outside {}x{} plane",
                self.width, self.height
            )));
        }
        let mut data = Vec::with_capacity((width * height) as usize);
        for row in y..y + height {
            let start = (row * self.width + x) as usize;
            data.extend_from_slice(&self.data[start..start + width as usize]);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }
}

/// Template matching method, in placement priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TemplateMethod {
    /// Normalized sum of squared differences (lower is better)
    SqDiffNormed,
    /// Normalized cross-correlation
    CCorrNormed,
    /// Normalized correlation coefficient
    CCoeffNormed,
}

impl TemplateMethod {
    pub const ALL: [TemplateMethod; 3] = [
        TemplateMethod::SqDiffNormed,
        TemplateMethod::CCorrNormed,
        TemplateMethod::CCoeffNormed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TemplateMethod::SqDiffNormed => "template matching (sqdiff)",
            TemplateMethod::CCorrNormed => "template matching (ccorr)",
            TemplateMethod::CCoeffNormed => "template matching (ccoeff)",
        }
    }
}

/// Best placement found by one method
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    pub method: TemplateMethod,
    /// Similarity in `[0, 1]`: `1 - min` for sqdiff, the max otherwise
    pub score: f64,
    /// Top-left corner of the template within the canvas
    pub x: u32,
    pub y: u32,
}

fn ratio_or(numerator: f64, denominator: f64, degenerate: f64) -> f64 {
    if denominator <= f64::EPSILON {
        degenerate
    } else {
        numerator / denominator
    }
}

/// Slide `template` over `canvas` and report the best placement
pub fn match_template(
    canvas: &Plane,
    template: &Plane,
    method: TemplateMethod,
) -> Result<TemplateMatch> {
    let (cw, ch) = canvas.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || cw == 0 || ch == 0 {
        return Err(BenchError::Comparison("image has no pixels".to_string()));
    }
    if tw > cw || th > ch {
        return Err(BenchError::Comparison(format!(
            "template {tw}x{th} larger than canvas {cw}x{ch}"
        )));
    }

    let n = (tw * th) as f64;
    let t_sum: f64 = template.data.iter().sum();
    let t_sq: f64 = template.data.iter().map(|v| v * v).sum();
    let t_mean = t_sum / n;
    let t_var = t_sq - t_sum * t_mean;

    let mut best: Option<(f64, u32, u32)> = None;
    for oy in 0..=(ch - th) {
        for ox in 0..=(cw - tw) {
            let (mut i_sum, mut i_sq, mut cross) = (0.0, 0.0, 0.0);
            for ty in 0..th {
                for tx in 0..tw {
                    let t = template.get(tx, ty);
                    let i = canvas.get(ox + tx, oy + ty);
                    i_sum += i;
                    i_sq += i * i;
                    cross += t * i;
                }
            }

            let value = match method {
                TemplateMethod::SqDiffNormed => {
                    let sq_diff = (t_sq - 2.0 * cross + i_sq).max(0.0);
                    let degenerate = if sq_diff <= f64::EPSILON { 0.0 } else { 1.0 };
                    ratio_or(sq_diff, (t_sq * i_sq).sqrt(), degenerate)
                }
                TemplateMethod::CCorrNormed => {
                    let degenerate = if t_sq <= f64::EPSILON && i_sq <= f64::EPSILON {
                        1.0
                    } else {
                        0.0
                    };
                    ratio_or(cross, (t_sq * i_sq).sqrt(), degenerate)
                }
                TemplateMethod::CCoeffNormed => {
                    let i_var = (i_sq - i_sum * i_sum / n).max(0.0);
                    let covariance = cross - t_sum * i_sum / n;
                    let degenerate = if t_var.abs() <= f64::EPSILON && i_var <= f64::EPSILON {
                        1.0
                    } else {
                        0.0
                    };
                    ratio_or(covariance, (t_var.max(0.0) * i_var).sqrt(), degenerate)
                }
            };

            let better = match (best, method) {
                (None, _) => true,
                (Some((current, _, _)), TemplateMethod::SqDiffNormed) => value < current,
                (Some((current, _, _)), _) => value > current,
            };
            if better {
                best = Some((value, ox, oy));
            }
        }
    }

    let (value, x, y) = best.ok_or_else(|| BenchError::Comparison("no placement".to_string()))?;
    if !value.is_finite() {
        return Err(BenchError::Comparison(format!("{} is not finite", method.name())));
    }
    let score = match method {
        TemplateMethod::SqDiffNormed => 1.0 - value,
        _ => value,
    };
    Ok(TemplateMatch {
        method,
        score: score.clamp(0.0, 1.0),
        x,
        y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn checker(width: u32, height: u32, cell: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgb([20, 40, 200])
            } else {
                Rgb([250, 250, 250])
            }
        })
    }

    #[test]
    fn test_entropy() {
        let flat = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        assert_eq!(entropy(&flat).unwrap(), 0.0);
        assert!((entropy(&checker(4, 4, 1)).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(entropy_similarity(&flat, &flat).unwrap(), 1.0);
        assert_eq!(entropy_similarity(&flat, &checker(4, 4, 1)).unwrap(), 0.0);
        assert!(entropy(&RgbImage::new(0, 3)).is_err());
    }

    #[test]
    fn test_hashes_are_stable() {
        let img = checker(64, 64, 8);
        assert_eq!(phash(&img).unwrap(), phash(&img.clone()).unwrap());
        assert_eq!(dhash(&img).unwrap(), dhash(&img.clone()).unwrap());
        assert_eq!(hash_similarity(0, 0), 1.0);
        assert_eq!(hash_similarity(0, u64::MAX), 0.0);
        assert_eq!(hash_similarity(0b1011, 0b0011), 1.0 - 1.0 / 64.0);
    }

    #[test]
    fn test_size_ratio() {
        assert_eq!(size_ratio((100, 200), (100, 200)).unwrap(), 1.0);
        assert_eq!(size_ratio((50, 200), (100, 100)).unwrap(), 0.25);
        assert!(size_ratio((0, 1), (1, 1)).is_err());
    }

    #[test]
    fn test_plane_pad_and_crop() {
        let plane = Plane {
            width: 2,
            height: 1,
            data: vec![1.0, 2.0],
        };
        let padded = plane.pad(3, 2, WHITE);
        assert_eq!(padded.data, vec![1.0, 2.0, WHITE, WHITE, WHITE, WHITE]);
        assert_eq!(padded.crop(1, 0, 2, 1).unwrap().data, vec![2.0, WHITE]);
        assert!(padded.crop(2, 1, 2, 1).is_err());
    }

    #[test]
    fn test_template_finds_embedded_patch() {
        let canvas_img = checker(32, 32, 4);
        let patch = imageops::crop_imm(&canvas_img, 8, 12, 12, 12).to_image();
        let canvas = Plane::from_rgb(&canvas_img);
        let template = Plane::from_rgb(&patch);

        let sq = match_template(&canvas, &template, TemplateMethod::SqDiffNormed).unwrap();
        assert!((sq.score - 1.0).abs() < 1e-9);
        assert_eq!((sq.x % 8, sq.y % 8), (0, 4));

        let co = match_template(&canvas, &template, TemplateMethod::CCoeffNormed).unwrap();
        assert!((co.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_template_rejects_oversized_template() {
        let small = Plane::from_rgb(&checker(4, 4, 1));
        let large = Plane::from_rgb(&checker(8, 8, 1));
        assert!(match_template(&small, &large, TemplateMethod::CCorrNormed).is_err());
    }
}
