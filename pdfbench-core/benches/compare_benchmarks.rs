//! Comparator Performance Benchmarks
//!
//! Covers the individual metrics, the full comparison of same-sized and
//! differently sized pages, and the structural difference map.
//!
//! Run with: `cargo bench --bench compare_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgb, RgbImage};
use pdfbench::compare::metrics::{dhash, entropy, match_template, phash, Plane, TemplateMethod};
use pdfbench::compare::{compare, structural_similarity};
use std::time::Duration;

/// Text-like page: dark strokes in rows over a light background
fn page(width: u32, height: u32, shift: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let line = (y / 14) % 2 == 0;
        let glyph = ((x + shift) / 5 + y / 3) % 4 != 0;
        if line && glyph && x > 20 && x + 20 < width {
            Rgb([20, 20, 30])
        } else {
            Rgb([250, 248, 240])
        }
    })
}

fn benchmark_metrics(c: &mut Criterion) {
    let img = page(612, 792, 0);
    let mut group = c.benchmark_group("metrics");

    group.bench_function("entropy", |b| b.iter(|| entropy(black_box(&img))));
    group.bench_function("phash", |b| b.iter(|| phash(black_box(&img))));
    group.bench_function("dhash", |b| b.iter(|| dhash(black_box(&img))));

    let canvas = Plane::from_rgb(&page(128, 128, 0));
    let template = Plane::from_rgb(&page(96, 110, 3));
    for method in TemplateMethod::ALL {
        group.bench_with_input(
            BenchmarkId::new("match_template", method.name()),
            &method,
            |b, &method| b.iter(|| match_template(black_box(&canvas), black_box(&template), method)),
        );
    }
    group.finish();
}

fn benchmark_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("compare");

    for (width, height) in [(153, 198), (306, 396), (612, 792)] {
        let a = page(width, height, 0);
        let b = page(width, height, 2);
        group.bench_with_input(
            BenchmarkId::new("same_size", format!("{width}x{height}")),
            &(a, b),
            |bench, (a, b)| bench.iter(|| compare(Some(a), Some(b), false)),
        );
    }

    let large = page(612, 792, 0);
    let small = page(595, 842, 1);
    group.bench_function("size_mismatch", |b| {
        b.iter(|| compare(Some(&large), Some(&small), false))
    });
    group.bench_function("size_mismatch_with_diff", |b| {
        b.iter(|| compare(Some(&large), Some(&small), true))
    });
    group.finish();
}

fn benchmark_structural(c: &mut Criterion) {
    let a = Plane::from_rgb(&page(612, 792, 0));
    let b = Plane::from_rgb(&page(612, 792, 4));
    c.bench_function("structural_similarity_612x792", |bench| {
        bench.iter(|| structural_similarity(black_box(&a), black_box(&b)))
    });
}

criterion_group!(
    name = metric_benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(50);
    targets = benchmark_metrics, benchmark_structural
);

criterion_group!(
    name = compare_benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(15))
        .sample_size(20);
    targets = benchmark_compare
);

criterion_main!(metric_benches, compare_benches);
