use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::Criterion;
use ogrender::rendering::paint::{paint_commands, to_svg};
use ogrender::rendering::raster::render_svg_to_png;
use ogrender::rendering::{LayoutNode, LayoutTree, RasterOptions};
use ogrender::{Capability, RenderPipeline, RendererConfig, RuntimeEnv};
use resvg::usvg::fontdb;

// Render benchmarks. Run with:
//    cargo bench

/// A card with a grid of shapes; no text so no fonts are needed.
fn card(rows: usize, cols: usize) -> LayoutTree {
    let mut children = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            children.push(LayoutNode::Rect {
                x: c as f32 * 48.0,
                y: r as f32 * 48.0,
                width: 40.0,
                height: 40.0,
                fill: Some(if (r + c) % 2 == 0 { "#38bdf8" } else { "#f43f5e" }.into()),
                radius: 6.0,
            });
        }
    }
    LayoutTree {
        background: Some("#0f172a".into()),
        ..LayoutTree::new(1200, 630)
    }
    .push(LayoutNode::Group {
        x: 48.0,
        y: 48.0,
        children,
    })
}

/// Bench: layout tree to SVG
fn bench_typeset(c: &mut Criterion) {
    let tree = card(10, 20);
    let faces = HashMap::new();

    c.bench_function("typeset_native_200_rects", |b| {
        b.iter(|| {
            let commands = paint_commands(&tree, &faces).unwrap();
            to_svg(tree.width, tree.height, tree.background.as_deref(), &commands)
        })
    });
}

/// Bench: SVG to PNG at full size and thumbnail size
fn bench_rasterize(c: &mut Criterion) {
    let tree = card(10, 20);
    let svg = to_svg(
        tree.width,
        tree.height,
        tree.background.as_deref(),
        &paint_commands(&tree, &HashMap::new()).unwrap(),
    );
    let db = Arc::new(fontdb::Database::new());

    c.bench_function("rasterize_native_1200x630", |b| {
        b.iter(|| render_svg_to_png(svg.as_bytes(), &RasterOptions::default(), db.clone()).unwrap())
    });

    let thumb = RasterOptions {
        width: Some(300),
        ..Default::default()
    };
    c.bench_function("rasterize_native_300w", |b| {
        b.iter(|| render_svg_to_png(svg.as_bytes(), &thumb, db.clone()).unwrap())
    });
}

/// Micro-benchmark: cached binding lookup versus first resolution.
///
/// Prints p50/p95/p99 for resolving the Rasterize capability on a warm
/// resolver. Configure iterations with `BENCH_ITERATIONS`.
fn bench_resolution_latency(_c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let pipeline = RenderPipeline::builder(RendererConfig::default())
        .env(RuntimeEnv::default())
        .build()
        .unwrap();
    let env = *pipeline.env();

    let first = Instant::now();
    rt.block_on(pipeline.resolver().resolve(Capability::Rasterize, &env))
        .unwrap();
    println!("first resolution: {:?}", first.elapsed());

    let iterations: usize = std::env::var("BENCH_ITERATIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    let mut samples: Vec<Duration> = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let start = Instant::now();
        rt.block_on(pipeline.resolver().resolve(Capability::Rasterize, &env))
            .unwrap();
        samples.push(start.elapsed());
    }
    samples.sort();

    let pct = |p: f64| samples[((samples.len() - 1) as f64 * p).round() as usize];
    println!(
        "cached resolution latency: p50={:?} p95={:?} p99={:?}",
        pct(0.50),
        pct(0.95),
        pct(0.99)
    );
}

fn main() {
    let mut c = Criterion::default().configure_from_args();
    bench_typeset(&mut c);
    bench_rasterize(&mut c);
    bench_resolution_latency(&mut c);
    c.final_summary();
}
