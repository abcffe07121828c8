//! Render a social card to SVG and PNG.
//! Run with: cargo run --example render_card -- [title]

use ogrender::fonts::FontRef;
use ogrender::rendering::{LayoutNode, LayoutTree, RasterOptions};
use ogrender::{RenderPipeline, RendererConfig, RuntimeEnv};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let title = std::env::args().nth(1).unwrap_or_else(|| "Hello from ogrender".to_string());

    let config = RendererConfig::default().from_env()?;
    let pipeline = RenderPipeline::builder(config).env(RuntimeEnv::detect()).build()?;
    println!("Runtime: {:?}\n", pipeline.env());

    let tree = LayoutTree {
        background: Some("#0f172a".into()),
        ..LayoutTree::new(1200, 630)
    }
    .push(LayoutNode::Rect {
        x: 64.0,
        y: 64.0,
        width: 1072.0,
        height: 502.0,
        fill: Some("#1e293b".into()),
        radius: 24.0,
    })
    .push(LayoutNode::Text {
        x: 112.0,
        y: 300.0,
        text: title,
        font: FontRef::new("Inter", 700),
        size: 72.0,
        fill: Some("#f8fafc".into()),
    });

    let svg = pipeline.render_vector(&tree).await?;
    std::fs::write("card.svg", &svg.bytes)?;
    println!("✓ card.svg ({} bytes)", svg.bytes.len());

    let png = pipeline
        .render_raster(&svg.bytes, &RasterOptions::default())
        .await?;
    std::fs::write("card.png", &png.bytes)?;
    println!("✓ card.png ({} bytes)", png.bytes.len());

    println!("\nResolved bindings:");
    for binding in pipeline.resolver().snapshot() {
        println!("  {}: {} ({})", binding.capability, binding.name, binding.kind);
    }
    Ok(())
}
