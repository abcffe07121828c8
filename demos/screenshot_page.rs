//! Capture a URL with the headless browser.
//! Run with: cargo run --example screenshot_page -- https://example.com

use std::time::Duration;

use ogrender::{RenderPipeline, RendererConfig, RuntimeEnv, ScreenshotTarget, Viewport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let url = std::env::args().nth(1).unwrap_or_else(|| "https://example.com".to_string());

    let config = RendererConfig::default().from_env()?;
    let pipeline = RenderPipeline::builder(config).env(RuntimeEnv::detect()).build()?;

    match pipeline.browser_executable() {
        Some(path) => println!("Browser: {}", path.display()),
        None => {
            println!("No browser found, running installer...");
            let report = pipeline.install_browser().await;
            for line in &report.lines {
                println!("  | {}", line);
            }
            if !report.succeeded() {
                println!("Installer did not succeed (exit {:?})", report.exit_code);
            }
        }
    }

    let viewport = Viewport {
        width: 1200,
        height: 630,
    };
    let result = pipeline
        .render_screenshot(&ScreenshotTarget::Url(url.clone()), Some(viewport), Some(Duration::from_secs(30)))
        .await;

    match result {
        Ok(png) => {
            std::fs::write("screenshot.png", &png.bytes)?;
            println!("✓ {} -> screenshot.png ({} bytes)", url, png.bytes.len());
        }
        Err(e) => println!("✗ capture failed: {}", e),
    }

    pipeline.shutdown().await?;
    Ok(())
}
