#![cfg(feature = "native")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use ogrender::fetch::HttpFetcher;
use ogrender::fonts::FontRef;
use ogrender::rendering::{LayoutNode, LayoutTree, RasterOptions};
use ogrender::{Capability, Error, MimeKind, RenderPipeline, RenderRequest, RendererConfig, RuntimeEnv, ScreenshotTarget, Viewport};

fn server_pipeline(config: RendererConfig) -> RenderPipeline {
    RenderPipeline::builder(config)
        .env(RuntimeEnv::default())
        .build()
        .unwrap()
}

fn card() -> LayoutTree {
    LayoutTree {
        background: Some("#0f172a".into()),
        ..LayoutTree::new(1200, 630)
    }
    .push(LayoutNode::Rect {
        x: 64.0,
        y: 64.0,
        width: 400.0,
        height: 120.0,
        fill: Some("#38bdf8".into()),
        radius: 16.0,
    })
}

#[tokio::test]
async fn tree_to_png_uses_native_bindings_on_server() {
    let pipeline = server_pipeline(RendererConfig::default());

    let svg = pipeline.render_vector(&card()).await.unwrap();
    assert_eq!(svg.mime, MimeKind::Svg);

    let png = pipeline
        .render_raster(&svg.bytes, &RasterOptions { width: Some(600), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(png.mime, MimeKind::Png);
    assert_eq!(common::png_size(&png.bytes), (600, 315));

    let resolved = pipeline.resolver().snapshot();
    assert_eq!(resolved.len(), 2);
    assert!(resolved.iter().all(|b| b.name == "native"));
}

#[tokio::test]
async fn blank_svg_becomes_minimal_png() {
    let pipeline = server_pipeline(RendererConfig::default());
    let png = pipeline
        .render_raster(b"   \n", &RasterOptions::with_size(32, 16))
        .await
        .unwrap();
    assert_eq!(common::png_size(&png.bytes), (32, 16));
}

#[tokio::test]
async fn malformed_svg_is_a_render_error() {
    let pipeline = server_pipeline(RendererConfig::default());
    let err = pipeline
        .render_raster(b"<svg><rect", &RasterOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Render(_)), "{:?}", err);
}

#[tokio::test]
async fn remote_images_are_fetched_against_http_base() {
    use base64::Engine as _;

    // 1x1 transparent PNG
    let pixel = base64::engine::general_purpose::STANDARD
        .decode("iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==")
        .unwrap();
    let server = common::serve(move |_, path| match path {
        "/og/logo.png" => Some((200, "image/png", pixel.clone())),
        _ => None,
    });
    let pipeline = RenderPipeline::builder(RendererConfig::default())
        .env(RuntimeEnv::default())
        .fetcher(Arc::new(HttpFetcher::new(Duration::from_secs(5)).unwrap()))
        .build()
        .unwrap();

    let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"><image href="logo.png" width="10" height="10"/></svg>"#;
    let options = RasterOptions {
        base_url: Some(server.url("og/")),
        ..Default::default()
    };
    let png = pipeline.render_raster(svg, &options).await.unwrap();
    assert_eq!(common::png_size(&png.bytes), (10, 10));
    assert_eq!(server.hits("/og/logo.png"), 1);
}

#[tokio::test]
async fn render_dispatches_on_request_kind() {
    let pipeline = server_pipeline(RendererConfig::default());
    let request: RenderRequest = serde_json::from_value(serde_json::json!({
        "kind": "raster",
        "tree": { "width": 40, "height": 20, "nodes": [{ "type": "rect", "x": 0, "y": 0, "width": 40, "height": 20 }] },
    }))
    .unwrap();
    let out = pipeline.render(request).await.unwrap();
    assert_eq!(common::png_size(&out.bytes), (40, 20));

    let both: RenderRequest = serde_json::from_value(serde_json::json!({
        "kind": "raster", "svg": "<svg/>", "tree": { "width": 1, "height": 1 }
    }))
    .unwrap();
    assert!(matches!(pipeline.render(both).await, Err(Error::Config(_))));
}

#[tokio::test]
async fn text_is_outlined_and_rasterized() {
    let pipeline = server_pipeline(RendererConfig::default());
    let font = FontRef::new("Tuffy", 400);
    let bytes = std::fs::read(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/Tuffy.ttf")).unwrap();
    pipeline.fonts().preload(font.clone(), bytes).await.unwrap();

    let tree = LayoutTree {
        background: Some("#ffffff".into()),
        ..LayoutTree::new(320, 80)
    }
    .push(LayoutNode::Text {
        x: 16.0,
        y: 56.0,
        text: "Hello, OG".into(),
        font,
        size: 40.0,
        fill: Some("#111827".into()),
    });

    let svg = pipeline.render_vector(&tree).await.unwrap();
    let svg_text = String::from_utf8(svg.bytes.clone()).unwrap();
    assert!(svg_text.contains(r#"<path d="M"#), "{}", svg_text);

    let png = pipeline.render_png(&tree, &RasterOptions::default()).await.unwrap();
    assert_eq!(png.mime, MimeKind::Png);
    assert_eq!(common::png_size(&png.bytes), (320, 80));

    // Glyph ink makes the image larger than the same canvas left blank
    let blank = pipeline
        .render_raster(b"", &RasterOptions::with_size(320, 80))
        .await
        .unwrap();
    assert!(png.bytes.len() > blank.bytes.len());
}

#[tokio::test]
async fn screenshot_failure_leaves_vector_rendering_intact() {
    let config: RendererConfig = serde_json::from_str(
        r#"{"compatibility": [{"platform": "server", "capability": "screenshot", "kinds": []}]}"#,
    )
    .unwrap();
    let pipeline = server_pipeline(config);

    let err = pipeline
        .render_screenshot(&ScreenshotTarget::Html("<p>x</p>".into()), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BrowserUnavailable(_)), "{:?}", err);

    let svg = pipeline.render_vector(&card()).await.unwrap();
    assert!(!svg.bytes.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn screenshot_through_discovered_browser() {
    let dir = tempfile::tempdir().unwrap();
    let config = RendererConfig {
        browser_executable: Some(common::fake_browser(dir.path())),
        ..Default::default()
    };
    let pipeline = server_pipeline(config);

    let out = pipeline
        .render_screenshot(
            &ScreenshotTarget::Html("<h1>Hello</h1>".into()),
            Some(Viewport { width: 600, height: 315 }),
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.mime, MimeKind::Png);
    assert!(out.bytes.starts_with(b"\x89PNG"));

    pipeline.shutdown().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn failed_install_does_not_block_a_later_screenshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = RendererConfig {
        browser_executable: Some(common::fake_browser(dir.path())),
        browser_installer: vec!["sh".into(), "-c".into(), "echo downloading; exit 2".into()],
        ..Default::default()
    };
    let pipeline = server_pipeline(config);

    let report = pipeline.install_browser().await;
    assert_eq!(report.exit_code, Some(2));
    assert!(!report.succeeded());
    assert_eq!(report.lines, vec!["downloading".to_string()]);

    let out = pipeline
        .render_screenshot(&ScreenshotTarget::Url("about:blank".into()), None, Some(Duration::from_secs(10)))
        .await
        .unwrap();
    assert!(out.bytes.starts_with(b"\x89PNG"));
    assert!(pipeline.resolver().cached(Capability::Screenshot, pipeline.env()).is_some());
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn screenshot_with_real_browser() {
    let pipeline = server_pipeline(RendererConfig::default().from_env().unwrap());
    let out = pipeline
        .render_screenshot(
            &ScreenshotTarget::Html("<body style='margin:0;background:#f43f5e'></body>".into()),
            Some(Viewport { width: 320, height: 200 }),
            None,
        )
        .await
        .unwrap();
    assert_eq!(common::png_size(&out.bytes), (320, 200));
    pipeline.shutdown().await.unwrap();
}
