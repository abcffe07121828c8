//! ogrender
//!
//! Social-preview (OG) image rendering with pluggable backends. Each of the
//! three render steps has several interchangeable bindings:
//!
//! - **Typeset** (layout tree → SVG): native glyph outlining or a WASM module
//! - **Rasterize** (SVG → PNG): native resvg or a WASM module
//! - **Screenshot** (HTML → PNG): a headless browser, driven over CDP or its CLI
//!
//! The [`CapabilityResolver`](resolver::CapabilityResolver) picks the first
//! viable binding for the current [`RuntimeEnv`](env::RuntimeEnv), activates
//! it exactly once, and falls back down the priority list when a preferred
//! binding is unavailable.
//!
//! # Example
//!
//! ```no_run
//! use ogrender::rendering::{LayoutNode, LayoutTree, RasterOptions};
//! use ogrender::{RenderPipeline, RendererConfig};
//!
//! # async fn demo() -> ogrender::Result<()> {
//! let pipeline = RenderPipeline::builder(RendererConfig::default()).build()?;
//! let tree = LayoutTree::new(1200, 630).push(LayoutNode::Rect {
//!     x: 0.0,
//!     y: 0.0,
//!     width: 1200.0,
//!     height: 630.0,
//!     fill: Some("#0f172a".into()),
//!     radius: 0.0,
//! });
//! let svg = pipeline.render_vector(&tree).await?;
//! let png = pipeline.render_raster(&svg.bytes, &RasterOptions::default()).await?;
//! assert_eq!(png.mime.as_str(), "image/png");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine as Base64Engine;
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Attempt, Error, LoadErrorKind, Result};

pub mod backends;
pub mod browser;
pub mod capability;
pub mod env;
pub mod fetch;
pub mod fonts;
pub mod once_map;
pub mod pipeline;
pub mod rendering;
pub mod resolver;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use capability::{Binding, BindingRegistry, Candidate, CandidateKind, Capability, Probe};
pub use env::{Deployment, Platform, RuntimeEnv};
pub use pipeline::{RenderPipeline, RenderRequest};
pub use resolver::{CapabilityResolver, ResolvedBinding};

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    /// The conventional OG card size
    fn default() -> Self {
        Self {
            width: 1200,
            height: 630,
        }
    }
}

/// What a Screenshot binding navigates to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenshotTarget {
    Url(String),
    Html(String),
}

impl ScreenshotTarget {
    /// A URL a browser can open directly. Inline HTML becomes a data URL.
    pub fn to_url(&self) -> String {
        match self {
            ScreenshotTarget::Url(u) => u.clone(),
            ScreenshotTarget::Html(html) => format!(
                "data:text/html;charset=utf-8;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(html.as_bytes())
            ),
        }
    }
}

/// MIME tag on rendered output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeKind {
    Svg,
    Png,
}

impl MimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeKind::Svg => "image/svg+xml",
            MimeKind::Png => "image/png",
        }
    }
}

impl fmt::Display for MimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque rendered bytes tagged with their MIME kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub bytes: Vec<u8>,
    pub mime: MimeKind,
}

/// An npm-style package file, used to locate WASM bindings locally or on a CDN mirror
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct WasmPackage {
    pub package: String,
    pub version: String,
    pub path: String,
}

impl fmt::Display for WasmPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.package, self.version, self.path)
    }
}

/// Renderer configuration
///
/// Defaults target a production server. Every field may be omitted in a
/// JSON config file; environment variables (see [`RendererConfig::from_env`])
/// override both.
///
/// # Examples
///
/// ```
/// let cfg = ogrender::RendererConfig::default();
/// assert_eq!(cfg.default_viewport.width, 1200);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Viewport used when a screenshot request names none
    pub default_viewport: Viewport,
    /// Per-request screenshot budget in milliseconds
    pub screenshot_timeout_ms: u64,
    /// Upper bound on the browser installer in milliseconds
    pub install_timeout_ms: u64,
    /// Timeout for each HTTP GET in milliseconds
    pub fetch_timeout_ms: u64,
    /// CDN mirror host (and optional path) for remote WASM fallback
    pub cdn_mirror: String,
    /// Directories searched for package-relative WASM binaries
    pub asset_roots: Vec<PathBuf>,
    /// Directory holding bundled font files
    pub font_dir: PathBuf,
    /// Public origin serving `fonts/...`, used on edge platforms
    pub public_base_url: Option<String>,
    /// Font CSS endpoint queried for remote font files
    pub font_css_endpoint: String,
    /// WASM Typeset binding, if one is deployed
    pub typeset_wasm: Option<WasmPackage>,
    /// WASM Rasterize binding, if one is deployed
    pub raster_wasm: Option<WasmPackage>,
    /// Explicit browser executable
    pub browser_executable: Option<PathBuf>,
    /// Extra arguments passed to the browser
    pub browser_args: Vec<String>,
    /// Installer argv run by `install-browser`
    pub browser_installer: Vec<String>,
    /// Per-platform compatibility overrides
    pub compatibility: Vec<env::CompatibilityOverride>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            default_viewport: Viewport::default(),
            screenshot_timeout_ms: 15_000,
            install_timeout_ms: 120_000,
            fetch_timeout_ms: 10_000,
            cdn_mirror: "cdn.jsdelivr.net/npm".to_string(),
            asset_roots: vec![PathBuf::from("node_modules")],
            font_dir: PathBuf::from("assets/fonts"),
            public_base_url: None,
            font_css_endpoint: "https://fonts.googleapis.com/css2".to_string(),
            typeset_wasm: None,
            raster_wasm: None,
            browser_executable: None,
            browser_args: Vec::new(),
            browser_installer: ["npx", "--yes", "playwright-core", "install", "chromium"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            compatibility: Vec::new(),
        }
    }
}

impl RendererConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Overlay `OGRENDER_*` environment variables.
    pub fn from_env(mut self) -> Result<Self> {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        fn millis(name: &str) -> Result<Option<u64>> {
            var(name)
                .map(|v| {
                    v.trim()
                        .parse()
                        .map_err(|_| Error::Config(format!("{} must be a number of milliseconds", name)))
                })
                .transpose()
        }

        if let Some(v) = var("OGRENDER_BROWSER_PATH") {
            self.browser_executable = Some(PathBuf::from(v));
        }
        if let Some(v) = var("OGRENDER_CDN_MIRROR") {
            self.cdn_mirror = v;
        }
        if let Some(v) = var("OGRENDER_FONT_DIR") {
            self.font_dir = PathBuf::from(v);
        }
        if let Some(v) = var("OGRENDER_PUBLIC_URL") {
            self.public_base_url = Some(v);
        }
        if let Some(v) = millis("OGRENDER_SCREENSHOT_TIMEOUT_MS")? {
            self.screenshot_timeout_ms = v;
        }
        if let Some(v) = millis("OGRENDER_INSTALL_TIMEOUT_MS")? {
            self.install_timeout_ms = v;
        }
        Ok(self)
    }
}
