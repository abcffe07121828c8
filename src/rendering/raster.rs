//! Native Rasterize binding built on resvg

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use resvg::usvg::{self, fontdb};
use tiny_skia::{Color, Pixmap, Transform};

use super::{parse_hex_color, RasterOptions};
use crate::capability::Rasterizer;
use crate::{Error, Result};

/// The `native` Rasterize binding. Holds the font database used for any
/// `<text>` left in incoming SVG.
pub struct NativeRasterizer {
    fontdb: Arc<fontdb::Database>,
}

impl NativeRasterizer {
    pub fn new(fontdb: Arc<fontdb::Database>) -> Self {
        Self { fontdb }
    }

    /// A rasterizer with system fonts loaded. Slow; call off the async runtime.
    pub fn with_system_fonts() -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        log::debug!("native rasterizer loaded {} system font faces", db.len());
        Self::new(Arc::new(db))
    }
}

/// Directory used for relative hrefs when the base is local.
fn resources_dir(base: Option<&str>) -> Option<PathBuf> {
    let base = base?;
    if let Ok(url) = url::Url::parse(base) {
        return match url.scheme() {
            "file" => url.to_file_path().ok(),
            _ => None,
        };
    }
    Some(PathBuf::from(base))
}

fn background(options: &RasterOptions) -> Result<Option<Color>> {
    match options.background.as_deref() {
        None => Ok(None),
        Some(s) => {
            let (r, g, b, a) =
                parse_hex_color(s).ok_or_else(|| Error::Render(format!("invalid background colour '{}'", s)))?;
            Ok(Some(Color::from_rgba8(r, g, b, a)))
        }
    }
}

fn encode(pixmap: &Pixmap) -> Result<Vec<u8>> {
    pixmap
        .encode_png()
        .map_err(|e| Error::Render(format!("PNG encode error: {}", e)))
}

fn blank(width: u32, height: u32, fill: Option<Color>) -> Result<Vec<u8>> {
    let mut pixmap = Pixmap::new(width.max(1), height.max(1))
        .ok_or_else(|| Error::Render("Failed to create pixmap".into()))?;
    if let Some(c) = fill {
        pixmap.fill(c);
    }
    encode(&pixmap)
}

/// Parse, scale and encode. Runs synchronously.
pub fn render_svg_to_png(svg: &[u8], options: &RasterOptions, fontdb: Arc<fontdb::Database>) -> Result<Vec<u8>> {
    let fill = background(options)?;
    if svg.iter().all(|b| b.is_ascii_whitespace()) {
        return blank(options.width.unwrap_or(1), options.height.unwrap_or(1), fill);
    }

    let opts = usvg::Options {
        resources_dir: resources_dir(options.base_url.as_deref()),
        fontdb,
        ..Default::default()
    };
    let tree = match usvg::Tree::from_data(svg, &opts) {
        Ok(tree) => tree,
        Err(usvg::Error::InvalidSize) => {
            return blank(options.width.unwrap_or(1), options.height.unwrap_or(1), fill);
        }
        Err(e) => return Err(Error::Render(format!("Failed to parse SVG: {}", e))),
    };

    let size = tree.size();
    let (w, h) = options.target_size(size.width(), size.height());
    let mut pixmap = Pixmap::new(w, h).ok_or_else(|| Error::Render(format!("Failed to create {}x{} pixmap", w, h)))?;
    if let Some(c) = fill {
        pixmap.fill(c);
    }

    let transform = Transform::from_scale(w as f32 / size.width(), h as f32 / size.height());
    resvg::render(&tree, transform, &mut pixmap.as_mut());
    encode(&pixmap)
}

#[async_trait]
impl Rasterizer for NativeRasterizer {
    async fn rasterize(&self, svg: &[u8], options: &RasterOptions) -> Result<Vec<u8>> {
        let svg = svg.to_vec();
        let options = options.clone();
        let fontdb = self.fontdb.clone();
        tokio::task::spawn_blocking(move || render_svg_to_png(&svg, &options, fontdb))
            .await
            .map_err(|e| Error::Other(format!("raster task failed: {}", e)))?
    }
}
