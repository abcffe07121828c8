//! Render step inputs and the native Typeset/Rasterize implementations

pub mod images;
pub mod layout;

#[cfg(feature = "native")]
pub mod paint;
#[cfg(feature = "native")]
pub mod raster;

use serde::{Deserialize, Serialize};

pub use layout::{LayoutNode, LayoutTree};

pub const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Options passed through to the Rasterize binding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterOptions {
    /// Target width; with only one of width/height the aspect ratio is kept
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Base for relative image references (file path, `file:` or `http(s):` URL)
    #[serde(default)]
    pub base_url: Option<String>,
    /// CSS hex colour painted under the image
    #[serde(default)]
    pub background: Option<String>,
}

impl RasterOptions {
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    /// Output size for a source of `src_w`×`src_h`.
    pub fn target_size(&self, src_w: f32, src_h: f32) -> (u32, u32) {
        let (w, h) = match (self.width, self.height) {
            (Some(w), Some(h)) => (w as f32, h as f32),
            (Some(w), None) if src_w > 0.0 => (w as f32, src_h * w as f32 / src_w),
            (None, Some(h)) if src_h > 0.0 => (src_w * h as f32 / src_h, h as f32),
            _ => (src_w, src_h),
        };
        ((w.round() as u32).max(1), (h.round() as u32).max(1))
    }
}

/// Smallest valid document of the given size, used for degenerate input.
pub fn minimal_svg(width: u32, height: u32) -> String {
    let (w, h) = (width.max(1), height.max(1));
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"/>"#
    )
}

pub fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Parse `#rgb`, `#rgba`, `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(s: &str) -> Option<(u8, u8, u8, u8)> {
    let hex = s.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => Some((nibble(0)?, nibble(1)?, nibble(2)?, 255)),
        4 => Some((nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?)),
        6 => Some((byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some((byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors() {
        assert_eq!(parse_hex_color("#fff"), Some((255, 255, 255, 255)));
        assert_eq!(parse_hex_color("#10203040"), Some((16, 32, 48, 64)));
        assert_eq!(parse_hex_color("red"), None);
        assert_eq!(parse_hex_color("#12345"), None);
    }

    #[test]
    fn target_size_keeps_aspect_with_one_side() {
        let o = RasterOptions { width: Some(600), ..Default::default() };
        assert_eq!(o.target_size(1200.0, 630.0), (600, 315));
        let o = RasterOptions { height: Some(100), ..Default::default() };
        assert_eq!(o.target_size(200.0, 50.0), (400, 100));
        assert_eq!(RasterOptions::default().target_size(0.0, 0.0), (1, 1));
    }

    #[test]
    fn minimal_svg_is_never_zero_sized() {
        assert!(minimal_svg(0, 0).contains(r#"width="1" height="1""#));
    }
}
