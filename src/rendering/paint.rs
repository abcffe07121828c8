//! Native Typeset: flatten a layout tree into paint commands and emit SVG
//!
//! Text is converted to glyph outline paths so the output does not depend on
//! fonts being installed wherever the SVG is rasterized.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use ttf_parser::{Face, GlyphId, OutlineBuilder};

use super::layout::{LayoutNode, LayoutTree};
use super::escape_xml;
use crate::capability::Typesetter;
use crate::fonts::{FontLoader, FontRef};
use crate::{Error, Result};

const DEFAULT_FILL: &str = "#000000";

/// Drawing primitives in absolute coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        radius: f32,
        fill: String,
    },
    Glyphs {
        path: String,
        fill: String,
    },
    Image {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        href: String,
    },
}

struct PathSink {
    d: String,
    x: f32,
    y: f32,
    scale: f32,
}

impl PathSink {
    fn px(&self, x: f32) -> f32 {
        self.x + x * self.scale
    }

    fn py(&self, y: f32) -> f32 {
        self.y - y * self.scale
    }
}

impl OutlineBuilder for PathSink {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = (self.px(x), self.py(y));
        let _ = write!(self.d, "M{:.2} {:.2}", x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = (self.px(x), self.py(y));
        let _ = write!(self.d, "L{:.2} {:.2}", x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1, x, y) = (self.px(x1), self.py(y1), self.px(x), self.py(y));
        let _ = write!(self.d, "Q{:.2} {:.2} {:.2} {:.2}", x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = (self.px(x1), self.py(y1));
        let (x2, y2) = (self.px(x2), self.py(y2));
        let (x, y) = (self.px(x), self.py(y));
        let _ = write!(self.d, "C{:.2} {:.2} {:.2} {:.2} {:.2} {:.2}", x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.d.push('Z');
    }
}

/// Outline `text` starting at pen position (`x`, baseline `y`).
pub fn text_outline(face: &Face<'_>, text: &str, x: f32, y: f32, size: f32) -> String {
    let scale = size / face.units_per_em() as f32;
    let mut sink = PathSink {
        d: String::new(),
        x,
        y,
        scale,
    };
    let fallback = face.glyph_index('?').unwrap_or(GlyphId(0));
    for ch in text.chars() {
        if ch.is_control() {
            continue;
        }
        let gid = face.glyph_index(ch).unwrap_or(fallback);
        face.outline_glyph(gid, &mut sink);
        sink.x += face.glyph_hor_advance(gid).unwrap_or(0) as f32 * scale;
    }
    sink.d
}

/// Flatten the tree. Every font referenced by drawn text must be present in `faces`.
pub fn paint_commands(tree: &LayoutTree, faces: &HashMap<FontRef, Arc<Vec<u8>>>) -> Result<Vec<PaintCommand>> {
    let mut parsed: HashMap<&FontRef, Face<'_>> = HashMap::new();
    for (font, bytes) in faces {
        let face = Face::parse(bytes, 0)
            .map_err(|e| Error::Render(format!("font '{}' is not a usable font: {}", font, e)))?;
        parsed.insert(font, face);
    }

    fn walk(
        nodes: &[LayoutNode],
        ox: f32,
        oy: f32,
        parsed: &HashMap<&FontRef, Face<'_>>,
        out: &mut Vec<PaintCommand>,
    ) -> Result<()> {
        for node in nodes {
            match node {
                LayoutNode::Rect { x, y, width, height, fill, radius } => {
                    if *width == 0.0 || *height == 0.0 {
                        continue;
                    }
                    out.push(PaintCommand::SolidRect {
                        x: ox + x,
                        y: oy + y,
                        width: *width,
                        height: *height,
                        radius: *radius,
                        fill: fill.clone().unwrap_or_else(|| DEFAULT_FILL.to_string()),
                    });
                }
                LayoutNode::Text { x, y, text, font, size, fill } => {
                    if text.trim().is_empty() || *size <= 0.0 {
                        continue;
                    }
                    let face = parsed
                        .get(font)
                        .ok_or_else(|| Error::Render(format!("no font loaded for '{}'", font)))?;
                    let path = text_outline(face, text, ox + x, oy + y, *size);
                    if !path.is_empty() {
                        out.push(PaintCommand::Glyphs {
                            path,
                            fill: fill.clone().unwrap_or_else(|| DEFAULT_FILL.to_string()),
                        });
                    }
                }
                LayoutNode::Image { x, y, width, height, href } => out.push(PaintCommand::Image {
                    x: ox + x,
                    y: oy + y,
                    width: *width,
                    height: *height,
                    href: href.clone(),
                }),
                LayoutNode::Group { x, y, children } => walk(children, ox + x, oy + y, parsed, out)?,
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(&tree.nodes, 0.0, 0.0, &parsed, &mut out)?;
    Ok(out)
}

/// Serialize paint commands as a standalone SVG document.
pub fn to_svg(width: u32, height: u32, background: Option<&str>, commands: &[PaintCommand]) -> String {
    let (w, h) = (width.max(1), height.max(1));
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#
    );
    if let Some(bg) = background {
        let _ = write!(svg, r#"<rect width="{}" height="{}" fill="{}"/>"#, w, h, escape_xml(bg));
    }
    for cmd in commands {
        let _ = match cmd {
            PaintCommand::SolidRect { x, y, width, height, radius, fill } => {
                let rx = if *radius > 0.0 {
                    format!(r#" rx="{:.2}""#, radius)
                } else {
                    String::new()
                };
                write!(
                    svg,
                    r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}"{} fill="{}"/>"#,
                    x,
                    y,
                    width,
                    height,
                    rx,
                    escape_xml(fill)
                )
            }
            PaintCommand::Glyphs { path, fill } => {
                write!(svg, r#"<path d="{}" fill="{}"/>"#, path, escape_xml(fill))
            }
            PaintCommand::Image { x, y, width, height, href } => write!(
                svg,
                r#"<image x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" href="{}" preserveAspectRatio="xMidYMid slice"/>"#,
                x,
                y,
                width,
                height,
                escape_xml(href)
            ),
        };
    }
    svg.push_str("</svg>");
    svg
}

/// The `native` Typeset binding
#[derive(Debug, Default)]
pub struct NativeTypesetter;

#[async_trait]
impl Typesetter for NativeTypesetter {
    async fn typeset(&self, tree: &LayoutTree, fonts: &dyn FontLoader) -> Result<String> {
        tree.validate()?;

        let used = tree.fonts_used();
        let loaded = futures::future::try_join_all(used.iter().map(|f| fonts.load(f))).await?;
        let faces: HashMap<FontRef, Arc<Vec<u8>>> = used.into_iter().zip(loaded).collect();

        let commands = paint_commands(tree, &faces)?;
        Ok(to_svg(tree.width, tree.height, tree.background.as_deref(), &commands))
    }
}
