//! Layout tree handed to the Typeset step
//!
//! Coordinates are absolute pixels within the parent group. Text `y` is the
//! baseline.
use serde::{Deserialize, Serialize};

use crate::fonts::FontRef;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutTree {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub nodes: Vec<LayoutNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LayoutNode {
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        #[serde(default)]
        fill: Option<String>,
        #[serde(default)]
        radius: f32,
    },
    Text {
        x: f32,
        y: f32,
        text: String,
        font: FontRef,
        size: f32,
        #[serde(default)]
        fill: Option<String>,
    },
    Image {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        href: String,
    },
    Group {
        #[serde(default)]
        x: f32,
        #[serde(default)]
        y: f32,
        #[serde(default)]
        children: Vec<LayoutNode>,
    },
}

impl LayoutTree {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background: None,
            nodes: Vec::new(),
        }
    }

    pub fn push(mut self, node: LayoutNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Zero area or no nodes. Still valid input; it renders a minimal image.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || (self.nodes.is_empty() && self.background.is_none())
    }

    /// Distinct fonts referenced by text that will actually draw glyphs, in
    /// first-use order.
    pub fn fonts_used(&self) -> Vec<FontRef> {
        fn walk(nodes: &[LayoutNode], out: &mut Vec<FontRef>) {
            for node in nodes {
                match node {
                    LayoutNode::Text { text, font, size, .. } => {
                        if !text.trim().is_empty() && *size > 0.0 && !out.contains(font) {
                            out.push(font.clone());
                        }
                    }
                    LayoutNode::Group { children, .. } => walk(children, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.nodes, &mut out);
        out
    }

    /// Reject structurally invalid trees: non-finite or negative geometry.
    pub fn validate(&self) -> Result<()> {
        fn check(label: &str, v: f32) -> Result<()> {
            if !v.is_finite() {
                return Err(Error::Render(format!("layout {} is not finite", label)));
            }
            Ok(())
        }
        fn check_size(label: &str, v: f32) -> Result<()> {
            check(label, v)?;
            if v < 0.0 {
                return Err(Error::Render(format!("layout {} is negative", label)));
            }
            Ok(())
        }
        fn walk(nodes: &[LayoutNode]) -> Result<()> {
            for node in nodes {
                match node {
                    LayoutNode::Rect { x, y, width, height, radius, .. } => {
                        check("rect x", *x)?;
                        check("rect y", *y)?;
                        check_size("rect width", *width)?;
                        check_size("rect height", *height)?;
                        check_size("rect radius", *radius)?;
                    }
                    LayoutNode::Text { x, y, size, font, .. } => {
                        check("text x", *x)?;
                        check("text y", *y)?;
                        check_size("text size", *size)?;
                        if font.family.trim().is_empty() {
                            return Err(Error::Render("text node has an empty font family".into()));
                        }
                    }
                    LayoutNode::Image { x, y, width, height, .. } => {
                        check("image x", *x)?;
                        check("image y", *y)?;
                        check_size("image width", *width)?;
                        check_size("image height", *height)?;
                    }
                    LayoutNode::Group { x, y, children } => {
                        check("group x", *x)?;
                        check("group y", *y)?;
                        walk(children)?;
                    }
                }
            }
            Ok(())
        }
        walk(&self.nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(family: &str, body: &str) -> LayoutNode {
        LayoutNode::Text {
            x: 0.0,
            y: 10.0,
            text: body.into(),
            font: FontRef::new(family, 400),
            size: 16.0,
            fill: None,
        }
    }

    #[test]
    fn fonts_used_skips_blank_text_and_dedupes() {
        let tree = LayoutTree::new(100, 50)
            .push(text("Inter", "Hello"))
            .push(text("Unused", "   "))
            .push(LayoutNode::Group {
                x: 5.0,
                y: 5.0,
                children: vec![text("Inter", "again"), text("Mono", "x")],
            });
        let fams: Vec<_> = tree.fonts_used().into_iter().map(|f| f.family).collect();
        assert_eq!(fams, vec!["Inter", "Mono"]);
    }

    #[test]
    fn validate_rejects_negative_and_non_finite() {
        let bad = LayoutTree::new(10, 10).push(LayoutNode::Rect {
            x: 0.0,
            y: 0.0,
            width: -1.0,
            height: 1.0,
            fill: None,
            radius: 0.0,
        });
        assert!(bad.validate().is_err());
        let nan = LayoutTree::new(10, 10).push(LayoutNode::Group {
            x: f32::NAN,
            y: 0.0,
            children: vec![],
        });
        assert!(nan.validate().is_err());
        assert!(LayoutTree::new(10, 10).push(text("Inter", "a")).validate().is_ok());
    }

    #[test]
    fn deserializes_tagged_nodes() {
        let json = r##"{"width":1200,"height":630,"background":"#fff","nodes":[
            {"type":"rect","x":0,"y":0,"width":10,"height":10,"fill":"#f00"},
            {"type":"text","x":1,"y":2,"text":"Hi","font":{"family":"Inter"},"size":32}
        ]}"##;
        let tree: LayoutTree = serde_json::from_str(json).unwrap();
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.fonts_used()[0].weight, 400);
        assert!(!tree.is_empty());
        assert!(LayoutTree::new(0, 10).is_empty());
    }
}
