//! Capabilities, candidate bindings and the registry that orders them
//!
//! A [`Candidate`] is one concrete implementation of a [`Capability`]. The
//! [`BindingRegistry`] keeps, per capability, the candidates in priority
//! order; the resolver walks that order and activates the first viable one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::env::RuntimeEnv;
use crate::fonts::FontLoader;
use crate::rendering::{LayoutTree, RasterOptions};
use crate::{Result, ScreenshotTarget, Viewport};

/// One of the three pluggable render steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Layout tree to SVG
    Typeset,
    /// SVG to PNG
    Rasterize,
    /// HTML page to PNG through a headless browser
    Screenshot,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Typeset, Capability::Rasterize, Capability::Screenshot];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Typeset => "typeset",
            Capability::Rasterize => "rasterize",
            Capability::Screenshot => "screenshot",
        })
    }
}

/// How a candidate is packaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateKind {
    Native,
    WasmBundled,
    WasmFilesystem,
    WasmRemote,
    ExternalProcess,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CandidateKind::Native => "native",
            CandidateKind::WasmBundled => "wasm-bundled",
            CandidateKind::WasmFilesystem => "wasm-filesystem",
            CandidateKind::WasmRemote => "wasm-remote",
            CandidateKind::ExternalProcess => "external-process",
        })
    }
}

/// Result of a side-effect free availability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Available,
    Unavailable(String),
    /// Availability can only be learned by activating
    Unknown,
}

/// Converts a layout tree into SVG markup
#[async_trait]
pub trait Typesetter: Send + Sync {
    async fn typeset(&self, tree: &LayoutTree, fonts: &dyn FontLoader) -> Result<String>;
}

/// Converts SVG markup into PNG bytes
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, svg: &[u8], options: &RasterOptions) -> Result<Vec<u8>>;
}

/// Captures a PNG of a rendered page
#[async_trait]
pub trait Screenshotter: Send + Sync {
    async fn capture(&self, target: &ScreenshotTarget, viewport: Viewport, timeout: Duration) -> Result<Vec<u8>>;
}

/// An activated, ready-to-invoke candidate
#[derive(Clone)]
pub enum Binding {
    Typeset(Arc<dyn Typesetter>),
    Rasterize(Arc<dyn Rasterizer>),
    Screenshot(Arc<dyn Screenshotter>),
}

impl Binding {
    pub fn capability(&self) -> Capability {
        match self {
            Binding::Typeset(_) => Capability::Typeset,
            Binding::Rasterize(_) => Capability::Rasterize,
            Binding::Screenshot(_) => Capability::Screenshot,
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding::{}", self.capability())
    }
}

/// A named implementation of a capability
#[async_trait]
pub trait Candidate: Send + Sync {
    /// Stable identifier used in diagnostics and the resolved binding
    fn name(&self) -> &str;

    fn capability(&self) -> Capability;

    fn kind(&self) -> CandidateKind;

    /// Cheap availability check. Candidates that cannot tell without
    /// initializing keep the default and are activated directly.
    async fn probe(&self, _env: &RuntimeEnv) -> Probe {
        Probe::Unknown
    }

    /// Perform any initialization and hand back the ready binding.
    async fn activate(&self, env: &RuntimeEnv) -> Result<Binding>;
}

/// Ordered candidate lists, one per capability
#[derive(Default, Clone)]
pub struct BindingRegistry {
    typeset: Vec<Arc<dyn Candidate>>,
    rasterize: Vec<Arc<dyn Candidate>>,
    screenshot: Vec<Arc<dyn Candidate>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate at the lowest priority of its capability.
    pub fn register(&mut self, candidate: Arc<dyn Candidate>) -> &mut Self {
        self.list_mut(candidate.capability()).push(candidate);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, candidate: Arc<dyn Candidate>) -> Self {
        self.register(candidate);
        self
    }

    /// Candidates for a capability, highest priority first.
    pub fn candidates(&self, capability: Capability) -> &[Arc<dyn Candidate>] {
        match capability {
            Capability::Typeset => &self.typeset,
            Capability::Rasterize => &self.rasterize,
            Capability::Screenshot => &self.screenshot,
        }
    }

    pub fn names(&self, capability: Capability) -> Vec<String> {
        self.candidates(capability).iter().map(|c| c.name().to_string()).collect()
    }

    fn list_mut(&mut self, capability: Capability) -> &mut Vec<Arc<dyn Candidate>> {
        match capability {
            Capability::Typeset => &mut self.typeset,
            Capability::Rasterize => &mut self.rasterize,
            Capability::Screenshot => &mut self.screenshot,
        }
    }
}
