//! WASM-backed Typeset and Rasterize candidates
//!
//! Payloads cross the module boundary as JSON; output is raw SVG text or PNG
//! bytes (see [`WasmExports::call_bytes`](crate::wasm::WasmExports::call_bytes)).

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as Base64Engine;
use serde::Serialize;

use crate::capability::{Binding, Candidate, CandidateKind, Capability, Probe, Rasterizer, Typesetter};
use crate::env::RuntimeEnv;
use crate::fonts::{FontLoader, FontRef};
use crate::rendering::{LayoutTree, RasterOptions, PNG_SIGNATURE};
use crate::wasm::{WasmLoader, WasmModule, WasmSource};
use crate::{Error, Result};

pub const TYPESET_ENTRY: &str = "typeset";
pub const RASTERIZE_ENTRY: &str = "rasterize";

const REQUIRED_EXPORTS: [&str; 2] = ["memory", "alloc"];

/// One WASM source for one capability
pub struct WasmCandidate {
    name: String,
    capability: Capability,
    kind: CandidateKind,
    source: WasmSource,
    loader: Arc<WasmLoader>,
}

impl WasmCandidate {
    /// `capability` must be Typeset or Rasterize.
    pub fn new(capability: Capability, source: WasmSource, loader: Arc<WasmLoader>) -> Self {
        let kind = match &source {
            WasmSource::Bundled { .. } => CandidateKind::WasmBundled,
            WasmSource::Filesystem(_) => CandidateKind::WasmFilesystem,
            WasmSource::Remote(_) => CandidateKind::WasmRemote,
        };
        Self {
            name: kind.to_string(),
            capability,
            kind,
            source,
            loader,
        }
    }

    fn entry(&self) -> &'static str {
        match self.capability {
            Capability::Rasterize => RASTERIZE_ENTRY,
            _ => TYPESET_ENTRY,
        }
    }
}

#[async_trait]
impl Candidate for WasmCandidate {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn kind(&self) -> CandidateKind {
        self.kind
    }

    /// Only local bytes can be confirmed without fetching.
    async fn probe(&self, _env: &RuntimeEnv) -> Probe {
        if self.loader.is_loaded(&self.source) {
            return Probe::Available;
        }
        match &self.source {
            WasmSource::Bundled { bytes: Some(_), .. } => Probe::Available,
            WasmSource::Filesystem(pkg) if self.loader.local_path(pkg).is_some() => Probe::Available,
            _ => Probe::Unknown,
        }
    }

    async fn activate(&self, _env: &RuntimeEnv) -> Result<Binding> {
        if self.capability == Capability::Screenshot {
            return Err(Error::Unavailable("WASM modules cannot take screenshots".into()));
        }

        let module = self.loader.load(&self.source).await?;
        let entry = self.entry();
        for export in REQUIRED_EXPORTS.iter().chain(std::iter::once(&entry)) {
            if !module.exports.has(export) {
                return Err(Error::Unavailable(format!(
                    "{} does not export '{}' (has {:?})",
                    module.identity,
                    export,
                    module.exports.names()
                )));
            }
        }
        log::debug!("{} bound to {} ({} bytes, sha256 {})", self.name, module.identity, module.byte_len, module.digest);

        Ok(match self.capability {
            Capability::Typeset => Binding::Typeset(Arc::new(WasmTypesetter { module })),
            _ => Binding::Rasterize(Arc::new(WasmRasterizer { module })),
        })
    }
}

async fn call(module: &Arc<WasmModule>, entry: &'static str, input: Vec<u8>) -> Result<Vec<u8>> {
    let module = module.clone();
    tokio::task::spawn_blocking(move || module.exports.call_bytes(entry, &input))
        .await
        .map_err(|e| Error::Other(format!("wasm call task failed: {}", e)))?
}

#[derive(Serialize)]
struct TypesetFont<'a> {
    #[serde(flatten)]
    font: &'a FontRef,
    /// Base64 font file
    data: String,
}

#[derive(Serialize)]
struct TypesetRequest<'a> {
    tree: &'a LayoutTree,
    fonts: Vec<TypesetFont<'a>>,
}

pub struct WasmTypesetter {
    module: Arc<WasmModule>,
}

#[async_trait]
impl Typesetter for WasmTypesetter {
    async fn typeset(&self, tree: &LayoutTree, fonts: &dyn FontLoader) -> Result<String> {
        tree.validate()?;
        let used = tree.fonts_used();
        let loaded = futures::future::try_join_all(used.iter().map(|f| fonts.load(f))).await?;

        let request = TypesetRequest {
            tree,
            fonts: used
                .iter()
                .zip(loaded)
                .map(|(font, bytes)| TypesetFont {
                    font,
                    data: base64::engine::general_purpose::STANDARD.encode(bytes.as_slice()),
                })
                .collect(),
        };
        let input = serde_json::to_vec(&request)?;
        let out = call(&self.module, TYPESET_ENTRY, input).await?;
        String::from_utf8(out).map_err(|_| Error::Render("wasm typeset returned non-UTF-8 SVG".into()))
    }
}

#[derive(Serialize)]
struct RasterRequest<'a> {
    svg: &'a str,
    options: &'a RasterOptions,
}

pub struct WasmRasterizer {
    module: Arc<WasmModule>,
}

#[async_trait]
impl Rasterizer for WasmRasterizer {
    async fn rasterize(&self, svg: &[u8], options: &RasterOptions) -> Result<Vec<u8>> {
        let svg = std::str::from_utf8(svg).map_err(|_| Error::Render("SVG input is not UTF-8".into()))?;
        let input = serde_json::to_vec(&RasterRequest { svg, options })?;
        let png = call(&self.module, RASTERIZE_ENTRY, input).await?;
        if !png.starts_with(PNG_SIGNATURE) {
            return Err(Error::Render("wasm rasterize returned something other than a PNG".into()));
        }
        Ok(png)
    }
}
