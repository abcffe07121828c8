//! Built-in candidates and the default priority order
//!
//! | capability | order |
//! |---|---|
//! | Typeset | native, wasm-bundled, wasm-filesystem, wasm-remote |
//! | Rasterize | native, wasm-bundled, wasm-filesystem, wasm-remote |
//! | Screenshot | cdp, cli |
//!
//! Entries compiled out by features are skipped. WASM entries appear only
//! when the matching package is configured.

#[cfg(feature = "native")]
pub mod native;
pub mod screenshot;
#[cfg(feature = "wasm")]
pub mod wasm;

use std::sync::Arc;

use crate::browser::BrowserProcessManager;
use crate::capability::BindingRegistry;
#[cfg(feature = "wasm")]
use crate::capability::Capability;
#[cfg(feature = "wasm")]
use crate::WasmPackage;

/// Ingredients for the default registry
#[derive(Default)]
pub struct BackendSet {
    #[cfg(feature = "wasm")]
    pub loader: Option<Arc<crate::wasm::WasmLoader>>,
    #[cfg(feature = "wasm")]
    pub typeset_wasm: Option<WasmPackage>,
    #[cfg(feature = "wasm")]
    pub raster_wasm: Option<WasmPackage>,
    /// Host-embedded module bytes, keyed by capability
    #[cfg(feature = "wasm")]
    pub bundled: Vec<(Capability, Arc<[u8]>)>,
    /// Screenshot managers, highest priority first
    pub browsers: Vec<Arc<BrowserProcessManager>>,
}

#[cfg(feature = "wasm")]
fn register_wasm(
    registry: &mut BindingRegistry,
    set: &BackendSet,
    capability: Capability,
    pkg: Option<&WasmPackage>,
) {
    use crate::wasm::WasmSource;

    let (Some(loader), Some(pkg)) = (set.loader.as_ref(), pkg) else {
        return;
    };
    let bytes = set
        .bundled
        .iter()
        .find(|(c, _)| *c == capability)
        .map(|(_, b)| b.clone());

    let sources = [
        WasmSource::Bundled {
            package: pkg.clone(),
            bytes,
        },
        WasmSource::Filesystem(pkg.clone()),
        WasmSource::Remote(loader.mirror_url(pkg)),
    ];
    for source in sources {
        registry.register(Arc::new(wasm::WasmCandidate::new(capability, source, loader.clone())));
    }
}

/// Registry with every built-in candidate this build and configuration provide.
pub fn default_registry(set: &BackendSet) -> BindingRegistry {
    let mut registry = BindingRegistry::new();

    #[cfg(feature = "native")]
    {
        registry.register(Arc::new(native::NativeTypesetCandidate));
        registry.register(Arc::new(native::NativeRasterCandidate));
    }

    #[cfg(feature = "wasm")]
    {
        register_wasm(&mut registry, set, Capability::Typeset, set.typeset_wasm.as_ref());
        register_wasm(&mut registry, set, Capability::Rasterize, set.raster_wasm.as_ref());
    }

    for manager in &set.browsers {
        registry.register(Arc::new(screenshot::BrowserCandidate::new(manager.clone())));
    }

    registry
}
