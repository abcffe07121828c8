//! WASM Loader: resolve, compile and instantiate render modules exactly once
//!
//! Sources are tried local-first (bundled bytes or a package directory under
//! one of the asset roots) and fall back to the public CDN mirror using the
//! conventional `https://<mirror>/<package>@<version>/<path>` layout. Decoded
//! modules are memoized by source identity; concurrent loads of the same
//! identity await one in-flight initialization.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use wasmtime::{Engine, Instance, Linker, Module, Store};

use crate::fetch::AssetFetcher;
use crate::once_map::OnceMap;
use crate::{Error, LoadErrorKind, Result, WasmPackage};

/// Reactor-style initializers invoked once, with no arguments, after instantiation
const INITIALIZERS: [&str; 2] = ["_initialize", "__wbindgen_start"];

/// Where a module's bytes should come from
#[derive(Debug, Clone)]
pub enum WasmSource {
    /// A package-relative file under one of the asset roots
    Filesystem(WasmPackage),
    /// Bytes embedded by the host at build time. `None` when the host was
    /// built without them, which sends the loader straight to the mirror.
    Bundled {
        package: WasmPackage,
        bytes: Option<Arc<[u8]>>,
    },
    /// An explicit URL
    Remote(String),
}

impl WasmSource {
    /// Memoization key. Two sources with the same identity share one module.
    pub fn identity(&self) -> String {
        match self {
            WasmSource::Filesystem(pkg) => format!("fs:{}", pkg),
            WasmSource::Bundled { package, .. } => format!("bundled:{}", package),
            WasmSource::Remote(url) => format!("remote:{}", url),
        }
    }
}

/// Where the bytes of a loaded module actually came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmOrigin {
    Bundled,
    Filesystem,
    Remote,
}

/// Instance plus the store it lives in
struct Live {
    store: Store<()>,
    instance: Instance,
}

/// Normalized export surface of an instantiated module
pub struct WasmExports {
    names: Vec<String>,
    live: Mutex<Live>,
}

impl WasmExports {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn has(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Call a byte-in/byte-out entry point.
    ///
    /// The input is copied into guest memory obtained from `alloc(len)`; the
    /// entry point returns `(out_ptr << 32) | out_len`, or a negative value on
    /// failure.
    pub fn call_bytes(&self, entry: &str, input: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.live.lock().unwrap_or_else(|p| p.into_inner());
        let Live { store, instance } = &mut *guard;

        let wasm_err = |what: &str, e: &dyn fmt::Display| Error::Render(format!("wasm {} '{}': {}", what, entry, e));

        let memory = instance
            .get_memory(&mut *store, "memory")
            .ok_or_else(|| Error::Render("wasm module exports no memory".into()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut *store, "alloc")
            .map_err(|e| wasm_err("alloc for", &e))?;
        let func = instance
            .get_typed_func::<(i32, i32), i64>(&mut *store, entry)
            .map_err(|e| wasm_err("lookup", &e))?;

        let len = i32::try_from(input.len()).map_err(|_| Error::Render("wasm input exceeds 2 GiB".into()))?;
        let ptr = alloc.call(&mut *store, len).map_err(|e| wasm_err("alloc for", &e))?;
        memory
            .write(&mut *store, ptr as u32 as usize, input)
            .map_err(|e| wasm_err("write for", &e))?;

        let packed = func.call(&mut *store, (ptr, len)).map_err(|e| wasm_err("call", &e))?;
        if packed < 0 {
            return Err(Error::Render(format!("wasm '{}' rejected its input (code {})", entry, packed)));
        }
        let out_ptr = (packed >> 32) as u32 as usize;
        let out_len = (packed & 0xffff_ffff) as u32 as usize;
        let mut out = vec![0u8; out_len];
        memory
            .read(&*store, out_ptr, &mut out)
            .map_err(|e| wasm_err("read for", &e))?;

        if let Ok(dealloc) = instance.get_typed_func::<(i32, i32), ()>(&mut *store, "dealloc") {
            if let Err(e) = dealloc.call(&mut *store, (ptr, len)) {
                log::debug!("wasm dealloc after '{}' failed: {}", entry, e);
            }
        }
        Ok(out)
    }
}

/// A decoded, instantiated module
pub struct WasmModule {
    pub identity: String,
    pub origin: WasmOrigin,
    pub byte_len: usize,
    /// Hex SHA-256 of the binary
    pub digest: String,
    pub exports: WasmExports,
}

impl fmt::Debug for WasmModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmModule")
            .field("identity", &self.identity)
            .field("origin", &self.origin)
            .field("byte_len", &self.byte_len)
            .field("exports", &self.exports.names)
            .finish()
    }
}

pub struct WasmLoader {
    engine: Engine,
    fetcher: Arc<dyn AssetFetcher>,
    roots: Vec<PathBuf>,
    mirror: String,
    modules: OnceMap<String, Arc<WasmModule>>,
}

impl WasmLoader {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, roots: Vec<PathBuf>, mirror: impl Into<String>) -> Self {
        Self {
            engine: Engine::default(),
            fetcher,
            roots,
            mirror: mirror.into().trim_end_matches('/').to_string(),
            modules: OnceMap::new(),
        }
    }

    /// Conventional CDN URL for a package file.
    pub fn mirror_url(&self, pkg: &WasmPackage) -> String {
        let mirror = if self.mirror.contains("://") {
            self.mirror.clone()
        } else {
            format!("https://{}", self.mirror)
        };
        format!("{}/{}@{}/{}", mirror, pkg.package, pkg.version, pkg.path.trim_start_matches('/'))
    }

    /// Path of a package file under the first asset root that has it.
    pub fn local_path(&self, pkg: &WasmPackage) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| root.join(&pkg.package).join(&pkg.path))
            .find(|p| p.is_file())
    }

    pub fn is_loaded(&self, source: &WasmSource) -> bool {
        self.modules.get(&source.identity()).is_some()
    }

    /// Forget every loaded module; the next `load` starts from scratch.
    pub fn clear(&self) {
        self.modules.clear();
    }

    /// Load (or return the memoized) module for `source`.
    pub async fn load(&self, source: &WasmSource) -> Result<Arc<WasmModule>> {
        let identity = source.identity();
        if let Some(m) = self.modules.get(&identity) {
            log::debug!("wasm cache hit for {}", identity);
            return Ok(m);
        }
        self.modules
            .get_or_try_init(identity.clone(), || async {
                let (bytes, origin) = self.read_bytes(source, &identity).await?;
                let module = self.instantiate(identity.clone(), origin, bytes).await?;
                log::info!(
                    "loaded wasm {} from {:?} ({} bytes)",
                    identity,
                    module.origin,
                    module.byte_len
                );
                Ok::<_, Error>(Arc::new(module))
            })
            .await
    }

    async fn read_bytes(&self, source: &WasmSource, identity: &str) -> Result<(Vec<u8>, WasmOrigin)> {
        let (local, pkg) = match source {
            WasmSource::Remote(url) => {
                let fetched = self.fetcher.get(url, None).await.map_err(|e| Error::Load {
                    identity: identity.to_string(),
                    kind: LoadErrorKind::Unavailable,
                    message: e.to_string(),
                })?;
                return Ok((fetched.body, WasmOrigin::Remote));
            }
            WasmSource::Bundled { package, bytes } => (
                bytes
                    .as_ref()
                    .map(|b| (b.to_vec(), WasmOrigin::Bundled))
                    .ok_or_else(|| "not bundled into this build".to_string()),
                package,
            ),
            WasmSource::Filesystem(package) => (self.read_local(package).await, package),
        };

        let local_err = match local {
            Ok(found) => return Ok(found),
            Err(e) => e,
        };

        let url = self.mirror_url(pkg);
        log::debug!("{}: local resolution failed ({}), trying {}", identity, local_err, url);
        match self.fetcher.get(&url, None).await {
            Ok(fetched) => Ok((fetched.body, WasmOrigin::Remote)),
            Err(remote_err) => Err(Error::Load {
                identity: identity.to_string(),
                kind: LoadErrorKind::Unavailable,
                message: format!("local: {}; remote: {}", local_err, remote_err),
            }),
        }
    }

    async fn read_local(&self, pkg: &WasmPackage) -> std::result::Result<(Vec<u8>, WasmOrigin), String> {
        let path = self
            .local_path(pkg)
            .ok_or_else(|| format!("{} not found under {:?}", pkg, self.roots))?;
        tokio::fs::read(&path)
            .await
            .map(|b| (b, WasmOrigin::Filesystem))
            .map_err(|e| format!("{}: {}", path.display(), e))
    }

    async fn instantiate(&self, identity: String, origin: WasmOrigin, bytes: Vec<u8>) -> Result<WasmModule> {
        let engine = self.engine.clone();
        let id = identity.clone();
        tokio::task::spawn_blocking(move || {
            let invalid = |e: anyhow::Error| Error::Load {
                identity: id.clone(),
                kind: LoadErrorKind::Invalid,
                message: format!("{:#}", e),
            };

            let module = Module::new(&engine, &bytes).map_err(invalid)?;
            let names = module.exports().map(|e| e.name().to_string()).collect::<Vec<_>>();

            let mut linker: Linker<()> = Linker::new(&engine);
            linker.define_unknown_imports_as_traps(&module).map_err(invalid)?;
            let mut store = Store::new(&engine, ());
            let instance = linker.instantiate(&mut store, &module).map_err(invalid)?;

            for init in INITIALIZERS {
                if let Some(f) = instance.get_func(&mut store, init) {
                    f.typed::<(), ()>(&store)
                        .and_then(|f| f.call(&mut store, ()))
                        .map_err(invalid)?;
                    break;
                }
            }

            Ok(WasmModule {
                identity: id.clone(),
                origin,
                byte_len: bytes.len(),
                digest: hex::encode(Sha256::digest(&bytes)),
                exports: WasmExports {
                    names,
                    live: Mutex::new(Live { store, instance }),
                },
            })
        })
        .await
        .map_err(|e| Error::Other(format!("wasm instantiate task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Fetched;
    use async_trait::async_trait;

    struct NoNetwork;

    #[async_trait]
    impl AssetFetcher for NoNetwork {
        async fn get(&self, url: &str, _ua: Option<&str>) -> Result<Fetched> {
            Err(Error::Network(format!("offline: {}", url)))
        }
    }

    fn pkg() -> WasmPackage {
        WasmPackage {
            package: "@example/render-wasm".into(),
            version: "1.2.3".into(),
            path: "dist/index.wasm".into(),
        }
    }

    #[test]
    fn mirror_url_follows_package_layout() {
        let loader = WasmLoader::new(Arc::new(NoNetwork), vec![], "cdn.jsdelivr.net/npm/");
        assert_eq!(
            loader.mirror_url(&pkg()),
            "https://cdn.jsdelivr.net/npm/@example/render-wasm@1.2.3/dist/index.wasm"
        );
    }

    #[tokio::test]
    async fn exhausted_sources_fail_as_unavailable() {
        let loader = WasmLoader::new(Arc::new(NoNetwork), vec![PathBuf::from("/nonexistent")], "mirror.test");
        let err = loader.load(&WasmSource::Filesystem(pkg())).await.unwrap_err();
        match err {
            Error::Load { kind, .. } => assert_eq!(kind, LoadErrorKind::Unavailable),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!loader.is_loaded(&WasmSource::Filesystem(pkg())));
    }

    #[tokio::test]
    async fn bundled_wat_initializes_and_echoes() {
        let wat = r#"(module
            (memory (export "memory") 1)
            (global $ready (mut i32) (i32.const 0))
            (func (export "_initialize") (global.set $ready (i32.const 1)))
            (func (export "alloc") (param i32) (result i32) (i32.const 64))
            (func (export "echo") (param $ptr i32) (param $len i32) (result i64)
              (if (result i64) (global.get $ready)
                (then (i64.or
                  (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
                  (i64.extend_i32_u (local.get $len))))
                (else (i64.const -1)))))"#;
        let loader = WasmLoader::new(Arc::new(NoNetwork), vec![], "mirror.test");
        let source = WasmSource::Bundled {
            package: pkg(),
            bytes: Some(Arc::from(wat.as_bytes())),
        };
        let module = loader.load(&source).await.unwrap();
        assert_eq!(module.origin, WasmOrigin::Bundled);
        assert!(module.exports.has("echo"));
        assert_eq!(module.exports.call_bytes("echo", b"hello").unwrap(), b"hello");
        assert_eq!(module.byte_len, wat.len());
        assert_eq!(module.digest.len(), 64);
        assert!(module.digest.bytes().all(|b| b.is_ascii_hexdigit()));

        let again = loader.load(&source).await.unwrap();
        assert!(Arc::ptr_eq(&module, &again));
    }
}
