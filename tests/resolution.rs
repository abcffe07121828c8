#![cfg(all(feature = "wasm", feature = "native"))]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ogrender::backends::native::NativeRasterCandidate;
use ogrender::backends::wasm::WasmCandidate;
use ogrender::capability::Typesetter;
use ogrender::env::{Compatibility, Deployment, Platform};
use ogrender::fetch::HttpFetcher;
use ogrender::fonts::FontLoader;
use ogrender::rendering::{LayoutNode, LayoutTree};
use ogrender::wasm::{WasmLoader, WasmSource};
use ogrender::{
    Binding, BindingRegistry, Candidate, CandidateKind, Capability, CapabilityResolver, Error, Probe, RenderPipeline,
    RendererConfig, Result, RuntimeEnv, WasmPackage,
};

/// A native typesetter that is never installed
struct MissingNative;

#[async_trait]
impl Candidate for MissingNative {
    fn name(&self) -> &str {
        "native"
    }
    fn capability(&self) -> Capability {
        Capability::Typeset
    }
    fn kind(&self) -> CandidateKind {
        CandidateKind::Native
    }
    async fn probe(&self, _env: &RuntimeEnv) -> Probe {
        Probe::Unavailable("native addon not installed".into())
    }
    async fn activate(&self, _env: &RuntimeEnv) -> Result<Binding> {
        panic!("probe said unavailable");
    }
}

fn pkg() -> WasmPackage {
    WasmPackage {
        package: "@og/typeset".into(),
        version: "0.3.0".into(),
        path: "typeset.wasm".into(),
    }
}

#[tokio::test]
async fn falls_back_to_remote_wasm_when_native_and_bundled_fail() {
    let server = common::serve(|_, path| match path {
        "/typeset.wasm" => Some((200, "application/wasm", common::TYPESET_WAT.as_bytes().to_vec())),
        _ => None,
    });
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(5)).unwrap());
    let loader = Arc::new(WasmLoader::new(fetcher.clone(), Vec::new(), server.base.clone()));

    let registry = BindingRegistry::new()
        .with(Arc::new(MissingNative))
        .with(Arc::new(WasmCandidate::new(
            Capability::Typeset,
            WasmSource::Bundled {
                package: pkg(),
                bytes: Some(Arc::from(&b"definitely not wasm"[..])),
            },
            loader.clone(),
        )))
        .with(Arc::new(WasmCandidate::new(
            Capability::Typeset,
            WasmSource::Remote(server.url("typeset.wasm")),
            loader.clone(),
        )));

    let pipeline = RenderPipeline::builder(RendererConfig::default())
        .env(RuntimeEnv::default())
        .fetcher(fetcher)
        .registry(registry)
        .build()
        .unwrap();

    let tree = LayoutTree::new(4, 2).push(LayoutNode::Rect {
        x: 0.0,
        y: 0.0,
        width: 4.0,
        height: 2.0,
        fill: None,
        radius: 0.0,
    });
    let out = pipeline.render_vector(&tree).await.unwrap();
    assert_eq!(out.mime.as_str(), "image/svg+xml");
    assert!(String::from_utf8(out.bytes).unwrap().starts_with("<svg"));

    let resolved = pipeline
        .resolver()
        .cached(Capability::Typeset, pipeline.env())
        .expect("typeset binding cached");
    assert_eq!(resolved.name, "wasm-remote");
    assert_eq!(resolved.kind, CandidateKind::WasmRemote);
    assert_eq!(server.hits("/typeset.wasm"), 1);
}

/// Counts activations; each one takes a while so concurrent callers overlap
struct SlowCandidate {
    activations: AtomicUsize,
}

struct NoopTypesetter;

#[async_trait]
impl Typesetter for NoopTypesetter {
    async fn typeset(&self, _tree: &LayoutTree, _fonts: &dyn FontLoader) -> Result<String> {
        Ok("<svg/>".into())
    }
}

#[async_trait]
impl Candidate for SlowCandidate {
    fn name(&self) -> &str {
        "slow"
    }
    fn capability(&self) -> Capability {
        Capability::Typeset
    }
    fn kind(&self) -> CandidateKind {
        CandidateKind::WasmBundled
    }
    async fn activate(&self, _env: &RuntimeEnv) -> Result<Binding> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Binding::Typeset(Arc::new(NoopTypesetter)))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_activates_once() {
    let slow = Arc::new(SlowCandidate {
        activations: AtomicUsize::new(0),
    });
    let resolver = Arc::new(CapabilityResolver::new(
        BindingRegistry::new().with(slow.clone()),
        Compatibility::default(),
    ));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(Capability::Typeset, &RuntimeEnv::default()).await })
        })
        .collect();

    let mut bindings = Vec::new();
    for t in tasks {
        bindings.push(t.await.unwrap().unwrap());
    }
    assert_eq!(slow.activations.load(Ordering::SeqCst), 1);
    assert!(bindings.iter().all(|b| Arc::ptr_eq(b, &bindings[0])));
}

#[tokio::test]
async fn environments_resolve_independently() {
    let registry = BindingRegistry::new().with(Arc::new(NativeRasterCandidate));
    let resolver = CapabilityResolver::new(registry, Compatibility::default());

    let server = RuntimeEnv::default();
    let edge = RuntimeEnv::new(Platform::Edge, Deployment::Production);

    assert!(resolver.resolve(Capability::Rasterize, &server).await.is_ok());
    match resolver.resolve(Capability::Rasterize, &edge).await {
        Err(Error::NoCandidate { capability, attempts }) => {
            assert_eq!(capability, Capability::Rasterize);
            assert_eq!(attempts[0].candidate, "native");
        }
        other => panic!("edge must not use native: {:?}", other.map(|b| b.name.clone())),
    }
    assert!(resolver.cached(Capability::Rasterize, &server).is_some());
    assert!(resolver.cached(Capability::Rasterize, &edge).is_none());
}

#[tokio::test]
async fn compatibility_override_can_force_wasm_on_server() {
    let config: RendererConfig = serde_json::from_str(
        r#"{"compatibility": [{"platform": "server", "capability": "rasterize", "kinds": ["wasm-remote"]}]}"#,
    )
    .unwrap();
    let pipeline = RenderPipeline::builder(config)
        .env(RuntimeEnv::default())
        .build()
        .unwrap();

    let err = pipeline
        .render_raster(b"<svg xmlns='http://www.w3.org/2000/svg' width='2' height='2'/>", &Default::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("native (native disabled by compatibility on server)"));
}

#[tokio::test]
async fn one_pipeline_serves_server_and_edge_requests() {
    let config = RendererConfig {
        typeset_wasm: Some(pkg()),
        ..RendererConfig::default()
    };
    let pipeline = RenderPipeline::builder(config)
        .env(RuntimeEnv::default())
        .bundled_wasm(Capability::Typeset, common::TYPESET_WAT.as_bytes().to_vec())
        .build()
        .unwrap();

    let tree = serde_json::json!({ "width": 4, "height": 2 });
    let server: ogrender::RenderRequest =
        serde_json::from_value(serde_json::json!({ "kind": "vector", "tree": tree.clone() })).unwrap();
    let edge: ogrender::RenderRequest = serde_json::from_value(serde_json::json!({
        "kind": "vector",
        "tree": tree,
        "env": { "platform": "edge", "deployment": "production" },
    }))
    .unwrap();

    pipeline.render(server).await.unwrap();
    pipeline.render(edge).await.unwrap();

    let resolver = pipeline.resolver();
    let on_server = resolver.cached(Capability::Typeset, &RuntimeEnv::default()).unwrap();
    let on_edge = resolver
        .cached(Capability::Typeset, &RuntimeEnv::new(Platform::Edge, Deployment::Production))
        .unwrap();
    assert_eq!(on_server.kind, CandidateKind::Native);
    assert_eq!(on_edge.kind, CandidateKind::WasmBundled);
}
