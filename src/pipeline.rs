//! Render Pipeline
//!
//! The entry point for render requests. Each request names the capability it
//! needs and may carry the runtime environment it was made in; the pipeline
//! asks the resolver for the binding under that environment, feeds it the
//! input and tags the output with its MIME type.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::backends::{default_registry, BackendSet};
use crate::browser::cli::CliLauncher;
use crate::browser::{BrowserFinder, BrowserProcessManager, InstallReport};
use crate::capability::{BindingRegistry, Capability};
use crate::env::{Compatibility, RuntimeEnv};
use crate::fetch::{AssetFetcher, HttpFetcher};
use crate::fonts::{AssetBinding, FontAssetResolver, FontSourceConfig};
use crate::rendering::images::inline_remote_images;
use crate::rendering::{minimal_svg, LayoutTree, RasterOptions};
use crate::resolver::CapabilityResolver;
use crate::{Error, MimeKind, RenderOutput, RendererConfig, Result, ScreenshotTarget, Viewport};

/// One unit of work for [`RenderPipeline::render`]
///
/// `env` tags the request with the environment it runs under; without it the
/// pipeline's own environment applies.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RenderRequest {
    /// Layout tree to SVG
    Vector {
        tree: LayoutTree,
        #[serde(default)]
        env: Option<RuntimeEnv>,
    },
    /// Layout tree or SVG text to PNG
    Raster {
        #[serde(default)]
        tree: Option<LayoutTree>,
        #[serde(default)]
        svg: Option<String>,
        #[serde(default)]
        options: RasterOptions,
        #[serde(default)]
        env: Option<RuntimeEnv>,
    },
    /// Page to PNG through a headless browser
    Screenshot {
        target: ScreenshotTarget,
        #[serde(default)]
        viewport: Option<Viewport>,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        env: Option<RuntimeEnv>,
    },
}

impl RenderRequest {
    pub fn env(&self) -> Option<&RuntimeEnv> {
        match self {
            RenderRequest::Vector { env, .. }
            | RenderRequest::Raster { env, .. }
            | RenderRequest::Screenshot { env, .. } => env.as_ref(),
        }
    }
}

pub struct RenderPipelineBuilder {
    config: RendererConfig,
    env: Option<RuntimeEnv>,
    fetcher: Option<Arc<dyn AssetFetcher>>,
    asset_binding: Option<Arc<dyn AssetBinding>>,
    registry: Option<BindingRegistry>,
    bundled: Vec<(Capability, Arc<[u8]>)>,
}

impl RenderPipelineBuilder {
    /// Defaults to [`RuntimeEnv::detect`].
    pub fn env(mut self, env: RuntimeEnv) -> Self {
        self.env = Some(env);
        self
    }

    /// Replace the HTTP client used for WASM, fonts and remote images.
    pub fn fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Platform asset store used for fonts on edge deployments.
    pub fn asset_binding(mut self, binding: Arc<dyn AssetBinding>) -> Self {
        self.asset_binding = Some(binding);
        self
    }

    /// Use a custom candidate registry instead of the built-in one.
    pub fn registry(mut self, registry: BindingRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Module bytes embedded in the host for the `wasm-bundled` candidate.
    pub fn bundled_wasm(mut self, capability: Capability, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.bundled.push((capability, bytes.into()));
        self
    }

    pub fn build(self) -> Result<RenderPipeline> {
        let config = self.config;
        let env = self.env.unwrap_or_else(RuntimeEnv::detect);
        let fetcher: Arc<dyn AssetFetcher> = match self.fetcher {
            Some(f) => f,
            None => Arc::new(HttpFetcher::new(Duration::from_millis(config.fetch_timeout_ms))?),
        };

        let mut fonts = FontAssetResolver::new(
            FontSourceConfig {
                font_dir: config.font_dir.clone(),
                public_base_url: config.public_base_url.clone(),
                css_endpoint: config.font_css_endpoint.clone(),
            },
            fetcher.clone(),
        );
        if let Some(binding) = self.asset_binding {
            fonts = fonts.with_asset_binding(binding);
        }

        let browsers = browser_managers(&config);

        #[cfg(feature = "wasm")]
        let loader = Arc::new(crate::wasm::WasmLoader::new(
            fetcher.clone(),
            config.asset_roots.clone(),
            config.cdn_mirror.clone(),
        ));

        let registry = match self.registry {
            Some(r) => r,
            None => default_registry(&BackendSet {
                #[cfg(feature = "wasm")]
                loader: Some(loader.clone()),
                #[cfg(feature = "wasm")]
                typeset_wasm: config.typeset_wasm.clone(),
                #[cfg(feature = "wasm")]
                raster_wasm: config.raster_wasm.clone(),
                #[cfg(feature = "wasm")]
                bundled: self.bundled,
                browsers: browsers.clone(),
            }),
        };
        let compatibility = Compatibility::default().with_overrides(&config.compatibility);

        log::debug!(
            "pipeline for {} ({:?}): typeset {:?}, rasterize {:?}, screenshot {:?}",
            env.platform,
            env.deployment,
            registry.names(Capability::Typeset),
            registry.names(Capability::Rasterize),
            registry.names(Capability::Screenshot)
        );

        Ok(RenderPipeline {
            env,
            config,
            resolver: CapabilityResolver::new(registry, compatibility),
            fonts: Arc::new(fonts),
            fetcher,
            browsers,
            #[cfg(feature = "wasm")]
            loader,
        })
    }
}

fn browser_managers(config: &RendererConfig) -> Vec<Arc<BrowserProcessManager>> {
    let finder = BrowserFinder::new(config.browser_executable.clone());
    let install_timeout = Duration::from_millis(config.install_timeout_ms);
    let mut launchers: Vec<Arc<dyn crate::browser::BrowserLauncher>> = Vec::new();

    #[cfg(feature = "cdp")]
    launchers.push(Arc::new(crate::browser::cdp::CdpLauncher::new(
        finder.clone(),
        config.default_viewport,
        config.browser_args.clone(),
    )));
    launchers.push(Arc::new(CliLauncher::new(finder, config.browser_args.clone())));

    launchers
        .into_iter()
        .map(|l| Arc::new(BrowserProcessManager::new(l, config.browser_installer.clone(), install_timeout)))
        .collect()
}

pub struct RenderPipeline {
    env: RuntimeEnv,
    config: RendererConfig,
    resolver: CapabilityResolver,
    fonts: Arc<FontAssetResolver>,
    fetcher: Arc<dyn AssetFetcher>,
    browsers: Vec<Arc<BrowserProcessManager>>,
    #[cfg(feature = "wasm")]
    loader: Arc<crate::wasm::WasmLoader>,
}

impl RenderPipeline {
    pub fn builder(config: RendererConfig) -> RenderPipelineBuilder {
        RenderPipelineBuilder {
            config,
            env: None,
            fetcher: None,
            asset_binding: None,
            registry: None,
            bundled: Vec::new(),
        }
    }

    pub fn env(&self) -> &RuntimeEnv {
        &self.env
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn resolver(&self) -> &CapabilityResolver {
        &self.resolver
    }

    pub fn fonts(&self) -> &FontAssetResolver {
        &self.fonts
    }

    /// Layout tree to SVG.
    pub async fn render_vector(&self, tree: &LayoutTree) -> Result<RenderOutput> {
        self.render_vector_in(&self.env, tree).await
    }

    /// Layout tree to SVG, with backends and fonts chosen for `env`.
    pub async fn render_vector_in(&self, env: &RuntimeEnv, tree: &LayoutTree) -> Result<RenderOutput> {
        tree.validate()?;
        let typesetter = self.resolver.resolve(Capability::Typeset, env).await?.typesetter()?;
        let svg = typesetter.typeset(tree, &self.fonts.scoped(*env)).await?;
        Ok(RenderOutput {
            bytes: svg.into_bytes(),
            mime: MimeKind::Svg,
        })
    }

    /// SVG to PNG. Blank input renders as an empty image of the requested size.
    pub async fn render_raster(&self, svg: &[u8], options: &RasterOptions) -> Result<RenderOutput> {
        self.render_raster_in(&self.env, svg, options).await
    }

    pub async fn render_raster_in(
        &self,
        env: &RuntimeEnv,
        svg: &[u8],
        options: &RasterOptions,
    ) -> Result<RenderOutput> {
        let rasterizer = self.resolver.resolve(Capability::Rasterize, env).await?.rasterizer()?;

        let text = std::str::from_utf8(svg).map_err(|_| Error::Render("SVG input is not UTF-8".into()))?;
        let prepared = if text.trim().is_empty() {
            minimal_svg(options.width.unwrap_or(1), options.height.unwrap_or(1))
        } else {
            match remote_base(options) {
                Some(base) => inline_remote_images(text, &base, self.fetcher.as_ref()).await?,
                None => text.to_string(),
            }
        };

        let png = rasterizer.rasterize(prepared.as_bytes(), options).await?;
        Ok(RenderOutput {
            bytes: png,
            mime: MimeKind::Png,
        })
    }

    /// Layout tree straight to PNG, sized to the tree unless overridden.
    pub async fn render_png(&self, tree: &LayoutTree, options: &RasterOptions) -> Result<RenderOutput> {
        self.render_png_in(&self.env, tree, options).await
    }

    pub async fn render_png_in(
        &self,
        env: &RuntimeEnv,
        tree: &LayoutTree,
        options: &RasterOptions,
    ) -> Result<RenderOutput> {
        let svg = self.render_vector_in(env, tree).await?;
        self.render_raster_in(env, &svg.bytes, options).await
    }

    /// Capture a page with the headless browser.
    ///
    /// Without a usable browser this fails with [`Error::BrowserUnavailable`];
    /// a capture that overruns `timeout` fails with [`Error::Timeout`] and
    /// leaves other captures untouched.
    pub async fn render_screenshot(
        &self,
        target: &ScreenshotTarget,
        viewport: Option<Viewport>,
        timeout: Option<Duration>,
    ) -> Result<RenderOutput> {
        self.render_screenshot_in(&self.env, target, viewport, timeout).await
    }

    pub async fn render_screenshot_in(
        &self,
        env: &RuntimeEnv,
        target: &ScreenshotTarget,
        viewport: Option<Viewport>,
        timeout: Option<Duration>,
    ) -> Result<RenderOutput> {
        let viewport = viewport.unwrap_or(self.config.default_viewport);
        let timeout = timeout.unwrap_or_else(|| Duration::from_millis(self.config.screenshot_timeout_ms));

        let resolved = match self.resolver.resolve(Capability::Screenshot, env).await {
            Ok(r) => r,
            Err(Error::NoCandidate { attempts, .. }) => {
                let tried = attempts.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ");
                return Err(Error::BrowserUnavailable(if tried.is_empty() {
                    format!("no screenshot backend on {}", env.platform)
                } else {
                    tried
                }));
            }
            Err(e) => return Err(e),
        };

        let png = resolved.screenshotter()?.capture(target, viewport, timeout).await?;
        Ok(RenderOutput {
            bytes: png,
            mime: MimeKind::Png,
        })
    }

    pub async fn render(&self, request: RenderRequest) -> Result<RenderOutput> {
        let env = request.env().copied().unwrap_or(self.env);
        match request {
            RenderRequest::Vector { tree, .. } => self.render_vector_in(&env, &tree).await,
            RenderRequest::Raster { tree, svg, options, .. } => match (tree, svg) {
                (None, Some(svg)) => self.render_raster_in(&env, svg.as_bytes(), &options).await,
                (Some(tree), None) => self.render_png_in(&env, &tree, &options).await,
                (Some(_), Some(_)) => Err(Error::Config("raster request takes a tree or svg, not both".into())),
                (None, None) => self.render_raster_in(&env, b"", &options).await,
            },
            RenderRequest::Screenshot {
                target,
                viewport,
                timeout_ms,
                ..
            } => {
                self.render_screenshot_in(&env, &target, viewport, timeout_ms.map(Duration::from_millis))
                    .await
            }
        }
    }

    /// Run the browser installer, then drop any failed Screenshot resolution
    /// so the next request looks for the browser again.
    pub async fn install_browser(&self) -> InstallReport {
        let report = match self.browsers.first() {
            Some(manager) => manager.ensure_installed().await,
            None => InstallReport::default(),
        };
        self.resolver.invalidate(Capability::Screenshot);
        report
    }

    /// Forget resolved bindings, loaded modules and fonts.
    pub fn clear_caches(&self) {
        self.resolver.clear();
        self.fonts.clear();
        #[cfg(feature = "wasm")]
        self.loader.clear();
        log::info!("render caches cleared");
    }

    /// Terminate every launched browser.
    pub async fn shutdown(&self) -> Result<()> {
        for manager in &self.browsers {
            manager.shutdown().await?;
        }
        Ok(())
    }

    /// Executable that the screenshot backends would launch, if any.
    pub fn browser_executable(&self) -> Option<PathBuf> {
        BrowserFinder::new(self.config.browser_executable.clone()).find()
    }
}

fn remote_base(options: &RasterOptions) -> Option<url::Url> {
    let base = url::Url::parse(options.base_url.as_deref()?).ok()?;
    matches!(base.scheme(), "http" | "https").then_some(base)
}
