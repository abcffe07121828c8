//! Font Asset Resolver
//!
//! Supplies font bytes to the Typeset step. Where the bytes come from is a
//! function of the request's [`RuntimeEnv`] alone (see [`FontAssetResolver::plan`]):
//!
//! - development: the remote provider, so font config edits show up without a rebuild
//! - production: the bundled copy, then the provider
//! - edge with an asset binding: the binding only
//! - edge without one: a plain HTTP fetch of the same public path
//!
//! Whatever the source, bytes that look like an HTML page are rejected.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::env::{Platform, RuntimeEnv};
use crate::fetch::AssetFetcher;
use crate::once_map::OnceMap;
use crate::{Error, Result};

/// Legacy UA for which font CSS endpoints answer with TrueType URLs
const TTF_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; U; Intel Mac OS X 10_6_8; de-at) AppleWebKit/533.21.1 (KHTML, like Gecko) Version/5.0.5 Safari/533.21.1";

/// How many leading bytes are inspected for an HTML signature
const SNIFF_LEN: usize = 15;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
}

fn default_weight() -> u16 {
    400
}

/// A font face referenced by the layout tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FontRef {
    pub family: String,
    #[serde(default = "default_weight")]
    pub weight: u16,
    #[serde(default)]
    pub style: FontStyle,
}

impl FontRef {
    pub fn new(family: impl Into<String>, weight: u16) -> Self {
        Self {
            family: family.into(),
            weight,
            style: FontStyle::Normal,
        }
    }

    pub fn italic(mut self) -> Self {
        self.style = FontStyle::Italic;
        self
    }
}

impl fmt::Display for FontRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family, self.weight)?;
        if self.style == FontStyle::Italic {
            f.write_str(" italic")?;
        }
        Ok(())
    }
}

/// Where a face can be found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontAsset {
    pub family: String,
    pub weight: u16,
    pub style: FontStyle,
    /// Provider CSS lookup URL (remote fallback)
    pub source_url: String,
    /// File name of the cached/bundled copy
    pub local_path: String,
}

impl FontAsset {
    pub fn new(font: &FontRef, css_endpoint: &str) -> Self {
        let ital = if font.style == FontStyle::Italic { 1 } else { 0 };
        let source_url = format!(
            "{}?family={}:ital,wght@{},{}",
            css_endpoint,
            font.family.trim().replace(' ', "+"),
            ital,
            font.weight
        );
        let slug: String = font
            .family
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let style = match font.style {
            FontStyle::Normal => "normal",
            FontStyle::Italic => "italic",
        };
        Self {
            family: font.family.clone(),
            weight: font.weight,
            style: font.style,
            source_url,
            local_path: format!("{}-{}-{}.ttf", slug, font.weight, style),
        }
    }

    /// Path under which the face is served as a static asset.
    pub fn public_path(&self) -> String {
        format!("fonts/{}", self.local_path)
    }
}

/// Supplies bytes for a font reference; handed to Typeset bindings
#[async_trait]
pub trait FontLoader: Send + Sync {
    async fn load(&self, font: &FontRef) -> Result<Arc<Vec<u8>>>;
}

/// An edge platform's dedicated static-asset binding
#[async_trait]
pub trait AssetBinding: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// True when the leading bytes carry an HTML signature.
pub fn looks_like_html(bytes: &[u8]) -> bool {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = (start + SNIFF_LEN).min(bytes.len());
    let prefix = String::from_utf8_lossy(&bytes[start..end]).to_ascii_lowercase();
    prefix.starts_with("<!doctype html") || prefix.starts_with("<html")
}

/// Accept `bytes` as font data for `font`, or explain why not.
pub fn validate_font_bytes(font: &FontRef, source: &str, bytes: Vec<u8>) -> Result<Vec<u8>> {
    if bytes.is_empty() || looks_like_html(&bytes) {
        return Err(Error::InvalidFontData {
            family: font.family.clone(),
            source_url: source.to_string(),
        });
    }
    Ok(bytes)
}

fn src_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"src:\s*url\(\s*['"]?([^'")]+)['"]?\s*\)(?:\s*format\(\s*['"]?([\w-]+)['"]?\s*\))?"#)
            .expect("static src regex")
    })
}

/// Pull the first TrueType/OpenType `src: url(...)` out of font-face CSS.
///
/// WOFF/WOFF2 entries are skipped: the Typeset step can only read sfnt data.
pub fn parse_css_font_url(css: &str) -> Option<String> {
    src_url_re().captures_iter(css).find_map(|caps| {
        let url = caps.get(1)?.as_str().trim();
        let usable = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
            Some(format) => format == "truetype" || format == "opentype",
            None => {
                let lower = url.to_ascii_lowercase();
                lower.ends_with(".ttf") || lower.ends_with(".otf")
            }
        };
        usable.then(|| url.to_string())
    })
}

/// One place the resolver can read a face from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontSource {
    Bundled,
    Provider,
    AssetBinding,
    PublicHttp,
}

/// Where fonts live, independent of the environment
#[derive(Debug, Clone)]
pub struct FontSourceConfig {
    pub font_dir: PathBuf,
    pub public_base_url: Option<String>,
    pub css_endpoint: String,
}

pub struct FontAssetResolver {
    config: FontSourceConfig,
    fetcher: Arc<dyn AssetFetcher>,
    binding: Option<Arc<dyn AssetBinding>>,
    preloaded: RwLock<HashMap<FontRef, Arc<Vec<u8>>>>,
    // Keyed by env too: the same face may come from different sources.
    cache: OnceMap<(RuntimeEnv, FontRef), Arc<Vec<u8>>>,
}

impl FontAssetResolver {
    pub fn new(config: FontSourceConfig, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            config,
            fetcher,
            binding: None,
            preloaded: RwLock::new(HashMap::new()),
            cache: OnceMap::new(),
        }
    }

    pub fn with_asset_binding(mut self, binding: Arc<dyn AssetBinding>) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Sources to try, in order, for `env`.
    pub fn plan(&self, env: &RuntimeEnv) -> Vec<FontSource> {
        match (env.platform, self.binding.is_some()) {
            (Platform::Edge, true) => vec![FontSource::AssetBinding],
            (Platform::Edge, false) => vec![FontSource::PublicHttp],
            _ if env.is_dev() => vec![FontSource::Provider],
            (Platform::Browser, _) => vec![FontSource::PublicHttp, FontSource::Provider],
            (Platform::Server, _) => vec![FontSource::Bundled, FontSource::Provider],
        }
    }

    /// Register bytes for a face up front, for every environment. They are
    /// validated like any other source.
    pub async fn preload(&self, font: FontRef, bytes: Vec<u8>) -> Result<()> {
        let bytes = Arc::new(validate_font_bytes(&font, "preload", bytes)?);
        self.preloaded
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(font, bytes);
        Ok(())
    }

    /// Drop every resolved and preloaded face.
    pub fn clear(&self) {
        self.preloaded.write().unwrap_or_else(|p| p.into_inner()).clear();
        self.cache.clear();
    }

    /// Full, validated bytes for `font` as sourced under `env`, or an error.
    /// Never partial.
    pub async fn resolve(&self, env: &RuntimeEnv, font: &FontRef) -> Result<Arc<Vec<u8>>> {
        let preloaded = self
            .preloaded
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(font)
            .cloned();
        if let Some(bytes) = preloaded {
            return Ok(bytes);
        }
        self.cache
            .get_or_try_init((*env, font.clone()), || async {
                self.resolve_uncached(env, font).await.map(Arc::new)
            })
            .await
    }

    /// A [`FontLoader`] that resolves every face under `env`.
    pub fn scoped(&self, env: RuntimeEnv) -> ScopedFonts<'_> {
        ScopedFonts { resolver: self, env }
    }

    async fn resolve_uncached(&self, env: &RuntimeEnv, font: &FontRef) -> Result<Vec<u8>> {
        let asset = FontAsset::new(font, &self.config.css_endpoint);
        let mut last_invalid = None;
        let mut failures = Vec::new();

        for source in self.plan(env) {
            match self.read(source, font, &asset).await {
                Ok(bytes) => {
                    log::debug!("font {} resolved from {:?} ({} bytes)", font, source, bytes.len());
                    return Ok(bytes);
                }
                Err(e @ Error::InvalidFontData { .. }) => {
                    log::warn!("font {} from {:?}: {}", font, source, e);
                    failures.push(format!("{:?}: {}", source, e));
                    last_invalid = Some(e);
                }
                Err(e) if e.is_recoverable() || matches!(e, Error::Network(_) | Error::Io(_)) => {
                    log::debug!("font {} from {:?}: {}", font, source, e);
                    failures.push(format!("{:?}: {}", source, e));
                }
                Err(e) => return Err(e),
            }
        }

        match last_invalid {
            Some(e) => Err(e),
            None => Err(Error::FontUnavailable(format!("{} ({})", font, failures.join("; ")))),
        }
    }

    async fn read(&self, source: FontSource, font: &FontRef, asset: &FontAsset) -> Result<Vec<u8>> {
        match source {
            FontSource::Bundled => {
                let path = self.config.font_dir.join(&asset.local_path);
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| Error::Unavailable(format!("{}: {}", path.display(), e)))?;
                validate_font_bytes(font, &path.display().to_string(), bytes)
            }
            FontSource::AssetBinding => {
                let binding = self
                    .binding
                    .as_ref()
                    .ok_or_else(|| Error::Unavailable("no asset binding".into()))?;
                let path = asset.public_path();
                let bytes = binding.fetch(&path).await?;
                validate_font_bytes(font, &path, bytes)
            }
            FontSource::PublicHttp => {
                let base = self
                    .config
                    .public_base_url
                    .as_deref()
                    .ok_or_else(|| Error::Unavailable("no public base URL configured".into()))?;
                let url = format!("{}/{}", base.trim_end_matches('/'), asset.public_path());
                let fetched = self.fetcher.get(&url, None).await?;
                validate_font_bytes(font, &url, fetched.body)
            }
            FontSource::Provider => {
                let css = self.fetcher.get(&asset.source_url, Some(TTF_USER_AGENT)).await?;
                let css_text = String::from_utf8_lossy(&css.body);
                let url = parse_css_font_url(&css_text).ok_or_else(|| {
                    Error::Unavailable(format!("no TrueType src in CSS from {}", asset.source_url))
                })?;
                let fetched = self.fetcher.get(&url, None).await?;
                validate_font_bytes(font, &url, fetched.body)
            }
        }
    }
}

/// Font resolution pinned to one environment
pub struct ScopedFonts<'a> {
    resolver: &'a FontAssetResolver,
    env: RuntimeEnv,
}

#[async_trait]
impl FontLoader for ScopedFonts<'_> {
    async fn load(&self, font: &FontRef) -> Result<Arc<Vec<u8>>> {
        self.resolver.resolve(&self.env, font).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Deployment;
    use crate::fetch::Fetched;

    struct Offline;

    #[async_trait]
    impl AssetFetcher for Offline {
        async fn get(&self, url: &str, _ua: Option<&str>) -> Result<Fetched> {
            Err(Error::Network(format!("offline: {}", url)))
        }
    }

    fn resolver() -> FontAssetResolver {
        FontAssetResolver::new(
            FontSourceConfig {
                font_dir: PathBuf::from("/nonexistent"),
                public_base_url: None,
                css_endpoint: "https://fonts.test/css2".into(),
            },
            Arc::new(Offline),
        )
    }

    #[test]
    fn html_sniffing_is_case_insensitive() {
        assert!(looks_like_html(b"<!DOCTYPE html><html>"));
        assert!(looks_like_html(b"\n  <HTML lang=en>"));
        assert!(!looks_like_html(b"\x00\x01\x00\x00\x00\x12"));
        assert!(!looks_like_html(b"OTTO"));
        assert!(looks_like_html(b"\xEF\xBB\xBF<!doctype html>"));
        assert!(looks_like_html(b"\xEF\xBB\xBF\r\n<html>"));
    }

    #[test]
    fn css_src_prefers_truetype() {
        let css = r#"@font-face {
  font-family: 'Inter';
  src: url(https://fonts.test/a.woff2) format('woff2');
}
@font-face {
  src: url(https://fonts.test/inter.ttf) format('truetype');
}"#;
        assert_eq!(parse_css_font_url(css).as_deref(), Some("https://fonts.test/inter.ttf"));
        assert_eq!(parse_css_font_url("src: url(x.woff2) format('woff2');"), None);
        assert_eq!(parse_css_font_url("src: url('y.otf');").as_deref(), Some("y.otf"));
    }

    #[test]
    fn asset_naming() {
        let a = FontAsset::new(&FontRef::new("Noto Sans", 700).italic(), "https://fonts.test/css2");
        assert_eq!(a.source_url, "https://fonts.test/css2?family=Noto+Sans:ital,wght@1,700");
        assert_eq!(a.local_path, "noto-sans-700-italic.ttf");
        assert_eq!(a.public_path(), "fonts/noto-sans-700-italic.ttf");
    }

    #[test]
    fn plan_is_a_function_of_env() {
        use FontSource::*;
        let r = resolver();
        assert_eq!(r.plan(&RuntimeEnv::new(Platform::Server, Deployment::Development)), vec![Provider]);
        assert_eq!(r.plan(&RuntimeEnv::new(Platform::Server, Deployment::Production)), vec![Bundled, Provider]);
        assert_eq!(r.plan(&RuntimeEnv::new(Platform::Edge, Deployment::Development)), vec![PublicHttp]);
    }

    #[tokio::test]
    async fn exhausted_sources_report_unavailable() {
        let r = resolver();
        let err = r.resolve(&RuntimeEnv::default(), &FontRef::new("Inter", 400)).await.unwrap_err();
        assert!(matches!(err, Error::FontUnavailable(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn preload_short_circuits_sources() {
        let r = resolver();
        let font = FontRef::new("Inter", 400);
        r.preload(font.clone(), vec![0, 1, 0, 0, 9]).await.unwrap();
        assert_eq!(*r.resolve(&RuntimeEnv::default(), &font).await.unwrap(), vec![0, 1, 0, 0, 9]);
        let edge = RuntimeEnv::new(Platform::Edge, Deployment::Production);
        assert_eq!(*r.scoped(edge).load(&font).await.unwrap(), vec![0, 1, 0, 0, 9]);
        assert!(r.preload(font, b"<html></html>".to_vec()).await.is_err());
    }
}
