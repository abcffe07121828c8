//! Resolve image references in SVG against an http(s) base URL
//!
//! Rasterizers only see local files, so remote and base-relative `href`s
//! are fetched up front and rewritten as data URIs.

use std::sync::OnceLock;

use base64::Engine as Base64Engine;
use regex::Regex;
use url::Url;

use crate::fetch::AssetFetcher;
use crate::Result;

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"((?:xlink:)?href\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("static href regex")
    })
}

/// `Some(url)` for references that need fetching; `None` for fragments,
/// data URIs and references that stay local.
fn remote_target(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("data:") {
        return None;
    }
    let resolved = base.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

fn guess_mime(url: &Url) -> &'static str {
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".svg") {
        "image/svg+xml"
    } else {
        "application/octet-stream"
    }
}

/// Fetch every remote image reference and inline it. References that fail
/// to fetch are left untouched; the rasterizer then skips that image.
pub async fn inline_remote_images(svg: &str, base: &Url, fetcher: &dyn AssetFetcher) -> Result<String> {
    let mut out = String::with_capacity(svg.len());
    let mut last = 0;

    for caps in href_re().captures_iter(svg) {
        let whole = caps.get(0).expect("group 0 always matches");
        let value = match caps.get(2).or_else(|| caps.get(3)) {
            Some(v) => v.as_str(),
            None => continue,
        };
        let Some(target) = remote_target(base, value) else {
            continue;
        };

        match fetcher.get(target.as_str(), None).await {
            Ok(fetched) => {
                let mime = fetched
                    .content_type
                    .as_deref()
                    .and_then(|ct| ct.split(';').next())
                    .filter(|ct| ct.starts_with("image/"))
                    .unwrap_or_else(|| guess_mime(&target))
                    .to_string();
                let encoded = base64::engine::general_purpose::STANDARD.encode(&fetched.body);
                out.push_str(&svg[last..whole.start()]);
                out.push_str(&caps[1]);
                out.push_str(&format!("\"data:{};base64,{}\"", mime, encoded));
                last = whole.end();
            }
            Err(e) => log::warn!("image {} not inlined: {}", target, e),
        }
    }

    out.push_str(&svg[last..]);
    Ok(out)
}
