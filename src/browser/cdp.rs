//! Chrome DevTools Protocol launcher (uses the `headless_chrome` crate)
//!
//! One long-lived browser; every screenshot opens its own tab and closes it
//! afterwards. `headless_chrome` is blocking, so calls run on the blocking pool.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions};

use super::{BrowserFinder, BrowserLauncher, BrowserSession};
use crate::{Error, Result, ScreenshotTarget, Viewport};

/// Waits for web fonts before capture. Resolves immediately where the
/// Font Loading API is missing.
const FONTS_READY: &str = "document.fonts ? document.fonts.ready.then(() => true) : true";

pub struct CdpLauncher {
    finder: BrowserFinder,
    window: Viewport,
    extra_args: Vec<String>,
}

impl CdpLauncher {
    /// `window` sizes the browser at launch; each capture resizes its own tab
    /// to the requested viewport.
    pub fn new(finder: BrowserFinder, window: Viewport, extra_args: Vec<String>) -> Self {
        Self {
            finder,
            window,
            extra_args,
        }
    }
}

#[async_trait]
impl BrowserLauncher for CdpLauncher {
    fn name(&self) -> &str {
        "cdp"
    }

    fn locate(&self) -> Option<PathBuf> {
        self.finder.find()
    }

    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let path = self
            .locate()
            .ok_or_else(|| Error::BrowserUnavailable("no Chrome/Chromium executable found".into()))?;
        let window = self.window;
        let extra_args = self.extra_args.clone();

        let browser = tokio::task::spawn_blocking(move || {
            let args: Vec<&OsStr> = extra_args.iter().map(OsStr::new).collect();
            let launch_options = LaunchOptions::default_builder()
                .headless(true)
                .path(Some(path))
                .window_size(Some((window.width, window.height)))
                .idle_browser_timeout(Duration::from_secs(24 * 60 * 60))
                .args(args)
                .build()
                .map_err(|e| Error::Process(format!("Failed to build launch options: {}", e)))?;

            Browser::new(launch_options).map_err(|e| Error::Process(format!("Failed to launch browser: {}", e)))
        })
        .await
        .map_err(|e| Error::Other(format!("browser launch task failed: {}", e)))??;

        Ok(Box::new(CdpSession {
            browser: Mutex::new(Some(Arc::new(browser))),
        }))
    }
}

pub struct CdpSession {
    browser: Mutex<Option<Arc<Browser>>>,
}

impl CdpSession {
    fn browser(&self) -> Result<Arc<Browser>> {
        self.browser
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| Error::BrowserUnavailable("browser session already closed".into()))
    }
}

/// Window bounds that show exactly `viewport`.
pub fn window_bounds(viewport: Viewport) -> Bounds {
    Bounds::Normal {
        left: Some(0),
        top: Some(0),
        width: Some(viewport.width.max(1) as f64),
        height: Some(viewport.height.max(1) as f64),
    }
}

fn capture(browser: &Browser, url: &str, viewport: Viewport) -> Result<Vec<u8>> {
    let tab = browser
        .new_tab()
        .map_err(|e| Error::Process(format!("Failed to create tab: {}", e)))?;

    let shot = (|| {
        tab.set_bounds(window_bounds(viewport))
            .map_err(|e| Error::Render(format!("Failed to size window: {}", e)))?;
        tab.navigate_to(url)
            .map_err(|e| Error::Render(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::Render(format!("Wait for navigation failed: {}", e)))?;
        if let Err(e) = tab.evaluate(FONTS_READY, true) {
            log::debug!("fonts.ready wait skipped: {}", e);
        }

        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: viewport.width.max(1) as f64,
            height: viewport.height.max(1) as f64,
            scale: 1.0,
        };
        tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
            .map_err(|e| Error::Render(format!("Screenshot failed: {}", e)))
    })();

    if let Err(e) = tab.close(false) {
        log::debug!("closing tab failed: {}", e);
    }
    shot
}

#[async_trait]
impl BrowserSession for CdpSession {
    fn pids(&self) -> Vec<u32> {
        self.browser
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .and_then(|b| b.get_process_id())
            .into_iter()
            .collect()
    }

    async fn screenshot(&self, target: &ScreenshotTarget, viewport: Viewport) -> Result<Vec<u8>> {
        let browser = self.browser()?;
        let url = target.to_url();
        tokio::task::spawn_blocking(move || capture(&browser, &url, viewport))
            .await
            .map_err(|e| Error::Other(format!("screenshot task failed: {}", e)))?
    }

    async fn close(&self) -> Result<()> {
        // Dropping the last reference terminates the child process.
        let browser = self.browser.lock().unwrap_or_else(|p| p.into_inner()).take();
        drop(browser);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_follow_the_requested_viewport() {
        match window_bounds(Viewport { width: 1600, height: 0 }) {
            Bounds::Normal { width, height, .. } => {
                assert_eq!(width, Some(1600.0));
                assert_eq!(height, Some(1.0));
            }
            _ => panic!("expected normal window bounds"),
        }
    }

    #[tokio::test]
    #[ignore = "requires Chrome/Chromium"]
    async fn screenshot_inline_html() {
        let launcher = CdpLauncher::new(BrowserFinder::default(), Viewport { width: 320, height: 200 }, Vec::new());
        let session = launcher.launch().await.unwrap();
        // Larger than the launch window
        let png = session
            .screenshot(
                &ScreenshotTarget::Html("<body style='background:#0a0'></body>".into()),
                Viewport { width: 1200, height: 630 },
            )
            .await
            .unwrap();
        assert!(png.starts_with(crate::rendering::PNG_SIGNATURE));
        assert_eq!(u32::from_be_bytes(png[16..20].try_into().unwrap()), 1200);
        session.close().await.unwrap();
    }
}
