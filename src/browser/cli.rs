//! One-shot screenshots through the browser's own `--screenshot` switch
//!
//! Every capture runs a fresh headless process with a throwaway profile, so
//! pages never share state. Dropping an in-flight capture kills its process
//! group, which takes the renderer and helper children down with it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{BrowserFinder, BrowserLauncher, BrowserSession};
use crate::rendering::PNG_SIGNATURE;
use crate::{Error, Result, ScreenshotTarget, Viewport};

pub struct CliLauncher {
    finder: BrowserFinder,
    extra_args: Vec<String>,
}

impl CliLauncher {
    pub fn new(finder: BrowserFinder, extra_args: Vec<String>) -> Self {
        Self { finder, extra_args }
    }
}

#[async_trait]
impl BrowserLauncher for CliLauncher {
    fn name(&self) -> &str {
        "cli"
    }

    fn locate(&self) -> Option<PathBuf> {
        self.finder.find()
    }

    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let executable = self
            .locate()
            .ok_or_else(|| Error::BrowserUnavailable("no Chrome/Chromium executable found".into()))?;
        log::debug!("cli browser session using {}", executable.display());
        Ok(Box::new(CliSession {
            executable,
            extra_args: self.extra_args.clone(),
            running: Arc::new(Mutex::new(HashSet::new())),
        }))
    }
}

pub struct CliSession {
    executable: PathBuf,
    extra_args: Vec<String>,
    running: Arc<Mutex<HashSet<u32>>>,
}

/// Keeps a child's pid registered for exactly as long as it runs. A capture
/// abandoned before the child was reaped kills the child's whole group.
struct Running {
    pid: Option<u32>,
    reaped: bool,
    set: Arc<Mutex<HashSet<u32>>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        let Some(pid) = self.pid else { return };
        if !self.reaped {
            log::debug!("capture abandoned; terminating browser group {}", pid);
            if let Err(e) = super::process::terminate(pid) {
                log::warn!("could not terminate browser process {}: {}", pid, e);
            }
        }
        self.set.lock().unwrap_or_else(|p| p.into_inner()).remove(&pid);
    }
}

/// Arguments for a single headless capture.
pub fn screenshot_args(profile: &Path, output: &Path, viewport: Viewport) -> Vec<String> {
    vec![
        "--headless=new".to_string(),
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--hide-scrollbars".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-component-update".to_string(),
        "--force-device-scale-factor=1".to_string(),
        "--virtual-time-budget=5000".to_string(),
        format!("--window-size={},{}", viewport.width.max(1), viewport.height.max(1)),
        format!("--user-data-dir={}", profile.display()),
        format!("--screenshot={}", output.display()),
    ]
}

#[async_trait]
impl BrowserSession for CliSession {
    fn pids(&self) -> Vec<u32> {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .copied()
            .collect()
    }

    async fn screenshot(&self, target: &ScreenshotTarget, viewport: Viewport) -> Result<Vec<u8>> {
        let work = tempfile::tempdir()?;
        let profile = work.path().join("profile");
        let output = work.path().join("shot.png");

        let url = match target {
            ScreenshotTarget::Url(u) => u.clone(),
            ScreenshotTarget::Html(html) => {
                let page = work.path().join("page.html");
                tokio::fs::write(&page, html).await?;
                url::Url::from_file_path(&page)
                    .map_err(|_| Error::Other(format!("cannot address {} as a file URL", page.display())))?
                    .to_string()
            }
        };

        let mut command = tokio::process::Command::new(&self.executable);
        command
            .args(screenshot_args(&profile, &output, viewport))
            .args(&self.extra_args)
            .arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let child = command
            .spawn()
            .map_err(|e| Error::Process(format!("failed to start {}: {}", self.executable.display(), e)))?;

        let pid = child.id();
        if let Some(pid) = pid {
            self.running.lock().unwrap_or_else(|p| p.into_inner()).insert(pid);
        }
        let mut running = Running {
            pid,
            reaped: false,
            set: self.running.clone(),
        };

        let out = child.wait_with_output().await?;
        running.reaped = true;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(Error::Process(format!(
                "browser exited with {}: {}",
                out.status,
                stderr.lines().last().unwrap_or("").trim()
            )));
        }

        let bytes = tokio::fs::read(&output)
            .await
            .map_err(|e| Error::Render(format!("browser produced no screenshot for {}: {}", url, e)))?;
        if !bytes.starts_with(PNG_SIGNATURE) {
            return Err(Error::Render("browser screenshot is not a PNG".into()));
        }
        Ok(bytes)
    }

    async fn close(&self) -> Result<()> {
        for pid in self.pids() {
            super::process::terminate(pid)?;
        }
        Ok(())
    }
}
