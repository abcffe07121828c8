//! Browser Process Manager
//!
//! Owns at most one headless browser per launcher, launched lazily on the
//! first [`acquire`](BrowserProcessManager::acquire) and shared by every
//! caller after that. [`shutdown`](BrowserProcessManager::shutdown) (or drop)
//! terminates the whole process tree.

pub mod cli;
pub mod finder;
pub mod process;

#[cfg(feature = "cdp")]
pub mod cdp;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::{Error, Result, ScreenshotTarget, Viewport};

pub use finder::BrowserFinder;

/// Starts a browser session
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    fn name(&self) -> &str;

    /// The executable that `launch` would use, found without side effects.
    fn locate(&self) -> Option<PathBuf>;

    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// A running browser. Each screenshot uses its own page.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Root processes owned by the session.
    fn pids(&self) -> Vec<u32>;

    async fn screenshot(&self, target: &ScreenshotTarget, viewport: Viewport) -> Result<Vec<u8>>;

    async fn close(&self) -> Result<()>;
}

/// A launched browser shared between callers
pub struct BrowserInstance {
    session: Box<dyn BrowserSession>,
    launcher: String,
    launched_at: Instant,
}

impl BrowserInstance {
    pub fn launcher(&self) -> &str {
        &self.launcher
    }

    pub fn uptime(&self) -> Duration {
        self.launched_at.elapsed()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.session.pids()
    }

    pub async fn screenshot(&self, target: &ScreenshotTarget, viewport: Viewport) -> Result<Vec<u8>> {
        self.session.screenshot(target, viewport).await
    }
}

pub type BrowserHandle = Arc<BrowserInstance>;

/// Outcome of running the browser installer. A failed install is reported,
/// never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// `None` when the installer could not be started or was killed
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Installer stdout and stderr, line by line
    pub lines: Vec<String>,
}

impl InstallReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

pub struct BrowserProcessManager {
    launcher: Arc<dyn BrowserLauncher>,
    installer: Vec<String>,
    install_timeout: Duration,
    current: tokio::sync::Mutex<Option<BrowserHandle>>,
    launches: AtomicUsize,
}

impl BrowserProcessManager {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, installer: Vec<String>, install_timeout: Duration) -> Self {
        Self {
            launcher,
            installer,
            install_timeout,
            current: tokio::sync::Mutex::new(None),
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launcher_name(&self) -> &str {
        self.launcher.name()
    }

    /// Whether a browser binary can be found right now.
    pub fn is_discoverable(&self) -> bool {
        self.launcher.locate().is_some()
    }

    /// How many times a browser has been launched.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// The shared browser, launching it if none is running.
    pub async fn acquire(&self) -> Result<BrowserHandle> {
        let mut current = self.current.lock().await;
        if let Some(handle) = current.as_ref() {
            return Ok(handle.clone());
        }

        if self.launcher.locate().is_none() {
            return Err(Error::BrowserUnavailable(format!(
                "{}: no Chrome/Chromium executable found; run `ogrender install-browser` or set CHROME_PATH",
                self.launcher.name()
            )));
        }

        let started = Instant::now();
        let session = self.launcher.launch().await?;
        self.launches.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "launched headless browser via {} in {:?} (pids {:?})",
            self.launcher.name(),
            started.elapsed(),
            session.pids()
        );

        let handle = Arc::new(BrowserInstance {
            session,
            launcher: self.launcher.name().to_string(),
            launched_at: Instant::now(),
        });
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Give back a handle. The browser stays up for other holders; only
    /// [`shutdown`](Self::shutdown) terminates it.
    pub fn release(&self, handle: BrowserHandle) {
        drop(handle);
    }

    /// Handles held outside the manager.
    pub async fn active_handles(&self) -> usize {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|h| Arc::strong_count(h) - 1)
            .unwrap_or(0)
    }

    /// Close the browser and kill its process tree. The next `acquire`
    /// launches a fresh one.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(handle) = self.current.lock().await.take() else {
            return Ok(());
        };
        let pids = handle.pids();
        if let Err(e) = handle.session.close().await {
            log::warn!("browser close via {} failed: {}", handle.launcher, e);
        }
        for pid in pids {
            process::kill_tree(pid)?;
        }
        log::info!("shut down browser from {} after {:?}", handle.launcher, handle.uptime());
        Ok(())
    }

    /// Run the configured installer, streaming its output to the log.
    ///
    /// Bounded by the install timeout; the installer is killed when it
    /// overruns. Always returns a report so callers can continue and let a
    /// later `acquire` decide whether a browser is usable.
    pub async fn ensure_installed(&self) -> InstallReport {
        let Some((program, args)) = self.installer.split_first() else {
            log::warn!("no browser installer configured");
            return InstallReport::default();
        };

        log::info!("installing browser: {}", self.installer.join(" "));
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Downloads usually run in child processes; a group lets a timeout
        // reach them.
        #[cfg(unix)]
        command.process_group(0);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::warn!("browser installer {} could not start: {}", program, e);
                return InstallReport {
                    lines: vec![format!("failed to start {}: {}", program, e)],
                    ..Default::default()
                };
            }
        };

        let pid = child.id();
        let lines = Mutex::new(Vec::new());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            tokio::join!(
                pump(stdout.map(BufReader::new), &lines),
                pump(stderr.map(BufReader::new), &lines)
            );
            child.wait().await
        };
        let outcome = tokio::time::timeout(self.install_timeout, run).await;

        let mut report = InstallReport::default();
        match outcome {
            Ok(Ok(status)) => {
                report.exit_code = status.code();
                if status.success() {
                    log::info!("browser installer finished");
                } else {
                    log::warn!("browser installer exited with {}", status);
                }
            }
            Ok(Err(e)) => log::warn!("waiting on browser installer failed: {}", e),
            Err(_) => {
                report.timed_out = true;
                log::warn!("browser installer exceeded {:?}; killing it", self.install_timeout);
                if let Some(pid) = pid {
                    if let Err(e) = process::terminate(pid) {
                        log::warn!("could not terminate installer tree {}: {}", pid, e);
                    }
                }
                if let Err(e) = child.start_kill() {
                    log::debug!("installer already gone: {}", e);
                }
                let _ = child.wait().await;
            }
        }
        report.lines = lines.into_inner().unwrap_or_else(|p| p.into_inner());
        report
    }
}

async fn pump<R: AsyncBufRead + Unpin>(reader: Option<R>, sink: &Mutex<Vec<String>>) {
    let Some(reader) = reader else { return };
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                log::info!("[install] {}", line);
                sink.lock().unwrap_or_else(|p| p.into_inner()).push(line);
            }
            Ok(None) => break,
            Err(e) => {
                log::debug!("installer output ended: {}", e);
                break;
            }
        }
    }
}

impl Drop for BrowserProcessManager {
    fn drop(&mut self) {
        let Some(handle) = self.current.get_mut().take() else {
            return;
        };
        for pid in handle.pids() {
            if let Err(e) = process::kill_tree(pid) {
                log::warn!("could not terminate browser process {}: {}", pid, e);
            }
        }
    }
}
