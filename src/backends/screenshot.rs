//! Screenshot candidates wrapping a [`BrowserProcessManager`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::BrowserProcessManager;
use crate::capability::{Binding, Candidate, CandidateKind, Capability, Probe, Screenshotter};
use crate::env::RuntimeEnv;
use crate::{Error, Result, ScreenshotTarget, Viewport};

pub struct BrowserCandidate {
    manager: Arc<BrowserProcessManager>,
}

impl BrowserCandidate {
    pub fn new(manager: Arc<BrowserProcessManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Candidate for BrowserCandidate {
    fn name(&self) -> &str {
        self.manager.launcher_name()
    }

    fn capability(&self) -> Capability {
        Capability::Screenshot
    }

    fn kind(&self) -> CandidateKind {
        CandidateKind::ExternalProcess
    }

    async fn probe(&self, _env: &RuntimeEnv) -> Probe {
        if self.manager.is_discoverable() {
            Probe::Available
        } else {
            Probe::Unavailable("no Chrome/Chromium executable found".into())
        }
    }

    /// Launches the browser so a broken install fails resolution, not the
    /// first request.
    async fn activate(&self, _env: &RuntimeEnv) -> Result<Binding> {
        let handle = self.manager.acquire().await?;
        self.manager.release(handle);
        Ok(Binding::Screenshot(Arc::new(BrowserScreenshotter {
            manager: self.manager.clone(),
        })))
    }
}

/// Reacquires the shared browser per capture, so a browser restarted after
/// `shutdown` is picked up transparently.
pub struct BrowserScreenshotter {
    manager: Arc<BrowserProcessManager>,
}

#[async_trait]
impl Screenshotter for BrowserScreenshotter {
    async fn capture(&self, target: &ScreenshotTarget, viewport: Viewport, timeout: Duration) -> Result<Vec<u8>> {
        let work = async {
            let handle = self.manager.acquire().await?;
            let png = handle.screenshot(target, viewport).await;
            self.manager.release(handle);
            png
        };
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("screenshot via {} exceeded {:?}", self.manager.launcher_name(), timeout);
                Err(Error::Timeout(timeout.as_millis() as u64))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserLauncher, BrowserSession};
    use std::path::PathBuf;

    struct SlowSession;

    #[async_trait]
    impl BrowserSession for SlowSession {
        fn pids(&self) -> Vec<u32> {
            Vec::new()
        }
        async fn screenshot(&self, target: &ScreenshotTarget, _v: Viewport) -> Result<Vec<u8>> {
            if matches!(target, ScreenshotTarget::Url(u) if u.contains("slow")) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(b"png".to_vec())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Launcher;

    #[async_trait]
    impl BrowserLauncher for Launcher {
        fn name(&self) -> &str {
            "fake"
        }
        fn locate(&self) -> Option<PathBuf> {
            Some(PathBuf::from("/fake"))
        }
        async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
            Ok(Box::new(SlowSession))
        }
    }

    #[tokio::test]
    async fn timeout_fails_only_the_slow_capture() {
        let manager = Arc::new(BrowserProcessManager::new(Arc::new(Launcher), Vec::new(), Duration::from_secs(1)));
        let candidate = BrowserCandidate::new(manager.clone());
        let Binding::Screenshot(shot) = candidate.activate(&RuntimeEnv::default()).await.unwrap() else {
            panic!("expected a screenshot binding");
        };

        let vp = Viewport::default();
        let slow = ScreenshotTarget::Url("https://slow.test".into());
        let fast = ScreenshotTarget::Url("https://fast.test".into());
        let (a, b) = tokio::join!(
            shot.capture(&slow, vp, Duration::from_millis(50)),
            shot.capture(&fast, vp, Duration::from_secs(5))
        );
        assert!(matches!(a, Err(Error::Timeout(50))));
        assert_eq!(b.unwrap(), b"png");
        assert_eq!(manager.launch_count(), 1);
    }
}
