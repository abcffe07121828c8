//! Locate a Chrome/Chromium-family executable without launching it

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Environment variables naming a browser, checked in order
pub const BROWSER_ENV_VARS: [&str; 3] = ["OGRENDER_BROWSER_PATH", "CHROME_PATH", "PUPPETEER_EXECUTABLE_PATH"];

const PATH_CANDIDATES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
    "microsoft-edge",
];

#[cfg(target_os = "macos")]
const WELL_KNOWN: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
];

#[cfg(windows)]
const WELL_KNOWN: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", windows)))]
const WELL_KNOWN: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

/// Search order: explicit path, environment variables, `PATH`, then
/// platform install locations.
#[derive(Debug, Clone, Default)]
pub struct BrowserFinder {
    explicit: Option<PathBuf>,
}

impl BrowserFinder {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self { explicit }
    }

    pub fn find(&self) -> Option<PathBuf> {
        if let Some(p) = &self.explicit {
            if p.is_file() {
                return Some(p.clone());
            }
            log::warn!("configured browser {} does not exist", p.display());
        }

        for var in BROWSER_ENV_VARS {
            if let Some(p) = std::env::var_os(var).map(PathBuf::from) {
                if p.is_file() {
                    return Some(p);
                }
                log::debug!("{} points at missing {}", var, p.display());
            }
        }

        if let Some(path_var) = std::env::var_os("PATH") {
            if let Some(p) = find_in_path(&path_var, PATH_CANDIDATES) {
                return Some(p);
            }
        }

        WELL_KNOWN.iter().map(PathBuf::from).find(|p| p.is_file())
    }
}

/// First `names` entry present in any directory of a `PATH`-style list.
pub fn find_in_path(path_var: &OsStr, names: &[&str]) -> Option<PathBuf> {
    for dir in std::env::split_paths(path_var) {
        for name in names {
            let candidate = executable(&dir, name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(windows)]
fn executable(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.exe", name))
}

#[cfg(not(windows))]
fn executable(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}
