//! Runtime environment descriptor and per-platform compatibility presets
//!
//! Every environment-dependent choice (which candidates may run, where fonts
//! come from) is made from a single [`RuntimeEnv`] value.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::capability::{Capability, CandidateKind};
use crate::{Error, Result};

/// Where the renderer is executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    /// A long-running server process with filesystem and process access
    Server,
    /// An edge/serverless worker: no native libraries, no child processes
    Edge,
    /// A browser WASM sandbox
    Browser,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Server => "server",
            Platform::Edge => "edge",
            Platform::Browser => "browser",
        })
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" | "node" => Ok(Platform::Server),
            "edge" | "edge-worker" | "worker" => Ok(Platform::Edge),
            "browser" | "wasm" => Ok(Platform::Browser),
            other => Err(Error::Config(format!("unknown platform '{}'", other))),
        }
    }
}

/// Development fetches fonts from their provider; production prefers bundled copies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Deployment {
    Development,
    Production,
}

/// Cache key for resolved bindings. Mixed-platform processes get separate entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvFingerprint {
    pub platform: Platform,
}

/// The environment threaded through resolution and font sourcing
///
/// Requests may carry one; missing fields fall back to a production server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(default)]
pub struct RuntimeEnv {
    pub platform: Platform,
    pub deployment: Deployment,
}

impl Default for RuntimeEnv {
    fn default() -> Self {
        Self {
            platform: Platform::Server,
            deployment: Deployment::Production,
        }
    }
}

impl RuntimeEnv {
    pub fn new(platform: Platform, deployment: Deployment) -> Self {
        Self { platform, deployment }
    }

    /// Build from `OGRENDER_PLATFORM` and `OGRENDER_ENV`, defaulting to a production server.
    pub fn detect() -> Self {
        let platform = std::env::var("OGRENDER_PLATFORM")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!("ignoring OGRENDER_PLATFORM: {}", e);
                    None
                }
            })
            .unwrap_or(Platform::Server);
        let deployment = match std::env::var("OGRENDER_ENV").as_deref() {
            Ok("development") | Ok("dev") => Deployment::Development,
            _ => Deployment::Production,
        };
        Self { platform, deployment }
    }

    pub fn fingerprint(&self) -> EnvFingerprint {
        EnvFingerprint { platform: self.platform }
    }

    pub fn is_dev(&self) -> bool {
        self.deployment == Deployment::Development
    }
}

/// Which candidate kinds each capability may use on each platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compatibility {
    allowed: HashMap<(Platform, Capability), Vec<CandidateKind>>,
}

impl Default for Compatibility {
    fn default() -> Self {
        use CandidateKind::*;

        let sandboxed = vec![WasmBundled, WasmRemote];
        let everything = vec![Native, WasmBundled, WasmFilesystem, WasmRemote];

        let mut allowed = HashMap::new();
        allowed.insert((Platform::Server, Capability::Typeset), everything.clone());
        allowed.insert((Platform::Server, Capability::Rasterize), everything);
        allowed.insert((Platform::Server, Capability::Screenshot), vec![ExternalProcess]);
        for platform in [Platform::Edge, Platform::Browser] {
            allowed.insert((platform, Capability::Typeset), sandboxed.clone());
            allowed.insert((platform, Capability::Rasterize), sandboxed.clone());
            allowed.insert((platform, Capability::Screenshot), Vec::new());
        }
        Self { allowed }
    }
}

impl Compatibility {
    pub fn allows(&self, platform: Platform, capability: Capability, kind: CandidateKind) -> bool {
        self.allowed
            .get(&(platform, capability))
            .map(|kinds| kinds.contains(&kind))
            .unwrap_or(false)
    }

    /// Replace the permitted kinds for one platform/capability pair.
    pub fn set(&mut self, platform: Platform, capability: Capability, kinds: Vec<CandidateKind>) {
        self.allowed.insert((platform, capability), kinds);
    }

    /// Forbid every kind for a capability on a platform.
    pub fn disable(&mut self, platform: Platform, capability: Capability) {
        self.set(platform, capability, Vec::new());
    }

    /// Apply configured overrides on top of the presets.
    pub fn with_overrides(mut self, overrides: &[CompatibilityOverride]) -> Self {
        for o in overrides {
            self.set(o.platform, o.capability, o.kinds.clone());
        }
        self
    }
}

/// A configuration entry replacing one cell of the compatibility matrix
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompatibilityOverride {
    pub platform: Platform,
    pub capability: Capability,
    #[serde(default)]
    pub kinds: Vec<CandidateKind>,
}
