//! Capability Resolver
//!
//! Walks a capability's candidates in priority order and activates the first
//! viable one. The winning binding is cached per `(capability, env
//! fingerprint)`; concurrent first requests share a single walk, and a failed
//! walk leaves nothing cached so the next request tries again.

use std::sync::Arc;
use std::time::SystemTime;

use crate::capability::{Binding, BindingRegistry, CandidateKind, Capability, Probe, Rasterizer, Screenshotter, Typesetter};
use crate::env::{Compatibility, EnvFingerprint, RuntimeEnv};
use crate::once_map::OnceMap;
use crate::{Attempt, Error, Result};

/// The activated winner for one capability
#[derive(Debug, Clone)]
pub struct ResolvedBinding {
    /// Candidate name, e.g. `wasm-remote`
    pub name: String,
    pub kind: CandidateKind,
    pub capability: Capability,
    pub binding: Binding,
    pub resolved_at: SystemTime,
}

impl ResolvedBinding {
    pub fn typesetter(&self) -> Result<Arc<dyn Typesetter>> {
        match &self.binding {
            Binding::Typeset(t) => Ok(t.clone()),
            other => Err(mismatch(Capability::Typeset, other)),
        }
    }

    pub fn rasterizer(&self) -> Result<Arc<dyn Rasterizer>> {
        match &self.binding {
            Binding::Rasterize(r) => Ok(r.clone()),
            other => Err(mismatch(Capability::Rasterize, other)),
        }
    }

    pub fn screenshotter(&self) -> Result<Arc<dyn Screenshotter>> {
        match &self.binding {
            Binding::Screenshot(s) => Ok(s.clone()),
            other => Err(mismatch(Capability::Screenshot, other)),
        }
    }
}

fn mismatch(wanted: Capability, got: &Binding) -> Error {
    Error::Other(format!("expected a {} binding, got {:?}", wanted, got))
}

pub struct CapabilityResolver {
    registry: BindingRegistry,
    compatibility: Compatibility,
    cache: OnceMap<(Capability, EnvFingerprint), Arc<ResolvedBinding>>,
}

impl CapabilityResolver {
    pub fn new(registry: BindingRegistry, compatibility: Compatibility) -> Self {
        Self {
            registry,
            compatibility,
            cache: OnceMap::new(),
        }
    }

    pub fn registry(&self) -> &BindingRegistry {
        &self.registry
    }

    pub fn compatibility(&self) -> &Compatibility {
        &self.compatibility
    }

    /// The binding for `capability` in `env`, resolving it on first use.
    ///
    /// Fails with [`Error::NoCandidate`] listing every rejected candidate when
    /// none can be activated.
    pub async fn resolve(&self, capability: Capability, env: &RuntimeEnv) -> Result<Arc<ResolvedBinding>> {
        let key = (capability, env.fingerprint());
        self.cache
            .get_or_try_init(key, || async { self.walk(capability, env).await.map(Arc::new) })
            .await
    }

    /// The cached binding, if resolution already succeeded.
    pub fn cached(&self, capability: Capability, env: &RuntimeEnv) -> Option<Arc<ResolvedBinding>> {
        self.cache.get(&(capability, env.fingerprint()))
    }

    /// Forget the binding for one capability in every environment.
    pub fn invalidate(&self, capability: Capability) -> usize {
        let n = self.cache.remove_where(|(c, _)| *c == capability);
        if n > 0 {
            log::info!("invalidated {} cached {} binding(s)", n, capability);
        }
        n
    }

    /// Forget every resolved binding.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Every binding resolved so far.
    pub fn snapshot(&self) -> Vec<Arc<ResolvedBinding>> {
        let mut all: Vec<_> = self.cache.entries().into_iter().map(|(_, b)| b).collect();
        all.sort_by_key(|b| b.resolved_at);
        all
    }

    async fn walk(&self, capability: Capability, env: &RuntimeEnv) -> Result<ResolvedBinding> {
        let mut attempts = Vec::new();

        for candidate in self.registry.candidates(capability) {
            let name = candidate.name().to_string();
            let kind = candidate.kind();

            if !self.compatibility.allows(env.platform, capability, kind) {
                log::debug!("{} candidate {} ({}) not permitted on {}", capability, name, kind, env.platform);
                attempts.push(Attempt {
                    candidate: name,
                    outcome: format!("{} disabled by compatibility on {}", kind, env.platform),
                });
                continue;
            }

            if let Probe::Unavailable(reason) = candidate.probe(env).await {
                log::debug!("{} candidate {} skipped: {}", capability, name, reason);
                attempts.push(Attempt {
                    candidate: name,
                    outcome: format!("probe: {}", reason),
                });
                continue;
            }

            match candidate.activate(env).await {
                Ok(binding) if binding.capability() == capability => {
                    log::info!("{} resolved to {} ({}) on {}", capability, name, kind, env.platform);
                    return Ok(ResolvedBinding {
                        name,
                        kind,
                        capability,
                        binding,
                        resolved_at: SystemTime::now(),
                    });
                }
                Ok(binding) => {
                    log::warn!("{} candidate {} produced {:?}", capability, name, binding);
                    attempts.push(Attempt {
                        candidate: name,
                        outcome: format!("activate: produced a {} binding", binding.capability()),
                    });
                }
                Err(e) => {
                    log::warn!("{} candidate {} failed to activate: {}", capability, name, e);
                    attempts.push(Attempt {
                        candidate: name,
                        outcome: format!("activate: {}", e),
                    });
                }
            }
        }

        Err(Error::NoCandidate { capability, attempts })
    }
}
