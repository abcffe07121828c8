//! Candidates for the in-process Typeset and Rasterize implementations

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::{Binding, Candidate, CandidateKind, Capability, Probe};
use crate::env::RuntimeEnv;
use crate::rendering::paint::NativeTypesetter;
use crate::rendering::raster::NativeRasterizer;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct NativeTypesetCandidate;

#[async_trait]
impl Candidate for NativeTypesetCandidate {
    fn name(&self) -> &str {
        "native"
    }

    fn capability(&self) -> Capability {
        Capability::Typeset
    }

    fn kind(&self) -> CandidateKind {
        CandidateKind::Native
    }

    async fn probe(&self, _env: &RuntimeEnv) -> Probe {
        Probe::Available
    }

    async fn activate(&self, _env: &RuntimeEnv) -> Result<Binding> {
        Ok(Binding::Typeset(Arc::new(NativeTypesetter)))
    }
}

/// Loads the system font database on activation, for `<text>` that reaches
/// the rasterizer unoutlined.
#[derive(Debug, Default)]
pub struct NativeRasterCandidate;

#[async_trait]
impl Candidate for NativeRasterCandidate {
    fn name(&self) -> &str {
        "native"
    }

    fn capability(&self) -> Capability {
        Capability::Rasterize
    }

    fn kind(&self) -> CandidateKind {
        CandidateKind::Native
    }

    async fn probe(&self, _env: &RuntimeEnv) -> Probe {
        Probe::Available
    }

    async fn activate(&self, _env: &RuntimeEnv) -> Result<Binding> {
        let rasterizer = tokio::task::spawn_blocking(NativeRasterizer::with_system_fonts)
            .await
            .map_err(|e| Error::Other(format!("font database task failed: {}", e)))?;
        Ok(Binding::Rasterize(Arc::new(rasterizer)))
    }
}
