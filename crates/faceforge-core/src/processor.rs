//! Per-item pipeline shared by single, batch and video jobs.

use crate::adapter::AdapterFactory;
use crate::enhance::EnhancementStage;
use crate::error::Result;
use crate::session::SessionManager;
use crate::swap::SwapEngine;
use crate::types::{Frame, IdentityModel, PipelineConfig};

#[derive(Debug, Clone, Default)]
pub struct FrameProcessor {
    engine: SwapEngine,
    enhancement: EnhancementStage,
}

impl FrameProcessor {
    pub fn new(engine: SwapEngine) -> Self {
        Self {
            engine,
            enhancement: EnhancementStage,
        }
    }

    /// Swap then, when requested, enhance one frame.
    pub fn process<F: AdapterFactory>(
        &self,
        sessions: &mut SessionManager<F>,
        identity: &IdentityModel,
        frame: &Frame,
        config: PipelineConfig,
    ) -> Result<Frame> {
        let outcome = self.engine.swap(sessions, identity, frame)?;
        if !config.enhance {
            return Ok(outcome.frame);
        }
        Ok(self
            .enhancement
            .enhance(sessions, &outcome.frame, &outcome.faces, config.upscale))
    }

    /// Create the adapters every job needs up front, so a missing model
    /// fails the job instead of every item.
    pub fn prepare<F: AdapterFactory>(&self, sessions: &mut SessionManager<F>) -> Result<()> {
        sessions.analyzer()?;
        sessions.swapper()?;
        Ok(())
    }
}
