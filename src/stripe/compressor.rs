use log::debug;

use super::engine::{StripeEngine, StripeHeights};
use super::tile::StripeIo;
use super::transfer::Acceleration;
use super::{StripeBufRef, StripeLayout};
use crate::codestream::{Codestream, ThreadEnv};
use crate::error::{Result, StripeError};

#[derive(Debug, Clone, Default)]
pub struct CompressorOptions {
    pub env: Option<ThreadEnv>,
    pub acceleration: Acceleration,
}

/// Pushes stripes into an output codestream, top to bottom. Mirror of
/// [`StripeDecompressor`](super::StripeDecompressor).
pub struct StripeCompressor<C: Codestream> {
    options: CompressorOptions,
    engine: Option<StripeEngine<C>>,
}

impl<C: Codestream> StripeCompressor<C> {
    pub fn new(options: CompressorOptions) -> Self {
        Self { options, engine: None }
    }

    pub fn start(&mut self, codestream: C) -> Result<()> {
        if self.engine.is_some() {
            return Err(StripeError::InvalidState);
        }
        let engine = StripeEngine::new(codestream, self.options.env.clone(), self.options.acceleration)?;
        debug!("compressor started with {} kernel", engine.kernel_name());
        self.engine = Some(engine);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.engine.is_some()
    }

    pub fn push_stripe(
        &mut self,
        buffer: StripeBufRef<'_>,
        heights: &[usize],
        layout: Option<&StripeLayout>,
    ) -> Result<bool> {
        self.engine_mut()?
            .transfer(StripeIo::Push(&buffer), heights, layout)
    }

    pub fn recommended_stripe_heights(&mut self, preferred_min: usize, absolute_max: usize) -> Result<StripeHeights> {
        Ok(self
            .engine_mut()?
            .recommended_stripe_heights(preferred_min, absolute_max))
    }

    pub fn stripe_heights_for_rows(&self, rows: usize) -> Result<Vec<usize>> {
        Ok(self
            .engine
            .as_ref()
            .ok_or(StripeError::InvalidState)?
            .stripe_heights_for_rows(rows))
    }

    /// Closes the remaining tiles and finalises the codestream, which is
    /// returned with its encoded bytes in place.
    pub fn finish(&mut self) -> Result<C> {
        self.engine_mut()?.finish()?;
        let engine = self.engine.take().ok_or(StripeError::InvalidState)?;
        Ok(engine.into_codestream())
    }

    pub fn reset(&mut self) -> Option<C> {
        let mut engine = self.engine.take()?;
        engine.abandon();
        Some(engine.into_codestream())
    }

    fn engine_mut(&mut self) -> Result<&mut StripeEngine<C>> {
        self.engine.as_mut().ok_or(StripeError::InvalidState)
    }
}

impl<C: Codestream> Drop for StripeCompressor<C> {
    fn drop(&mut self) {
        if let Some(engine) = &mut self.engine {
            engine.abandon();
        }
    }
}
