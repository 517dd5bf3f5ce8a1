use log::debug;

use super::engine::{StripeEngine, StripeHeights};
use super::tile::StripeIo;
use super::transfer::Acceleration;
use super::{StripeBufMut, StripeLayout};
use crate::codestream::{Codestream, ThreadEnv};
use crate::error::{Result, StripeError};

/// Options for a [`StripeDecompressor`] session.
#[derive(Debug, Clone, Default)]
pub struct DecompressorOptions {
    /// Worker pool. `None` decodes every tile on the calling thread.
    pub env: Option<ThreadEnv>,
    pub acceleration: Acceleration,
}

/// Pulls decoded stripes out of a codestream, top to bottom.
///
/// A session runs from [`start`](Self::start) to [`finish`](Self::finish).
/// Each [`pull_stripe`](Self::pull_stripe) call fills the next rows of every
/// component; the tiles a stripe crosses are opened on demand and closed as
/// soon as their last row has been copied out.
///
/// ```no_run
/// use htj2k_stripe::codestream::{ParseMode, ReferenceCodestream};
/// use htj2k_stripe::stripe::{DecompressorOptions, StripeBufMut, StripeDecompressor};
///
/// # fn run(bytes: Vec<u8>) -> htj2k_stripe::error::Result<()> {
/// let codestream = ReferenceCodestream::open(bytes, ParseMode::Fussy)?;
/// let mut session = StripeDecompressor::new(DecompressorOptions::default());
/// session.start(codestream)?;
/// loop {
///     let heights = session.recommended_stripe_heights(8, 1024)?;
///     let len: usize = heights.current.iter().sum::<usize>() * 4096;
///     let mut stripe = vec![0u8; len];
///     if !session.pull_stripe(StripeBufMut::Byte(&mut stripe), &heights.current, None)? {
///         break;
///     }
/// }
/// session.finish()?;
/// # Ok(())
/// # }
/// ```
pub struct StripeDecompressor<C: Codestream> {
    options: DecompressorOptions,
    engine: Option<StripeEngine<C>>,
}

impl<C: Codestream> StripeDecompressor<C> {
    pub fn new(options: DecompressorOptions) -> Self {
        Self { options, engine: None }
    }

    /// Binds `codestream` to the session. Only strictly parsed codestreams
    /// are accepted.
    pub fn start(&mut self, codestream: C) -> Result<()> {
        if self.engine.is_some() || !codestream.is_fussy() {
            return Err(StripeError::InvalidState);
        }
        let engine = StripeEngine::new(codestream, self.options.env.clone(), self.options.acceleration)?;
        debug!("decompressor started with {} kernel", engine.kernel_name());
        self.engine = Some(engine);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.engine.is_some()
    }

    /// Decodes the next `heights[c]` rows of every component into `buffer`,
    /// placed per `layout` (interleaved when `None`). Returns true while rows remain.
    pub fn pull_stripe(
        &mut self,
        mut buffer: StripeBufMut<'_>,
        heights: &[usize],
        layout: Option<&StripeLayout>,
    ) -> Result<bool> {
        self.engine_mut()?
            .transfer(StripeIo::Pull(&mut buffer), heights, layout)
    }

    pub fn recommended_stripe_heights(&mut self, preferred_min: usize, absolute_max: usize) -> Result<StripeHeights> {
        Ok(self
            .engine_mut()?
            .recommended_stripe_heights(preferred_min, absolute_max))
    }

    /// Per-component heights for the next `rows` rows of the image.
    pub fn stripe_heights_for_rows(&self, rows: usize) -> Result<Vec<usize>> {
        Ok(self.engine()?.stripe_heights_for_rows(rows))
    }

    pub fn remaining_rows(&self) -> Result<Vec<usize>> {
        Ok(self.engine()?.remaining_rows())
    }

    pub fn codestream(&self) -> Option<&C> {
        self.engine.as_ref().map(StripeEngine::codestream)
    }

    /// Ends the session and hands the codestream back. Fails with
    /// `IncompleteImage` while rows remain; the session then stays open.
    pub fn finish(&mut self) -> Result<C> {
        let engine = self.engine_mut()?;
        engine.finish()?;
        let engine = self.engine.take().ok_or(StripeError::InvalidState)?;
        Ok(engine.into_codestream())
    }

    /// Abandons the session, returning its codestream if one was bound.
    pub fn reset(&mut self) -> Option<C> {
        let mut engine = self.engine.take()?;
        engine.abandon();
        Some(engine.into_codestream())
    }

    fn engine(&self) -> Result<&StripeEngine<C>> {
        self.engine.as_ref().ok_or(StripeError::InvalidState)
    }

    fn engine_mut(&mut self) -> Result<&mut StripeEngine<C>> {
        self.engine.as_mut().ok_or(StripeError::InvalidState)
    }
}

impl<C: Codestream> Drop for StripeDecompressor<C> {
    fn drop(&mut self) {
        if let Some(engine) = &mut self.engine {
            engine.abandon();
        }
    }
}
