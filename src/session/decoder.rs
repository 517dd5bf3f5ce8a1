use log::{debug, info};

use super::{CodingParams, negotiate_components};
use crate::codestream::{Codestream, Coords, ParseMode, ProgressionOrder, ReferenceCodestream, ThreadEnv};
use crate::constants::{DEFAULT_ABSOLUTE_MAX_STRIPE_HEIGHT, DEFAULT_PREFERRED_MIN_STRIPE_HEIGHT};
use crate::error::{Result, StripeError};
use crate::stripe::{Acceleration, DecompressorOptions, StripeBufMut, StripeDecompressor, StripeHeights, StripeLayout};
use crate::{ComponentCoercion, FrameDescriptor};

/// Decodes a whole HTJ2K codestream, or pulls it stripe by stripe.
#[derive(Default)]
pub struct Htj2kDecoder {
    encoded: Vec<u8>,
    decoded: Vec<u8>,
    stripe: Vec<u8>,
    frame: Option<FrameDescriptor>,
    coercion: Option<ComponentCoercion>,
    params: CodingParams,
    env: Option<ThreadEnv>,
    acceleration: Acceleration,
    session: Option<StripeDecompressor<ReferenceCodestream>>,
}

impl Htj2kDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resizes the encoded buffer to `len` bytes for the caller to fill.
    pub fn encoded_buffer_mut(&mut self, len: usize) -> &mut [u8] {
        self.encoded.resize(len, 0);
        &mut self.encoded
    }

    pub fn set_encoded(&mut self, bytes: Vec<u8>) {
        self.encoded = bytes;
    }

    pub fn encoded_bytes(&self) -> &[u8] {
        &self.encoded
    }

    /// Decodes tiles on `num_threads` workers. 0 and 1 decode on the calling thread.
    pub fn set_num_threads(&mut self, num_threads: usize) -> Result<()> {
        self.env = match num_threads {
            0 | 1 => None,
            n => Some(ThreadEnv::new(n)?),
        };
        Ok(())
    }

    pub fn set_acceleration(&mut self, acceleration: Acceleration) {
        self.acceleration = acceleration;
    }

    /// Parses the main header and negotiates the delivered component count.
    pub fn read_header(&mut self) -> Result<FrameDescriptor> {
        let _ = self.open(0)?;
        self.frame_descriptor()
    }

    pub fn decode(&mut self) -> Result<()> {
        self.decode_sub_resolution(0)
    }

    /// Decodes at the resolution `level` halvings below full size. The frame
    /// descriptor keeps reporting the full-size geometry; the decoded buffer
    /// holds [`size_at_decomposition_level`](Self::size_at_decomposition_level)
    /// pixels.
    pub fn decode_sub_resolution(&mut self, level: usize) -> Result<()> {
        let level = u8::try_from(level).map_err(|_| StripeError::InvalidArgument)?;
        let codestream = self.open(level)?;
        let frame = self.frame_descriptor()?;
        let heights: Vec<usize> = (0..codestream.num_components())
            .map(|c| codestream.component_geometry(c).map(|g| g.dims.size.y as usize))
            .collect::<Result<_>>()?;
        let samples: usize = (0..codestream.num_components())
            .map(|c| codestream.component_geometry(c).map(|g| g.dims.area()))
            .sum::<Result<usize>>()?;

        let mut decompressor = StripeDecompressor::new(self.decompressor_options());
        decompressor.start(codestream)?;
        if frame.bytes_per_sample() == 1 {
            self.decoded.resize(samples, 0);
            decompressor.pull_stripe(StripeBufMut::Byte(&mut self.decoded), &heights, None)?;
        } else {
            let mut words = vec![0i16; samples];
            decompressor.pull_stripe(StripeBufMut::Int16(&mut words), &heights, None)?;
            self.decoded = bytemuck::cast_slice(&words).to_vec();
        }
        decompressor.finish()?;
        info!(
            "decoded {}x{}x{} at level {} into {} bytes",
            frame.width,
            frame.height,
            frame.component_count,
            level,
            self.decoded.len()
        );
        Ok(())
    }

    fn decompressor_options(&self) -> DecompressorOptions {
        DecompressorOptions {
            env: self.env.clone(),
            acceleration: self.acceleration,
        }
    }

    fn open(&mut self, discard_levels: u8) -> Result<ReferenceCodestream> {
        let mut codestream = ReferenceCodestream::open(self.encoded.clone(), ParseMode::Fussy)?;
        let (count, coercion) = negotiate_components(codestream.siz());
        codestream.apply_input_restrictions(count as usize, discard_levels)?;
        let first = codestream.siz().components[0];
        let dims = codestream.siz().component_rect(0);
        self.frame = Some(FrameDescriptor::new(
            dims.size.x,
            dims.size.y,
            count,
            first.precision,
            first.signed,
        )?);
        self.coercion = coercion;
        self.params = CodingParams::from_header(codestream.siz(), codestream.cod());
        debug!("header {:?}, coercion {:?}", self.frame, self.coercion);
        Ok(codestream)
    }

    pub fn frame_descriptor(&self) -> Result<FrameDescriptor> {
        self.frame.ok_or(StripeError::InvalidState)
    }

    /// The component-count substitution made by the last header read, if any.
    pub fn component_coercion(&self) -> Option<ComponentCoercion> {
        self.coercion
    }

    pub fn decoded_bytes(&self) -> &[u8] {
        &self.decoded
    }

    /// Frame size after `level` halvings, rounding up.
    pub fn size_at_decomposition_level(&self, level: usize) -> Result<Coords> {
        let frame = self.frame_descriptor()?;
        let mut size = Coords::new(frame.width, frame.height);
        for _ in 0..level {
            size = Coords::new(size.x.div_ceil(2), size.y.div_ceil(2));
        }
        Ok(size)
    }

    pub fn coding_params(&self) -> &CodingParams {
        &self.params
    }

    pub fn num_decompositions(&self) -> u8 {
        self.params.decompositions
    }

    pub fn is_reversible(&self) -> bool {
        self.params.reversible
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        self.params.progression_order
    }

    pub fn down_sample(&self, component: usize) -> Coords {
        self.params.down_sample(component)
    }

    pub fn image_offset(&self) -> Coords {
        self.params.image_offset
    }

    pub fn tile_size(&self) -> Coords {
        self.params.tile_size
    }

    pub fn tile_offset(&self) -> Coords {
        self.params.tile_offset
    }

    pub fn block_dimensions(&self) -> Coords {
        self.params.block_dimensions
    }

    pub fn precinct(&self, level: usize) -> Coords {
        self.params.precinct(level)
    }

    pub fn num_layers(&self) -> u16 {
        self.params.num_layers
    }

    pub fn is_using_color_transform(&self) -> bool {
        self.params.use_color_transform
    }

    /// Opens a stripe-wise decode at full resolution.
    pub fn start_stripes(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(StripeError::InvalidState);
        }
        let codestream = self.open(0)?;
        let mut decompressor = StripeDecompressor::new(self.decompressor_options());
        decompressor.start(codestream)?;
        self.session = Some(decompressor);
        Ok(())
    }

    /// Heights for the next stripe using the default stripe-height hints.
    pub fn recommended_stripe_heights(&mut self) -> Result<StripeHeights> {
        self.session
            .as_mut()
            .ok_or(StripeError::InvalidState)?
            .recommended_stripe_heights(DEFAULT_PREFERRED_MIN_STRIPE_HEIGHT, DEFAULT_ABSOLUTE_MAX_STRIPE_HEIGHT)
    }

    /// Decodes the next `heights[c]` rows of every component. The interleaved
    /// stripe is available from [`stripe_bytes`](Self::stripe_bytes) until the
    /// next call. Returns the bytes written and whether rows remain.
    pub fn pull_stripe(&mut self, heights: &[usize]) -> Result<(usize, bool)> {
        let frame = self.frame_descriptor()?;
        let session = self.session.as_mut().ok_or(StripeError::InvalidState)?;
        let width = frame.width as usize;
        let layout = StripeLayout::interleaved(&vec![width; heights.len()]);
        let rows = heights.iter().copied().max().unwrap_or(0);
        let samples = rows * width * heights.len();
        let more = if frame.bytes_per_sample() == 1 {
            self.stripe.resize(samples, 0);
            session.pull_stripe(StripeBufMut::Byte(&mut self.stripe), heights, Some(&layout))?
        } else {
            let mut words = vec![0i16; samples];
            let more = session.pull_stripe(StripeBufMut::Int16(&mut words), heights, Some(&layout))?;
            self.stripe = bytemuck::cast_slice(&words).to_vec();
            more
        };
        Ok((self.stripe.len(), more))
    }

    pub fn stripe_bytes(&self) -> &[u8] {
        &self.stripe
    }

    pub fn finish(&mut self) -> Result<()> {
        let mut session = self.session.take().ok_or(StripeError::InvalidState)?;
        match session.finish() {
            Ok(_) => Ok(()),
            Err(e) => {
                self.session = Some(session);
                Err(e)
            }
        }
    }

    /// Drops a stripe-wise decode in progress.
    pub fn reset(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.reset();
        }
    }
}
