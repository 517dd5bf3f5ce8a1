use log::{debug, info};

use super::{CodingParams, EncodeOptions};
use crate::codestream::{
    CodParams, ComponentInfo, Coords, ProgressionOrder, QcdParams, ReferenceCodestream, SizParams, ThreadEnv,
};
use crate::constants::{DEFAULT_ABSOLUTE_MAX_STRIPE_HEIGHT, DEFAULT_PREFERRED_MIN_STRIPE_HEIGHT};
use crate::error::{Result, StripeError};
use crate::stripe::{CompressorOptions, StripeBufRef, StripeCompressor, StripeHeights, StripeLayout};
use crate::FrameDescriptor;

/// Encodes a whole frame held in its decoded buffer, or pushes it stripe by
/// stripe.
#[derive(Default)]
pub struct Htj2kEncoder {
    frame: Option<FrameDescriptor>,
    decoded: Vec<u8>,
    encoded: Vec<u8>,
    stripe: Vec<u8>,
    /// Component width of the stripe-wise encode in progress.
    stripe_width: usize,
    options: EncodeOptions,
    session: Option<StripeCompressor<ReferenceCodestream>>,
}

impl Htj2kEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: EncodeOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Sizes the decoded buffer for `frame` and resets every component to 1x1
    /// sub-sampling.
    pub fn decoded_buffer_mut(&mut self, frame: FrameDescriptor) -> Result<&mut [u8]> {
        self.set_frame(frame)?;
        self.decoded.resize(frame.frame_size(), 0);
        Ok(&mut self.decoded)
    }

    /// Sets the frame for a stripe-wise encode without sizing the decoded
    /// buffer. Resets every component to 1x1 sub-sampling.
    pub fn set_frame(&mut self, frame: FrameDescriptor) -> Result<()> {
        frame.validate()?;
        self.frame = Some(frame);
        self.options.params.down_samples = vec![Coords::new(1, 1); frame.component_count as usize];
        Ok(())
    }

    pub fn encoded_bytes(&self) -> &[u8] {
        &self.encoded
    }

    pub fn options(&self) -> &EncodeOptions {
        &self.options
    }

    /// Also clears any precincts.
    pub fn set_decompositions(&mut self, decompositions: u8) {
        self.options.params.decompositions = decompositions;
        self.options.params.precincts.clear();
    }

    /// `quantization_step` only applies when `lossless` is false.
    pub fn set_quality(&mut self, lossless: bool, quantization_step: f32) {
        self.options.params.reversible = lossless;
        self.options.quantization_step = quantization_step;
    }

    pub fn set_progression_order(&mut self, order: ProgressionOrder) {
        self.options.params.progression_order = order;
    }

    pub fn set_down_sample(&mut self, component: usize, down_sample: Coords) -> Result<()> {
        let slot = self
            .options
            .params
            .down_samples
            .get_mut(component)
            .ok_or(StripeError::InvalidArgument)?;
        *slot = down_sample;
        Ok(())
    }

    pub fn set_image_offset(&mut self, offset: Coords) {
        self.options.params.image_offset = offset;
    }

    pub fn set_tile_size(&mut self, size: Coords) {
        self.options.params.tile_size = size;
    }

    pub fn set_tile_offset(&mut self, offset: Coords) {
        self.options.params.tile_offset = offset;
    }

    pub fn set_block_dimensions(&mut self, size: Coords) {
        self.options.params.block_dimensions = size;
    }

    pub fn set_num_precincts(&mut self, levels: usize) {
        self.options.params.precincts.resize(levels, Coords::new(1 << 15, 1 << 15));
    }

    /// Call [`set_num_precincts`](Self::set_num_precincts) first.
    pub fn set_precinct(&mut self, level: usize, size: Coords) -> Result<()> {
        let slot = self
            .options
            .params
            .precincts
            .get_mut(level)
            .ok_or(StripeError::InvalidArgument)?;
        *slot = size;
        Ok(())
    }

    pub fn set_is_using_color_transform(&mut self, enabled: bool) {
        self.options.params.use_color_transform = enabled;
    }

    pub fn set_num_threads(&mut self, num_threads: usize) {
        self.options.num_threads = num_threads;
    }

    /// Encodes the decoded buffer into [`encoded_bytes`](Self::encoded_bytes).
    pub fn encode(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(StripeError::InvalidState);
        }
        let frame = self.frame.ok_or(StripeError::InvalidState)?;
        let (mut compressor, geometry) = self.start_compressor(&frame)?;
        let ComponentGrid { widths, heights } = geometry;
        // Interleaving needs every component on the same grid.
        let layout = if geometry_is_uniform(&widths, &heights) {
            StripeLayout::interleaved(&widths)
        } else {
            StripeLayout::planar(&widths, &heights)
        };
        if frame.bytes_per_sample() == 1 {
            compressor.push_stripe(StripeBufRef::Byte(&self.decoded), &heights, Some(&layout))?;
        } else {
            let words: Vec<i16> = bytemuck::pod_collect_to_vec(&self.decoded);
            compressor.push_stripe(StripeBufRef::Int16(&words), &heights, Some(&layout))?;
        }
        let codestream = compressor.finish()?;
        self.encoded = codestream.into_encoded().ok_or(StripeError::InvalidState)?;
        info!(
            "encoded {}x{}x{} into {} bytes",
            frame.width,
            frame.height,
            frame.component_count,
            self.encoded.len()
        );
        Ok(())
    }

    fn start_compressor(
        &self,
        frame: &FrameDescriptor,
    ) -> Result<(StripeCompressor<ReferenceCodestream>, ComponentGrid)> {
        let siz = build_siz(frame, &self.options.params)?;
        let cod = build_cod(&self.options.params)?;
        let step = (!cod.reversible).then_some(self.options.quantization_step);
        let qcd = QcdParams::for_cod(&cod, step);
        let grid = ComponentGrid {
            widths: (0..siz.components.len()).map(|c| siz.component_rect(c).size.x as usize).collect(),
            heights: (0..siz.components.len()).map(|c| siz.component_rect(c).size.y as usize).collect(),
        };

        let env = match self.options.num_threads {
            0 | 1 => None,
            n => Some(ThreadEnv::new(n)?),
        };
        let codestream = ReferenceCodestream::create(siz, cod, qcd)?;
        let mut compressor = StripeCompressor::new(CompressorOptions {
            env,
            acceleration: self.options.acceleration,
        });
        compressor.start(codestream)?;
        Ok((compressor, grid))
    }

    /// Opens a stripe-wise encode of the frame set by
    /// [`set_frame`](Self::set_frame). Stripes are interleaved, so every
    /// component must share one grid.
    pub fn start_stripes(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(StripeError::InvalidState);
        }
        let frame = self.frame.ok_or(StripeError::InvalidState)?;
        let (compressor, grid) = self.start_compressor(&frame)?;
        if !geometry_is_uniform(&grid.widths, &grid.heights) {
            return Err(StripeError::Unsupported);
        }
        self.stripe_width = grid.widths.first().copied().unwrap_or(0);
        self.session = Some(compressor);
        Ok(())
    }

    /// Heights for the next stripe using the default stripe-height hints.
    pub fn recommended_stripe_heights(&mut self) -> Result<StripeHeights> {
        self.session
            .as_mut()
            .ok_or(StripeError::InvalidState)?
            .recommended_stripe_heights(DEFAULT_PREFERRED_MIN_STRIPE_HEIGHT, DEFAULT_ABSOLUTE_MAX_STRIPE_HEIGHT)
    }

    /// The interleaved buffer for a stripe of `rows` rows, grown as needed.
    pub fn stripe_buffer_mut(&mut self, rows: usize) -> Result<&mut [u8]> {
        let frame = self.frame.ok_or(StripeError::InvalidState)?;
        if self.session.is_none() {
            return Err(StripeError::InvalidState);
        }
        let len = rows * self.stripe_width * frame.component_count as usize * frame.bytes_per_sample();
        self.stripe.resize(len, 0);
        Ok(&mut self.stripe)
    }

    /// Encodes the next `heights[c]` rows of every component from the stripe
    /// buffer. Returns true while rows remain.
    pub fn push_stripe(&mut self, heights: &[usize]) -> Result<bool> {
        let frame = self.frame.ok_or(StripeError::InvalidState)?;
        let session = self.session.as_mut().ok_or(StripeError::InvalidState)?;
        let layout = StripeLayout::interleaved(&vec![self.stripe_width; heights.len()]);
        if frame.bytes_per_sample() == 1 {
            session.push_stripe(StripeBufRef::Byte(&self.stripe), heights, Some(&layout))
        } else {
            let words: Vec<i16> = bytemuck::pod_collect_to_vec(&self.stripe);
            session.push_stripe(StripeBufRef::Int16(&words), heights, Some(&layout))
        }
    }

    /// Completes a stripe-wise encode into [`encoded_bytes`](Self::encoded_bytes).
    /// With rows outstanding the session stays open.
    pub fn finish(&mut self) -> Result<()> {
        let mut session = self.session.take().ok_or(StripeError::InvalidState)?;
        match session.finish() {
            Ok(codestream) => {
                self.encoded = codestream.into_encoded().ok_or(StripeError::InvalidState)?;
                debug!("stripe-wise encode finished with {} bytes", self.encoded.len());
                Ok(())
            }
            Err(e) => {
                self.session = Some(session);
                Err(e)
            }
        }
    }

    /// Drops a stripe-wise encode in progress.
    pub fn reset(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.reset();
        }
    }
}

struct ComponentGrid {
    widths: Vec<usize>,
    heights: Vec<usize>,
}

fn geometry_is_uniform(widths: &[usize], heights: &[usize]) -> bool {
    widths.iter().all(|&w| Some(&w) == widths.first()) && heights.iter().all(|&h| Some(&h) == heights.first())
}

fn build_siz(frame: &FrameDescriptor, params: &CodingParams) -> Result<SizParams> {
    let components = (0..frame.component_count as usize)
        .map(|c| {
            let sub = params.down_sample(c);
            let (sub_x, sub_y) = match (u8::try_from(sub.x), u8::try_from(sub.y)) {
                (Ok(x), Ok(y)) if x > 0 && y > 0 => (x, y),
                _ => return Err(StripeError::InvalidArgument),
            };
            Ok(ComponentInfo {
                sub_x,
                sub_y,
                ..ComponentInfo::new(frame.bits_per_sample, frame.is_signed)
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let extent = Coords::new(
        params.image_offset.x.checked_add(frame.width).ok_or(StripeError::InvalidGeometry)?,
        params.image_offset.y.checked_add(frame.height).ok_or(StripeError::InvalidGeometry)?,
    );
    let tile_size = if params.tile_size.x == 0 || params.tile_size.y == 0 {
        Coords::new(extent.x - params.tile_offset.x.min(extent.x), extent.y - params.tile_offset.y.min(extent.y))
    } else {
        params.tile_size
    };
    let siz = SizParams {
        extent,
        image_offset: params.image_offset,
        tile_size,
        tile_offset: params.tile_offset,
        components,
    };
    siz.validate()?;
    Ok(siz)
}

fn build_cod(params: &CodingParams) -> Result<CodParams> {
    let precincts = params
        .precincts
        .iter()
        .map(|p| {
            if !p.x.is_power_of_two() || !p.y.is_power_of_two() {
                return Err(StripeError::InvalidArgument);
            }
            Ok((p.x.trailing_zeros() as u8, p.y.trailing_zeros() as u8))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CodParams {
        progression_order: params.progression_order,
        num_layers: params.num_layers,
        use_color_transform: params.use_color_transform,
        decomposition_levels: params.decompositions,
        block_width: params.block_dimensions.x,
        block_height: params.block_dimensions.y,
        reversible: params.reversible,
        precincts,
        ..CodParams::default()
    })
}
