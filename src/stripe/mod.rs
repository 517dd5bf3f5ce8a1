//! Stripe transfer engine.
//!
//! Moves raster samples between a caller-owned stripe buffer and the tiles of
//! a [`Codestream`](crate::codestream::Codestream), one stripe at a time.
//! [`StripeDecompressor`] pulls decoded stripes, [`StripeCompressor`] pushes
//! stripes to be encoded.

mod component_state;
mod compressor;
mod decompressor;
mod engine;
mod queue;
mod tile;
pub mod transfer;

pub use compressor::{CompressorOptions, StripeCompressor};
pub use decompressor::{DecompressorOptions, StripeDecompressor};
pub use engine::StripeHeights;
pub use transfer::{Acceleration, LaneKernel, ScalarKernel, TransferKernel};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Sample type of a stripe buffer. The two low bits are log2 of the sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BufferKind {
    Byte = 0,
    Int16 = 1,
    Int32 = 2,
    Float32 = 6,
}

impl BufferKind {
    pub fn bytes_per_sample(self) -> usize {
        1 << (u8::from(self) & 3)
    }

    pub fn is_float(self) -> bool {
        self == BufferKind::Float32
    }

    /// Largest external precision the type can carry.
    pub fn max_precision(self) -> u8 {
        match self {
            BufferKind::Byte => 8,
            BufferKind::Int16 => 16,
            BufferKind::Int32 | BufferKind::Float32 => 32,
        }
    }
}

/// Destination of a decoded stripe.
///
/// Unsigned 8 and 16-bit samples are stored as their bit patterns, so a 16-bit
/// unsigned value of 40000 reads back as `40000u16 as i16`.
#[derive(Debug)]
pub enum StripeBufMut<'a> {
    Byte(&'a mut [u8]),
    Int16(&'a mut [i16]),
    Int32(&'a mut [i32]),
    Float32(&'a mut [f32]),
}

/// Source of a stripe to be encoded.
#[derive(Debug, Clone, Copy)]
pub enum StripeBufRef<'a> {
    Byte(&'a [u8]),
    Int16(&'a [i16]),
    Int32(&'a [i32]),
    Float32(&'a [f32]),
}

impl StripeBufMut<'_> {
    pub fn kind(&self) -> BufferKind {
        match self {
            StripeBufMut::Byte(_) => BufferKind::Byte,
            StripeBufMut::Int16(_) => BufferKind::Int16,
            StripeBufMut::Int32(_) => BufferKind::Int32,
            StripeBufMut::Float32(_) => BufferKind::Float32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StripeBufMut::Byte(b) => b.len(),
            StripeBufMut::Int16(b) => b.len(),
            StripeBufMut::Int32(b) => b.len(),
            StripeBufMut::Float32(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StripeBufRef<'_> {
    pub fn kind(&self) -> BufferKind {
        match self {
            StripeBufRef::Byte(_) => BufferKind::Byte,
            StripeBufRef::Int16(_) => BufferKind::Int16,
            StripeBufRef::Int32(_) => BufferKind::Int32,
            StripeBufRef::Float32(_) => BufferKind::Float32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StripeBufRef::Byte(b) => b.len(),
            StripeBufRef::Int16(b) => b.len(),
            StripeBufRef::Int32(b) => b.len(),
            StripeBufRef::Float32(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happens to buffer columns right of a component's last sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadMode {
    #[default]
    Untouched,
    /// Decoding repeats the last sample of each row up to `row_gap / sample_gap`.
    Replicate,
}

/// Hint forwarded to transfer kernels. It never changes the transferred values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorePreference {
    #[default]
    Default,
    /// The buffer will not be read back soon.
    Streaming,
}

/// Placement of one component's samples in the stripe buffer, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentLayout {
    /// Index of the first sample of the stripe's first row.
    pub sample_offset: usize,
    /// Distance between horizontally adjacent samples.
    pub sample_gap: usize,
    /// Distance between vertically adjacent samples.
    pub row_gap: usize,
    /// External precision; `None` keeps the component's precision.
    pub precision: Option<u8>,
    /// External signedness; `None` keeps the component's signedness.
    pub signed: Option<bool>,
    pub pad: PadMode,
}

impl ComponentLayout {
    pub fn new(sample_offset: usize, sample_gap: usize, row_gap: usize) -> Self {
        Self {
            sample_offset,
            sample_gap,
            row_gap,
            precision: None,
            signed: None,
            pad: PadMode::Untouched,
        }
    }

    pub fn with_precision(mut self, precision: u8, signed: bool) -> Self {
        self.precision = Some(precision);
        self.signed = Some(signed);
        self
    }

    pub fn with_pad(mut self, pad: PadMode) -> Self {
        self.pad = pad;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StripeLayout {
    pub components: Vec<ComponentLayout>,
    pub store: StorePreference,
}

impl StripeLayout {
    /// Samples of all components interleaved, one row of `widths[0]` pixels per row.
    pub fn interleaved(widths: &[usize]) -> Self {
        let n = widths.len();
        Self {
            components: widths
                .iter()
                .enumerate()
                .map(|(c, &w)| ComponentLayout::new(c, n, n * w))
                .collect(),
            store: StorePreference::Default,
        }
    }

    /// Each component's stripe rows stored contiguously, components one after another.
    pub fn planar(widths: &[usize], heights: &[usize]) -> Self {
        let mut offset = 0;
        let components = widths
            .iter()
            .zip(heights)
            .map(|(&w, &h)| {
                let layout = ComponentLayout::new(offset, 1, w);
                offset += w * h;
                layout
            })
            .collect();
        Self {
            components,
            store: StorePreference::Default,
        }
    }
}
