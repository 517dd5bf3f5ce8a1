//! Codec-core capability consumed by the stripe engine.
//!
//! The stripe engine never looks inside a codestream. It asks a [`Codestream`]
//! for image, component and tile geometry, opens tiles, and moves one sample
//! line at a time through the resulting [`TileAccess`] handles.
//!
//! - `geometry`: reference-grid coordinates, rectangles and ceil-division helpers.
//! - `thread_env`: worker pool and job queues owned by the codec side.
//! - `reference`: a JPEG 2000-style codestream carrying raw wavelet coefficients,
//!   used to exercise the engine end to end.
//! - `marker_code` / `stream_reader` / `stream_writer` / `parser` / `writer`:
//!   marker syntax for the reference codestream.
//! - `dwt` / `color` / `quantization`: the reference codestream's sample pipeline.

pub mod color;
pub mod dwt;
pub mod geometry;
pub mod marker_code;
pub mod params;
pub mod parser;
pub mod quantization;
pub mod reference;
pub mod stream_reader;
pub mod stream_writer;
pub mod thread_env;
pub mod writer;

pub use geometry::{Coords, Rect};
pub use params::{CodParams, ComponentInfo, ProgressionOrder, QcdParams, SizParams};
pub use reference::{ParseMode, ReferenceCodestream, ReferenceTile};
pub use thread_env::{ThreadEnv, ThreadQueue};

use crate::error::Result;

/// Representation of the sample lines a tile-component exchanges with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Absolute integers at the component's original precision, level shifted so
    /// that unsigned data is centred on zero. Used by reversible coding paths.
    Int,
    /// Normalised floats with nominal range [-0.5, 0.5). Used by irreversible paths.
    Float,
}

/// One line of tile-component samples in the codec's internal representation.
#[derive(Debug, Clone, PartialEq)]
pub enum LineBuf {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

impl LineBuf {
    pub fn new(kind: LineKind, width: usize) -> Self {
        match kind {
            LineKind::Int => LineBuf::Int(vec![0; width]),
            LineKind::Float => LineBuf::Float(vec![0.0; width]),
        }
    }

    pub fn kind(&self) -> LineKind {
        match self {
            LineBuf::Int(_) => LineKind::Int,
            LineBuf::Float(_) => LineKind::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LineBuf::Int(v) => v.len(),
            LineBuf::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-shapes the line for reuse, keeping the allocation when possible.
    pub fn reset(&mut self, kind: LineKind, width: usize) {
        match (self, kind) {
            (LineBuf::Int(v), LineKind::Int) => v.resize(width, 0),
            (LineBuf::Float(v), LineKind::Float) => v.resize(width, 0.0),
            (line, kind) => *line = LineBuf::new(kind, width),
        }
    }
}

/// Geometry of one image component, in the component's own (sub-sampled) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentGeometry {
    pub dims: Rect,
    pub sub_sampling: Coords,
    pub precision: u8,
    pub signed: bool,
}

/// Threading context handed to [`Codestream::open_tile`] in multi-threaded mode.
///
/// A tile opened with a threading context is in delayed-start mode: its jobs are
/// only scheduled once [`TileAccess::start`] has been called.
#[derive(Clone, Copy)]
pub struct TileThreading<'a> {
    pub env: &'a ThreadEnv,
    pub queue: &'a ThreadQueue,
}

/// The codec-core collaborator driven by the stripe engine.
pub trait Codestream {
    type Tile: TileAccess;

    /// Number of components visible to the engine, after any input restrictions.
    fn num_components(&self) -> usize;

    /// Image area on the reference grid.
    fn image_rect(&self) -> Rect;

    fn component_geometry(&self, component: usize) -> Result<ComponentGeometry>;

    /// Number of tiles across (`x`) and down (`y`).
    fn tile_grid(&self) -> Coords;

    /// Region covered by a tile-component, in component coordinates.
    fn tile_component_dims(&self, tile: Coords, component: usize) -> Result<Rect>;

    /// True when header parsing is strict.
    fn is_fussy(&self) -> bool;

    fn open_tile(&mut self, tile: Coords, threading: Option<TileThreading<'_>>) -> Result<Self::Tile>;

    fn close_tile(&mut self, tile: Self::Tile, env: Option<&ThreadEnv>) -> Result<()>;

    /// Flushes whatever the codestream still owes its target. Decoding
    /// codestreams have nothing to flush.
    fn finalize(&mut self, _env: Option<&ThreadEnv>) -> Result<()> {
        Ok(())
    }
}

/// An open tile of a [`Codestream`].
pub trait TileAccess {
    fn coords(&self) -> Coords;

    fn line_kind(&self, component: usize) -> LineKind;

    /// Finishes a delayed start. Returns `Ok(false)` if the tile needs to be
    /// started again before all of its jobs are live.
    fn start(&mut self, env: &ThreadEnv) -> Result<bool>;

    /// Produces the next line of `component`, top to bottom.
    fn pull_line(&mut self, component: usize, line: &mut LineBuf) -> Result<()>;

    /// Accepts the next line of `component`, top to bottom.
    fn push_line(&mut self, component: usize, line: &LineBuf) -> Result<()>;
}
