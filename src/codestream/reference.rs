//! A JPEG 2000-style codestream whose tile bodies carry raw wavelet coefficients.
//!
//! Each tile body holds, component after component, the tile-component's
//! coefficient plane in Mallat layout as big-endian `i32` values. Reversible
//! streams store 5/3 coefficients directly; irreversible streams store 9/7
//! coefficients quantised with the QCD step.
//!
//! Decoding runs per tile on the first line request, or as a background job on
//! the [`ThreadEnv`] when the tile was opened in delayed-start mode. Encoding
//! collects pushed lines and transforms a tile when it is closed, in the
//! background when a thread environment is supplied.

use std::ops::Range;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, trace};

use super::color::{forward_ict, forward_rct, inverse_ict, inverse_rct};
use super::dwt::{Dwt53, Dwt97, forward_2d, inverse_2d};
use super::geometry::{Coords, Rect};
pub use super::parser::ParseMode;
use super::parser::CodestreamParser;
use super::params::{CodParams, QcdParams, SizParams};
use super::quantization::{dequantize_scalar, quantize_scalar};
use super::thread_env::{ThreadEnv, ThreadQueue};
use super::writer::CodestreamWriter;
use super::{Codestream, ComponentGeometry, LineBuf, LineKind, TileAccess, TileThreading};
use crate::constants::COLOR_COMPONENTS;
use crate::error::{Result, StripeError};

/// A decoded or collected tile-component plane, row-major.
#[derive(Debug, Clone)]
struct Plane {
    width: usize,
    height: usize,
    samples: LineBuf,
    next_row: usize,
}

impl Plane {
    fn new(kind: LineKind, rect: Rect) -> Self {
        Self {
            width: rect.size.x as usize,
            height: rect.size.y as usize,
            samples: LineBuf::new(kind, rect.area()),
            next_row: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.next_row >= self.height
    }
}

/// Everything needed to transform one tile, shareable with worker jobs.
#[derive(Debug, Clone)]
struct TileCodec {
    siz: SizParams,
    cod: CodParams,
    qcd: QcdParams,
    discard_levels: u8,
    /// Components decoded per tile; the colour transform needs all three.
    decoded_components: usize,
    visible_components: usize,
    fussy: bool,
}

impl TileCodec {
    fn line_kind(&self) -> LineKind {
        if self.cod.reversible {
            LineKind::Int
        } else {
            LineKind::Float
        }
    }

    fn uses_color_transform(&self) -> bool {
        self.cod.use_color_transform && self.decoded_components >= COLOR_COMPONENTS as usize
    }

    fn decode(&self, tile: Coords, body: &[u8]) -> Result<Vec<Plane>> {
        let expected: usize = (0..self.siz.components.len())
            .map(|c| self.siz.tile_component_rect(tile, c).area() * 4)
            .sum();
        if self.fussy && body.len() != expected {
            return Err(StripeError::InvalidData);
        }

        let mut offset = 0;
        let mut planes = Vec::with_capacity(self.decoded_components);
        for c in 0..self.decoded_components {
            let rect = self.siz.tile_component_rect(tile, c);
            let words = read_coefficients(body, offset, rect.area());
            offset += rect.area() * 4;
            planes.push(self.synthesize(rect, words));
        }

        if self.uses_color_transform() {
            if let [p0, p1, p2, ..] = planes.as_mut_slice() {
                match (&mut p0.samples, &mut p1.samples, &mut p2.samples) {
                    (LineBuf::Int(a), LineBuf::Int(b), LineBuf::Int(c)) => inverse_rct(a, b, c),
                    (LineBuf::Float(a), LineBuf::Float(b), LineBuf::Float(c)) => inverse_ict(a, b, c),
                    _ => return Err(StripeError::InvalidState),
                }
            }
        }
        planes.truncate(self.visible_components);
        trace!("decoded tile ({}, {})", tile.x, tile.y);
        Ok(planes)
    }

    // Inverse DWT down to the requested resolution, then crop the low band.
    fn synthesize(&self, rect: Rect, mut words: Vec<i32>) -> Plane {
        let stride = rect.size.x as usize;
        let levels = self.cod.decomposition_levels;
        let reduced = rect.reduced(self.discard_levels);
        let mut plane = Plane::new(self.line_kind(), reduced);
        let (rw, rh) = (plane.width, plane.height);
        if self.cod.reversible {
            inverse_2d::<Dwt53>(&mut words, stride, rect, levels, self.discard_levels);
            plane.samples = LineBuf::Int(crop(&words, stride, rw, rh));
        } else {
            let step = self.qcd.step_size.unwrap_or(1.0);
            let mut coeffs: Vec<f32> = words.iter().map(|&q| dequantize_scalar(q, step)).collect();
            inverse_2d::<Dwt97>(&mut coeffs, stride, rect, levels, self.discard_levels);
            plane.samples = LineBuf::Float(crop(&coeffs, stride, rw, rh));
        }
        plane
    }

    fn encode(&self, tile: Coords, mut planes: Vec<Plane>) -> Vec<u8> {
        if self.uses_color_transform() {
            if let [p0, p1, p2, ..] = planes.as_mut_slice() {
                match (&mut p0.samples, &mut p1.samples, &mut p2.samples) {
                    (LineBuf::Int(a), LineBuf::Int(b), LineBuf::Int(c)) => forward_rct(a, b, c),
                    (LineBuf::Float(a), LineBuf::Float(b), LineBuf::Float(c)) => forward_ict(a, b, c),
                    _ => {}
                }
            }
        }
        let levels = self.cod.decomposition_levels;
        let step = self.qcd.step_size.unwrap_or(1.0);
        let mut body = Vec::new();
        for (c, plane) in planes.iter_mut().enumerate() {
            let rect = self.siz.tile_component_rect(tile, c);
            let stride = plane.width;
            let words: Vec<i32> = match &mut plane.samples {
                LineBuf::Int(samples) => {
                    forward_2d::<Dwt53>(samples, stride, rect, levels);
                    std::mem::take(samples)
                }
                LineBuf::Float(samples) => {
                    forward_2d::<Dwt97>(samples, stride, rect, levels);
                    samples.iter().map(|&v| quantize_scalar(v, step)).collect()
                }
            };
            body.reserve(words.len() * 4);
            for w in words {
                body.extend_from_slice(&w.to_be_bytes());
            }
        }
        trace!("encoded tile ({}, {}) into {} bytes", tile.x, tile.y, body.len());
        body
    }
}

fn read_coefficients(body: &[u8], offset: usize, count: usize) -> Vec<i32> {
    let mut words = vec![0i32; count];
    let available = body.get(offset..).unwrap_or(&[]);
    for (w, chunk) in words.iter_mut().zip(available.chunks_exact(4)) {
        *w = i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

fn crop<T: Copy>(plane: &[T], stride: usize, width: usize, height: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(width * height);
    for y in 0..height {
        out.extend_from_slice(&plane[y * stride..y * stride + width]);
    }
    out
}

type DecodeResult = Result<Vec<Plane>>;

struct EncodeTarget {
    tiles: Arc<Mutex<Vec<Option<Vec<u8>>>>>,
    close_jobs: Option<(ThreadEnv, ThreadQueue)>,
    finished: Option<Vec<u8>>,
}

enum Direction {
    Input {
        bytes: Arc<[u8]>,
        tiles: Vec<Option<Range<usize>>>,
    },
    Output(EncodeTarget),
}

pub struct ReferenceCodestream {
    codec: Arc<TileCodec>,
    direction: Direction,
}

impl ReferenceCodestream {
    /// Parses the main header and indexes the tile-parts of `bytes`.
    pub fn open(bytes: impl Into<Arc<[u8]>>, mode: ParseMode) -> Result<Self> {
        let bytes = bytes.into();
        let parsed = CodestreamParser::new(&bytes, mode).parse()?;
        check_color_transform(&parsed.siz, &parsed.cod).map_err(|_| StripeError::InvalidData)?;
        let count = parsed.siz.components.len();
        debug!(
            "opened codestream {}x{} with {} components, {} tiles",
            parsed.siz.image_rect().size.x,
            parsed.siz.image_rect().size.y,
            count,
            parsed.siz.num_tiles()
        );
        Ok(Self {
            codec: Arc::new(TileCodec {
                siz: parsed.siz,
                cod: parsed.cod,
                qcd: parsed.qcd,
                discard_levels: 0,
                decoded_components: count,
                visible_components: count,
                fussy: mode == ParseMode::Fussy,
            }),
            direction: Direction::Input {
                bytes,
                tiles: parsed.tiles,
            },
        })
    }

    /// Creates an output codestream that is filled tile by tile.
    pub fn create(siz: SizParams, cod: CodParams, qcd: QcdParams) -> Result<Self> {
        siz.validate()?;
        cod.validate()?;
        check_color_transform(&siz, &cod)?;
        if cod.reversible != qcd.step_size.is_none() {
            return Err(StripeError::InvalidArgument);
        }
        let count = siz.components.len();
        let num_tiles = siz.num_tiles();
        Ok(Self {
            codec: Arc::new(TileCodec {
                siz,
                cod,
                qcd,
                discard_levels: 0,
                decoded_components: count,
                visible_components: count,
                fussy: true,
            }),
            direction: Direction::Output(EncodeTarget {
                tiles: Arc::new(Mutex::new(vec![None; num_tiles])),
                close_jobs: None,
                finished: None,
            }),
        })
    }

    pub fn siz(&self) -> &SizParams {
        &self.codec.siz
    }

    pub fn cod(&self) -> &CodParams {
        &self.codec.cod
    }

    pub fn qcd(&self) -> &QcdParams {
        &self.codec.qcd
    }

    pub fn discard_levels(&self) -> u8 {
        self.codec.discard_levels
    }

    pub fn set_fussy(&mut self, fussy: bool) {
        self.codec_mut().fussy = fussy;
    }

    /// Limits decoding to the first `max_components` components (0 keeps all)
    /// and to the resolution `discard_levels` halvings below full size.
    pub fn apply_input_restrictions(&mut self, max_components: usize, discard_levels: u8) -> Result<()> {
        if !matches!(self.direction, Direction::Input { .. }) {
            return Err(StripeError::InvalidState);
        }
        let total = self.codec.siz.components.len();
        if discard_levels > self.codec.cod.decomposition_levels || max_components > total {
            return Err(StripeError::InvalidArgument);
        }
        let representable = self
            .codec
            .siz
            .components
            .iter()
            .all(|info| scaled_sub_sampling(info.sub_x, info.sub_y, discard_levels).is_some());
        if !representable {
            return Err(StripeError::InvalidArgument);
        }
        let visible = if max_components == 0 { total } else { max_components };
        let color = self.codec.cod.use_color_transform;
        let codec = self.codec_mut();
        codec.visible_components = visible;
        codec.decoded_components = if color {
            visible.max(COLOR_COMPONENTS as usize)
        } else {
            visible
        };
        codec.discard_levels = discard_levels;
        Ok(())
    }

    /// The finished codestream, once an output codestream has been finalised.
    pub fn encoded_bytes(&self) -> Option<&[u8]> {
        match &self.direction {
            Direction::Output(target) => target.finished.as_deref(),
            Direction::Input { bytes, .. } => Some(&bytes[..]),
        }
    }

    pub fn into_encoded(self) -> Option<Vec<u8>> {
        match self.direction {
            Direction::Output(target) => target.finished,
            Direction::Input { bytes, .. } => Some(bytes.to_vec()),
        }
    }

    // Parameters only change between sessions, never while tile jobs hold the codec.
    fn codec_mut(&mut self) -> &mut TileCodec {
        Arc::make_mut(&mut self.codec)
    }

    fn tile_index(&self, tile: Coords) -> Result<usize> {
        let grid = self.codec.siz.tile_grid();
        if tile.x >= grid.x || tile.y >= grid.y {
            return Err(StripeError::TileCreationFailed);
        }
        Ok(self.codec.siz.tile_index(tile))
    }
}

fn check_color_transform(siz: &SizParams, cod: &CodParams) -> Result<()> {
    if !cod.use_color_transform {
        return Ok(());
    }
    let n = COLOR_COMPONENTS as usize;
    if siz.components.len() < n {
        return Err(StripeError::InvalidArgument);
    }
    let first = &siz.components[0];
    if siz.components[1..n]
        .iter()
        .any(|c| c.sub_sampling() != first.sub_sampling())
    {
        return Err(StripeError::InvalidArgument);
    }
    Ok(())
}

impl Codestream for ReferenceCodestream {
    type Tile = ReferenceTile;

    fn num_components(&self) -> usize {
        self.codec.visible_components
    }

    fn image_rect(&self) -> Rect {
        self.codec.siz.image_rect()
    }

    fn component_geometry(&self, component: usize) -> Result<ComponentGeometry> {
        if component >= self.num_components() {
            return Err(StripeError::InvalidArgument);
        }
        let info = self.codec.siz.components[component];
        Ok(ComponentGeometry {
            dims: self
                .codec
                .siz
                .component_rect(component)
                .reduced(self.codec.discard_levels),
            sub_sampling: scaled_sub_sampling(info.sub_x, info.sub_y, self.codec.discard_levels)
                .ok_or(StripeError::InvalidArgument)?,
            precision: info.precision,
            signed: info.signed,
        })
    }

    fn tile_grid(&self) -> Coords {
        self.codec.siz.tile_grid()
    }

    fn tile_component_dims(&self, tile: Coords, component: usize) -> Result<Rect> {
        if component >= self.num_components() {
            return Err(StripeError::InvalidArgument);
        }
        self.tile_index(tile).map_err(|_| StripeError::InvalidArgument)?;
        Ok(self
            .codec
            .siz
            .tile_component_rect(tile, component)
            .reduced(self.codec.discard_levels))
    }

    fn is_fussy(&self) -> bool {
        self.codec.fussy
    }

    fn open_tile(&mut self, tile: Coords, threading: Option<TileThreading<'_>>) -> Result<ReferenceTile> {
        let index = self.tile_index(tile)?;
        let codec = Arc::clone(&self.codec);
        let state = match &self.direction {
            Direction::Input { bytes, tiles } => {
                let range = match &tiles[index] {
                    Some(range) => range.clone(),
                    None if codec.fussy => return Err(StripeError::TileCreationFailed),
                    None => 0..0,
                };
                let body = TileBody {
                    bytes: Arc::clone(bytes),
                    range,
                };
                match threading {
                    Some(t) => TileState::Delayed {
                        body,
                        queue: t.queue.clone(),
                    },
                    None => TileState::Lazy(body),
                }
            }
            Direction::Output(target) => {
                let done = target.tiles.lock().unwrap_or_else(PoisonError::into_inner)[index].is_some();
                if done || target.finished.is_some() {
                    return Err(StripeError::TileCreationFailed);
                }
                let planes = (0..codec.siz.components.len())
                    .map(|c| Plane::new(codec.line_kind(), codec.siz.tile_component_rect(tile, c)))
                    .collect();
                TileState::Collecting(planes)
            }
        };
        trace!("open tile ({}, {})", tile.x, tile.y);
        Ok(ReferenceTile {
            coords: tile,
            index,
            codec,
            state,
        })
    }

    fn close_tile(&mut self, tile: ReferenceTile, env: Option<&ThreadEnv>) -> Result<()> {
        trace!("close tile ({}, {})", tile.coords.x, tile.coords.y);
        let target = match &mut self.direction {
            Direction::Input { .. } => return Ok(()),
            Direction::Output(target) => target,
        };
        let planes = match tile.state {
            TileState::Collecting(planes) if planes.iter().all(Plane::is_complete) => planes,
            _ => return Err(StripeError::InvalidState),
        };
        let (codec, coords, index) = (tile.codec, tile.coords, tile.index);
        let slots = Arc::clone(&target.tiles);
        match env {
            Some(env) => {
                let (env, queue) = target
                    .close_jobs
                    .get_or_insert_with(|| (env.clone(), env.create_queue()));
                env.schedule(queue, move || {
                    let body = codec.encode(coords, planes);
                    slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(body);
                });
            }
            None => {
                let body = codec.encode(coords, planes);
                slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(body);
            }
        }
        Ok(())
    }

    fn finalize(&mut self, _env: Option<&ThreadEnv>) -> Result<()> {
        let target = match &mut self.direction {
            Direction::Input { .. } => return Ok(()),
            Direction::Output(target) => target,
        };
        if target.finished.is_some() {
            return Ok(());
        }
        if let Some((env, queue)) = target.close_jobs.take() {
            env.join(&queue);
        }
        let tiles = std::mem::take(&mut *target.tiles.lock().unwrap_or_else(PoisonError::into_inner));
        if tiles.iter().any(Option::is_none) {
            return Err(StripeError::IncompleteImage);
        }
        let mut writer = CodestreamWriter::new();
        writer.write_main_header(&self.codec.siz, &self.codec.cod, &self.codec.qcd);
        for (index, body) in tiles.into_iter().flatten().enumerate() {
            let index = u16::try_from(index).map_err(|_| StripeError::Unsupported)?;
            writer.write_tile_part(index, &body);
        }
        writer.write_eoc();
        debug!("finalized codestream of {} bytes", writer.len());
        target.finished = Some(writer.into_bytes());
        Ok(())
    }
}

/// Sub-sampling of a component seen `levels` halvings down, while it still
/// fits the engine's signed ratio counter.
fn scaled_sub_sampling(sub_x: u8, sub_y: u8, levels: u8) -> Option<Coords> {
    let scale = 1u32.checked_shl(levels.into())?;
    let limit = i32::MAX as u32;
    let x = u32::from(sub_x).checked_mul(scale).filter(|&v| v <= limit)?;
    let y = u32::from(sub_y).checked_mul(scale).filter(|&v| v <= limit)?;
    Some(Coords::new(x, y))
}

struct TileBody {
    bytes: Arc<[u8]>,
    range: Range<usize>,
}

impl TileBody {
    fn as_slice(&self) -> &[u8] {
        self.bytes.get(self.range.clone()).unwrap_or(&[])
    }
}

enum TileState {
    /// Decoded synchronously on the first line request.
    Lazy(TileBody),
    /// Opened in delayed-start mode and waiting for [`TileAccess::start`].
    Delayed { body: TileBody, queue: ThreadQueue },
    Decoding(Receiver<DecodeResult>),
    Ready(Vec<Plane>),
    Collecting(Vec<Plane>),
}

pub struct ReferenceTile {
    coords: Coords,
    index: usize,
    codec: Arc<TileCodec>,
    state: TileState,
}

impl ReferenceTile {
    fn decoded_planes(&mut self) -> Result<&mut Vec<Plane>> {
        let next = match std::mem::replace(&mut self.state, TileState::Ready(Vec::new())) {
            TileState::Lazy(body) => TileState::Ready(self.codec.decode(self.coords, body.as_slice())?),
            TileState::Decoding(rx) => {
                // A dropped sender means the job panicked.
                let planes = rx.recv().map_err(|_| StripeError::InvalidState)??;
                TileState::Ready(planes)
            }
            state @ TileState::Delayed { .. } => {
                self.state = state;
                return Err(StripeError::InvalidState);
            }
            state => state,
        };
        self.state = next;
        match &mut self.state {
            TileState::Ready(planes) | TileState::Collecting(planes) => Ok(planes),
            _ => Err(StripeError::InvalidState),
        }
    }
}

impl TileAccess for ReferenceTile {
    fn coords(&self) -> Coords {
        self.coords
    }

    fn line_kind(&self, _component: usize) -> LineKind {
        self.codec.line_kind()
    }

    fn start(&mut self, env: &ThreadEnv) -> Result<bool> {
        if let TileState::Delayed { .. } = &self.state {
            let TileState::Delayed { body, queue } =
                std::mem::replace(&mut self.state, TileState::Ready(Vec::new()))
            else {
                return Err(StripeError::InvalidState);
            };
            let (tx, rx) = mpsc::channel();
            let codec = Arc::clone(&self.codec);
            let coords = self.coords;
            env.schedule(&queue, move || {
                // The receiver may already be gone if the tile was abandoned.
                let _ = tx.send(codec.decode(coords, body.as_slice()));
            });
            self.state = TileState::Decoding(rx);
        }
        Ok(true)
    }

    fn pull_line(&mut self, component: usize, line: &mut LineBuf) -> Result<()> {
        if matches!(self.state, TileState::Collecting(_)) {
            return Err(StripeError::InvalidState);
        }
        let plane = self
            .decoded_planes()?
            .get_mut(component)
            .ok_or(StripeError::InvalidArgument)?;
        if plane.is_complete() {
            return Err(StripeError::InvalidState);
        }
        let start = plane.next_row * plane.width;
        let range = start..start + plane.width;
        line.reset(plane.samples.kind(), plane.width);
        match (&plane.samples, line) {
            (LineBuf::Int(src), LineBuf::Int(dst)) => dst.copy_from_slice(&src[range]),
            (LineBuf::Float(src), LineBuf::Float(dst)) => dst.copy_from_slice(&src[range]),
            _ => return Err(StripeError::InvalidState),
        }
        plane.next_row += 1;
        Ok(())
    }

    fn push_line(&mut self, component: usize, line: &LineBuf) -> Result<()> {
        let TileState::Collecting(planes) = &mut self.state else {
            return Err(StripeError::InvalidState);
        };
        let plane = planes.get_mut(component).ok_or(StripeError::InvalidArgument)?;
        if plane.is_complete() {
            return Err(StripeError::InvalidState);
        }
        if line.len() < plane.width {
            return Err(StripeError::InvalidArgument);
        }
        let start = plane.next_row * plane.width;
        let width = plane.width;
        match (&mut plane.samples, line) {
            (LineBuf::Int(dst), LineBuf::Int(src)) => dst[start..start + width].copy_from_slice(&src[..width]),
            (LineBuf::Float(dst), LineBuf::Float(src)) => {
                dst[start..start + width].copy_from_slice(&src[..width])
            }
            _ => return Err(StripeError::InvalidArgument),
        }
        plane.next_row += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::params::ComponentInfo;

    fn encode_ramp(siz: SizParams, cod: CodParams, env: Option<&ThreadEnv>) -> Vec<u8> {
        let qcd = QcdParams::for_cod(&cod, None);
        let mut cs = ReferenceCodestream::create(siz, cod, qcd).unwrap();
        let grid = cs.tile_grid();
        for ty in 0..grid.y {
            for tx in 0..grid.x {
                let coords = Coords::new(tx, ty);
                let mut tile = cs.open_tile(coords, None).unwrap();
                for c in 0..cs.num_components() {
                    let dims = cs.tile_component_dims(coords, c).unwrap();
                    for y in dims.pos.y..dims.bottom() {
                        let line = LineBuf::Int(
                            (dims.pos.x..dims.right())
                                .map(|x| (x as i32 * 3 + y as i32 * 5 + c as i32) % 200 - 100)
                                .collect(),
                        );
                        tile.push_line(c, &line).unwrap();
                    }
                }
                cs.close_tile(tile, env).unwrap();
            }
        }
        cs.finalize(env).unwrap();
        cs.into_encoded().unwrap()
    }

    fn decode_all(cs: &mut ReferenceCodestream) -> Vec<Vec<i32>> {
        let grid = cs.tile_grid();
        let mut out = vec![Vec::new(); cs.num_components()];
        for ty in 0..grid.y {
            for tx in 0..grid.x {
                let coords = Coords::new(tx, ty);
                let mut tile = cs.open_tile(coords, None).unwrap();
                for (c, samples) in out.iter_mut().enumerate() {
                    let dims = cs.tile_component_dims(coords, c).unwrap();
                    let mut line = LineBuf::new(LineKind::Int, 0);
                    for _ in 0..dims.size.y {
                        tile.pull_line(c, &mut line).unwrap();
                        if let LineBuf::Int(v) = &line {
                            samples.extend_from_slice(v);
                        }
                    }
                }
                cs.close_tile(tile, None).unwrap();
            }
        }
        out
    }

    fn multi_tile_siz() -> SizParams {
        let mut siz = SizParams::new(13, 9, vec![ComponentInfo::new(8, true); 3]);
        siz.tile_size = Coords::new(8, 4);
        siz.image_offset = Coords::new(1, 1);
        siz
    }

    #[test]
    fn test_reversible_tile_roundtrip() {
        let cod = CodParams {
            decomposition_levels: 2,
            use_color_transform: true,
            ..CodParams::default()
        };
        let bytes = encode_ramp(multi_tile_siz(), cod, None);
        let mut cs = ReferenceCodestream::open(bytes, ParseMode::Fussy).unwrap();
        assert_eq!(cs.tile_grid(), Coords::new(2, 3));
        let decoded = decode_all(&mut cs);
        // Tile order, row-major within each tile.
        let first_tile = cs.tile_component_dims(Coords::new(0, 0), 0).unwrap();
        assert_eq!(first_tile, Rect::from_edges(1, 1, 8, 4));
        assert_eq!(decoded[0][0], (3 + 5) % 200 - 100);
        assert_eq!(decoded[2][1], (2 * 3 + 5 + 2) % 200 - 100);
    }

    #[test]
    fn test_background_close_matches_inline() {
        let env = ThreadEnv::new(2).unwrap();
        let inline = encode_ramp(multi_tile_siz(), CodParams::default(), None);
        let threaded = encode_ramp(multi_tile_siz(), CodParams::default(), Some(&env));
        assert_eq!(inline, threaded);
    }

    #[test]
    fn test_delayed_start_requires_start() {
        let bytes = encode_ramp(multi_tile_siz(), CodParams::default(), None);
        let mut cs = ReferenceCodestream::open(bytes, ParseMode::Fussy).unwrap();
        let env = ThreadEnv::new(2).unwrap();
        let queue = env.create_queue();
        let threading = TileThreading {
            env: &env,
            queue: &queue,
        };
        let mut tile = cs.open_tile(Coords::new(1, 0), Some(threading)).unwrap();
        let mut line = LineBuf::new(LineKind::Int, 0);
        assert_eq!(tile.pull_line(0, &mut line), Err(StripeError::InvalidState));
        assert_eq!(tile.start(&env), Ok(true));
        env.join(&queue);
        tile.pull_line(0, &mut line).unwrap();
        assert_eq!(line.len(), 5);
    }

    #[test]
    fn test_reduced_resolution_geometry() {
        let bytes = encode_ramp(multi_tile_siz(), CodParams::default(), None);
        let mut cs = ReferenceCodestream::open(bytes, ParseMode::Fussy).unwrap();
        assert_eq!(cs.apply_input_restrictions(1, 9), Err(StripeError::InvalidArgument));
        cs.apply_input_restrictions(1, 1).unwrap();
        assert_eq!(cs.num_components(), 1);
        let geometry = cs.component_geometry(0).unwrap();
        assert_eq!(geometry.dims, Rect::from_edges(1, 1, 7, 5));
        let decoded = decode_all(&mut cs);
        assert_eq!(decoded[0].len(), geometry.dims.area());
    }

    #[test]
    fn test_incomplete_output_is_rejected() {
        let siz = multi_tile_siz();
        let mut cs = ReferenceCodestream::create(siz, CodParams::default(), QcdParams::default()).unwrap();
        let tile = cs.open_tile(Coords::new(0, 0), None).unwrap();
        assert_eq!(cs.close_tile(tile, None), Err(StripeError::InvalidState));
        assert_eq!(cs.finalize(None), Err(StripeError::IncompleteImage));
        assert_eq!(
            cs.open_tile(Coords::new(5, 0), None).err(),
            Some(StripeError::TileCreationFailed)
        );
    }
}
