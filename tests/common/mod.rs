//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use htj2k_stripe::codestream::{
    Codestream, ComponentGeometry, ComponentInfo, Coords, LineBuf, LineKind, Rect, SizParams, ThreadEnv, TileAccess,
    TileThreading,
};
use htj2k_stripe::error::{Result, StripeError};

/// What the engine asked a [`RecordingCodestream`] to do, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Open(Coords),
    Start(Coords),
    Pull { tile: Coords, component: usize, row: u32 },
    Close(Coords),
}

/// Synthetic unsigned sample of `component` at component coordinates (x, y).
pub fn pattern(component: usize, x: u32, y: u32, precision: u8) -> u32 {
    (x * 7 + y * 13 + component as u32 * 5) % (1 << precision)
}

/// A decode-only codestream that produces [`pattern`] samples and logs every call.
pub struct RecordingCodestream {
    pub siz: SizParams,
    pub log: Arc<Mutex<Vec<Event>>>,
}

impl RecordingCodestream {
    pub fn new(siz: SizParams) -> Self {
        Self {
            siz,
            log: Arc::default(),
        }
    }

    /// `width`x`height` unsigned 8-bit image with the given vertical sub-sampling per component.
    pub fn with_tiles(width: u32, height: u32, tile: Coords, sub_y: &[u8]) -> Self {
        let components = sub_y
            .iter()
            .map(|&s| ComponentInfo {
                sub_y: s,
                ..ComponentInfo::new(8, false)
            })
            .collect();
        let mut siz = SizParams::new(width, height, components);
        siz.tile_size = tile;
        Self::new(siz)
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }
}

impl Codestream for RecordingCodestream {
    type Tile = RecordingTile;

    fn num_components(&self) -> usize {
        self.siz.components.len()
    }

    fn image_rect(&self) -> Rect {
        self.siz.image_rect()
    }

    fn component_geometry(&self, component: usize) -> Result<ComponentGeometry> {
        let info = self.siz.components.get(component).ok_or(StripeError::InvalidArgument)?;
        Ok(ComponentGeometry {
            dims: self.siz.component_rect(component),
            sub_sampling: info.sub_sampling(),
            precision: info.precision,
            signed: info.signed,
        })
    }

    fn tile_grid(&self) -> Coords {
        self.siz.tile_grid()
    }

    fn tile_component_dims(&self, tile: Coords, component: usize) -> Result<Rect> {
        Ok(self.siz.tile_component_rect(tile, component))
    }

    fn is_fussy(&self) -> bool {
        true
    }

    fn open_tile(&mut self, tile: Coords, threading: Option<TileThreading<'_>>) -> Result<RecordingTile> {
        let grid = self.siz.tile_grid();
        if tile.x >= grid.x || tile.y >= grid.y {
            return Err(StripeError::InvalidArgument);
        }
        self.log.lock().unwrap().push(Event::Open(tile));
        let components = (0..self.siz.components.len())
            .map(|c| (self.siz.tile_component_rect(tile, c), self.siz.components[c].precision))
            .collect::<Vec<_>>();
        Ok(RecordingTile {
            coords: tile,
            next_rows: components.iter().map(|(r, _)| r.pos.y).collect(),
            components,
            waiting_for_start: threading.is_some(),
            log: Arc::clone(&self.log),
        })
    }

    fn close_tile(&mut self, tile: RecordingTile, _env: Option<&ThreadEnv>) -> Result<()> {
        self.log.lock().unwrap().push(Event::Close(tile.coords));
        Ok(())
    }
}

pub struct RecordingTile {
    coords: Coords,
    components: Vec<(Rect, u8)>,
    next_rows: Vec<u32>,
    waiting_for_start: bool,
    log: Arc<Mutex<Vec<Event>>>,
}

impl TileAccess for RecordingTile {
    fn coords(&self) -> Coords {
        self.coords
    }

    fn line_kind(&self, _component: usize) -> LineKind {
        LineKind::Int
    }

    fn start(&mut self, _env: &ThreadEnv) -> Result<bool> {
        if self.waiting_for_start {
            self.waiting_for_start = false;
            self.log.lock().unwrap().push(Event::Start(self.coords));
        }
        Ok(true)
    }

    fn pull_line(&mut self, component: usize, line: &mut LineBuf) -> Result<()> {
        if self.waiting_for_start {
            return Err(StripeError::InvalidState);
        }
        let (rect, precision) = self.components[component];
        let row = self.next_rows[component];
        if row >= rect.bottom() {
            return Err(StripeError::InvalidState);
        }
        self.next_rows[component] += 1;
        self.log.lock().unwrap().push(Event::Pull {
            tile: self.coords,
            component,
            row,
        });
        line.reset(LineKind::Int, rect.size.x as usize);
        if let LineBuf::Int(samples) = line {
            let bias = 1i32 << (precision - 1);
            for (i, s) in samples.iter_mut().enumerate() {
                *s = pattern(component, rect.pos.x + i as u32, row, precision) as i32 - bias;
            }
        }
        Ok(())
    }

    fn push_line(&mut self, _component: usize, _line: &LineBuf) -> Result<()> {
        Err(StripeError::Unsupported)
    }
}

/// A smooth 8-bit gradient with some texture, `components` interleaved.
pub fn gradient_u8(width: usize, height: usize, components: usize) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width * height * components);
    for y in 0..height {
        for x in 0..width {
            for c in 0..components {
                pixels.push(((x * 3 + y * 2 + c * 40 + (x * y) % 7) % 256) as u8);
            }
        }
    }
    pixels
}

/// 16-bit samples as native-endian bytes.
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_ne_bytes()).collect()
}
