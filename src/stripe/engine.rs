//! Stripe loop shared by the decompressor and the compressor.

use log::{debug, trace};

use super::component_state::ComponentState;
use super::queue::{QueueArena, QueueId, TileQueue};
use super::tile::{Lifecycle, StripeIo, TileComponent, TileEngine};
use super::transfer::{Acceleration, SampleFormat, TransferKernel, select_kernel};
use super::{BufferKind, PadMode, StripeLayout};
use crate::codestream::{Codestream, Coords, Rect, ThreadEnv, TileAccess, TileThreading};
use crate::error::{Result, StripeError};

/// Stripe heights per component, in component rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeHeights {
    /// Heights to use for the next stripe.
    pub current: Vec<usize>,
    /// Largest heights recommended over the whole image.
    pub max: Vec<usize>,
}

pub(crate) struct StripeEngine<C: Codestream> {
    codestream: C,
    env: Option<ThreadEnv>,
    kernel: &'static dyn TransferKernel,
    components: Vec<ComponentState>,
    grid: Coords,
    canvas: Rect,
    tiles: Vec<Option<TileEngine<C::Tile>>>,
    free_slots: Vec<usize>,
    /// Cursors of retired tiles, recycled by new ones.
    spare: Vec<Vec<TileComponent>>,
    active: Vec<usize>,
    queues: QueueArena,
    recommended: Option<Vec<usize>>,
}

impl<C: Codestream> StripeEngine<C> {
    pub fn new(codestream: C, env: Option<ThreadEnv>, acceleration: Acceleration) -> Result<Self> {
        let n = codestream.num_components();
        if n == 0 {
            return Err(StripeError::InvalidGeometry);
        }
        let components = (0..n)
            .map(|c| ComponentState::new(&codestream, c))
            .collect::<Result<Vec<_>>>()?;
        let kernel = select_kernel(acceleration);
        let grid = codestream.tile_grid();
        debug!(
            "stripe session over {} components, {}x{} tiles, {} kernel, {}",
            n,
            grid.x,
            grid.y,
            kernel.name(),
            if env.is_some() { "multi-threaded" } else { "single-threaded" }
        );
        Ok(Self {
            canvas: codestream.image_rect(),
            codestream,
            env,
            kernel,
            components,
            grid,
            tiles: Vec::new(),
            free_slots: Vec::new(),
            spare: Vec::new(),
            active: Vec::new(),
            queues: QueueArena::default(),
            recommended: None,
        })
    }

    pub fn codestream(&self) -> &C {
        &self.codestream
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn component_widths(&self) -> Vec<usize> {
        self.components.iter().map(|s| s.width as usize).collect()
    }

    pub fn remaining_rows(&self) -> Vec<usize> {
        self.components
            .iter()
            .map(|s| s.remaining_image_rows as usize)
            .collect()
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    pub fn recommended_stripe_heights(&mut self, preferred_min: usize, absolute_max: usize) -> StripeHeights {
        let max = match &self.recommended {
            Some(max) => max.clone(),
            None => {
                let max = self.compute_recommended(preferred_min, absolute_max);
                self.recommended = Some(max.clone());
                max
            }
        };
        let current = max
            .iter()
            .zip(&self.components)
            .map(|(&m, s)| m.min(s.remaining_image_rows as usize))
            .collect();
        StripeHeights { current, max }
    }

    fn compute_recommended(&self, preferred_min: usize, absolute_max: usize) -> Vec<usize> {
        let preferred_min = preferred_min.max(1);
        let absolute_max = absolute_max.max(1);
        let min_sub = self
            .components
            .iter()
            .map(|s| s.sub_sampling.y as usize)
            .min()
            .unwrap_or(1);
        self.components
            .iter()
            .map(|s| {
                let height = if self.grid.x > 1 {
                    // Whole tile rows keep every tile of a row open only once.
                    s.max_tile_height as usize
                } else {
                    (preferred_min * min_sub).div_ceil(s.sub_sampling.y as usize)
                };
                height.clamp(1, absolute_max)
            })
            .collect()
    }

    /// Per-component heights covering the next `rows` rows of the reference grid.
    pub fn stripe_heights_for_rows(&self, rows: usize) -> Vec<usize> {
        let Some(reference) = self.components.iter().min_by_key(|s| s.sub_sampling.y) else {
            return Vec::new();
        };
        let next_row = (reference.pos_y + reference.rows_done()) as u64;
        let sub = reference.sub_sampling.y as u64;
        let top = self.canvas.pos.y as u64;
        let start = match next_row {
            0 => top,
            r => top.max((r - 1) * sub + 1),
        };
        let end = (start + rows as u64).min(self.canvas.bottom() as u64);
        self.components
            .iter()
            .map(|s| {
                let covered = end.div_ceil(s.sub_sampling.y as u64).saturating_sub(s.pos_y as u64);
                let h = covered.saturating_sub(s.rows_done() as u64) as usize;
                h.min(s.remaining_image_rows as usize)
            })
            .collect()
    }

    fn validate(
        &self,
        heights: &[usize],
        layout: &StripeLayout,
        kind: BufferKind,
        buf_len: usize,
        decoding: bool,
    ) -> Result<()> {
        if heights.len() != self.components.len() {
            return Err(StripeError::StripeHeightMismatch);
        }
        if heights
            .iter()
            .zip(&self.components)
            .any(|(&h, s)| h > s.remaining_image_rows as usize)
        {
            return Err(StripeError::StripeHeightMismatch);
        }
        if layout.components.len() != self.components.len() {
            return Err(StripeError::InvalidArgument);
        }
        for ((&h, s), l) in heights.iter().zip(&self.components).zip(&layout.components) {
            SampleFormat::new(
                kind,
                s.original_precision,
                l.precision.unwrap_or(s.original_precision),
                l.signed.unwrap_or(s.original_signed),
            )?;
            let width = s.width as usize;
            if h == 0 || width == 0 {
                continue;
            }
            if l.sample_gap == 0 || (h > 1 && l.row_gap < (width - 1) * l.sample_gap + 1) {
                return Err(StripeError::InvalidArgument);
            }
            let columns = if decoding && l.pad == PadMode::Replicate {
                width.max(l.row_gap / l.sample_gap)
            } else {
                width
            };
            let last = (h - 1)
                .checked_mul(l.row_gap)
                .and_then(|v| v.checked_add((columns - 1).checked_mul(l.sample_gap)?))
                .and_then(|v| v.checked_add(l.sample_offset))
                .ok_or(StripeError::BufferTooSmall)?;
            if last >= buf_len {
                return Err(StripeError::BufferTooSmall);
            }
        }
        Ok(())
    }

    /// Runs one stripe call. Returns true while image rows remain.
    pub fn transfer(&mut self, mut io: StripeIo<'_, '_>, heights: &[usize], layout: Option<&StripeLayout>) -> Result<bool> {
        let default_layout;
        let layout = match layout {
            Some(layout) => layout,
            None => {
                default_layout = StripeLayout::interleaved(&self.component_widths());
                &default_layout
            }
        };
        let (kind, len, decoding) = match &io {
            StripeIo::Pull(buf) => (buf.kind(), buf.len(), true),
            StripeIo::Push(buf) => (buf.kind(), buf.len(), false),
        };
        self.validate(heights, layout, kind, len, decoding)?;

        for ((state, l), &h) in self.components.iter_mut().zip(&layout.components).zip(heights) {
            state.begin_stripe(kind, l, h as u32);
        }

        while let Some(row) = self
            .components
            .iter()
            .filter(|s| s.remaining_stripe_rows > 0)
            .map(|s| s.tile_row)
            .min()
        {
            let cohort = self.tile_row_cohort(row)?;
            for slot in cohort {
                let running = self.queue_running(slot)?;
                let engine = self
                    .tiles
                    .get_mut(slot)
                    .and_then(Option::as_mut)
                    .ok_or(StripeError::InvalidState)?;
                if engine.lifecycle == Lifecycle::QueuedForClose {
                    continue;
                }
                engine.init(&self.components, layout.store)?;
                if engine.process(&mut io, self.kernel, running)? {
                    self.retire(slot)?;
                }
            }
            for state in self
                .components
                .iter_mut()
                .filter(|s| s.tile_row == row && s.remaining_stripe_rows > 0)
            {
                state.update(&self.codestream)?;
            }
        }
        Ok(self.components.iter().any(|s| s.remaining_image_rows > 0))
    }

    fn tile_at(&mut self, slot: usize) -> Result<&mut TileEngine<C::Tile>> {
        self.tiles
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(StripeError::InvalidState)
    }

    fn queue_running(&self, slot: usize) -> Result<bool> {
        let engine = self
            .tiles
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or(StripeError::InvalidState)?;
        match engine.queue {
            Some(id) => Ok(self.queues.get(id)?.is_running()),
            None => Ok(false),
        }
    }

    /// Live tiles of `row` in left-to-right order, opening the row on first use.
    fn tile_row_cohort(&mut self, row: u32) -> Result<Vec<usize>> {
        let mut cohort: Vec<usize> = self
            .active
            .iter()
            .copied()
            .filter(|&slot| matches!(&self.tiles[slot], Some(t) if t.coords.y == row))
            .collect();
        if cohort.is_empty() {
            cohort = self.open_tile_row(row)?;
        }
        cohort.sort_by_key(|&slot| self.tiles[slot].as_ref().map_or(0, |t| t.coords.x));
        Ok(cohort)
    }

    fn open_tile_row(&mut self, row: u32) -> Result<Vec<usize>> {
        let queue = match &self.env {
            Some(env) => Some(self.queues.insert(TileQueue::new(env, row))),
            None => None,
        };
        let mut slots = Vec::with_capacity(self.grid.x as usize);
        for x in 0..self.grid.x {
            let coords = Coords::new(x, row);
            let spare = self.spare.pop().unwrap_or_default();
            let engine = match (&self.env, queue) {
                (Some(env), Some(id)) => {
                    let jobs = self.queues.get(id)?.jobs.clone();
                    let threading = TileThreading { env, queue: &jobs };
                    TileEngine::create(
                        coords,
                        &mut self.codestream,
                        &self.components,
                        Some((threading, id)),
                        spare,
                    )?
                }
                _ => TileEngine::create(coords, &mut self.codestream, &self.components, None, spare)?,
            };
            let slot = self.insert_tile(engine);
            if let Some(id) = queue {
                self.queues.get_mut(id)?.add_member(slot)?;
            }
            slots.push(slot);
        }
        if let Some(id) = queue {
            self.start_queue(id)?;
        }
        trace!("opened tile row {} ({} tiles)", row, slots.len());
        Ok(slots)
    }

    fn start_queue(&mut self, id: QueueId) -> Result<()> {
        let env = self.env.clone().ok_or(StripeError::InvalidState)?;
        let queue = self.queues.get_mut(id)?;
        queue.seal()?;
        queue.begin_start()?;
        let members = queue.members.clone();
        for slot in members {
            let tile = self.tile_at(slot)?.tile_mut().ok_or(StripeError::InvalidState)?;
            while !tile.start(&env)? {}
        }
        Ok(())
    }

    fn insert_tile(&mut self, engine: TileEngine<C::Tile>) -> usize {
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.tiles[slot] = Some(engine);
                slot
            }
            None => {
                self.tiles.push(Some(engine));
                self.tiles.len() - 1
            }
        };
        self.active.push(slot);
        slot
    }

    /// Closes a completed tile, or parks it until the rest of its queue completes.
    fn retire(&mut self, slot: usize) -> Result<()> {
        let engine = self.tile_at(slot)?;
        let Some(id) = engine.queue else {
            return self.close_slot(slot, true);
        };
        engine.lifecycle = Lifecycle::QueuedForClose;
        let members = self.queues.get(id)?.members.clone();
        let all_done = members.iter().all(|&m| {
            matches!(&self.tiles[m], Some(t) if t.lifecycle == Lifecycle::QueuedForClose)
        });
        if all_done {
            self.join_and_close(id)?;
        }
        Ok(())
    }

    fn join_and_close(&mut self, id: QueueId) -> Result<()> {
        if let Some(env) = &self.env {
            self.queues.get_mut(id)?.join(env);
        }
        let members = self.queues.get(id)?.members.clone();
        for slot in members {
            if self.tiles[slot].is_some() {
                self.close_slot(slot, true)?;
            }
        }
        self.queues.remove(id);
        Ok(())
    }

    fn close_slot(&mut self, slot: usize, queue_joined: bool) -> Result<()> {
        let mut engine = self.tiles[slot].take().ok_or(StripeError::InvalidState)?;
        let tile = engine.cleanup(queue_joined)?;
        self.active.retain(|&s| s != slot);
        self.free_slots.push(slot);
        self.spare.push(engine.into_spare());
        self.codestream.close_tile(tile, self.env.as_ref())
    }

    /// Closes everything still open and finalises the codestream.
    pub fn finish(&mut self) -> Result<()> {
        if self.components.iter().any(|s| s.remaining_image_rows > 0) {
            return Err(StripeError::IncompleteImage);
        }
        for id in self.queues.ids() {
            self.join_and_close(id)?;
        }
        for slot in self.active.clone() {
            self.close_slot(slot, true)?;
        }
        self.codestream.finalize(self.env.as_ref())?;
        debug!("stripe session finished");
        Ok(())
    }

    /// Waits for outstanding tile jobs so the session can be dropped cleanly.
    pub fn abandon(&mut self) {
        if let Some(env) = &self.env {
            for id in self.queues.ids() {
                if let Ok(queue) = self.queues.get_mut(id) {
                    queue.join(env);
                }
            }
        }
        self.active.clear();
        self.tiles.clear();
        self.free_slots.clear();
        self.queues.clear();
        self.recommended = None;
    }

    pub fn into_codestream(self) -> C {
        self.codestream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::{CodParams, ComponentInfo, ParseMode, QcdParams, ReferenceCodestream, SizParams};
    use crate::stripe::{StripeBufMut, StripeBufRef};

    fn tiled_siz() -> SizParams {
        let mut siz = SizParams::new(10, 7, vec![ComponentInfo::new(8, false)]);
        siz.tile_size = Coords::new(4, 3);
        siz
    }

    fn encode(pixels: &[u8], env: Option<ThreadEnv>) -> Vec<u8> {
        let cod = CodParams {
            decomposition_levels: 1,
            ..CodParams::default()
        };
        let cs = ReferenceCodestream::create(tiled_siz(), cod, QcdParams::default()).unwrap();
        let mut engine = StripeEngine::new(cs, env, Acceleration::Auto).unwrap();
        let mut row = 0;
        for h in [2usize, 3, 2] {
            let stripe = &pixels[row * 10..(row + h) * 10];
            engine.transfer(StripeIo::Push(&StripeBufRef::Byte(stripe)), &[h], None).unwrap();
            row += h;
        }
        engine.finish().unwrap();
        engine.into_codestream().into_encoded().unwrap()
    }

    #[test]
    fn test_tiles_close_as_their_row_completes() {
        let pixels: Vec<u8> = (0..70).map(|v| (v * 3) as u8).collect();
        let bytes = encode(&pixels, None);
        let cs = ReferenceCodestream::open(bytes, ParseMode::Fussy).unwrap();
        let mut engine = StripeEngine::new(cs, None, Acceleration::ScalarOnly).unwrap();
        let mut out = vec![0u8; 20];
        assert!(engine.transfer(StripeIo::Pull(&mut StripeBufMut::Byte(&mut out)), &[2], None).unwrap());
        assert_eq!(engine.active.len(), 3);
        assert_eq!(out[..], pixels[..20]);
        let mut out = vec![0u8; 10];
        assert!(engine.transfer(StripeIo::Pull(&mut StripeBufMut::Byte(&mut out)), &[1], None).unwrap());
        assert!(engine.active.is_empty());
        assert_eq!(out[..], pixels[20..30]);
    }

    #[test]
    fn test_threaded_rows_join_before_close() {
        let pixels: Vec<u8> = (0..70).map(|v| (v * 7 % 251) as u8).collect();
        let env = ThreadEnv::new(2).unwrap();
        let bytes = encode(&pixels, Some(env.clone()));
        assert_eq!(bytes, encode(&pixels, None));
        let cs = ReferenceCodestream::open(bytes, ParseMode::Fussy).unwrap();
        let mut engine = StripeEngine::new(cs, Some(env), Acceleration::Auto).unwrap();
        let mut out = vec![0u8; 70];
        assert!(!engine.transfer(StripeIo::Pull(&mut StripeBufMut::Byte(&mut out)), &[7], None).unwrap());
        assert!(engine.queues.ids().is_empty());
        assert_eq!(out, pixels);
        engine.finish().unwrap();
    }

    #[test]
    fn test_heights_for_rows_follow_sub_sampling() {
        let mut siz = SizParams::new(8, 9, vec![ComponentInfo::new(8, false); 2]);
        siz.components[1].sub_y = 2;
        let cs = ReferenceCodestream::create(siz, CodParams::default(), QcdParams::default()).unwrap();
        let mut engine = StripeEngine::new(cs, None, Acceleration::Auto).unwrap();
        assert_eq!(engine.stripe_heights_for_rows(3), vec![3, 2]);
        let stripe = [0u8; 8 * 3 + 8 * 2];
        let layout = StripeLayout::planar(&[8, 8], &[3, 2]);
        engine.transfer(StripeIo::Push(&StripeBufRef::Byte(&stripe)), &[3, 2], Some(&layout)).unwrap();
        assert_eq!(engine.stripe_heights_for_rows(3), vec![3, 1]);
        assert_eq!(engine.stripe_heights_for_rows(100), vec![6, 3]);
    }

    #[test]
    fn test_wrong_height_count_is_rejected() {
        let cs = ReferenceCodestream::create(tiled_siz(), CodParams::default(), QcdParams::default()).unwrap();
        let mut engine = StripeEngine::new(cs, None, Acceleration::Auto).unwrap();
        let stripe = [0u8; 100];
        let result = engine.transfer(StripeIo::Push(&StripeBufRef::Byte(&stripe)), &[8], None);
        assert_eq!(result, Err(StripeError::StripeHeightMismatch));
        let result = engine.transfer(StripeIo::Push(&StripeBufRef::Byte(&stripe[..5])), &[1], None);
        assert_eq!(result, Err(StripeError::BufferTooSmall));
    }
}
