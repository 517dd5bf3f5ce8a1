use log::trace;

use super::component_state::ComponentState;
use super::queue::QueueId;
use super::transfer::{LinePlacement, SampleFormat, TransferKernel, read_line, write_line};
use super::{PadMode, StorePreference, StripeBufMut, StripeBufRef};
use crate::codestream::{Codestream, Coords, LineBuf, LineKind, TileAccess, TileThreading};
use crate::error::{Result, StripeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Created,
    Initialized,
    Processing,
    Completed,
    Retired,
    /// Completed, waiting for the rest of its queue before closing.
    QueuedForClose,
}

/// The caller's buffer for one stripe call.
pub(crate) enum StripeIo<'a, 'b> {
    Pull(&'a mut StripeBufMut<'b>),
    Push(&'a StripeBufRef<'b>),
}

/// Cursor of one tile-component.
#[derive(Debug)]
pub(crate) struct TileComponent {
    pos: Coords,
    size: Coords,
    rows_left_in_tile: u32,
    stripe_rows_left: u32,
    buf_pos: usize,
    sample_gap: usize,
    row_gap: usize,
    pad_to: usize,
    format: Option<SampleFormat>,
    ratio_counter: i32,
    count_delta: i32,
    vert_sub: i32,
    line_kind: LineKind,
    line: LineBuf,
}

pub(crate) struct TileEngine<T> {
    pub coords: Coords,
    pub queue: Option<QueueId>,
    pub lifecycle: Lifecycle,
    tile: Option<T>,
    components: Vec<TileComponent>,
    store: StorePreference,
}

impl<T: TileAccess> TileEngine<T> {
    /// Opens the codec tile at `coords`. `spare` recycles the cursors of a retired tile.
    pub fn create<C>(
        coords: Coords,
        codestream: &mut C,
        states: &[ComponentState],
        threading: Option<(TileThreading<'_>, QueueId)>,
        mut spare: Vec<TileComponent>,
    ) -> Result<Self>
    where
        C: Codestream<Tile = T>,
    {
        let tile = codestream
            .open_tile(coords, threading.map(|(t, _)| t))
            .map_err(|_| StripeError::TileCreationFailed)?;
        let count_delta = states.iter().map(|s| s.sub_sampling.y).min().unwrap_or(1) as i32;
        spare.truncate(states.len());
        let mut components = spare;
        for (c, state) in states.iter().enumerate() {
            let dims = codestream.tile_component_dims(coords, c)?;
            let line_kind = tile.line_kind(c);
            let cursor = TileComponent {
                pos: dims.pos,
                size: dims.size,
                rows_left_in_tile: dims.size.y,
                stripe_rows_left: 0,
                buf_pos: 0,
                sample_gap: 0,
                row_gap: 0,
                pad_to: 0,
                format: None,
                ratio_counter: 0,
                count_delta,
                vert_sub: state.sub_sampling.y as i32,
                line_kind,
                line: LineBuf::new(line_kind, 0),
            };
            match components.get_mut(c) {
                Some(existing) => {
                    let line = std::mem::replace(&mut existing.line, LineBuf::new(line_kind, 0));
                    *existing = TileComponent { line, ..cursor };
                    existing.line.reset(line_kind, dims.size.x as usize);
                }
                None => {
                    let mut cursor = cursor;
                    cursor.line.reset(line_kind, dims.size.x as usize);
                    components.push(cursor);
                }
            }
        }
        trace!("tile ({}, {}) created", coords.x, coords.y);
        Ok(Self {
            coords,
            queue: threading.map(|(_, id)| id),
            lifecycle: Lifecycle::Created,
            tile: Some(tile),
            components,
            store: StorePreference::Default,
        })
    }

    pub fn tile_mut(&mut self) -> Option<&mut T> {
        self.tile.as_mut()
    }

    /// Binds the current stripe to every tile-component.
    pub fn init(&mut self, states: &[ComponentState], store: StorePreference) -> Result<()> {
        if self.tile.is_none() {
            return Err(StripeError::InvalidState);
        }
        self.store = store;
        for (tc, state) in self.components.iter_mut().zip(states) {
            tc.ratio_counter = 0;
            if state.tile_row != self.coords.y || state.remaining_stripe_rows == 0 {
                tc.stripe_rows_left = 0;
                continue;
            }
            debug_assert_eq!(tc.rows_left_in_tile, state.remaining_tile_rows);
            tc.stripe_rows_left = state.remaining_stripe_rows.min(tc.rows_left_in_tile);
            let column = (tc.pos.x - state.pos_x) as usize;
            tc.buf_pos = state.buf_pos + column * state.sample_gap;
            tc.sample_gap = state.sample_gap;
            tc.row_gap = state.row_gap;
            tc.format = Some(SampleFormat::new(
                state.kind,
                state.original_precision,
                state.precision,
                state.signed,
            )?);
            let width = tc.size.x as usize;
            let rightmost = tc.pos.x + tc.size.x == state.pos_x + state.width;
            tc.pad_to = if state.pad == PadMode::Replicate && rightmost && state.sample_gap > 0 {
                (state.row_gap / state.sample_gap).saturating_sub(column).max(width)
            } else {
                width
            };
        }
        self.lifecycle = Lifecycle::Initialized;
        Ok(())
    }

    /// Transfers this tile's share of the stripe. Returns true once every
    /// tile-component has delivered all of its rows.
    pub fn process(
        &mut self,
        io: &mut StripeIo<'_, '_>,
        kernel: &dyn TransferKernel,
        queue_running: bool,
    ) -> Result<bool> {
        if self.queue.is_some() && !queue_running {
            return Err(StripeError::InvalidState);
        }
        if self.lifecycle != Lifecycle::Initialized {
            return Err(StripeError::InvalidState);
        }
        let Self {
            tile,
            components,
            store,
            lifecycle,
            ..
        } = self;
        let tile = tile.as_mut().ok_or(StripeError::InvalidState)?;
        *lifecycle = Lifecycle::Processing;

        loop {
            let mut done = true;
            for (c, tc) in components.iter_mut().enumerate() {
                if tc.stripe_rows_left == 0 {
                    continue;
                }
                done = false;
                tc.ratio_counter -= tc.count_delta;
                if tc.ratio_counter >= 0 {
                    continue;
                }
                tc.ratio_counter += tc.vert_sub;
                transfer_line(tile, c, tc, io, kernel, *store)?;
                tc.stripe_rows_left -= 1;
                tc.rows_left_in_tile -= 1;
                tc.buf_pos += tc.row_gap;
            }
            if done {
                break;
            }
        }

        let finished = components.iter().all(|tc| tc.rows_left_in_tile == 0);
        if finished {
            *lifecycle = Lifecycle::Completed;
        }
        Ok(finished)
    }

    /// Releases the codec tile. Refused while the tile's queue has not been joined.
    pub fn cleanup(&mut self, queue_joined: bool) -> Result<T> {
        if self.queue.is_some() && !queue_joined {
            return Err(StripeError::InvalidState);
        }
        let tile = self.tile.take().ok_or(StripeError::InvalidState)?;
        self.lifecycle = Lifecycle::Retired;
        trace!("tile ({}, {}) retired", self.coords.x, self.coords.y);
        Ok(tile)
    }

    pub fn into_spare(self) -> Vec<TileComponent> {
        self.components
    }
}

fn transfer_line<T: TileAccess>(
    tile: &mut T,
    c: usize,
    tc: &mut TileComponent,
    io: &mut StripeIo<'_, '_>,
    kernel: &dyn TransferKernel,
    store: StorePreference,
) -> Result<()> {
    let format = tc.format.ok_or(StripeError::InvalidState)?;
    let at = LinePlacement {
        start: tc.buf_pos,
        gap: tc.sample_gap,
        width: tc.size.x as usize,
        pad_to: tc.pad_to,
    };
    match io {
        StripeIo::Pull(buf) => {
            tile.pull_line(c, &mut tc.line)?;
            write_line(&tc.line, buf, &format, &at, kernel, store)
        }
        StripeIo::Push(buf) => {
            tc.line.reset(tc.line_kind, at.width);
            read_line(buf, &mut tc.line, &format, &at, kernel, store)?;
            tile.push_line(c, &tc.line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::{CodParams, ComponentInfo, QcdParams, ReferenceCodestream, SizParams, ThreadEnv};
    use crate::stripe::transfer::ScalarKernel;
    use crate::stripe::{BufferKind, ComponentLayout};

    fn output_codestream() -> ReferenceCodestream {
        let siz = SizParams::new(8, 4, vec![ComponentInfo::new(8, false)]);
        ReferenceCodestream::create(siz, CodParams::default(), QcdParams::default()).unwrap()
    }

    fn bound_states(cs: &ReferenceCodestream, rows: u32) -> Vec<ComponentState> {
        let mut state = ComponentState::new(cs, 0).unwrap();
        state.begin_stripe(BufferKind::Byte, &ComponentLayout::new(0, 1, 8), rows);
        vec![state]
    }

    #[test]
    fn test_process_requires_init() {
        let mut cs = output_codestream();
        let states = bound_states(&cs, 4);
        let mut tile = TileEngine::create(Coords::new(0, 0), &mut cs, &states, None, Vec::new()).unwrap();
        let pixels = [7u8; 32];
        let buf = StripeBufRef::Byte(&pixels);
        let mut io = StripeIo::Push(&buf);
        assert_eq!(tile.process(&mut io, &ScalarKernel, true), Err(StripeError::InvalidState));
        assert_eq!(tile.lifecycle, Lifecycle::Created);

        tile.init(&states, StorePreference::Default).unwrap();
        assert_eq!(tile.process(&mut io, &ScalarKernel, true), Ok(true));
        assert_eq!(tile.lifecycle, Lifecycle::Completed);
        // A completed tile has to be bound to a new stripe first.
        assert_eq!(tile.process(&mut io, &ScalarKernel, true), Err(StripeError::InvalidState));
    }

    #[test]
    fn test_partial_stripe_keeps_tile_open() {
        let mut cs = output_codestream();
        let mut states = bound_states(&cs, 2);
        let mut tile = TileEngine::create(Coords::new(0, 0), &mut cs, &states, None, Vec::new()).unwrap();
        let pixels = [1u8; 16];
        let buf = StripeBufRef::Byte(&pixels);

        tile.init(&states, StorePreference::Default).unwrap();
        assert_eq!(tile.process(&mut StripeIo::Push(&buf), &ScalarKernel, true), Ok(false));
        assert_eq!(tile.lifecycle, Lifecycle::Processing);

        states[0].update(&cs).unwrap();
        states[0].begin_stripe(BufferKind::Byte, &ComponentLayout::new(0, 1, 8), 2);
        tile.init(&states, StorePreference::Default).unwrap();
        assert_eq!(tile.process(&mut StripeIo::Push(&buf), &ScalarKernel, true), Ok(true));
    }

    #[test]
    fn test_queued_tile_waits_for_its_queue() {
        let env = ThreadEnv::new(1).unwrap();
        let queue = env.create_queue();
        let mut cs = output_codestream();
        let states = bound_states(&cs, 4);
        let threading = TileThreading {
            env: &env,
            queue: &queue,
        };
        let mut tile =
            TileEngine::create(Coords::new(0, 0), &mut cs, &states, Some((threading, QueueId(0))), Vec::new()).unwrap();
        assert_eq!(tile.queue, Some(QueueId(0)));
        tile.init(&states, StorePreference::Default).unwrap();

        let pixels = [3u8; 32];
        let buf = StripeBufRef::Byte(&pixels);
        let mut io = StripeIo::Push(&buf);
        assert_eq!(tile.process(&mut io, &ScalarKernel, false), Err(StripeError::InvalidState));
        assert_eq!(tile.lifecycle, Lifecycle::Initialized);
        assert_eq!(tile.process(&mut io, &ScalarKernel, true), Ok(true));

        assert_eq!(tile.cleanup(false).err(), Some(StripeError::InvalidState));
        assert_eq!(tile.lifecycle, Lifecycle::Completed);
        assert!(tile.cleanup(true).is_ok());
        assert_eq!(tile.lifecycle, Lifecycle::Retired);
        assert_eq!(tile.cleanup(true).err(), Some(StripeError::InvalidState));
    }

    #[test]
    fn test_unqueued_cleanup_ignores_join_flag() {
        let mut cs = output_codestream();
        let states = bound_states(&cs, 4);
        let mut tile = TileEngine::create(Coords::new(0, 0), &mut cs, &states, None, Vec::new()).unwrap();
        assert!(tile.cleanup(false).is_ok());
        assert_eq!(tile.into_spare().len(), 1);
    }
}
