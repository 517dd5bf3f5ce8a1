use super::{BufferKind, ComponentLayout, PadMode};
use crate::codestream::{Codestream, Coords};
use crate::error::{Result, StripeError};

/// Per-component bookkeeping across stripe calls.
#[derive(Debug, Clone)]
pub(crate) struct ComponentState {
    pub component_index: usize,
    pub pos_x: u32,
    pub pos_y: u32,
    pub width: u32,
    pub height: u32,
    pub sub_sampling: Coords,
    pub original_precision: u8,
    pub original_signed: bool,

    // Bound for the current stripe.
    pub kind: BufferKind,
    pub row_gap: usize,
    pub sample_gap: usize,
    pub precision: u8,
    pub signed: bool,
    pub pad: PadMode,
    /// Element index of the current stripe row's left-edge sample.
    pub buf_pos: usize,

    pub remaining_stripe_rows: u32,
    pub remaining_tile_rows: u32,
    pub next_tile_row_height: u32,
    pub max_tile_height: u32,
    pub tile_row: u32,
    pub remaining_image_rows: u32,
}

/// Height of `component` in tile row `row`, 0 past the last row.
fn tile_row_height<C: Codestream>(codestream: &C, component: usize, row: u32) -> Result<u32> {
    if row >= codestream.tile_grid().y {
        return Ok(0);
    }
    Ok(codestream
        .tile_component_dims(Coords::new(0, row), component)?
        .size
        .y)
}

impl ComponentState {
    pub fn new<C: Codestream>(codestream: &C, component: usize) -> Result<Self> {
        let geometry = codestream.component_geometry(component)?;
        if geometry.sub_sampling.x == 0 || geometry.sub_sampling.y == 0 {
            return Err(StripeError::InvalidGeometry);
        }
        let rows = codestream.tile_grid().y;
        let mut max_tile_height = 0;
        for row in 0..rows {
            max_tile_height = max_tile_height.max(tile_row_height(codestream, component, row)?);
        }

        let mut state = Self {
            component_index: component,
            pos_x: geometry.dims.pos.x,
            pos_y: geometry.dims.pos.y,
            width: geometry.dims.size.x,
            height: geometry.dims.size.y,
            sub_sampling: geometry.sub_sampling,
            original_precision: geometry.precision,
            original_signed: geometry.signed,
            kind: BufferKind::Byte,
            row_gap: 0,
            sample_gap: 0,
            precision: geometry.precision,
            signed: geometry.signed,
            pad: PadMode::Untouched,
            buf_pos: 0,
            remaining_stripe_rows: 0,
            remaining_tile_rows: tile_row_height(codestream, component, 0)?,
            next_tile_row_height: tile_row_height(codestream, component, 1)?,
            max_tile_height,
            tile_row: 0,
            remaining_image_rows: geometry.dims.size.y,
        };
        state.skip_empty_tile_rows(codestream)?;
        Ok(state)
    }

    /// Binds the caller's layout for the next stripe of `height` rows.
    pub fn begin_stripe(&mut self, kind: BufferKind, layout: &ComponentLayout, height: u32) {
        self.kind = kind;
        self.row_gap = layout.row_gap;
        self.sample_gap = layout.sample_gap;
        self.precision = layout.precision.unwrap_or(self.original_precision);
        self.signed = layout.signed.unwrap_or(self.original_signed);
        self.pad = layout.pad;
        self.buf_pos = layout.sample_offset;
        self.remaining_stripe_rows = height;
    }

    /// Rows of this component the current tile row contributes to the stripe.
    pub fn rows_in_pass(&self) -> u32 {
        self.remaining_stripe_rows.min(self.remaining_tile_rows)
    }

    /// Accounts for a tile-row pass over this component.
    pub fn update<C: Codestream>(&mut self, codestream: &C) -> Result<()> {
        let consumed = self.rows_in_pass();
        self.remaining_stripe_rows -= consumed;
        self.remaining_tile_rows -= consumed;
        self.remaining_image_rows -= consumed;
        self.buf_pos += consumed as usize * self.row_gap;
        if self.remaining_tile_rows == 0 && self.remaining_image_rows > 0 {
            self.advance_tile_row(codestream)?;
            self.skip_empty_tile_rows(codestream)?;
        }
        Ok(())
    }

    fn advance_tile_row<C: Codestream>(&mut self, codestream: &C) -> Result<()> {
        self.tile_row += 1;
        self.remaining_tile_rows = self.next_tile_row_height;
        self.next_tile_row_height = tile_row_height(codestream, self.component_index, self.tile_row + 1)?;
        Ok(())
    }

    // Heavy vertical sub-sampling can leave whole tile rows without a single row.
    fn skip_empty_tile_rows<C: Codestream>(&mut self, codestream: &C) -> Result<()> {
        let last_row = codestream.tile_grid().y.saturating_sub(1);
        while self.remaining_tile_rows == 0 && self.remaining_image_rows > 0 && self.tile_row < last_row {
            self.advance_tile_row(codestream)?;
        }
        if self.remaining_tile_rows == 0 && self.remaining_image_rows > 0 {
            return Err(StripeError::InvalidGeometry);
        }
        Ok(())
    }

    pub fn rows_done(&self) -> u32 {
        self.height - self.remaining_image_rows
    }
}
