//! Main-header parameters of the reference codestream (SIZ, COD, QCD).

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::geometry::{Coords, Rect, ceil_div};
use crate::constants::{
    DEFAULT_BLOCK_HEIGHT, DEFAULT_BLOCK_WIDTH, DEFAULT_DECOMPOSITIONS, DEFAULT_NUM_LAYERS,
    DEFAULT_QUANTIZATION_STEP, MAXIMUM_BITS_PER_SAMPLE, MAXIMUM_COMPONENT_COUNT,
    MAXIMUM_DECOMPOSITION_LEVELS, MAXIMUM_TILE_COUNT,
};
use crate::error::{Result, StripeError};

/// Component precision, signedness and sub-sampling (one Ssiz/XRsiz/YRsiz triple).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    pub precision: u8,
    pub signed: bool,
    pub sub_x: u8,
    pub sub_y: u8,
}

impl ComponentInfo {
    pub fn new(precision: u8, signed: bool) -> Self {
        Self {
            precision,
            signed,
            sub_x: 1,
            sub_y: 1,
        }
    }

    pub fn sub_sampling(&self) -> Coords {
        Coords::new(self.sub_x as u32, self.sub_y as u32)
    }
}

/// Image and tile size, on the reference grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizParams {
    /// Xsiz/Ysiz: right and bottom edges of the image area.
    pub extent: Coords,
    /// XOsiz/YOsiz.
    pub image_offset: Coords,
    pub tile_size: Coords,
    pub tile_offset: Coords,
    pub components: Vec<ComponentInfo>,
}

impl SizParams {
    /// A single-tile image anchored at the grid origin.
    pub fn new(width: u32, height: u32, components: Vec<ComponentInfo>) -> Self {
        Self {
            extent: Coords::new(width, height),
            image_offset: Coords::default(),
            tile_size: Coords::new(width, height),
            tile_offset: Coords::default(),
            components,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let image = self.image_rect();
        if image.is_empty() || self.tile_size.x == 0 || self.tile_size.y == 0 {
            return Err(StripeError::InvalidGeometry);
        }
        // The first tile must overlap the image area.
        if self.tile_offset.x > self.image_offset.x
            || self.tile_offset.y > self.image_offset.y
            || self.tile_offset.x as u64 + self.tile_size.x as u64 <= self.image_offset.x as u64
            || self.tile_offset.y as u64 + self.tile_size.y as u64 <= self.image_offset.y as u64
        {
            return Err(StripeError::InvalidGeometry);
        }
        if self.num_tiles() > MAXIMUM_TILE_COUNT {
            return Err(StripeError::Unsupported);
        }
        if self.components.is_empty() || self.components.len() > MAXIMUM_COMPONENT_COUNT as usize {
            return Err(StripeError::InvalidGeometry);
        }
        for info in &self.components {
            if info.sub_x == 0 || info.sub_y == 0 {
                return Err(StripeError::InvalidGeometry);
            }
            if info.precision == 0 || info.precision > MAXIMUM_BITS_PER_SAMPLE {
                return Err(StripeError::Unsupported);
            }
        }
        Ok(())
    }

    pub fn image_rect(&self) -> Rect {
        Rect::from_edges(self.image_offset.x, self.image_offset.y, self.extent.x, self.extent.y)
    }

    pub fn tile_grid(&self) -> Coords {
        Coords::new(
            ceil_div(self.extent.x - self.tile_offset.x, self.tile_size.x),
            ceil_div(self.extent.y - self.tile_offset.y, self.tile_size.y),
        )
    }

    pub fn num_tiles(&self) -> usize {
        let grid = self.tile_grid();
        grid.x as usize * grid.y as usize
    }

    pub fn tile_index(&self, tile: Coords) -> usize {
        tile.y as usize * self.tile_grid().x as usize + tile.x as usize
    }

    /// Tile area on the reference grid, clipped to the image area.
    pub fn tile_rect(&self, tile: Coords) -> Rect {
        let x0 = self.tile_offset.x + tile.x * self.tile_size.x;
        let y0 = self.tile_offset.y + tile.y * self.tile_size.y;
        Rect::from_edges(
            x0.max(self.image_offset.x),
            y0.max(self.image_offset.y),
            x0.saturating_add(self.tile_size.x).min(self.extent.x),
            y0.saturating_add(self.tile_size.y).min(self.extent.y),
        )
    }

    pub fn component_rect(&self, component: usize) -> Rect {
        self.image_rect().sub_sampled(self.components[component].sub_sampling())
    }

    pub fn tile_component_rect(&self, tile: Coords, component: usize) -> Rect {
        self.tile_rect(tile).sub_sampled(self.components[component].sub_sampling())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ProgressionOrder {
    #[default]
    Lrcp = 0,
    Rlcp = 1,
    Rpcl = 2,
    Pcrl = 3,
    Cprl = 4,
}

/// Coding style defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodParams {
    pub progression_order: ProgressionOrder,
    pub num_layers: u16,
    pub use_color_transform: bool,
    pub decomposition_levels: u8,
    pub block_width: u32,
    pub block_height: u32,
    pub block_style: u8,
    pub reversible: bool,
    /// Precinct size exponents (PPx, PPy) from the lowest resolution up. Empty
    /// means maximal precincts.
    pub precincts: Vec<(u8, u8)>,
}

impl Default for CodParams {
    fn default() -> Self {
        Self {
            progression_order: ProgressionOrder::Rpcl,
            num_layers: DEFAULT_NUM_LAYERS,
            use_color_transform: false,
            decomposition_levels: DEFAULT_DECOMPOSITIONS,
            block_width: DEFAULT_BLOCK_WIDTH,
            block_height: DEFAULT_BLOCK_HEIGHT,
            block_style: crate::constants::CBLK_STYLE_HT,
            reversible: true,
            precincts: Vec::new(),
        }
    }
}

impl CodParams {
    pub fn validate(&self) -> Result<()> {
        if self.decomposition_levels > MAXIMUM_DECOMPOSITION_LEVELS || self.num_layers == 0 {
            return Err(StripeError::InvalidArgument);
        }
        let valid_block = |v: u32| v.is_power_of_two() && (4..=1024).contains(&v);
        if !valid_block(self.block_width)
            || !valid_block(self.block_height)
            || self.block_width * self.block_height > 4096
        {
            return Err(StripeError::InvalidArgument);
        }
        if !self.precincts.is_empty() && self.precincts.len() > self.decomposition_levels as usize + 1 {
            return Err(StripeError::InvalidArgument);
        }
        Ok(())
    }

    /// Precinct size at `level` (0 is the lowest resolution). Levels beyond the
    /// signalled list repeat the last entry.
    pub fn precinct(&self, level: usize) -> Coords {
        match self.precincts.get(level).or(self.precincts.last()) {
            Some(&(ppx, ppy)) => Coords::new(1 << ppx, 1 << ppy),
            None => Coords::new(1 << 15, 1 << 15),
        }
    }
}

/// Quantisation defaults. Only the irreversible path carries a step size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QcdParams {
    pub guard_bits: u8,
    pub step_size: Option<f32>,
}

impl Default for QcdParams {
    fn default() -> Self {
        Self {
            guard_bits: 1,
            step_size: None,
        }
    }
}

impl QcdParams {
    pub fn irreversible(step_size: f32) -> Self {
        Self {
            guard_bits: 1,
            step_size: Some(step_size),
        }
    }

    pub fn for_cod(cod: &CodParams, step_size: Option<f32>) -> Self {
        if cod.reversible {
            Self::default()
        } else {
            Self::irreversible(step_size.unwrap_or(DEFAULT_QUANTIZATION_STEP))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn siz() -> SizParams {
        SizParams {
            extent: Coords::new(100, 70),
            image_offset: Coords::new(5, 3),
            tile_size: Coords::new(32, 32),
            tile_offset: Coords::new(0, 0),
            components: vec![ComponentInfo::new(8, false); 3],
        }
    }

    #[test]
    fn test_tile_grid_and_rects() {
        let siz = siz();
        assert!(siz.validate().is_ok());
        assert_eq!(siz.tile_grid(), Coords::new(4, 3));
        assert_eq!(siz.tile_rect(Coords::new(0, 0)), Rect::from_edges(5, 3, 32, 32));
        assert_eq!(siz.tile_rect(Coords::new(3, 2)), Rect::from_edges(96, 64, 100, 70));
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        let mut bad = siz();
        bad.tile_offset = Coords::new(6, 0);
        assert_eq!(bad.validate(), Err(StripeError::InvalidGeometry));
        let mut bad = siz();
        bad.components[1].sub_y = 0;
        assert_eq!(bad.validate(), Err(StripeError::InvalidGeometry));
    }

    #[test]
    fn test_validate_limits_tile_count() {
        let mut siz = SizParams::new(65535, 1, vec![ComponentInfo::new(8, false)]);
        siz.tile_size = Coords::new(1, 1);
        assert!(siz.validate().is_ok());
        siz.extent = Coords::new(70000, 1);
        assert_eq!(siz.validate(), Err(StripeError::Unsupported));
    }

    #[test]
    fn test_precinct_defaults() {
        let mut cod = CodParams::default();
        assert_eq!(cod.precinct(2), Coords::new(32768, 32768));
        cod.precincts = vec![(7, 7), (8, 8)];
        assert_eq!(cod.precinct(4), Coords::new(256, 256));
        assert!(cod.validate().is_ok());
    }
}
