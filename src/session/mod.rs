//! Whole-frame HTJ2K session objects built on the stripe engine.
//!
//! [`Htj2kDecoder`] and [`Htj2kEncoder`] own their encoded and decoded byte
//! buffers. Samples of up to 8 bits travel as one byte each, wider samples as
//! native-endian 16-bit words, components interleaved.

mod decoder;
mod encoder;

pub use decoder::Htj2kDecoder;
pub use encoder::Htj2kEncoder;

use log::{debug, warn};

use crate::codestream::{CodParams, Coords, ProgressionOrder, SizParams};
use crate::constants::{
    COLOR_COMPONENTS, DEFAULT_BLOCK_HEIGHT, DEFAULT_BLOCK_WIDTH, DEFAULT_DECOMPOSITIONS, DEFAULT_NUM_LAYERS,
    DEFAULT_QUANTIZATION_STEP, SINGLE_COMPONENT,
};
use crate::stripe::Acceleration;
use crate::ComponentCoercion;

/// Coding parameters an encoder applies and a decoder reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodingParams {
    pub decompositions: u8,
    pub reversible: bool,
    pub progression_order: ProgressionOrder,
    /// Sub-sampling per component. Missing entries mean 1x1.
    pub down_samples: Vec<Coords>,
    pub image_offset: Coords,
    /// Zero means a single tile covering the image.
    pub tile_size: Coords,
    pub tile_offset: Coords,
    pub block_dimensions: Coords,
    /// Precinct sizes from the lowest resolution up. Empty means maximal precincts.
    pub precincts: Vec<Coords>,
    pub num_layers: u16,
    pub use_color_transform: bool,
}

impl Default for CodingParams {
    fn default() -> Self {
        Self {
            decompositions: DEFAULT_DECOMPOSITIONS,
            reversible: true,
            progression_order: ProgressionOrder::Rpcl,
            down_samples: Vec::new(),
            image_offset: Coords::default(),
            tile_size: Coords::default(),
            tile_offset: Coords::default(),
            block_dimensions: Coords::new(DEFAULT_BLOCK_WIDTH, DEFAULT_BLOCK_HEIGHT),
            precincts: Vec::new(),
            num_layers: DEFAULT_NUM_LAYERS,
            use_color_transform: false,
        }
    }
}

impl CodingParams {
    /// Reads the parameters back out of a parsed header.
    pub fn from_header(siz: &SizParams, cod: &CodParams) -> Self {
        let precincts = if cod.precincts.is_empty() {
            Vec::new()
        } else {
            (0..=cod.decomposition_levels as usize).map(|l| cod.precinct(l)).collect()
        };
        Self {
            decompositions: cod.decomposition_levels,
            reversible: cod.reversible,
            progression_order: cod.progression_order,
            down_samples: siz.components.iter().map(|c| c.sub_sampling()).collect(),
            image_offset: siz.image_offset,
            tile_size: siz.tile_size,
            tile_offset: siz.tile_offset,
            block_dimensions: Coords::new(cod.block_width, cod.block_height),
            precincts,
            num_layers: cod.num_layers,
            use_color_transform: cod.use_color_transform,
        }
    }

    pub fn down_sample(&self, component: usize) -> Coords {
        self.down_samples
            .get(component)
            .copied()
            .unwrap_or(Coords::new(1, 1))
    }

    /// Precinct size at `level`; levels past the list repeat its last entry.
    pub fn precinct(&self, level: usize) -> Coords {
        self.precincts
            .get(level)
            .or(self.precincts.last())
            .copied()
            .unwrap_or(Coords::new(1 << 15, 1 << 15))
    }
}

/// Encoder settings beyond the coding parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    pub params: CodingParams,
    /// Quantisation step of the irreversible path, relative to the sample range.
    pub quantization_step: f32,
    /// Worker threads. 0 and 1 encode on the calling thread.
    pub num_threads: usize,
    pub acceleration: Acceleration,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            params: CodingParams::default(),
            quantization_step: DEFAULT_QUANTIZATION_STEP,
            num_threads: 0,
            acceleration: Acceleration::Auto,
        }
    }
}

/// Number of components a session delivers for a codestream header.
pub(crate) fn negotiate_components(siz: &SizParams) -> (u8, Option<ComponentCoercion>) {
    let reported = siz.components.len() as u16;
    match reported {
        0 | 1 => (reported as u8, None),
        2 => {
            warn!("two-component codestream delivered as a single component");
            (SINGLE_COMPONENT, Some(ComponentCoercion::TwoComponents))
        }
        _ => {
            let first = siz.component_rect(0);
            if siz.component_rect(1) != first || siz.component_rect(2) != first {
                warn!("components 1 and 2 differ from component 0, delivering component 0 of {reported}");
                return (SINGLE_COMPONENT, Some(ComponentCoercion::InconsistentGeometry { reported }));
            }
            if reported > u16::from(COLOR_COMPONENTS) {
                debug!("delivering the first {COLOR_COMPONENTS} of {reported} components");
            }
            (COLOR_COMPONENTS, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::ComponentInfo;

    #[test]
    fn test_negotiation_coerces_component_counts() {
        let mut siz = SizParams::new(8, 8, vec![ComponentInfo::new(8, false); 2]);
        assert_eq!(negotiate_components(&siz), (1, Some(ComponentCoercion::TwoComponents)));

        siz.components = vec![ComponentInfo::new(8, false); 4];
        assert_eq!(negotiate_components(&siz), (3, None));

        siz.components[2].sub_x = 2;
        assert_eq!(
            negotiate_components(&siz),
            (1, Some(ComponentCoercion::InconsistentGeometry { reported: 4 }))
        );
    }

    #[test]
    fn test_precinct_lookup_repeats_last_entry() {
        let params = CodingParams {
            precincts: vec![Coords::new(64, 64), Coords::new(128, 128)],
            ..CodingParams::default()
        };
        assert_eq!(params.precinct(0), Coords::new(64, 64));
        assert_eq!(params.precinct(4), Coords::new(128, 128));
        assert_eq!(CodingParams::default().precinct(2), Coords::new(1 << 15, 1 << 15));
        assert_eq!(params.down_sample(2), Coords::new(1, 1));
    }
}
