pub const MARKER_START_BYTE: u8 = 0xFF;

pub const MINIMUM_BITS_PER_SAMPLE: u8 = 1;
pub const MAXIMUM_BITS_PER_SAMPLE: u8 = 16;

// The engine transfers either a single plane or a three component (colour) image.
pub const SINGLE_COMPONENT: u8 = 1;
pub const COLOR_COMPONENTS: u8 = 3;

// Csiz limit from ISO/IEC 15444-1, table A.9.
pub const MAXIMUM_COMPONENT_COUNT: u16 = 16384;

// Upper bound on DWT levels, ISO/IEC 15444-1 table A.15.
pub const MAXIMUM_DECOMPOSITION_LEVELS: u8 = 32;

// Isot is 16 bits wide and 65535 is reserved, table A.5.
pub const MAXIMUM_TILE_COUNT: usize = 65535;

// Encoder defaults, matching the HTJ2K session object defaults.
pub const DEFAULT_DECOMPOSITIONS: u8 = 5;
pub const DEFAULT_BLOCK_WIDTH: u32 = 64;
pub const DEFAULT_BLOCK_HEIGHT: u32 = 64;
pub const DEFAULT_NUM_LAYERS: u16 = 1;
pub const DEFAULT_QUANTIZATION_STEP: f32 = 1.0 / 256.0;

// Stripe height hints used by `recommended_stripe_heights` when the caller has no preference.
pub const DEFAULT_PREFERRED_MIN_STRIPE_HEIGHT: usize = 8;
pub const DEFAULT_ABSOLUTE_MAX_STRIPE_HEIGHT: usize = 1024;

// Fixed part of the SIZ segment length (Lsiz without the 3 bytes per component).
pub const SIZ_FIXED_LENGTH: u16 = 38;
// Lsot is always 10.
pub const SOT_SEGMENT_LENGTH: u16 = 10;
// SOT marker (2) + segment (10) + SOD marker (2).
pub const TILE_PART_HEADER_SIZE: u32 = 14;

// Scod flag: precinct sizes follow in SPcod.
pub const SCOD_PRECINCTS: u8 = 0x01;
// Code-block style flag for HT (Part 15) block coding.
pub const CBLK_STYLE_HT: u8 = 0x40;

// Sqcd quantization styles (low 5 bits).
pub const QUANT_STYLE_NONE: u8 = 0x00;
pub const QUANT_STYLE_DERIVED: u8 = 0x01;
