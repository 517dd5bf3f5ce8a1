pub mod codestream;
pub mod constants;
pub mod error;
pub mod session;
pub mod stripe;

pub use error::{Result, StripeError};
pub use session::{CodingParams, EncodeOptions, Htj2kDecoder, Htj2kEncoder};
pub use stripe::{StripeCompressor, StripeDecompressor};

use constants::{COLOR_COMPONENTS, MAXIMUM_BITS_PER_SAMPLE, MINIMUM_BITS_PER_SAMPLE, SINGLE_COMPONENT};

/// Geometry and sample format of the raster a session exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub component_count: u8,
    pub bits_per_sample: u8,
    pub is_signed: bool,
}

impl FrameDescriptor {
    pub fn new(width: u32, height: u32, component_count: u8, bits_per_sample: u8, is_signed: bool) -> Result<Self> {
        let frame = Self {
            width,
            height,
            component_count,
            bits_per_sample,
            is_signed,
        };
        frame.validate()?;
        Ok(frame)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(StripeError::InvalidGeometry);
        }
        if self.component_count != SINGLE_COMPONENT && self.component_count != COLOR_COMPONENTS {
            return Err(StripeError::InvalidGeometry);
        }
        if !(MINIMUM_BITS_PER_SAMPLE..=MAXIMUM_BITS_PER_SAMPLE).contains(&self.bits_per_sample) {
            return Err(StripeError::InvalidGeometry);
        }
        Ok(())
    }

    /// Bytes one sample occupies in a session buffer: 1 up to 8 bits, else 2.
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    /// Size of an interleaved frame buffer in bytes.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.component_count as usize * self.bytes_per_sample()
    }
}

/// Component-count substitution made while negotiating a codestream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentCoercion {
    /// A two-component codestream is delivered as its first component.
    TwoComponents,
    /// Components 1 or 2 differ in size from component 0, so only component 0
    /// is delivered.
    InconsistentGeometry { reported: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_descriptor_validation() {
        assert!(FrameDescriptor::new(16, 16, 3, 8, false).is_ok());
        assert_eq!(FrameDescriptor::new(0, 16, 1, 8, false), Err(StripeError::InvalidGeometry));
        assert_eq!(FrameDescriptor::new(16, 16, 2, 8, false), Err(StripeError::InvalidGeometry));
        assert_eq!(FrameDescriptor::new(16, 16, 1, 17, false), Err(StripeError::InvalidGeometry));
        assert_eq!(FrameDescriptor::new(16, 16, 1, 0, true), Err(StripeError::InvalidGeometry));
    }

    #[test]
    fn test_frame_size() {
        let frame = FrameDescriptor::new(512, 512, 1, 16, true).unwrap();
        assert_eq!(frame.frame_size(), 512 * 512 * 2);
        let frame = FrameDescriptor::new(10, 3, 3, 7, false).unwrap();
        assert_eq!(frame.bytes_per_sample(), 1);
        assert_eq!(frame.frame_size(), 90);
    }
}
