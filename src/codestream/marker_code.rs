use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::StripeError;

/// Second byte of the JPEG 2000 markers understood by the reference codestream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MarkerCode {
    /// SOC: Start of codestream.
    StartOfCodestream = 0x4F,
    /// CAP: Extended capabilities (Part 15 streams carry one).
    Capability = 0x50,
    /// SIZ: Image and tile size.
    ImageAndTileSize = 0x51,
    /// COD: Coding style default.
    CodingStyleDefault = 0x52,
    /// QCD: Quantization default.
    QuantizationDefault = 0x5C,
    /// COM: Comment.
    Comment = 0x64,
    /// SOT: Start of tile-part.
    StartOfTile = 0x90,
    /// SOD: Start of data.
    StartOfData = 0x93,
    /// EOC: End of codestream.
    EndOfCodestream = 0xD9,
}

impl MarkerCode {
    pub fn from_byte(value: u8) -> Result<Self, StripeError> {
        Self::try_from(value).map_err(|_| StripeError::InvalidData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_from_byte() {
        assert_eq!(MarkerCode::from_byte(0x90), Ok(MarkerCode::StartOfTile));
        assert_eq!(u8::from(MarkerCode::EndOfCodestream), 0xD9);
        assert_eq!(MarkerCode::from_byte(0x01), Err(StripeError::InvalidData));
    }
}
