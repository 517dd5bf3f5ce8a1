//! Big-endian cursor over codestream bytes.

use super::marker_code::MarkerCode;
use crate::constants::MARKER_START_BYTE;
use crate::error::{Result, StripeError};

pub struct StreamReader<'a> {
    source: &'a [u8],
    position: usize,
}

impl<'a> StreamReader<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self { source, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining_data(&self) -> &'a [u8] {
        &self.source[self.position..]
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let value = *self.source.get(self.position).ok_or(StripeError::InvalidData)?;
        self.position += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.read_u8()?, self.read_u8()?]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self.position.checked_add(count).ok_or(StripeError::InvalidData)?;
        let bytes = self.source.get(self.position..end).ok_or(StripeError::InvalidData)?;
        self.position = end;
        Ok(bytes)
    }

    /// Reads `FF xx` and maps `xx` to a known marker.
    pub fn read_marker(&mut self) -> Result<MarkerCode> {
        if self.read_u8()? != MARKER_START_BYTE {
            return Err(StripeError::InvalidData);
        }
        MarkerCode::from_byte(self.read_u8()?)
    }

    /// Returns the second marker byte without consuming anything.
    pub fn peek_marker_byte(&self) -> Result<u8> {
        match self.remaining_data() {
            [MARKER_START_BYTE, code, ..] => Ok(*code),
            _ => Err(StripeError::InvalidData),
        }
    }

    /// Skips the body of a segment whose marker has already been read.
    pub fn skip_segment(&mut self) -> Result<()> {
        let len = self.read_u16()?;
        if len < 2 {
            return Err(StripeError::InvalidData);
        }
        self.read_bytes((len - 2) as usize)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_big_endian() {
        let data = [0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 0xFF, 0x4F];
        let mut reader = StreamReader::new(&data);
        assert_eq!(reader.read_u16(), Ok(0x1234));
        assert_eq!(reader.read_u32(), Ok(0xDEAD_BEEF));
        assert_eq!(reader.peek_marker_byte(), Ok(0x4F));
        assert_eq!(reader.read_marker(), Ok(MarkerCode::StartOfCodestream));
        assert_eq!(reader.read_u8(), Err(StripeError::InvalidData));
    }
}
