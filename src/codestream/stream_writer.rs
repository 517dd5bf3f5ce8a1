//! Growable big-endian codestream writer.

use super::marker_code::MarkerCode;
use crate::constants::MARKER_START_BYTE;

#[derive(Debug, Default)]
pub struct StreamWriter {
    destination: Vec<u8>,
}

impl StreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.destination.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destination.is_empty()
    }

    pub fn write_byte(&mut self, value: u8) {
        self.destination.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.destination.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.destination.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.destination.extend_from_slice(data);
    }

    pub fn write_marker(&mut self, marker: MarkerCode) {
        self.write_byte(MARKER_START_BYTE);
        self.write_byte(marker.into());
    }

    /// Overwrites four bytes at `offset`, used to back-fill lengths.
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        if let Some(slot) = self.destination.get_mut(offset..offset + 4) {
            slot.copy_from_slice(&value.to_be_bytes());
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.destination
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_u32() {
        let mut writer = StreamWriter::new();
        writer.write_marker(MarkerCode::StartOfTile);
        writer.write_u32(0);
        writer.write_u16(0xABCD);
        writer.patch_u32(2, 0x0102_0304);
        assert_eq!(writer.as_bytes(), &[0xFF, 0x90, 1, 2, 3, 4, 0xAB, 0xCD]);
    }
}
