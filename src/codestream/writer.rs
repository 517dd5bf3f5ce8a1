//! Marker segment emission for the reference codestream.

use super::marker_code::MarkerCode;
use super::params::{CodParams, QcdParams, SizParams};
use super::stream_writer::StreamWriter;
use crate::constants::{
    CBLK_STYLE_HT, QUANT_STYLE_DERIVED, QUANT_STYLE_NONE, SCOD_PRECINCTS, SIZ_FIXED_LENGTH,
    SOT_SEGMENT_LENGTH, TILE_PART_HEADER_SIZE,
};

// Rsiz bit announcing Part 15 capabilities, with a CAP segment following SIZ.
const RSIZ_CAPABILITIES: u16 = 0x4000;
const PCAP_PART15: u32 = 0x0002_0000;

#[derive(Default)]
pub struct CodestreamWriter {
    writer: StreamWriter,
}

impl CodestreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.writer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_bytes()
    }

    /// SOC through QCD.
    pub fn write_main_header(&mut self, siz: &SizParams, cod: &CodParams, qcd: &QcdParams) {
        let ht = cod.block_style & CBLK_STYLE_HT != 0;
        self.writer.write_marker(MarkerCode::StartOfCodestream);
        self.write_siz(siz, ht);
        if ht {
            self.write_cap();
        }
        self.write_cod(cod);
        let precision = siz.components.first().map_or(8, |c| c.precision);
        self.write_qcd(qcd, cod.decomposition_levels, precision);
    }

    pub fn write_siz(&mut self, siz: &SizParams, ht: bool) {
        let count = siz.components.len() as u16;
        self.writer.write_marker(MarkerCode::ImageAndTileSize);
        self.writer.write_u16(SIZ_FIXED_LENGTH + 3 * count);
        self.writer.write_u16(if ht { RSIZ_CAPABILITIES } else { 0 });
        self.writer.write_u32(siz.extent.x);
        self.writer.write_u32(siz.extent.y);
        self.writer.write_u32(siz.image_offset.x);
        self.writer.write_u32(siz.image_offset.y);
        self.writer.write_u32(siz.tile_size.x);
        self.writer.write_u32(siz.tile_size.y);
        self.writer.write_u32(siz.tile_offset.x);
        self.writer.write_u32(siz.tile_offset.y);
        self.writer.write_u16(count);
        for info in &siz.components {
            let sign = if info.signed { 0x80 } else { 0 };
            self.writer.write_byte(sign | (info.precision - 1));
            self.writer.write_byte(info.sub_x);
            self.writer.write_byte(info.sub_y);
        }
    }

    fn write_cap(&mut self) {
        self.writer.write_marker(MarkerCode::Capability);
        self.writer.write_u16(8);
        self.writer.write_u32(PCAP_PART15);
        self.writer.write_u16(0);
    }

    pub fn write_cod(&mut self, cod: &CodParams) {
        let explicit_precincts = !cod.precincts.is_empty();
        let precinct_bytes = if explicit_precincts {
            cod.decomposition_levels as u16 + 1
        } else {
            0
        };
        self.writer.write_marker(MarkerCode::CodingStyleDefault);
        self.writer.write_u16(12 + precinct_bytes);
        self.writer.write_byte(if explicit_precincts { SCOD_PRECINCTS } else { 0 });
        self.writer.write_byte(cod.progression_order.into());
        self.writer.write_u16(cod.num_layers);
        self.writer.write_byte(cod.use_color_transform as u8);
        self.writer.write_byte(cod.decomposition_levels);
        self.writer.write_byte(cod.block_width.trailing_zeros() as u8 - 2);
        self.writer.write_byte(cod.block_height.trailing_zeros() as u8 - 2);
        self.writer.write_byte(cod.block_style);
        self.writer.write_byte(cod.reversible as u8);
        for level in 0..precinct_bytes as usize {
            let p = cod.precinct(level);
            let (ppx, ppy) = (p.x.trailing_zeros() as u8, p.y.trailing_zeros() as u8);
            self.writer.write_byte((ppy << 4) | ppx);
        }
    }

    pub fn write_qcd(&mut self, qcd: &QcdParams, levels: u8, precision: u8) {
        self.writer.write_marker(MarkerCode::QuantizationDefault);
        match qcd.step_size {
            None => {
                let bands = 3 * levels as u16 + 1;
                self.writer.write_u16(3 + bands);
                self.writer.write_byte((qcd.guard_bits << 5) | QUANT_STYLE_NONE);
                for _ in 0..bands {
                    self.writer.write_byte(precision << 3);
                }
            }
            Some(step) => {
                self.writer.write_u16(5);
                self.writer.write_byte((qcd.guard_bits << 5) | QUANT_STYLE_DERIVED);
                self.writer.write_u16(super::quantization::encode_step(step));
            }
        }
    }

    /// Writes one complete tile-part (SOT, SOD, body), back-filling Psot.
    pub fn write_tile_part(&mut self, tile_index: u16, body: &[u8]) {
        let sot_start = self.writer.len();
        self.writer.write_marker(MarkerCode::StartOfTile);
        self.writer.write_u16(SOT_SEGMENT_LENGTH);
        self.writer.write_u16(tile_index);
        let psot_offset = self.writer.len();
        self.writer.write_u32(0);
        self.writer.write_byte(0); // TPsot
        self.writer.write_byte(1); // TNsot
        self.writer.write_marker(MarkerCode::StartOfData);
        self.writer.write_bytes(body);
        let psot = (self.writer.len() - sot_start) as u32;
        debug_assert_eq!(psot, TILE_PART_HEADER_SIZE + body.len() as u32);
        self.writer.patch_u32(psot_offset, psot);
    }

    pub fn write_eoc(&mut self) {
        self.writer.write_marker(MarkerCode::EndOfCodestream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::params::ComponentInfo;

    #[test]
    fn test_write_header_sequence() {
        let mut writer = CodestreamWriter::new();
        let siz = SizParams::new(512, 512, vec![ComponentInfo::new(8, false); 3]);
        writer.write_main_header(&siz, &CodParams::default(), &QcdParams::default());
        writer.write_tile_part(0, &[0x11, 0x22]);
        writer.write_eoc();
        let written = writer.into_bytes();

        assert_eq!(&written[..4], &[0xFF, 0x4F, 0xFF, 0x51]);
        assert!(written.windows(2).any(|w| w == [0xFF, 0x50])); // CAP
        assert!(written.windows(2).any(|w| w == [0xFF, 0x52])); // COD
        let sot = written.windows(2).position(|w| w == [0xFF, 0x90]).unwrap();
        assert_eq!(&written[sot + 6..sot + 10], &16u32.to_be_bytes());
        assert_eq!(&written[written.len() - 2..], &[0xFF, 0xD9]);
    }
}
