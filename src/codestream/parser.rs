//! Reference codestream parser.
//!
//! Reads the main header (SOC, SIZ, CAP, COD, QCD, COM) and indexes tile-part
//! bodies by their Psot lengths without touching the coefficient bytes.

use std::ops::Range;

use log::{trace, warn};

use super::geometry::Coords;
use super::marker_code::MarkerCode;
use super::params::{CodParams, ComponentInfo, ProgressionOrder, QcdParams, SizParams};
use super::quantization::decode_step;
use super::stream_reader::StreamReader;
use crate::constants::{
    QUANT_STYLE_DERIVED, QUANT_STYLE_NONE, SCOD_PRECINCTS, SIZ_FIXED_LENGTH, SOT_SEGMENT_LENGTH,
};
use crate::error::{Result, StripeError};

/// Strictness of codestream parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Any structural inconsistency is an error.
    #[default]
    Fussy,
    /// Unknown segments are skipped and damaged tile-parts are tolerated.
    Resilient,
}

#[derive(Debug)]
pub struct ParsedCodestream {
    pub siz: SizParams,
    pub cod: CodParams,
    pub qcd: QcdParams,
    /// Byte range of each tile's body, by tile index.
    pub tiles: Vec<Option<Range<usize>>>,
}

pub struct CodestreamParser<'a> {
    reader: StreamReader<'a>,
    mode: ParseMode,
    siz: Option<SizParams>,
    cod: Option<CodParams>,
    qcd: Option<(QcdParams, usize)>,
}

impl<'a> CodestreamParser<'a> {
    pub fn new(source: &'a [u8], mode: ParseMode) -> Self {
        Self {
            reader: StreamReader::new(source),
            mode,
            siz: None,
            cod: None,
            qcd: None,
        }
    }

    fn fussy(&self) -> bool {
        self.mode == ParseMode::Fussy
    }

    pub fn parse(mut self) -> Result<ParsedCodestream> {
        self.parse_main_header()?;
        let (siz, cod, qcd) = self.take_header()?;
        let tiles = self.parse_tile_parts(&siz)?;
        Ok(ParsedCodestream { siz, cod, qcd, tiles })
    }

    fn parse_main_header(&mut self) -> Result<()> {
        if self.reader.read_marker()? != MarkerCode::StartOfCodestream {
            return Err(StripeError::InvalidData);
        }
        loop {
            let code = self.reader.peek_marker_byte()?;
            let marker = match MarkerCode::from_byte(code) {
                Ok(marker) => marker,
                Err(e) if self.fussy() => return Err(e),
                Err(_) => {
                    warn!("skipping unknown main header marker 0xFF{code:02X}");
                    self.reader.read_bytes(2)?;
                    self.reader.skip_segment()?;
                    continue;
                }
            };
            if marker == MarkerCode::StartOfTile {
                return Ok(());
            }
            self.reader.read_bytes(2)?;
            if self.fussy() && self.siz.is_none() && marker != MarkerCode::ImageAndTileSize {
                // SIZ must directly follow SOC.
                return Err(StripeError::InvalidData);
            }
            match marker {
                MarkerCode::ImageAndTileSize => self.parse_siz()?,
                MarkerCode::CodingStyleDefault => self.parse_cod()?,
                MarkerCode::QuantizationDefault => self.parse_qcd()?,
                MarkerCode::Capability | MarkerCode::Comment => self.reader.skip_segment()?,
                _ => return Err(StripeError::InvalidData),
            }
        }
    }

    fn take_header(&mut self) -> Result<(SizParams, CodParams, QcdParams)> {
        let siz = self.siz.take().ok_or(StripeError::InvalidData)?;
        let cod = self.cod.take().ok_or(StripeError::InvalidData)?;
        let (qcd, band_values) = self.qcd.take().ok_or(StripeError::InvalidData)?;
        if cod.reversible != qcd.step_size.is_none() {
            return Err(StripeError::InvalidData);
        }
        if self.fussy() && cod.reversible && band_values != 3 * cod.decomposition_levels as usize + 1 {
            return Err(StripeError::InvalidData);
        }
        Ok((siz, cod, qcd))
    }

    fn parse_siz(&mut self) -> Result<()> {
        let len = self.reader.read_u16()?;
        let _rsiz = self.reader.read_u16()?;
        let extent = Coords::new(self.reader.read_u32()?, self.reader.read_u32()?);
        let image_offset = Coords::new(self.reader.read_u32()?, self.reader.read_u32()?);
        let tile_size = Coords::new(self.reader.read_u32()?, self.reader.read_u32()?);
        let tile_offset = Coords::new(self.reader.read_u32()?, self.reader.read_u32()?);
        let count = self.reader.read_u16()?;
        if len as u32 != SIZ_FIXED_LENGTH as u32 + 3 * count as u32 {
            return Err(StripeError::InvalidData);
        }
        let mut components = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let ssiz = self.reader.read_u8()?;
            components.push(ComponentInfo {
                precision: (ssiz & 0x7F) + 1,
                signed: ssiz & 0x80 != 0,
                sub_x: self.reader.read_u8()?,
                sub_y: self.reader.read_u8()?,
            });
        }
        let siz = SizParams {
            extent,
            image_offset,
            tile_size,
            tile_offset,
            components,
        };
        siz.validate().map_err(|e| match e {
            StripeError::Unsupported => e,
            _ => StripeError::InvalidData,
        })?;
        trace!("SIZ {:?}", siz);
        self.siz = Some(siz);
        Ok(())
    }

    fn parse_cod(&mut self) -> Result<()> {
        let len = self.reader.read_u16()?;
        if len < 12 {
            return Err(StripeError::InvalidData);
        }
        let scod = self.reader.read_u8()?;
        let progression_order =
            ProgressionOrder::try_from(self.reader.read_u8()?).map_err(|_| StripeError::InvalidData)?;
        let num_layers = self.reader.read_u16()?;
        let mct = self.reader.read_u8()?;
        let decomposition_levels = self.reader.read_u8()?;
        let xcb = self.reader.read_u8()?;
        let ycb = self.reader.read_u8()?;
        let block_style = self.reader.read_u8()?;
        let transform = self.reader.read_u8()?;
        if xcb > 8 || ycb > 8 || transform > 1 || mct > 1 {
            return Err(StripeError::InvalidData);
        }

        let mut precincts = Vec::new();
        if scod & SCOD_PRECINCTS != 0 {
            for _ in 0..=decomposition_levels {
                let pp = self.reader.read_u8()?;
                precincts.push((pp & 0x0F, pp >> 4));
            }
        }
        let consumed = 12 + precincts.len();
        if consumed != len as usize {
            if self.fussy() {
                return Err(StripeError::InvalidData);
            }
            self.reader
                .read_bytes((len as usize).saturating_sub(consumed))?;
        }

        let cod = CodParams {
            progression_order,
            num_layers,
            use_color_transform: mct == 1,
            decomposition_levels,
            block_width: 1 << (xcb + 2),
            block_height: 1 << (ycb + 2),
            block_style,
            reversible: transform == 1,
            precincts,
        };
        cod.validate().map_err(|_| StripeError::InvalidData)?;
        trace!("COD {:?}", cod);
        self.cod = Some(cod);
        Ok(())
    }

    fn parse_qcd(&mut self) -> Result<()> {
        let len = self.reader.read_u16()?;
        if len < 4 {
            return Err(StripeError::InvalidData);
        }
        let sqcd = self.reader.read_u8()?;
        let guard_bits = sqcd >> 5;
        let body = self.reader.read_bytes(len as usize - 3)?;
        let (step_size, band_values) = match sqcd & 0x1F {
            QUANT_STYLE_NONE => (None, body.len()),
            QUANT_STYLE_DERIVED if body.len() == 2 => {
                (Some(decode_step(u16::from_be_bytes([body[0], body[1]]))), 1)
            }
            _ => return Err(StripeError::Unsupported),
        };
        self.qcd = Some((QcdParams { guard_bits, step_size }, band_values));
        Ok(())
    }

    fn parse_tile_parts(&mut self, siz: &SizParams) -> Result<Vec<Option<Range<usize>>>> {
        let num_tiles = siz.num_tiles();
        let mut tiles = vec![None; num_tiles];
        loop {
            let sot_start = self.reader.position();
            match self.reader.read_marker() {
                Ok(MarkerCode::StartOfTile) => {}
                Ok(MarkerCode::EndOfCodestream) => return Ok(tiles),
                _ if self.fussy() => return Err(StripeError::InvalidData),
                _ => {
                    warn!("codestream truncated after {} bytes", sot_start);
                    return Ok(tiles);
                }
            }
            let lsot = self.reader.read_u16()?;
            let index = self.reader.read_u16()? as usize;
            let psot = self.reader.read_u32()? as usize;
            let tp_index = self.reader.read_u8()?;
            let _tp_count = self.reader.read_u8()?;
            if self.fussy() && (lsot != SOT_SEGMENT_LENGTH || tp_index != 0 || index >= num_tiles) {
                return Err(StripeError::InvalidData);
            }

            // Tile-part header segments until SOD.
            loop {
                match self.reader.read_marker() {
                    Ok(MarkerCode::StartOfData) => break,
                    Ok(MarkerCode::Comment) => self.reader.skip_segment()?,
                    _ if self.fussy() => return Err(StripeError::InvalidData),
                    _ => self.reader.skip_segment()?,
                }
            }

            let source_len = self.reader.position() + self.reader.remaining_data().len();
            let body_start = self.reader.position();
            let body_end = if psot == 0 {
                // Last tile-part runs up to EOC.
                source_len.saturating_sub(2).max(body_start)
            } else {
                sot_start + psot
            };
            if body_end > source_len || body_end < body_start {
                if self.fussy() {
                    return Err(StripeError::InvalidData);
                }
                warn!("tile {} Psot runs past the end of the codestream", index);
                if index < num_tiles && tiles[index].is_none() {
                    tiles[index] = Some(body_start..source_len);
                }
                return Ok(tiles);
            }
            if index < num_tiles {
                if tiles[index].is_some() && self.fussy() {
                    return Err(StripeError::InvalidData);
                }
                tiles[index].get_or_insert(body_start..body_end);
            }
            self.reader.read_bytes(body_end - body_start)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::writer::CodestreamWriter;

    fn sample_stream() -> Vec<u8> {
        let mut siz = SizParams::new(16, 8, vec![ComponentInfo::new(12, true)]);
        siz.tile_size = Coords::new(8, 8);
        let cod = CodParams {
            decomposition_levels: 2,
            precincts: vec![(4, 4), (5, 5), (6, 6)],
            ..CodParams::default()
        };
        let mut writer = CodestreamWriter::new();
        writer.write_main_header(&siz, &cod, &QcdParams::default());
        writer.write_tile_part(0, &[1, 2, 3]);
        writer.write_tile_part(1, &[4, 5]);
        writer.write_eoc();
        writer.into_bytes()
    }

    #[test]
    fn test_parse_header_and_tiles() {
        let bytes = sample_stream();
        let parsed = CodestreamParser::new(&bytes, ParseMode::Fussy).parse().unwrap();
        assert_eq!(parsed.siz.extent, Coords::new(16, 8));
        assert_eq!(parsed.siz.components[0], ComponentInfo::new(12, true));
        assert_eq!(parsed.cod.decomposition_levels, 2);
        assert_eq!(parsed.cod.progression_order, ProgressionOrder::Rpcl);
        assert_eq!(parsed.cod.precinct(1), Coords::new(32, 32));
        assert!(parsed.cod.reversible);
        let t0 = parsed.tiles[0].clone().unwrap();
        let t1 = parsed.tiles[1].clone().unwrap();
        assert_eq!(&bytes[t0], &[1, 2, 3]);
        assert_eq!(&bytes[t1], &[4, 5]);
    }

    #[test]
    fn test_fussy_rejects_unknown_marker() {
        let mut bytes = sample_stream();
        // Replace the CAP marker with an unknown one that keeps its length field.
        let cap = bytes.windows(2).position(|w| w == [0xFF, 0x50]).unwrap();
        bytes[cap + 1] = 0x5F;
        assert_eq!(
            CodestreamParser::new(&bytes, ParseMode::Fussy).parse().unwrap_err(),
            StripeError::InvalidData
        );
        assert!(CodestreamParser::new(&bytes, ParseMode::Resilient).parse().is_ok());
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = sample_stream();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(CodestreamParser::new(truncated, ParseMode::Fussy).parse().is_err());
        let parsed = CodestreamParser::new(truncated, ParseMode::Resilient).parse().unwrap();
        assert!(parsed.tiles[0].is_some());
        assert!(parsed.tiles[1].is_some());
    }
}
