//! Whole-frame sessions over the reference codestream.

mod common;

use common::{gradient_u8, words_to_bytes};
use htj2k_stripe::codestream::{
    CodParams, ComponentInfo, Coords, ParseMode, QcdParams, ReferenceCodestream, SizParams,
};
use htj2k_stripe::stripe::{CompressorOptions, StripeBufRef, StripeCompressor};
use htj2k_stripe::{ComponentCoercion, FrameDescriptor, Htj2kDecoder, Htj2kEncoder, StripeError};

fn encode(frame: FrameDescriptor, pixels: &[u8], configure: impl FnOnce(&mut Htj2kEncoder)) -> Vec<u8> {
    let mut encoder = Htj2kEncoder::new();
    encoder.decoded_buffer_mut(frame).unwrap().copy_from_slice(pixels);
    configure(&mut encoder);
    encoder.encode().unwrap();
    encoder.encoded_bytes().to_vec()
}

fn decode(encoded: &[u8]) -> Htj2kDecoder {
    let mut decoder = Htj2kDecoder::new();
    decoder.encoded_buffer_mut(encoded.len()).copy_from_slice(encoded);
    decoder.decode().unwrap();
    decoder
}

#[test_log::test]
fn test_lossless_8_bit_unsigned_colour() {
    let frame = FrameDescriptor::new(37, 23, 3, 8, false).unwrap();
    let pixels = gradient_u8(37, 23, 3);
    let encoded = encode(frame, &pixels, |e| {
        e.set_tile_size(Coords::new(16, 8));
        e.set_is_using_color_transform(true);
    });
    let decoder = decode(&encoded);
    assert_eq!(decoder.frame_descriptor().unwrap(), frame);
    assert!(decoder.is_using_color_transform());
    assert_eq!(decoder.tile_size(), Coords::new(16, 8));
    assert_eq!(decoder.decoded_bytes(), &pixels[..]);
}

#[test]
fn test_lossless_8_bit_signed() {
    let frame = FrameDescriptor::new(20, 9, 1, 8, true).unwrap();
    let pixels: Vec<u8> = (0..180).map(|v: i32| ((v * 11) % 256 - 128) as i8 as u8).collect();
    let encoded = encode(frame, &pixels, |_| {});
    assert_eq!(decode(&encoded).decoded_bytes(), &pixels[..]);
}

#[test]
fn test_lossless_16_bit_both_signedness() {
    for signed in [false, true] {
        let frame = FrameDescriptor::new(19, 13, 1, 16, signed).unwrap();
        let words: Vec<u16> = (0..19 * 13u32).map(|v| (v * 2741 % 65536) as u16).collect();
        let pixels = words_to_bytes(&words);
        let encoded = encode(frame, &pixels, |e| {
            e.set_tile_size(Coords::new(8, 8));
            e.set_decompositions(2);
        });
        let decoder = decode(&encoded);
        assert_eq!(decoder.decoded_bytes(), &pixels[..], "signed = {signed}");
        assert_eq!(decoder.num_decompositions(), 2);
    }
}

#[test]
fn test_12_bit_samples_travel_as_words() {
    let frame = FrameDescriptor::new(10, 10, 1, 12, false).unwrap();
    let words: Vec<u16> = (0..100u16).map(|v| v * 40).collect();
    let pixels = words_to_bytes(&words);
    let encoded = encode(frame, &pixels, |_| {});
    assert_eq!(decode(&encoded).decoded_bytes(), &pixels[..]);
}

#[test]
fn test_16_bit_signed_frame_size() {
    let frame = FrameDescriptor::new(512, 512, 1, 16, true).unwrap();
    let pixels = vec![0u8; frame.frame_size()];
    let encoded = encode(frame, &pixels, |e| e.set_tile_size(Coords::new(256, 256)));
    let decoder = decode(&encoded);
    assert_eq!(decoder.decoded_bytes().len(), 512 * 512 * 2);
}

#[test]
fn test_inconsistent_components_coerced_to_one() {
    let frame = FrameDescriptor::new(16, 8, 3, 8, false).unwrap();
    let pixels = gradient_u8(16, 8, 3);
    // Component 2 is half width, so the buffer holds three planes.
    let mut planar = Vec::new();
    for c in 0..3 {
        for y in 0..8 {
            for x in 0..16 {
                if c < 2 || x < 8 {
                    planar.push(pixels[(y * 16 + x) * 3 + c]);
                }
            }
        }
    }
    planar.resize(pixels.len(), 0);
    let encoded = encode(frame, &planar, |e| e.set_down_sample(2, Coords::new(2, 1)).unwrap());

    let mut decoder = decode(&encoded);
    let delivered = decoder.frame_descriptor().unwrap();
    assert_eq!(delivered.component_count, 1);
    assert_eq!(
        decoder.component_coercion(),
        Some(ComponentCoercion::InconsistentGeometry { reported: 3 })
    );
    assert_eq!(decoder.down_sample(2), Coords::new(2, 1));
    assert_eq!(decoder.decoded_bytes(), &planar[..16 * 8]);
    assert_eq!(decoder.read_header().unwrap().component_count, 1);
}

#[test]
fn test_two_components_coerced_to_one() {
    let siz = SizParams::new(6, 4, vec![ComponentInfo::new(8, false); 2]);
    let codestream = ReferenceCodestream::create(siz, CodParams::default(), QcdParams::default()).unwrap();
    let mut compressor = StripeCompressor::new(CompressorOptions::default());
    compressor.start(codestream).unwrap();
    let samples: Vec<u8> = (0..48).collect();
    compressor.push_stripe(StripeBufRef::Byte(&samples), &[4, 4], None).unwrap();
    let encoded = compressor.finish().unwrap().into_encoded().unwrap();

    let decoder = decode(&encoded);
    assert_eq!(decoder.component_coercion(), Some(ComponentCoercion::TwoComponents));
    let first: Vec<u8> = samples.iter().step_by(2).copied().collect();
    assert_eq!(decoder.decoded_bytes(), &first[..]);
}

#[test]
fn test_sub_resolution_matches_reported_size() {
    let frame = FrameDescriptor::new(45, 30, 3, 8, false).unwrap();
    let pixels = gradient_u8(45, 30, 3);
    let encoded = encode(frame, &pixels, |e| e.set_tile_size(Coords::new(32, 16)));
    let mut decoder = Htj2kDecoder::new();
    decoder.set_encoded(encoded);
    for level in 0..=3 {
        decoder.decode_sub_resolution(level).unwrap();
        let size = decoder.size_at_decomposition_level(level).unwrap();
        assert_eq!(
            decoder.decoded_bytes().len(),
            size.x as usize * size.y as usize * 3,
            "level {level}"
        );
    }
    assert_eq!(decoder.size_at_decomposition_level(2).unwrap(), Coords::new(12, 8));
    assert_eq!(decoder.decode_sub_resolution(6), Err(StripeError::InvalidArgument));
}

#[test]
fn test_irreversible_within_tolerance() {
    let frame = FrameDescriptor::new(64, 48, 1, 8, false).unwrap();
    let pixels = gradient_u8(64, 48, 1);
    let encoded = encode(frame, &pixels, |e| {
        e.set_quality(false, 1.0 / 256.0);
        e.set_decompositions(3);
    });
    let decoder = decode(&encoded);
    assert!(!decoder.is_reversible());
    let errors: Vec<i32> = decoder
        .decoded_bytes()
        .iter()
        .zip(&pixels)
        .map(|(&a, &b)| (a as i32 - b as i32).abs())
        .collect();
    let mean = errors.iter().sum::<i32>() as f64 / errors.len() as f64;
    let max = errors.iter().copied().max().unwrap();
    assert!(mean < 3.0, "mean error {mean}");
    assert!(max < 24, "max error {max}");
}

#[test]
fn test_threaded_decode_matches_single_threaded() {
    let frame = FrameDescriptor::new(70, 50, 3, 8, false).unwrap();
    let pixels = gradient_u8(70, 50, 3);
    let encoded = encode(frame, &pixels, |e| {
        e.set_tile_size(Coords::new(16, 16));
        e.set_num_threads(3);
    });
    assert_eq!(
        encoded,
        encode(frame, &pixels, |e| e.set_tile_size(Coords::new(16, 16)))
    );

    let mut threaded = Htj2kDecoder::new();
    threaded.set_encoded(encoded.clone());
    threaded.set_num_threads(4).unwrap();
    threaded.decode().unwrap();
    assert_eq!(threaded.decoded_bytes(), decode(&encoded).decoded_bytes());
    assert_eq!(threaded.decoded_bytes(), &pixels[..]);
}

#[test]
fn test_stripe_wise_decode_matches_one_shot() {
    let frame = FrameDescriptor::new(33, 41, 1, 16, false).unwrap();
    let words: Vec<u16> = (0..33 * 41u32).map(|v| (v * 97 % 65536) as u16).collect();
    let pixels = words_to_bytes(&words);
    let encoded = encode(frame, &pixels, |e| e.set_tile_size(Coords::new(33, 10)));

    let mut decoder = Htj2kDecoder::new();
    decoder.set_encoded(encoded.clone());
    decoder.start_stripes().unwrap();
    let mut collected = Vec::new();
    loop {
        let heights = decoder.recommended_stripe_heights().unwrap();
        let (written, more) = decoder.pull_stripe(&heights.current).unwrap();
        assert_eq!(written, heights.current[0] * 33 * 2);
        collected.extend_from_slice(decoder.stripe_bytes());
        if !more {
            break;
        }
    }
    decoder.finish().unwrap();
    assert_eq!(collected, decode(&encoded).decoded_bytes());
}

#[test]
fn test_strict_parsing_required_for_stripes() {
    let frame = FrameDescriptor::new(8, 8, 1, 8, false).unwrap();
    let encoded = encode(frame, &gradient_u8(8, 8, 1), |_| {});
    let codestream = ReferenceCodestream::open(encoded, ParseMode::Resilient).unwrap();
    let mut session = htj2k_stripe::StripeDecompressor::new(Default::default());
    assert_eq!(session.start(codestream).err(), Some(StripeError::InvalidState));
}

#[test]
fn test_maximum_decomposition_levels() {
    let frame = FrameDescriptor::new(8, 8, 1, 8, false).unwrap();
    let pixels = gradient_u8(8, 8, 1);
    let encoded = encode(frame, &pixels, |e| e.set_decompositions(32));
    let mut decoder = decode(&encoded);
    assert_eq!(decoder.num_decompositions(), 32);
    assert_eq!(decoder.decoded_bytes(), &pixels[..]);

    decoder.decode_sub_resolution(30).unwrap();
    assert_eq!(decoder.decoded_bytes().len(), 1);
    // Below level 30 the sub-sampling factor no longer fits the row counter.
    assert_eq!(decoder.decode_sub_resolution(31), Err(StripeError::InvalidArgument));
    assert_eq!(decoder.decode_sub_resolution(32), Err(StripeError::InvalidArgument));
}

#[test]
fn test_tile_count_limited_by_tile_index() {
    let frame = FrameDescriptor::new(70000, 1, 1, 8, false).unwrap();
    let mut encoder = Htj2kEncoder::new();
    encoder.decoded_buffer_mut(frame).unwrap().fill(9);
    encoder.set_tile_size(Coords::new(1, 1));
    encoder.set_decompositions(0);
    assert_eq!(encoder.encode(), Err(StripeError::Unsupported));
    assert!(encoder.encoded_bytes().is_empty());
}

fn configure_tiled_colour(encoder: &mut Htj2kEncoder) {
    encoder.set_tile_size(Coords::new(16, 8));
    encoder.set_is_using_color_transform(true);
}

#[test_log::test]
fn test_stripe_wise_encode_matches_one_shot() {
    for bits in [8u8, 12] {
        let frame = FrameDescriptor::new(30, 21, 3, bits, false).unwrap();
        let pixels = if bits == 8 {
            gradient_u8(30, 21, 3)
        } else {
            let words: Vec<u16> = (0..30 * 21 * 3u32).map(|v| (v * 37 % 4096) as u16).collect();
            words_to_bytes(&words)
        };
        let one_shot = encode(frame, &pixels, configure_tiled_colour);

        let mut encoder = Htj2kEncoder::new();
        encoder.set_frame(frame).unwrap();
        configure_tiled_colour(&mut encoder);
        encoder.start_stripes().unwrap();
        let row_bytes = 30 * 3 * frame.bytes_per_sample();
        let mut row = 0;
        loop {
            let heights = encoder.recommended_stripe_heights().unwrap();
            let rows = heights.current[0];
            encoder
                .stripe_buffer_mut(rows)
                .unwrap()
                .copy_from_slice(&pixels[row * row_bytes..(row + rows) * row_bytes]);
            row += rows;
            if !encoder.push_stripe(&heights.current).unwrap() {
                break;
            }
        }
        assert_eq!(row, 21, "{bits} bits");
        encoder.finish().unwrap();
        assert_eq!(encoder.encoded_bytes(), &one_shot[..], "{bits} bits");
    }
}

#[test]
fn test_stripe_wise_encode_finish_needs_every_row() {
    let frame = FrameDescriptor::new(12, 6, 1, 8, false).unwrap();
    let mut encoder = Htj2kEncoder::new();
    assert_eq!(encoder.start_stripes(), Err(StripeError::InvalidState));
    encoder.set_frame(frame).unwrap();
    encoder.start_stripes().unwrap();
    assert_eq!(encoder.start_stripes(), Err(StripeError::InvalidState));
    assert_eq!(encoder.encode(), Err(StripeError::InvalidState));

    encoder.stripe_buffer_mut(4).unwrap().fill(50);
    assert_eq!(encoder.push_stripe(&[4]), Ok(true));
    assert_eq!(encoder.finish(), Err(StripeError::IncompleteImage));
    encoder.stripe_buffer_mut(2).unwrap().fill(60);
    assert_eq!(encoder.push_stripe(&[2]), Ok(false));
    encoder.finish().unwrap();

    let decoder = decode(encoder.encoded_bytes());
    assert_eq!(&decoder.decoded_bytes()[..48], &[50u8; 48][..]);
    assert_eq!(&decoder.decoded_bytes()[48..], &[60u8; 24][..]);
}
