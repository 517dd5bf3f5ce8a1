//! Scalar quantisation of irreversible wavelet coefficients.
//!
//! The step is carried in QCD as an (exponent, mantissa) pair:
//! `step = (1 + mantissa / 2048) * 2^-exponent`.

pub fn quantize_scalar(coeff: f32, step_size: f32) -> i32 {
    if step_size <= 0.0 {
        return coeff as i32;
    }
    // Dead-zone quantisation: q = sign(x) * floor(|x| / delta)
    let q = (coeff.abs() / step_size).floor() as i32;
    if coeff < 0.0 { -q } else { q }
}

pub fn dequantize_scalar(q: i32, step_size: f32) -> f32 {
    // Mid-point reconstruction, zero stays zero.
    if q == 0 {
        return 0.0;
    }
    let mag = (q.unsigned_abs() as f32 + 0.5) * step_size;
    if q < 0 { -mag } else { mag }
}

/// Encodes a step size as the 16-bit SPqcd value `exponent << 11 | mantissa`.
pub fn encode_step(step_size: f32) -> u16 {
    let mut exponent = 0u16;
    let mut normalised = step_size;
    while normalised < 1.0 && exponent < 31 {
        normalised *= 2.0;
        exponent += 1;
    }
    let mantissa = (((normalised - 1.0) * 2048.0).round() as u16).min(2047);
    (exponent << 11) | mantissa
}

pub fn decode_step(value: u16) -> f32 {
    let exponent = (value >> 11) as i32;
    let mantissa = (value & 0x07FF) as f32;
    (1.0 + mantissa / 2048.0) * 2f32.powi(-exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_roundtrip() {
        let val = 10.5;
        let step = 2.0;
        let q = quantize_scalar(val, step);
        // 10.5 / 2.0 = 5.25 -> 5
        assert_eq!(q, 5);
        let recon = dequantize_scalar(q, step);
        assert!((val - recon).abs() <= step);
        assert_eq!(dequantize_scalar(quantize_scalar(-10.5, step), step), -11.0);
    }

    #[test]
    fn test_step_encoding() {
        let encoded = encode_step(1.0 / 256.0);
        assert_eq!(encoded, 8 << 11);
        assert_eq!(decode_step(encoded), 1.0 / 256.0);
        let step = 0.003;
        assert!((decode_step(encode_step(step)) - step).abs() < step / 1000.0);
    }
}
