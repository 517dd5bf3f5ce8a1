//! Lifting wavelet transforms for the reference codestream.
//!
//! Both filters follow the JPEG 2000 convention of deciding low/high pass by the
//! parity of the *absolute* coordinate, so that a tile starting on an odd grid
//! position produces the same sub-band sizes as the reference-grid formulas.
//! Multi-level transforms use the Mallat layout in place: after each level the
//! low band occupies the top-left corner of the working region.

use super::geometry::Rect;

/// One-dimensional lifting filter.
pub trait Wavelet {
    type Sample: Copy + Default;

    /// Transforms `line` in place, leaving low-pass coefficients first and
    /// high-pass coefficients after them. `odd_start` is the parity of the
    /// absolute coordinate of `line[0]`.
    fn forward(line: &mut [Self::Sample], odd_start: bool);

    fn inverse(line: &mut [Self::Sample], odd_start: bool);
}

/// Reversible 5/3 integer transform.
pub struct Dwt53;

/// Irreversible 9/7 floating point transform.
pub struct Dwt97;

#[inline]
fn is_high(i: usize, odd_start: bool) -> bool {
    (i % 2 == 1) != odd_start
}

// Whole-sample symmetric extension, valid for n >= 2.
#[inline]
fn neighbours<T: Copy>(x: &[T], i: usize) -> (T, T) {
    let n = x.len();
    let left = if i == 0 { x[1] } else { x[i - 1] };
    let right = if i + 1 == n { x[n - 2] } else { x[i + 1] };
    (left, right)
}

fn low_count(n: usize, odd_start: bool) -> usize {
    if odd_start { n / 2 } else { n.div_ceil(2) }
}

fn deinterleave<T: Copy + Default>(x: &mut [T], odd_start: bool) {
    let tmp = x.to_vec();
    let lows = low_count(x.len(), odd_start);
    let (mut l, mut h) = (0, lows);
    for (i, &v) in tmp.iter().enumerate() {
        if is_high(i, odd_start) {
            x[h] = v;
            h += 1;
        } else {
            x[l] = v;
            l += 1;
        }
    }
}

fn interleave<T: Copy + Default>(x: &mut [T], odd_start: bool) {
    let tmp = x.to_vec();
    let lows = low_count(x.len(), odd_start);
    let (mut l, mut h) = (0, lows);
    for (i, v) in x.iter_mut().enumerate() {
        if is_high(i, odd_start) {
            *v = tmp[h];
            h += 1;
        } else {
            *v = tmp[l];
            l += 1;
        }
    }
}

impl Wavelet for Dwt53 {
    type Sample = i32;

    fn forward(x: &mut [i32], odd_start: bool) {
        match x.len() {
            0 => return,
            1 => {
                if odd_start {
                    x[0] *= 2;
                }
                return;
            }
            _ => {}
        }
        // Predict: y[2n+1] = x[2n+1] - floor((x[2n] + x[2n+2]) / 2)
        for i in (0..x.len()).filter(|&i| is_high(i, odd_start)) {
            let (l, r) = neighbours(x, i);
            x[i] -= (l + r) >> 1;
        }
        // Update: y[2n] = x[2n] + floor((y[2n-1] + y[2n+1] + 2) / 4)
        for i in (0..x.len()).filter(|&i| !is_high(i, odd_start)) {
            let (l, r) = neighbours(x, i);
            x[i] += (l + r + 2) >> 2;
        }
        deinterleave(x, odd_start);
    }

    fn inverse(x: &mut [i32], odd_start: bool) {
        match x.len() {
            0 => return,
            1 => {
                if odd_start {
                    x[0] /= 2;
                }
                return;
            }
            _ => {}
        }
        interleave(x, odd_start);
        for i in (0..x.len()).filter(|&i| !is_high(i, odd_start)) {
            let (l, r) = neighbours(x, i);
            x[i] -= (l + r + 2) >> 2;
        }
        for i in (0..x.len()).filter(|&i| is_high(i, odd_start)) {
            let (l, r) = neighbours(x, i);
            x[i] += (l + r) >> 1;
        }
    }
}

impl Dwt97 {
    const ALPHA: f32 = -1.586_134_3;
    const BETA: f32 = -0.052_980_12;
    const GAMMA: f32 = 0.882_911_1;
    const DELTA: f32 = 0.443_506_87;
    const K: f32 = 1.230_174_1;
    const INV_K: f32 = 1.0 / 1.230_174_1;

    fn lift(x: &mut [f32], odd_start: bool, high: bool, coeff: f32) {
        for i in (0..x.len()).filter(|&i| is_high(i, odd_start) == high) {
            let (l, r) = neighbours(x, i);
            x[i] += coeff * (l + r);
        }
    }
}

impl Wavelet for Dwt97 {
    type Sample = f32;

    fn forward(x: &mut [f32], odd_start: bool) {
        match x.len() {
            0 => return,
            1 => {
                if odd_start {
                    x[0] *= 2.0;
                }
                return;
            }
            _ => {}
        }
        Self::lift(x, odd_start, true, Self::ALPHA);
        Self::lift(x, odd_start, false, Self::BETA);
        Self::lift(x, odd_start, true, Self::GAMMA);
        Self::lift(x, odd_start, false, Self::DELTA);
        for (i, v) in x.iter_mut().enumerate() {
            *v *= if is_high(i, odd_start) { Self::K } else { Self::INV_K };
        }
        deinterleave(x, odd_start);
    }

    fn inverse(x: &mut [f32], odd_start: bool) {
        match x.len() {
            0 => return,
            1 => {
                if odd_start {
                    x[0] *= 0.5;
                }
                return;
            }
            _ => {}
        }
        interleave(x, odd_start);
        for (i, v) in x.iter_mut().enumerate() {
            *v *= if is_high(i, odd_start) { Self::INV_K } else { Self::K };
        }
        Self::lift(x, odd_start, false, -Self::DELTA);
        Self::lift(x, odd_start, true, -Self::GAMMA);
        Self::lift(x, odd_start, false, -Self::BETA);
        Self::lift(x, odd_start, true, -Self::ALPHA);
    }
}

fn columns<W: Wavelet>(plane: &mut [W::Sample], stride: usize, region: Rect, inverse: bool) {
    let (w, h) = (region.size.x as usize, region.size.y as usize);
    let odd = region.pos.y % 2 == 1;
    let mut col = vec![W::Sample::default(); h];
    for x in 0..w {
        for (y, v) in col.iter_mut().enumerate() {
            *v = plane[y * stride + x];
        }
        if inverse {
            W::inverse(&mut col, odd);
        } else {
            W::forward(&mut col, odd);
        }
        for (y, v) in col.iter().enumerate() {
            plane[y * stride + x] = *v;
        }
    }
}

fn rows<W: Wavelet>(plane: &mut [W::Sample], stride: usize, region: Rect, inverse: bool) {
    let (w, h) = (region.size.x as usize, region.size.y as usize);
    let odd = region.pos.x % 2 == 1;
    for y in 0..h {
        let row = &mut plane[y * stride..y * stride + w];
        if inverse {
            W::inverse(row, odd);
        } else {
            W::forward(row, odd);
        }
    }
}

/// Applies `levels` forward decompositions to the samples of `region`, stored
/// row-major from `plane[0]` with the given `stride`.
pub fn forward_2d<W: Wavelet>(plane: &mut [W::Sample], stride: usize, region: Rect, levels: u8) {
    for level in 0..levels {
        let r = region.reduced(level);
        if r.is_empty() {
            break;
        }
        rows::<W>(plane, stride, r, false);
        columns::<W>(plane, stride, r, false);
    }
}

/// Undoes decompositions `levels-1` down to `discard`, leaving the image at
/// resolution `discard` (size `region.reduced(discard)`) in the top-left corner.
pub fn inverse_2d<W: Wavelet>(
    plane: &mut [W::Sample],
    stride: usize,
    region: Rect,
    levels: u8,
    discard: u8,
) {
    for level in (discard..levels).rev() {
        let r = region.reduced(level);
        if r.is_empty() {
            continue;
        }
        columns::<W>(plane, stride, r, true);
        rows::<W>(plane, stride, r, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dwt_53_roundtrip() {
        let input = [10, 20, 30, 40, 50, 60, 70, 80];
        let mut x = input;
        Dwt53::forward(&mut x, false);
        Dwt53::inverse(&mut x, false);
        assert_eq!(input, x);
    }

    #[test]
    fn test_dwt_53_odd_length_odd_start() {
        let input = [10, -20, 35, 40, 7];
        let mut x = input;
        Dwt53::forward(&mut x, true);
        // Odd start with five samples leaves two low coefficients.
        Dwt53::inverse(&mut x, true);
        assert_eq!(input, x);
    }

    #[test]
    fn test_dwt_53_single_odd_sample() {
        let mut x = [21];
        Dwt53::forward(&mut x, true);
        assert_eq!(x[0], 42);
        Dwt53::inverse(&mut x, true);
        assert_eq!(x[0], 21);
    }

    #[test]
    fn test_dwt_97_roundtrip() {
        let input = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0];
        let mut x = input;
        Dwt97::forward(&mut x, false);
        Dwt97::inverse(&mut x, false);
        for i in 0..input.len() {
            let diff = (input[i] - x[i]).abs();
            assert!(diff < 1e-3, "Mismatch at {}: {} vs {}", i, input[i], x[i]);
        }
    }

    #[test]
    fn test_dwt_97_constant_low_band() {
        let mut x = [0.25f32; 8];
        Dwt97::forward(&mut x, false);
        for v in &x[..4] {
            assert!((v - 0.25).abs() < 1e-3);
        }
        for v in &x[4..] {
            assert!(v.abs() < 1e-3);
        }
    }

    #[test]
    fn test_2d_roundtrip_odd_region() {
        let region = Rect::new(3, 1, 7, 5);
        let stride = 7;
        let original: Vec<i32> = (0..35).map(|v| (v * 37 % 101) - 50).collect();
        let mut plane = original.clone();
        forward_2d::<Dwt53>(&mut plane, stride, region, 2);
        assert_ne!(plane, original);
        inverse_2d::<Dwt53>(&mut plane, stride, region, 2, 0);
        assert_eq!(plane, original);
    }

    #[test]
    fn test_2d_partial_inverse_yields_low_band() {
        let region = Rect::new(0, 0, 8, 8);
        let mut plane = vec![12i32; 64];
        forward_2d::<Dwt53>(&mut plane, 8, region, 3);
        inverse_2d::<Dwt53>(&mut plane, 8, region, 3, 1);
        let reduced = region.reduced(1);
        for y in 0..reduced.size.y as usize {
            for x in 0..reduced.size.x as usize {
                assert_eq!(plane[y * 8 + x], 12);
            }
        }
    }
}
