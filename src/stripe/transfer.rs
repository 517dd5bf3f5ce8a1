//! Conversion between codec sample lines and stripe buffer samples.
//!
//! Integer lines carry level-shifted values at the component's original
//! precision `P`; float lines carry values normalised to [-0.5, 0.5). External
//! samples have their own precision `p` and signedness. Going to a lower
//! precision rounds half up, results are clipped to the target range, and
//! unsigned external samples carry a bias of `2^(p-1)` (0.5 for floats).

use super::{BufferKind, StorePreference, StripeBufMut, StripeBufRef};
use crate::codestream::LineBuf;
use crate::error::{Result, StripeError};

/// Sample format of one tile-component in the stripe buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SampleFormat {
    pub kind: BufferKind,
    pub original_precision: u8,
    pub precision: u8,
    pub signed: bool,
}

impl SampleFormat {
    pub fn new(kind: BufferKind, original_precision: u8, precision: u8, signed: bool) -> Result<Self> {
        if precision == 0 || original_precision == 0 {
            return Err(StripeError::InvalidArgument);
        }
        if precision > kind.max_precision() || (kind == BufferKind::Byte && original_precision > 8) {
            return Err(StripeError::PrecisionMismatch);
        }
        Ok(Self {
            kind,
            original_precision,
            precision,
            signed,
        })
    }

    fn to_external(&self) -> ToExternal {
        ToExternal::new(self.original_precision, self.precision, self.signed)
    }

    fn from_external(&self) -> FromExternal {
        FromExternal::new(self.precision, self.original_precision, self.signed)
    }

    fn float_bias(&self) -> f32 {
        if self.signed { 0.0 } else { 0.5 }
    }
}

fn range(precision: u8) -> (i64, i64) {
    let half = 1i64 << (precision - 1);
    (-half, half - 1)
}

/// Maps an integer line sample onto an external integer sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToExternal {
    down_shift: u32,
    up_shift: u32,
    min: i64,
    max: i64,
    offset: i64,
}

impl ToExternal {
    fn new(from: u8, to: u8, signed: bool) -> Self {
        let (min, max) = range(to);
        Self {
            down_shift: from.saturating_sub(to) as u32,
            up_shift: to.saturating_sub(from) as u32,
            min,
            max,
            offset: if signed { 0 } else { 1i64 << (to - 1) },
        }
    }

    #[inline]
    pub fn apply(self, v: i32) -> i64 {
        let v = v as i64;
        let x = if self.down_shift > 0 {
            (v + (1 << (self.down_shift - 1))) >> self.down_shift
        } else {
            v << self.up_shift
        };
        x.clamp(self.min, self.max) + self.offset
    }
}

/// Maps an external integer sample onto an integer line sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FromExternal {
    down_shift: u32,
    up_shift: u32,
    min: i64,
    max: i64,
    offset: i64,
    signed: bool,
}

impl FromExternal {
    fn new(from: u8, to: u8, signed: bool) -> Self {
        let (min, max) = range(to);
        Self {
            down_shift: from.saturating_sub(to) as u32,
            up_shift: to.saturating_sub(from) as u32,
            min,
            max,
            offset: if signed { 0 } else { 1i64 << (from - 1) },
            signed,
        }
    }

    pub fn signed(self) -> bool {
        self.signed
    }

    #[inline]
    pub fn apply(self, raw: i64) -> i32 {
        let x = raw - self.offset;
        let v = if self.down_shift > 0 {
            (x + (1 << (self.down_shift - 1))) >> self.down_shift
        } else {
            x << self.up_shift
        };
        v.clamp(self.min, self.max) as i32
    }
}

/// Integer sample types a stripe buffer can hold.
pub(crate) trait ExternalSample: Copy {
    /// Reads the stored value; unsigned samples are held as bit patterns.
    fn to_raw(self, signed: bool) -> i64;
    fn from_raw(v: i64) -> Self;
}

impl ExternalSample for u8 {
    #[inline]
    fn to_raw(self, signed: bool) -> i64 {
        if signed { self as i8 as i64 } else { self as i64 }
    }

    #[inline]
    fn from_raw(v: i64) -> Self {
        v as u8
    }
}

impl ExternalSample for i16 {
    #[inline]
    fn to_raw(self, signed: bool) -> i64 {
        if signed { self as i64 } else { self as u16 as i64 }
    }

    #[inline]
    fn from_raw(v: i64) -> Self {
        v as i16
    }
}

impl ExternalSample for i32 {
    #[inline]
    fn to_raw(self, signed: bool) -> i64 {
        if signed { self as i64 } else { self as u32 as i64 }
    }

    #[inline]
    fn from_raw(v: i64) -> Self {
        v as i32
    }
}

/// Strategy for the contiguous integer transfers that dominate stripe I/O.
///
/// Every implementation must produce exactly the values of [`ScalarKernel`].
pub trait TransferKernel: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn ints_to_bytes(&self, src: &[i32], dst: &mut [u8], map: ToExternal, store: StorePreference);

    fn ints_to_words(&self, src: &[i32], dst: &mut [i16], map: ToExternal, store: StorePreference);

    fn bytes_to_ints(&self, src: &[u8], dst: &mut [i32], map: FromExternal, store: StorePreference);

    fn words_to_ints(&self, src: &[i16], dst: &mut [i32], map: FromExternal, store: StorePreference);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarKernel;

impl TransferKernel for ScalarKernel {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn ints_to_bytes(&self, src: &[i32], dst: &mut [u8], map: ToExternal, _store: StorePreference) {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = u8::from_raw(map.apply(s));
        }
    }

    fn ints_to_words(&self, src: &[i32], dst: &mut [i16], map: ToExternal, _store: StorePreference) {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = i16::from_raw(map.apply(s));
        }
    }

    fn bytes_to_ints(&self, src: &[u8], dst: &mut [i32], map: FromExternal, _store: StorePreference) {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = map.apply(s.to_raw(map.signed()));
        }
    }

    fn words_to_ints(&self, src: &[i16], dst: &mut [i32], map: FromExternal, _store: StorePreference) {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = map.apply(s.to_raw(map.signed()));
        }
    }
}

const LANES: usize = 8;

/// Processes fixed-width lanes the compiler can map onto SSE2 or NEON registers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaneKernel;

impl LaneKernel {
    #[inline]
    fn to_external<T: ExternalSample>(src: &[i32], dst: &mut [T], map: ToExternal) {
        let mut s_chunks = src.chunks_exact(LANES);
        let mut d_chunks = dst.chunks_exact_mut(LANES);
        for (s, d) in (&mut s_chunks).zip(&mut d_chunks) {
            let mut lane = [0i64; LANES];
            for i in 0..LANES {
                lane[i] = map.apply(s[i]);
            }
            for i in 0..LANES {
                d[i] = T::from_raw(lane[i]);
            }
        }
        for (d, &s) in d_chunks.into_remainder().iter_mut().zip(s_chunks.remainder()) {
            *d = T::from_raw(map.apply(s));
        }
    }

    #[inline]
    fn from_external<T: ExternalSample>(src: &[T], dst: &mut [i32], map: FromExternal) {
        let signed = map.signed();
        let mut s_chunks = src.chunks_exact(LANES);
        let mut d_chunks = dst.chunks_exact_mut(LANES);
        for (s, d) in (&mut s_chunks).zip(&mut d_chunks) {
            let mut lane = [0i64; LANES];
            for i in 0..LANES {
                lane[i] = s[i].to_raw(signed);
            }
            for i in 0..LANES {
                d[i] = map.apply(lane[i]);
            }
        }
        for (d, &s) in d_chunks.into_remainder().iter_mut().zip(s_chunks.remainder()) {
            *d = map.apply(s.to_raw(signed));
        }
    }
}

impl TransferKernel for LaneKernel {
    fn name(&self) -> &'static str {
        "lanes"
    }

    fn ints_to_bytes(&self, src: &[i32], dst: &mut [u8], map: ToExternal, _store: StorePreference) {
        Self::to_external(src, dst, map);
    }

    fn ints_to_words(&self, src: &[i32], dst: &mut [i16], map: ToExternal, _store: StorePreference) {
        Self::to_external(src, dst, map);
    }

    fn bytes_to_ints(&self, src: &[u8], dst: &mut [i32], map: FromExternal, _store: StorePreference) {
        Self::from_external(src, dst, map);
    }

    fn words_to_ints(&self, src: &[i16], dst: &mut [i32], map: FromExternal, _store: StorePreference) {
        Self::from_external(src, dst, map);
    }
}

/// Kernel selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acceleration {
    /// Lanes when the CPU reports SSE2 or NEON, scalar otherwise.
    #[default]
    Auto,
    ScalarOnly,
    /// Lanes regardless of what the CPU reports.
    Lanes,
}

static SCALAR_KERNEL: ScalarKernel = ScalarKernel;
static LANE_KERNEL: LaneKernel = LaneKernel;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn lanes_available() -> bool {
    std::is_x86_feature_detected!("sse2")
}

#[cfg(target_arch = "aarch64")]
fn lanes_available() -> bool {
    std::arch::is_aarch64_feature_detected!("neon")
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
fn lanes_available() -> bool {
    false
}

pub fn select_kernel(acceleration: Acceleration) -> &'static dyn TransferKernel {
    match acceleration {
        Acceleration::ScalarOnly => &SCALAR_KERNEL,
        Acceleration::Lanes => &LANE_KERNEL,
        Acceleration::Auto if lanes_available() => &LANE_KERNEL,
        Acceleration::Auto => &SCALAR_KERNEL,
    }
}

/// Placement of one line in the stripe buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LinePlacement {
    pub start: usize,
    pub gap: usize,
    pub width: usize,
    /// Columns to fill (by replicating the last sample) up to, when larger than `width`.
    pub pad_to: usize,
}

impl LinePlacement {
    fn index(&self, column: usize) -> usize {
        self.start + column * self.gap
    }

    fn contiguous(&self) -> bool {
        self.gap == 1
    }
}

fn replicate<T: Copy>(dst: &mut [T], at: &LinePlacement) {
    if at.width == 0 || at.pad_to <= at.width {
        return;
    }
    let last = dst[at.index(at.width - 1)];
    for col in at.width..at.pad_to {
        dst[at.index(col)] = last;
    }
}

fn ints_to_strided<T: ExternalSample>(src: &[i32], dst: &mut [T], at: &LinePlacement, map: ToExternal) {
    for (col, &s) in src[..at.width].iter().enumerate() {
        dst[at.index(col)] = T::from_raw(map.apply(s));
    }
}

fn floats_to_ints<T: ExternalSample>(src: &[f32], dst: &mut [T], at: &LinePlacement, fmt: &SampleFormat) {
    let scale = (1u64 << fmt.precision) as f32;
    let (min, max) = range(fmt.precision);
    let offset = if fmt.signed { 0 } else { 1i64 << (fmt.precision - 1) };
    for (col, &s) in src[..at.width].iter().enumerate() {
        let x = ((s * scale + 0.5).floor() as i64).clamp(min, max) + offset;
        dst[at.index(col)] = T::from_raw(x);
    }
}

fn strided_to_ints<T: ExternalSample>(src: &[T], dst: &mut [i32], at: &LinePlacement, map: FromExternal) {
    for (col, d) in dst[..at.width].iter_mut().enumerate() {
        *d = map.apply(src[at.index(col)].to_raw(map.signed()));
    }
}

fn ints_to_floats<T: ExternalSample>(src: &[T], dst: &mut [f32], at: &LinePlacement, fmt: &SampleFormat) {
    let scale = 1.0 / (1u64 << fmt.precision) as f32;
    let offset = if fmt.signed { 0 } else { 1i64 << (fmt.precision - 1) };
    for (col, d) in dst[..at.width].iter_mut().enumerate() {
        *d = (src[at.index(col)].to_raw(fmt.signed) - offset) as f32 * scale;
    }
}

/// Writes one decoded line into the stripe buffer.
pub(crate) fn write_line(
    line: &LineBuf,
    buf: &mut StripeBufMut<'_>,
    fmt: &SampleFormat,
    at: &LinePlacement,
    kernel: &dyn TransferKernel,
    store: StorePreference,
) -> Result<()> {
    if line.len() < at.width {
        return Err(StripeError::InvalidState);
    }
    debug_assert_eq!(fmt.kind, buf.kind());
    let map = fmt.to_external();
    let span = at.start..at.start + at.width;
    match (line, buf) {
        (LineBuf::Int(src), StripeBufMut::Byte(dst)) => {
            if at.contiguous() {
                kernel.ints_to_bytes(&src[..at.width], &mut dst[span], map, store);
            } else {
                ints_to_strided(src, dst, at, map);
            }
            replicate(dst, at);
        }
        (LineBuf::Int(src), StripeBufMut::Int16(dst)) => {
            if at.contiguous() {
                kernel.ints_to_words(&src[..at.width], &mut dst[span], map, store);
            } else {
                ints_to_strided(src, dst, at, map);
            }
            replicate(dst, at);
        }
        (LineBuf::Int(src), StripeBufMut::Int32(dst)) => {
            ints_to_strided(src, dst, at, map);
            replicate(dst, at);
        }
        (LineBuf::Int(src), StripeBufMut::Float32(dst)) => {
            let scale = 1.0 / (1u64 << fmt.original_precision) as f32;
            let bias = fmt.float_bias();
            for (col, &s) in src[..at.width].iter().enumerate() {
                dst[at.index(col)] = s as f32 * scale + bias;
            }
            replicate(dst, at);
        }
        (LineBuf::Float(src), StripeBufMut::Byte(dst)) => {
            floats_to_ints(src, dst, at, fmt);
            replicate(dst, at);
        }
        (LineBuf::Float(src), StripeBufMut::Int16(dst)) => {
            floats_to_ints(src, dst, at, fmt);
            replicate(dst, at);
        }
        (LineBuf::Float(src), StripeBufMut::Int32(dst)) => {
            floats_to_ints(src, dst, at, fmt);
            replicate(dst, at);
        }
        (LineBuf::Float(src), StripeBufMut::Float32(dst)) => {
            let bias = fmt.float_bias();
            for (col, &s) in src[..at.width].iter().enumerate() {
                dst[at.index(col)] = s + bias;
            }
            replicate(dst, at);
        }
    }
    Ok(())
}

/// Reads one line from the stripe buffer for encoding.
pub(crate) fn read_line(
    buf: &StripeBufRef<'_>,
    line: &mut LineBuf,
    fmt: &SampleFormat,
    at: &LinePlacement,
    kernel: &dyn TransferKernel,
    store: StorePreference,
) -> Result<()> {
    if line.len() < at.width {
        return Err(StripeError::InvalidState);
    }
    debug_assert_eq!(fmt.kind, buf.kind());
    let map = fmt.from_external();
    let span = at.start..at.start + at.width;
    match (buf, line) {
        (StripeBufRef::Byte(src), LineBuf::Int(dst)) => {
            if at.contiguous() {
                kernel.bytes_to_ints(&src[span], &mut dst[..at.width], map, store);
            } else {
                strided_to_ints(src, dst, at, map);
            }
        }
        (StripeBufRef::Int16(src), LineBuf::Int(dst)) => {
            if at.contiguous() {
                kernel.words_to_ints(&src[span], &mut dst[..at.width], map, store);
            } else {
                strided_to_ints(src, dst, at, map);
            }
        }
        (StripeBufRef::Int32(src), LineBuf::Int(dst)) => strided_to_ints(src, dst, at, map),
        (StripeBufRef::Float32(src), LineBuf::Int(dst)) => {
            let scale = (1u64 << fmt.original_precision) as f32;
            let (min, max) = range(fmt.original_precision);
            let bias = fmt.float_bias();
            for (col, d) in dst[..at.width].iter_mut().enumerate() {
                let v = (src[at.index(col)] - bias) * scale;
                *d = ((v + 0.5).floor() as i64).clamp(min, max) as i32;
            }
        }
        (StripeBufRef::Byte(src), LineBuf::Float(dst)) => ints_to_floats(src, dst, at, fmt),
        (StripeBufRef::Int16(src), LineBuf::Float(dst)) => ints_to_floats(src, dst, at, fmt),
        (StripeBufRef::Int32(src), LineBuf::Float(dst)) => ints_to_floats(src, dst, at, fmt),
        (StripeBufRef::Float32(src), LineBuf::Float(dst)) => {
            let bias = fmt.float_bias();
            for (col, d) in dst[..at.width].iter_mut().enumerate() {
                *d = src[at.index(col)] - bias;
            }
        }
    }
    Ok(())
}
