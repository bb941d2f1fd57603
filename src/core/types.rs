//! Numeric encodings and tensor views shared across the kernel, shard planner and RPC layer.

/// Elements per quantization block, shared by the 4-bit weight format and the
/// 8-bit activation format it is multiplied against.
pub const QK40: usize = 32;
pub const QK80: usize = 32;

/// Numeric encoding tag for a weight matrix or an activation vector.
///
/// `Q80` never tags a weight matrix on the wire (weights are only ever F32,
/// F16 or Q40) but the engine produces it internally as the activation
/// counterpart to `Q40` weights, so it lives in the same tag set the source
/// used for `FloatType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatType {
    F32,
    F16,
    Q40,
    Q80,
}

impl FloatType {
    /// Bytes of one row of `n` elements in this encoding. Only meaningful for
    /// weight encodings (F32, F16, Q40); `n` must already be block-aligned
    /// for Q40.
    pub fn row_stride_bytes(self, n: usize) -> usize {
        match self {
            FloatType::F32 => n * 4,
            FloatType::F16 => n * 2,
            FloatType::Q40 => {
                debug_assert_eq!(n % QK40, 0, "Q40 row width must be a multiple of QK40");
                (n / QK40) * std::mem::size_of::<BlockQ40>()
            }
            FloatType::Q80 => {
                debug_assert_eq!(n % QK80, 0, "Q80 row width must be a multiple of QK80");
                (n / QK80) * std::mem::size_of::<BlockQ80>()
            }
        }
    }
}

/// One block of 4-bit quantized weights: a shared `f16` scale and 32 packed
/// nibbles (two elements per byte). Low nibbles cover elements `0..16`, high
/// nibbles cover elements `16..32`; dequantized value is `(nibble - 8) * d`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BlockQ40 {
    pub d: u16,
    pub qs: [u8; QK40 / 2],
}

const _: () = assert!(std::mem::size_of::<BlockQ40>() == 18);

/// One block of 8-bit quantized activations: a shared `f16` scale and 32
/// signed bytes; dequantized value is `qs[i] * d`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BlockQ80 {
    pub d: u16,
    pub qs: [i8; QK80],
}

const _: () = assert!(std::mem::size_of::<BlockQ80>() == 34);

/// A read-only view over one weight matrix, tagged by encoding. Replaces the
/// source's untyped pointer-plus-enum convention: dispatch on this type is
/// exhaustive pattern matching rather than a raw pointer reinterpreted by a
/// side-channel tag.
#[derive(Debug, Clone, Copy)]
pub enum WeightView<'a> {
    F32(&'a [f32]),
    /// Raw IEEE-754 binary16 bit patterns, row-major.
    F16(&'a [u16]),
    Q40(&'a [BlockQ40]),
}

impl<'a> WeightView<'a> {
    pub fn float_type(&self) -> FloatType {
        match self {
            WeightView::F32(_) => FloatType::F32,
            WeightView::F16(_) => FloatType::F16,
            WeightView::Q40(_) => FloatType::Q40,
        }
    }
}

/// A read-only view over an activation vector, tagged by encoding.
#[derive(Debug, Clone, Copy)]
pub enum ActivationView<'a> {
    F32(&'a [f32]),
    Q80(&'a [BlockQ80]),
}

impl<'a> ActivationView<'a> {
    pub fn float_type(&self) -> FloatType {
        match self {
            ActivationView::F32(_) => FloatType::F32,
            ActivationView::Q80(_) => FloatType::Q80,
        }
    }
}
