//! Q40: 4-bit block-quantized weights. Decode only — weights arrive
//! pre-quantized from the model-loading collaborator, so this crate never
//! needs to produce Q40 blocks, only consume them.

use crate::core::types::{BlockQ40, QK40};
use crate::quant::f16::f16_to_f32;

/// Dequantize one block of 32 elements. Low nibbles (byte & 0x0F) produce
/// elements `0..16`, high nibbles (byte >> 4) produce elements `16..32`;
/// value = `(nibble - 8) * d`.
pub fn dequantize_block(block: &BlockQ40) -> [f32; QK40] {
    let d = f16_to_f32(block.d);
    let mut out = [0.0f32; QK40];
    for (i, &byte) in block.qs.iter().enumerate() {
        let lo = (byte & 0x0F) as i32 - 8;
        let hi = (byte >> 4) as i32 - 8;
        out[i] = lo as f32 * d;
        out[i + QK40 / 2] = hi as f32 * d;
    }
    out
}

/// Dequantize a full row of blocks into `N = blocks.len() * QK40` elements.
pub fn dequantize_row(blocks: &[BlockQ40]) -> Vec<f32> {
    let mut out = Vec::with_capacity(blocks.len() * QK40);
    for block in blocks {
        out.extend_from_slice(&dequantize_block(block));
    }
    out
}
