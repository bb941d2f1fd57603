//! Q80: 8-bit block-quantized activations, the only encoding fed to Q40
//! weights.

use crate::core::types::{BlockQ80, QK80};
use crate::quant::f16::{f16_to_f32, f32_to_f16};

/// Quantize one row of `N` F32 elements into `N / QK80` blocks. Per block,
/// `d = max(|x_i|) / 127`, `qs_i = round(x_i / d)` clamped to `[-127, 127]`.
/// An all-zero block (`amax == 0`) emits `d = 0` and zero codes.
pub fn quantize_row(input: &[f32]) -> Vec<BlockQ80> {
    debug_assert_eq!(input.len() % QK80, 0, "Q80 input width must be a multiple of QK80");
    input
        .chunks_exact(QK80)
        .map(|chunk| {
            let amax = chunk.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
            if amax == 0.0 {
                return BlockQ80 { d: f32_to_f16(0.0), qs: [0i8; QK80] };
            }
            let d = amax / 127.0;
            let inv_d = 1.0 / d;
            let mut qs = [0i8; QK80];
            for (i, &x) in chunk.iter().enumerate() {
                let q = (x * inv_d).round();
                qs[i] = q.clamp(-127.0, 127.0) as i8;
            }
            BlockQ80 { d: f32_to_f16(d), qs }
        })
        .collect()
}

/// Dequantize one block: `x_i = qs_i * d`.
pub fn dequantize_block(block: &BlockQ80) -> [f32; QK80] {
    let d = f16_to_f32(block.d);
    let mut out = [0.0f32; QK80];
    for (i, &q) in block.qs.iter().enumerate() {
        out[i] = q as f32 * d;
    }
    out
}

/// Dequantize a full row of blocks into `N = blocks.len() * QK80` elements.
/// Used only to establish the round-trip property in tests; the kernel
/// never needs Q80 -> F32 conversion.
pub fn dequantize_row(blocks: &[BlockQ80]) -> Vec<f32> {
    let mut out = Vec::with_capacity(blocks.len() * QK80);
    for block in blocks {
        out.extend_from_slice(&dequantize_block(block));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_row_quantizes_to_zero_scale() {
        let input = vec![0.0f32; QK80];
        let blocks = quantize_row(&input);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].d, 0);
        assert!(blocks[0].qs.iter().all(|&q| q == 0));
    }

    #[test]
    fn saturates_rather_than_wraps() {
        // A lone outlier sets d = amax/127, so every other code is small; but
        // the outlier itself must land exactly at +-127, never overflow i8.
        let mut input = vec![1.0f32; QK80];
        input[0] = 1000.0;
        let blocks = quantize_row(&input);
        assert_eq!(blocks[0].qs[0], 127);
    }

    #[test]
    fn quantize_dequantize_round_trip_is_idempotent() {
        let input: Vec<f32> = (0..QK80 * 2).map(|i| (i as f32 - 32.0) * 0.37).collect();
        let blocks = quantize_row(&input);
        let dequantized = dequantize_row(&blocks);
        let reblocks = quantize_row(&dequantized);
        let redequantized = dequantize_row(&reblocks);
        for (a, b) in dequantized.iter().zip(redequantized.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn typical_row_round_trips_within_tolerance() {
        let input: Vec<f32> = (0..QK80).map(|i| (i as f32 - 16.0) / 4.0).collect();
        let blocks = quantize_row(&input);
        let back = dequantize_row(&blocks);
        for (a, b) in input.iter().zip(back.iter()) {
            let scale = input.iter().fold(0.0f32, |m, &x| m.max(x.abs())) / 127.0;
            assert!((a - b).abs() <= scale + 1e-6, "{a} vs {b}");
        }
    }
}
