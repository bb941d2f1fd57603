//! Shard planner: splits one weight matrix's output dimension D into S
//! equal slices and reassembles partial outputs along the same axis.
//!
//! `MatMulSlice` from the source. All arithmetic here is a single
//! contiguous byte or float copy — there is no dequantization, scaling, or
//! reduction; the slices are disjoint output rows.

use crate::core::types::FloatType;

/// Describes one weight matrix's sharding over `slice_count` workers.
#[derive(Debug, Clone, Copy)]
pub struct ShardPlan {
    pub float_type: FloatType,
    pub slice_count: usize,
    /// Rows owned by each slice: `D / slice_count`.
    pub d0: usize,
    pub n: usize,
    /// Bytes of one slice's weight fragment: `d0 * row_stride_bytes(n)`.
    pub bytes_per_slice: usize,
}

impl ShardPlan {
    /// # Panics
    /// Panics if `d` isn't evenly divisible by `slice_count`.
    pub fn new(float_type: FloatType, slice_count: usize, n: usize, d: usize) -> Self {
        assert!(slice_count > 0, "slice_count must be positive");
        assert_eq!(d % slice_count, 0, "D must be evenly divisible by slice_count");
        let d0 = d / slice_count;
        let bytes_per_slice = d0 * float_type.row_stride_bytes(n);
        Self { float_type, slice_count, d0, n, bytes_per_slice }
    }

    fn row_stride_bytes(&self) -> usize {
        self.float_type.row_stride_bytes(self.n)
    }

    fn byte_offset(&self, slice_index: usize) -> usize {
        assert!(slice_index < self.slice_count, "slice_index out of range");
        slice_index * self.d0 * self.row_stride_bytes()
    }

    /// Copy the byte region for `slice_index`'s output rows out of
    /// `src_bytes` (the full D-row weight matrix) into a freshly allocated
    /// buffer of `bytes_per_slice` bytes.
    ///
    /// # Panics
    /// Panics if `src_bytes` is shorter than the region being sliced.
    pub fn split_weights(&self, slice_index: usize, src_bytes: &[u8]) -> Vec<u8> {
        let offset = self.byte_offset(slice_index);
        let region = &src_bytes[offset..offset + self.bytes_per_slice];
        region.to_vec()
    }

    /// Copy `d0` partial-output floats into `full_output[slice_index*d0 ..
    /// (slice_index+1)*d0]`.
    ///
    /// # Panics
    /// Panics if `partial_output` doesn't have exactly `d0` elements.
    pub fn merge_outputs(&self, slice_index: usize, full_output: &mut [f32], partial_output: &[f32]) {
        assert_eq!(partial_output.len(), self.d0, "partial output must have exactly d0 elements");
        assert!(slice_index < self.slice_count, "slice_index out of range");
        let offset = slice_index * self.d0;
        full_output[offset..offset + self.d0].copy_from_slice(partial_output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ActivationView, WeightView};
    use crate::ops::cpu_features::CpuFeatures;
    use crate::ops::matmul;

    #[test]
    fn scenario_4_split_weights_returns_expected_byte_range() {
        // F32, S=4, D=16, N=32 (arbitrary but must divide evenly); row stride = 32*4 = 128 bytes.
        let n = 32;
        let d = 16;
        let s = 4;
        let plan = ShardPlan::new(FloatType::F32, s, n, d);
        let total_bytes = d * plan.row_stride_bytes();
        let src: Vec<u8> = (0..total_bytes).map(|i| (i % 251) as u8).collect();

        let got = plan.split_weights(2, &src);

        let row_stride = n * 4;
        let expected_start = plan.d0 * 2 * row_stride;
        let expected_end = plan.d0 * 3 * row_stride;
        assert_eq!(got, src[expected_start..expected_end]);
    }

    #[test]
    fn concatenated_slices_reproduce_original_bytes() {
        let n = 16;
        let d = 12;
        let s = 3;
        let plan = ShardPlan::new(FloatType::F32, s, n, d);
        let total_bytes = d * plan.row_stride_bytes();
        let src: Vec<u8> = (0..total_bytes).map(|i| (i * 7 % 256) as u8).collect();

        let mut reassembled = Vec::with_capacity(total_bytes);
        for slice_index in 0..s {
            reassembled.extend(plan.split_weights(slice_index, &src));
        }
        assert_eq!(reassembled, src);
    }

    #[test]
    fn q40_row_stride_has_no_subblock_splitting() {
        use crate::core::types::QK40;
        let n = QK40 * 3; // 3 blocks per row
        let plan = ShardPlan::new(FloatType::Q40, 2, n, 4);
        // row = 3 blocks * 18 bytes/block = 54 bytes
        assert_eq!(plan.row_stride_bytes(), 54);
        assert_eq!(plan.bytes_per_slice, plan.d0 * 54);
    }

    #[test]
    fn merge_outputs_reassembles_full_vector() {
        let n = 8;
        let d = 8;
        let s = 4;
        let plan = ShardPlan::new(FloatType::F32, s, n, d);
        let weights: Vec<f32> = (0..n * d).map(|i| ((i % 5) as f32) - 2.0).collect();
        let input: Vec<f32> = (0..n).map(|i| i as f32 * 0.3).collect();

        let mut expected = vec![0.0; d];
        matmul::compute_full(
            WeightView::F32(&weights),
            ActivationView::F32(&input),
            n,
            d,
            &mut expected,
            &CpuFeatures::detect(),
        );

        let weight_bytes: Vec<u8> = weights.iter().flat_map(|w| w.to_le_bytes()).collect();
        let mut merged = vec![0.0; d];
        for slice_index in 0..s {
            let slice_bytes = plan.split_weights(slice_index, &weight_bytes);
            let slice_weights: Vec<f32> = slice_bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                .collect();
            let mut partial = vec![0.0; plan.d0];
            matmul::compute_full(
                WeightView::F32(&slice_weights),
                ActivationView::F32(&input),
                n,
                plan.d0,
                &mut partial,
                &CpuFeatures::detect(),
            );
            plan.merge_outputs(slice_index, &mut merged, &partial);
        }
        assert_eq!(merged, expected);
    }
}
