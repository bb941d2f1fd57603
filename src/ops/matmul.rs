/// Quantized matrix-vector multiply kernel.
///
/// Architecture:
/// - Kernel dispatch is exhaustive pattern matching over `(WeightView, ActivationView)`
///   pairs (F32 x F32, F16 x F32, Q40 x Q80); there is no runtime "unknown encoding"
///   branch to fall into, since the tagged-variant types rule it out at compile time.
/// - `compute` is pure: it reads `input`/`weights` and writes the rows `[ds, de)` of
///   `output` it was handed. It never touches threads or sockets; the thread pool
///   (`crate::pool`) owns the unsafe plumbing needed to let several threads write
///   disjoint ranges of one output buffer concurrently and hands this function an
///   already-disjoint `&mut [f32]` slice.
///
/// Matrix layout: weights are row-major, D rows x N columns; `output[d - ds]`
/// holds the inner product of weight row `d` against the full input vector.
use crate::core::types::{ActivationView, FloatType, WeightView};
use crate::ops::cpu_features::CpuFeatures;
use crate::quant::f16::f16_to_f32;
use crate::quant::{q40, q80};

/// Fill `output[0..de-ds]` with the inner products of weight rows `[ds, de)`
/// against `input`. `weights` is the *full* D-row matrix; `output` must
/// already be narrowed to exactly `de - ds` elements by the caller.
///
/// # Panics
/// Panics if dimensions are misaligned or the weight/activation encodings
/// aren't a supported pair — these are programmer errors per the engine's
/// error design, not recoverable conditions.
pub fn compute(
    weights: WeightView,
    input: ActivationView,
    n: usize,
    ds: usize,
    de: usize,
    output: &mut [f32],
    cpu: &CpuFeatures,
) {
    assert!(ds < de, "empty or inverted row range [{ds}, {de})");
    assert_eq!(output.len(), de - ds, "output slice must match [ds, de) width");

    match (weights, input) {
        (WeightView::F32(w), ActivationView::F32(x)) => matmul_f32(w, x, n, ds, de, output, cpu),
        (WeightView::F16(w), ActivationView::F32(x)) => matmul_f16(w, x, n, ds, de, output),
        (WeightView::Q40(w), ActivationView::Q80(x)) => matmul_q40(w, x, n, ds, de, output),
        (w, x) => panic!(
            "unsupported encoding pair: weights={:?}, activation={:?}",
            w.float_type(),
            x.float_type()
        ),
    }
}

fn matmul_f32(w: &[f32], x: &[f32], n: usize, ds: usize, de: usize, output: &mut [f32], cpu: &CpuFeatures) {
    assert_eq!(x.len(), n);
    assert_eq!(w.len() % n, 0, "weight matrix length must be a multiple of N");

    for d in ds..de {
        let row = &w[d * n..(d + 1) * n];
        output[d - ds] = dot_f32(row, x, cpu);
    }
}

fn dot_f32(row: &[f32], x: &[f32], cpu: &CpuFeatures) -> f32 {
    #[cfg(target_arch = "aarch64")]
    {
        if cpu.neon && row.len() % 4 == 0 {
            // Safety: both slices have the same length, checked by the caller,
            // and we only read 4-lane chunks that stay in bounds.
            return unsafe { dot_f32_neon(row, x) };
        }
    }
    let _ = cpu;
    row.iter().zip(x.iter()).map(|(&w, &x)| w * x).sum()
}

#[cfg(target_arch = "aarch64")]
unsafe fn dot_f32_neon(row: &[f32], x: &[f32]) -> f32 {
    use std::arch::aarch64::*;
    unsafe {
        let mut acc = vmovq_n_f32(0.0);
        let mut j = 0;
        while j < row.len() {
            let w = vld1q_f32(row.as_ptr().add(j));
            let v = vld1q_f32(x.as_ptr().add(j));
            acc = vfmaq_f32(acc, w, v);
            j += 4;
        }
        vaddvq_f32(acc)
    }
}

fn matmul_f16(w: &[u16], x: &[f32], n: usize, ds: usize, de: usize, output: &mut [f32]) {
    assert_eq!(x.len(), n);
    assert_eq!(w.len() % n, 0, "weight matrix length must be a multiple of N");

    for d in ds..de {
        let row = &w[d * n..(d + 1) * n];
        let mut val = 0.0f32;
        for (&wi, &xi) in row.iter().zip(x.iter()) {
            val += f16_to_f32(wi) * xi;
        }
        output[d - ds] = val;
    }
}

fn matmul_q40(
    w: &[crate::core::types::BlockQ40],
    x: &[crate::core::types::BlockQ80],
    n: usize,
    ds: usize,
    de: usize,
    output: &mut [f32],
) {
    use crate::core::types::QK40;
    assert_eq!(n % QK40, 0, "Q40 N must be a multiple of QK40");
    let blocks_per_row = n / QK40;
    assert_eq!(x.len(), blocks_per_row, "activation block count must match N/QK40");
    assert_eq!(w.len() % blocks_per_row, 0, "weight block count must be a multiple of N/QK40");

    for d in ds..de {
        let row = &w[d * blocks_per_row..(d + 1) * blocks_per_row];
        let mut val = 0.0f32;
        for (wb, xb) in row.iter().zip(x.iter()) {
            let wf = q40::dequantize_block(wb);
            let xf = q80::dequantize_block(xb);
            for i in 0..wf.len() {
                val += wf[i] * xf[i];
            }
        }
        output[d - ds] = val;
    }
}

/// Helper for callers that want a single-shot, unsharded, unthreaded multiply
/// over the whole `[0, d)` range — used by tests and by `crate::shard` to
/// establish ground truth without going through the thread pool.
pub fn compute_full(
    weights: WeightView,
    input: ActivationView,
    n: usize,
    d: usize,
    output: &mut [f32],
    cpu: &CpuFeatures,
) {
    compute(weights, input, n, 0, d, output, cpu);
}

pub fn float_type_of(weights: &WeightView) -> FloatType {
    weights.float_type()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BlockQ40, BlockQ80, QK40};
    use crate::quant::f16::f32_to_f16;

    fn cpu() -> CpuFeatures {
        CpuFeatures::detect()
    }

    #[test]
    fn scenario_1_f32_four_rows_two_threads_worth() {
        // N=8, D=4, input = [1..8], weights rows = [all 1s, [1,-1]x4, zeros, [1,0,...,0]]
        let input: Vec<f32> = (1..=8).map(|i| i as f32).collect();
        let mut weights = Vec::new();
        weights.extend(std::iter::repeat(1.0).take(8));
        weights.extend([1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0]);
        weights.extend(std::iter::repeat(0.0).take(8));
        weights.extend([1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let mut output = vec![0.0; 4];
        compute_full(
            WeightView::F32(&weights),
            ActivationView::F32(&input),
            8,
            4,
            &mut output,
            &cpu(),
        );
        assert_eq!(output, vec![36.0, -4.0, 0.0, 1.0]);
    }

    #[test]
    fn scenario_2_f16_matches_f32_within_tolerance() {
        let input: Vec<f32> = (1..=8).map(|i| i as f32).collect();
        let mut weights_f32 = Vec::new();
        weights_f32.extend(std::iter::repeat(1.0).take(8));
        weights_f32.extend([1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0]);
        weights_f32.extend(std::iter::repeat(0.0).take(8));
        weights_f32.extend([1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let weights_f16: Vec<u16> = weights_f32.iter().map(|&x| f32_to_f16(x)).collect();

        let mut output = vec![0.0; 4];
        compute_full(
            WeightView::F16(&weights_f16),
            ActivationView::F32(&input),
            8,
            4,
            &mut output,
            &cpu(),
        );
        let expected = [36.0, -4.0, 0.0, 1.0];
        for (got, want) in output.iter().zip(expected.iter()) {
            let rel = if *want == 0.0 { got.abs() } else { (got - want).abs() / want.abs() };
            assert!(rel < 1e-3, "{got} vs {want}");
        }
    }

    #[test]
    fn scenario_3_q40_nibble_eight_cancels_to_zero() {
        let block = BlockQ40 {
            d: f32_to_f16(0.1),
            qs: [0x88; QK40 / 2],
        };
        let weights = vec![block, block];
        let input = q80::quantize_row(&vec![1.0f32; QK40]);

        let mut output = vec![0.0; 2];
        compute_full(
            WeightView::Q40(&weights),
            ActivationView::Q80(&input),
            QK40,
            2,
            &mut output,
            &cpu(),
        );
        assert_eq!(output, vec![0.0, 0.0]);
    }

    #[test]
    fn zero_weight_row_yields_zero_output() {
        let n = 8;
        let weights = vec![0.0f32; n];
        let input: Vec<f32> = (0..n).map(|i| i as f32 + 1.0).collect();
        let mut output = vec![f32::NAN; 1];
        compute_full(WeightView::F32(&weights), ActivationView::F32(&input), n, 1, &mut output, &cpu());
        assert_eq!(output[0], 0.0);
    }

    #[test]
    fn n_equals_four_simd_boundary() {
        let weights = vec![1.0, 2.0, 3.0, 4.0];
        let input = vec![1.0, 1.0, 1.0, 1.0];
        let mut output = vec![0.0; 1];
        compute_full(WeightView::F32(&weights), ActivationView::F32(&input), 4, 1, &mut output, &cpu());
        assert_eq!(output[0], 10.0);
    }

    #[test]
    fn single_block_q40_n_equals_qk40() {
        let block = BlockQ40 {
            d: f32_to_f16(1.0),
            qs: {
                let mut qs = [0u8; QK40 / 2];
                qs[0] = 0x0F; // low nibble 15 -> +7, high nibble 0 -> -8
                qs
            },
        };
        let input_f32 = {
            let mut v = vec![0.0f32; QK40];
            v[0] = 1.0;
            v[16] = 1.0;
            v
        };
        let input = q80::quantize_row(&input_f32);
        let mut output = vec![0.0; 1];
        compute_full(WeightView::Q40(&[block]), ActivationView::Q80(&input), QK40, 1, &mut output, &cpu());
        assert!((output[0] - (7.0 - 8.0)).abs() < 1e-2);
    }

    #[test]
    fn single_thread_and_multi_thread_partition_agree() {
        let n = 16;
        let d = 8;
        let weights: Vec<f32> = (0..n * d).map(|i| (i % 7) as f32 - 3.0).collect();
        let input: Vec<f32> = (0..n).map(|i| (i as f32) * 0.25 - 1.0).collect();

        let mut whole = vec![0.0; d];
        compute_full(WeightView::F32(&weights), ActivationView::F32(&input), n, d, &mut whole, &cpu());

        // Simulate a 4-thread partition: each thread gets a disjoint [ds, de) slice.
        let t = 4;
        let mut partitioned = vec![0.0; d];
        for i in 0..t {
            let ds = i * d / t;
            let de = (i + 1) * d / t;
            let mut slice = vec![0.0; de - ds];
            compute(
                WeightView::F32(&weights),
                ActivationView::F32(&input),
                n,
                ds,
                de,
                &mut slice,
                &cpu(),
            );
            partitioned[ds..de].copy_from_slice(&slice);
        }
        assert_eq!(whole, partitioned);
    }
}
