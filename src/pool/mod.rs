//! Fixed-size thread pool dispatching row ranges of one matmul across T
//! persistent worker threads, synchronized with a per-thread mutex+condvar
//! pair rather than a shared barrier: each worker has its own slot and only
//! ever wakes the dispatcher or gets woken by it, so there is no contention
//! on a single shared wait point the way a barrier would have.
//!
//! Workers are spawned once at construction and park on their own condvar
//! until the dispatcher hands them a task; there is no join path, matching
//! the source's "process exit is the only stop mechanism" lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::core::types::{ActivationView, BlockQ40, BlockQ80, FloatType, WeightView, QK80};
use crate::ops::cpu_features::CpuFeatures;
use crate::ops::matmul;
use crate::quant::q80;

/// Raw, lifetime-erased view of the weight matrix a worker thread reads for
/// one call. Constructed from a `WeightView` that is guaranteed (by `mul`
/// blocking until every thread reports its result) to outlive the task.
#[derive(Clone, Copy)]
enum RawWeights {
    F32(*const f32, usize),
    F16(*const u16, usize),
    Q40(*const BlockQ40, usize),
}

#[derive(Clone, Copy)]
enum RawActivation {
    F32(*const f32, usize),
    Q80(*const BlockQ80, usize),
}

#[derive(Clone, Copy)]
struct Task {
    weights: RawWeights,
    input: RawActivation,
    output: *mut f32,
    n: usize,
    ds: usize,
    de: usize,
    cpu: CpuFeatures,
}

// Safety: a `Task` is only ever read by the one worker thread it was handed
// to, and the dispatcher does not touch the pointed-to memory again until
// that thread has signalled `has_result` (see `mul`'s happens-before
// contract), so there is no concurrent access through these raw pointers.
unsafe impl Send for Task {}

struct Slot {
    mutex: Mutex<SlotState>,
    cond: Condvar,
}

struct SlotState {
    has_task: bool,
    has_result: bool,
    task: Option<Task>,
}

/// `Matmul` from the source: a fixed pool of worker threads, each parked on
/// its own task slot, executing `ops::matmul::compute` on the row range it
/// is assigned.
pub struct ThreadPool {
    slots: Vec<Arc<Slot>>,
    handles: Vec<JoinHandle<()>>,
    busy: AtomicBool,
}

impl ThreadPool {
    pub fn new(n_threads: usize) -> Self {
        assert!(n_threads > 0, "thread pool needs at least one thread");
        let mut slots = Vec::with_capacity(n_threads);
        let mut handles = Vec::with_capacity(n_threads);

        for _ in 0..n_threads {
            let slot = Arc::new(Slot {
                mutex: Mutex::new(SlotState { has_task: false, has_result: false, task: None }),
                cond: Condvar::new(),
            });
            let worker_slot = Arc::clone(&slot);
            let handle = std::thread::spawn(move || worker_loop(worker_slot));
            slots.push(slot);
            handles.push(handle);
        }

        log::debug!("thread pool started with {n_threads} workers");
        Self { slots, handles, busy: AtomicBool::new(false) }
    }

    pub fn thread_count(&self) -> usize {
        self.slots.len()
    }

    /// Dispatch one matrix-vector multiply across the pool: `output[d] =
    /// sum_j weights[d, j] * input[j]` for `d` in `[0, d_dim)`. `input` is
    /// always F32; it is transparently quantized to Q80 scratch first when
    /// `weights` is Q40.
    ///
    /// # Panics
    /// Panics if called re-entrantly on the same pool while a prior `mul`
    /// is still in flight, or if dimensions are inconsistent with
    /// `weights`'s encoding.
    pub fn mul(&self, weights: WeightView, input: &[f32], output: &mut [f32], n: usize, d_dim: usize) {
        if self.busy.swap(true, Ordering::AcqRel) {
            panic!("ThreadPool::mul called re-entrantly; callers must serialize calls on one pool");
        }
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.mul_inner(weights, input, output, n, d_dim)
        }));
        self.busy.store(false, Ordering::Release);
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }

    fn mul_inner(&self, weights: WeightView, input: &[f32], output: &mut [f32], n: usize, d_dim: usize) {
        assert_eq!(input.len(), n, "input length must equal N");
        assert_eq!(output.len(), d_dim, "output length must equal D");
        let t = self.slots.len();
        assert_eq!(d_dim % t, 0, "D must be evenly divisible by the thread count");

        let cpu = CpuFeatures::detect();

        // Q40 weights are multiplied against Q80 activations; quantize the
        // F32 input into scratch that lives for the duration of this call.
        let q80_scratch;
        let raw_input = match weights {
            WeightView::Q40(_) => {
                assert_eq!(n % QK80, 0, "N must be a multiple of QK80 to quantize input for Q40");
                q80_scratch = q80::quantize_row(input);
                RawActivation::Q80(q80_scratch.as_ptr(), q80_scratch.len())
            }
            _ => RawActivation::F32(input.as_ptr(), input.len()),
        };

        let raw_weights = match weights {
            WeightView::F32(w) => RawWeights::F32(w.as_ptr(), w.len()),
            WeightView::F16(w) => RawWeights::F16(w.as_ptr(), w.len()),
            WeightView::Q40(w) => RawWeights::Q40(w.as_ptr(), w.len()),
        };

        let output_ptr = output.as_mut_ptr();

        for i in 0..t {
            let ds = i * d_dim / t;
            let de = (i + 1) * d_dim / t;
            let task = Task {
                weights: raw_weights,
                input: raw_input,
                // Safety: [ds, de) ranges partition [0, d_dim) disjointly,
                // one per thread, so offsetting by `ds` here never aliases
                // another thread's range.
                output: unsafe { output_ptr.add(ds) },
                n,
                ds,
                de,
                cpu,
            };
            let slot = &self.slots[i];
            let mut state = slot.mutex.lock().expect("matmul slot mutex poisoned");
            state.task = Some(task);
            state.has_task = true;
            slot.cond.notify_one();
        }

        for slot in &self.slots {
            let mut state = slot.mutex.lock().expect("matmul slot mutex poisoned");
            while !state.has_result {
                state = slot.cond.wait(state).expect("matmul slot mutex poisoned");
            }
            state.has_result = false;
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // No join path is exercised: workers park forever once their owning
        // pool is dropped. Detaching the handles here just silences the
        // "unused JoinHandle" lint; process exit is what actually reclaims
        // them, matching the source's lifecycle.
        self.handles.clear();
    }
}

fn worker_loop(slot: Arc<Slot>) {
    loop {
        let task = {
            let mut state = slot.mutex.lock().expect("matmul slot mutex poisoned");
            while !state.has_task {
                state = slot.cond.wait(state).expect("matmul slot mutex poisoned");
            }
            state.has_task = false;
            state.task.take().expect("has_task set without a task installed")
        };

        run_task(task);

        let mut state = slot.mutex.lock().expect("matmul slot mutex poisoned");
        state.has_result = true;
        slot.cond.notify_one();
    }
}

fn run_task(task: Task) {
    // Safety: the dispatcher blocks in `mul` until every worker reports
    // `has_result`, so these pointers stay valid for the task's duration
    // and no other thread reads or writes this output range concurrently.
    let weights = unsafe {
        match task.weights {
            RawWeights::F32(p, len) => WeightView::F32(std::slice::from_raw_parts(p, len)),
            RawWeights::F16(p, len) => WeightView::F16(std::slice::from_raw_parts(p, len)),
            RawWeights::Q40(p, len) => WeightView::Q40(std::slice::from_raw_parts(p, len)),
        }
    };
    let input = unsafe {
        match task.input {
            RawActivation::F32(p, len) => ActivationView::F32(std::slice::from_raw_parts(p, len)),
            RawActivation::Q80(p, len) => ActivationView::Q80(std::slice::from_raw_parts(p, len)),
        }
    };
    let output = unsafe { std::slice::from_raw_parts_mut(task.output, task.de - task.ds) };

    match weights.float_type() {
        FloatType::F32 | FloatType::F16 | FloatType::Q40 => {}
        FloatType::Q80 => unreachable!("Q80 never tags a weight matrix"),
    }

    matmul::compute(weights, input, task.n, task.ds, task.de, output, &task.cpu);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(weights: &[f32], input: &[f32], n: usize, d: usize) -> Vec<f32> {
        let mut out = vec![0.0; d];
        matmul::compute_full(
            WeightView::F32(weights),
            ActivationView::F32(input),
            n,
            d,
            &mut out,
            &CpuFeatures::detect(),
        );
        out
    }

    #[test]
    fn single_thread_and_multi_thread_pools_agree() {
        let n = 16;
        let d = 16;
        let weights: Vec<f32> = (0..n * d).map(|i| ((i * 37) % 13) as f32 - 6.0).collect();
        let input: Vec<f32> = (0..n).map(|i| (i as f32) * 0.5 - 2.0).collect();
        let expected = reference(&weights, &input, n, d);

        for threads in [1usize, 2, 4, 8, 16] {
            let pool = ThreadPool::new(threads);
            let mut output = vec![0.0; d];
            pool.mul(WeightView::F32(&weights), &input, &mut output, n, d);
            assert_eq!(output, expected, "thread count {threads} disagreed with reference");
        }
    }

    #[test]
    fn one_row_per_thread_boundary() {
        let n = 4;
        let d = 4;
        let weights = vec![
            1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        ];
        let input = vec![5.0, 6.0, 7.0, 8.0];
        let pool = ThreadPool::new(4);
        let mut output = vec![0.0; d];
        pool.mul(WeightView::F32(&weights), &input, &mut output, n, d);
        assert_eq!(output, input);
    }

    #[test]
    #[should_panic(expected = "re-entrantly")]
    fn reentrant_mul_panics() {
        let pool = ThreadPool::new(1);
        let weights = vec![1.0f32; 4];
        let input = vec![1.0f32; 4];
        let mut output = vec![0.0; 1];
        // Poison the busy flag manually to simulate a call already in flight.
        pool.busy.store(true, Ordering::Release);
        pool.mul(WeightView::F32(&weights), &input, &mut output, 4, 1);
    }

    #[test]
    fn sixty_four_threads_one_row_each_match_single_thread_reference() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let n = 64;
        let d = 64;
        let mut rng = StdRng::seed_from_u64(42);
        let weights: Vec<f32> = (0..n * d).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let input: Vec<f32> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let expected = reference(&weights, &input, n, d);

        let pool = ThreadPool::new(64);
        let mut first = vec![0.0; d];
        pool.mul(WeightView::F32(&weights), &input, &mut first, n, d);
        assert_eq!(first, expected);

        // Same seeded inputs through a second pool must reproduce the same
        // output bit-for-bit: no thread-ordering nondeterminism in the merge.
        let pool2 = ThreadPool::new(64);
        let mut second = vec![0.0; d];
        pool2.mul(WeightView::F32(&weights), &input, &mut second, n, d);
        assert_eq!(first, second);
    }

    #[test]
    fn q40_pool_matches_scalar_reference_within_tolerance() {
        use crate::core::types::{BlockQ40, QK40};
        use crate::quant::f16::f32_to_f16;

        let n = QK40 * 2;
        let d = 2;
        let mk_block = |nibble_lo: u8, nibble_hi: u8, scale: f32| BlockQ40 {
            d: f32_to_f16(scale),
            qs: [nibble_lo | (nibble_hi << 4); QK40 / 2],
        };
        let weights = vec![
            mk_block(9, 7, 0.2),
            mk_block(8, 8, 0.2),
            mk_block(10, 6, 0.1),
            mk_block(8, 8, 0.1),
        ];
        let input: Vec<f32> = (0..n).map(|i| (i as f32 - (n as f32 / 2.0)) * 0.1).collect();

        let mut threaded = vec![0.0; d];
        let pool = ThreadPool::new(2);
        pool.mul(WeightView::Q40(&weights), &input, &mut threaded, n, d);

        let q80_input = q80::quantize_row(&input);
        let mut single = vec![0.0; d];
        matmul::compute_full(
            WeightView::Q40(&weights),
            ActivationView::Q80(&q80_input),
            n,
            d,
            &mut single,
            &CpuFeatures::detect(),
        );

        for (a, b) in threaded.iter().zip(single.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }
}
