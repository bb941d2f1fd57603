// Core compute kernel (performance-critical, encoding-dispatched, may need SIMD)
pub mod matmul;

// CPU feature detection used by the matmul kernel's SIMD dispatch
pub mod cpu_features;
