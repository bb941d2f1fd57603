//! Sharded matrix-vector multiply engine: weight-sharding planner, quantized
//! kernels, a persistent thread pool, and the worker RPC protocol that lets
//! several processes each hold one output-dimension slice of a transformer
//! layer's weights and jointly produce one full-width output vector.

pub mod core;
pub mod error;
pub mod ops;
pub mod pool;
pub mod quant;
pub mod rpc;
pub mod shard;
