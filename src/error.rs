//! Error hierarchy for everything that crosses a process or socket boundary.
//!
//! Misaligned dimensions and out-of-range indices discovered inside the hot
//! loops of the kernel or the shard planner are programmer errors and stay
//! as `assert!`/`debug_assert!` (they abort the process per the spec); this
//! type is reserved for failures that originate outside the process, where
//! a caller can meaningfully decide what to log before giving up.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dimension mismatch: {detail}")]
    Dimension { detail: String },

    #[error("unknown or unsupported encoding: {detail}")]
    Encoding { detail: String },

    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {detail}")]
    Protocol { detail: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
