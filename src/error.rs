//! Job-level error surface and result statistics.
//!
//! Every fallible operation in the crate reports one of the kinds below.
//! Per-block errors are never retried: the first non-`Cancelled` error
//! aborts the job and becomes the job's error, and partial output files are
//! removed before the error is returned.  `verify = false` suppresses
//! `HashMismatch` only — opcode validation, frame sizes, and copy bounds
//! are always enforced.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeltaError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Magic/version mismatch, header out of bounds, truncated payload,
    /// bad block offset, or a corrupted instruction stream.
    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Size mismatch for {what}: expected {expected}, found {actual}")]
    SizeMismatch {
        what:     &'static str,
        expected: u64,
        actual:   u64,
    },

    /// SHA-256 of the old file (pre-apply) or the produced file
    /// (post-apply) does not match the digest recorded in the header.
    #[error("SHA-256 mismatch for {0}")]
    HashMismatch(&'static str),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// A COPY references bytes outside the old file, or an instruction
    /// overflows its output block.
    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl DeltaError {
    /// True for the cooperative-cancellation outcome, which is not treated
    /// as a block failure by the engines.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeltaError::Cancelled)
    }
}

/// Statistics returned by a completed job.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStats {
    /// Output bytes produced (diff/apply: `new_size`).
    pub bytes_processed: u64,
    pub elapsed_seconds: f64,
}
