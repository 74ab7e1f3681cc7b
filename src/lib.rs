//! # bindelta — block-based binary diff/patch for large archives
//!
//! Patch format guarantees (frozen in v1):
//! - All numeric fields are little-endian; never negotiated
//! - 100-byte packed header: magic `UEBD`, version, block size, file
//!   sizes, block count, and whole-file SHA-256 digests
//! - Block-offset table (`u64 × num_blocks`) at offset 100; payloads
//!   follow back to back in block-index order
//! - Each payload frames its own sizes: `{ u32 original_size,
//!   u32 compressed_size, bytes }`; `original_size` is authoritative
//! - A block decodes to a COPY/INSERT instruction stream that reproduces
//!   exactly one block of the new file; COPY bounds are always enforced
//! - Patch creation is deterministic for fixed inputs, options, and
//!   thread count
//!
//! Creation maps both files, hashes them, builds a rolling-hash index
//! over the old file in parallel, and encodes each 64 MiB block of the
//! new file on a worker pool.  Application validates the header, checks
//! the old file's digest, pre-sizes the output, and reconstructs blocks
//! into disjoint ranges, verifying the result's digest at the end.

pub mod error;
pub mod rolling;
pub mod index;
pub mod matcher;
pub mod ops;
pub mod codec;
pub mod block;
pub mod digest;
pub mod mmap;
pub mod header;
pub mod container;
pub mod pool;
pub mod progress;
pub mod diff;
pub mod patch;
pub mod batch;

// Flat re-exports for the most common types.
pub use error::{DeltaError, JobStats};
pub use diff::{create_diff, DiffEngine, DiffOptions, DEFAULT_BLOCK_SIZE};
pub use patch::{apply_patch, get_patch_info, verify_patch, ApplyOptions, PatchEngine};
pub use container::{PatchInfo, PatchReader, PatchWriter};
pub use header::{PatchHeader, FORMAT_VERSION, HEADER_SIZE, MAGIC};
pub use ops::Instruction;
pub use progress::{CancelToken, Progress};
pub use batch::{batch_diff, batch_patch, BatchOptions, BatchReport};
