//! LZ4 block compression for instruction-stream payloads.
//!
//! The patch stores each block's instruction stream compressed, together
//! with the stream's exact pre-compression size.  That stored
//! `original_size` is authoritative: decompression fails unless the payload
//! yields exactly that many bytes, and no trailing padding is ever
//! produced.  Levels 1–3 select LZ4 fast mode; 4–12 select LZ4-HC.

use lz4::block::{self, CompressionMode};

use crate::error::DeltaError;

/// Inclusive compression-level range accepted by the engines.
pub const MIN_LEVEL: i32 = 1;
pub const MAX_LEVEL: i32 = 12;

/// Highest level that still uses the fast (non-HC) encoder.
const MAX_FAST_LEVEL: i32 = 3;

fn mode_for_level(level: i32) -> CompressionMode {
    if level <= MAX_FAST_LEVEL {
        CompressionMode::FAST(1)
    } else {
        CompressionMode::HIGHCOMPRESSION(level.min(MAX_LEVEL))
    }
}

/// Compress `data` at the given level.
///
/// Never fails for inputs the engines produce (an instruction stream is at
/// most a few bytes above its block size, far below the 2 GB LZ4 bound).
/// An empty input compresses to an empty payload.
pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>, DeltaError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let compressed = block::compress(data, Some(mode_for_level(level)), false)?;
    Ok(compressed)
}

/// Decompress `data` into exactly `original_size` bytes.
///
/// Fails iff the payload is malformed or does not decompress to exactly
/// `original_size` bytes.  An empty payload round-trips to an empty output.
pub fn decompress(data: &[u8], original_size: usize) -> Result<Vec<u8>, DeltaError> {
    if original_size == 0 {
        if !data.is_empty() {
            return Err(DeltaError::Decompression(
                "nonempty payload for an empty block".into(),
            ));
        }
        return Ok(Vec::new());
    }
    if data.is_empty() {
        return Err(DeltaError::Decompression(
            "empty payload for a nonempty block".into(),
        ));
    }
    if original_size > i32::MAX as usize {
        return Err(DeltaError::Decompression(format!(
            "declared size {original_size} exceeds the LZ4 block bound"
        )));
    }

    let out = block::decompress(data, Some(original_size as i32))
        .map_err(|e| DeltaError::Decompression(e.to_string()))?;

    if out.len() != original_size {
        return Err(DeltaError::Decompression(format!(
            "payload decompressed to {} bytes, header declares {original_size}",
            out.len()
        )));
    }
    Ok(out)
}
