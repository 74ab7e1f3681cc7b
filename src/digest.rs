//! Whole-file SHA-256 integrity digests.
//!
//! The patch header records the SHA-256 of the old and new files; apply
//! re-derives them to detect a wrong or corrupted input before touching
//! the output.  Hashing a mapped multi-GB file takes long enough that it
//! gets its own progress stages, so the chunked variant reports through
//! the throttled sink.

use sha2::{Digest, Sha256};

use crate::progress::ProgressThrottle;

/// Digest chunk size: large enough to reach memory bandwidth, small enough
/// for percent-level progress granularity on big files.
const CHUNK: usize = 8 * 1024 * 1024;

/// A digest of all zeros, written when hashing was skipped at creation.
pub const ZERO_DIGEST: [u8; 32] = [0u8; 32];

/// True when `digest` is the "not recorded" sentinel.
#[inline]
pub fn is_zero(digest: &[u8; 32]) -> bool {
    digest.iter().all(|&b| b == 0)
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// SHA-256 over `bytes`, reporting fractional progress under `stage`.
pub fn sha256_with_progress(
    bytes:    &[u8],
    stage:    &'static str,
    progress: &mut ProgressThrottle<'_>,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    if bytes.is_empty() {
        progress.report(1.0, stage);
        return hasher.finalize().into();
    }
    let total = bytes.len();
    let mut done = 0usize;
    for chunk in bytes.chunks(CHUNK) {
        hasher.update(chunk);
        done += chunk.len();
        progress.report(done as f32 / total as f32, stage);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // FIPS 180-2 test vector for "abc".
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn empty_input() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn chunked_matches_oneshot() {
        let data: Vec<u8> = (0..3 * CHUNK + 1234).map(|i| i as u8).collect();
        let mut throttle = ProgressThrottle::new(None);
        assert_eq!(sha256(&data), sha256_with_progress(&data, "hashing-old", &mut throttle));
    }

    #[test]
    fn zero_sentinel() {
        assert!(is_zero(&ZERO_DIGEST));
        assert!(!is_zero(&sha256(b"")));
    }
}
