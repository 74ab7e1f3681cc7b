//! Longest-match search against the indexed old file.
//!
//! The matcher hashes one window of new-file bytes, probes the matching
//! index bucket, and extends each candidate byte-wise.  Two calibration
//! constants shape the throughput/ratio trade-off (they are tunable, not
//! correctness contracts):
//!
//! - candidates are rejected on the first two bytes before any extension,
//! - the probe stops as soon as any candidate reaches
//!   [`EARLY_EXIT_LEN`] matched bytes.
//!
//! A match is only reported at the window width or longer.  Ties go to the
//! first candidate in bucket order, i.e. the smallest old offset.

use crate::index::ContentIndex;
use crate::rolling::{window_hash, RollingHash};

/// A candidate match of ≥ window length is taken without probing the rest
/// of its bucket.
pub const EARLY_EXIT_LEN: usize = 4096;

/// Bounds for the index-less windowed fallback scan.
pub const MIN_FALLBACK_SEARCH: usize = 1024 * 1024;
pub const MAX_FALLBACK_SEARCH: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub old_offset: u64,
    pub length:     usize,
}

/// Length of the common prefix of `a` and `b`, compared in 16-byte blocks
/// with a byte-wise tail.
#[inline]
pub fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    let limit = a.len().min(b.len());
    let mut n = 0usize;

    while n + 16 <= limit {
        let lhs = u128::from_le_bytes(a[n..n + 16].try_into().unwrap());
        let rhs = u128::from_le_bytes(b[n..n + 16].try_into().unwrap());
        if lhs != rhs {
            // First differing byte sits at the lowest nonzero byte of the
            // xor when read little-endian.
            return n + ((lhs ^ rhs).trailing_zeros() / 8) as usize;
        }
        n += 16;
    }
    while n < limit && a[n] == b[n] {
        n += 1;
    }
    n
}

pub struct Matcher<'a> {
    old:   &'a [u8],
    index: &'a ContentIndex,
}

impl<'a> Matcher<'a> {
    pub fn new(old: &'a [u8], index: &'a ContentIndex) -> Self {
        Self { old, index }
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.index.window()
    }

    /// Longest old-file run matching `new[pos..]`, or `None` when nothing
    /// of at least window length exists in the probed bucket.
    pub fn find_longest_match(&self, new: &[u8], pos: usize) -> Option<Match> {
        let w = self.index.window();
        if pos + w > new.len() {
            return None;
        }

        let target = &new[pos..];
        let hash = window_hash(&new[pos..pos + w]);

        let mut best: Option<Match> = None;
        for &candidate in self.index.lookup(hash) {
            let old_tail = &self.old[candidate as usize..];

            // Fast reject on the first two bytes before extending.
            if old_tail.len() < 2
                || target.len() < 2
                || old_tail[0] != target[0]
                || old_tail[1] != target[1]
            {
                continue;
            }

            let len = common_prefix(old_tail, target);
            if len < w {
                continue;
            }
            if best.map_or(true, |b| len > b.length) {
                best = Some(Match { old_offset: candidate, length: len });
                if len >= EARLY_EXIT_LEN {
                    break;
                }
            }
        }
        best
    }
}

/// Index-less fallback: a rolling scan over at most `max_search` old bytes
/// with hash equality as the prefilter and byte extension on hit.
///
/// Intended for small inputs where building the full index is not worth
/// it; `max_search` is clamped to 1–10 MB.
pub fn find_match_windowed(
    old:        &[u8],
    new:        &[u8],
    pos:        usize,
    window:     usize,
    max_search: usize,
) -> Option<Match> {
    if pos + window > new.len() || old.len() < window {
        return None;
    }
    let max_search = max_search.clamp(MIN_FALLBACK_SEARCH, MAX_FALLBACK_SEARCH);
    let scan_end = (old.len() - window).min(max_search);

    let target_hash = window_hash(&new[pos..pos + window]);
    let target = &new[pos..];

    let mut hash = RollingHash::new(window);
    hash.init(&old[..window]);

    let mut best: Option<Match> = None;
    let mut off = 0usize;
    loop {
        if hash.value() == target_hash && old[off] == target[0] {
            let len = common_prefix(&old[off..], target);
            if len >= window && best.map_or(true, |b| len > b.length) {
                best = Some(Match { old_offset: off as u64, length: len });
                if len >= EARLY_EXIT_LEN {
                    break;
                }
            }
        }
        if off >= scan_end {
            break;
        }
        hash.roll(old[off], old[off + window]);
        off += 1;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ContentIndex;
    use crate::mmap::MmapFile;
    use crate::pool::WorkerPool;
    use crate::progress::ProgressThrottle;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn index_over(data: &[u8], window: usize) -> (Arc<MmapFile>, ContentIndex) {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        let map = Arc::new(MmapFile::open(f.path()).unwrap());
        std::mem::forget(f);
        let pool = WorkerPool::new(2);
        let mut throttle = ProgressThrottle::new(None);
        let idx = ContentIndex::build(&map, window, &pool, &mut throttle);
        (map, idx)
    }

    #[test]
    fn finds_an_exact_run() {
        // old repeats the probe sequence twice; the first occurrence wins.
        let mut old = Vec::new();
        let probe: Vec<u8> = (0..40u8).collect();
        old.extend_from_slice(&probe);
        old.extend_from_slice(&[0xEE; 16]);
        old.extend_from_slice(&probe);

        let (map, idx) = index_over(&old, 32);
        let matcher = Matcher::new(&map, &idx);

        let m = matcher.find_longest_match(&probe, 0).unwrap();
        assert_eq!(m.old_offset, 0);
        assert_eq!(m.length, 40);
    }

    #[test]
    fn reports_nothing_without_a_long_enough_run() {
        let old: Vec<u8> = (0..128u8).collect();
        let new = vec![0xFFu8; 64];
        let (map, idx) = index_over(&old, 32);
        let matcher = Matcher::new(&map, &idx);
        assert_eq!(matcher.find_longest_match(&new, 0), None);
    }

    #[test]
    fn no_probe_when_fewer_than_window_bytes_remain() {
        let old = vec![0xAAu8; 128];
        let (map, idx) = index_over(&old, 32);
        let matcher = Matcher::new(&map, &idx);
        let new = vec![0xAAu8; 40];
        assert!(matcher.find_longest_match(&new, 20).is_none());
    }

    #[test]
    fn ties_resolve_to_the_smallest_old_offset() {
        // Constant bytes: every candidate matches equally far, and longer
        // extensions exist at smaller offsets anyway.
        let old = vec![0x77u8; 512];
        let new = vec![0x77u8; 64];
        let (map, idx) = index_over(&old, 32);
        let matcher = Matcher::new(&map, &idx);
        let m = matcher.find_longest_match(&new, 0).unwrap();
        assert_eq!(m.old_offset, 0);
        assert_eq!(m.length, 64);
    }

    #[test]
    fn common_prefix_handles_every_alignment() {
        let a = vec![9u8; 100];
        for diff_at in [0usize, 1, 15, 16, 17, 40, 99] {
            let mut b = a.clone();
            b[diff_at] ^= 0xFF;
            assert_eq!(common_prefix(&a, &b), diff_at, "diff at {diff_at}");
        }
        assert_eq!(common_prefix(&a, &a), 100);
        assert_eq!(common_prefix(&a[..10], &a), 10);
        assert_eq!(common_prefix(&[], &a), 0);
    }

    #[test]
    fn windowed_fallback_finds_the_run() {
        let mut old = vec![0x11u8; 64];
        old.extend_from_slice(b"a distinctive forty-byte marker sequence");
        old.extend_from_slice(&[0x22u8; 64]);

        let new = b"a distinctive forty-byte marker sequence".to_vec();
        let m = find_match_windowed(&old, &new, 0, 32, 1024 * 1024).unwrap();
        assert_eq!(m.old_offset, 64);
        assert_eq!(m.length, 40);
    }

    #[test]
    fn windowed_fallback_rejects_short_inputs() {
        assert!(find_match_windowed(&[1, 2, 3], b"abcdef", 0, 32, 1024).is_none());
    }
}
