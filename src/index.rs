//! Content-addressable index over the old file.
//!
//! A fixed table of 65536 buckets maps the rolling hash of every sampled
//! `w`-byte window of the old file to the window's offset.  Buckets are
//! capped at 200 entries; once a bucket is full, further candidates are
//! silently dropped.  A sampling step trades index density for build time:
//! every window below 100 MB, every 4th window above it, every 8th above
//! 1 GB.
//!
//! # Parallel build
//!
//! The emittable offset range `0 ..= old_len − w` is split into one
//! contiguous shard per worker.  Each shard rolls a hash through its range
//! and collects `(bucket, offset)` pairs into a shard-local vector with no
//! shared mutation; a single-threaded merge then fills the global buckets
//! in shard-then-offset order, applying the cap.  For a fixed
//! `(old, w, step, shard count)` the result is identical on every run.

use std::sync::Arc;

use crate::mmap::MmapFile;
use crate::pool::WorkerPool;
use crate::progress::ProgressThrottle;
use crate::rolling::RollingHash;

pub const NUM_BUCKETS: usize = 65536;

/// Per-bucket candidate cap.  Bounds the index at
/// `NUM_BUCKETS × BUCKET_CAP × 8 B ≈ 100 MB` on worst-case inputs.
pub const BUCKET_CAP: usize = 200;

const SAMPLE_STEP_100MB: usize = 4;
const SAMPLE_STEP_1GB:   usize = 8;

/// Sampling step for a given input length.
pub fn sampling_step(len: u64) -> usize {
    if len > 1024 * 1024 * 1024 {
        SAMPLE_STEP_1GB
    } else if len > 100 * 1024 * 1024 {
        SAMPLE_STEP_100MB
    } else {
        1
    }
}

#[inline]
fn bucket_of(hash: u64) -> usize {
    (hash as usize) & (NUM_BUCKETS - 1)
}

pub struct ContentIndex {
    buckets: Vec<Vec<u64>>,
    window:  usize,
    step:    usize,
}

impl ContentIndex {
    /// Build the index over `old` using one shard per pool worker.
    ///
    /// Inputs shorter than one window produce an empty index.
    pub fn build(
        old:      &Arc<MmapFile>,
        window:   usize,
        pool:     &WorkerPool,
        progress: &mut ProgressThrottle<'_>,
    ) -> Self {
        let step = sampling_step(old.len());
        let mut index = Self {
            buckets: vec![Vec::new(); NUM_BUCKETS],
            window,
            step,
        };

        let old_len = old.len() as usize;
        if old_len < window {
            progress.report(1.0, "indexing");
            return index;
        }

        // Offsets 0 ..= old_len − window are emittable.
        let emittable = old_len - window + 1;
        let shards = pool.size();
        let shard_len = emittable.div_ceil(shards);

        let mut handles = Vec::with_capacity(shards);
        for t in 0..shards {
            let start = t * shard_len;
            let end = ((t + 1) * shard_len).min(emittable);
            let old = Arc::clone(old);
            handles.push(pool.submit_task(move || {
                scan_shard(&old, window, step, start, end)
            }));
        }

        // Merge in shard order so the bucket contents are deterministic
        // regardless of completion order.
        for (t, handle) in handles.into_iter().enumerate() {
            let entries = handle.join().unwrap_or_default();
            for (bucket, offset) in entries {
                let slot = &mut index.buckets[bucket as usize];
                if slot.len() < BUCKET_CAP {
                    slot.push(offset);
                }
            }
            progress.report((t + 1) as f32 / shards as f32, "indexing");
        }

        index
    }

    /// An empty index, for inputs that cannot produce matches.
    pub fn empty(window: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); NUM_BUCKETS],
            window,
            step: 1,
        }
    }

    /// Candidate old-file offsets whose window hashes into `hash`'s bucket,
    /// in shard-then-offset insertion order.
    #[inline]
    pub fn lookup(&self, hash: u64) -> &[u64] {
        &self.buckets[bucket_of(hash)]
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    #[inline]
    pub fn step(&self) -> usize {
        self.step
    }

    /// Total number of indexed offsets (diagnostics).
    pub fn entry_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}

/// Scan one shard, rolling the hash through every position but emitting
/// only offsets aligned to `step` relative to the shard start.
fn scan_shard(
    old:    &MmapFile,
    window: usize,
    step:   usize,
    start:  usize,
    end:    usize,
) -> Vec<(u32, u64)> {
    let bytes = old.as_bytes();
    if start >= end {
        return Vec::new();
    }

    let mut entries = Vec::with_capacity((end - start) / step + 1);
    // Shard-local cap mirror: an entry past the cap in its own shard can
    // never survive the ordered merge, so dropping it here keeps shard
    // memory bounded without changing the merged result.
    let mut counts = vec![0u8; NUM_BUCKETS];

    let mut hash = RollingHash::new(window);
    hash.init(&bytes[start..start + window]);

    let mut pos = start;
    loop {
        if (pos - start) % step == 0 {
            let bucket = bucket_of(hash.value());
            if (counts[bucket] as usize) < BUCKET_CAP {
                counts[bucket] += 1;
                entries.push((bucket as u32, pos as u64));
            }
        }
        pos += 1;
        if pos >= end {
            break;
        }
        hash.roll(bytes[pos - 1], bytes[pos - 1 + window]);
    }

    entries
}
