//! Diff engine — patch creation.
//!
//! A job moves through fixed stages: map both inputs, hash them (skipped
//! when `verify = false`), build the content index over the old file,
//! match and encode each block of the new file on the worker pool, and
//! write the container.  The writer emits blocks in strictly ascending
//! block-index order regardless of completion order, so two runs with the
//! same inputs, options, and thread count produce byte-identical patches.
//!
//! The old map, new map, and index are owned here and shared read-only
//! with the workers; the engine joins every task before dropping them.
//! In-flight blocks are bounded to a sliding window of twice the worker
//! count, which keeps peak memory at the mapped inputs plus
//! `T × (block + instruction/compressed buffers)`.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::block::{self, EncodedBlock};
use crate::codec;
use crate::container::PatchWriter;
use crate::digest;
use crate::error::{DeltaError, JobStats};
use crate::header::{block_count, PatchHeader};
use crate::index::ContentIndex;
use crate::matcher::Matcher;
use crate::mmap::MmapFile;
use crate::pool::WorkerPool;
use crate::progress::{CancelToken, Progress, ProgressThrottle};
use crate::rolling::DEFAULT_WINDOW;

/// Default block size: 64 MiB.
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Bytes per block of the new file.
    pub block_size:        u32,
    /// 1–3 LZ4 fast, 4–12 LZ4-HC.
    pub compression_level: i32,
    /// 0 = hardware concurrency.
    pub num_threads:       usize,
    /// Record SHA-256 digests in the header.  When false the digest
    /// fields are written as zeros.
    pub verify:            bool,
    /// Optional job-scoped cancellation flag.
    pub cancel:            Option<CancelToken>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            block_size:        DEFAULT_BLOCK_SIZE,
            compression_level: 1,
            num_threads:       0,
            verify:            true,
            cancel:            None,
        }
    }
}

pub struct DiffEngine {
    options: DiffOptions,
}

impl DiffEngine {
    pub fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    /// Create a patch that transforms `old_path` into `new_path`.
    ///
    /// On any failure (including cancellation) the partial patch file is
    /// removed before the error is returned.
    pub fn create_diff(
        &self,
        old_path:   &Path,
        new_path:   &Path,
        patch_path: &Path,
        progress:   Option<&dyn Progress>,
    ) -> Result<JobStats, DeltaError> {
        let started = Instant::now();
        let mut throttle = ProgressThrottle::new(progress);

        let result = self.run(old_path, new_path, patch_path, &mut throttle);
        if result.is_err() {
            let _ = std::fs::remove_file(patch_path);
        }

        let outcome = result.map(|bytes_processed| JobStats {
            bytes_processed,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        });
        throttle.complete(&outcome);
        outcome
    }

    fn run(
        &self,
        old_path:   &Path,
        new_path:   &Path,
        patch_path: &Path,
        throttle:   &mut ProgressThrottle<'_>,
    ) -> Result<u64, DeltaError> {
        let opts = &self.options;
        if opts.block_size == 0 {
            return Err(DeltaError::InvalidPatch("block_size must be nonzero".into()));
        }
        let cancel = opts.cancel.clone().unwrap_or_default();
        let level = opts.compression_level.clamp(codec::MIN_LEVEL, codec::MAX_LEVEL);

        // Mapping.
        let old = Arc::new(MmapFile::open(old_path)?);
        let new = Arc::new(MmapFile::open(new_path)?);

        let num_blocks = block_count(new.len(), opts.block_size);
        if num_blocks > u32::MAX as u64 {
            return Err(DeltaError::OutOfRange(format!(
                "{num_blocks} blocks exceed the container's u32 block count"
            )));
        }
        let num_blocks = num_blocks as usize;

        let mut header = PatchHeader::new(opts.block_size, old.len(), new.len());

        // Hashing — skipped entirely when verification is off; the header
        // digests then stay zeroed.
        if opts.verify {
            header.old_sha256 = digest::sha256_with_progress(&old, "hashing-old", throttle);
            cancel.check()?;
            header.new_sha256 = digest::sha256_with_progress(&new, "hashing-new", throttle);
            cancel.check()?;
        }

        // Indexing.
        let pool = WorkerPool::new(opts.num_threads);
        let index = Arc::new(ContentIndex::build(&old, DEFAULT_WINDOW, &pool, throttle));
        cancel.check()?;

        // Matching + writing.  One task per block, dispatched through a
        // sliding window and drained strictly in block-index order.
        let mut writer = PatchWriter::create(patch_path, header)?;

        let window = pool.size() * 2;
        let mut handles: VecDeque<_> = VecDeque::with_capacity(window);
        let mut next_submit = 0usize;

        for i in 0..num_blocks {
            while next_submit < num_blocks && handles.len() < window.max(1) {
                handles.push_back(self.submit_block(
                    &pool, &old, &new, &index, next_submit, level, &cancel,
                ));
                next_submit += 1;
            }
            throttle.report(i as f32 / num_blocks as f32, "matching");

            let encoded: EncodedBlock = handles
                .pop_front()
                .expect("a task was submitted for every block")
                .join()
                .ok_or_else(|| {
                    DeltaError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "block worker terminated",
                    ))
                })??;
            debug_assert_eq!(encoded.index, i);

            writer.append_block(encoded.original_size, &encoded.payload)?;
            throttle.report((i + 1) as f32 / num_blocks as f32, "writing");
        }

        writer.finalize()?;
        throttle.report(1.0, "writing");
        cancel.check()?;

        Ok(new.len())
    }

    #[allow(clippy::too_many_arguments)]
    fn submit_block(
        &self,
        pool:   &WorkerPool,
        old:    &Arc<MmapFile>,
        new:    &Arc<MmapFile>,
        index:  &Arc<ContentIndex>,
        i:      usize,
        level:  i32,
        cancel: &CancelToken,
    ) -> crate::pool::TaskHandle<Result<EncodedBlock, DeltaError>> {
        let old = Arc::clone(old);
        let new = Arc::clone(new);
        let index = Arc::clone(index);
        let cancel = cancel.clone();
        let block_size = self.options.block_size as usize;

        pool.submit_task(move || {
            let start = i * block_size;
            let end = (start + block_size).min(new.len() as usize);
            let matcher = Matcher::new(&old, &index);
            block::encode_block(&matcher, &new[start..end], i, level, &cancel)
        })
    }
}

/// Create a patch that transforms `old_path` into `new_path`.
pub fn create_diff<P: AsRef<Path>>(
    old_path:   P,
    new_path:   P,
    patch_path: P,
    options:    &DiffOptions,
    progress:   Option<&dyn Progress>,
) -> Result<JobStats, DeltaError> {
    DiffEngine::new(options.clone()).create_diff(
        old_path.as_ref(),
        new_path.as_ref(),
        patch_path.as_ref(),
        progress,
    )
}
