//! Patch engine — reconstruction.
//!
//! Application validates the header against the old file, pre-sizes the
//! output so per-block writes need no coordination on file length, then
//! streams block frames from the patch: sequential reads from a single
//! cursor, per-block decompress + execute on the worker pool, and
//! positional writes into disjoint output ranges.  With verification on,
//! the produced file's SHA-256 must equal the header digest; a mismatch is
//! a hard failure and the output is removed.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::codec;
use crate::container::{read_patch_info, PatchInfo, PatchReader};
use crate::digest;
use crate::error::{DeltaError, JobStats};
use crate::mmap::MmapFile;
use crate::ops::{self, Instruction};
use crate::pool::WorkerPool;
use crate::progress::{CancelToken, Progress, ProgressThrottle};

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Check the old file's digest before applying and the output's digest
    /// after.  Digests recorded as all-zero (patches created with
    /// `verify = false`) are skipped either way.
    pub verify:      bool,
    /// 0 = hardware concurrency.
    pub num_threads: usize,
    pub cancel:      Option<CancelToken>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            verify:      true,
            num_threads: 0,
            cancel:      None,
        }
    }
}

/// Execute one block's instruction stream into `out`.
///
/// Every COPY is bounds-checked against the old file and the output
/// block; every INSERT against the output block.  The stream must fill
/// `out` exactly.
pub fn execute_instructions(
    stream: &[u8],
    old:    &[u8],
    out:    &mut [u8],
) -> Result<(), DeltaError> {
    let mut cursor = stream;
    let mut out_pos = 0usize;

    while !cursor.is_empty() {
        let (op, consumed) = ops::deserialize(cursor)?;
        cursor = &cursor[consumed..];

        match op {
            Instruction::Copy { offset, length } => {
                let length = length as usize;
                let offset = offset as usize;
                if offset.checked_add(length).map_or(true, |end| end > old.len()) {
                    return Err(DeltaError::OutOfRange(format!(
                        "COPY {offset}+{length} exceeds old size {}",
                        old.len()
                    )));
                }
                if out_pos + length > out.len() {
                    return Err(DeltaError::OutOfRange(format!(
                        "COPY overflows output block ({out_pos}+{length} > {})",
                        out.len()
                    )));
                }
                out[out_pos..out_pos + length].copy_from_slice(&old[offset..offset + length]);
                out_pos += length;
            }
            Instruction::Insert(bytes) => {
                if out_pos + bytes.len() > out.len() {
                    return Err(DeltaError::OutOfRange(format!(
                        "INSERT overflows output block ({out_pos}+{} > {})",
                        bytes.len(),
                        out.len()
                    )));
                }
                out[out_pos..out_pos + bytes.len()].copy_from_slice(&bytes);
                out_pos += bytes.len();
            }
        }
    }

    if out_pos != out.len() {
        return Err(DeltaError::InvalidPatch(format!(
            "instruction stream produced {out_pos} bytes for a {}-byte block",
            out.len()
        )));
    }
    Ok(())
}

/// Positional write into the pre-sized output file.
#[cfg(unix)]
fn write_block_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_block_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_write(buf, offset)?;
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}

pub struct PatchEngine {
    options: ApplyOptions,
}

impl PatchEngine {
    pub fn new(options: ApplyOptions) -> Self {
        Self { options }
    }

    /// Apply `patch_path` to `old_path`, producing `new_path`.
    ///
    /// On any failure the partial output file is removed before the error
    /// is returned.
    pub fn apply_patch(
        &self,
        old_path:   &Path,
        patch_path: &Path,
        new_path:   &Path,
        progress:   Option<&dyn Progress>,
    ) -> Result<JobStats, DeltaError> {
        let started = Instant::now();
        let mut throttle = ProgressThrottle::new(progress);

        let result = self.run(old_path, patch_path, new_path, &mut throttle);
        if result.is_err() {
            let _ = std::fs::remove_file(new_path);
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
        patch_path: &Path,
        new_path:   &Path,
        throttle:   &mut ProgressThrottle<'_>,
    ) -> Result<u64, DeltaError> {
        let opts = &self.options;
        let cancel = opts.cancel.clone().unwrap_or_default();

        let mut reader = PatchReader::open(patch_path)?;
        let header = reader.header.clone();

        let old = Arc::new(MmapFile::open(old_path)?);
        if old.len() != header.old_size {
            return Err(DeltaError::SizeMismatch {
                what:     "old file",
                expected: header.old_size,
                actual:   old.len(),
            });
        }
        if opts.verify && !digest::is_zero(&header.old_sha256) {
            let actual = digest::sha256_with_progress(&old, "hashing-old", throttle);
            if actual != header.old_sha256 {
                return Err(DeltaError::HashMismatch("old file"));
            }
        }
        cancel.check()?;

        // Pre-size the output so block writes hit disjoint ranges without
        // coordinating on file length.
        let out_file = Arc::new(
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(new_path)?,
        );
        out_file.set_len(header.new_size)?;

        let pool = WorkerPool::new(opts.num_threads);
        let num_blocks = header.num_blocks as usize;
        let block_size = header.block_size as u64;

        let window = pool.size() * 2;
        let mut handles: VecDeque<crate::pool::TaskHandle<Result<(), DeltaError>>> =
            VecDeque::with_capacity(window);
        let mut next_submit = 0usize;

        for i in 0..num_blocks {
            while next_submit < num_blocks && handles.len() < window {
                cancel.check()?;
                let j = next_submit;
                let (original_size, payload) = reader.read_block(j)?;

                let old = Arc::clone(&old);
                let out_file = Arc::clone(&out_file);
                let new_size = header.new_size;
                let cancel = cancel.clone();
                handles.push_back(pool.submit_task(move || {
                    cancel.check()?;
                    let stream = codec::decompress(&payload, original_size as usize)?;

                    let out_start = j as u64 * block_size;
                    let out_len = (new_size - out_start).min(block_size) as usize;
                    let mut out = vec![0u8; out_len];
                    execute_instructions(&stream, &old, &mut out)?;

                    write_block_at(&out_file, &out, out_start)?;
                    Ok(())
                }));
                next_submit += 1;
            }

            handles
                .pop_front()
                .expect("a task was submitted for every block")
                .join()
                .ok_or_else(|| {
                    DeltaError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "apply worker terminated",
                    ))
                })??;
            throttle.report((i + 1) as f32 / num_blocks as f32, "applying");
        }
        pool.wait();
        out_file.sync_all()?;
        drop(out_file);
        throttle.report(1.0, "applying");
        cancel.check()?;

        // Post-condition: the produced bytes hash to the recorded digest.
        if opts.verify && !digest::is_zero(&header.new_sha256) {
            let produced = MmapFile::open(new_path)?;
            if produced.len() != header.new_size {
                return Err(DeltaError::SizeMismatch {
                    what:     "output file",
                    expected: header.new_size,
                    actual:   produced.len(),
                });
            }
            if digest::sha256(&produced) != header.new_sha256 {
                return Err(DeltaError::HashMismatch("output file"));
            }
        }

        Ok(header.new_size)
    }
}

/// Apply a patch to the old file, producing the new file.
pub fn apply_patch<P: AsRef<Path>>(
    old_path:   P,
    patch_path: P,
    new_path:   P,
    options:    &ApplyOptions,
    progress:   Option<&dyn Progress>,
) -> Result<JobStats, DeltaError> {
    PatchEngine::new(options.clone()).apply_patch(
        old_path.as_ref(),
        patch_path.as_ref(),
        new_path.as_ref(),
        progress,
    )
}

/// Check that a patch's declared sizes match the supplied files.
///
/// Parses the header (so a corrupted patch still fails) but does not
/// re-apply; full byte equality is the round-trip tests' job, not this
/// function's.
pub fn verify_patch<P: AsRef<Path>>(
    old_path:   P,
    new_path:   P,
    patch_path: P,
) -> Result<JobStats, DeltaError> {
    let started = Instant::now();
    let info: PatchInfo = read_patch_info(patch_path.as_ref())?;

    let old_len = std::fs::metadata(old_path.as_ref())?.len();
    if old_len != info.old_size {
        return Err(DeltaError::SizeMismatch {
            what:     "old file",
            expected: info.old_size,
            actual:   old_len,
        });
    }

    let new_len = std::fs::metadata(new_path.as_ref())?.len();
    if new_len != info.new_size {
        return Err(DeltaError::SizeMismatch {
            what:     "new file",
            expected: info.new_size,
            actual:   new_len,
        });
    }

    Ok(JobStats {
        bytes_processed: info.new_size,
        elapsed_seconds: started.elapsed().as_secs_f64(),
    })
}

/// Read a patch's header summary.
pub fn get_patch_info<P: AsRef<Path>>(patch_path: P) -> Result<PatchInfo, DeltaError> {
    read_patch_info(patch_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::serialize_all;

    #[test]
    fn execute_copy_and_insert() {
        let old = b"0123456789".to_vec();
        let stream = serialize_all(&[
            Instruction::Copy { offset: 2, length: 4 },
            Instruction::Insert(b"xy".to_vec()),
            Instruction::Copy { offset: 0, length: 2 },
        ]);
        let mut out = vec![0u8; 8];
        execute_instructions(&stream, &old, &mut out).unwrap();
        assert_eq!(&out, b"2345xy01");
    }

    #[test]
    fn copy_past_old_end_is_out_of_range() {
        let stream = serialize_all(&[Instruction::Copy { offset: 8, length: 4 }]);
        let mut out = vec![0u8; 4];
        assert!(matches!(
            execute_instructions(&stream, b"0123456789", &mut out),
            Err(DeltaError::OutOfRange(_))
        ));
    }

    #[test]
    fn copy_offset_overflow_is_out_of_range() {
        let stream = serialize_all(&[Instruction::Copy { offset: u64::MAX, length: 2 }]);
        let mut out = vec![0u8; 2];
        assert!(matches!(
            execute_instructions(&stream, b"01", &mut out),
            Err(DeltaError::OutOfRange(_))
        ));
    }

    #[test]
    fn output_overflow_is_out_of_range() {
        let stream = serialize_all(&[Instruction::Insert(vec![1, 2, 3, 4])]);
        let mut out = vec![0u8; 3];
        assert!(matches!(
            execute_instructions(&stream, b"", &mut out),
            Err(DeltaError::OutOfRange(_))
        ));
    }

    #[test]
    fn underfilled_block_is_invalid() {
        let stream = serialize_all(&[Instruction::Insert(vec![1, 2])]);
        let mut out = vec![0u8; 4];
        assert!(matches!(
            execute_instructions(&stream, b"", &mut out),
            Err(DeltaError::InvalidPatch(_))
        ));
    }

    #[test]
    fn corrupt_opcode_is_invalid() {
        let mut out = vec![0u8; 1];
        assert!(matches!(
            execute_instructions(&[0xEE], b"", &mut out),
            Err(DeltaError::InvalidPatch(_))
        ));
    }

    #[test]
    fn empty_stream_fills_empty_block() {
        let mut out = [0u8; 0];
        execute_instructions(&[], b"", &mut out).unwrap();
    }
}
