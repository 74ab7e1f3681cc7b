//! Per-block instruction encoding.
//!
//! Each block of the new file is an independent unit of work: run the
//! matcher over the block's bytes, emit COPY/INSERT instructions covering
//! it exactly, serialize, compress.  Blocks never reference each other;
//! COPY offsets always point into the old file.

use crate::codec;
use crate::error::DeltaError;
use crate::matcher::Matcher;
use crate::ops::{self, Instruction, MAX_INSERT_RUN};
use crate::progress::CancelToken;

/// A finished block, ready for the writer.
#[derive(Debug)]
pub struct EncodedBlock {
    pub index:         usize,
    /// Instruction-stream size before compression.
    pub original_size: u32,
    pub payload:       Vec<u8>,
}

/// Encode one block of the new file.
///
/// `block` is the slice `new[start..end]` for block `block_index`; the
/// matcher carries the old bytes and the shared index.  Fails on size
/// overflow or a compressor error, or with `Cancelled` when the token
/// fires between matcher invocations.
pub fn encode_block(
    matcher:     &Matcher<'_>,
    block:       &[u8],
    block_index: usize,
    level:       i32,
    cancel:      &CancelToken,
) -> Result<EncodedBlock, DeltaError> {
    let ops = build_instructions(matcher, block, cancel)?;

    debug_assert_eq!(
        ops.iter().map(Instruction::output_len).sum::<usize>(),
        block.len(),
        "instructions must cover the block exactly"
    );

    let stream = ops::serialize_all(&ops);
    let original_size = u32::try_from(stream.len()).map_err(|_| {
        DeltaError::OutOfRange(format!(
            "instruction stream of block {block_index} exceeds u32"
        ))
    })?;
    let payload = codec::compress(&stream, level)?;

    Ok(EncodedBlock {
        index: block_index,
        original_size,
        payload,
    })
}

/// Greedy match/insert pass over one block.
fn build_instructions(
    matcher: &Matcher<'_>,
    block:   &[u8],
    cancel:  &CancelToken,
) -> Result<Vec<Instruction>, DeltaError> {
    let w = matcher.window();
    let mut ops: Vec<Instruction> = Vec::new();
    let mut literals: Vec<u8> = Vec::new();
    let mut pos = 0usize;

    while pos < block.len() {
        cancel.check()?;

        if let Some(m) = matcher.find_longest_match(block, pos) {
            debug_assert!(m.length >= w);
            flush_literals(&mut ops, &mut literals);
            ops.push(Instruction::Copy {
                offset: m.old_offset,
                length: m.length as u32,
            });
            pos += m.length;
        } else {
            literals.push(block[pos]);
            pos += 1;
            if literals.len() == MAX_INSERT_RUN {
                flush_literals(&mut ops, &mut literals);
            }
        }
    }
    flush_literals(&mut ops, &mut literals);

    Ok(ops)
}

fn flush_literals(ops: &mut Vec<Instruction>, literals: &mut Vec<u8>) {
    if !literals.is_empty() {
        ops.push(Instruction::Insert(std::mem::take(literals)));
    }
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

    fn fixture(old: &[u8]) -> (Arc<MmapFile>, ContentIndex) {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(old).unwrap();
        f.flush().unwrap();
        let map = Arc::new(MmapFile::open(f.path()).unwrap());
        std::mem::forget(f);
        let pool = WorkerPool::new(2);
        let mut throttle = ProgressThrottle::new(None);
        let idx = ContentIndex::build(&map, 32, &pool, &mut throttle);
        (map, idx)
    }

    fn instructions(old: &[u8], new: &[u8]) -> Vec<Instruction> {
        let (map, idx) = fixture(old);
        let matcher = Matcher::new(&map, &idx);
        build_instructions(&matcher, new, &CancelToken::new()).unwrap()
    }

    #[test]
    fn unchanged_data_is_a_single_copy() {
        let old: Vec<u8> = (0..65536usize).map(|i| (i % 256) as u8).collect();
        let ops = instructions(&old, &old);
        assert_eq!(
            ops,
            vec![Instruction::Copy { offset: 0, length: 65536 }]
        );
    }

    #[test]
    fn middle_edit_produces_copy_insert_copy() {
        let old = vec![0xAAu8; 4096];
        let mut new = old.clone();
        for b in &mut new[100..150] {
            *b = 0xBB;
        }
        let ops = instructions(&old, &new);

        assert!(ops.iter().any(|op| matches!(
            op,
            Instruction::Copy { offset: 0, length } if *length >= 32
        )));
        assert!(ops.iter().any(|op| matches!(
            op,
            Instruction::Insert(bytes) if bytes.len() == 50
        )));
        // And the instructions cover the block exactly.
        let total: usize = ops.iter().map(Instruction::output_len).sum();
        assert_eq!(total, new.len());
    }

    #[test]
    fn empty_old_yields_pure_inserts_split_at_the_run_cap() {
        let new = vec![0x3Cu8; MAX_INSERT_RUN + 4464];
        let ops = instructions(&[], &new);
        assert_eq!(
            ops.iter()
                .map(|op| match op {
                    Instruction::Insert(b) => b.len(),
                    _ => panic!("expected only INSERTs"),
                })
                .collect::<Vec<_>>(),
            vec![MAX_INSERT_RUN, 4464]
        );
    }

    #[test]
    fn encode_block_roundtrips_through_the_codec() {
        let old = vec![0x55u8; 2048];
        let mut new = old.clone();
        new[500] = 0;
        let (map, idx) = fixture(&old);
        let matcher = Matcher::new(&map, &idx);

        let encoded = encode_block(&matcher, &new, 7, 1, &CancelToken::new()).unwrap();
        assert_eq!(encoded.index, 7);

        let stream =
            crate::codec::decompress(&encoded.payload, encoded.original_size as usize).unwrap();
        let ops = crate::ops::deserialize_all(&stream).unwrap();
        let total: usize = ops.iter().map(Instruction::output_len).sum();
        assert_eq!(total, new.len());
    }

    #[test]
    fn cancellation_stops_the_block() {
        let token = CancelToken::new();
        token.cancel();
        let (map, idx) = fixture(&[0u8; 64]);
        let matcher = Matcher::new(&map, &idx);
        assert!(matches!(
            encode_block(&matcher, &[1u8; 64], 0, 1, &token),
            Err(DeltaError::Cancelled)
        ));
    }

    #[test]
    fn empty_block_encodes_to_an_empty_stream() {
        let (map, idx) = fixture(&[0u8; 64]);
        let matcher = Matcher::new(&map, &idx);
        let encoded = encode_block(&matcher, &[], 0, 1, &CancelToken::new()).unwrap();
        assert_eq!(encoded.original_size, 0);
        assert!(encoded.payload.is_empty());
    }
}
