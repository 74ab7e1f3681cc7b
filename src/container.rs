//! Patch container — writer, reader, and the `info` surface.
//!
//! # Writer
//! [`PatchWriter`] reserves the header and a zeroed block-offset table,
//! appends each block's `{ original_size, compressed_size, bytes }` frame
//! in block-index order while recording its absolute offset, then seeks
//! back and backfills the table on `finalize()`.
//!
//! # Reader
//! [`PatchReader::open`] validates everything that can be validated
//! without touching payloads: magic, version, nonzero block size,
//! `num_blocks` consistent with the declared new size, the table within
//! the file, and offsets that start at the data region and strictly
//! increase.  `read_block` additionally requires each payload to end
//! exactly where the next one begins — the writer emits payloads back to
//! back, so any tampered offset or size field surfaces as `InvalidPatch`
//! before a decompressor ever sees the bytes.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::DeltaError;
use crate::header::{self, PatchHeader, HEADER_SIZE};

/// Per-block frame overhead: `u32 original_size` + `u32 compressed_size`.
const BLOCK_FRAME: u64 = 8;

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct PatchWriter {
    file:    BufWriter<File>,
    header:  PatchHeader,
    offsets: Vec<u64>,
    cursor:  u64,
}

impl PatchWriter {
    /// Create the patch file and reserve the header + offset table region.
    ///
    /// The header carries its final field values (sizes, digests,
    /// `num_blocks`) from the start; only the offset table is backfilled.
    pub fn create<P: AsRef<Path>>(path: P, header: PatchHeader) -> Result<Self, DeltaError> {
        let file = File::create(path)?;
        let mut file = BufWriter::new(file);

        header.write(&mut file)?;
        let placeholder = vec![0u64; header.num_blocks as usize];
        header::write_offsets(&mut file, &placeholder)?;

        let cursor = header.data_start();
        Ok(Self {
            file,
            header,
            offsets: Vec::with_capacity(placeholder.len()),
            cursor,
        })
    }

    /// Append the next block's payload.  Must be called in block-index
    /// order, `num_blocks` times.
    pub fn append_block(&mut self, original_size: u32, payload: &[u8]) -> Result<(), DeltaError> {
        debug_assert!(self.offsets.len() < self.header.num_blocks as usize);
        self.offsets.push(self.cursor);
        self.file.write_u32::<LittleEndian>(original_size)?;
        self.file.write_u32::<LittleEndian>(payload.len() as u32)?;
        self.file.write_all(payload)?;
        self.cursor += BLOCK_FRAME + payload.len() as u64;
        Ok(())
    }

    /// Backfill the offset table and flush.  Consumes the writer.
    pub fn finalize(mut self) -> Result<(), DeltaError> {
        debug_assert_eq!(self.offsets.len(), self.header.num_blocks as usize);
        self.file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        header::write_offsets(&mut self.file, &self.offsets)?;
        self.file.flush()?;
        Ok(())
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct PatchReader {
    file:       BufReader<File>,
    pub header: PatchHeader,
    offsets:    Vec<u64>,
    patch_size: u64,
}

impl PatchReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DeltaError> {
        let file = File::open(path)?;
        let patch_size = file.metadata()?.len();
        let mut file = BufReader::new(file);

        let header = PatchHeader::read(&mut file)?;

        // num_blocks must agree with the declared new size.
        let expected_blocks = header::block_count(header.new_size, header.block_size);
        if header.num_blocks as u64 != expected_blocks {
            return Err(DeltaError::InvalidPatch(format!(
                "num_blocks {} disagrees with new_size/block_size (expected {expected_blocks})",
                header.num_blocks
            )));
        }

        let data_start = header.data_start();
        if data_start > patch_size {
            return Err(DeltaError::InvalidPatch(
                "block-offset table runs past end of file".into(),
            ));
        }

        let offsets = header::read_offsets(&mut file, header.num_blocks)?;

        // Offsets start right after the table, strictly increase, and
        // leave room for at least a frame header each.
        let mut expected = data_start;
        for (i, &off) in offsets.iter().enumerate() {
            if off != expected && i == 0 {
                return Err(DeltaError::InvalidPatch(format!(
                    "block 0 offset {off} does not start at the data region ({data_start})"
                )));
            }
            if off < expected {
                return Err(DeltaError::InvalidPatch(format!(
                    "block {i} offset {off} is not monotonically increasing"
                )));
            }
            if off + BLOCK_FRAME > patch_size {
                return Err(DeltaError::InvalidPatch(format!(
                    "block {i} offset {off} runs past end of file"
                )));
            }
            expected = off + BLOCK_FRAME;
        }

        Ok(Self {
            file,
            header,
            offsets,
            patch_size,
        })
    }

    #[inline]
    pub fn num_blocks(&self) -> u32 {
        self.header.num_blocks
    }

    #[inline]
    pub fn patch_size(&self) -> u64 {
        self.patch_size
    }

    /// Read block `i`'s frame: `(original_size, compressed bytes)`.
    ///
    /// The payload must end exactly at the next block's offset (or at the
    /// end of the file for the last block); anything else means the table
    /// or the size fields were corrupted.
    pub fn read_block(&mut self, i: usize) -> Result<(u32, Vec<u8>), DeltaError> {
        let offset = *self
            .offsets
            .get(i)
            .ok_or_else(|| DeltaError::InvalidPatch(format!("block {i} out of table range")))?;

        self.file.seek(SeekFrom::Start(offset))?;
        let original_size = self
            .file
            .read_u32::<LittleEndian>()
            .map_err(|_| DeltaError::InvalidPatch(format!("truncated frame for block {i}")))?;
        let compressed_size = self
            .file
            .read_u32::<LittleEndian>()
            .map_err(|_| DeltaError::InvalidPatch(format!("truncated frame for block {i}")))?;

        let end = offset + BLOCK_FRAME + compressed_size as u64;
        let expected_end = match self.offsets.get(i + 1) {
            Some(&next) => next,
            None        => self.patch_size,
        };
        if end != expected_end {
            return Err(DeltaError::InvalidPatch(format!(
                "block {i} payload ends at {end}, expected {expected_end}"
            )));
        }

        let mut payload = vec![0u8; compressed_size as usize];
        self.file
            .read_exact(&mut payload)
            .map_err(|_| DeltaError::InvalidPatch(format!("truncated payload for block {i}")))?;
        Ok((original_size, payload))
    }
}

// ── Info ─────────────────────────────────────────────────────────────────────

/// Header summary for tooling, with digests rendered as hex.
#[derive(Debug, Clone)]
pub struct PatchInfo {
    pub version:        u16,
    pub block_size:     u32,
    pub old_size:       u64,
    pub new_size:       u64,
    pub num_blocks:     u32,
    pub patch_size:     u64,
    pub old_sha256_hex: String,
    pub new_sha256_hex: String,
}

/// Read a patch's header fields without touching any payload.
pub fn read_patch_info<P: AsRef<Path>>(path: P) -> Result<PatchInfo, DeltaError> {
    let mut file = File::open(path.as_ref())?;
    let patch_size = file.metadata()?.len();
    let header = PatchHeader::read(&mut file)?;
    Ok(PatchInfo {
        version:        header.version,
        block_size:     header.block_size,
        old_size:       header.old_size,
        new_size:       header.new_size,
        num_blocks:     header.num_blocks,
        patch_size,
        old_sha256_hex: hex::encode(header.old_sha256),
        new_sha256_hex: hex::encode(header.new_sha256),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_two_block_patch(path: &Path) -> PatchHeader {
        let mut header = PatchHeader::new(4, 0, 8);
        header.old_sha256 = [0xAB; 32];
        assert_eq!(header.num_blocks, 2);

        let mut writer = PatchWriter::create(path, header.clone()).unwrap();
        writer.append_block(10, b"first-payload").unwrap();
        writer.append_block(20, b"second").unwrap();
        writer.finalize().unwrap();
        header
    }

    #[test]
    fn writer_reader_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.bdp");
        write_two_block_patch(&path);

        let mut reader = PatchReader::open(&path).unwrap();
        assert_eq!(reader.num_blocks(), 2);

        let (orig0, payload0) = reader.read_block(0).unwrap();
        assert_eq!(orig0, 10);
        assert_eq!(payload0, b"first-payload");

        let (orig1, payload1) = reader.read_block(1).unwrap();
        assert_eq!(orig1, 20);
        assert_eq!(payload1, b"second");

        // Rereading out of order still works — reads are positional.
        let (orig0_again, _) = reader.read_block(0).unwrap();
        assert_eq!(orig0_again, 10);
    }

    #[test]
    fn table_points_at_back_to_back_payloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.bdp");
        let header = write_two_block_patch(&path);

        let reader = PatchReader::open(&path).unwrap();
        assert_eq!(reader.offsets[0], header.data_start());
        assert_eq!(reader.offsets[1], header.data_start() + 8 + 13);
    }

    #[test]
    fn tampered_offset_entry_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.bdp");
        write_two_block_patch(&path);

        let mut bytes = std::fs::read(&path).unwrap();
        // Second table entry lives at 100 + 8.
        bytes[108] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let result = PatchReader::open(&path).and_then(|mut r| {
            r.read_block(0)?;
            r.read_block(1)
        });
        assert!(matches!(result, Err(DeltaError::InvalidPatch(_))));
    }

    #[test]
    fn inconsistent_num_blocks_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.bdp");
        write_two_block_patch(&path);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[28] = 9; // num_blocks
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            PatchReader::open(&path),
            Err(DeltaError::InvalidPatch(_))
        ));
    }

    #[test]
    fn truncated_file_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.bdp");
        write_two_block_patch(&path);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let result = PatchReader::open(&path).and_then(|mut r| {
            r.read_block(0)?;
            r.read_block(1)
        });
        assert!(matches!(result, Err(DeltaError::InvalidPatch(_))));
    }

    #[test]
    fn info_reflects_the_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.bdp");
        write_two_block_patch(&path);

        let info = read_patch_info(&path).unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.block_size, 4);
        assert_eq!(info.new_size, 8);
        assert_eq!(info.num_blocks, 2);
        assert_eq!(info.old_sha256_hex, hex::encode([0xABu8; 32]));
        assert_eq!(info.patch_size, std::fs::metadata(&path).unwrap().len());
    }
}
