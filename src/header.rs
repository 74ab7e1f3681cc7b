//! Patch header — format anchor at offset 0.
//!
//! # On-disk layout (100 bytes packed, all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic        = "UEBD"  (4 ASCII bytes)
//!    4      2   version      = 1       (LE u16)
//!    6      2   flags        = 0       (reserved, LE u16)
//!    8      4   block_size   bytes per block             (LE u32)
//!   12      8   old_size     old file length in bytes    (LE u64)
//!   20      8   new_size     new file length in bytes    (LE u64)
//!   28      4   num_blocks   = ceil(new_size/block_size) (LE u32)
//!   32      4   reserved     = 0                         (LE u32)
//!   36     32   old_sha256   zeros when created with verify=false
//!   68     32   new_sha256
//! ```
//!
//! The block-offset table (`u64 × num_blocks`, little-endian) follows at
//! offset 100; entry `i` is the absolute file offset of block `i`'s
//! payload.  Offsets are strictly increasing and always land past the
//! header+table region.
//!
//! # Endianness
//! Every numeric field is little-endian.  This is frozen for version 1;
//! a layout change bumps the version, never reinterprets these bytes.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::DeltaError;

pub const MAGIC: &[u8; 4] = b"UEBD";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct PatchHeader {
    pub version:    u16,
    pub flags:      u16,
    pub block_size: u32,
    pub old_size:   u64,
    pub new_size:   u64,
    pub num_blocks: u32,
    pub old_sha256: [u8; 32],
    pub new_sha256: [u8; 32],
}

impl PatchHeader {
    pub fn new(block_size: u32, old_size: u64, new_size: u64) -> Self {
        let num_blocks = block_count(new_size, block_size);
        debug_assert!(num_blocks <= u32::MAX as u64, "block count exceeds u32");
        Self {
            version:    FORMAT_VERSION,
            flags:      0,
            block_size,
            old_size,
            new_size,
            num_blocks: num_blocks as u32,
            old_sha256: [0u8; 32],
            new_sha256: [0u8; 32],
        }
    }

    /// Byte offset where block payloads begin: header plus offset table.
    #[inline]
    pub fn data_start(&self) -> u64 {
        HEADER_SIZE as u64 + self.num_blocks as u64 * 8
    }

    /// Write the packed 100-byte header.
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        buf[12..20].copy_from_slice(&self.old_size.to_le_bytes());
        buf[20..28].copy_from_slice(&self.new_size.to_le_bytes());
        buf[28..32].copy_from_slice(&self.num_blocks.to_le_bytes());
        // buf[32..36] stays zero (reserved).
        buf[36..68].copy_from_slice(&self.old_sha256);
        buf[68..100].copy_from_slice(&self.new_sha256);
        w.write_all(&buf)
    }

    /// Read and validate a header.  Magic, version, and a nonzero
    /// `block_size` are checked here; cross-field consistency is the
    /// reader's job.
    pub fn read<R: Read>(mut r: R) -> Result<Self, DeltaError> {
        let mut buf = [0u8; HEADER_SIZE];
        r.read_exact(&mut buf)
            .map_err(|_| DeltaError::InvalidPatch("file shorter than the patch header".into()))?;

        if &buf[0..4] != MAGIC {
            return Err(DeltaError::InvalidPatch("bad magic — not a patch file".into()));
        }
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(DeltaError::InvalidPatch(format!(
                "unsupported version {version} (this build reads v{FORMAT_VERSION})"
            )));
        }

        let flags      = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        let block_size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let old_size   = u64::from_le_bytes(buf[12..20].try_into().unwrap());
        let new_size   = u64::from_le_bytes(buf[20..28].try_into().unwrap());
        let num_blocks = u32::from_le_bytes(buf[28..32].try_into().unwrap());

        if block_size == 0 {
            return Err(DeltaError::InvalidPatch("block_size is zero".into()));
        }

        Ok(Self {
            version,
            flags,
            block_size,
            old_size,
            new_size,
            num_blocks,
            old_sha256: buf[36..68].try_into().unwrap(),
            new_sha256: buf[68..100].try_into().unwrap(),
        })
    }
}

/// `ceil(new_size / block_size)` — zero for an empty new file.
pub fn block_count(new_size: u64, block_size: u32) -> u64 {
    if new_size == 0 {
        0
    } else {
        new_size.div_ceil(block_size as u64)
    }
}

/// Write the block-offset table.
pub fn write_offsets<W: Write>(mut w: W, offsets: &[u64]) -> io::Result<()> {
    for &off in offsets {
        w.write_u64::<LittleEndian>(off)?;
    }
    Ok(())
}

/// Read `num_blocks` table entries.
pub fn read_offsets<R: Read>(mut r: R, num_blocks: u32) -> Result<Vec<u64>, DeltaError> {
    let mut offsets = Vec::with_capacity(num_blocks as usize);
    for _ in 0..num_blocks {
        let off = r
            .read_u64::<LittleEndian>()
            .map_err(|_| DeltaError::InvalidPatch("truncated block-offset table".into()))?;
        offsets.push(off);
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_read_roundtrip() {
        let mut header = PatchHeader::new(65536, 1000, 2000);
        header.old_sha256 = [0x11; 32];
        header.new_sha256 = [0x22; 32];

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let parsed = PatchHeader::read(Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.version, FORMAT_VERSION);
        assert_eq!(parsed.block_size, 65536);
        assert_eq!(parsed.old_size, 1000);
        assert_eq!(parsed.new_size, 2000);
        assert_eq!(parsed.num_blocks, 1);
        assert_eq!(parsed.old_sha256, [0x11; 32]);
        assert_eq!(parsed.new_sha256, [0x22; 32]);
    }

    #[test]
    fn field_offsets_are_packed() {
        let header = PatchHeader::new(1024, 7, 9);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();

        assert_eq!(&buf[0..4], b"UEBD");
        assert_eq!(u16::from_le_bytes(buf[4..6].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(buf[8..12].try_into().unwrap()), 1024);
        assert_eq!(u64::from_le_bytes(buf[12..20].try_into().unwrap()), 7);
        assert_eq!(u64::from_le_bytes(buf[20..28].try_into().unwrap()), 9);
        assert_eq!(u32::from_le_bytes(buf[28..32].try_into().unwrap()), 1);
        assert_eq!(&buf[32..36], &[0, 0, 0, 0]);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        PatchHeader::new(1024, 0, 0).write(&mut buf).unwrap();
        buf[0] = b'X';
        assert!(matches!(
            PatchHeader::read(Cursor::new(&buf)),
            Err(DeltaError::InvalidPatch(_))
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut buf = Vec::new();
        PatchHeader::new(1024, 0, 0).write(&mut buf).unwrap();
        buf[4] = 2;
        assert!(PatchHeader::read(Cursor::new(&buf)).is_err());
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let mut buf = Vec::new();
        PatchHeader::new(1024, 0, 0).write(&mut buf).unwrap();
        buf[8..12].copy_from_slice(&0u32.to_le_bytes());
        assert!(PatchHeader::read(Cursor::new(&buf)).is_err());
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(PatchHeader::read(Cursor::new(&[0u8; 50])).is_err());
    }

    #[test]
    fn block_count_edges() {
        assert_eq!(block_count(0, 1024), 0);
        assert_eq!(block_count(1, 1024), 1);
        assert_eq!(block_count(1024, 1024), 1);
        assert_eq!(block_count(1025, 1024), 2);
    }

    #[test]
    fn offset_table_roundtrip() {
        let offsets = [100u64, 250, 4096];
        let mut buf = Vec::new();
        write_offsets(&mut buf, &offsets).unwrap();
        assert_eq!(buf.len(), 24);
        assert_eq!(read_offsets(Cursor::new(&buf), 3).unwrap(), offsets);
        assert!(read_offsets(Cursor::new(&buf), 4).is_err());
    }
}
