//! Reconstruction instructions and their wire format.
//!
//! # On-disk layout (little-endian)
//!
//! ```text
//! COPY:   0x00  offset:u64  length:u32            (13 bytes)
//! INSERT: 0x01  length:u32  bytes[length]         (5 + length bytes)
//! ```
//!
//! A block payload is a bare concatenation of frames — no per-instruction
//! framing beyond the opcode and length fields.  Producers split literal
//! runs at [`MAX_INSERT_RUN`] bytes; consumers accept any length that fits
//! in a `u32` and stays within the stream.  An unknown opcode or a
//! truncated frame is a parse error.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::DeltaError;

pub const OP_COPY:   u8 = 0x00;
pub const OP_INSERT: u8 = 0x01;

/// Soft cap on a single INSERT's literal run.  Applies to producers only.
pub const MAX_INSERT_RUN: usize = 65536;

/// One reconstruction step.  Executing a block's instructions in order
/// against the old-file bytes yields exactly that block of the new file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Copy `length` bytes from the old file at `offset`.
    Copy { offset: u64, length: u32 },
    /// Append the literal bytes verbatim.
    Insert(Vec<u8>),
}

impl Instruction {
    /// Number of output bytes this instruction produces when executed.
    #[inline]
    pub fn output_len(&self) -> usize {
        match self {
            Instruction::Copy { length, .. } => *length as usize,
            Instruction::Insert(bytes)       => bytes.len(),
        }
    }

    /// Encoded size of this instruction on disk.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        match self {
            Instruction::Copy { .. }   => 13,
            Instruction::Insert(bytes) => 5 + bytes.len(),
        }
    }

    /// Append the wire encoding of this instruction to `out`.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        match self {
            Instruction::Copy { offset, length } => {
                out.push(OP_COPY);
                out.write_u64::<LittleEndian>(*offset).expect("vec write");
                out.write_u32::<LittleEndian>(*length).expect("vec write");
            }
            Instruction::Insert(bytes) => {
                out.push(OP_INSERT);
                out.write_u32::<LittleEndian>(bytes.len() as u32).expect("vec write");
                out.extend_from_slice(bytes);
            }
        }
    }
}

/// Serialize a block's instruction vector into one contiguous stream.
pub fn serialize_all(ops: &[Instruction]) -> Vec<u8> {
    let total: usize = ops.iter().map(Instruction::encoded_len).sum();
    let mut out = Vec::with_capacity(total);
    for op in ops {
        op.serialize_into(&mut out);
    }
    out
}

/// Decode one instruction from the front of `buf`.
///
/// Returns the instruction and the number of bytes consumed.  Fails on an
/// unknown opcode or a frame that runs past the end of the stream.
pub fn deserialize(buf: &[u8]) -> Result<(Instruction, usize), DeltaError> {
    let opcode = *buf
        .first()
        .ok_or_else(|| DeltaError::InvalidPatch("empty instruction stream".into()))?;

    match opcode {
        OP_COPY => {
            if buf.len() < 13 {
                return Err(DeltaError::InvalidPatch("truncated COPY frame".into()));
            }
            let offset = u64::from_le_bytes(buf[1..9].try_into().unwrap());
            let length = u32::from_le_bytes(buf[9..13].try_into().unwrap());
            Ok((Instruction::Copy { offset, length }, 13))
        }
        OP_INSERT => {
            if buf.len() < 5 {
                return Err(DeltaError::InvalidPatch("truncated INSERT frame".into()));
            }
            let length = u32::from_le_bytes(buf[1..5].try_into().unwrap()) as usize;
            let end = 5usize
                .checked_add(length)
                .ok_or_else(|| DeltaError::InvalidPatch("INSERT length overflow".into()))?;
            if buf.len() < end {
                return Err(DeltaError::InvalidPatch("truncated INSERT payload".into()));
            }
            Ok((Instruction::Insert(buf[5..end].to_vec()), end))
        }
        other => Err(DeltaError::InvalidPatch(format!(
            "unknown opcode {other:#04x}"
        ))),
    }
}

/// Decode an entire instruction stream.
pub fn deserialize_all(mut buf: &[u8]) -> Result<Vec<Instruction>, DeltaError> {
    let mut ops = Vec::new();
    while !buf.is_empty() {
        let (op, consumed) = deserialize(buf)?;
        buf = &buf[consumed..];
        ops.push(op);
    }
    Ok(ops)
}
