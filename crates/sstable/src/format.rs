//! Sorted-file binary format constants and footer read/write helpers.
//!
//! ## File layout
//!
//! ```text
//! [data block]*            -- sorted key/value runs (see `block`)
//! [index block]*           -- interleaved with data, bottom-up tree
//! [footer: 12 x u64 LE]    -- summary statistics + root index position
//! [footer_len: u32 LE]     -- byte length of the footer fields
//! ```
//!
//! The footer is read by loading the trailing 4 bytes first, then the
//! `footer_len` bytes before them. A footer *shorter* than the current
//! schema is valid: missing fields read as zero, which is how older files
//! stay readable after new fields are appended to the schema.

use anyhow::{bail, Result};
use byteorder::{ByteOrder, LittleEndian};
use config::{Compression, ValueMode};

use crate::varint;

/// Serialized footer size for the current schema (12 u64 fields).
pub const FOOTER_BYTES: usize = 12 * 8;

/// Size of the trailing footer-length word.
pub const FOOTER_LEN_BYTES: usize = 4;

/// Block kind pointed at by an index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Data,
    Index,
}

impl BlockKind {
    #[must_use]
    pub fn from_bit(bit: u64) -> Self {
        if bit == 0 {
            BlockKind::Data
        } else {
            BlockKind::Index
        }
    }

    #[must_use]
    pub fn bit(self) -> u64 {
        match self {
            BlockKind::Data => 0,
            BlockKind::Index => 1,
        }
    }
}

/// A parent index entry's payload: where the child block lives, what kind
/// of block it is, and the largest key stored beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    pub position: u64,
    pub kind: BlockKind,
    pub last_key: Vec<u8>,
}

impl ChildRef {
    /// Serializes the reference as an index entry value:
    /// `varint(position << 1 | kind_bit)` followed by the raw last key.
    pub fn encode(&self, out: &mut Vec<u8>) {
        varint::append(out, (self.position << 1) | self.kind.bit());
        out.extend_from_slice(&self.last_key);
    }

    /// Parses an index entry value produced by [`encode`](ChildRef::encode).
    pub fn decode(value: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let word = varint::read(value, &mut pos)?;
        Ok(Self {
            position: word >> 1,
            kind: BlockKind::from_bit(word & 1),
            last_key: value[pos..].to_vec(),
        })
    }
}

/// Fixed-layout trailer summarizing a sorted file.
///
/// All counters are totals for the whole file. `last_index_position` is the
/// file offset of the root index block; it is only meaningful when
/// `index_blocks > 0` (a zero-entry file has no blocks at all).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footer {
    pub block_size: u64,
    pub block_format: u64,
    pub data_blocks: u64,
    pub compressed_data_bytes: u64,
    pub deletes: u64,
    pub index_blocks: u64,
    pub compressed_index_bytes: u64,
    pub inserts: u64,
    pub last_index_position: u64,
    pub value_size: i64,
    pub raw_key_bytes: u64,
    pub raw_value_bytes: u64,
}

impl Footer {
    /// Serializes the footer fields followed by the trailing length word.
    #[must_use]
    pub fn marshal(&self) -> Vec<u8> {
        let fields = [
            self.block_size,
            self.block_format,
            self.data_blocks,
            self.compressed_data_bytes,
            self.deletes,
            self.index_blocks,
            self.compressed_index_bytes,
            self.inserts,
            self.last_index_position,
            self.value_size as u64,
            self.raw_key_bytes,
            self.raw_value_bytes,
        ];
        let mut buf = vec![0u8; FOOTER_BYTES + FOOTER_LEN_BYTES];
        for (i, f) in fields.iter().enumerate() {
            LittleEndian::write_u64(&mut buf[i * 8..], *f);
        }
        LittleEndian::write_u32(&mut buf[FOOTER_BYTES..], FOOTER_BYTES as u32);
        buf
    }

    /// Parses a footer from the tail of a mapped file.
    pub fn unmarshal(file: &[u8]) -> Result<Self> {
        if file.len() < FOOTER_LEN_BYTES {
            bail!("file too small for a sorted-file footer");
        }
        let footer_len = LittleEndian::read_u32(&file[file.len() - FOOTER_LEN_BYTES..]) as usize;
        if footer_len % 8 != 0 || footer_len > FOOTER_BYTES {
            bail!("invalid footer length {footer_len}");
        }
        if file.len() < FOOTER_LEN_BYTES + footer_len {
            bail!("footer length {footer_len} exceeds file size");
        }
        let start = file.len() - FOOTER_LEN_BYTES - footer_len;
        let body = &file[start..start + footer_len];

        let field = |i: usize| -> u64 {
            if (i + 1) * 8 <= body.len() {
                LittleEndian::read_u64(&body[i * 8..])
            } else {
                0
            }
        };

        Ok(Self {
            block_size: field(0),
            block_format: field(1),
            data_blocks: field(2),
            compressed_data_bytes: field(3),
            deletes: field(4),
            index_blocks: field(5),
            compressed_index_bytes: field(6),
            inserts: field(7),
            last_index_position: field(8),
            value_size: field(9) as i64,
            raw_key_bytes: field(10),
            raw_value_bytes: field(11),
        })
    }

    /// Codec the file's blocks were written with.
    ///
    /// An unrecognized tag is a hard open-time error: it means the file was
    /// written by an incompatible version or is corrupt.
    pub fn compression(&self) -> Result<Compression> {
        match Compression::from_tag(self.block_format) {
            Some(c) => Ok(c),
            None => bail!("unrecognized block format tag {}", self.block_format),
        }
    }

    /// Value encoding of the file's data blocks.
    #[must_use]
    pub fn value_mode(&self) -> ValueMode {
        ValueMode::decode(self.value_size)
    }

    /// True when the file holds no entries (and therefore no blocks).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data_blocks == 0
    }
}
