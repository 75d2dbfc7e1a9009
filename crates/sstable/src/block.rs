//! Block codec: one sorted run of entries serialized for O(log n) lookup.
//!
//! ## Uncompressed payload layout
//!
//! ```text
//! varint(count)
//! offset_table: count x u16 LE     -- (body_start << 1) | tombstone
//! body, per entry:
//!     varint(key_len << 1 | tombstone)
//!     key bytes
//!     [varint(val_len)]            -- Variable mode only
//!     [value bytes]                -- absent in KeysOnly mode
//! ```
//!
//! Tombstone entries store the key alone; both value fields are omitted
//! whatever the mode.
//!
//! Data blocks and index blocks share this layout; an index block's "value"
//! is an encoded [`ChildRef`]. Offsets are 16-bit with the low bit used for
//! the tombstone flag, which is what caps the practical block size at 32 KiB
//! and key size at a few KiB.
//!
//! The whole payload passes through a [`Compressor`](crate::Compressor) on
//! the way to disk. Decoding validates every offset and length once up
//! front, so the accessors can stay infallible.

use anyhow::{bail, Result};
use byteorder::{ByteOrder, LittleEndian};
use config::ValueMode;

use crate::compress::{self, Compressor};
use crate::varint;

/// Outcome of a key search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    /// No entry with a key `>=` the probe exists.
    NotFound,
    /// Exact match.
    Found,
    /// Landed on the smallest entry with a key `>` the probe (or, for
    /// backward-approaching callers, its predecessor).
    FoundGreater,
}

impl FindResult {
    /// True when the cursor landed on some entry, exact or not.
    #[must_use]
    pub fn any(self) -> bool {
        !matches!(self, FindResult::NotFound)
    }
}

/// Per-block statistics handed to the caller after a flush, used to build
/// the parent index entry.
#[derive(Debug, Clone)]
pub struct BlockStats {
    pub first_key: Vec<u8>,
    pub last_key: Vec<u8>,
    pub inserts: u64,
    pub deletes: u64,
}

/// Accumulates sorted entries and serializes them as one block.
///
/// Callers must check [`has_space`](BlockBuilder::has_space) before every
/// [`add`](BlockBuilder::add); adding past the 15-bit offset range is a
/// contract violation and panics.
pub struct BlockBuilder {
    offsets: Vec<u16>,
    body: Vec<u8>,
    payload: Vec<u8>,
    value_mode: ValueMode,
    block_size: usize,
    min_entries: usize,
    inserts: u64,
    deletes: u64,
}

impl BlockBuilder {
    /// `min_entries` is 1 for data blocks. Index blocks pass 2: an index
    /// node with a single child would never shrink the problem and the
    /// hierarchy could recurse upward forever.
    #[must_use]
    pub fn new(block_size: usize, value_mode: ValueMode, min_entries: usize) -> Self {
        Self {
            offsets: Vec::new(),
            body: Vec::new(),
            payload: Vec::new(),
            value_mode,
            block_size,
            min_entries,
            inserts: 0,
            deletes: 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether one more entry of the given size fits the configured block
    /// size. Always true while the block holds fewer than `min_entries`.
    #[must_use]
    pub fn has_space(&self, key_len: usize, val_len: usize) -> bool {
        if self.offsets.len() < self.min_entries {
            return true;
        }
        let entry = varint::len((key_len as u64) << 1)
            + key_len
            + match self.value_mode {
                ValueMode::Variable => varint::len(val_len as u64) + val_len,
                ValueMode::Fixed(_) | ValueMode::KeysOnly => val_len,
            };
        let count = self.offsets.len() + 1;
        let payload = varint::len(count as u64) + count * 2 + self.body.len() + entry;
        // Frame overhead: the two length varints the compressor prepends.
        let total = payload + 2 * varint::len(payload as u64);
        total <= self.block_size
    }

    /// Appends an entry. The caller has already verified ordering and space.
    pub fn add(&mut self, key: &[u8], value: &[u8], tombstone: bool) {
        let start = self.body.len();
        assert!(
            start <= i16::MAX as usize,
            "block offset overflow; has_space was not checked"
        );
        self.offsets.push(((start as u16) << 1) | u16::from(tombstone));
        varint::append(&mut self.body, ((key.len() as u64) << 1) | u64::from(tombstone));
        self.body.extend_from_slice(key);
        // Tombstones carry no value bytes in any mode; the tombstone bit in
        // the offset table tells the decoder to skip the value fields.
        if !tombstone {
            match self.value_mode {
                ValueMode::Variable => {
                    varint::append(&mut self.body, value.len() as u64);
                    self.body.extend_from_slice(value);
                }
                ValueMode::Fixed(n) => {
                    debug_assert_eq!(value.len(), n as usize);
                    self.body.extend_from_slice(value);
                }
                ValueMode::KeysOnly => {}
            }
        }
        if tombstone {
            self.deletes += 1;
        } else {
            self.inserts += 1;
        }
    }

    /// Reads back the key at `idx` from the serialized body.
    #[must_use]
    pub fn key_at(&self, idx: usize) -> &[u8] {
        let mut pos = usize::from(self.offsets[idx] >> 1);
        let klen = (varint::read(&self.body, &mut pos).expect("own body") >> 1) as usize;
        &self.body[pos..pos + klen]
    }

    /// Serializes the block through `codec`, appends it to `out`, and
    /// resets the builder for the next block.
    pub fn finish(&mut self, codec: &mut dyn Compressor, out: &mut Vec<u8>) -> Result<BlockStats> {
        if self.offsets.is_empty() {
            bail!("tried to write an empty block");
        }
        self.payload.clear();
        varint::append(&mut self.payload, self.offsets.len() as u64);
        for &o in &self.offsets {
            self.payload.extend_from_slice(&o.to_le_bytes());
        }
        self.payload.extend_from_slice(&self.body);
        codec.write_block(&self.payload, out)?;

        let stats = BlockStats {
            first_key: self.key_at(0).to_vec(),
            last_key: self.key_at(self.offsets.len() - 1).to_vec(),
            inserts: self.inserts,
            deletes: self.deletes,
        };
        self.offsets.clear();
        self.body.clear();
        self.inserts = 0;
        self.deletes = 0;
        Ok(stats)
    }
}

/// Byte ranges of one decoded entry inside [`Block::payload`].
#[derive(Debug, Clone, Copy)]
struct EntryMeta {
    key_start: u32,
    key_end: u32,
    val_start: u32,
    val_end: u32,
    tombstone: bool,
}

/// An immutable decoded block.
///
/// Every offset and length is validated during [`decode`](Block::decode);
/// corrupt input fails there, not in the accessors. Blocks are shared
/// between cursors via `Arc` (and the block cache), so they carry no
/// iteration state; cursors keep their own positions.
pub struct Block {
    payload: Vec<u8>,
    entries: Vec<EntryMeta>,
    position: u64,
}

impl Block {
    /// Decodes the framed block starting at `wire[0]`.
    ///
    /// `position` is the block's file offset, used as its cache identity
    /// and for cursor block-reuse checks.
    pub fn decode(
        wire: &[u8],
        compression: config::Compression,
        value_mode: ValueMode,
        position: u64,
    ) -> Result<Self> {
        let payload = compress::read_block(compression, wire)?;
        let mut pos = 0;
        let count = varint::read(&payload, &mut pos)? as usize;
        if count == 0 {
            bail!("block at {position} has zero entries");
        }
        let body_at = pos + count * 2;
        if body_at > payload.len() {
            bail!("block at {position}: offset table extends past payload");
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let off = LittleEndian::read_u16(&payload[pos + i * 2..]);
            let tombstone = off & 1 != 0;
            let mut at = body_at + usize::from(off >> 1);
            let kv = varint::read(&payload, &mut at)?;
            let klen = (kv >> 1) as usize;
            let key_start = at;
            let key_end = key_start + klen;
            if key_end > payload.len() {
                bail!("block at {position}: entry {i} key out of bounds");
            }
            at = key_end;
            let vlen = if tombstone {
                0
            } else {
                match value_mode {
                    ValueMode::Variable => varint::read(&payload, &mut at)? as usize,
                    ValueMode::Fixed(n) => n as usize,
                    ValueMode::KeysOnly => 0,
                }
            };
            let val_start = at;
            let val_end = val_start + vlen;
            if val_end > payload.len() {
                bail!("block at {position}: entry {i} value out of bounds");
            }
            entries.push(EntryMeta {
                key_start: key_start as u32,
                key_end: key_end as u32,
                val_start: val_start as u32,
                val_end: val_end as u32,
                tombstone,
            });
        }

        Ok(Self {
            payload,
            entries,
            position,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File offset this block was decoded from.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[must_use]
    pub fn key(&self, idx: usize) -> &[u8] {
        let e = &self.entries[idx];
        &self.payload[e.key_start as usize..e.key_end as usize]
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> &[u8] {
        let e = &self.entries[idx];
        &self.payload[e.val_start as usize..e.val_end as usize]
    }

    #[must_use]
    pub fn tombstone(&self, idx: usize) -> bool {
        self.entries[idx].tombstone
    }

    #[must_use]
    pub fn first_key(&self) -> &[u8] {
        self.key(0)
    }

    #[must_use]
    pub fn last_key(&self) -> &[u8] {
        self.key(self.entries.len() - 1)
    }

    /// Binary search: `Ok(i)` for an exact match, `Err(i)` with the index
    /// of the smallest entry `> key` (may equal `len()`).
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.key(mid).cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// True when `key` falls inside this block's `[first_key, last_key]`
    /// range. Used for the cursor's cached-block fast path.
    #[must_use]
    pub fn in_range(&self, key: &[u8]) -> bool {
        key >= self.first_key() && key <= self.last_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::{new_codec, read_block};
    use config::Compression;

    fn build(entries: &[(&[u8], &[u8], bool)], mode: ValueMode) -> Result<Block> {
        let mut b = BlockBuilder::new(8192, mode, 1);
        for &(k, v, t) in entries {
            assert!(b.has_space(k.len(), v.len()));
            b.add(k, v, t);
        }
        let mut codec = new_codec(Compression::Raw);
        let mut out = Vec::new();
        b.finish(codec.as_mut(), &mut out)?;
        Block::decode(&out, Compression::Raw, mode, 0)
    }

    #[test]
    fn round_trip_preserves_order_and_tombstones() -> Result<()> {
        let entries: Vec<(Vec<u8>, Vec<u8>, bool)> = (0u32..100)
            .map(|i| {
                let tombstone = i % 7 == 0;
                let value = if tombstone {
                    Vec::new()
                } else {
                    format!("value-{i}").into_bytes()
                };
                (i.to_be_bytes().to_vec(), value, tombstone)
            })
            .collect();
        let borrowed: Vec<(&[u8], &[u8], bool)> = entries
            .iter()
            .map(|(k, v, t)| (k.as_slice(), v.as_slice(), *t))
            .collect();
        let block = build(&borrowed, ValueMode::Variable)?;

        assert_eq!(block.len(), 100);
        for (i, (k, v, t)) in entries.iter().enumerate() {
            assert_eq!(block.key(i), k.as_slice());
            assert_eq!(block.value(i), v.as_slice());
            assert_eq!(block.tombstone(i), *t);
        }
        Ok(())
    }

    #[test]
    fn search_finds_exact_and_insertion_points() -> Result<()> {
        let block = build(
            &[
                (b"banana", b"1", false),
                (b"cherry", b"2", false),
                (b"fig", b"3", false),
            ],
            ValueMode::Variable,
        )?;
        assert_eq!(block.search(b"cherry"), Ok(1));
        assert_eq!(block.search(b"apple"), Err(0));
        assert_eq!(block.search(b"date"), Err(2));
        assert_eq!(block.search(b"grape"), Err(3));
        Ok(())
    }

    #[test]
    fn keys_only_mode_stores_no_values() -> Result<()> {
        let block = build(
            &[(b"a", b"", false), (b"b", b"", true)],
            ValueMode::KeysOnly,
        )?;
        assert_eq!(block.value(0), b"");
        assert!(block.tombstone(1));
        Ok(())
    }

    #[test]
    fn fixed_mode_omits_length_prefixes() -> Result<()> {
        let fixed = build(
            &[(b"k1", b"12345678", false), (b"k2", b"abcdefgh", false)],
            ValueMode::Fixed(8),
        )?;
        assert_eq!(fixed.value(0), b"12345678");
        assert_eq!(fixed.value(1), b"abcdefgh");
        Ok(())
    }

    #[test]
    fn has_space_respects_block_size_but_admits_minimum() {
        let mut b = BlockBuilder::new(64, ValueMode::Variable, 2);
        // First two entries always fit regardless of configured size.
        assert!(b.has_space(40, 40));
        b.add(&[1u8; 40], &[0u8; 40], false);
        assert!(b.has_space(40, 40));
        b.add(&[2u8; 40], &[0u8; 40], false);
        assert!(!b.has_space(40, 40));
    }

    #[test]
    fn stats_report_first_last_and_counts() -> Result<()> {
        let mut b = BlockBuilder::new(8192, ValueMode::Variable, 1);
        b.add(b"alpha", b"1", false);
        b.add(b"beta", b"", true);
        b.add(b"gamma", b"3", false);
        let mut codec = new_codec(Compression::Raw);
        let mut out = Vec::new();
        let stats = b.finish(codec.as_mut(), &mut out)?;
        assert_eq!(stats.first_key, b"alpha");
        assert_eq!(stats.last_key, b"gamma");
        assert_eq!(stats.inserts, 2);
        assert_eq!(stats.deletes, 1);
        assert!(b.is_empty());
        Ok(())
    }

    #[test]
    fn corrupt_payload_fails_decode_not_access() -> Result<()> {
        let mut b = BlockBuilder::new(8192, ValueMode::Variable, 1);
        b.add(b"key", b"value", false);
        let mut codec = new_codec(Compression::Raw);
        let mut out = Vec::new();
        b.finish(codec.as_mut(), &mut out)?;

        // Sanity: the untouched wire decodes.
        let mut payload = read_block(Compression::Raw, &out)?;
        assert!(Block::decode(&out, Compression::Raw, ValueMode::Variable, 0).is_ok());

        // Inflate the claimed entry count so offsets run past the payload.
        payload[0] = 200;
        let mut codec = new_codec(Compression::Raw);
        let mut wire = Vec::new();
        codec.write_block(&payload, &mut wire)?;
        assert!(Block::decode(&wire, Compression::Raw, ValueMode::Variable, 0).is_err());
        Ok(())
    }
}
