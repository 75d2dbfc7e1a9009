//! Streaming sorted-file writer.
//!
//! Entries arrive in ascending key order and are packed into data blocks.
//! Each finished data block contributes one entry to the level-0 index
//! builder; when an index builder fills, its block is flushed and summarized
//! one level up. Memory stays proportional to one block per index level, so
//! arbitrarily large files can be written in a single pass.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use config::{Config, ValueMode, MAX_KEY_SIZE};

use crate::block::BlockBuilder;
use crate::compress::{new_codec, Compressor};
use crate::format::{BlockKind, ChildRef, Footer};
use crate::varint;

const WRITE_BUF_SIZE: usize = 8 << 20;

/// One index level under construction.
///
/// Entries are keyed by the child block's first key; the value encodes the
/// child's position, kind, and last key (see [`ChildRef`]). `last_child_key`
/// remembers the most recent child's last key, which becomes the flushed
/// block's own `ChildRef::last_key` one level up.
struct IndexLevel {
    block: BlockBuilder,
    last_child_key: Vec<u8>,
}

impl IndexLevel {
    fn new(block_size: usize) -> Self {
        // Index blocks insist on two children per block so the tree always
        // narrows toward the root.
        Self {
            block: BlockBuilder::new(block_size, ValueMode::Variable, 2),
            last_child_key: Vec::new(),
        }
    }
}

/// Writes one sorted file: data blocks, an index tree, and a footer.
///
/// Keys must be added in strictly ascending order. The writer creates the
/// file at the exact path it is given; callers wanting atomicity write to a
/// temporary name and rename after [`commit`](FileWriter::commit) returns.
pub struct FileWriter {
    file: BufWriter<File>,
    position: u64,
    data: BlockBuilder,
    /// `index[0]` holds the parents of data blocks, `index[1]` their
    /// parents, and so on. The last element is the root in progress.
    index: Vec<IndexLevel>,
    codec: Box<dyn Compressor>,
    block_size: usize,
    value_mode: ValueMode,
    footer: Footer,
    last_key: Vec<u8>,
    wire: Vec<u8>,
}

impl FileWriter {
    /// Creates (truncating) the file at `path` and prepares an empty writer.
    ///
    /// # Errors
    ///
    /// Fails on an invalid [`Config`] or if the file cannot be created.
    pub fn create(path: &Path, config: &Config) -> Result<Self> {
        if let Err(e) = config.validate() {
            bail!("invalid config: {e}");
        }
        let raw = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("create {}", path.display()))?;
        let footer = Footer {
            block_size: config.block_size as u64,
            block_format: config.compression.tag(),
            value_size: config.value_mode.encode(),
            ..Footer::default()
        };
        Ok(Self {
            file: BufWriter::with_capacity(WRITE_BUF_SIZE, raw),
            position: 0,
            data: BlockBuilder::new(config.block_size, config.value_mode, 1),
            index: Vec::new(),
            codec: new_codec(config.compression),
            block_size: config.block_size,
            value_mode: config.value_mode,
            footer,
            last_key: Vec::new(),
            wire: Vec::new(),
        })
    }

    /// Appends one entry. A tombstone records a deletion; its value must be
    /// empty.
    ///
    /// # Errors
    ///
    /// Fails when the key is empty, oversized, or not strictly greater than
    /// the previous key, when the value length does not match a
    /// `ValueMode::Fixed` configuration, or on I/O error while flushing a
    /// filled block.
    pub fn add(&mut self, key: &[u8], value: &[u8], tombstone: bool) -> Result<()> {
        if key.is_empty() {
            bail!("empty key");
        }
        if key.len() > MAX_KEY_SIZE {
            bail!("key length {} exceeds maximum {}", key.len(), MAX_KEY_SIZE);
        }
        if !self.last_key.is_empty() && key <= self.last_key.as_slice() {
            bail!("keys out of order: {:?} after {:?}", key, self.last_key);
        }
        if tombstone {
            if !value.is_empty() {
                bail!("tombstone carries a value of length {}", value.len());
            }
        } else if let ValueMode::Fixed(n) = self.value_mode {
            if value.len() != n as usize {
                bail!("value length {} != fixed size {n}", value.len());
            }
        }

        if !self.data.has_space(key.len(), value.len()) {
            self.flush_data()?;
        }
        self.data.add(key, value, tombstone);
        self.footer.raw_key_bytes += key.len() as u64;
        self.footer.raw_value_bytes += value.len() as u64;
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        Ok(())
    }

    /// Flushes the pending data block and records it in the index.
    fn flush_data(&mut self) -> Result<()> {
        if self.data.is_empty() {
            return Ok(());
        }
        let at = self.position;
        self.wire.clear();
        let stats = self.data.finish(self.codec.as_mut(), &mut self.wire)?;
        self.file.write_all(&self.wire)?;
        self.position += self.wire.len() as u64;
        self.footer.data_blocks += 1;
        self.footer.compressed_data_bytes += self.position - at;
        self.footer.inserts += stats.inserts;
        self.footer.deletes += stats.deletes;
        let first_key = stats.first_key;
        self.add_to_index(
            0,
            &first_key,
            ChildRef {
                position: at,
                kind: BlockKind::Data,
                last_key: stats.last_key,
            },
        )
    }

    /// Flushes index level `level` and pushes its summary one level up.
    fn flush_index(&mut self, level: usize) -> Result<()> {
        let at = self.position;
        self.wire.clear();
        let stats = self.index[level]
            .block
            .finish(self.codec.as_mut(), &mut self.wire)?;
        self.file.write_all(&self.wire)?;
        self.position += self.wire.len() as u64;
        self.footer.index_blocks += 1;
        self.footer.compressed_index_bytes += self.position - at;
        self.footer.last_index_position = at;
        // The flushed block covers keys from its first child's first key
        // through its last child's last key.
        let last_key = std::mem::take(&mut self.index[level].last_child_key);
        self.add_to_index(
            level + 1,
            &stats.first_key,
            ChildRef {
                position: at,
                kind: BlockKind::Index,
                last_key,
            },
        )
    }

    /// Records `child`, keyed by its first key, at index level `level`,
    /// flushing that level first if the new entry does not fit.
    fn add_to_index(&mut self, level: usize, first_key: &[u8], child: ChildRef) -> Result<()> {
        if level == self.index.len() {
            self.index.push(IndexLevel::new(self.block_size));
        }
        let val_len =
            varint::len((child.position << 1) | child.kind.bit()) + child.last_key.len();
        if !self.index[level].block.has_space(first_key.len(), val_len) {
            self.flush_index(level)?;
        }
        let mut value = Vec::with_capacity(val_len);
        child.encode(&mut value);
        self.index[level].block.add(first_key, &value, false);
        self.index[level].last_child_key = child.last_key;
        Ok(())
    }

    /// Flushes everything, writes the footer, and syncs the file to disk.
    ///
    /// A writer that never saw an entry commits a valid empty file: a bare
    /// footer with zero block counts.
    ///
    /// # Errors
    ///
    /// Fails on I/O error; the file is unusable in that case and should be
    /// deleted by the caller.
    pub fn commit(mut self) -> Result<Footer> {
        self.flush_data()?;

        // Flush index levels bottom-up. Flushing a level adds its summary
        // to the level above, which may itself grow new levels; re-reading
        // `len()` each iteration picks those up. The top level's block has
        // no parent to summarize into; it is the root the footer points at.
        let mut level = 0;
        while level < self.index.len() {
            if !self.index[level].block.is_empty() {
                if level + 1 < self.index.len() {
                    self.flush_index(level)?;
                } else {
                    let at = self.position;
                    self.wire.clear();
                    self.index[level]
                        .block
                        .finish(self.codec.as_mut(), &mut self.wire)?;
                    self.file.write_all(&self.wire)?;
                    self.position += self.wire.len() as u64;
                    self.footer.index_blocks += 1;
                    self.footer.compressed_index_bytes += self.position - at;
                    self.footer.last_index_position = at;
                }
            }
            level += 1;
        }

        let trailer = self.footer.marshal();
        self.file.write_all(&trailer)?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(self.footer)
    }
}
