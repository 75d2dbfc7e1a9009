//! # Config - Strata engine configuration
//!
//! Plain-data configuration shared by the `sstable`, `merge`, and `engine`
//! crates. Kept dependency-free so every layer can use it without cycles.

use std::time::Duration;

/// Largest permitted block size in bytes.
///
/// Block offsets are 16-bit values with the low bit reserved for the
/// tombstone flag, so a block's serialized key region must stay addressable
/// in 15 bits.
pub const MAX_BLOCK_SIZE: usize = 32 * 1024;

/// Largest permitted key size in bytes.
///
/// An index block must hold at least two child pointers to make progress,
/// so keys have to be considerably smaller than half a block.
pub const MAX_KEY_SIZE: usize = 4096;

/// Block compression codec tag.
///
/// Stored in the sorted-file footer; opening a file with an unknown tag is
/// a hard error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Blocks are stored verbatim.
    Raw,
    /// Blocks pass through an LZ4 block codec.
    Lz4,
}

impl Compression {
    /// Footer encoding of this codec.
    #[must_use]
    pub fn tag(self) -> u64 {
        match self {
            Compression::Raw => 1,
            Compression::Lz4 => 2,
        }
    }

    /// Decodes a footer tag, `None` for unrecognized values.
    #[must_use]
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            1 => Some(Compression::Raw),
            2 => Some(Compression::Lz4),
            _ => None,
        }
    }
}

/// How entry values are encoded inside data blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueMode {
    /// Each value carries a varint length prefix.
    Variable,
    /// No values at all; the file is a sorted key set.
    KeysOnly,
    /// Every value is exactly this many bytes; no length prefixes.
    Fixed(u32),
}

impl ValueMode {
    /// Footer encoding: `-1` variable, `0` keys-only, `>0` fixed size.
    #[must_use]
    pub fn encode(self) -> i64 {
        match self {
            ValueMode::Variable => -1,
            ValueMode::KeysOnly => 0,
            ValueMode::Fixed(n) => i64::from(n),
        }
    }

    /// Decodes the footer field. Negative means variable.
    #[must_use]
    pub fn decode(v: i64) -> Self {
        match v {
            v if v < 0 => ValueMode::Variable,
            0 => ValueMode::KeysOnly,
            v => ValueMode::Fixed(v as u32),
        }
    }
}

/// Engine configuration.
///
/// `Default` gives a setup suitable for tests and small embedded use:
/// 8 KiB LZ4 blocks, variable-length values, 10 MiB level-1 target with a
/// 10x growth factor, hourly merge safety timer, 1024-block cache.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target serialized block size in bytes. Must be `<=` [`MAX_BLOCK_SIZE`].
    pub block_size: usize,
    /// Value encoding for data blocks.
    pub value_mode: ValueMode,
    /// Block codec for both data and index blocks.
    pub compression: Compression,
    /// Target size of the level-1 file in bytes.
    pub base_size: u64,
    /// Growth factor between adjacent levels: level N targets
    /// `base_size * multiplier^(N-1)` bytes.
    pub multiplier: u64,
    /// Idle period after which the merge loop wakes even without a signal.
    pub merge_frequency: Duration,
    /// Shared block-cache capacity in blocks. `0` disables caching.
    pub cache_blocks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 8 * 1024,
            value_mode: ValueMode::Variable,
            compression: Compression::Lz4,
            base_size: 10 << 20,
            multiplier: 10,
            merge_frequency: Duration::from_secs(60 * 60),
            cache_blocks: 1024,
        }
    }
}

impl Config {
    /// Returns an error message if the configuration is unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size < 64 || self.block_size > MAX_BLOCK_SIZE {
            return Err(format!(
                "block_size {} out of range (64..={})",
                self.block_size, MAX_BLOCK_SIZE
            ));
        }
        if self.multiplier < 2 {
            return Err(format!("multiplier {} must be at least 2", self.multiplier));
        }
        if self.base_size == 0 {
            return Err("base_size must be non-zero".to_string());
        }
        Ok(())
    }
}
