//! # Sorted files
//!
//! Immutable, on-disk sorted key/value files for the Strata storage engine.
//! Files are *write-once, read-many*: the writer streams entries in key
//! order, the reader memory-maps the result, and compaction replaces whole
//! files rather than editing them.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS (sorted key/value runs)                           │
//! │                                                               │
//! │ each block framed as varint(raw_len) | varint(stored_len)     │
//! │ | payload, where the payload is raw or lz4 per the footer.    │
//! │ See `block` for the payload layout.                           │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCKS (bottom-up tree, interleaved with data)          │
//! │                                                               │
//! │ same block layout; entries are keyed by the child's first     │
//! │ key and carry varint(position << 1 | kind) | child_last_key.  │
//! │ An index block written mid-stream lands between data blocks;  │
//! │ the root is always last.                                      │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (12 x u64 LE)                                          │
//! │                                                               │
//! │ block_size | block_format | data_blocks | data_bytes          │
//! │ | deletes | index_blocks | index_bytes | inserts              │
//! │ | last_index_position | value_size | raw_key_bytes            │
//! │ | raw_value_bytes                                             │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER LENGTH (u32 LE, always last 4 bytes)                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. A reader tolerates footers shorter than
//! the current schema; fields past the stored length read as zero.

mod block;
mod cache;
mod compress;
mod format;
mod reader;
mod varint;
mod writer;

pub use block::{Block, BlockBuilder, BlockStats, FindResult};
pub use cache::BlockCache;
pub use compress::{new_codec, read_block, Compressor};
pub use format::{BlockKind, ChildRef, Footer, FOOTER_BYTES, FOOTER_LEN_BYTES};
pub use reader::{FileCursor, FileReader};
pub use writer::FileWriter;

#[cfg(test)]
mod tests;
