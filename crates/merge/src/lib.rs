//! Multi-file read path and compaction machinery.
//!
//! A [`Snapshot`] pins a set of sorted files open; a [`MergeCursor`] reads
//! them as one ordered, newest-wins stream; a [`Merger`] rewrites a run of
//! files into a single replacement and atomically swaps it in.

mod cursor;
mod merger;
mod reader;

pub use cursor::MergeCursor;
pub use merger::{tmp_path, Merger};
pub use reader::Snapshot;
