//! A point-in-time set of open sorted files.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sstable::{BlockCache, FileReader, Footer};

use crate::cursor::MergeCursor;

/// An immutable view over a set of sorted files, ordered newest first.
///
/// Snapshots are shared behind `Arc`: readers keep the one they started
/// with while the engine swaps in a replacement after compaction. Files
/// close when the last snapshot (and every cursor cloned from it) drops.
pub struct Snapshot {
    files: Vec<Arc<FileReader>>,
}

impl Snapshot {
    /// Opens every path in order. `paths` must run newest to oldest; the
    /// merge cursor resolves duplicate keys in favor of earlier files.
    pub fn open<P: AsRef<Path>>(paths: &[P], cache: &Arc<BlockCache>) -> Result<Self> {
        let mut files = Vec::with_capacity(paths.len());
        for p in paths {
            let p = p.as_ref();
            let reader = FileReader::open(p, Arc::clone(cache))
                .with_context(|| format!("open {}", p.display()))?;
            files.push(Arc::new(reader));
        }
        Ok(Self { files })
    }

    #[must_use]
    pub fn files(&self) -> &[Arc<FileReader>] {
        &self.files
    }

    /// Footers of every file, newest first.
    #[must_use]
    pub fn footers(&self) -> Vec<Footer> {
        self.files.iter().map(|f| f.footer().clone()).collect()
    }

    /// Total on-disk bytes across the snapshot.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.files.iter().map(|f| f.size()).sum()
    }

    /// Opens a merging cursor over every file in the snapshot.
    pub fn cursor(&self) -> Result<MergeCursor> {
        let mut cursors = Vec::with_capacity(self.files.len());
        for f in &self.files {
            cursors.push(f.cursor()?);
        }
        Ok(MergeCursor::new(cursors))
    }
}
