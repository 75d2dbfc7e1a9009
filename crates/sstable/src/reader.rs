//! Memory-mapped sorted-file reader and its navigating cursor.
//!
//! A [`FileReader`] maps the file once and hands out decoded blocks through
//! the shared [`BlockCache`]. A [`FileCursor`] walks the index tree with a
//! stack of frames, one per level, reusing as much of the previous descent
//! as the probe key allows.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use config::{Compression, ValueMode};
use memmap2::Mmap;

use crate::block::{Block, FindResult};
use crate::cache::BlockCache;
use crate::format::{BlockKind, ChildRef, Footer, FOOTER_LEN_BYTES};

/// Process-wide id source for cache keys. Ids are never reused, so stale
/// cache entries for closed files simply age out.
static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// An open, immutable sorted file.
///
/// The whole file is memory-mapped read-only. Files are written once and
/// renamed into place, never modified, which is what makes the map sound.
pub struct FileReader {
    map: Mmap,
    footer: Footer,
    compression: Compression,
    value_mode: ValueMode,
    cache: Arc<BlockCache>,
    id: u64,
    path: PathBuf,
}

impl FileReader {
    /// Maps `path` and validates its footer.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or mapped, is too short to hold
    /// a footer, or declares an unknown block format tag.
    pub fn open(path: &Path, cache: Arc<BlockCache>) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mmap {}", path.display()))?;
        let footer = Footer::unmarshal(&map)
            .with_context(|| format!("footer of {}", path.display()))?;
        let compression = footer.compression()?;
        let value_mode = footer.value_mode();
        Ok(Self {
            map,
            footer,
            compression,
            value_mode,
            cache,
            id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// On-disk size in bytes, used for compaction level accounting.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.map.len() as u64
    }

    /// Loads the block at `position`, consulting the cache first.
    pub fn read_block(&self, position: u64, kind: BlockKind) -> Result<Arc<Block>> {
        if let Some(block) = self.cache.get(self.id, position) {
            return Ok(block);
        }
        let at = position as usize;
        let body_end = self.map.len().saturating_sub(FOOTER_LEN_BYTES);
        if at >= body_end {
            bail!(
                "block position {position} out of range in {}",
                self.path.display()
            );
        }
        let mode = match kind {
            BlockKind::Data => self.value_mode,
            BlockKind::Index => ValueMode::Variable,
        };
        let block = Block::decode(&self.map[at..], self.compression, mode, position)
            .with_context(|| format!("decode block in {}", self.path.display()))?;
        let block = Arc::new(block);
        self.cache.insert(self.id, position, block.clone());
        Ok(block)
    }

    /// Opens a cursor rooted at the file's top index block. An empty file
    /// yields a cursor whose every movement reports exhaustion.
    pub fn cursor(self: &Arc<Self>) -> Result<FileCursor> {
        let mut indexes = Vec::new();
        if !self.footer.is_empty() {
            let root = self.read_block(self.footer.last_index_position, BlockKind::Index)?;
            indexes.push(Frame { block: root, idx: 0 });
        }
        Ok(FileCursor {
            file: Arc::clone(self),
            indexes,
            data: None,
        })
    }
}

/// One level of a descent: a block plus the entry the cursor sits on.
struct Frame {
    block: Arc<Block>,
    idx: usize,
}

impl Frame {
    fn at_end(block: &Arc<Block>, dir: Dir) -> Frame {
        let idx = match dir {
            Dir::Forward => 0,
            Dir::Reverse => block.len() - 1,
        };
        Frame {
            block: Arc::clone(block),
            idx,
        }
    }

    fn advance(&mut self, dir: Dir) -> bool {
        match dir {
            Dir::Forward => {
                if self.idx + 1 < self.block.len() {
                    self.idx += 1;
                    true
                } else {
                    false
                }
            }
            Dir::Reverse => {
                if self.idx > 0 {
                    self.idx -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn child(&self) -> Result<ChildRef> {
        ChildRef::decode(self.block.value(self.idx))
    }

    /// Positions the frame at the last entry whose key is `<=` the probe
    /// and reports whether the probe can lie under that child.
    fn seek(&mut self, key: &[u8]) -> Result<bool> {
        match self.block.search(key) {
            Ok(i) => {
                self.idx = i;
                Ok(true)
            }
            Err(i) => {
                self.idx = i.saturating_sub(1);
                let child = self.child()?;
                Ok(key <= child.last_key.as_slice())
            }
        }
    }

    /// Whether `key` falls within the span this index block covers, from
    /// its first child's first key to its last child's last key.
    fn covers(&self, key: &[u8]) -> Result<bool> {
        if key < self.block.first_key() {
            return Ok(false);
        }
        let last = ChildRef::decode(self.block.value(self.block.len() - 1))?;
        Ok(key <= last.last_key.as_slice())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Dir {
    Forward,
    Reverse,
}

/// Iterates one sorted file in either direction.
///
/// The cursor is positioned after any call that returns `true` (or a
/// [`FindResult`] other than `NotFound`); only then may the entry
/// accessors be used.
pub struct FileCursor {
    file: Arc<FileReader>,
    /// Index frames from root (first) to the data block's parent (last).
    /// Empty only for an empty file.
    indexes: Vec<Frame>,
    data: Option<Frame>,
}

impl FileCursor {
    /// Key of the current entry.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is not positioned on an entry.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        let f = self.data.as_ref().expect("cursor is not positioned");
        f.block.key(f.idx)
    }

    /// Value of the current entry. Empty for tombstones.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is not positioned on an entry.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        let f = self.data.as_ref().expect("cursor is not positioned");
        f.block.value(f.idx)
    }

    /// Whether the current entry is a deletion marker.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is not positioned on an entry.
    #[must_use]
    pub fn tombstone(&self) -> bool {
        let f = self.data.as_ref().expect("cursor is not positioned");
        f.block.tombstone(f.idx)
    }

    /// Moves to the smallest key in the file.
    pub fn first(&mut self) -> Result<bool> {
        self.first_last(Dir::Forward)
    }

    /// Moves to the largest key in the file.
    pub fn last(&mut self) -> Result<bool> {
        self.first_last(Dir::Reverse)
    }

    /// Moves to the next larger key, returning false at the end.
    pub fn next(&mut self) -> Result<bool> {
        self.step(Dir::Forward)
    }

    /// Moves to the next smaller key, returning false at the start.
    pub fn previous(&mut self) -> Result<bool> {
        self.step(Dir::Reverse)
    }

    /// Positions the cursor at `key`, or at the smallest key greater than
    /// it. When the current data block already covers `key` only that block
    /// is searched; otherwise the cursor re-descends from the deepest index
    /// frame still covering `key`.
    ///
    /// A [`FindResult::NotFound`] leaves the cursor unpositioned; the next
    /// movement steps in from the end matching its direction.
    pub fn find(&mut self, key: &[u8]) -> Result<FindResult> {
        if self.indexes.is_empty() {
            return Ok(FindResult::NotFound);
        }

        if let Some(frame) = &mut self.data {
            if frame.block.in_range(key) {
                return Ok(Self::search_data(frame, key));
            }
        }

        // Keep the shared prefix of the previous descent. The root frame
        // always stays.
        while self.indexes.len() > 1 {
            if self.indexes[self.indexes.len() - 1].covers(key)? {
                break;
            }
            self.indexes.pop();
        }

        loop {
            let top = self.indexes.len() - 1;
            if !self.indexes[top].seek(key)? {
                self.data = None;
                return Ok(FindResult::NotFound);
            }
            let child = self.indexes[top].child()?;
            let block = self.file.read_block(child.position, child.kind)?;
            match child.kind {
                BlockKind::Data => {
                    let mut frame = self.reuse_or(block);
                    let found = Self::search_data(&mut frame, key);
                    // A missed probe leaves the cursor unpositioned rather
                    // than on whatever entry the frame last pointed at.
                    self.data = (found != FindResult::NotFound).then_some(frame);
                    return Ok(found);
                }
                BlockKind::Index => {
                    self.indexes.push(Frame { block, idx: 0 });
                }
            }
        }
    }

    fn search_data(frame: &mut Frame, key: &[u8]) -> FindResult {
        match frame.block.search(key) {
            Ok(i) => {
                frame.idx = i;
                FindResult::Found
            }
            Err(i) if i < frame.block.len() => {
                frame.idx = i;
                FindResult::FoundGreater
            }
            Err(_) => FindResult::NotFound,
        }
    }

    /// Reuses the current data frame when it already holds `block`,
    /// preserving nothing but the allocation's cache identity.
    fn reuse_or(&mut self, block: Arc<Block>) -> Frame {
        match self.data.take() {
            Some(frame) if frame.block.position() == block.position() => frame,
            _ => Frame { block, idx: 0 },
        }
    }

    fn first_last(&mut self, dir: Dir) -> Result<bool> {
        if self.indexes.is_empty() {
            return Ok(false);
        }
        self.indexes.truncate(1);
        let root = Arc::clone(&self.indexes[0].block);
        self.indexes[0] = Frame::at_end(&root, dir);
        self.descend(dir)
    }

    fn step(&mut self, dir: Dir) -> Result<bool> {
        let Some(frame) = &mut self.data else {
            // An unpositioned cursor steps in from the matching end.
            if self.indexes.is_empty() {
                return Ok(false);
            }
            return self.first_last(dir);
        };
        if frame.advance(dir) {
            return Ok(true);
        }

        // The current data block is exhausted. Pop up to the deepest index
        // frame that can still advance, then descend to the near end of the
        // new subtree.
        let mut level = self.indexes.len();
        loop {
            if level == 0 {
                return Ok(false);
            }
            level -= 1;
            if self.indexes[level].advance(dir) {
                break;
            }
        }
        self.indexes.truncate(level + 1);
        self.descend(dir)
    }

    /// Descends from the positioned top index frame to a data block,
    /// entering each level at the end nearest `dir`.
    fn descend(&mut self, dir: Dir) -> Result<bool> {
        loop {
            let top = self.indexes.len() - 1;
            let child = self.indexes[top].child()?;
            let block = self.file.read_block(child.position, child.kind)?;
            match child.kind {
                BlockKind::Data => {
                    let mut frame = self.reuse_or(block);
                    frame.idx = match dir {
                        Dir::Forward => 0,
                        Dir::Reverse => frame.block.len() - 1,
                    };
                    self.data = Some(frame);
                    return Ok(true);
                }
                BlockKind::Index => {
                    self.indexes.push(Frame::at_end(&block, dir));
                }
            }
        }
    }
}
