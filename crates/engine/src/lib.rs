//! # Strata storage engine
//!
//! An embedded, ordered key/value store built from immutable sorted files
//! and a background leveled compactor.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   ENGINE                      │
//! │                                               │
//! │ write.rs → WriteBatch → l0.<seq>.lsm.tmp      │
//! │              |  commit: fsync + rename        │
//! │              v                                │
//! │           level 0 (one file per commit)       │
//! │              |                                │
//! │              |  background merge loop         │
//! │              v                                │
//! │ level.rs → l1.lsm .. l9.lsm (one file each,   │
//! │            sizes growing by `multiplier`)     │
//! │                                               │
//! │ cursor: k-way merge over the snapshot,        │
//! │         newest file wins, tombstones hidden   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module responsibilities
//!
//! | Module       | Purpose                                             |
//! |--------------|-----------------------------------------------------|
//! | [`lib.rs`]   | `Db` open/close, snapshots, `DbCursor`, `get`       |
//! | [`write`]    | `WriteBatch`: sorted puts/deletes, atomic commit    |
//! | [`level`]    | merge loop, destination-level policy, hard deletes  |
//! | [`files`]    | level file naming, listing, tmp sweeping            |
//!
//! ## Consistency
//!
//! A commit is a single rename; readers list the directory under the merge
//! lock and pin every file they open, so a cursor always sees a complete
//! tree as of some instant and keeps seeing it while compaction replaces
//! files underneath.

mod files;
mod level;
mod write;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::{bail, Context, Result};
use config::Config;
use crossbeam_channel::{bounded, Sender};
use log::warn;
use merge::{MergeCursor, Snapshot};
use sstable::{BlockCache, FindResult, Footer};

pub use write::WriteBatch;

/// Locks a mutex, riding through poisoning. Every guarded section leaves
/// the data consistent even if a panic unwinds past it, so a poisoned lock
/// carries no extra meaning here.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// An open database: a directory of sorted files plus the background
/// compactor that keeps them merged.
///
/// `Db` is `Send + Sync`; one writer at a time, any number of concurrent
/// cursors.
pub struct Db {
    inner: Arc<Inner>,
    merger: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct Inner {
    directory: PathBuf,
    config: Config,
    cache: Arc<BlockCache>,
    /// Commit counter; the mutex also serializes writers, with the guard
    /// held for the whole life of a [`WriteBatch`].
    pub(crate) write: Mutex<u64>,
    /// Current snapshot, swapped whole after every commit and merge.
    snapshot: Mutex<Arc<Snapshot>>,
    /// Held while merge commits rename and delete files, and while a
    /// snapshot reload lists and opens them.
    pub(crate) merge_lock: Mutex<()>,
    /// Serializes whole compaction cycles between the background loop and
    /// synchronous `compact()` calls.
    pub(crate) compaction: Mutex<()>,
    closed: AtomicBool,
    wake: Sender<()>,
}

impl Inner {
    pub(crate) fn directory(&self) -> &Path {
        &self.directory
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Re-lists the directory and swaps in a fresh snapshot. The merge
    /// lock spans listing and opening so the compactor cannot delete a
    /// file between the two.
    pub(crate) fn reload(&self) -> Result<()> {
        let snap = {
            let _merging = lock(&self.merge_lock);
            let paths = files::list_tree(&self.directory)?;
            Arc::new(Snapshot::open(&paths, &self.cache)?)
        };
        *lock(&self.snapshot) = snap;
        Ok(())
    }

    /// Nudges the merge loop without blocking; a full channel means a wake
    /// is already pending.
    pub(crate) fn wake_merger(&self) {
        let _ = self.wake.try_send(());
    }
}

impl Db {
    /// Opens (creating if necessary) the database in `directory` and
    /// starts the background merge loop.
    ///
    /// Leftover `.tmp` files from interrupted writes are removed first;
    /// they were never part of the tree.
    ///
    /// # Errors
    ///
    /// Fails on an invalid [`Config`], an unusable directory, or a corrupt
    /// file discovered while opening the initial snapshot.
    pub fn open(directory: impl AsRef<Path>, config: Config) -> Result<Self> {
        if let Err(e) = config.validate() {
            bail!("invalid config: {e}");
        }
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("create {}", directory.display()))?;
        files::sweep_tmp(&directory);

        let counter = files::max_level0_seq(&directory)?;
        let cache = Arc::new(BlockCache::new(config.cache_blocks));
        let paths = files::list_tree(&directory)?;
        let initial = Arc::new(Snapshot::open(&paths, &cache)?);

        let (wake, wake_rx) = bounded(2);
        let inner = Arc::new(Inner {
            cache,
            directory,
            config,
            write: Mutex::new(counter),
            snapshot: Mutex::new(initial),
            merge_lock: Mutex::new(()),
            compaction: Mutex::new(()),
            closed: AtomicBool::new(false),
            wake,
        });

        let merger = {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("strata-merge".into())
                .spawn(move || level::merge_loop(&inner, &wake_rx))
                .context("spawn merge thread")?
        };

        Ok(Self {
            inner,
            merger: Mutex::new(Some(merger)),
        })
    }

    /// Begins a write transaction. Blocks while another writer is active.
    ///
    /// # Errors
    ///
    /// Fails once the database is closed, or when the level-0 temporary
    /// file cannot be created.
    pub fn write(&self) -> Result<WriteBatch<'_>> {
        WriteBatch::begin(&self.inner)
    }

    /// Opens a cursor over the current snapshot. The cursor keeps reading
    /// that snapshot even as later commits and merges replace files.
    ///
    /// # Errors
    ///
    /// Fails once the database is closed.
    pub fn cursor(&self) -> Result<DbCursor> {
        if self.inner.is_closed() {
            bail!("database closed");
        }
        let snapshot = lock(&self.inner.snapshot).clone();
        let cursor = snapshot.cursor()?;
        Ok(DbCursor {
            cursor,
            _snapshot: snapshot,
        })
    }

    /// Convenience point lookup: the live value for `key`, or `None` when
    /// absent or deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut cursor = self.cursor()?;
        match cursor.cursor.find(key)? {
            FindResult::Found if !cursor.cursor.tombstone() => {
                Ok(Some(cursor.cursor.value().to_vec()))
            }
            _ => Ok(None),
        }
    }

    /// Runs merge cycles synchronously until the tree is fully compacted.
    /// The background loop does the same work on its own; this entry point
    /// exists for deterministic shutdowns, tests, and the CLI.
    pub fn compact(&self) -> Result<()> {
        if self.inner.is_closed() {
            bail!("database closed");
        }
        while level::merge_cycle(&self.inner)? {}
        Ok(())
    }

    /// Footers of every file in the current snapshot, newest first, paired
    /// with their paths.
    pub fn stats(&self) -> Result<Vec<(PathBuf, Footer)>> {
        if self.inner.is_closed() {
            bail!("database closed");
        }
        let snapshot = lock(&self.inner.snapshot).clone();
        Ok(snapshot
            .files()
            .iter()
            .map(|f| (f.path().to_path_buf(), f.footer().clone()))
            .collect())
    }

    /// Stops the merge loop and waits for it to exit. Further writes and
    /// cursors fail; existing cursors keep their snapshot. Idempotent, and
    /// also run by `Drop`.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wait out any in-flight write transaction.
        drop(lock(&self.inner.write));
        self.inner.wake_merger();
        if let Some(handle) = lock(&self.merger).take() {
            if handle.join().is_err() {
                warn!("merge thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = lock(&self.inner.snapshot).clone();
        f.debug_struct("Db")
            .field("directory", &self.inner.directory)
            .field("files", &snapshot.files().len())
            .field("bytes", &snapshot.size())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

/// Iterates the live entries of one snapshot in key order, in either
/// direction. Tombstones and shadowed versions are skipped.
///
/// Movement methods return whether the cursor landed on an entry; the
/// accessors may only be used after a successful move.
pub struct DbCursor {
    cursor: MergeCursor,
    _snapshot: Arc<Snapshot>,
}

impl DbCursor {
    /// Key of the current entry.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is not positioned on an entry.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        self.cursor.key()
    }

    /// Value of the current entry.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is not positioned on an entry.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        self.cursor.value()
    }

    /// Moves to the smallest live key.
    pub fn first(&mut self) -> Result<bool> {
        let mut more = self.cursor.first()?;
        while more && self.cursor.tombstone() {
            more = self.cursor.next()?;
        }
        Ok(more)
    }

    /// Moves to the largest live key.
    pub fn last(&mut self) -> Result<bool> {
        let mut more = self.cursor.last()?;
        while more && self.cursor.tombstone() {
            more = self.cursor.previous()?;
        }
        Ok(more)
    }

    /// Moves to the next larger live key.
    pub fn next(&mut self) -> Result<bool> {
        loop {
            if !self.cursor.next()? {
                return Ok(false);
            }
            if !self.cursor.tombstone() {
                return Ok(true);
            }
        }
    }

    /// Moves to the next smaller live key.
    pub fn previous(&mut self) -> Result<bool> {
        loop {
            if !self.cursor.previous()? {
                return Ok(false);
            }
            if !self.cursor.tombstone() {
                return Ok(true);
            }
        }
    }

    /// Positions at `key` or the smallest live key greater than it.
    /// A deleted `key` degrades an exact hit to [`FindResult::FoundGreater`]
    /// on the following live entry.
    pub fn find(&mut self, key: &[u8]) -> Result<FindResult> {
        let mut result = self.cursor.find(key)?;
        if result == FindResult::NotFound {
            return Ok(result);
        }
        while self.cursor.tombstone() {
            if !self.cursor.next()? {
                return Ok(FindResult::NotFound);
            }
            result = FindResult::FoundGreater;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests;
