//! Write transactions.
//!
//! A batch streams its entries straight into a level-0 temporary file;
//! nothing is buffered in memory. Commit is a sync plus a rename, so a
//! crash at any point leaves either the whole batch or none of it.

use std::fs;
use std::path::PathBuf;
use std::sync::MutexGuard;

use anyhow::{bail, Result};
use sstable::FileWriter;

use crate::files;
use crate::{lock, Inner};

/// A single write transaction producing one level-0 file.
///
/// Keys must be added in strictly ascending order; puts and deletes share
/// one ordering. Only one batch exists at a time: the batch holds the
/// writer lock until it commits or drops. Dropping without commit discards
/// every entry.
pub struct WriteBatch<'db> {
    inner: &'db Inner,
    /// Holding the counter guard is what makes this the only writer.
    _serial: MutexGuard<'db, u64>,
    writer: Option<FileWriter>,
    path: PathBuf,
    tmp: PathBuf,
    any: bool,
    committed: bool,
}

impl<'db> WriteBatch<'db> {
    pub(crate) fn begin(inner: &'db Inner) -> Result<Self> {
        let mut serial = lock(&inner.write);
        if inner.is_closed() {
            bail!("database closed");
        }
        *serial += 1;
        let path = files::level0_path(inner.directory(), *serial);
        let tmp = merge::tmp_path(&path);
        let writer = FileWriter::create(&tmp, inner.config())?;
        Ok(Self {
            inner,
            _serial: serial,
            writer: Some(writer),
            path,
            tmp,
            any: false,
            committed: false,
        })
    }

    fn writer(&mut self) -> Result<&mut FileWriter> {
        match self.writer.as_mut() {
            Some(w) => Ok(w),
            None => bail!("write batch already committed"),
        }
    }

    /// Inserts or overwrites `key`.
    ///
    /// # Errors
    ///
    /// Fails on an empty or oversized key, a key not strictly greater than
    /// the previous one in this batch, or I/O error. The batch stays
    /// usable after an ordering error.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writer()?.add(key, value, false)?;
        self.any = true;
        Ok(())
    }

    /// Records a deletion of `key`. Ordered exactly like
    /// [`put`](WriteBatch::put).
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.writer()?.add(key, b"", true)?;
        self.any = true;
        Ok(())
    }

    /// Syncs the file and publishes it as the newest level-0 file, then
    /// reloads the snapshot so the next cursor sees the batch, and wakes
    /// the merger.
    ///
    /// An empty batch commits to nothing: the temporary file is removed
    /// and no level-0 file appears.
    pub fn commit(mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            bail!("write batch already committed");
        };
        writer.commit()?;

        if !self.any {
            fs::remove_file(&self.tmp)?;
            self.committed = true;
            return Ok(());
        }

        fs::rename(&self.tmp, &self.path)?;
        self.committed = true;
        self.inner.reload()?;
        self.inner.wake_merger();
        Ok(())
    }
}

impl Drop for WriteBatch<'_> {
    fn drop(&mut self) {
        self.writer.take();
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}
