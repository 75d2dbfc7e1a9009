//! Merges a run of sorted files into one replacement file.
//!
//! The merged output is written to `<dst>.tmp` and renamed over `dst` at
//! commit, then the inputs are deleted oldest-last. A reader listing the
//! directory at any instant sees a consistent tree: the merged file carries
//! every surviving entry before any input disappears, and the newest input
//! is the last to go.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::Config;
use log::warn;
use sstable::{BlockCache, FileWriter};
use std::sync::Arc;

use crate::reader::Snapshot;

/// One compaction job: inputs (newest first) merged into `dst`.
///
/// A single-input job degenerates to a rename; no data is rewritten.
pub struct Merger {
    inputs: Vec<PathBuf>,
    dst: PathBuf,
    tmp: PathBuf,
    snapshot: Option<Snapshot>,
    writer: Option<FileWriter>,
    hard_delete: bool,
    ran: bool,
    committed: bool,
}

impl Merger {
    /// Prepares a merge of `inputs` (newest first) into `dst`.
    ///
    /// `hard_delete` drops tombstones from the output entirely; it is only
    /// sound when no older file below the destination level can still hold
    /// the deleted key.
    ///
    /// # Errors
    ///
    /// Fails when `inputs` is empty, or when any input cannot be opened or
    /// the temporary output cannot be created.
    pub fn new(
        dst: &Path,
        inputs: Vec<PathBuf>,
        cache: &Arc<BlockCache>,
        hard_delete: bool,
        config: &Config,
    ) -> Result<Self> {
        if inputs.is_empty() {
            bail!("no files to merge");
        }
        let tmp = tmp_path(dst);
        let (snapshot, writer) = if inputs.len() > 1 {
            let snapshot = Snapshot::open(&inputs, cache)?;
            let writer = FileWriter::create(&tmp, config)?;
            (Some(snapshot), Some(writer))
        } else {
            (None, None)
        };
        Ok(Self {
            inputs,
            dst: dst.to_path_buf(),
            tmp,
            snapshot,
            writer,
            hard_delete,
            ran: false,
            committed: false,
        })
    }

    /// Streams the merged entries into the temporary file. A no-op for a
    /// single input.
    pub fn run(&mut self) -> Result<()> {
        let (Some(snapshot), Some(mut writer)) = (self.snapshot.take(), self.writer.take())
        else {
            self.ran = true;
            return Ok(());
        };

        let mut cursor = snapshot.cursor()?;
        let mut more = cursor.first()?;
        while more {
            let tombstone = cursor.tombstone();
            if !(tombstone && self.hard_delete) {
                writer.add(cursor.key(), cursor.value(), tombstone)?;
            }
            more = cursor.next()?;
        }
        writer.commit()?;
        self.ran = true;
        Ok(())
    }

    /// Publishes the merged file and removes the inputs.
    ///
    /// Inputs are deleted in reverse order (oldest first) so that a crash
    /// partway through never leaves an older version of a key as the newest
    /// visible one.
    pub fn commit(mut self) -> Result<()> {
        if self.inputs.len() == 1 {
            fs::rename(&self.inputs[0], &self.dst)
                .with_context(|| format!("promote {}", self.inputs[0].display()))?;
            self.committed = true;
            return Ok(());
        }
        if !self.ran {
            bail!("merge committed before run");
        }
        fs::rename(&self.tmp, &self.dst)
            .with_context(|| format!("publish {}", self.dst.display()))?;
        self.committed = true;

        for input in removal_order(&self.inputs, &self.dst) {
            if let Err(e) = fs::remove_file(input) {
                warn!("failed to remove merged input {}: {e}", input.display());
            }
        }
        Ok(())
    }
}

impl Drop for Merger {
    fn drop(&mut self) {
        self.snapshot.take();
        self.writer.take();
        if !self.committed {
            // Abandoned merge: drop the partial output, keep the inputs.
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Consumed inputs in unlink order. `inputs` runs newest to oldest, so
/// deletion walks them in reverse: at every instant the newest file still
/// on disk shadows whatever remains, and a crash mid-way never promotes an
/// older version of a key to newest visible. A destination that was itself
/// an input is skipped; the merged file replaced it in place.
pub(crate) fn removal_order<'a>(
    inputs: &'a [PathBuf],
    dst: &'a Path,
) -> impl Iterator<Item = &'a PathBuf> {
    inputs.iter().rev().filter(move |p| p.as_path() != dst)
}

/// Temporary-output name for a destination path.
#[must_use]
pub fn tmp_path(dst: &Path) -> PathBuf {
    let mut name = dst.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
