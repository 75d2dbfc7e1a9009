//! Background compaction.
//!
//! Every cycle folds all level-0 files, plus as many singleton levels as
//! needed, into a single destination level. The destination is the
//! shallowest level whose size target still holds the combined bytes:
//! level N targets `base_size * multiplier^(N-1)`. Small trees stay at one
//! or two files; a tree that outgrows a level spills the whole prefix one
//! level deeper in a single pass.
//!
//! Tombstones are dropped ("hard" deleted) only when no level deeper than
//! the destination exists, because a dropped tombstone would otherwise
//! resurrect an older version living further down.

use std::path::PathBuf;

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error};
use merge::Merger;

use crate::files::{self, MAX_LEVEL};
use crate::{lock, Inner};

/// Body of the merge thread. Runs a burst of cycles when woken by a
/// commit, on the idle timer, and once more on shutdown, then sweeps
/// temporaries and exits.
pub(crate) fn merge_loop(inner: &Inner, wake: &Receiver<()>) {
    loop {
        match wake.recv_timeout(inner.config().merge_frequency) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        // Keep cycling while commits race in; each cycle re-lists level 0.
        loop {
            match merge_cycle(inner) {
                Ok(true) => {
                    if inner.is_closed() {
                        break;
                    }
                }
                Ok(false) => break,
                Err(e) => {
                    error!(
                        "merge failed in {}: {e:#}; retrying on next wake",
                        inner.directory().display()
                    );
                    break;
                }
            }
        }
        if inner.is_closed() {
            break;
        }
    }
    files::sweep_tmp(inner.directory());
}

/// Runs one compaction cycle. Returns false when level 0 is empty and
/// there is nothing to do.
pub(crate) fn merge_cycle(inner: &Inner) -> Result<bool> {
    let _cycle = lock(&inner.compaction);
    let dir = inner.directory();
    let level0 = files::list_level0(dir)?;
    if level0.is_empty() {
        return Ok(false);
    }

    // Inputs ordered newest to oldest: level-0 files by descending
    // sequence, then each singleton level on the way down.
    let mut inputs: Vec<PathBuf> = level0.into_iter().map(|(_, p)| p).collect();
    let mut total: u64 = 0;
    for p in &inputs {
        total += std::fs::metadata(p)?.len();
    }

    let config = inner.config();
    let mut destination = MAX_LEVEL;
    for level in 1..=MAX_LEVEL {
        let p = files::level_path(dir, level);
        if p.exists() {
            total += std::fs::metadata(&p)?.len();
            inputs.push(p);
        }
        let target = config
            .base_size
            .saturating_mul(config.multiplier.saturating_pow(level - 1));
        if total < target {
            destination = level;
            break;
        }
    }

    let hard_delete = !files::has_level_at_or_below(dir, destination + 1);
    let dst = files::level_path(dir, destination);
    debug!(
        "merging {} files ({total} bytes) into {}, hard_delete={hard_delete}",
        inputs.len(),
        dst.display()
    );

    let mut merger = Merger::new(&dst, inputs, inner.cache(), hard_delete, config)?;
    merger.run()?;
    {
        // Renames and input deletion must not interleave with a snapshot
        // reload listing the directory.
        let _guard = lock(&inner.merge_lock);
        merger.commit()?;
    }
    inner.reload()?;
    Ok(true)
}
