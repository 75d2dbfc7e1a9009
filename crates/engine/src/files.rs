//! Level file naming and directory listing.
//!
//! The tree lives flat in one directory:
//!
//! ```text
//! l0.0000000000000042.lsm    -- one file per commit, seq strictly increasing
//! l1.lsm .. l9.lsm           -- singleton file per level
//! *.tmp                      -- in-flight writes, swept on open and close
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;

/// Deepest level the compactor will create.
pub(crate) const MAX_LEVEL: u32 = 9;

pub(crate) fn level0_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("l0.{seq:016}.lsm"))
}

pub(crate) fn level_path(dir: &Path, level: u32) -> PathBuf {
    dir.join(format!("l{level}.lsm"))
}

/// Parses a level-0 file name, returning its commit sequence number.
fn level0_seq(name: &str) -> Option<u64> {
    let rest = name.strip_prefix("l0.")?.strip_suffix(".lsm")?;
    rest.parse().ok()
}

/// Level-0 files ordered newest first (descending sequence number).
pub(crate) fn list_level0(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(seq) = level0_seq(name) {
            files.push((seq, entry.path()));
        }
    }
    files.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(files)
}

/// Highest committed level-0 sequence number, or zero for a fresh tree.
/// The write counter resumes from here so reopened databases never reuse
/// a file name.
pub(crate) fn max_level0_seq(dir: &Path) -> Result<u64> {
    Ok(list_level0(dir)?.first().map_or(0, |(seq, _)| *seq))
}

/// Every live file of the tree, newest first: level-0 descending by
/// sequence, then each singleton level in ascending order.
pub(crate) fn list_tree(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = list_level0(dir)?.into_iter().map(|(_, p)| p).collect();
    for level in 1..=MAX_LEVEL {
        let p = level_path(dir, level);
        if p.exists() {
            files.push(p);
        }
    }
    Ok(files)
}

/// True when any singleton level at `min` or deeper holds a file. Deletes
/// can only be dropped outright when nothing older remains below the
/// merge destination.
pub(crate) fn has_level_at_or_below(dir: &Path, min: u32) -> bool {
    (min..=MAX_LEVEL).any(|level| level_path(dir, level).exists())
}

/// Removes stranded `.tmp` files left by interrupted writes or merges.
pub(crate) fn sweep_tmp(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "tmp") {
            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to sweep {}: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn level0_names_sort_newest_first() -> Result<()> {
        let dir = tempdir()?;
        for seq in [3u64, 1, 12] {
            std::fs::write(level0_path(dir.path(), seq), b"")?;
        }
        std::fs::write(dir.path().join("l1.lsm"), b"")?;
        std::fs::write(dir.path().join("junk.txt"), b"")?;

        let seqs: Vec<u64> = list_level0(dir.path())?.into_iter().map(|(s, _)| s).collect();
        assert_eq!(seqs, vec![12, 3, 1]);
        assert_eq!(max_level0_seq(dir.path())?, 12);
        Ok(())
    }

    #[test]
    fn tree_listing_orders_newest_to_oldest() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(level0_path(dir.path(), 7), b"")?;
        std::fs::write(level0_path(dir.path(), 9), b"")?;
        std::fs::write(level_path(dir.path(), 1), b"")?;
        std::fs::write(level_path(dir.path(), 3), b"")?;

        let names: Vec<String> = list_tree(dir.path())?
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "l0.0000000000000009.lsm",
                "l0.0000000000000007.lsm",
                "l1.lsm",
                "l3.lsm"
            ]
        );
        Ok(())
    }

    #[test]
    fn sweep_removes_only_tmp_files() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("l1.lsm.tmp"), b"")?;
        std::fs::write(dir.path().join("l1.lsm"), b"")?;
        sweep_tmp(dir.path());
        assert!(!dir.path().join("l1.lsm.tmp").exists());
        assert!(dir.path().join("l1.lsm").exists());
        Ok(())
    }
}
