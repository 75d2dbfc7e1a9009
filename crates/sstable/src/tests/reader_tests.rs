use crate::*;
use anyhow::Result;
use config::{Compression, Config};
use std::sync::Arc;
use tempfile::tempdir;

/// Writes keys 0, 10, 20, ... as u32 big-endian so every probe between
/// stored keys has a well-defined successor.
fn gapped_file(dir: &std::path::Path, n: u32) -> Result<Arc<FileReader>> {
    let path = dir.join("gapped.lsm");
    let cfg = Config {
        block_size: 256,
        compression: Compression::Raw,
        ..Config::default()
    };
    let mut w = FileWriter::create(&path, &cfg)?;
    for i in 0..n {
        let key = (i * 10).to_be_bytes();
        if i % 11 == 0 {
            w.add(&key, b"", true)?;
        } else {
            w.add(&key, &i.to_le_bytes(), false)?;
        }
    }
    w.commit()?;
    Ok(Arc::new(FileReader::open(
        &path,
        Arc::new(BlockCache::new(32)),
    )?))
}

#[test]
fn find_reports_exact_greater_and_missing() -> Result<()> {
    let dir = tempdir()?;
    let reader = gapped_file(dir.path(), 1_000)?;
    let mut c = reader.cursor()?;

    assert_eq!(c.find(&4_500u32.to_be_bytes())?, FindResult::Found);
    assert_eq!(c.key(), 4_500u32.to_be_bytes());

    // Probe between stored keys lands on the successor.
    assert_eq!(c.find(&4_501u32.to_be_bytes())?, FindResult::FoundGreater);
    assert_eq!(c.key(), 4_510u32.to_be_bytes());

    // Probe before the first key lands on the first key.
    assert_eq!(c.find(&[0u8; 3])?, FindResult::FoundGreater);
    assert_eq!(c.key(), 0u32.to_be_bytes());

    // Probe past the last key finds nothing.
    assert_eq!(c.find(&100_000u32.to_be_bytes())?, FindResult::NotFound);
    Ok(())
}

#[test]
fn next_continues_from_a_find_landing() -> Result<()> {
    let dir = tempdir()?;
    let reader = gapped_file(dir.path(), 1_000)?;
    let mut c = reader.cursor()?;

    assert_eq!(c.find(&2_555u32.to_be_bytes())?, FindResult::FoundGreater);
    assert_eq!(c.key(), 2_560u32.to_be_bytes());
    assert!(c.next()?);
    assert_eq!(c.key(), 2_570u32.to_be_bytes());
    assert!(c.previous()?);
    assert!(c.previous()?);
    assert_eq!(c.key(), 2_550u32.to_be_bytes());
    Ok(())
}

#[test]
fn walks_backward_across_block_boundaries() -> Result<()> {
    let dir = tempdir()?;
    let reader = gapped_file(dir.path(), 2_000)?;
    assert!(reader.footer().data_blocks > 1);

    let mut c = reader.cursor()?;
    assert!(c.last()?);
    let mut expected = 1_999u32;
    loop {
        assert_eq!(c.key(), (expected * 10).to_be_bytes());
        if !c.previous()? {
            break;
        }
        expected -= 1;
    }
    assert_eq!(expected, 0);
    Ok(())
}

#[test]
fn tombstones_surface_through_the_cursor() -> Result<()> {
    let dir = tempdir()?;
    let reader = gapped_file(dir.path(), 100)?;
    let mut c = reader.cursor()?;
    // Key 0 was written with a tombstone (i % 11 == 0).
    assert_eq!(c.find(&0u32.to_be_bytes())?, FindResult::Found);
    assert!(c.tombstone());
    assert!(c.value().is_empty());
    assert_eq!(c.find(&110u32.to_be_bytes())?, FindResult::Found);
    assert!(c.tombstone());
    assert_eq!(c.find(&100u32.to_be_bytes())?, FindResult::Found);
    assert!(!c.tombstone());
    Ok(())
}

#[test]
fn movement_after_missed_probe_restarts_from_the_ends() -> Result<()> {
    let dir = tempdir()?;
    let reader = gapped_file(dir.path(), 100)?;
    let mut c = reader.cursor()?;

    // Position the cursor somewhere in the middle first.
    assert_eq!(c.find(&500u32.to_be_bytes())?, FindResult::Found);

    // A probe past the last key unpositions the cursor; stepping must not
    // resume from the stale pre-probe entry.
    assert_eq!(c.find(&100_000u32.to_be_bytes())?, FindResult::NotFound);
    assert!(c.next()?);
    assert_eq!(c.key(), 0u32.to_be_bytes());

    assert_eq!(c.find(&100_000u32.to_be_bytes())?, FindResult::NotFound);
    assert!(c.previous()?);
    assert_eq!(c.key(), 990u32.to_be_bytes());
    Ok(())
}

#[test]
fn empty_file_cursor_is_always_exhausted() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.lsm");
    FileWriter::create(&path, &Config::default())?.commit()?;

    let reader = Arc::new(FileReader::open(&path, Arc::new(BlockCache::new(0)))?);
    assert!(reader.footer().is_empty());
    let mut c = reader.cursor()?;
    assert!(!c.first()?);
    assert!(!c.last()?);
    assert!(!c.next()?);
    assert_eq!(c.find(b"anything")?, FindResult::NotFound);
    Ok(())
}

#[test]
fn truncated_file_fails_to_open() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("trunc.lsm");
    {
        let cfg = Config {
            block_size: 256,
            compression: Compression::Raw,
            ..Config::default()
        };
        let mut w = FileWriter::create(&path, &cfg)?;
        for i in 0u32..100 {
            w.add(&i.to_be_bytes(), b"v", false)?;
        }
        w.commit()?;
    }
    let len = std::fs::metadata(&path)?.len();
    let f = std::fs::OpenOptions::new().write(true).open(&path)?;
    f.set_len(len / 2)?;
    drop(f);

    // Halving the file either destroys the footer outright or leaves a
    // length word pointing at garbage. Opening must not panic.
    let cache = Arc::new(BlockCache::new(0));
    if let Ok(reader) = FileReader::open(&path, cache) {
        let reader = Arc::new(reader);
        let mut failed = reader.cursor().is_err();
        if let Ok(mut c) = reader.cursor() {
            failed = c.first().is_err();
        }
        assert!(failed, "truncated file must error somewhere");
    }
    Ok(())
}

#[test]
fn shared_cache_serves_repeated_reads() -> Result<()> {
    let dir = tempdir()?;
    let reader = gapped_file(dir.path(), 1_000)?;
    let mut a = reader.cursor()?;
    let mut b = reader.cursor()?;
    assert!(a.first()?);
    assert!(b.first()?);
    // Both cursors see the same entries while sharing decoded blocks.
    for _ in 0..100 {
        assert_eq!(a.key(), b.key());
        assert_eq!(a.next()?, b.next()?);
    }
    Ok(())
}
