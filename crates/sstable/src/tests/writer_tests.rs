use crate::*;
use anyhow::Result;
use config::{Compression, Config, ValueMode};
use std::sync::Arc;
use tempfile::tempdir;

fn small_block_config() -> Config {
    // A tiny block size forces many data blocks and a multi-level index.
    Config {
        block_size: 256,
        compression: Compression::Raw,
        ..Config::default()
    }
}

fn write_sequential(path: &std::path::Path, cfg: &Config, n: u32) -> Result<Footer> {
    let mut w = FileWriter::create(path, cfg)?;
    for i in 0..n {
        w.add(&i.to_be_bytes(), format!("value-{i}").as_bytes(), false)?;
    }
    w.commit()
}

#[test]
fn multi_block_file_reads_back_every_entry() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("seq.lsm");
    let footer = write_sequential(&path, &small_block_config(), 5_000)?;
    assert!(footer.data_blocks > 1, "want multiple data blocks");
    assert!(footer.index_blocks > 1, "want a multi-level index");
    assert_eq!(footer.inserts, 5_000);

    let reader = Arc::new(FileReader::open(&path, Arc::new(BlockCache::new(64)))?);
    let mut cursor = reader.cursor()?;
    assert!(cursor.first()?);
    let mut count = 0u32;
    loop {
        assert_eq!(cursor.key(), count.to_be_bytes());
        assert_eq!(cursor.value(), format!("value-{count}").as_bytes());
        count += 1;
        if !cursor.next()? {
            break;
        }
    }
    assert_eq!(count, 5_000);
    Ok(())
}

#[test]
fn lz4_and_raw_files_hold_identical_contents() -> Result<()> {
    let dir = tempdir()?;
    let raw_path = dir.path().join("raw.lsm");
    let lz4_path = dir.path().join("lz4.lsm");
    let mut raw_cfg = small_block_config();
    raw_cfg.compression = Compression::Raw;
    let mut lz4_cfg = small_block_config();
    lz4_cfg.compression = Compression::Lz4;
    write_sequential(&raw_path, &raw_cfg, 1_000)?;
    write_sequential(&lz4_path, &lz4_cfg, 1_000)?;

    let cache = Arc::new(BlockCache::new(0));
    let raw = Arc::new(FileReader::open(&raw_path, cache.clone())?);
    let lz4 = Arc::new(FileReader::open(&lz4_path, cache)?);
    assert_eq!(lz4.footer().compression()?, Compression::Lz4);

    let mut a = raw.cursor()?;
    let mut b = lz4.cursor()?;
    let (mut more_a, mut more_b) = (a.first()?, b.first()?);
    while more_a && more_b {
        assert_eq!(a.key(), b.key());
        assert_eq!(a.value(), b.value());
        more_a = a.next()?;
        more_b = b.next()?;
    }
    assert!(!more_a && !more_b);
    Ok(())
}

#[test]
fn keys_only_file_round_trips() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("keys.lsm");
    let cfg = Config {
        value_mode: ValueMode::KeysOnly,
        compression: Compression::Raw,
        block_size: 256,
        ..Config::default()
    };
    let mut w = FileWriter::create(&path, &cfg)?;
    for i in 0u32..500 {
        w.add(&i.to_be_bytes(), b"", false)?;
    }
    w.commit()?;

    let reader = Arc::new(FileReader::open(&path, Arc::new(BlockCache::new(0)))?);
    assert_eq!(reader.footer().value_mode(), ValueMode::KeysOnly);
    let mut c = reader.cursor()?;
    assert!(c.first()?);
    let mut n = 0;
    loop {
        assert!(c.value().is_empty());
        n += 1;
        if !c.next()? {
            break;
        }
    }
    assert_eq!(n, 500);
    Ok(())
}

#[test]
fn footer_size_accounting_matches_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("sizes.lsm");
    let footer = write_sequential(&path, &small_block_config(), 2_000)?;
    let file_len = std::fs::metadata(&path)?.len();
    let blocks = footer.compressed_data_bytes + footer.compressed_index_bytes;
    let trailer = (FOOTER_BYTES + FOOTER_LEN_BYTES) as u64;
    assert_eq!(blocks + trailer, file_len);
    assert!(footer.last_index_position < file_len - trailer);
    Ok(())
}
