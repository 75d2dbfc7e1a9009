use std::path::Path;
use std::time::Duration;

use config::{Compression, Config};

use crate::Db;

/// Small blocks and level targets so a handful of writes spans several
/// blocks. The merge loop only wakes on commits or after an hour, so
/// tests that assert on the physical file layout drive compaction
/// through [`Db::compact`] instead.
pub(crate) fn small_config() -> Config {
    Config {
        block_size: 256,
        compression: Compression::Raw,
        base_size: 4096,
        multiplier: 2,
        merge_frequency: Duration::from_secs(3600),
        cache_blocks: 16,
        ..Config::default()
    }
}

pub(crate) fn open_db(dir: &Path) -> Db {
    Db::open(dir, small_config()).unwrap()
}

pub(crate) fn key(i: u32) -> Vec<u8> {
    format!("key-{i:06}").into_bytes()
}

pub(crate) fn value(i: u32) -> Vec<u8> {
    format!("value-{i:06}").into_bytes()
}
