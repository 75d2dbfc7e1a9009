///! # CLI - Strata Interactive Shell
///!
///! A REPL-style command-line interface for the strata storage engine.
///! Reads commands from stdin, executes them against the engine, and prints
///! results to stdout. Designed for both interactive use and scripted testing
///! (pipe commands via stdin).
///!
///! ## Commands
///!
///! ```text
///! SET key value      Insert or update a key-value pair
///! GET key            Look up a key (prints value or "(nil)")
///! DEL key            Delete a key (writes a tombstone)
///! SCAN [start] [end] Range scan (inclusive start, exclusive end)
///! COMPACT            Merge every pending level-0 file down the tree
///! STATS              Print per-file footer counters
///! EXIT / QUIT        Shut down gracefully
///! ```
///!
///! ## Configuration
///!
///! All settings are controlled via environment variables:
///!
///! ```text
///! STRATA_DIR         Database directory          (default: "data")
///! STRATA_BLOCK_SIZE  Block size in bytes         (default: 8192)
///! STRATA_COMPRESSION Block codec, "lz4" or "raw" (default: "lz4")
///! STRATA_CACHE       Block cache size in blocks  (default: 1024)
///! STRATA_BASE_KB     Level-1 target in KiB       (default: 10240)
///! STRATA_MERGE_SECS  Idle merge wakeup in secs   (default: 3600)
///! ```
///!
///! ## Example
///!
///! ```text
///! $ cargo run -p cli
///! strata started (dir=data, block=8192, compression=lz4, cache=1024)
///! > SET name Alice
///! OK
///! > GET name
///! Alice
///! > SCAN
///! name -> Alice
///! (1 entries)
///! > EXIT
///! bye
///! ```

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::Result;
use config::{Compression, Config};
use engine::Db;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Builds the engine configuration from `STRATA_*` environment variables.
fn config_from_env() -> Config {
    let mut config = Config::default();
    if let Ok(block_size) = env_or("STRATA_BLOCK_SIZE", "").parse() {
        config.block_size = block_size;
    }
    if let Ok(cache_blocks) = env_or("STRATA_CACHE", "").parse() {
        config.cache_blocks = cache_blocks;
    }
    if let Ok(base_kb) = env_or("STRATA_BASE_KB", "").parse::<u64>() {
        config.base_size = base_kb * 1024;
    }
    if let Ok(secs) = env_or("STRATA_MERGE_SECS", "").parse() {
        config.merge_frequency = Duration::from_secs(secs);
    }
    if env_or("STRATA_COMPRESSION", "lz4").eq_ignore_ascii_case("raw") {
        config.compression = Compression::Raw;
    }
    config
}

fn scan(db: &Db, start: &[u8], end: &[u8]) -> Result<usize> {
    let mut cursor = db.cursor()?;
    let mut more = if start.is_empty() {
        cursor.first()?
    } else {
        cursor.find(start)?.any()
    };
    let mut count = 0;
    while more {
        if !end.is_empty() && cursor.key() >= end {
            break;
        }
        println!(
            "{} -> {}",
            String::from_utf8_lossy(cursor.key()),
            String::from_utf8_lossy(cursor.value())
        );
        count += 1;
        more = cursor.next()?;
    }
    Ok(count)
}

fn main() -> Result<()> {
    env_logger::init();

    let directory = env_or("STRATA_DIR", "data");
    let config = config_from_env();
    let db = Db::open(&directory, config.clone())?;

    println!(
        "strata started (dir={}, block={}, compression={:?}, cache={})",
        directory, config.block_size, config.compression, config.cache_blocks
    );
    println!("Commands: SET key value | GET key | DEL key | SCAN [start] [end]");
    println!("          COMPACT | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => {
                    if let Some(k) = parts.next() {
                        let v: String = parts.collect::<Vec<&str>>().join(" ");
                        if v.is_empty() {
                            println!("ERR usage: SET key value");
                        } else {
                            let result = db
                                .write()
                                .and_then(|mut batch| {
                                    batch.put(k.as_bytes(), v.as_bytes())?;
                                    batch.commit()
                                });
                            match result {
                                Ok(()) => println!("OK"),
                                Err(e) => println!("ERR set failed: {e:#}"),
                            }
                        }
                    } else {
                        println!("ERR usage: SET key value");
                    }
                }
                "GET" => {
                    if let Some(k) = parts.next() {
                        match db.get(k.as_bytes()) {
                            Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
                            Ok(None) => println!("(nil)"),
                            Err(e) => println!("ERR read failed: {e:#}"),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "DEL" => {
                    if let Some(k) = parts.next() {
                        let result = db
                            .write()
                            .and_then(|mut batch| {
                                batch.delete(k.as_bytes())?;
                                batch.commit()
                            });
                        match result {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR del failed: {e:#}"),
                        }
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "SCAN" => {
                    let start = parts.next().unwrap_or("").as_bytes();
                    let end = parts.next().unwrap_or("").as_bytes();
                    match scan(&db, start, end) {
                        Ok(0) => println!("(empty)"),
                        Ok(count) => println!("({count} entries)"),
                        Err(e) => println!("ERR scan failed: {e:#}"),
                    }
                }
                "COMPACT" => match db.compact() {
                    Ok(()) => match db.stats() {
                        Ok(files) => println!("OK ({} files)", files.len()),
                        Err(e) => println!("ERR stats failed: {e:#}"),
                    },
                    Err(e) => println!("ERR compact failed: {e:#}"),
                },
                "STATS" => match db.stats() {
                    Ok(files) => {
                        for (path, footer) in &files {
                            println!(
                                "{}: inserts={} deletes={} data_blocks={} index_blocks={}",
                                path.display(),
                                footer.inserts,
                                footer.deletes,
                                footer.data_blocks,
                                footer.index_blocks
                            );
                        }
                        println!("({} files)", files.len());
                    }
                    Err(e) => println!("ERR stats failed: {e:#}"),
                },
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => {
                    println!("unknown command: {}", other);
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    db.close();
    Ok(())
}
