//! Pluggable block compression.
//!
//! Every block on disk is wrapped the same way regardless of codec:
//!
//! ```text
//! varint(uncompressed_len) | varint(compressed_len) | compressed bytes
//! ```
//!
//! `Raw` stores the payload verbatim (both lengths equal). `Lz4` runs the
//! payload through an LZ4 block codec. A decompression result that does not
//! match `uncompressed_len` exactly is a format fault and fails the read.

use anyhow::{bail, Context, Result};
use config::Compression;

use crate::varint;

/// Serializes block payloads into their on-disk framing.
///
/// Implementations may keep scratch buffers between calls; a writer owns one
/// codec for its whole lifetime.
pub trait Compressor: Send {
    /// Appends the framed (length-prefixed, possibly compressed) form of
    /// `payload` to `out`.
    fn write_block(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<()>;
}

/// Identity codec.
pub struct RawCodec;

impl Compressor for RawCodec {
    fn write_block(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        varint::append(out, payload.len() as u64);
        varint::append(out, payload.len() as u64);
        out.extend_from_slice(payload);
        Ok(())
    }
}

/// LZ4 block codec.
pub struct Lz4Codec {
    scratch: Vec<u8>,
}

impl Lz4Codec {
    #[must_use]
    pub fn new() -> Self {
        Self { scratch: Vec::new() }
    }
}

impl Default for Lz4Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Lz4Codec {
    fn write_block(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let bound = lz4_flex::block::get_maximum_output_size(payload.len());
        self.scratch.clear();
        self.scratch.resize(bound, 0);
        let n = lz4_flex::block::compress_into(payload, &mut self.scratch)
            .context("lz4 block compression failed")?;
        varint::append(out, payload.len() as u64);
        varint::append(out, n as u64);
        out.extend_from_slice(&self.scratch[..n]);
        Ok(())
    }
}

/// Returns the codec selected by `compression`.
#[must_use]
pub fn new_codec(compression: Compression) -> Box<dyn Compressor> {
    match compression {
        Compression::Raw => Box::new(RawCodec),
        Compression::Lz4 => Box::new(Lz4Codec::new()),
    }
}

/// Reads one framed block starting at `buf[0]` and returns its uncompressed
/// payload.
///
/// Fails on truncation or when the codec produces a payload whose size
/// disagrees with the stored `uncompressed_len`.
pub fn read_block(compression: Compression, buf: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;
    let raw_len = varint::read(buf, &mut pos)? as usize;
    let comp_len = varint::read(buf, &mut pos)? as usize;
    let Some(body) = buf.get(pos..pos + comp_len) else {
        bail!("block extends past end of file");
    };

    match compression {
        Compression::Raw => {
            if comp_len != raw_len {
                bail!(
                    "raw block length mismatch: header says {} bytes, stored {}",
                    raw_len,
                    comp_len
                );
            }
            Ok(body.to_vec())
        }
        Compression::Lz4 => {
            let mut payload = vec![0u8; raw_len];
            let n = lz4_flex::block::decompress_into(body, &mut payload)
                .context("lz4 block decompression failed")?;
            if n != raw_len {
                bail!("lz4 block decompressed to {} bytes, expected {}", n, raw_len);
            }
            Ok(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() -> Result<()> {
        let payload = b"hello sorted world".to_vec();
        let mut out = Vec::new();
        RawCodec.write_block(&payload, &mut out)?;
        assert_eq!(read_block(Compression::Raw, &out)?, payload);
        Ok(())
    }

    #[test]
    fn lz4_round_trip() -> Result<()> {
        let payload: Vec<u8> = (0u32..2000).flat_map(|i| (i % 17).to_le_bytes()).collect();
        let mut out = Vec::new();
        Lz4Codec::new().write_block(&payload, &mut out)?;
        assert!(out.len() < payload.len());
        assert_eq!(read_block(Compression::Lz4, &out)?, payload);
        Ok(())
    }

    #[test]
    fn size_mismatch_is_a_format_fault() -> Result<()> {
        let payload = b"abcdefgh".to_vec();
        let mut out = Vec::new();
        RawCodec.write_block(&payload, &mut out)?;
        // Corrupt the stored uncompressed length.
        out[0] = out[0].wrapping_add(1);
        assert!(read_block(Compression::Raw, &out).is_err());
        Ok(())
    }

    #[test]
    fn truncated_block_is_a_format_fault() -> Result<()> {
        let payload = vec![7u8; 64];
        let mut out = Vec::new();
        RawCodec.write_block(&payload, &mut out)?;
        out.truncate(out.len() - 8);
        assert!(read_block(Compression::Raw, &out).is_err());
        Ok(())
    }
}
