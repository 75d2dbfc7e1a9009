//! LEB128-style unsigned varints used throughout the block format.
//!
//! Seven payload bits per byte, high bit set on continuation bytes,
//! little-endian group order.

use anyhow::{bail, Result};

/// Number of bytes `x` occupies when varint-encoded.
#[must_use]
pub fn len(x: u64) -> usize {
    let bits = 64 - (x | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Appends the varint encoding of `x` to `out`.
pub fn append(out: &mut Vec<u8>, mut x: u64) {
    while x >= 0x80 {
        out.push((x as u8) | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
}

/// Decodes a varint from `buf[*pos..]`, advancing `pos` past it.
///
/// A truncated or over-long encoding is a decode fault.
pub fn read(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut shift = 0u32;
    let mut value = 0u64;
    loop {
        let Some(&b) = buf.get(*pos) else {
            bail!("truncated varint");
        };
        *pos += 1;
        if shift >= 64 {
            bail!("varint overflows u64");
        }
        value |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() -> Result<()> {
        let samples = [
            0u64,
            1,
            127,
            128,
            300,
            16_383,
            16_384,
            u64::from(u32::MAX),
            u64::MAX,
        ];
        let mut buf = Vec::new();
        for &x in &samples {
            buf.clear();
            append(&mut buf, x);
            assert_eq!(buf.len(), len(x));
            let mut pos = 0;
            assert_eq!(read(&buf, &mut pos)?, x);
            assert_eq!(pos, buf.len());
        }
        Ok(())
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut buf = Vec::new();
        append(&mut buf, 1 << 40);
        buf.pop();
        let mut pos = 0;
        assert!(read(&buf, &mut pos).is_err());
    }

    #[test]
    fn encoded_length_matches_spec_boundaries() {
        assert_eq!(len(0), 1);
        assert_eq!(len(127), 1);
        assert_eq!(len(128), 2);
        assert_eq!(len(u64::MAX), 10);
    }
}
