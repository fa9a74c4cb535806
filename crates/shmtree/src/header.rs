//! The 32-byte validity header at the front of every segment.
//!
//! Layout:
//!
//! ```text
//! offset 0       validity byte: 0x5A while initializing, 0xA5 once valid
//! offset 1..=19  19 random bytes, none 0x00 or 0xFF
//! offset 20..=29 arithmetic progression, step +1, continuing byte 19
//! offset 30..=31 little-endian 16-bit sum of bytes 0..=29
//! ```
//!
//! The header is the wire-format contract between attachers: a freshly
//! truncated (all-zero) segment fails every check, and so does essentially
//! any stray write into the first 32 bytes, which is what lets an attacher
//! distinguish "someone initialized this" from "this is garbage".

use rand::Rng;
use shmtree_primitives::Region;

/// Validity byte of a fully initialized segment.
pub const VALID: u8 = 0xA5;

/// Validity byte while an attacher is writing defaults.
pub const INITIALIZING: u8 = 0x5A;

/// Fill bytes 1..=31 of the header.
///
/// The validity byte itself is *not* written: the initializer keeps it at
/// [`INITIALIZING`] until the whole payload is ready and flips it to
/// [`VALID`] as the last store. The checksum is computed as if byte 0 were
/// already [`VALID`].
pub(crate) fn fill(region: &Region) {
    let mut rng = rand::rng();
    let mut sum: u16 = VALID as u16;

    for off in 1..=19usize {
        let b: u8 = loop {
            let b: u8 = rng.random();
            if b != 0x00 && b != 0xFF {
                break b;
            }
        };
        region.write_u8(off, b);
        sum = sum.wrapping_add(b as u16);
    }

    let mut prev = region.read_u8(19);
    for off in 20..=29usize {
        prev = prev.wrapping_add(1);
        region.write_u8(off, prev);
        sum = sum.wrapping_add(prev as u16);
    }

    region.write_u16(30, sum);
}

/// Validate the header of a segment whose validity byte reads [`VALID`].
pub(crate) fn validate(region: &Region) -> Result<(), &'static str> {
    if region.read_u8(0) != VALID {
        return Err("validity byte is not 0xA5");
    }

    let mut sum: u16 = 0;
    for off in 0..=19usize {
        let b = region.read_u8(off);
        if b == 0x00 || b == 0xFF {
            return Err("0x00/0xFF byte in the random block");
        }
        sum = sum.wrapping_add(b as u16);
    }

    let mut prev = region.read_u8(19);
    for off in 20..=29usize {
        let b = region.read_u8(off);
        prev = prev.wrapping_add(1);
        if b != prev {
            return Err("progression bytes out of sequence");
        }
        sum = sum.wrapping_add(b as u16);
    }

    if region.read_u16(30) != sum {
        return Err("checksum mismatch");
    }
    Ok(())
}
