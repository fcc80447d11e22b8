//! KLV (key-length-value) write primitives and alignment rules.
//!
//! Structural items are padded to the KAG (KLV alignment grid) so that
//! byte offsets within the essence container are predictable. All lengths
//! use a fixed 4-byte BER encoding so item sizes can be computed up front.

use byteorder::WriteBytesExt;
use std::io::{self, Write};

/// Byte size of a SMPTE universal label / KLV key.
pub const KEY_SIZE: usize = 16;

/// Fixed BER length size: one long-form marker byte plus three length bytes.
pub const LLEN: usize = 4;

/// KLV alignment grid in bytes.
pub const KAG_SIZE: u32 = 0x200;

/// Smallest possible KLV fill item: a key and a length with no value.
pub const MIN_FILL_SIZE: u32 = (KEY_SIZE + LLEN) as u32;

/// A 16-byte SMPTE universal label or KLV key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key(pub [u8; 16]);

/// SDTI-CP system metadata pack key (SMPTE 331M).
pub const SYSTEM_METADATA_PACK_KEY: Key = Key([
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x04, 0x01, 0x01, 0x00,
]);

/// SDTI-CP package metadata set key, zero blocks.
pub const EMPTY_PACKAGE_METADATA_SET_KEY: Key = Key([
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x43, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x04, 0x01, 0x02, 0x00,
]);

/// D-10 picture item element key (SMPTE 386M).
pub const PICTURE_ELEMENT_KEY: Key = Key([
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x05, 0x01, 0x01, 0x00,
]);

/// D-10 sound item element key, 8-channel AES3 (SMPTE 386M).
pub const SOUND_ELEMENT_KEY: Key = Key([
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x06, 0x01, 0x10, 0x00,
]);

/// KLV fill item key (SMPTE 336M).
pub const FILL_KEY: Key = Key([
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x03, 0x01, 0x02, 0x10, 0x01, 0x00, 0x00, 0x00,
]);

/// Rounds `data_size` up to the KAG, always leaving room for at least a
/// minimal key+length-only fill item when any fill is needed.
pub fn kag_aligned_size(data_size: u32) -> u32 {
    let mut fill_size = 0;
    let data_in_kag_size = data_size % KAG_SIZE;
    if data_in_kag_size > 0 {
        fill_size = KAG_SIZE - data_in_kag_size;
        while fill_size < MIN_FILL_SIZE {
            fill_size += KAG_SIZE;
        }
    }

    data_size + fill_size
}

/// KLV write primitives over any byte sink.
pub trait KlvWrite: Write {
    /// Writes a key followed by a fixed 4-byte BER length.
    fn write_fixed_kl(&mut self, key: &Key, len: u32) -> io::Result<()> {
        debug_assert!(len < 1 << 24);
        self.write_all(&key.0)?;
        self.write_u8(0x80 | (LLEN as u8 - 1))?;
        self.write_all(&len.to_be_bytes()[1..])?;
        Ok(())
    }

    /// Writes a KLV fill item occupying exactly `size` bytes in total.
    ///
    /// `size` must be zero or at least [`MIN_FILL_SIZE`].
    fn write_fill(&mut self, size: u32) -> io::Result<()> {
        if size == 0 {
            return Ok(());
        }
        if size < MIN_FILL_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("fill size {size} is smaller than a key+length item"),
            ));
        }

        self.write_fixed_kl(&FILL_KEY, size - MIN_FILL_SIZE)?;

        let zeros = [0u8; KAG_SIZE as usize];
        let mut remaining = (size - MIN_FILL_SIZE) as usize;
        while remaining > 0 {
            let n = remaining.min(zeros.len());
            self.write_all(&zeros[..n])?;
            remaining -= n;
        }

        Ok(())
    }

    /// Writes a 16-byte universal label.
    fn write_ul(&mut self, ul: &Key) -> io::Result<()> {
        self.write_all(&ul.0)
    }

    /// Writes a big-endian unsigned 16-bit integer.
    fn write_u16_be(&mut self, value: u16) -> io::Result<()> {
        self.write_all(&value.to_be_bytes())
    }
}

impl<W: Write + ?Sized> KlvWrite for W {}
