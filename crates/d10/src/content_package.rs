//! One content package: a synchronized unit of picture, sound and timecode.

use std::collections::BTreeMap;
use std::io::Write;

use byteorder::WriteBytesExt;
use bytes::BytesMut;

use crate::klv::{
    kag_aligned_size, Key, KlvWrite, EMPTY_PACKAGE_METADATA_SET_KEY, KEY_SIZE, LLEN,
    PICTURE_ELEMENT_KEY, SOUND_ELEMENT_KEY, SYSTEM_METADATA_PACK_KEY,
};
use crate::timecode::{encode_smpte_timecode, Timecode};
use crate::{D10Error, Result};

/// System metadata pack value: 7 core bytes, the essence container UL, a
/// null creation timestamp and the user timestamp.
pub(crate) const SYSTEM_ITEM_METADATA_PACK_SIZE: u32 = 7 + 16 + 17 + 17;

/// Key plus fixed BER length.
pub(crate) const KL_SIZE: u32 = (KEY_SIZE + LLEN) as u32;

/// AES3 sound item: one 4-byte slot per sample frame for each of the 8
/// logical channels.
const AES3_SLOT_SIZE: usize = 4;
const AES3_CHANNELS: usize = 8;
const AES3_FRAME_SIZE: usize = AES3_SLOT_SIZE * AES3_CHANNELS;

// a fill item must fit in the gap left by one missing sample frame
const _: () = assert!(KL_SIZE < AES3_FRAME_SIZE as u32);

/// Shared, immutable-after-`prepare_write` description of every content
/// package in the file.
#[derive(Debug)]
pub(crate) struct ContentPackageInfo {
    pub(crate) is_25hz: bool,
    pub(crate) essence_container_ul: Key,
    pub(crate) have_input_user_timecode: bool,
    pub(crate) picture_track_index: Option<u32>,
    pub(crate) picture_sample_size: u32,
    /// Track index to output channel index.
    pub(crate) sound_channels: BTreeMap<u32, u8>,
    pub(crate) sound_sample_sequence: Vec<u32>,
    pub(crate) sound_sequence_offset: Option<u8>,
    pub(crate) max_sound_sample_count: u32,
    pub(crate) sound_sample_size: u32,
    pub(crate) system_item_size: u32,
    pub(crate) picture_item_size: u32,
    pub(crate) sound_item_size: u32,
}

impl ContentPackageInfo {
    pub(crate) fn sound_value_size(&self, sample_count: u32) -> u32 {
        sample_count * AES3_FRAME_SIZE as u32 + 4
    }

    pub(crate) fn compute_item_sizes(&mut self) {
        self.system_item_size =
            kag_aligned_size(KL_SIZE + SYSTEM_ITEM_METADATA_PACK_SIZE + KL_SIZE);
        self.picture_item_size = kag_aligned_size(KL_SIZE + self.picture_sample_size);
        self.sound_item_size =
            kag_aligned_size(KL_SIZE + self.sound_value_size(self.max_sound_sample_count));
    }
}

/// One in-progress or recycled content package.
///
/// Owned exclusively by the manager; filled incrementally by any number of
/// `write_samples` calls across tracks, then serialized and recycled.
pub(crate) struct ContentPackage {
    position: i64,
    user_timecode: Option<Timecode>,
    picture_data: BytesMut,
    /// Worst-case-sized AES3 buffer, allocated once and kept across reuse.
    sound_data: BytesMut,
    sound_sequence_index: usize,
    /// Sound sample count for this package; unknown until the sequence
    /// offset is known or the first sound write arrives.
    sound_sample_count: Option<u32>,
    /// Samples written so far, per registered sound track.
    channel_sample_counts: BTreeMap<u32, u32>,
}

impl ContentPackage {
    pub(crate) fn new() -> Self {
        ContentPackage {
            position: 0,
            user_timecode: None,
            picture_data: BytesMut::new(),
            sound_data: BytesMut::new(),
            sound_sequence_index: 0,
            sound_sample_count: None,
            channel_sample_counts: BTreeMap::new(),
        }
    }

    /// Prepares this package (new or recycled) for `position`.
    pub(crate) fn reset(&mut self, info: &ContentPackageInfo, position: i64) {
        self.user_timecode = None;
        self.picture_data.clear();
        self.position = position;

        match info.sound_sequence_offset {
            Some(offset) => {
                self.sound_sequence_index = ((position + offset as i64)
                    % info.sound_sample_sequence.len() as i64)
                    as usize;
                self.sound_sample_count =
                    Some(info.sound_sample_sequence[self.sound_sequence_index]);
            }
            None => {
                self.sound_sequence_index = 0;
                self.sound_sample_count = None;
            }
        }

        // initialise the empty AES3 sound data once; every slot carries its
        // channel number in the low nibble of byte 0
        if self.sound_data.is_empty() {
            let size = info.sound_value_size(info.max_sound_sample_count) as usize;
            self.sound_data.resize(size, 0);
            for s in 0..info.max_sound_sample_count as usize {
                for c in 0..AES3_CHANNELS {
                    self.sound_data[4 + s * AES3_FRAME_SIZE + c * AES3_SLOT_SIZE] = c as u8;
                }
            }
        }

        // channel valid flags
        self.sound_data[3] = 0;
        self.channel_sample_counts.clear();
        for (&track_index, &channel) in &info.sound_channels {
            self.channel_sample_counts.insert(track_index, 0);
            self.sound_data[3] |= 1 << channel;
        }
    }

    pub(crate) fn position(&self) -> i64 {
        self.position
    }

    pub(crate) fn sound_sample_count(&self) -> Option<u32> {
        self.sound_sample_count
    }

    pub(crate) fn have_user_timecode(&self) -> bool {
        self.user_timecode.is_some()
    }

    pub(crate) fn set_user_timecode(&mut self, user_timecode: Timecode) -> Result<()> {
        if self.user_timecode.is_some() {
            return Err(D10Error::UnexpectedUserTimecode(
                "content package already has a user timecode",
            ));
        }
        self.user_timecode = Some(user_timecode);
        Ok(())
    }

    /// Whether this package needs no further data from `track_index`.
    pub(crate) fn is_complete_for_track(
        &self,
        info: &ContentPackageInfo,
        track_index: u32,
    ) -> bool {
        if info.picture_track_index == Some(track_index) {
            return self.picture_data.len() == info.picture_sample_size as usize;
        }

        match self.sound_sample_count {
            Some(count) => self
                .channel_sample_counts
                .get(&track_index)
                .is_some_and(|&written| written == count),
            None => false,
        }
    }

    /// Writes as many of `num_samples` as fit; returns the number consumed.
    pub(crate) fn write_samples(
        &mut self,
        info: &ContentPackageInfo,
        track_index: u32,
        data: &[u8],
        num_samples: u32,
    ) -> Result<u32> {
        if info.picture_track_index == Some(track_index) {
            let sample_size = info.picture_sample_size as usize;
            if data.len() < sample_size {
                return Err(D10Error::ShortSampleData {
                    size: data.len(),
                    num_samples: 1,
                    sample_size: info.picture_sample_size,
                });
            }
            self.picture_data.clear();
            self.picture_data.extend_from_slice(&data[..sample_size]);
            return Ok(1);
        }

        let channel = *info
            .sound_channels
            .get(&track_index)
            .ok_or(D10Error::UnknownTrack(track_index))?;

        let count = match self.sound_sample_count {
            Some(count) => count,
            None => match info.sound_sequence_offset {
                // the package was created before the offset resolved
                Some(offset) => {
                    let index = ((self.position + offset as i64)
                        % info.sound_sample_sequence.len() as i64)
                        as usize;
                    self.sound_sequence_index = index;
                    let count = info.sound_sample_sequence[index];
                    self.sound_sample_count = Some(count);
                    count
                }
                // this call's sample count becomes the package's count; it
                // must fit the cadence maximum the sound buffer is sized for
                None => {
                    if num_samples > info.max_sound_sample_count {
                        return Err(D10Error::SampleCountMismatch {
                            expected: info.max_sound_sample_count,
                            actual: num_samples,
                        });
                    }
                    self.sound_sample_count = Some(num_samples);
                    num_samples
                }
            },
        };

        // while the offset is unresolved a call must supply exactly one
        // package's worth of samples, otherwise the observed per-package
        // counts would be meaningless
        if info.sound_sequence_offset.is_none() && num_samples != count {
            return Err(D10Error::SampleCountMismatch {
                expected: count,
                actual: num_samples,
            });
        }

        let start = *self
            .channel_sample_counts
            .get(&track_index)
            .ok_or(D10Error::UnknownTrack(track_index))?;
        let write_num_samples = (count - start).min(num_samples);

        let need = write_num_samples as usize * info.sound_sample_size as usize;
        if data.len() < need {
            return Err(D10Error::ShortSampleData {
                size: data.len(),
                num_samples: write_num_samples,
                sample_size: info.sound_sample_size,
            });
        }

        self.copy_sound_samples(&data[..need], channel, start, info.sound_sample_size);
        if let Some(written) = self.channel_sample_counts.get_mut(&track_index) {
            *written = start + write_num_samples;
        }

        Ok(write_num_samples)
    }

    /// Bit-packs samples into the channel's AES3 slots. The low nibble of
    /// slot byte 0 carries the channel number; sample bits are shifted up
    /// by one nibble.
    fn copy_sound_samples(&mut self, data: &[u8], channel: u8, start_sample: u32, sample_size: u32) {
        let mut out = 4 + start_sample as usize * AES3_FRAME_SIZE + channel as usize * AES3_SLOT_SIZE;

        if sample_size == 3 {
            // 24-bit
            for input in data.chunks_exact(3) {
                self.sound_data[out] = channel | (input[0] << 4);
                self.sound_data[out + 1] = (input[0] >> 4) | (input[1] << 4);
                self.sound_data[out + 2] = (input[1] >> 4) | (input[2] << 4);
                self.sound_data[out + 3] = input[2] >> 4;
                out += AES3_FRAME_SIZE;
            }
        } else {
            // 16-bit
            for input in data.chunks_exact(2) {
                self.sound_data[out] = channel;
                self.sound_data[out + 1] = input[0] << 4;
                self.sound_data[out + 2] = (input[0] >> 4) | (input[1] << 4);
                self.sound_data[out + 3] = input[1] >> 4;
                out += AES3_FRAME_SIZE;
            }
        }
    }

    /// Whether every registered item of this package is filled.
    pub(crate) fn is_complete(&self, info: &ContentPackageInfo) -> bool {
        if info.have_input_user_timecode && self.user_timecode.is_none() {
            return false;
        }

        if self.picture_data.len() != info.picture_sample_size as usize {
            return false;
        }

        if !self.channel_sample_counts.is_empty() && self.sound_sample_count.is_none() {
            return false;
        }

        let count = self.sound_sample_count.unwrap_or(0);
        self.channel_sample_counts
            .values()
            .all(|&written| written == count)
    }

    /// Serializes the completed package: system item, picture item and
    /// sound item, each padded to its precomputed size.
    pub(crate) fn write<W: Write>(&mut self, info: &ContentPackageInfo, out: &mut W) -> Result<()> {
        let offset = info
            .sound_sequence_offset
            .ok_or(D10Error::NoCompleteContentPackage)?;

        self.sound_sequence_index =
            ((self.position + offset as i64) % info.sound_sample_sequence.len() as i64) as usize;
        let expected = info.sound_sample_sequence[self.sound_sequence_index];
        let count = match self.sound_sample_count {
            Some(count) if count == expected => count,
            Some(count) => {
                return Err(D10Error::SampleCountMismatch {
                    expected,
                    actual: count,
                });
            }
            None => return Err(D10Error::IncompleteContentPackage(self.position)),
        };

        // AES3 control word: FVUCP valid flag 0 plus the 5-sequence count,
        // then the samples per frame (little-endian)
        self.sound_data[0] = (self.sound_sequence_index & 0x07) as u8;
        self.sound_data[1] = (count & 0xff) as u8;
        self.sound_data[2] = ((count >> 8) & 0xff) as u8;

        let system_size = self.write_system_item(info, out)?;
        out.write_fill(info.system_item_size - system_size)?;

        out.write_fixed_kl(&PICTURE_ELEMENT_KEY, self.picture_data.len() as u32)?;
        out.write_all(&self.picture_data)?;
        out.write_fill(info.picture_item_size - (KL_SIZE + self.picture_data.len() as u32))?;

        let sound_value_size = info.sound_value_size(count);
        out.write_fixed_kl(&SOUND_ELEMENT_KEY, sound_value_size)?;
        out.write_all(&self.sound_data[..sound_value_size as usize])?;
        out.write_fill(info.sound_item_size - (KL_SIZE + sound_value_size))?;

        Ok(())
    }

    /// Writes the system item's metadata pack and empty package metadata
    /// set, returning the number of bytes written.
    fn write_system_item<W: Write>(&self, info: &ContentPackageInfo, out: &mut W) -> Result<u32> {
        out.write_fixed_kl(&SYSTEM_METADATA_PACK_KEY, SYSTEM_ITEM_METADATA_PACK_SIZE)?;

        // system metadata bitmap 0x5c: SMPTE universal label, user
        // date/time stamp, picture item and sound item present
        out.write_u8(0x5c)?;
        // content package rate: 25 or 30/1.001
        out.write_u8(if info.is_25hz { 2 << 1 } else { (3 << 1) | 1 })?;
        out.write_u8(0x00)?; // content package type (default)
        out.write_u16_be(0x0000)?; // channel handle (default)
        out.write_u16_be(self.position.rem_euclid(65536) as u16)?; // continuity count

        out.write_ul(&info.essence_container_ul)?;

        // null package creation date/time stamp
        out.write_all(&[0u8; 17])?;

        // user date/time stamp, defaulting to a frame count timecode
        let mut ts_bytes = [0u8; 17];
        ts_bytes[0] = 0x81; // SMPTE 12-M timecode
        let tc = self.user_timecode.unwrap_or_else(|| {
            Timecode::from_position(if info.is_25hz { 25 } else { 30 }, false, self.position)
        });
        encode_smpte_timecode(&tc, &mut ts_bytes[1..]);
        out.write_all(&ts_bytes)?;

        out.write_fixed_kl(&EMPTY_PACKAGE_METADATA_SET_KEY, 0)?;

        Ok(KL_SIZE + SYSTEM_ITEM_METADATA_PACK_SIZE + KL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_info() -> ContentPackageInfo {
        let mut info = ContentPackageInfo {
            is_25hz: true,
            essence_container_ul: Key([0x42; 16]),
            have_input_user_timecode: false,
            picture_track_index: Some(0),
            picture_sample_size: 1000,
            sound_channels: BTreeMap::from([(1, 0)]),
            sound_sample_sequence: vec![1920],
            sound_sequence_offset: Some(0),
            max_sound_sample_count: 1920,
            sound_sample_size: 2,
            system_item_size: 0,
            picture_item_size: 0,
            sound_item_size: 0,
        };
        info.compute_item_sizes();
        info
    }

    #[test]
    fn item_sizes() {
        let info = mono_info();
        assert_eq!(info.system_item_size, 512);
        assert_eq!(info.picture_item_size, 1536);
        assert_eq!(info.sound_item_size, 61952);
    }

    #[test]
    fn incremental_fill_and_completeness() {
        let info = mono_info();
        let mut package = ContentPackage::new();
        package.reset(&info, 0);

        assert!(!package.is_complete(&info));
        assert!(!package.is_complete_for_track(&info, 0));
        assert!(!package.is_complete_for_track(&info, 1));

        assert_eq!(package.write_samples(&info, 0, &[7; 1000], 1).unwrap(), 1);
        assert!(package.is_complete_for_track(&info, 0));
        assert!(!package.is_complete(&info));

        // sound arrives in two writes
        assert_eq!(
            package.write_samples(&info, 1, &[0; 1000 * 2], 1000).unwrap(),
            1000
        );
        assert!(!package.is_complete(&info));
        assert_eq!(
            package.write_samples(&info, 1, &[0; 920 * 2], 920).unwrap(),
            920
        );
        assert!(package.is_complete(&info));
    }

    #[test]
    fn excess_samples_are_not_consumed() {
        let info = mono_info();
        let mut package = ContentPackage::new();
        package.reset(&info, 0);

        // 2000 samples offered, only one package's worth fits
        assert_eq!(
            package.write_samples(&info, 1, &[0; 2000 * 2], 2000).unwrap(),
            1920
        );
        assert!(package.is_complete_for_track(&info, 1));
    }

    #[test]
    fn recycled_package_starts_empty() {
        let info = mono_info();
        let mut package = ContentPackage::new();
        package.reset(&info, 0);

        package.write_samples(&info, 0, &[7; 1000], 1).unwrap();
        package
            .write_samples(&info, 1, &[0; 1920 * 2], 1920)
            .unwrap();
        assert!(package.is_complete(&info));

        package.reset(&info, 5);
        assert!(!package.is_complete(&info));
        assert_eq!(package.position(), 5);
        assert!(!package.have_user_timecode());
        assert!(package.channel_sample_counts.values().all(|&c| c == 0));
    }

    #[test]
    fn sound_packing_16_bit() {
        let mut info = mono_info();
        info.sound_channels = BTreeMap::from([(1, 2)]);
        let mut package = ContentPackage::new();
        package.reset(&info, 0);

        package.write_samples(&info, 1, &[0x34, 0x12], 1).unwrap();

        let slot = 4 + 2 * AES3_SLOT_SIZE;
        assert_eq!(
            &package.sound_data[slot..slot + 4],
            &[0x02, 0x40, 0x23, 0x01]
        );
        // neighbouring channel slots keep their empty pattern
        assert_eq!(&package.sound_data[4..8], &[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&package.sound_data[4 + 12..4 + 16], &[0x03, 0x00, 0x00, 0x00]);
        // channel valid flags
        assert_eq!(package.sound_data[3], 1 << 2);
    }

    #[test]
    fn sound_packing_24_bit() {
        let mut info = mono_info();
        info.sound_sample_size = 3;
        let mut package = ContentPackage::new();
        package.reset(&info, 0);

        package
            .write_samples(&info, 1, &[0x56, 0x34, 0x12], 1)
            .unwrap();

        assert_eq!(
            &package.sound_data[4..8],
            &[0x60, 0x45, 0x23, 0x01]
        );
    }

    #[test]
    fn oversized_lazy_count_is_rejected() {
        let mut info = mono_info();
        info.sound_sequence_offset = None;
        let mut package = ContentPackage::new();
        package.reset(&info, 0);

        // more samples than the sound buffer holds frames for
        assert!(matches!(
            package.write_samples(&info, 1, &[0; 2000 * 2], 2000),
            Err(D10Error::SampleCountMismatch {
                expected: 1920,
                actual: 2000,
            })
        ));
        assert!(package.sound_sample_count().is_none());
    }

    #[test]
    fn mismatched_count_while_offset_unresolved() {
        let mut info = mono_info();
        info.sound_sequence_offset = None;
        let mut package = ContentPackage::new();
        package.reset(&info, 0);

        assert_eq!(
            package.write_samples(&info, 1, &[0; 1600 * 2], 1600).unwrap(),
            1600
        );
        assert!(matches!(
            package.write_samples(&info, 1, &[0; 100 * 2], 100),
            Err(D10Error::SampleCountMismatch {
                expected: 1600,
                actual: 100,
            })
        ));
    }
}
