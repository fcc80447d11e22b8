//! Buffering and ordered write-out of D-10 content packages.

use std::collections::VecDeque;
use std::io::Write;

use tracing::debug;

use crate::content_package::{ContentPackage, ContentPackageInfo};
use crate::klv::Key;
use crate::timecode::Timecode;
use crate::{D10Error, Result};

/// Upper bound on buffered in-progress content packages. Reaching it means
/// one track has outrun the others by 10 seconds.
pub const MAX_CONTENT_PACKAGES: usize = 250;

/// The two frame rate families D-10 supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRate {
    /// 25 Hz; 1920 sound samples per frame.
    Fps25,
    /// 30000/1001 Hz; the 1602/1601 five-frame sound sample cadence.
    Fps2997,
}

impl FrameRate {
    fn is_25hz(self) -> bool {
        matches!(self, FrameRate::Fps25)
    }
}

/// Collects per-track sample writes into complete content packages and
/// serializes them in position order.
///
/// Tracks are registered up front, `prepare_write` freezes the layout, and
/// then samples may be written in any track order. Packages become available
/// for writing once every registered track has contributed its share and,
/// for sound, once the sample sequence offset is known.
pub struct ContentPackageManager {
    info: ContentPackageInfo,
    packages: VecDeque<ContentPackage>,
    free_packages: Vec<ContentPackage>,
    /// Position of the first buffered content package.
    position: i64,
}

impl ContentPackageManager {
    pub fn new(frame_rate: FrameRate) -> Self {
        let (sequence, max_count) = if frame_rate.is_25hz() {
            (vec![1920], 1920)
        } else {
            (vec![1602, 1601, 1602, 1601, 1602], 1602)
        };

        ContentPackageManager {
            info: ContentPackageInfo {
                is_25hz: frame_rate.is_25hz(),
                essence_container_ul: Key([0; 16]),
                have_input_user_timecode: false,
                picture_track_index: None,
                picture_sample_size: 0,
                sound_channels: Default::default(),
                sound_sample_sequence: sequence,
                sound_sequence_offset: None,
                max_sound_sample_count: max_count,
                sound_sample_size: 3,
                system_item_size: 0,
                picture_item_size: 0,
                sound_item_size: 0,
            },
            packages: VecDeque::new(),
            free_packages: Vec::new(),
            position: 0,
        }
    }

    /// Sets the essence container UL carried in every system item.
    pub fn set_essence_container_ul(&mut self, ul: Key) {
        self.info.essence_container_ul = ul;
    }

    /// Requires a user timecode to be supplied for every content package.
    pub fn set_have_input_user_timecode(&mut self, enable: bool) {
        self.info.have_input_user_timecode = enable;
    }

    /// Fixes the sound sample sequence offset instead of detecting it from
    /// the input sample counts.
    pub fn set_sound_sequence_offset(&mut self, offset: u8) -> Result<()> {
        match self.info.sound_sequence_offset {
            Some(existing) if existing != offset => Err(D10Error::SoundSequenceOffsetConflict {
                expected: existing,
                actual: offset,
            }),
            _ => {
                self.info.sound_sequence_offset = Some(offset);
                Ok(())
            }
        }
    }

    pub fn register_picture_track(&mut self, track_index: u32, sample_size: u32) {
        self.info.picture_track_index = Some(track_index);
        self.info.picture_sample_size = sample_size;
    }

    /// Registers a sound track feeding `output_channel_index` of the AES3
    /// sound item. All sound tracks must share the same sample sequence and
    /// sample size.
    pub fn register_sound_track(
        &mut self,
        track_index: u32,
        output_channel_index: u8,
        sample_sequence: &[u32],
        sample_size: u32,
    ) -> Result<()> {
        if output_channel_index >= 8 {
            return Err(D10Error::InvalidChannelIndex(output_channel_index));
        }
        if !(2..=3).contains(&sample_size) {
            return Err(D10Error::InvalidSoundSampleSize(sample_size));
        }
        let expected_len = if self.info.is_25hz { 1 } else { 5 };
        if sample_sequence.len() != expected_len {
            return Err(D10Error::InvalidSoundSampleSequence(
                sample_sequence.to_vec(),
            ));
        }

        if self.info.sound_channels.is_empty() {
            let max_count = sample_sequence.iter().copied().max().unwrap_or(0);
            if max_count != self.info.max_sound_sample_count {
                return Err(D10Error::InvalidSoundSampleSequence(
                    sample_sequence.to_vec(),
                ));
            }
            self.info.sound_sample_sequence = sample_sequence.to_vec();
            self.info.sound_sample_size = sample_size;
        } else if sample_size != self.info.sound_sample_size
            || sample_sequence != self.info.sound_sample_sequence.as_slice()
        {
            return Err(D10Error::SoundTrackMismatch);
        }

        self.info.sound_channels.insert(track_index, output_channel_index);
        Ok(())
    }

    /// Freezes the track layout and computes the item sizes.
    pub fn prepare_write(&mut self) -> Result<()> {
        if self.info.picture_track_index.is_none() {
            return Err(D10Error::MissingPictureTrack);
        }

        self.info.compute_item_sizes();

        // a single-entry sequence has nothing to detect; without sound the
        // empty sound item follows the default cadence from position 0
        if self.info.sound_sample_sequence.len() == 1 || self.info.sound_channels.is_empty() {
            self.info.sound_sequence_offset.get_or_insert(0);
        } else if let Some(offset) = self.info.sound_sequence_offset {
            self.info.sound_sequence_offset =
                Some(offset % self.info.sound_sample_sequence.len() as u8);
        }

        Ok(())
    }

    pub fn system_item_size(&self) -> u32 {
        self.info.system_item_size
    }

    pub fn picture_item_size(&self) -> u32 {
        self.info.picture_item_size
    }

    pub fn sound_item_size(&self) -> u32 {
        self.info.sound_item_size
    }

    /// Total serialized byte size of one content package.
    pub fn content_package_size(&self) -> u32 {
        self.info.system_item_size + self.info.picture_item_size + self.info.sound_item_size
    }

    pub fn sound_sequence_offset(&self) -> Option<u8> {
        self.info.sound_sequence_offset
    }

    /// Position one past the last complete buffered content package.
    pub fn duration(&self) -> i64 {
        let complete = self
            .packages
            .iter()
            .take_while(|p| p.is_complete(&self.info))
            .count();
        self.position + complete as i64
    }

    /// Supplies the user timecode for the next content package without one.
    pub fn write_user_timecode(&mut self, user_timecode: Timecode) -> Result<()> {
        if !self.info.have_input_user_timecode {
            return Err(D10Error::UnexpectedUserTimecode(
                "user timecodes are not enabled",
            ));
        }

        let index = self.packages.iter().position(|p| !p.have_user_timecode());
        let index = match index {
            Some(index) => index,
            None => {
                self.create_content_package()?;
                self.packages.len() - 1
            }
        };
        self.packages[index].set_user_timecode(user_timecode)
    }

    /// Writes `num_samples` samples for `track_index`, splitting across
    /// content packages and creating new ones as required.
    pub fn write_samples(&mut self, track_index: u32, data: &[u8], num_samples: u32) -> Result<()> {
        let sample_size = if self.info.picture_track_index == Some(track_index) {
            self.info.picture_sample_size
        } else if self.info.sound_channels.contains_key(&track_index) {
            self.info.sound_sample_size
        } else {
            return Err(D10Error::UnknownTrack(track_index));
        };
        if num_samples == 0 {
            return Ok(());
        }
        if (data.len() as u64) < sample_size as u64 * num_samples as u64 {
            return Err(D10Error::ShortSampleData {
                size: data.len(),
                num_samples,
                sample_size,
            });
        }

        // skip packages this track has already filled
        let mut index = 0;
        while index < self.packages.len()
            && self.packages[index].is_complete_for_track(&self.info, track_index)
        {
            index += 1;
        }

        let mut data = data;
        let mut remaining = num_samples;
        while remaining > 0 {
            if index >= self.packages.len() {
                self.create_content_package()?;
            }
            let written =
                self.packages[index].write_samples(&self.info, track_index, data, remaining)?;
            remaining -= written;
            data = &data[written as usize * sample_size as usize..];
            index += 1;
        }

        Ok(())
    }

    /// Whether the next content package in position order is ready to write.
    pub fn have_content_package(&self) -> bool {
        let Some(front) = self.packages.front() else {
            return false;
        };
        front.is_complete(&self.info)
            && (self.info.sound_channels.is_empty() || self.info.sound_sequence_offset.is_some())
    }

    /// Serializes and recycles the next content package.
    pub fn write_next_content_package<W: Write>(&mut self, out: &mut W) -> Result<()> {
        if !self.have_content_package() {
            return Err(D10Error::NoCompleteContentPackage);
        }

        // have_content_package checked the front exists
        let Some(mut package) = self.packages.pop_front() else {
            return Err(D10Error::NoCompleteContentPackage);
        };
        let result = package.write(&self.info, out);
        self.free_packages.push(package);
        result?;

        self.position += 1;
        Ok(())
    }

    /// Writes out all remaining complete content packages.
    ///
    /// The sound sample sequence offset is forced to a decision first, so a
    /// short input that never completed a cadence cycle can still be
    /// written. Errors if an incomplete package remains, which means one
    /// track received less sample data than the others.
    pub fn final_write<W: Write>(&mut self, out: &mut W) -> Result<()> {
        if self.info.sound_sequence_offset.is_none() {
            self.info.sound_sequence_offset = self.calc_sound_sequence_offset(true)?;
        }

        while self.have_content_package() {
            self.write_next_content_package(out)?;
        }

        if let Some(front) = self.packages.front() {
            return Err(D10Error::IncompleteContentPackage(front.position()));
        }
        Ok(())
    }

    /// Matches the per-package sound sample counts observed so far against
    /// rotations of the sample sequence.
    ///
    /// Returns `None` when the evidence is still consistent with several
    /// rotations and a decision can be deferred; `is_final` forces the
    /// first matching rotation.
    fn calc_sound_sequence_offset(&self, is_final: bool) -> Result<Option<u8>> {
        if let Some(offset) = self.info.sound_sequence_offset {
            return Ok(Some(offset));
        }

        let input_counts: Vec<u32> = self
            .packages
            .iter()
            .map_while(|p| p.sound_sample_count())
            .collect();

        let sequence = &self.info.sound_sample_sequence;
        let offset = (0..sequence.len()).find(|&offset| {
            input_counts
                .iter()
                .enumerate()
                .all(|(i, &count)| count == sequence[(offset + i) % sequence.len()])
        });
        let Some(offset) = offset else {
            return Err(D10Error::InvalidSoundSequence);
        };

        if is_final || input_counts.len() >= sequence.len() {
            debug!(offset, "resolved sound sample sequence offset");
            Ok(Some(offset as u8))
        } else {
            Ok(None)
        }
    }

    /// Appends a new in-progress content package, recycling a written-out
    /// one when available.
    fn create_content_package(&mut self) -> Result<()> {
        if self.info.sound_sequence_offset.is_none() {
            self.info.sound_sequence_offset = self.calc_sound_sequence_offset(false)?;
        }

        if self.packages.len() >= MAX_CONTENT_PACKAGES {
            return Err(D10Error::TooManyContentPackages(self.packages.len()));
        }
        let mut package = self
            .free_packages
            .pop()
            .unwrap_or_else(ContentPackage::new);

        package.reset(&self.info, self.position + self.packages.len() as i64);
        self.packages.push_back(package);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_package::{KL_SIZE, SYSTEM_ITEM_METADATA_PACK_SIZE};
    use crate::klv::{
        kag_aligned_size, FILL_KEY, PICTURE_ELEMENT_KEY, SOUND_ELEMENT_KEY,
        SYSTEM_METADATA_PACK_KEY,
    };

    fn mono_25hz_manager() -> ContentPackageManager {
        let mut manager = ContentPackageManager::new(FrameRate::Fps25);
        manager.set_essence_container_ul(Key([0x42; 16]));
        manager.register_picture_track(0, 1000);
        manager.register_sound_track(1, 0, &[1920], 2).unwrap();
        manager.prepare_write().unwrap();
        manager
    }

    fn sound_samples_16bit(num: usize) -> Vec<u8> {
        [0x34, 0x12].repeat(num)
    }

    #[test]
    fn round_trip_25hz() {
        let mut manager = mono_25hz_manager();
        assert_eq!(manager.system_item_size(), 512);
        assert_eq!(manager.picture_item_size(), 1536);
        assert_eq!(manager.sound_item_size(), 61952);
        assert_eq!(manager.content_package_size(), 64000);
        assert_eq!(manager.sound_sequence_offset(), Some(0));

        for n in 0..3u8 {
            manager.write_samples(0, &vec![n; 1000], 1).unwrap();
            manager
                .write_samples(1, &sound_samples_16bit(1920), 1920)
                .unwrap();
        }
        assert_eq!(manager.duration(), 3);
        assert!(manager.have_content_package());

        let mut out = Vec::new();
        manager.final_write(&mut out).unwrap();
        assert_eq!(out.len(), 3 * 64000);
        assert!(!manager.have_content_package());
        assert_eq!(manager.duration(), 3);

        for n in 0..3usize {
            let package = &out[n * 64000..(n + 1) * 64000];

            // system item
            assert_eq!(&package[..16], &SYSTEM_METADATA_PACK_KEY.0);
            assert_eq!(&package[16..20], &[0x83, 0x00, 0x00, 57]);
            assert_eq!(package[20], 0x5c);
            assert_eq!(package[21], 0x04); // 25 Hz content package rate
            assert_eq!(&package[25..27], &[0x00, n as u8]); // continuity count
            assert_eq!(&package[27..43], &[0x42; 16]);
            // default user stamp: SMPTE 12-M frame count timecode
            assert_eq!(package[60], 0x81);
            assert_eq!(package[61], n as u8);
            assert_eq!(&package[97..113], &FILL_KEY.0);

            // picture item
            assert_eq!(&package[512..528], &PICTURE_ELEMENT_KEY.0);
            assert_eq!(&package[528..532], &[0x83, 0x00, 0x03, 0xe8]);
            assert!(package[532..1532].iter().all(|&b| b == n as u8));

            // sound item: 1920 samples is 61444 value bytes
            assert_eq!(&package[2048..2064], &SOUND_ELEMENT_KEY.0);
            assert_eq!(&package[2064..2068], &[0x83, 0x00, 0xf0, 0x04]);
            // control word: sequence index 0, count 1920 LE, channel 0 valid
            assert_eq!(&package[2068..2072], &[0x00, 0x80, 0x07, 0x01]);
            // first sample frame, channel 0 slot
            assert_eq!(&package[2072..2076], &[0x00, 0x40, 0x23, 0x01]);
        }
    }

    #[test]
    fn sound_write_spanning_packages() {
        let mut manager = mono_25hz_manager();

        // 2.5 packages' worth in one call
        manager
            .write_samples(1, &sound_samples_16bit(4800), 4800)
            .unwrap();
        for n in 0..3u8 {
            manager.write_samples(0, &vec![n; 1000], 1).unwrap();
        }
        assert_eq!(manager.duration(), 2);

        manager
            .write_samples(1, &sound_samples_16bit(960), 960)
            .unwrap();
        assert_eq!(manager.duration(), 3);

        let mut out = Vec::new();
        manager.final_write(&mut out).unwrap();
        assert_eq!(out.len(), 3 * 64000);
    }

    fn stereo_2997_manager() -> ContentPackageManager {
        let sequence = [1602, 1601, 1602, 1601, 1602];
        let mut manager = ContentPackageManager::new(FrameRate::Fps2997);
        manager.register_picture_track(0, 100);
        manager.register_sound_track(1, 0, &sequence, 2).unwrap();
        manager.prepare_write().unwrap();
        manager
    }

    #[test]
    fn sequence_offset_detected_mid_cycle() {
        let mut manager = stereo_2997_manager();
        assert_eq!(manager.sound_sequence_offset(), None);

        // counts 1601, 1602, 1601 only match the rotation starting at 1
        for &count in &[1601u32, 1602, 1601] {
            manager
                .write_samples(1, &sound_samples_16bit(count as usize), count)
                .unwrap();
        }
        for _ in 0..3 {
            manager.write_samples(0, &[0; 100], 1).unwrap();
        }

        // three observed counts could still be extended either way, so the
        // decision is deferred until the final write
        assert!(!manager.have_content_package());

        let mut out = Vec::new();
        manager.final_write(&mut out).unwrap();
        assert_eq!(manager.sound_sequence_offset(), Some(1));

        let item_size = 512 + 512 + kag_aligned_size(20 + 1602 * 32 + 4);
        assert_eq!(out.len(), 3 * item_size as usize);
    }

    #[test]
    fn sequence_offset_resolves_after_full_cycle() {
        let mut manager = stereo_2997_manager();

        for &count in &[1602u32, 1601, 1602, 1601, 1602] {
            manager
                .write_samples(1, &sound_samples_16bit(count as usize), count)
                .unwrap();
        }
        // creating the sixth package resolves the offset from a full cycle
        manager.write_samples(1, &sound_samples_16bit(1601), 1601).unwrap();
        assert_eq!(manager.sound_sequence_offset(), Some(0));
    }

    #[test]
    fn oversized_first_sound_write_is_rejected() {
        let mut manager = stereo_2997_manager();

        // while the offset is unresolved the first write sets the package's
        // count; one exceeding the cadence maximum can never be valid
        assert!(matches!(
            manager.write_samples(1, &sound_samples_16bit(2000), 2000),
            Err(D10Error::SampleCountMismatch {
                expected: 1602,
                actual: 2000,
            })
        ));
    }

    #[test]
    fn inconsistent_sound_cadence_is_fatal() {
        let mut manager = stereo_2997_manager();

        // 1601, 1601 matches no rotation of the cadence
        manager.write_samples(1, &sound_samples_16bit(1601), 1601).unwrap();
        manager.write_samples(1, &sound_samples_16bit(1601), 1601).unwrap();
        for _ in 0..2 {
            manager.write_samples(0, &[0; 100], 1).unwrap();
        }

        assert!(matches!(
            manager.final_write(&mut Vec::new()),
            Err(D10Error::InvalidSoundSequence)
        ));
    }

    #[test]
    fn final_write_with_incomplete_package() {
        let mut manager = mono_25hz_manager();

        manager.write_samples(0, &[0; 1000], 1).unwrap();
        manager.write_samples(0, &[1; 1000], 1).unwrap();
        manager
            .write_samples(1, &sound_samples_16bit(1920), 1920)
            .unwrap();

        // the second package has picture but no sound
        let mut out = Vec::new();
        assert!(matches!(
            manager.final_write(&mut out),
            Err(D10Error::IncompleteContentPackage(1))
        ));
        // the complete first package was still written
        assert_eq!(out.len(), 64000);
    }

    #[test]
    fn picture_only_output() {
        let mut manager = ContentPackageManager::new(FrameRate::Fps25);
        manager.register_picture_track(0, 10);
        manager.prepare_write().unwrap();

        manager.write_samples(0, &[7; 10], 1).unwrap();
        assert!(manager.have_content_package());

        let mut out = Vec::new();
        manager.final_write(&mut out).unwrap();
        // the sound item is present but empty: no channel valid flags
        assert_eq!(out.len() as u32, manager.content_package_size());
        let sound_offset = (manager.system_item_size() + manager.picture_item_size()) as usize;
        assert_eq!(&out[sound_offset..sound_offset + 16], &SOUND_ELEMENT_KEY.0);
        assert_eq!(
            &out[sound_offset + 20..sound_offset + 24],
            &[0x00, 0x80, 0x07, 0x00]
        );
    }

    #[test]
    fn buffered_package_cap() {
        let mut manager = ContentPackageManager::new(FrameRate::Fps25);
        manager.register_picture_track(0, 10);
        manager.prepare_write().unwrap();

        for _ in 0..MAX_CONTENT_PACKAGES {
            manager.write_samples(0, &[7; 10], 1).unwrap();
        }
        assert!(matches!(
            manager.write_samples(0, &[7; 10], 1),
            Err(D10Error::TooManyContentPackages(MAX_CONTENT_PACKAGES))
        ));
    }

    #[test]
    fn package_cap_counts_recycled_packages() {
        let mut manager = ContentPackageManager::new(FrameRate::Fps25);
        manager.register_picture_track(0, 10);
        manager.prepare_write().unwrap();

        // drain two packages so the free list is populated
        manager.write_samples(0, &[7; 10], 1).unwrap();
        manager.write_samples(0, &[7; 10], 1).unwrap();
        let mut out = Vec::new();
        manager.write_next_content_package(&mut out).unwrap();
        manager.write_next_content_package(&mut out).unwrap();

        // the in-flight cap holds regardless of recycling
        for _ in 0..MAX_CONTENT_PACKAGES {
            manager.write_samples(0, &[7; 10], 1).unwrap();
        }
        assert!(matches!(
            manager.write_samples(0, &[7; 10], 1),
            Err(D10Error::TooManyContentPackages(MAX_CONTENT_PACKAGES))
        ));
    }

    #[test]
    fn user_timecode_written_to_system_item() {
        let mut manager = ContentPackageManager::new(FrameRate::Fps25);
        manager.set_have_input_user_timecode(true);
        manager.register_picture_track(0, 10);
        manager.register_sound_track(1, 0, &[1920], 2).unwrap();
        manager.prepare_write().unwrap();

        manager.write_samples(0, &[7; 10], 1).unwrap();
        manager
            .write_samples(1, &sound_samples_16bit(1920), 1920)
            .unwrap();
        // not complete until the user timecode arrives
        assert!(!manager.have_content_package());

        manager
            .write_user_timecode(Timecode::new(25, false, 10, 0, 0, 0))
            .unwrap();
        assert!(manager.have_content_package());

        let mut out = Vec::new();
        manager.write_next_content_package(&mut out).unwrap();
        assert_eq!(out[60], 0x81);
        assert_eq!(out[61], 0x00); // frames
        assert_eq!(out[64], 0x10); // hours
    }

    #[test]
    fn user_timecode_requires_enabling() {
        let mut manager = mono_25hz_manager();
        assert!(matches!(
            manager.write_user_timecode(Timecode::new(25, false, 0, 0, 0, 0)),
            Err(D10Error::UnexpectedUserTimecode(_))
        ));
    }

    #[test]
    fn registration_validation() {
        let mut manager = ContentPackageManager::new(FrameRate::Fps25);
        assert!(matches!(
            manager.register_sound_track(1, 8, &[1920], 2),
            Err(D10Error::InvalidChannelIndex(8))
        ));
        assert!(matches!(
            manager.register_sound_track(1, 0, &[1920], 4),
            Err(D10Error::InvalidSoundSampleSize(4))
        ));
        assert!(matches!(
            manager.register_sound_track(1, 0, &[1602, 1601, 1602, 1601, 1602], 2),
            Err(D10Error::InvalidSoundSampleSequence(_))
        ));

        manager.register_sound_track(1, 0, &[1920], 2).unwrap();
        // a second sound track must match the first
        assert!(matches!(
            manager.register_sound_track(2, 1, &[1920], 3),
            Err(D10Error::SoundTrackMismatch)
        ));
        manager.register_sound_track(2, 1, &[1920], 2).unwrap();

        assert!(matches!(
            manager.prepare_write(),
            Err(D10Error::MissingPictureTrack)
        ));
        manager.register_picture_track(0, 10);
        manager.prepare_write().unwrap();

        assert!(matches!(
            manager.write_samples(9, &[0; 10], 1),
            Err(D10Error::UnknownTrack(9))
        ));
    }

    #[test]
    fn explicit_sequence_offset() {
        let mut manager = ContentPackageManager::new(FrameRate::Fps2997);
        manager.set_sound_sequence_offset(6).unwrap();
        manager.set_sound_sequence_offset(6).unwrap();
        assert!(matches!(
            manager.set_sound_sequence_offset(2),
            Err(D10Error::SoundSequenceOffsetConflict {
                expected: 6,
                actual: 2,
            })
        ));

        manager.register_picture_track(0, 10);
        manager
            .register_sound_track(1, 0, &[1602, 1601, 1602, 1601, 1602], 2)
            .unwrap();
        manager.prepare_write().unwrap();
        // reduced modulo the sequence length
        assert_eq!(manager.sound_sequence_offset(), Some(1));
    }

    #[test]
    fn system_item_pack_size_is_fixed() {
        assert_eq!(SYSTEM_ITEM_METADATA_PACK_SIZE, 57);
        assert_eq!(kag_aligned_size(KL_SIZE + 57 + KL_SIZE), 512);
    }
}
