//! SMPTE 12-M timecode values and their binary encoding.

/// A frame-rate-relative timecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timecode {
    rounded_rate: u16,
    drop_frame: bool,
    hour: u8,
    min: u8,
    sec: u8,
    frame: u8,
}

impl Timecode {
    pub fn new(rounded_rate: u16, drop_frame: bool, hour: u8, min: u8, sec: u8, frame: u8) -> Self {
        Timecode {
            rounded_rate,
            drop_frame,
            hour,
            min,
            sec,
            frame,
        }
    }

    /// Timecode at `position` frames from zero.
    ///
    /// For drop-frame timecode, two frame numbers are dropped at the start
    /// of every minute that is not a multiple of ten.
    pub fn from_position(rounded_rate: u16, drop_frame: bool, position: i64) -> Self {
        let rate = rounded_rate as i64;
        let position = position.max(0);

        if drop_frame {
            let frames_per_min = rate * 60 - 2;
            let frames_per_10min = frames_per_min * 10 + 2;
            let frames_per_hour = frames_per_10min * 6;

            let hour = position / frames_per_hour;
            let mut rem = position % frames_per_hour;
            let min_tens = rem / frames_per_10min;
            rem %= frames_per_10min;

            // the first minute of each ten keeps its full frame count
            let min_units = if rem < rate * 60 {
                0
            } else {
                rem -= rate * 60;
                let units = rem / frames_per_min + 1;
                rem %= frames_per_min;
                rem += 2;
                units
            };

            Timecode {
                rounded_rate,
                drop_frame,
                hour: hour as u8,
                min: (min_tens * 10 + min_units) as u8,
                sec: (rem / rate) as u8,
                frame: (rem % rate) as u8,
            }
        } else {
            Timecode {
                rounded_rate,
                drop_frame,
                hour: (position / (rate * 60 * 60)) as u8,
                min: (position / (rate * 60) % 60) as u8,
                sec: (position / rate % 60) as u8,
                frame: (position % rate) as u8,
            }
        }
    }

    pub fn rounded_rate(&self) -> u16 {
        self.rounded_rate
    }

    pub fn drop_frame(&self) -> bool {
        self.drop_frame
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn min(&self) -> u8 {
        self.min
    }

    pub fn sec(&self) -> u8 {
        self.sec
    }

    pub fn frame(&self) -> u8 {
        self.frame
    }
}

/// Encodes a timecode as SMPTE 12-M BCD bytes (frames, seconds, minutes,
/// hours), zeroing the remainder of `bytes`. The drop-frame flag occupies
/// bit 6 of the frames byte.
pub fn encode_smpte_timecode(tc: &Timecode, bytes: &mut [u8]) {
    debug_assert!(bytes.len() >= 4);

    bytes[0] = (tc.frame % 10) | ((tc.frame / 10) & 0x03) << 4;
    if tc.drop_frame {
        bytes[0] |= 0x40;
    }
    bytes[1] = (tc.sec % 10) | ((tc.sec / 10) & 0x07) << 4;
    bytes[2] = (tc.min % 10) | ((tc.min / 10) & 0x07) << 4;
    bytes[3] = (tc.hour % 10) | ((tc.hour / 10) & 0x03) << 4;
    bytes[4..].fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_position_non_drop() {
        let tc = Timecode::from_position(25, false, 0);
        assert_eq!((tc.hour(), tc.min(), tc.sec(), tc.frame()), (0, 0, 0, 0));

        // 1 hour, 5 seconds at 25 fps
        let tc = Timecode::from_position(25, false, 25 * 60 * 60 + 25 * 5);
        assert_eq!((tc.hour(), tc.min(), tc.sec(), tc.frame()), (1, 0, 5, 0));

        let tc = Timecode::from_position(30, false, 29);
        assert_eq!((tc.hour(), tc.min(), tc.sec(), tc.frame()), (0, 0, 0, 29));
    }

    #[test]
    fn from_position_drop_frame() {
        // exactly one minute of frames: 00:01:00;02 after the drop
        let tc = Timecode::from_position(30, true, 1800);
        assert_eq!((tc.hour(), tc.min(), tc.sec(), tc.frame()), (0, 1, 0, 2));

        // ten minutes is a whole number of cycles, nothing dropped there
        let tc = Timecode::from_position(30, true, 17982);
        assert_eq!((tc.hour(), tc.min(), tc.sec(), tc.frame()), (0, 10, 0, 0));

        let tc = Timecode::from_position(30, true, 17982 * 6);
        assert_eq!((tc.hour(), tc.min(), tc.sec(), tc.frame()), (1, 0, 0, 0));
    }

    #[test]
    fn encode_bcd() {
        let tc = Timecode::new(25, false, 10, 11, 12, 13);
        let mut bytes = [0xffu8; 8];
        encode_smpte_timecode(&tc, &mut bytes);

        assert_eq!(bytes, [0x13, 0x12, 0x11, 0x10, 0, 0, 0, 0]);
    }

    #[test]
    fn encode_drop_frame_flag() {
        let tc = Timecode::new(30, true, 0, 0, 0, 29);
        let mut bytes = [0u8; 8];
        encode_smpte_timecode(&tc, &mut bytes);

        assert_eq!(bytes[0], 0x40 | 0x29);
    }
}
