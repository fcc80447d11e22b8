//! VC-3 (SMPTE ST 2019-1, "DNxHD"/"DNxHR") bitstream header parsing.
//!
//! A VC-3 coding unit starts with a fixed-layout header: the header size,
//! version and interlace indicator up front, the image geometry and the
//! compression id at fixed byte offsets, and a macroblock offset table whose
//! declared length must be self-consistent with the header size. Everything
//! after the header is treated as opaque payload.

use crate::parser::{EssenceParser, FrameSizeStatus};
use crate::{EssenceError, Result};

/// Minimum (and, for versions 1 and 2, exact) header size in bytes.
pub const VC3_MIN_HEADER_SIZE: usize = 0x280;

/// Byte offset of the macroblock offset table length field.
const OFFSETS_START: usize = 0x168;

/// How a profile determines its frame byte size.
#[derive(Debug, Clone, Copy)]
enum FrameLayout {
    /// Fixed geometry and coded frame size.
    Fixed { width: u16, height: u16, size: u32 },
    /// Resolution-independent ("DNxHR") profile: the frame size is derived
    /// from the macroblock count and a per-profile packet scale.
    Variable { scale_num: u32, scale_den: u32 },
}

#[derive(Debug, Clone, Copy)]
struct CompressionProfile {
    compression_id: u32,
    is_progressive: bool,
    /// Maximum sample bit depth for this profile.
    bit_depth: u8,
    layout: FrameLayout,
}

const fn fixed(
    compression_id: u32,
    is_progressive: bool,
    width: u16,
    height: u16,
    bit_depth: u8,
    size: u32,
) -> CompressionProfile {
    CompressionProfile {
        compression_id,
        is_progressive,
        bit_depth,
        layout: FrameLayout::Fixed {
            width,
            height,
            size,
        },
    }
}

const fn variable(compression_id: u32, bit_depth: u8, scale_num: u32) -> CompressionProfile {
    CompressionProfile {
        compression_id,
        is_progressive: false,
        bit_depth,
        layout: FrameLayout::Variable {
            scale_num,
            scale_den: 0xff,
        },
    }
}

const COMPRESSION_PROFILES: &[CompressionProfile] = &[
    fixed(1235, true, 1920, 1080, 10, 917504),
    fixed(1237, true, 1920, 1080, 8, 606208),
    fixed(1238, true, 1920, 1080, 8, 917504),
    fixed(1241, false, 1920, 1080, 10, 917504),
    fixed(1242, false, 1920, 1080, 8, 606208),
    fixed(1243, false, 1920, 1080, 8, 917504),
    fixed(1244, false, 1920, 1080, 8, 606208),
    fixed(1250, true, 1280, 720, 10, 458752),
    fixed(1251, true, 1280, 720, 8, 458752),
    fixed(1252, true, 1280, 720, 8, 303104),
    fixed(1253, true, 1920, 1080, 8, 188416),
    fixed(1258, true, 1280, 720, 8, 212992),
    fixed(1259, true, 1920, 1080, 8, 417792),
    fixed(1260, false, 1920, 1080, 8, 417792),
    variable(1270, 12, 0xe000), // DNxHR 444 12-bit
    variable(1271, 12, 0x7000), // DNxHR HQX 12-bit
    variable(1272, 8, 0x7000),  // DNxHR HQ
    variable(1273, 8, 0x4a00),  // DNxHR SQ
    variable(1274, 8, 0x1700),  // DNxHR LB
];

fn find_profile(compression_id: u32) -> Option<&'static CompressionProfile> {
    COMPRESSION_PROFILES
        .iter()
        .find(|p| p.compression_id == compression_id)
}

/// Frame byte size of a resolution-independent profile: macroblock count
/// scaled by the packet scale, rounded up to the next 4096-byte boundary
/// with a 2048-byte margin, floored at 8192 bytes.
fn hr_frame_size(scale_num: u32, scale_den: u32, width: u16, height: u16) -> Result<u32> {
    if width == 0 || height == 0 {
        return Err(EssenceError::InvalidDimensions { width, height });
    }

    let macroblocks = (width as u64).div_ceil(16) * (height as u64).div_ceil(16);
    let size = (macroblocks * scale_num as u64 / scale_den as u64) as u32;
    let size = (size + 2048) & !0xFFF;

    Ok(size.max(8192))
}

fn be_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

fn be_u16(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

fn is_header(data: &[u8]) -> bool {
    if data.len() < VC3_MIN_HEADER_SIZE {
        return false;
    }

    let version = data[4]; // 1 or 2 up to full HD, 3 for larger resolutions
    let interlace = data[5]; // 1, 2 or 3

    if !(1..=3).contains(&version) || !(1..=3).contains(&interlace) {
        return false;
    }

    let header_size = be_u32(data);
    let offsets_size = be_u32(&data[OFFSETS_START..]);
    let nb_offsets = be_u16(&data[OFFSETS_START + 4..]) as u32;

    ((version < 3 && header_size == VC3_MIN_HEADER_SIZE as u32)
        || (version == 3 && header_size >= VC3_MIN_HEADER_SIZE as u32))
        && header_size == (OFFSETS_START + 4) as u32 + offsets_size
        && offsets_size == nb_offsets * 4 + 4
}

fn interlace_code(data: &[u8]) -> u8 {
    data[5] & 0x03
}

fn frame_width(data: &[u8]) -> u16 {
    be_u16(&data[0x1a..])
}

fn frame_height(data: &[u8]) -> u16 {
    // ALPF holds lines per field; double it for interlaced coding units
    let interlaced = interlace_code(data) != 1;
    be_u16(&data[0x18..]) << interlaced as u16
}

fn compression_id(data: &[u8]) -> u32 {
    be_u32(&data[0x28..])
}

/// Properties of one VC-3 frame, extracted from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vc3FrameInfo {
    /// Compression id identifying the coding profile.
    pub compression_id: u32,
    /// Progressive or interlaced scan, taken from the profile table.
    pub is_progressive: bool,
    /// Frame width in pixels.
    pub frame_width: u16,
    /// Frame height in pixels.
    pub frame_height: u16,
    /// Sample bit depth, 8 or 10.
    pub bit_depth: u8,
    /// Total coded frame size in bytes.
    pub frame_size: u32,
}

/// Stateless VC-3 essence parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vc3EssenceParser;

impl Vc3EssenceParser {
    pub fn new() -> Self {
        Vc3EssenceParser
    }
}

impl EssenceParser for Vc3EssenceParser {
    type FrameInfo = Vc3FrameInfo;

    fn parse_frame_start(&self, data: &[u8]) -> Option<usize> {
        // accept a header only if the coding unit is a progressive frame or
        // field 1, so that one accepted start equals one displayable frame
        (0..data.len()).find(|&i| is_header(&data[i..]) && interlace_code(&data[i..]) < 3)
    }

    fn parse_frame_size(&self, data: &[u8]) -> Result<FrameSizeStatus> {
        if data.len() < VC3_MIN_HEADER_SIZE {
            return Ok(FrameSizeStatus::NeedData);
        }
        if !is_header(data) {
            return Err(EssenceError::InvalidHeader);
        }

        let Some(profile) = find_profile(compression_id(data)) else {
            return Ok(FrameSizeStatus::UnknownProfile);
        };

        let frame_size = match profile.layout {
            FrameLayout::Fixed { size, .. } => size,
            FrameLayout::Variable {
                scale_num,
                scale_den,
            } => hr_frame_size(scale_num, scale_den, frame_width(data), frame_height(data))?,
        };

        if data.len() >= frame_size as usize {
            Ok(FrameSizeStatus::Complete(frame_size))
        } else {
            Ok(FrameSizeStatus::NeedData)
        }
    }

    fn parse_frame_info(&self, data: &[u8]) -> Result<Vc3FrameInfo> {
        if data.len() < VC3_MIN_HEADER_SIZE || !is_header(data) {
            return Err(EssenceError::InvalidHeader);
        }

        let compression_id = compression_id(data);
        let profile = find_profile(compression_id)
            .ok_or(EssenceError::UnknownCompressionId(compression_id))?;

        // Some Avid encoders set SST to interlaced for progressive content
        // (and vice versa); the scan type associated with the compression id
        // is authoritative, the bitstream field is ignored.
        let is_progressive = profile.is_progressive;

        let width = frame_width(data);
        let mut height = frame_height(data);

        // Some Avid encoders set ALPF to the frame height instead of the
        // field height for 1080i sources; the profile's frame height is
        // authoritative for fixed-geometry profiles.
        if let FrameLayout::Fixed {
            height: profile_height,
            ..
        } = profile.layout
        {
            height = profile_height;
        }

        let sbd = data[33] >> 5;
        let bit_depth = match sbd {
            1 => 8,
            2 => 10,
            _ => return Err(EssenceError::InvalidBitDepthCode(sbd)),
        };

        let frame_size = match profile.layout {
            FrameLayout::Fixed { size, .. } => size,
            FrameLayout::Variable {
                scale_num,
                scale_den,
            } => hr_frame_size(scale_num, scale_den, width, height)?,
        };

        if let FrameLayout::Fixed {
            width: profile_width,
            ..
        } = profile.layout
        {
            if width != profile_width {
                return Err(EssenceError::FrameWidthMismatch {
                    expected: profile_width,
                    actual: width,
                });
            }
        }
        if bit_depth > profile.bit_depth {
            return Err(EssenceError::BitDepthExceedsProfile {
                actual: bit_depth,
                max: profile.bit_depth,
            });
        }

        Ok(Vc3FrameInfo {
            compression_id,
            is_progressive,
            frame_width: width,
            frame_height: height,
            bit_depth,
            frame_size,
        })
    }
}
