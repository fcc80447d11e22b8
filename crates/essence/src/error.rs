//! Error types for essence parsing operations.

use thiserror::Error;

/// Errors that can occur while parsing essence headers or reading samples.
#[derive(Error, Debug)]
pub enum EssenceError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The buffer does not start with a valid frame header.
    ///
    /// Callers must locate a frame start with
    /// [`parse_frame_start`](crate::EssenceParser::parse_frame_start) before
    /// resolving sizes or extracting frame info.
    #[error("buffer does not start with a valid frame header")]
    InvalidHeader,

    /// The compression id embedded in the header is not a known profile.
    #[error("unknown compression id: {0}")]
    UnknownCompressionId(u32),

    /// The header declares zero frame dimensions.
    #[error("frame dimensions are zero: {width}x{height}")]
    InvalidDimensions {
        /// Declared frame width in pixels.
        width: u16,
        /// Declared frame height in pixels.
        height: u16,
    },

    /// The sample bit depth code is not one of the two legal values.
    #[error("invalid sample bit depth code: {0}")]
    InvalidBitDepthCode(u8),

    /// The decoded frame width does not match the compression profile.
    #[error("frame width {actual} does not match profile width {expected}")]
    FrameWidthMismatch {
        /// Width declared by the compression profile.
        expected: u16,
        /// Width decoded from the header.
        actual: u16,
    },

    /// The decoded bit depth exceeds the compression profile's maximum.
    #[error("bit depth {actual} exceeds profile maximum {max}")]
    BitDepthExceedsProfile {
        /// Bit depth decoded from the header.
        actual: u8,
        /// Maximum bit depth declared by the compression profile.
        max: u8,
    },
}
