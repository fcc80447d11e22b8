//! The capability set shared by essence parser variants.

use crate::Result;

/// Outcome of resolving a frame's byte size from buffered data.
///
/// `NeedData` and `UnknownProfile` are ordinary return values driving the
/// reader's retry-with-more-data loop; they are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeStatus {
    /// The frame size is resolved and the buffer holds the complete frame.
    Complete(u32),
    /// More bytes are needed, either to complete the header or the frame.
    NeedData,
    /// The header is valid but its compression id is not a known profile.
    UnknownProfile,
}

/// A stateless binary decoder for one elementary stream family.
///
/// Implementations answer "where does a frame start", "how many bytes is
/// this frame" and "what are this frame's properties" from fixed-layout
/// headers embedded in the stream.
pub trait EssenceParser {
    /// Frame properties extracted by [`parse_frame_info`](Self::parse_frame_info).
    type FrameInfo;

    /// Scans for the first offset at which a valid frame header starts.
    ///
    /// Only headers that begin a full displayable frame are accepted; a
    /// second-field header of an interlaced pair is skipped. Returns `None`
    /// when no frame start is found in the searched span. The caller must
    /// supply enough trailing bytes to contain a full header or risk false
    /// negatives near the end of the buffer.
    fn parse_frame_start(&self, data: &[u8]) -> Option<usize>;

    /// Resolves the byte size of the frame starting at offset 0.
    ///
    /// The buffer must start with a valid frame header once it is long
    /// enough to contain one; a malformed header at that point is a contract
    /// violation and fails with [`EssenceError::InvalidHeader`]
    /// (crate::EssenceError::InvalidHeader).
    fn parse_frame_size(&self, data: &[u8]) -> Result<FrameSizeStatus>;

    /// Extracts the frame properties from the frame starting at offset 0.
    ///
    /// Requires a complete, valid header; callers are expected to have used
    /// [`parse_frame_start`](Self::parse_frame_start) and
    /// [`parse_frame_size`](Self::parse_frame_size) first.
    fn parse_frame_info(&self, data: &[u8]) -> Result<Self::FrameInfo>;
}
