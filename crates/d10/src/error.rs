//! Error types for D-10 content package operations.

use thiserror::Error;

/// Errors that can occur while building or writing D-10 content packages.
///
/// Apart from `Io`, every variant is a contract violation: malformed caller
/// usage or input that cannot form a valid content package sequence. These
/// abort the current write and are not retried.
#[derive(Error, Debug)]
pub enum D10Error {
    /// An I/O error occurred while writing to the byte sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A write referenced a track index that was never registered.
    #[error("track {0} is not registered")]
    UnknownTrack(u32),

    /// `prepare_write` requires a registered picture track.
    #[error("a picture track is required for D-10 content packages")]
    MissingPictureTrack,

    /// The sound output channel index must be in `0..8`.
    #[error("invalid output channel index {0}, must be less than 8")]
    InvalidChannelIndex(u8),

    /// The per-channel sound sample size must be 2 or 3 bytes.
    #[error("invalid sound sample size {0}, must be 2 or 3 bytes")]
    InvalidSoundSampleSize(u32),

    /// The sound sample sequence does not fit the frame rate family.
    #[error("invalid sound sample sequence {0:?} for the configured frame rate")]
    InvalidSoundSampleSequence(Vec<u32>),

    /// A sound track registration disagrees with previously registered
    /// sound tracks on cadence or sample size.
    #[error("sound track registration does not match previously registered tracks")]
    SoundTrackMismatch,

    /// An explicitly set sound sequence offset conflicts with the value
    /// that was already set or detected.
    #[error("sound sequence offset {actual} conflicts with already set offset {expected}")]
    SoundSequenceOffsetConflict {
        /// Offset already in effect.
        expected: u8,
        /// Conflicting offset supplied by the caller.
        actual: u8,
    },

    /// The supplied sample data is too small for the declared sample count.
    #[error("sample data size {size} is too small for {num_samples} samples of size {sample_size}")]
    ShortSampleData {
        /// Bytes supplied by the caller.
        size: usize,
        /// Samples declared by the caller.
        num_samples: u32,
        /// Per-sample byte size of the track.
        sample_size: u32,
    },

    /// A sound write's sample count does not match the content package's
    /// sample count established by an earlier write.
    #[error("sound sample count {actual} does not match content package sample count {expected}")]
    SampleCountMismatch {
        /// Sample count the content package requires.
        expected: u32,
        /// Sample count supplied by the caller.
        actual: u32,
    },

    /// No rotation of the sound sample sequence matches the per-package
    /// sample counts observed so far.
    #[error("no rotation of the sound sample sequence matches the input sample counts")]
    InvalidSoundSequence,

    /// The number of buffered in-progress content packages exceeded the
    /// fixed cap; one track has outrun the others.
    #[error("too many content packages buffered: {0}")]
    TooManyContentPackages(usize),

    /// A content package was left incomplete at final write; a track is
    /// missing sample data.
    #[error("content package at position {0} is incomplete at final write")]
    IncompleteContentPackage(i64),

    /// No complete content package is available to write.
    #[error("no complete content package is available")]
    NoCompleteContentPackage,

    /// A user timecode write without user timecodes enabled, or a second
    /// timecode for the same content package.
    #[error("user timecode is not expected here: {0}")]
    UnexpectedUserTimecode(&'static str),
}
