//! D-10 (SMPTE 386M) content package building and serialization.
//!
//! A D-10 essence container stores one content package per frame: a system
//! item with metadata and timecode, an MPEG picture item and an 8-channel
//! AES3 sound item, each KLV wrapped and padded to the KLV alignment grid.
//!
//! [`ContentPackageManager`] is the main entry point. Register the picture
//! and sound tracks, call `prepare_write`, then feed samples per track in
//! any order; the manager interleaves them into position-ordered content
//! packages and serializes each one byte-exactly once it is complete.

pub mod error;
pub mod klv;
pub mod manager;
pub mod timecode;

mod content_package;

pub use error::D10Error;
pub use klv::{Key, KlvWrite, KAG_SIZE};
pub use manager::{ContentPackageManager, FrameRate, MAX_CONTENT_PACKAGES};
pub use timecode::Timecode;

pub type Result<T> = std::result::Result<T, D10Error>;
