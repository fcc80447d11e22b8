//! Raw essence parsing and sample boundary detection.
//!
//! This crate answers three questions about a compressed video elementary
//! stream: where does a frame start, how many bytes does it occupy, and what
//! are its properties (resolution, bit depth, scan structure). Payload bytes
//! are treated as opaque; only fixed-layout headers are read.
//!
//! [`RawEssenceReader`] turns an arbitrary byte source into whole samples,
//! either by a fixed sample size or by consulting an essence parser for the
//! boundaries.

pub mod error;
pub mod parser;
pub mod reader;
pub mod vc3;

pub use error::EssenceError;
pub use parser::{EssenceParser, FrameSizeStatus};
pub use reader::{RawEssenceReader, SampleBoundary};
pub use vc3::{Vc3EssenceParser, Vc3FrameInfo};

/// Result type for essence parsing operations
pub type Result<T> = std::result::Result<T, EssenceError>;
