//! Reading whole samples from a raw essence byte source.

use std::io::{ErrorKind, Read};

use tracing::warn;

use crate::parser::{EssenceParser, FrameSizeStatus};
use crate::vc3::Vc3EssenceParser;
use crate::Result;

const READ_BLOCK_SIZE: usize = 8192;

/// How sample boundaries are found in the raw byte stream.
#[derive(Debug)]
pub enum SampleBoundary {
    /// Every sample has the same known byte size.
    FixedSize(u32),
    /// Sample boundaries are discovered by the VC-3 essence parser.
    Vc3(Vc3EssenceParser),
}

/// Pulls bytes from an input source and exposes them as whole samples.
///
/// One `read_samples` call buffers up to the requested number of complete
/// samples; bytes read ahead of the last complete sample are carried over to
/// the next call. A short read at the end of the input yields fewer (or
/// zero) samples rather than an error, and a trailing partial sample is
/// never reported as complete.
pub struct RawEssenceReader<R> {
    input: R,
    boundary: SampleBoundary,

    /// Accumulated bytes; `..sample_data_size` is the current samples' data,
    /// the rest is read-ahead for the next call.
    buf: Vec<u8>,
    sample_data_size: usize,
    num_samples: u32,

    read_first_sample: bool,
    last_sample_read: bool,

    max_read_length: Option<u64>,
    total_read: u64,
}

impl<R: Read> RawEssenceReader<R> {
    pub fn new(input: R, boundary: SampleBoundary) -> Self {
        RawEssenceReader {
            input,
            boundary,
            buf: Vec::new(),
            sample_data_size: 0,
            num_samples: 0,
            read_first_sample: false,
            last_sample_read: false,
            max_read_length: None,
            total_read: 0,
        }
    }

    /// Reader for essence with a fixed sample byte size.
    pub fn with_fixed_sample_size(input: R, sample_size: u32) -> Self {
        Self::new(input, SampleBoundary::FixedSize(sample_size))
    }

    /// Reader that delineates VC-3 frames with the essence parser.
    pub fn with_vc3_parser(input: R) -> Self {
        Self::new(input, SampleBoundary::Vc3(Vc3EssenceParser::new()))
    }

    /// Limits how many bytes may be consumed from the input in total.
    pub fn set_max_read_length(&mut self, len: u64) {
        self.max_read_length = Some(len);
    }

    /// Reads up to `num_samples` complete samples.
    ///
    /// Returns the number of samples actually read; zero means the end of
    /// the input was reached.
    pub fn read_samples(&mut self, num_samples: u32) -> Result<u32> {
        if self.last_sample_read || num_samples == 0 {
            return Ok(0);
        }

        // drop the previous call's samples, keep the read-ahead
        self.buf.drain(..self.sample_data_size);
        self.sample_data_size = 0;
        self.num_samples = 0;

        match self.boundary {
            SampleBoundary::FixedSize(sample_size) => {
                let sample_size = sample_size as usize;
                let target = sample_size * num_samples as usize;
                if self.buf.len() < target {
                    self.read_bytes(target - self.buf.len())?;
                }
                if self.buf.len() < target {
                    self.last_sample_read = true;
                }
                self.num_samples = (self.buf.len() / sample_size) as u32;
                self.sample_data_size = self.num_samples as usize * sample_size;
            }
            SampleBoundary::Vc3(_) => {
                while self.num_samples < num_samples {
                    if !self.read_and_parse_sample()? {
                        break;
                    }
                }
            }
        }

        Ok(self.num_samples)
    }

    /// The data of the samples returned by the last `read_samples` call.
    pub fn sample_data(&self) -> &[u8] {
        &self.buf[..self.sample_data_size]
    }

    pub fn sample_data_size(&self) -> usize {
        self.sample_data_size
    }

    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }

    /// Appends one parsed sample to the buffered sample data.
    ///
    /// Returns false when no further sample could be read.
    fn read_and_parse_sample(&mut self) -> Result<bool> {
        let SampleBoundary::Vc3(parser) = &self.boundary else {
            unreachable!("parser-driven read in fixed sample size mode");
        };
        let parser = *parser;
        let sample_start = self.sample_data_size;

        if !self.read_first_sample {
            // locate the start of the first sample within the first block
            let buffered = self.buf.len() - sample_start;
            if buffered < READ_BLOCK_SIZE {
                self.read_bytes(READ_BLOCK_SIZE - buffered)?;
            }

            let Some(offset) = parser.parse_frame_start(&self.buf[sample_start..]) else {
                warn!("failed to find the start of the first sample");
                self.last_sample_read = true;
                return Ok(false);
            };

            self.buf.drain(sample_start..sample_start + offset);
            self.read_first_sample = true;
        }

        loop {
            match parser.parse_frame_size(&self.buf[sample_start..])? {
                FrameSizeStatus::Complete(size) => {
                    self.sample_data_size += size as usize;
                    self.num_samples += 1;
                    return Ok(true);
                }
                FrameSizeStatus::NeedData => {
                    if self.read_bytes(READ_BLOCK_SIZE)? == 0 {
                        // trailing partial sample, do not report it
                        self.last_sample_read = true;
                        return Ok(false);
                    }
                }
                FrameSizeStatus::UnknownProfile => {
                    warn!("failed to resolve sample size, unknown compression profile");
                    self.last_sample_read = true;
                    return Ok(false);
                }
            }
        }
    }

    /// Reads up to `size` bytes from the input onto the end of the buffer.
    fn read_bytes(&mut self, size: usize) -> Result<usize> {
        let mut size = size;
        if let Some(max) = self.max_read_length {
            size = size.min((max - self.total_read) as usize);
        }
        if size == 0 {
            return Ok(0);
        }

        let start = self.buf.len();
        self.buf.resize(start + size, 0);

        let mut total = 0;
        while total < size {
            match self.input.read(&mut self.buf[start + total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(start + total);
                    return Err(e.into());
                }
            }
        }

        self.buf.truncate(start + total);
        self.total_read += total as u64;
        Ok(total)
    }
}
