//! Binary frame codec.
//!
//! A frame is a bare array of IEEE-754 `f32` samples in little-endian byte
//! order. There is no header and no length prefix: the sample count is the
//! message length divided by [`SAMPLE_SIZE`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Encoded size of one sample in bytes.
pub const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Frame decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} is not a multiple of 4")]
    Misaligned(usize),
}

/// Serialize samples into a frame.
pub fn encode(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * SAMPLE_SIZE);
    for &sample in samples {
        buf.put_f32_le(sample);
    }
    buf.freeze()
}

/// Parse a frame back into samples.
pub fn decode(mut frame: &[u8]) -> Result<Vec<f32>, FrameError> {
    if frame.len() % SAMPLE_SIZE != 0 {
        return Err(FrameError::Misaligned(frame.len()));
    }
    let mut samples = Vec::with_capacity(frame.len() / SAMPLE_SIZE);
    while frame.has_remaining() {
        samples.push(frame.get_f32_le());
    }
    Ok(samples)
}
