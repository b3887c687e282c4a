// THEORY:
// A `Frame` is the raw input handed over by the frame source: a BGR24 interleaved
// buffer with an explicit stride, exactly as a camera driver delivers it. It is a
// "dumb" data container; the only logic it carries is the bounds validation that
// lets every later stage index the buffer without re-checking.

use crate::error::{SegmentError, SegmentResult};
use std::time::SystemTime;

/// Bytes per BGR24 pixel.
pub const BYTES_PER_PIXEL: usize = 3;

/// Fields are private so every `Frame` in existence has passed `Frame::new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// When the frame was captured.
    timestamp: SystemTime,
    width: usize,
    height: usize,
    /// Bytes from the start of one row to the start of the next.
    stride: usize,
    /// Interleaved B, G, R bytes.
    data: Vec<u8>,
}

impl Frame {
    pub fn new(
        timestamp: SystemTime,
        width: usize,
        height: usize,
        stride: usize,
        data: Vec<u8>,
    ) -> SegmentResult<Self> {
        if width == 0 || height == 0 {
            return Err(SegmentError::InvalidFrame(format!(
                "empty frame {width}x{height}"
            )));
        }
        let row_bytes = width * BYTES_PER_PIXEL;
        if stride < row_bytes {
            return Err(SegmentError::InvalidFrame(format!(
                "stride {stride} is shorter than a {width} pixel row"
            )));
        }
        let required = stride * (height - 1) + row_bytes;
        if data.len() < required {
            return Err(SegmentError::InvalidFrame(format!(
                "{} bytes cannot hold {width}x{height} with stride {stride}",
                data.len()
            )));
        }

        Ok(Self {
            timestamp,
            width,
            height,
            stride,
            data,
        })
    }

    /// A tightly packed frame (stride = width * 3), the common case.
    pub fn packed(timestamp: SystemTime, width: usize, height: usize, data: Vec<u8>) -> SegmentResult<Self> {
        Self::new(timestamp, width, height, width * BYTES_PER_PIXEL, data)
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Restamps the frame, e.g. when a source re-serves a cached image.
    pub fn set_timestamp(&mut self, timestamp: SystemTime) {
        self.timestamp = timestamp;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Byte offset of pixel (x, y).
    pub fn offset(&self, x: usize, y: usize) -> usize {
        y * self.stride + x * BYTES_PER_PIXEL
    }

    /// The (B, G, R) triple at (x, y).
    pub fn bgr(&self, x: usize, y: usize) -> [u8; 3] {
        let offset = self.offset(x, y);
        [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
    }

    /// The pixels of row `y`, without stride padding.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.width * BYTES_PER_PIXEL]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.stride;
        let end = start + self.width * BYTES_PER_PIXEL;
        &mut self.data[start..end]
    }
}
