//! Immutable frames with multi-format pixel buffers (U8, U16, F32)
//!
//! **Why**: Sources deliver different sample types:
//! - Camera / PNG / JPEG: 8-bit gray, RGB or RGBA (u8)
//! - Multi-frame studies: 16-bit gray (u16)
//! - Synthetic / processed HDR data: 32-bit float (f32)
//!
//! **Used by**: Sources (production), ring buffer (storage), processing stage
//! (transform), delivery queue (consumer hand-off).
//!
//! # Sharing
//!
//! `Frame` is a handle over `Arc<FrameData>`. Cloning is a refcount bump, so
//! the ring buffer, the processing thread and any rewinding reader share one
//! allocation. Eviction from the ring buffer drops only the buffer's handle;
//! a reader still holding a clone keeps the pixels alive.
//!
//! Nothing in a `FrameData` is mutable after construction. There is no
//! interior mutability, so a reader can never observe a half-written frame.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Pixel buffer - stores different precision levels
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),   // Gray8 / Rgb8 / Rgba8
    U16(Vec<u16>), // Gray16 (medical studies)
    F32(Vec<f32>), // GrayF32 / RgbaF32, nominal range 0.0..1.0
}

impl PixelBuffer {
    /// Number of samples (not pixels)
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::U16(v) => v.len(),
            PixelBuffer::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memory footprint in bytes
    pub fn mem(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::U16(v) => v.len() * 2,
            PixelBuffer::F32(v) => v.len() * 4,
        }
    }

    /// Sample at flat index as f32 in the buffer's native scale.
    #[inline]
    pub fn sample(&self, idx: usize) -> f32 {
        match self {
            PixelBuffer::U8(v) => v[idx] as f32,
            PixelBuffer::U16(v) => v[idx] as f32,
            PixelBuffer::F32(v) => v[idx],
        }
    }
}

/// Pixel format: channel layout + sample type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
    Gray16,
    GrayF32,
    RgbaF32,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 | PixelFormat::Gray16 | PixelFormat::GrayF32 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 | PixelFormat::RgbaF32 => 4,
        }
    }

    /// True if the last channel is alpha (copied through by filters).
    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Rgba8 | PixelFormat::RgbaF32)
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            PixelFormat::Gray8 | PixelFormat::Rgb8 | PixelFormat::Rgba8 => 1,
            PixelFormat::Gray16 => 2,
            PixelFormat::GrayF32 | PixelFormat::RgbaF32 => 4,
        }
    }

    /// Largest valid sample value (clip ceiling).
    pub fn max_value(self) -> f32 {
        match self {
            PixelFormat::Gray8 | PixelFormat::Rgb8 | PixelFormat::Rgba8 => 255.0,
            PixelFormat::Gray16 => 65535.0,
            PixelFormat::GrayF32 | PixelFormat::RgbaF32 => 1.0,
        }
    }

    /// Stable numeric code used by the study container.
    pub fn code(self) -> u8 {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 2,
            PixelFormat::Rgba8 => 3,
            PixelFormat::Gray16 => 4,
            PixelFormat::GrayF32 => 5,
            PixelFormat::RgbaF32 => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => PixelFormat::Gray8,
            2 => PixelFormat::Rgb8,
            3 => PixelFormat::Rgba8,
            4 => PixelFormat::Gray16,
            5 => PixelFormat::GrayF32,
            6 => PixelFormat::RgbaF32,
            _ => return None,
        })
    }

    fn matches(self, buffer: &PixelBuffer) -> bool {
        matches!(
            (self, buffer),
            (PixelFormat::Gray8 | PixelFormat::Rgb8 | PixelFormat::Rgba8, PixelBuffer::U8(_))
                | (PixelFormat::Gray16, PixelBuffer::U16(_))
                | (PixelFormat::GrayF32 | PixelFormat::RgbaF32, PixelBuffer::F32(_))
        )
    }
}

/// Decoded pixels without pipeline metadata (what a source produces).
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    format: PixelFormat,
    buffer: PixelBuffer,
}

impl Image {
    /// Validates that buffer type and length match the format and size.
    pub fn new(width: usize, height: usize, format: PixelFormat, buffer: PixelBuffer) -> Result<Self> {
        if !format.matches(&buffer) {
            return Err(PipelineError::InvalidArgument(format!(
                "{:?} cannot hold this buffer type",
                format
            )));
        }
        let expected = width * height * format.channels();
        if buffer.len() != expected {
            return Err(PipelineError::InvalidArgument(format!(
                "buffer has {} samples, {}x{} {:?} needs {}",
                buffer.len(),
                width,
                height,
                format,
                expected
            )));
        }
        Ok(Self { width, height, format, buffer })
    }

    /// Uniform image, every sample set to `value` (handy for tests and placeholders).
    pub fn filled(width: usize, height: usize, format: PixelFormat, value: f32) -> Self {
        let n = width * height * format.channels();
        let buffer = match format {
            PixelFormat::Gray8 | PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
                PixelBuffer::U8(vec![value.clamp(0.0, 255.0).round() as u8; n])
            }
            PixelFormat::Gray16 => PixelBuffer::U16(vec![value.clamp(0.0, 65535.0).round() as u16; n]),
            PixelFormat::GrayF32 | PixelFormat::RgbaF32 => PixelBuffer::F32(vec![value; n]),
        };
        Self { width, height, format, buffer }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Sample at (x, y, channel) in native scale.
    pub fn sample(&self, x: usize, y: usize, c: usize) -> f32 {
        self.buffer.sample((y * self.width + x) * self.channels() + c)
    }
}

/// Immutable frame payload shared by all holders of a `Frame`.
#[derive(Debug)]
pub struct FrameData {
    sequence: u64,
    timestamp: Duration,
    image: Image,
}

/// One immutable image sample with sequence number and source timestamp.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<FrameData>,
}

impl Frame {
    /// Wrap an image. `sequence` is 1-based (0 is reserved for "nothing yet").
    pub fn new(sequence: u64, timestamp: Duration, image: Image) -> Self {
        Self {
            data: Arc::new(FrameData { sequence, timestamp, image }),
        }
    }

    /// Same sequence and timestamp, new pixels. Used by the processing stage.
    pub fn with_image(&self, image: Image) -> Self {
        Self::new(self.sequence(), self.timestamp(), image)
    }

    pub fn sequence(&self) -> u64 {
        self.data.sequence
    }

    /// 0-based playback position carried by this frame.
    pub fn position(&self) -> u64 {
        self.data.sequence.saturating_sub(1)
    }

    pub fn timestamp(&self) -> Duration {
        self.data.timestamp
    }

    pub fn image(&self) -> &Image {
        &self.data.image
    }

    pub fn resolution(&self) -> (usize, usize) {
        self.data.image.resolution()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.data.image.format()
    }

    pub fn mem(&self) -> usize {
        self.data.image.buffer().mem()
    }

    /// True if both handles point at the same allocation (zero-copy check).
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Number of live handles (ring buffer + readers).
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}
