//! Multi-frame study source.
//!
//! Container layout (little-endian):
//!
//! ```text
//! offset size
//! 0      4    magic "MFS1"
//! 4      2    version (1)
//! 6      4    width
//! 10     4    height
//! 14     1    pixel format code
//! 15     1    reserved
//! 16     4    frame count
//! 20     4    native fps (f32 bits)
//! 24     ...  frame_count * (width * height * channels * bytes_per_sample)
//! ```
//!
//! Samples are stored in row-major interleaved order; 16-bit and float samples
//! are little-endian.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};

use super::{DataSource, ReadOutcome, SourceDescriptor, SourceKind};
use crate::entities::frame::{Image, PixelBuffer, PixelFormat};
use crate::error::{PipelineError, Result};

const MAGIC: &[u8; 4] = b"MFS1";
const VERSION: u16 = 1;

pub const HEADER_LEN: usize = 24;

/// Upper bound on a single dimension.
const MAX_DIMENSION: u32 = 16 * 1024;

/// Upper bound on one frame's payload (512 MiB).
const MAX_FRAME_BYTES: u64 = 512 * 1024 * 1024;

/// Parsed study header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudyHeader {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub frame_count: u64,
    pub native_fps: f32,
}

impl StudyHeader {
    /// Bytes of one stored frame
    pub fn frame_bytes(&self) -> u64 {
        (self.width * self.height * self.format.channels() * self.format.bytes_per_sample()) as u64
    }

    /// File offset of frame `index`
    pub fn frame_offset(&self, index: u64) -> u64 {
        HEADER_LEN as u64 + index * self.frame_bytes()
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(MAGIC);
        out[4..6].copy_from_slice(&VERSION.to_le_bytes());
        out[6..10].copy_from_slice(&(self.width as u32).to_le_bytes());
        out[10..14].copy_from_slice(&(self.height as u32).to_le_bytes());
        out[14] = self.format.code();
        out[16..20].copy_from_slice(&(self.frame_count as u32).to_le_bytes());
        out[20..24].copy_from_slice(&self.native_fps.to_bits().to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(PipelineError::Source(format!(
                "study header truncated: {} bytes, need {}",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(PipelineError::Source("not a study file (bad magic)".into()));
        }
        let mut cursor = 4usize;
        let version = read_u16(bytes, &mut cursor);
        if version != VERSION {
            return Err(PipelineError::Source(format!("unsupported study version {}", version)));
        }
        let width = read_u32(bytes, &mut cursor);
        let height = read_u32(bytes, &mut cursor);
        let code = bytes[cursor];
        cursor += 2;
        let frame_count = read_u32(bytes, &mut cursor);
        let native_fps = f32::from_bits(read_u32(bytes, &mut cursor));

        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(PipelineError::Source(format!("invalid study size {}x{}", width, height)));
        }
        let format = PixelFormat::from_code(code)
            .ok_or_else(|| PipelineError::Source(format!("unknown pixel format code {}", code)))?;
        let native_fps = if native_fps.is_finite() && native_fps > 0.0 { native_fps } else { 30.0 };

        let header = StudyHeader {
            width: width as usize,
            height: height as usize,
            format,
            frame_count: frame_count as u64,
            native_fps,
        };
        if header.frame_bytes() > MAX_FRAME_BYTES {
            return Err(PipelineError::Source(format!(
                "study frame size {} exceeds maximum {}",
                header.frame_bytes(),
                MAX_FRAME_BYTES
            )));
        }
        Ok(header)
    }
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> u16 {
    let v = u16::from_le_bytes([bytes[*cursor], bytes[*cursor + 1]]);
    *cursor += 2;
    v
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    u32::from_le_bytes(buf)
}

/// Serialize frames into a study container in memory.
///
/// All frames must share the first frame's size and format.
pub fn encode_study(frames: &[Image], native_fps: f32) -> Result<Vec<u8>> {
    let Some(first) = frames.first() else {
        return Err(PipelineError::InvalidArgument("study needs at least one frame".into()));
    };
    let header = StudyHeader {
        width: first.width(),
        height: first.height(),
        format: first.format(),
        frame_count: frames.len() as u64,
        native_fps,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + (header.frame_bytes() * header.frame_count) as usize);
    out.extend_from_slice(&header.encode());
    for (i, frame) in frames.iter().enumerate() {
        if frame.resolution() != first.resolution() || frame.format() != first.format() {
            return Err(PipelineError::InvalidArgument(format!(
                "frame {} is {}x{} {:?}, study is {}x{} {:?}",
                i,
                frame.width(),
                frame.height(),
                frame.format(),
                first.width(),
                first.height(),
                first.format()
            )));
        }
        write_samples(frame.buffer(), &mut out);
    }
    Ok(out)
}

/// Write a study container to `path`.
pub fn write_study(path: &Path, frames: &[Image], native_fps: f32) -> Result<()> {
    let bytes = encode_study(frames, native_fps)?;
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(&bytes)?;
    file.flush()?;
    info!("Wrote study {} ({} frames)", path.display(), frames.len());
    Ok(())
}

fn write_samples(buffer: &PixelBuffer, out: &mut Vec<u8>) {
    match buffer {
        PixelBuffer::U8(v) => out.extend_from_slice(v),
        PixelBuffer::U16(v) => v.iter().for_each(|s| out.extend_from_slice(&s.to_le_bytes())),
        PixelBuffer::F32(v) => v.iter().for_each(|s| out.extend_from_slice(&s.to_le_bytes())),
    }
}

fn read_samples(format: PixelFormat, raw: Vec<u8>) -> PixelBuffer {
    match format.bytes_per_sample() {
        1 => PixelBuffer::U8(raw),
        2 => PixelBuffer::U16(raw.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect()),
        _ => PixelBuffer::F32(
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
    }
}

/// Bounded, seekable source over a single study file.
pub struct StudySource {
    path: PathBuf,
    file: Option<File>,
    header: Option<StudyHeader>,
    cursor: u64,
}

impl StudySource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            header: None,
            cursor: 0,
        }
    }

    pub fn header(&self) -> Option<&StudyHeader> {
        self.header.as_ref()
    }

    fn not_open(&self) -> PipelineError {
        PipelineError::Source(format!("Study {} not open", self.path.display()))
    }
}

impl DataSource for StudySource {
    fn descriptor(&self) -> SourceDescriptor {
        let (width, height, count, fps) = match &self.header {
            Some(h) => (h.width, h.height, h.frame_count, h.native_fps),
            None => (0, 0, 0, 30.0),
        };
        SourceDescriptor {
            kind: SourceKind::Study,
            name: self.path.display().to_string(),
            width,
            height,
            frame_count: Some(count),
            native_fps: fps,
            seekable: true,
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let mut file = File::open(&self.path)
            .map_err(|e| PipelineError::Source(format!("{}: {}", self.path.display(), e)))?;
        let mut raw = [0u8; HEADER_LEN];
        file.read_exact(&mut raw)
            .map_err(|e| PipelineError::Source(format!("{}: {}", self.path.display(), e)))?;
        let header = StudyHeader::decode(&raw)?;

        let file_len = file.metadata()?.len();
        let needed = header.frame_offset(header.frame_count);
        if file_len < needed {
            return Err(PipelineError::Source(format!(
                "{}: header claims {} frames ({} bytes) but file has {} bytes",
                self.path.display(),
                header.frame_count,
                needed,
                file_len
            )));
        }

        info!(
            "Opened study {}: {} frames, {}x{} {:?} @ {}fps",
            self.path.display(),
            header.frame_count,
            header.width,
            header.height,
            header.format,
            header.native_fps
        );
        self.file = Some(file);
        self.header = Some(header);
        self.cursor = 0;
        Ok(())
    }

    fn read_next(&mut self) -> Result<ReadOutcome> {
        let Some(header) = self.header.filter(|_| self.file.is_some()) else {
            return Err(self.not_open());
        };
        if self.cursor >= header.frame_count {
            return Ok(ReadOutcome::EndOfStream);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(self.not_open());
        };

        file.seek(SeekFrom::Start(header.frame_offset(self.cursor)))?;
        let mut raw = vec![0u8; header.frame_bytes() as usize];
        file.read_exact(&mut raw)?;
        let image = Image::new(header.width, header.height, header.format, read_samples(header.format, raw))?;

        let timestamp = Duration::from_secs_f64(self.cursor as f64 / header.native_fps as f64);
        self.cursor += 1;
        Ok(ReadOutcome::Frame { image, timestamp })
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        let Some(header) = self.header.filter(|_| self.file.is_some()) else {
            return Err(self.not_open());
        };
        if index >= header.frame_count {
            return Err(PipelineError::OutOfRange {
                position: index as i64,
                len: header.frame_count,
            });
        }
        self.cursor = index;
        Ok(())
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed study {}", self.path.display());
        }
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}
