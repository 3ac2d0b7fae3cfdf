//! Live camera source.
//!
//! Device access is delegated to a [`CaptureDevice`] implementation (the
//! boundary to an external capture library). The source adds the pipeline
//! contract on top: open/close bookkeeping, bounded reads that map a device
//! timeout to `SourceTimeout`, and refusal to seek.
//!
//! [`SyntheticCamera`] is a built-in device that renders a moving test pattern
//! at a fixed rate. It stands in for hardware in tests and demos.

use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use super::{DataSource, ReadOutcome, SourceDescriptor, SourceKind};
use crate::entities::frame::{Image, PixelBuffer, PixelFormat};
use crate::error::{PipelineError, Result};

/// Negotiated device mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceFormat {
    pub width: usize,
    pub height: usize,
    pub fps: f32,
}

/// Boundary to a capture library (V4L2, AVFoundation, ...).
pub trait CaptureDevice: Send {
    fn name(&self) -> String;

    /// Open the device and report its mode.
    fn open(&mut self) -> Result<DeviceFormat>;

    /// Block up to `timeout` for the next frame. `Ok(None)` means timed out.
    fn grab(&mut self, timeout: Duration) -> Result<Option<Image>>;

    fn close(&mut self);
}

/// Live, unbounded, non-seekable source over a capture device.
pub struct CameraSource {
    device: Box<dyn CaptureDevice>,
    timeout: Duration,
    format: Option<DeviceFormat>,
    opened_at: Option<Instant>,
    frames_read: u64,
}

impl CameraSource {
    pub fn new(device: Box<dyn CaptureDevice>, timeout: Duration) -> Self {
        Self {
            device,
            timeout,
            format: None,
            opened_at: None,
            frames_read: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl DataSource for CameraSource {
    fn descriptor(&self) -> SourceDescriptor {
        let format = self.format.unwrap_or(DeviceFormat { width: 0, height: 0, fps: 30.0 });
        SourceDescriptor {
            kind: SourceKind::Camera,
            name: self.device.name(),
            width: format.width,
            height: format.height,
            frame_count: None,
            native_fps: format.fps,
            seekable: false,
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.format.is_some() {
            return Ok(());
        }
        let format = self.device.open()?;
        info!(
            "Camera {} opened: {}x{} @ {}fps",
            self.device.name(),
            format.width,
            format.height,
            format.fps
        );
        self.format = Some(format);
        self.opened_at = Some(Instant::now());
        self.frames_read = 0;
        Ok(())
    }

    fn read_next(&mut self) -> Result<ReadOutcome> {
        let Some(opened_at) = self.opened_at else {
            return Err(PipelineError::Source(format!("Camera {} not open", self.device.name())));
        };

        match self.device.grab(self.timeout)? {
            Some(image) => {
                self.frames_read += 1;
                Ok(ReadOutcome::Frame {
                    image,
                    timestamp: opened_at.elapsed(),
                })
            }
            None => {
                trace!("Camera {} grab timed out", self.device.name());
                Err(PipelineError::SourceTimeout(self.timeout))
            }
        }
    }

    fn seek(&mut self, _index: u64) -> Result<()> {
        Err(PipelineError::NotSupported("live camera cannot seek"))
    }

    fn close(&mut self) {
        if self.format.take().is_some() {
            self.device.close();
            self.opened_at = None;
            debug!("Camera {} closed after {} frames", self.device.name(), self.frames_read);
        }
    }

    fn position(&self) -> u64 {
        self.frames_read
    }

    fn is_open(&self) -> bool {
        self.format.is_some()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("Camera {} dropped while open, closing", self.device.name());
            self.close();
        }
    }
}

// ============================================================================
// Synthetic test-pattern device
// ============================================================================

/// Test-pattern camera: grid background, moving square, frame counter bar.
pub struct SyntheticCamera {
    width: usize,
    height: usize,
    fps: f32,
    next_due: Option<Instant>,
    index: u64,
    open: bool,
}

impl SyntheticCamera {
    pub fn new(width: usize, height: usize, fps: f32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            fps: if fps.is_finite() && fps > 0.0 { fps } else { 30.0 },
            next_due: None,
            index: 0,
            open: false,
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.fps)
    }
}

impl CaptureDevice for SyntheticCamera {
    fn name(&self) -> String {
        format!("synthetic:{}x{}@{}", self.width, self.height, self.fps)
    }

    fn open(&mut self) -> Result<DeviceFormat> {
        self.open = true;
        self.index = 0;
        self.next_due = Some(Instant::now());
        Ok(DeviceFormat {
            width: self.width,
            height: self.height,
            fps: self.fps,
        })
    }

    fn grab(&mut self, timeout: Duration) -> Result<Option<Image>> {
        if !self.open {
            return Err(PipelineError::Source("synthetic camera closed".into()));
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }

        // Fixed cadence; if we fell behind, resync instead of bursting.
        let interval = self.interval();
        let next = due + interval;
        self.next_due = Some(if next < Instant::now() { Instant::now() + interval } else { next });

        let image = test_pattern(self.width, self.height, self.index, 120);
        self.index += 1;
        Ok(Some(image))
    }

    fn close(&mut self) {
        self.open = false;
        self.next_due = None;
    }
}

/// Render frame `index` of a `period`-frame looping test pattern (Rgb8).
pub fn test_pattern(width: usize, height: usize, index: u64, period: u64) -> Image {
    let mut data = vec![0u8; width * height * 3];
    let period = period.max(1);
    let phase = (index % period) as f32 / period as f32;

    // Square orbiting the center
    let side = (width.min(height) / 6).max(1);
    let radius = width.min(height) as f32 / 4.0;
    let angle = phase * std::f32::consts::TAU;
    let cx = width as f32 / 2.0 + radius * angle.cos();
    let cy = height as f32 / 2.0 + radius * angle.sin();
    let x0 = (cx - side as f32 / 2.0).max(0.0) as usize;
    let y0 = (cy - side as f32 / 2.0).max(0.0) as usize;

    // Progress bar along the bottom row
    let bar = ((index % period) as f32 / period as f32 * width as f32) as usize;

    for y in 0..height {
        for x in 0..width {
            let i = (y * width + x) * 3;
            let px = if x >= x0 && x < x0 + side && y >= y0 && y < y0 + side {
                [0, 255, 0]
            } else if y == height - 1 && x < bar {
                [255, 255, 255]
            } else if x % 50 == 0 || y % 50 == 0 {
                [50, 50, 50]
            } else {
                [(x * 255 / width.max(1)) as u8 / 4, 0, (y * 255 / height.max(1)) as u8 / 4]
            };
            data[i..i + 3].copy_from_slice(&px);
        }
    }

    // Length always matches width * height * 3
    Image::new(width, height, PixelFormat::Rgb8, PixelBuffer::U8(data))
        .unwrap_or_else(|_| Image::filled(width, height, PixelFormat::Rgb8, 0.0))
}
