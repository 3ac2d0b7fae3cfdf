//! Frame sources.
//!
//! Three variants behind one capability trait:
//! - `Camera`: live, unbounded, not seekable, paced by the device
//! - `Sequence`: directory of numbered image files, bounded, seekable
//! - `Study`: single multi-frame file with an embedded frame count, bounded, seekable
//!
//! `Source` is a closed enum; calls go through `enum_dispatch`, so there is no
//! boxing and no vtable on the acquisition hot path.
//!
//! Sources only produce pixels + a source-relative timestamp. Sequence
//! numbers are assigned by the acquisition thread when it wraps the image
//! into a `Frame`.

pub mod camera;
pub mod sequence;
pub mod study;

use std::path::PathBuf;
use std::time::Duration;

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use crate::entities::frame::Image;
use crate::error::Result;

pub use camera::{CameraSource, CaptureDevice, DeviceFormat, SyntheticCamera};
pub use sequence::ImageSequenceSource;
pub use study::{StudyHeader, StudySource};

/// Variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Camera,
    ImageSequence,
    Study,
}

/// Capability metadata exposed by a source (valid after `open()`).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub name: String,
    pub width: usize,
    pub height: usize,
    /// `Some(n)` for finite sources, `None` for live ones
    pub frame_count: Option<u64>,
    pub native_fps: f32,
    pub seekable: bool,
}

impl SourceDescriptor {
    pub fn is_finite(&self) -> bool {
        self.frame_count.is_some()
    }

    /// Last valid 0-based position, if finite and non-empty.
    pub fn last_position(&self) -> Option<u64> {
        self.frame_count.and_then(|n| n.checked_sub(1))
    }
}

/// Result of one `read_next()` call
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    Frame { image: Image, timestamp: Duration },
    EndOfStream,
}

/// Capability interface shared by every source variant.
#[enum_dispatch]
pub trait DataSource: Send {
    /// Capability metadata. Dimensions and frame count are only known after `open()`.
    fn descriptor(&self) -> SourceDescriptor;

    /// Acquire the device / file. Fails with `Source` if unavailable.
    fn open(&mut self) -> Result<()>;

    /// Next frame, or end of stream on exhausted bounded sources.
    ///
    /// Live sources may block up to their device timeout, then fail with
    /// `SourceTimeout`. Bounded sources never block.
    fn read_next(&mut self) -> Result<ReadOutcome>;

    /// Reposition the next `read_next()` to `index`.
    /// `NotSupported` on live sources, `OutOfRange` past the end.
    fn seek(&mut self, index: u64) -> Result<()>;

    /// Release resources. Idempotent.
    fn close(&mut self);

    /// Index the next `read_next()` will produce.
    fn position(&self) -> u64;

    fn is_open(&self) -> bool;
}

/// Closed set of source variants.
#[enum_dispatch(DataSource)]
pub enum Source {
    Camera(CameraSource),
    Sequence(ImageSequenceSource),
    Study(StudySource),
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = self.descriptor();
        f.debug_struct("Source")
            .field("kind", &d.kind)
            .field("name", &d.name)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Serializable description of a source, used by config files and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Built-in synthetic test-pattern camera
    Synthetic {
        #[serde(default = "default_cam_width")]
        width: usize,
        #[serde(default = "default_cam_height")]
        height: usize,
        #[serde(default = "default_cam_fps")]
        fps: f32,
    },
    ImageSequence { dir: PathBuf },
    Study { path: PathBuf },
}

fn default_cam_width() -> usize {
    640
}

fn default_cam_height() -> usize {
    480
}

fn default_cam_fps() -> f32 {
    30.0
}

impl SourceSpec {
    /// Construct the (unopened) source. `camera_timeout` bounds live reads.
    pub fn build(&self, camera_timeout: Duration) -> Source {
        match self {
            SourceSpec::Synthetic { width, height, fps } => {
                CameraSource::new(Box::new(SyntheticCamera::new(*width, *height, *fps)), camera_timeout).into()
            }
            SourceSpec::ImageSequence { dir } => ImageSequenceSource::new(dir.clone()).into(),
            SourceSpec::Study { path } => StudySource::new(path.clone()).into(),
        }
    }
}
