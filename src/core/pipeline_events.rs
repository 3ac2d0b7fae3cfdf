//! Events the pipeline publishes on its `EventBus`.
//!
//! All of them are emitted from the delivery thread.

use std::time::Duration;

use crate::core::player::PlaybackState;
use crate::entities::effects::AlgorithmId;
use crate::entities::frame::Frame;
use crate::error::PipelineError;

// === Frames ===

/// A processed frame reached the consumer.
#[derive(Clone, Debug)]
pub struct FrameDelivered {
    /// Processed output (same handle as the source frame under identity)
    pub frame: Frame,
    /// Playback position the frame was rendered for
    pub position: u64,
    pub algorithm: AlgorithmId,
    pub processing_time: Duration,
}

// === Errors ===

/// Error surfaced to the consumer. `fatal` errors put the pipeline in `Failed`.
#[derive(Clone, Debug)]
pub struct ErrorEvent {
    pub error: PipelineError,
    pub fatal: bool,
}

/// A live source produced nothing for several consecutive timeouts.
#[derive(Clone, Debug)]
pub struct SourceStalled {
    pub consecutive_timeouts: u32,
    pub timeout: Duration,
}

// === Buffer / playback ===

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillLevelChanged {
    pub level: usize,
    pub capacity: usize,
}

/// Playback changed on its own (end of source reached, seek settled).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackChanged(pub PlaybackState);
