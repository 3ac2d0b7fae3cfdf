//! Pipeline error taxonomy.
//!
//! Errors fall into three groups:
//! - **Fatal**: `Source` ends the acquisition session, the pipeline enters
//!   `Failed` and only `stop()` brings it back.
//! - **Recoverable**: `SourceTimeout`, `NotInBuffer`, `InsufficientHistory`
//!   are absorbed internally (retry next tick) and never crash a thread.
//! - **Caller-facing**: `NotSupported`, `OutOfRange`, `InvalidArgument`,
//!   `AlreadyRunning`, `NotRunning` are returned synchronously to whoever
//!   issued the command; state is left untouched.
//!
//! Errors are `Clone` so they can travel through the event bus to subscribers.

use std::time::Duration;

/// Errors produced by sources, the ring buffer, the controller and the coordinator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Device or file unavailable, or unrecoverable I/O while reading.
    #[error("Source error: {0}")]
    Source(String),

    /// A live source produced nothing within its device timeout.
    #[error("Source timed out after {0:?}")]
    SourceTimeout(Duration),

    /// Requested sequence number is outside the buffered window.
    #[error("Frame {seq} not in buffer")]
    NotInBuffer { seq: u64 },

    /// Rewind deeper than the buffered history.
    #[error("Cannot rewind {requested} frames, only {available} buffered")]
    InsufficientHistory { requested: u64, available: u64 },

    /// Operation not supported by this source (e.g. seeking a live camera).
    #[error("Not supported: {0}")]
    NotSupported(&'static str),

    /// Step past source bounds; position left unchanged.
    #[error("Position {position} out of range (0..{len})")]
    OutOfRange { position: i64, len: u64 },

    /// Malformed command argument (FPS, algorithm name, config value).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Pipeline already running")]
    AlreadyRunning,

    #[error("Pipeline not running")]
    NotRunning,

    /// Pipeline is in its terminal failed state; call `stop()` to reset.
    #[error("Pipeline failed: {0}")]
    Failed(String),
}

impl PipelineError {
    /// Errors the pipeline absorbs on its own (retry on the next tick/read).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceTimeout(_)
                | PipelineError::NotInBuffer { .. }
                | PipelineError::InsufficientHistory { .. }
        )
    }

    /// Errors that end the acquisition session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Source(_) | PipelineError::Failed(_))
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Source(e.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(e: image::ImageError) -> Self {
        PipelineError::Source(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
