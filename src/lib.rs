//! framepipe - frame acquisition, ring-buffered playback and convolution processing
//!
//! ```text
//! Source (camera | image sequence | study file)
//!   -> acquisition thread -> FrameRingBuffer
//!   -> processing thread (PlaybackController + Pacer) -> convolution
//!   -> delivery thread -> EventBus subscribers
//! ```
//!
//! Re-exports the main types for use by binary targets and consumers.

// Core engine (ring buffer, playback, pacing, events, pipeline)
pub mod core;

// Frames, sources and processing
pub mod entities;
pub mod sources;

// Ambient modules
pub mod cli;
pub mod config;
pub mod error;
pub mod paths;
pub mod utils;

// Re-export commonly used types from core
pub use core::event_bus::{BoxedEvent, EventBus, downcast_event};
pub use core::pipeline::{Pipeline, PipelineStats, PipelineStatus, Subscriber};
pub use core::pipeline_events::{ErrorEvent, FillLevelChanged, FrameDelivered, PlaybackChanged, SourceStalled};
pub use core::player::{PlaybackMode, PlaybackState};
pub use core::ring_buffer::FrameRingBuffer;

// Re-export entities and sources
pub use config::PipelineConfig;
pub use entities::{AlgorithmId, Frame, Image, MaskParams, PixelFormat, ProcessingConfig};
pub use error::{PipelineError, Result};
pub use sources::{DataSource, Source, SourceDescriptor, SourceKind, SourceSpec};
