//! Core engine modules - ring buffer, playback, pacing, events, pipeline threads
//!
//! These modules form the pipeline engine, independent of any consumer.

pub mod delivery;
pub mod event_bus;
pub mod pacer;
pub mod pipeline;
pub mod pipeline_events;
pub mod player;
pub mod ring_buffer;

// Re-exports for convenience
pub use event_bus::{BoxedEvent, EventBus, downcast_event};
pub use pacer::Pacer;
pub use pipeline::{Pipeline, PipelineStats, PipelineStatus, Subscriber};
pub use player::{PlaybackController, PlaybackMode, PlaybackState};
pub use ring_buffer::FrameRingBuffer;
