//! Entities module - frames, image loading and the processing stage

pub mod effects;
pub mod frame;
pub mod loader;

pub use effects::{AlgorithmId, MaskParams, ProcessingConfig};
pub use frame::{Frame, Image, PixelBuffer, PixelFormat};
pub use loader::Loader;
