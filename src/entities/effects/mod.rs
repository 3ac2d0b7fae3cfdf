//! Processing stage: per-frame image filters.
//!
//! The stage is stateless. Every call receives the frame and a snapshot of
//! the [`ProcessingConfig`] taken at transform start, so a config change made
//! mid-frame only affects the next frame.
//!
//! # Algorithms
//!
//! | Algorithm | Masks | Response |
//! |-----------|-------|----------|
//! | **Identity** | - | zero-copy, returns the same `Frame` handle |
//! | **Average** | 3x3, 5x5 uniform, sum 1 | clip |
//! | **Gaussian** | 3x3, 5x5 binomial, sum 1 | clip |
//! | **SobelX / SobelY** | 3x3 | abs, clip |
//! | **Laplacian** | 3x3, 5x5 | abs, clip |
//! | **Sharpen** | 3x3 | clip |
//! | **EdgeDetect** | 3x3 | abs, clip |
//!
//! Borders: edge replicate for every mask.
//!
//! # Adding New Algorithms
//!
//! 1. Add variant to `AlgorithmId` and its names in `FromStr`
//! 2. Add mask constant and constructor in `kernels.rs`
//! 3. Add match arm in `ProcessingConfig::kernel()`

pub mod convolution;
pub mod kernels;

use std::fmt;
use std::str::FromStr;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::entities::frame::Frame;
use crate::error::{PipelineError, Result};
use kernels::Kernel;

/// Algorithm family. The mask size is carried separately in [`MaskParams`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmId {
    #[default]
    Identity,
    Average,
    Gaussian,
    SobelX,
    SobelY,
    Laplacian,
    Sharpen,
    EdgeDetect,
}

impl AlgorithmId {
    /// Human-readable name for display
    pub fn display_name(&self) -> &'static str {
        match self {
            AlgorithmId::Identity => "No processing",
            AlgorithmId::Average => "Average",
            AlgorithmId::Gaussian => "Gaussian",
            AlgorithmId::SobelX => "Sobel X",
            AlgorithmId::SobelY => "Sobel Y",
            AlgorithmId::Laplacian => "Laplacian",
            AlgorithmId::Sharpen => "Sharpen",
            AlgorithmId::EdgeDetect => "Edge Detection",
        }
    }

    /// Canonical identifier accepted by `FromStr`
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmId::Identity => "identity",
            AlgorithmId::Average => "average",
            AlgorithmId::Gaussian => "gaussian",
            AlgorithmId::SobelX => "sobel-x",
            AlgorithmId::SobelY => "sobel-y",
            AlgorithmId::Laplacian => "laplacian",
            AlgorithmId::Sharpen => "sharpen",
            AlgorithmId::EdgeDetect => "edge-detect",
        }
    }

    pub fn all() -> &'static [AlgorithmId] {
        &[
            AlgorithmId::Identity,
            AlgorithmId::Average,
            AlgorithmId::Gaussian,
            AlgorithmId::SobelX,
            AlgorithmId::SobelY,
            AlgorithmId::Laplacian,
            AlgorithmId::Sharpen,
            AlgorithmId::EdgeDetect,
        ]
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Ok(match key.as_str() {
            "identity" | "none" | "no-processing" => AlgorithmId::Identity,
            "average" | "avg" | "mean" | "box" => AlgorithmId::Average,
            "gaussian" | "gauss" => AlgorithmId::Gaussian,
            "sobel-x" | "sobelx" => AlgorithmId::SobelX,
            "sobel-y" | "sobely" => AlgorithmId::SobelY,
            "laplacian" | "laplace" => AlgorithmId::Laplacian,
            "sharpen" => AlgorithmId::Sharpen,
            "edge-detect" | "edge" | "edges" | "edge-detection" => AlgorithmId::EdgeDetect,
            _ => return Err(PipelineError::InvalidArgument(format!("unknown algorithm '{}'", s))),
        })
    }
}

/// Mask parameters (kernel variant).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskParams {
    /// Mask edge length: 3 or 5
    pub size: u8,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self { size: 3 }
    }
}

/// Selected algorithm + mask parameters. Owned by the pipeline instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub algorithm: AlgorithmId,
    pub mask: MaskParams,
}

impl ProcessingConfig {
    pub fn identity() -> Self {
        Self::default()
    }

    /// Build and validate a config. Fails with `InvalidArgument` if the
    /// algorithm has no mask of the requested size.
    pub fn new(algorithm: AlgorithmId, mask: MaskParams) -> Result<Self> {
        let config = Self { algorithm, mask };
        config.validate()?;
        Ok(config)
    }

    /// Parse identifier (e.g. "gaussian", "sobel-x") and validate with params.
    pub fn select(identifier: &str, mask: MaskParams) -> Result<Self> {
        Self::new(identifier.parse()?, mask)
    }

    pub fn validate(&self) -> Result<()> {
        if self.algorithm == AlgorithmId::Identity {
            return Ok(());
        }
        self.kernel().map(|_| ())
    }

    /// Resolve the mask. Identity has none and resolves to an error.
    pub fn kernel(&self) -> Result<Kernel> {
        let size = self.mask.size as usize;
        let kernel = match self.algorithm {
            AlgorithmId::Identity => None,
            AlgorithmId::Average => kernels::average(size),
            AlgorithmId::Gaussian => kernels::gaussian(size),
            AlgorithmId::SobelX => kernels::sobel_x(size),
            AlgorithmId::SobelY => kernels::sobel_y(size),
            AlgorithmId::Laplacian => kernels::laplacian(size),
            AlgorithmId::Sharpen => kernels::sharpen(size),
            AlgorithmId::EdgeDetect => kernels::edge_detect(size),
        };
        kernel.ok_or_else(|| {
            PipelineError::InvalidArgument(format!(
                "{} has no {}x{} mask",
                self.algorithm.display_name(),
                size,
                size
            ))
        })
    }

    /// Every valid (algorithm, size) combination, for listings.
    pub fn presets() -> Vec<ProcessingConfig> {
        let mut out = Vec::new();
        for &algorithm in AlgorithmId::all() {
            if algorithm == AlgorithmId::Identity {
                out.push(ProcessingConfig::identity());
                continue;
            }
            for size in [3u8, 5] {
                if let Ok(cfg) = ProcessingConfig::new(algorithm, MaskParams { size }) {
                    out.push(cfg);
                }
            }
        }
        out
    }

    /// Display label, e.g. "Gaussian 5x5"
    pub fn label(&self) -> String {
        match self.kernel() {
            Ok(k) => k.name.to_string(),
            Err(_) => self.algorithm.display_name().to_string(),
        }
    }
}

/// Apply the configured algorithm to a frame.
///
/// Identity returns the same handle (no pixel copy). Everything else returns
/// a new frame with the same sequence number, timestamp, size and format.
pub fn apply(frame: &Frame, config: &ProcessingConfig) -> Result<Frame> {
    if config.algorithm == AlgorithmId::Identity {
        return Ok(frame.clone());
    }

    let kernel = config.kernel()?;
    trace!("Applying {} to frame {}", kernel.name, frame.sequence());
    let image = convolution::convolve(frame.image(), &kernel)?;
    Ok(frame.with_image(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::frame::{Image, PixelBuffer, PixelFormat};
    use std::time::Duration;

    fn frame(image: Image) -> Frame {
        Frame::new(1, Duration::ZERO, image)
    }

    fn cfg(algorithm: AlgorithmId, size: u8) -> ProcessingConfig {
        ProcessingConfig::new(algorithm, MaskParams { size }).unwrap()
    }

    #[test]
    fn test_identity_is_zero_copy() {
        let f = frame(Image::filled(8, 8, PixelFormat::Rgb8, 12.0));
        let out = apply(&f, &ProcessingConfig::identity()).unwrap();
        assert!(out.ptr_eq(&f));
    }

    #[test]
    fn test_smoothing_preserves_uniform_value() {
        for format in [PixelFormat::Gray8, PixelFormat::Rgb8, PixelFormat::Gray16, PixelFormat::GrayF32] {
            let value = if format == PixelFormat::GrayF32 { 0.4 } else { 123.0 };
            let f = frame(Image::filled(9, 7, format, value));
            for c in [
                cfg(AlgorithmId::Average, 3),
                cfg(AlgorithmId::Average, 5),
                cfg(AlgorithmId::Gaussian, 3),
                cfg(AlgorithmId::Gaussian, 5),
            ] {
                let out = apply(&f, &c).unwrap();
                assert_eq!(out.resolution(), (9, 7));
                assert_eq!(out.pixel_format(), format);
                for y in 0..7 {
                    for x in 0..9 {
                        let v = out.image().sample(x, y, 0);
                        assert!((v - value).abs() < 1e-3, "{:?} {}: got {} at {},{}", format, c.label(), v, x, y);
                    }
                }
            }
        }
    }

    #[test]
    fn test_gradients_zero_on_uniform_frame() {
        // Edge replicate keeps borders uniform too, so the response is zero everywhere.
        let f = frame(Image::filled(6, 6, PixelFormat::Gray8, 200.0));
        for c in [
            cfg(AlgorithmId::SobelX, 3),
            cfg(AlgorithmId::SobelY, 3),
            cfg(AlgorithmId::Laplacian, 3),
            cfg(AlgorithmId::Laplacian, 5),
            cfg(AlgorithmId::EdgeDetect, 3),
        ] {
            let out = apply(&f, &c).unwrap();
            match out.image().buffer() {
                PixelBuffer::U8(data) => assert!(data.iter().all(|&v| v == 0), "{}", c.label()),
                _ => panic!("format changed"),
            }
        }
    }

    #[test]
    fn test_laplacian_zero_on_linear_gradient_interior() {
        let (w, h) = (12, 10);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                data.push((x * 10 + y * 5) as u8);
            }
        }
        let f = frame(Image::new(w, h, PixelFormat::Gray8, PixelBuffer::U8(data)).unwrap());

        for size in [3u8, 5] {
            let out = apply(&f, &cfg(AlgorithmId::Laplacian, size)).unwrap();
            let m = size as usize / 2;
            for y in m..h - m {
                for x in m..w - m {
                    assert_eq!(out.image().sample(x, y, 0), 0.0, "size {} at {},{}", size, x, y);
                }
            }
        }
    }

    #[test]
    fn test_sobel_y_on_horizontal_gradient_is_zero() {
        let f = frame(
            Image::new(4, 4, PixelFormat::Gray8, PixelBuffer::U8((0..16).map(|i| (i % 4) as u8 * 20).collect()))
                .unwrap(),
        );
        let out = apply(&f, &cfg(AlgorithmId::SobelY, 3)).unwrap();
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(out.image().sample(x, y, 0), 0.0);
            }
        }
    }

    #[test]
    fn test_output_keeps_sequence_and_timestamp() {
        let f = Frame::new(42, Duration::from_millis(1400), Image::filled(3, 3, PixelFormat::Gray8, 1.0));
        let out = apply(&f, &cfg(AlgorithmId::Gaussian, 3)).unwrap();
        assert_eq!(out.sequence(), 42);
        assert_eq!(out.timestamp(), Duration::from_millis(1400));
        assert!(!out.ptr_eq(&f));
    }

    #[test]
    fn test_select_parses_and_validates() {
        let c = ProcessingConfig::select("Sobel_X", MaskParams::default()).unwrap();
        assert_eq!(c.algorithm, AlgorithmId::SobelX);

        assert!(ProcessingConfig::select("canny", MaskParams::default()).is_err());
        assert!(matches!(
            ProcessingConfig::select("sobel-x", MaskParams { size: 5 }),
            Err(PipelineError::InvalidArgument(_))
        ));
        // Identity ignores the mask size.
        assert!(ProcessingConfig::select("none", MaskParams { size: 9 }).is_ok());
    }

    #[test]
    fn test_presets_listing() {
        let presets = ProcessingConfig::presets();
        assert_eq!(presets[0], ProcessingConfig::identity());
        assert!(presets.iter().any(|p| p.label() == "Laplacian 5x5"));
        assert!(presets.iter().all(|p| p.validate().is_ok()));
    }

    #[test]
    fn test_config_serde_defaults() {
        let c: ProcessingConfig = serde_json::from_str(r#"{"algorithm":"gaussian"}"#).unwrap();
        assert_eq!(c.algorithm, AlgorithmId::Gaussian);
        assert_eq!(c.mask.size, 3);
    }
}
