//! Image file loader backed by the `image` crate.
//!
//! Keeps the source's native layout where the pipeline has a matching
//! `PixelFormat` (Gray8, Rgb8, Rgba8, Gray16, RgbaF32). Anything else is
//! widened to the nearest supported layout (LumaA -> Rgba, 16-bit color -> 8-bit).

use std::path::Path;

use image::DynamicImage;
use log::debug;

use super::frame::{Image, PixelBuffer, PixelFormat};
use crate::error::{PipelineError, Result};

/// Header information (no pixel decode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: usize,
    pub height: usize,
}

/// Image loader
pub struct Loader;

impl Loader {
    /// Read image dimensions without decoding pixels
    pub fn header(path: &Path) -> Result<ImageHeader> {
        let (width, height) = image::image_dimensions(path)
            .map_err(|e| PipelineError::Source(format!("{}: {}", path.display(), e)))?;
        Ok(ImageHeader {
            width: width as usize,
            height: height as usize,
        })
    }

    /// Decode image file into an `Image`
    pub fn load(path: &Path) -> Result<Image> {
        debug!("Loading image: {}", path.display());
        let img = image::open(path).map_err(|e| PipelineError::Source(format!("{}: {}", path.display(), e)))?;
        Self::from_dynamic(img)
    }

    /// Convert a decoded `DynamicImage` into the pipeline's layout
    pub fn from_dynamic(img: DynamicImage) -> Result<Image> {
        let (w, h) = (img.width() as usize, img.height() as usize);
        match img {
            DynamicImage::ImageLuma8(buf) => Image::new(w, h, PixelFormat::Gray8, PixelBuffer::U8(buf.into_raw())),
            DynamicImage::ImageRgb8(buf) => Image::new(w, h, PixelFormat::Rgb8, PixelBuffer::U8(buf.into_raw())),
            DynamicImage::ImageRgba8(buf) => Image::new(w, h, PixelFormat::Rgba8, PixelBuffer::U8(buf.into_raw())),
            DynamicImage::ImageLuma16(buf) => Image::new(w, h, PixelFormat::Gray16, PixelBuffer::U16(buf.into_raw())),
            DynamicImage::ImageRgba32F(buf) => {
                Image::new(w, h, PixelFormat::RgbaF32, PixelBuffer::F32(buf.into_raw()))
            }
            DynamicImage::ImageRgb32F(_) => {
                Image::new(w, h, PixelFormat::RgbaF32, PixelBuffer::F32(img.to_rgba32f().into_raw()))
            }
            DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) | DynamicImage::ImageRgba16(_) => {
                Image::new(w, h, PixelFormat::Rgba8, PixelBuffer::U8(img.to_rgba8().into_raw()))
            }
            other => Image::new(w, h, PixelFormat::Rgb8, PixelBuffer::U8(other.to_rgb8().into_raw())),
        }
    }

    /// Encode an 8-bit image to PNG (used by the test-pattern generator).
    pub fn save_png(image: &Image, path: &Path) -> Result<()> {
        let (w, h) = (image.width() as u32, image.height() as u32);
        let color = match image.format() {
            PixelFormat::Gray8 => image::ExtendedColorType::L8,
            PixelFormat::Rgb8 => image::ExtendedColorType::Rgb8,
            PixelFormat::Rgba8 => image::ExtendedColorType::Rgba8,
            other => {
                return Err(PipelineError::InvalidArgument(format!("PNG export needs 8-bit data, got {:?}", other)));
            }
        };
        let PixelBuffer::U8(data) = image.buffer() else {
            return Err(PipelineError::InvalidArgument("PNG export needs 8-bit data".into()));
        };
        image::save_buffer(path, data, w, h, color)?;
        Ok(())
    }
}
