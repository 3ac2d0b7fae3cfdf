//! 2D convolution with edge-replicate borders.
//!
//! # Algorithm
//!
//! 1. Convert the source buffer to f32 in its native scale (0..255, 0..65535, 0..1)
//! 2. For every output pixel, accumulate weight * sample over the mask,
//!    clamping sample coordinates into the image (edge replicate)
//! 3. Map the response back into range (see [`Response`]) and convert to the
//!    source format, rounding integer formats to nearest
//!
//! Rows are processed in parallel with rayon. Alpha, when present, is copied
//! through unfiltered.

use rayon::prelude::*;

use super::kernels::{Kernel, Response};
use crate::entities::frame::{Image, PixelBuffer, PixelFormat};
use crate::error::Result;

/// Convolve an image with a mask. Output has the same size and format.
pub fn convolve(image: &Image, kernel: &Kernel) -> Result<Image> {
    let (width, height) = image.resolution();
    let format = image.format();
    let channels = format.channels();

    if width == 0 || height == 0 {
        return Ok(image.clone());
    }

    let src = to_f32_buffer(image.buffer());
    let filtered = if format.has_alpha() { channels - 1 } else { channels };
    let max = format.max_value();
    let half = kernel.half() as isize;
    let size = kernel.size;

    let mut dst = vec![0.0f32; src.len()];

    dst.par_chunks_mut(width * channels)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width {
                for c in 0..channels {
                    let out_idx = x * channels + c;
                    if c >= filtered {
                        row[out_idx] = src[(y * width + x) * channels + c];
                        continue;
                    }

                    let mut acc = 0.0f32;
                    for ky in 0..size {
                        let sy = clamp_coord(y as isize + ky as isize - half, height);
                        let row_base = sy * width;
                        for kx in 0..size {
                            let weight = kernel.weights[ky * size + kx];
                            if weight == 0.0 {
                                continue;
                            }
                            let sx = clamp_coord(x as isize + kx as isize - half, width);
                            acc += weight * src[(row_base + sx) * channels + c];
                        }
                    }

                    row[out_idx] = map_response(acc, kernel.response, max);
                }
            }
        });

    Image::new(width, height, format, from_f32_buffer(&dst, format))
}

/// Edge replicate: out-of-range coordinates snap to the nearest valid pixel.
#[inline]
fn clamp_coord(v: isize, len: usize) -> usize {
    v.clamp(0, len as isize - 1) as usize
}

#[inline]
fn map_response(v: f32, response: Response, max: f32) -> f32 {
    let v = match response {
        Response::Clip => v,
        Response::Magnitude => v.abs(),
    };
    v.clamp(0.0, max)
}

fn to_f32_buffer(buffer: &PixelBuffer) -> Vec<f32> {
    match buffer {
        PixelBuffer::U8(data) => data.iter().map(|&v| v as f32).collect(),
        PixelBuffer::U16(data) => data.iter().map(|&v| v as f32).collect(),
        PixelBuffer::F32(data) => data.clone(),
    }
}

fn from_f32_buffer(data: &[f32], format: PixelFormat) -> PixelBuffer {
    match format {
        PixelFormat::Gray8 | PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
            PixelBuffer::U8(data.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect())
        }
        PixelFormat::Gray16 => {
            PixelBuffer::U16(data.iter().map(|&v| v.round().clamp(0.0, 65535.0) as u16).collect())
        }
        PixelFormat::GrayF32 | PixelFormat::RgbaF32 => PixelBuffer::F32(data.to_vec()),
    }
}
