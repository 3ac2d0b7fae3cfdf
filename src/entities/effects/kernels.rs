//! Convolution mask table.
//!
//! Masks are applied as correlation (not flipped), matching the usual
//! image-processing convention where Sobel-X responds positively to a
//! left-to-right increase.

/// How a kernel's raw response is mapped back into the pixel range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Weighted average or sharpening: clip to range.
    Clip,
    /// Gradient / second derivative: absolute value, then clip to range.
    Magnitude,
}

/// Square convolution mask (row-major weights, already scaled).
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    pub name: &'static str,
    pub size: usize,
    pub weights: Vec<f32>,
    pub response: Response,
}

impl Kernel {
    fn scaled(name: &'static str, size: usize, raw: &[f32], divisor: f32, response: Response) -> Self {
        debug_assert_eq!(raw.len(), size * size);
        Self {
            name,
            size,
            weights: raw.iter().map(|w| w / divisor).collect(),
            response,
        }
    }

    pub fn half(&self) -> usize {
        self.size / 2
    }

    pub fn sum(&self) -> f32 {
        self.weights.iter().sum()
    }
}

const AVERAGE_3: [f32; 9] = [1.0; 9];
const AVERAGE_5: [f32; 25] = [1.0; 25];

const GAUSSIAN_3: [f32; 9] = [
    1.0, 2.0, 1.0,
    2.0, 4.0, 2.0,
    1.0, 2.0, 1.0,
];

// Outer product of the binomial row [1 4 6 4 1].
const GAUSSIAN_5: [f32; 25] = [
    1.0, 4.0, 6.0, 4.0, 1.0,
    4.0, 16.0, 24.0, 16.0, 4.0,
    6.0, 24.0, 36.0, 24.0, 6.0,
    4.0, 16.0, 24.0, 16.0, 4.0,
    1.0, 4.0, 6.0, 4.0, 1.0,
];

const SOBEL_X: [f32; 9] = [
    -1.0, 0.0, 1.0,
    -2.0, 0.0, 2.0,
    -1.0, 0.0, 1.0,
];

const SOBEL_Y: [f32; 9] = [
    -1.0, -2.0, -1.0,
    0.0, 0.0, 0.0,
    1.0, 2.0, 1.0,
];

const LAPLACIAN_3: [f32; 9] = [
    0.0, 1.0, 0.0,
    1.0, -4.0, 1.0,
    0.0, 1.0, 0.0,
];

const LAPLACIAN_5: [f32; 25] = [
    0.0, 0.0, -1.0, 0.0, 0.0,
    0.0, -1.0, -2.0, -1.0, 0.0,
    -1.0, -2.0, 16.0, -2.0, -1.0,
    0.0, -1.0, -2.0, -1.0, 0.0,
    0.0, 0.0, -1.0, 0.0, 0.0,
];

const SHARPEN_3: [f32; 9] = [
    0.0, -1.0, 0.0,
    -1.0, 5.0, -1.0,
    0.0, -1.0, 0.0,
];

const EDGE_3: [f32; 9] = [
    -1.0, -1.0, -1.0,
    -1.0, 8.0, -1.0,
    -1.0, -1.0, -1.0,
];

pub fn average(size: usize) -> Option<Kernel> {
    match size {
        3 => Some(Kernel::scaled("Average 3x3", 3, &AVERAGE_3, 9.0, Response::Clip)),
        5 => Some(Kernel::scaled("Average 5x5", 5, &AVERAGE_5, 25.0, Response::Clip)),
        _ => None,
    }
}

pub fn gaussian(size: usize) -> Option<Kernel> {
    match size {
        3 => Some(Kernel::scaled("Gaussian 3x3", 3, &GAUSSIAN_3, 16.0, Response::Clip)),
        5 => Some(Kernel::scaled("Gaussian 5x5", 5, &GAUSSIAN_5, 256.0, Response::Clip)),
        _ => None,
    }
}

pub fn sobel_x(size: usize) -> Option<Kernel> {
    (size == 3).then(|| Kernel::scaled("Sobel X", 3, &SOBEL_X, 1.0, Response::Magnitude))
}

pub fn sobel_y(size: usize) -> Option<Kernel> {
    (size == 3).then(|| Kernel::scaled("Sobel Y", 3, &SOBEL_Y, 1.0, Response::Magnitude))
}

pub fn laplacian(size: usize) -> Option<Kernel> {
    match size {
        3 => Some(Kernel::scaled("Laplacian", 3, &LAPLACIAN_3, 1.0, Response::Magnitude)),
        5 => Some(Kernel::scaled("Laplacian 5x5", 5, &LAPLACIAN_5, 1.0, Response::Magnitude)),
        _ => None,
    }
}

pub fn sharpen(size: usize) -> Option<Kernel> {
    (size == 3).then(|| Kernel::scaled("Sharpen", 3, &SHARPEN_3, 1.0, Response::Clip))
}

pub fn edge_detect(size: usize) -> Option<Kernel> {
    (size == 3).then(|| Kernel::scaled("Edge Detection", 3, &EDGE_3, 1.0, Response::Magnitude))
}
