//! Floating point image planes for the scale space detectors (SIFT, AKAZE).
//!
//! A [`Plane`] is a `height x width` matrix indexed as `plane[(y, x)]`.

use image::GrayImage;
use nalgebra::DMatrix;

pub type Plane = DMatrix<f32>;

/// Intensities rescaled to `[0, 1]`
pub fn from_gray(image: &GrayImage) -> Plane {
    Plane::from_fn(image.height() as usize, image.width() as usize, |y, x| {
        image.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0
    })
}

/// Value at `(x, y)` with coordinates clamped to the border.
#[inline]
pub fn at(plane: &Plane, x: isize, y: isize) -> f32 {
    let x = x.clamp(0, plane.ncols() as isize - 1) as usize;
    let y = y.clamp(0, plane.nrows() as isize - 1) as usize;
    plane[(y, x)]
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as isize;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);
    kernel
}

/// Separable Gaussian blur with replicated borders.
pub fn gaussian_blur(plane: &Plane, sigma: f32) -> Plane {
    if sigma <= 0.0 || plane.is_empty() {
        return plane.clone();
    }

    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let (rows, cols) = plane.shape();

    let horizontal = Plane::from_fn(rows, cols, |y, x| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| k * at(plane, x as isize + i as isize - radius, y as isize))
            .sum()
    });

    Plane::from_fn(rows, cols, |y, x| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| k * at(&horizontal, x as isize, y as isize + i as isize - radius))
            .sum()
    })
}

/// Keep every second pixel in both directions.
pub fn decimate(plane: &Plane) -> Plane {
    let rows = (plane.nrows() / 2).max(1);
    let cols = (plane.ncols() / 2).max(1);
    Plane::from_fn(rows, cols, |y, x| {
        at(plane, 2 * x as isize, 2 * y as isize)
    })
}

/// Halve the resolution by averaging 2x2 blocks.
pub fn half_sample(plane: &Plane) -> Plane {
    let rows = (plane.nrows() / 2).max(1);
    let cols = (plane.ncols() / 2).max(1);
    Plane::from_fn(rows, cols, |y, x| {
        let (x, y) = (2 * x as isize, 2 * y as isize);
        0.25 * (at(plane, x, y) + at(plane, x + 1, y) + at(plane, x, y + 1) + at(plane, x + 1, y + 1))
    })
}

/// Central difference derivatives `(dx, dy)`.
pub fn gradients(plane: &Plane) -> (Plane, Plane) {
    let (rows, cols) = plane.shape();
    let dx = Plane::from_fn(rows, cols, |y, x| {
        let (x, y) = (x as isize, y as isize);
        0.5 * (at(plane, x + 1, y) - at(plane, x - 1, y))
    });
    let dy = Plane::from_fn(rows, cols, |y, x| {
        let (x, y) = (x as isize, y as isize);
        0.5 * (at(plane, x, y + 1) - at(plane, x, y - 1))
    });
    (dx, dy)
}

/// Dominant gradient orientation around `(x, y)` in degrees, using a
/// magnitude and Gaussian weighted histogram of `bins` bins.
///
/// Returns every orientation whose smoothed histogram peak reaches
/// `peak_ratio` of the highest peak, strongest first.
#[allow(clippy::too_many_arguments)]
pub fn dominant_orientations(
    dx: &Plane,
    dy: &Plane,
    x: f32,
    y: f32,
    radius: isize,
    sigma: f32,
    bins: usize,
    peak_ratio: f32,
) -> Vec<f32> {
    let (cx, cy) = (x.round() as isize, y.round() as isize);
    let mut histogram = vec![0.0f32; bins];
    let weight_scale = -1.0 / (2.0 * sigma * sigma);

    for oy in -radius..=radius {
        for ox in -radius..=radius {
            let (px, py) = (cx + ox, cy + oy);
            if px < 1 || py < 1 || px >= dx.ncols() as isize - 1 || py >= dx.nrows() as isize - 1 {
                continue;
            }
            let (gx, gy) = (dx[(py as usize, px as usize)], dy[(py as usize, px as usize)]);
            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude == 0.0 {
                continue;
            }
            let weight = (((ox * ox + oy * oy) as f32) * weight_scale).exp();
            let angle = gy.atan2(gx).to_degrees().rem_euclid(360.0);
            let bin = (angle / 360.0 * bins as f32).round() as usize % bins;
            histogram[bin] += weight * magnitude;
        }
    }

    // [1 4 6 4 1] circular smoothing
    let smoothed: Vec<f32> = (0..bins)
        .map(|i| {
            let h = |offset: isize| histogram[(i as isize + offset).rem_euclid(bins as isize) as usize];
            (h(-2) + h(2)) / 16.0 + (h(-1) + h(1)) * 4.0 / 16.0 + h(0) * 6.0 / 16.0
        })
        .collect();

    let max = smoothed.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![0.0];
    }

    let mut peaks: Vec<(f32, f32)> = (0..bins)
        .filter_map(|i| {
            let left = smoothed[(i + bins - 1) % bins];
            let right = smoothed[(i + 1) % bins];
            let value = smoothed[i];
            if value > left && value > right && value >= peak_ratio * max {
                // parabolic interpolation of the peak position
                let offset = 0.5 * (left - right) / (left - 2.0 * value + right);
                let bin = (i as f32 + offset).rem_euclid(bins as f32);
                Some((value, bin * 360.0 / bins as f32))
            } else {
                None
            }
        })
        .collect();

    peaks.sort_by(|a, b| b.0.total_cmp(&a.0));
    if peaks.is_empty() {
        return vec![0.0];
    }
    peaks.into_iter().map(|(_, angle)| angle).collect()
}
