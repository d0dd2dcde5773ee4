//! Structure tensor based corner detectors: Shi-Tomasi ("good features to
//! track") and Harris.

use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use crate::frame::Keypoint;

/// Sobel products `Ix*Ix`, `Ix*Iy`, `Iy*Iy` summed over a square block around every pixel.
struct StructureTensor {
    width: usize,
    height: usize,
    xx: Vec<f64>,
    xy: Vec<f64>,
    yy: Vec<f64>,
}

impl StructureTensor {
    fn new(image: &GrayImage, block_size: usize) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let gx = horizontal_sobel(image);
        let gy = vertical_sobel(image);

        let mut xx = Vec::with_capacity(width * height);
        let mut xy = Vec::with_capacity(width * height);
        let mut yy = Vec::with_capacity(width * height);
        for (dx, dy) in gx.pixels().zip(gy.pixels()) {
            let (dx, dy) = (dx.0[0] as f64, dy.0[0] as f64);
            xx.push(dx * dx);
            xy.push(dx * dy);
            yy.push(dy * dy);
        }

        Self {
            width,
            height,
            xx: window_sums(&xx, width, height, block_size),
            xy: window_sums(&xy, width, height, block_size),
            yy: window_sums(&yy, width, height, block_size),
        }
    }

    fn min_eigenvalue(&self, i: usize) -> f64 {
        let (a, b, c) = (self.xx[i], self.xy[i], self.yy[i]);
        let half_trace = 0.5 * (a + c);
        half_trace - (0.25 * (a - c) * (a - c) + b * b).sqrt()
    }

    fn harris_response(&self, i: usize, k: f64) -> f64 {
        let (a, b, c) = (self.xx[i], self.xy[i], self.yy[i]);
        a * c - b * b - k * (a + c) * (a + c)
    }
}

/// Sum of `values` over the `block x block` window anchored at its center
/// (`block / 2` pixels before, the rest after), clipped to the image.
fn window_sums(values: &[f64], width: usize, height: usize, block: usize) -> Vec<f64> {
    let stride = width + 1;
    let mut integral = vec![0.0f64; stride * (height + 1)];
    for y in 0..height {
        let mut row = 0.0;
        for x in 0..width {
            row += values[y * width + x];
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row;
        }
    }

    let before = block / 2;
    let after = block.saturating_sub(1) - before;
    let mut sums = Vec::with_capacity(width * height);
    for y in 0..height {
        let (y0, y1) = (y.saturating_sub(before), (y + after + 1).min(height));
        for x in 0..width {
            let (x0, x1) = (x.saturating_sub(before), (x + after + 1).min(width));
            sums.push(
                integral[y1 * stride + x1] - integral[y0 * stride + x1] - integral[y1 * stride + x0]
                    + integral[y0 * stride + x0],
            );
        }
    }
    sums
}

/// `true` when no 8-neighbor is strictly larger
fn is_local_max(values: &[f64], width: usize, height: usize, x: usize, y: usize) -> bool {
    let value = values[y * width + x];
    for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
        for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
            if values[ny * width + nx] > value {
                return false;
            }
        }
    }
    true
}

/// Greedily accept keypoints (already sorted by descending quality) that keep
/// at least `min_distance` from every keypoint accepted before them.
pub fn spread_out(
    candidates: impl IntoIterator<Item = Keypoint>,
    min_distance: f32,
    max_count: usize,
    width: u32,
    height: u32,
) -> Vec<Keypoint> {
    let cell = min_distance.max(1.0);
    let grid_w = (width as f32 / cell).ceil() as usize + 1;
    let grid_h = (height as f32 / cell).ceil() as usize + 1;
    let mut grid: Vec<Vec<usize>> = vec![Vec::new(); grid_w * grid_h];
    let mut accepted: Vec<Keypoint> = Vec::new();
    let min_distance_sq = min_distance * min_distance;

    for candidate in candidates {
        if accepted.len() >= max_count {
            break;
        }
        let gx = ((candidate.x() / cell) as usize).min(grid_w - 1);
        let gy = ((candidate.y() / cell) as usize).min(grid_h - 1);

        let crowded = (gy.saturating_sub(1)..=(gy + 1).min(grid_h - 1)).any(|ny| {
            (gx.saturating_sub(1)..=(gx + 1).min(grid_w - 1)).any(|nx| {
                grid[ny * grid_w + nx].iter().any(|&i| {
                    let d = accepted[i].position - candidate.position;
                    d.norm_squared() < min_distance_sq
                })
            })
        });

        if !crowded {
            grid[gy * grid_w + gx].push(accepted.len());
            accepted.push(candidate);
        }
    }

    accepted
}

pub struct ShiTomasiParams {
    pub block_size: usize,
    pub min_distance: f32,
    pub quality_level: f64,
}

impl Default for ShiTomasiParams {
    fn default() -> Self {
        // no overlap between neighboring corners
        let block_size = 4;
        Self {
            block_size,
            min_distance: block_size as f32,
            quality_level: 0.01,
        }
    }
}

/// Shi-Tomasi corners, strongest first.
pub fn shi_tomasi(image: &GrayImage, params: &ShiTomasiParams) -> Vec<Keypoint> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let tensor = StructureTensor::new(image, params.block_size);
    let eigen: Vec<f64> = (0..width * height)
        .map(|i| tensor.min_eigenvalue(i).max(0.0))
        .collect();

    let max = eigen.iter().copied().fold(0.0, f64::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let threshold = max * params.quality_level;

    let mut candidates: Vec<Keypoint> = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .filter(|&(x, y)| {
            eigen[y * width + x] > threshold && is_local_max(&eigen, width, height, x, y)
        })
        .map(|(x, y)| {
            Keypoint::new(x as f32, y as f32, params.block_size as f32)
                .with_response(eigen[y * width + x] as f32)
        })
        .collect();

    // stable, so equal responses keep scan order
    candidates.sort_by(|a, b| b.response.total_cmp(&a.response));

    let max_corners = (width * height) / params.min_distance.max(1.0) as usize;
    spread_out(
        candidates,
        params.min_distance,
        max_corners,
        image.width(),
        image.height(),
    )
}

pub struct HarrisParams {
    pub block_size: usize,
    pub k: f64,
    /// minimum response after normalizing to `[0, 255]`
    pub min_response: f32,
    /// keypoint diameter, also the overlap distance for suppression
    pub keypoint_size: f32,
}

impl Default for HarrisParams {
    fn default() -> Self {
        let aperture = 3.0;
        Self {
            block_size: 2,
            k: 0.04,
            min_response: 100.0,
            keypoint_size: 2.0 * aperture,
        }
    }
}

/// Harris corners with overlapping keypoints suppressed in favor of the stronger one.
pub fn harris(image: &GrayImage, params: &HarrisParams) -> Vec<Keypoint> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let tensor = StructureTensor::new(image, params.block_size);
    let responses: Vec<f64> = (0..width * height)
        .map(|i| tensor.harris_response(i, params.k))
        .collect();

    let (min, max) = responses
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &r| (lo.min(r), hi.max(r)));
    if max <= min {
        return Vec::new();
    }
    let normalize = |r: f64| ((r - min) / (max - min) * 255.0) as f32;

    let mut candidates: Vec<Keypoint> = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .filter_map(|(x, y)| {
            let response = normalize(responses[y * width + x]);
            (response > params.min_response).then(|| {
                Keypoint::new(x as f32, y as f32, params.keypoint_size).with_response(response)
            })
        })
        .collect();

    candidates.sort_by(|a, b| b.response.total_cmp(&a.response));
    spread_out(
        candidates,
        params.keypoint_size,
        usize::MAX,
        image.width(),
        image.height(),
    )
}
