//! AKAZE: determinant of Hessian extrema in a nonlinear (Perona-Malik)
//! diffusion scale space, described with a rotated M-LDB bit string.

use image::GrayImage;

use crate::{
    algorithms::{
        sampling::pack_bits,
        scale_space::{self, at, dominant_orientations, gradients, Plane},
    },
    frame::{DescriptorTable, Keypoint},
};

pub const AKAZE_BYTES: usize = 61;

/// `3 * (C(4,2) + C(9,2) + C(16,2))` comparisons
const MLDB_BITS: usize = 486;

const BASE_SIGMA: f32 = 1.6;
const OCTAVES: usize = 4;
const SUBLEVELS: usize = 4;
const DETECTOR_THRESHOLD: f32 = 0.001;
const CONTRAST_PERCENTILE: f32 = 0.7;
const DERIVATIVE_FACTOR: f32 = 1.5;
/// explicit diffusion is stable for steps up to 1/4
const MAX_STEP: f32 = 0.25;
/// no octave is built below this many pixels on its short side
const MIN_OCTAVE_SIDE: usize = 32;

/// One level of the nonlinear scale space.
pub struct Evolution {
    pub plane: Plane,
    pub octave: usize,
    /// scale in original image pixels
    pub sigma: f32,
    /// scale in pixels of this level's octave
    pub local_sigma: f32,
}

impl Evolution {
    fn time(&self) -> f32 {
        0.5 * self.local_sigma * self.local_sigma
    }

    fn octave_scale(&self) -> f32 {
        (1 << self.octave) as f32
    }
}

/// Gradient magnitude below which `percentile` of the nonzero gradients fall.
fn contrast_factor(plane: &Plane, percentile: f32) -> f32 {
    let smoothed = scale_space::gaussian_blur(plane, 1.0);
    let (dx, dy) = gradients(&smoothed);
    let mut magnitudes: Vec<f32> = dx
        .iter()
        .zip(dy.iter())
        .map(|(gx, gy)| (gx * gx + gy * gy).sqrt())
        .filter(|&m| m > 0.0)
        .collect();
    if magnitudes.is_empty() {
        return 0.03;
    }
    magnitudes.sort_by(f32::total_cmp);
    let index = ((magnitudes.len() - 1) as f32 * percentile) as usize;
    magnitudes[index].max(1e-6)
}

/// Perona-Malik g2 conductance `1 / (1 + |grad|^2 / k^2)`
fn conductance(plane: &Plane, k: f32) -> Plane {
    let smoothed = scale_space::gaussian_blur(plane, 1.0);
    let (dx, dy) = gradients(&smoothed);
    let inverse_k2 = 1.0 / (k * k);
    dx.zip_map(&dy, |gx, gy| 1.0 / (1.0 + (gx * gx + gy * gy) * inverse_k2))
}

/// One explicit diffusion step of length `tau`.
fn diffuse(plane: &Plane, g: &Plane, tau: f32) -> Plane {
    let (rows, cols) = plane.shape();
    Plane::from_fn(rows, cols, |y, x| {
        let (x, y) = (x as isize, y as isize);
        let l = at(plane, x, y);
        let c = at(g, x, y);
        let flux_x = 0.5 * (at(g, x + 1, y) + c) * (at(plane, x + 1, y) - l)
            - 0.5 * (c + at(g, x - 1, y)) * (l - at(plane, x - 1, y));
        let flux_y = 0.5 * (at(g, x, y + 1) + c) * (at(plane, x, y + 1) - l)
            - 0.5 * (c + at(g, x, y - 1)) * (l - at(plane, x, y - 1));
        l + tau * (flux_x + flux_y)
    })
}

/// Nonlinear scale space of `OCTAVES x SUBLEVELS` levels.
pub fn build_scale_space(image: &GrayImage) -> Vec<Evolution> {
    let base = scale_space::gaussian_blur(&scale_space::from_gray(image), BASE_SIGMA);
    let k = contrast_factor(&base, CONTRAST_PERCENTILE);

    let mut levels: Vec<Evolution> = Vec::with_capacity(OCTAVES * SUBLEVELS);
    for octave in 0..OCTAVES {
        for sublevel in 0..SUBLEVELS {
            let sigma = BASE_SIGMA * 2f32.powf(octave as f32 + sublevel as f32 / SUBLEVELS as f32);
            let local_sigma = sigma / (1 << octave) as f32;

            let Some(previous) = levels.last() else {
                levels.push(Evolution {
                    plane: base.clone(),
                    octave,
                    sigma,
                    local_sigma,
                });
                continue;
            };

            let (mut plane, start_time) = if previous.octave == octave {
                (previous.plane.clone(), previous.time())
            } else {
                let halved = scale_space::half_sample(&previous.plane);
                if halved.nrows().min(halved.ncols()) < MIN_OCTAVE_SIDE {
                    return levels;
                }
                // coarser pixels make the same diffusion time a quarter as long
                (halved, previous.time() / 4.0)
            };

            let duration = 0.5 * local_sigma * local_sigma - start_time;
            if duration > 0.0 {
                let g = conductance(&plane, k);
                let steps = (duration / MAX_STEP).ceil() as usize;
                let tau = duration / steps as f32;
                for _ in 0..steps {
                    plane = diffuse(&plane, &g, tau);
                }
            }

            levels.push(Evolution {
                plane,
                octave,
                sigma,
                local_sigma,
            });
        }
    }
    levels
}

/// Scale normalized determinant of the Hessian.
fn hessian_response(level: &Evolution) -> Plane {
    let plane = &level.plane;
    let norm = level.local_sigma.powi(4);
    let (rows, cols) = plane.shape();
    Plane::from_fn(rows, cols, |y, x| {
        let (x, y) = (x as isize, y as isize);
        let center = at(plane, x, y);
        let dxx = at(plane, x + 1, y) - 2.0 * center + at(plane, x - 1, y);
        let dyy = at(plane, x, y + 1) - 2.0 * center + at(plane, x, y - 1);
        let dxy = 0.25
            * (at(plane, x + 1, y + 1) - at(plane, x + 1, y - 1) - at(plane, x - 1, y + 1)
                + at(plane, x - 1, y - 1));
        (dxx * dyy - dxy * dxy) * norm
    })
}

fn is_neighborhood_max(response: &Plane, x: usize, y: usize, value: f32, strict: bool) -> bool {
    let (x, y) = (x as isize, y as isize);
    for ny in y - 1..=y + 1 {
        for nx in x - 1..=x + 1 {
            let other = at(response, nx, ny);
            if other > value || (strict && other >= value) {
                return false;
            }
        }
    }
    true
}

pub fn detect(image: &GrayImage) -> Vec<Keypoint> {
    let levels = build_scale_space(image);
    let responses: Vec<Plane> = levels.iter().map(hessian_response).collect();

    let mut keypoints = Vec::new();
    for (index, level) in levels.iter().enumerate() {
        let response = &responses[index];
        let (rows, cols) = response.shape();
        let same_octave = |other: usize| levels[other].octave == level.octave;
        let below = index.checked_sub(1).filter(|&i| same_octave(i));
        let above = Some(index + 1).filter(|&i| i < levels.len() && same_octave(i));
        let (dx, dy) = gradients(&level.plane);

        for y in 1..rows.saturating_sub(1) {
            for x in 1..cols.saturating_sub(1) {
                let value = response[(y, x)];
                if value <= DETECTOR_THRESHOLD || !is_neighborhood_max(response, x, y, value, false) {
                    continue;
                }
                let beaten = [below, above]
                    .into_iter()
                    .flatten()
                    .any(|i| !is_neighborhood_max(&responses[i], x, y, value, true));
                if beaten {
                    continue;
                }

                let radius = (6.0 * level.local_sigma).round() as isize;
                let angle = dominant_orientations(
                    &dx,
                    &dy,
                    x as f32,
                    y as f32,
                    radius,
                    2.5 * level.local_sigma,
                    36,
                    1.0,
                )[0];

                let scale = level.octave_scale();
                keypoints.push(
                    Keypoint::new(x as f32 * scale, y as f32 * scale, DERIVATIVE_FACTOR * level.sigma)
                        .with_response(value)
                        .with_angle(angle)
                        .with_octave(index as u32),
                );
            }
        }
    }
    keypoints
}

/// Mean of `(L, Lx', Ly')` over one grid cell, the derivatives rotated into
/// the keypoint frame.
#[allow(clippy::too_many_arguments)]
fn cell_means(
    level: &Evolution,
    dx: &Plane,
    dy: &Plane,
    center: (f32, f32),
    (cos, sin): (f32, f32),
    (u0, v0): (f32, f32),
    cell: f32,
) -> [f32; 3] {
    const SAMPLES: usize = 4;
    let step = cell / SAMPLES as f32;
    let mut sums = [0.0f32; 3];
    for j in 0..SAMPLES {
        for i in 0..SAMPLES {
            // pattern coordinates, rotated into the image
            let u = u0 + (i as f32 + 0.5) * step;
            let v = v0 + (j as f32 + 0.5) * step;
            let x = (center.0 + u * cos - v * sin).round() as isize;
            let y = (center.1 + u * sin + v * cos).round() as isize;

            let (gx, gy) = (at(dx, x, y), at(dy, x, y));
            sums[0] += at(&level.plane, x, y);
            sums[1] += gx * cos + gy * sin;
            sums[2] += -gx * sin + gy * cos;
        }
    }
    let count = (SAMPLES * SAMPLES) as f32;
    sums.map(|s| s / count)
}

fn mldb_bits(level: &Evolution, dx: &Plane, dy: &Plane, keypoint: &Keypoint) -> Vec<bool> {
    let scale = level.octave_scale();
    let center = (keypoint.x() / scale, keypoint.y() / scale);
    let angle = keypoint.angle.unwrap_or(0.0).to_radians();
    let rotation = (angle.cos(), angle.sin());
    let half = 10.0 * level.local_sigma;

    let mut bits = Vec::with_capacity(MLDB_BITS);
    for grid in 2..=4usize {
        let cell = 2.0 * half / grid as f32;
        let means: Vec<[f32; 3]> = (0..grid * grid)
            .map(|c| {
                let origin = (-half + (c % grid) as f32 * cell, -half + (c / grid) as f32 * cell);
                cell_means(level, dx, dy, center, rotation, origin, cell)
            })
            .collect();

        for i in 0..means.len() {
            for j in i + 1..means.len() {
                for channel in 0..3 {
                    bits.push(means[i][channel] > means[j][channel]);
                }
            }
        }
    }
    bits
}

/// M-LDB descriptors; keypoints must come from [`detect`] on the same image,
/// their octave field naming the scale space level.
pub fn describe(image: &GrayImage, keypoints: &[Keypoint]) -> DescriptorTable<u8> {
    let mut table = DescriptorTable::with_capacity(AKAZE_BYTES, keypoints.len());
    if keypoints.is_empty() {
        return table;
    }

    let levels = build_scale_space(image);
    let derivatives: Vec<(Plane, Plane)> = levels.iter().map(|l| gradients(&l.plane)).collect();

    for keypoint in keypoints {
        let index = (keypoint.octave as usize).min(levels.len() - 1);
        let (dx, dy) = &derivatives[index];
        let bits = mldb_bits(&levels[index], dx, dy, keypoint);
        table.push(&pack_bits(bits, AKAZE_BYTES));
    }
    table
}
