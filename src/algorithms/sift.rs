//! SIFT: difference of Gaussian extrema refined to subpixel accuracy and
//! described by histograms of gradient orientations.

use std::collections::HashMap;

use image::GrayImage;
use nalgebra::{Matrix3, Vector3};

use crate::{
    algorithms::scale_space::{self, at, dominant_orientations, gradients, Plane},
    frame::{DescriptorTable, Keypoint},
};

pub const SIFT_DIMENSIONS: usize = DESCRIPTOR_WIDTH * DESCRIPTOR_WIDTH * HISTOGRAM_BINS;

const LAYERS: usize = 3;
const SIGMA: f32 = 1.6;
/// blur assumed to be already present in the input image
const INITIAL_SIGMA: f32 = 0.5;
const CONTRAST_THRESHOLD: f32 = 0.04;
const EDGE_THRESHOLD: f32 = 10.0;
const BORDER: usize = 5;
const MAX_REFINE_STEPS: usize = 5;

const ORIENTATION_BINS: usize = 36;
const ORIENTATION_PEAK_RATIO: f32 = 0.8;
/// orientation window sigma, relative to the keypoint scale
const ORIENTATION_SIGMA_FACTOR: f32 = 1.5;
const ORIENTATION_RADIUS_FACTOR: f32 = 3.0 * ORIENTATION_SIGMA_FACTOR;

const DESCRIPTOR_WIDTH: usize = 4;
const HISTOGRAM_BINS: usize = 8;
const DESCRIPTOR_SCALE_FACTOR: f32 = 3.0;
const DESCRIPTOR_MAGNITUDE_CLIP: f32 = 0.2;

/// Gaussian scale space, `LAYERS + 3` images per octave.
pub struct GaussianPyramid {
    octaves: Vec<Vec<Plane>>,
}

impl GaussianPyramid {
    pub fn new(image: &GrayImage) -> Self {
        let min_side = image.width().min(image.height()).max(1) as f32;
        let n_octaves = (min_side.log2().floor() as i32 - 2).max(1) as usize;

        // incremental blur taking layer i-1 to layer i
        let k = 2f32.powf(1.0 / LAYERS as f32);
        let mut increments = vec![SIGMA];
        for i in 1..LAYERS + 3 {
            let previous = SIGMA * k.powi(i as i32 - 1);
            let total = previous * k;
            increments.push((total * total - previous * previous).sqrt());
        }

        let base = scale_space::gaussian_blur(
            &scale_space::from_gray(image),
            (SIGMA * SIGMA - INITIAL_SIGMA * INITIAL_SIGMA).sqrt(),
        );

        let mut octaves: Vec<Vec<Plane>> = Vec::with_capacity(n_octaves);
        for octave in 0..n_octaves {
            let first = match octaves.last() {
                None => base.clone(),
                // layer LAYERS has twice the base blur of the previous octave
                Some(previous) => scale_space::decimate(&previous[LAYERS]),
            };
            if octave > 0 && first.nrows().min(first.ncols()) <= 2 * BORDER {
                break;
            }

            let mut layers = vec![first];
            for sigma in &increments[1..] {
                let next = scale_space::gaussian_blur(&layers[layers.len() - 1], *sigma);
                layers.push(next);
            }
            octaves.push(layers);
        }

        Self { octaves }
    }

    pub fn octave_count(&self) -> usize {
        self.octaves.len()
    }

    fn differences(&self, octave: usize) -> Vec<Plane> {
        self.octaves[octave]
            .windows(2)
            .map(|pair| &pair[1] - &pair[0])
            .collect()
    }

    /// Octave and layer whose blur is closest to `sigma` original image pixels.
    fn level_for(&self, sigma: f32) -> (usize, usize) {
        let ratio = (sigma / SIGMA).max(1.0);
        let octave = (ratio.log2().floor() as usize).min(self.octaves.len() - 1);
        let local = ratio / (1 << octave) as f32;
        let layer = ((local.log2() * LAYERS as f32).round() as usize).min(LAYERS + 2);
        (octave, layer)
    }
}

fn is_extremum(dogs: &[Plane], layer: usize, x: usize, y: usize) -> bool {
    let value = dogs[layer][(y, x)];
    let mut neighbors = (layer - 1..=layer + 1).flat_map(move |l| {
        (y - 1..=y + 1).flat_map(move |ny| (x - 1..=x + 1).map(move |nx| dogs[l][(ny, nx)]))
    });
    if value > 0.0 {
        neighbors.all(|n| value >= n)
    } else {
        neighbors.all(|n| value <= n)
    }
}

struct Refined {
    x: usize,
    y: usize,
    layer: usize,
    offset: Vector3<f32>,
    contrast: f32,
}

/// Fit a quadratic around a DoG extremum, moving to the neighboring sample
/// while the offset exceeds half a pixel.
fn refine(dogs: &[Plane], mut x: usize, mut y: usize, mut layer: usize) -> Option<Refined> {
    let (rows, cols) = dogs[0].shape();
    for _ in 0..MAX_REFINE_STEPS {
        let d = |l: usize, dx: isize, dy: isize| at(&dogs[l], x as isize + dx, y as isize + dy);
        let center = d(layer, 0, 0);

        let gradient = Vector3::new(
            0.5 * (d(layer, 1, 0) - d(layer, -1, 0)),
            0.5 * (d(layer, 0, 1) - d(layer, 0, -1)),
            0.5 * (d(layer + 1, 0, 0) - d(layer - 1, 0, 0)),
        );
        let dxx = d(layer, 1, 0) + d(layer, -1, 0) - 2.0 * center;
        let dyy = d(layer, 0, 1) + d(layer, 0, -1) - 2.0 * center;
        let dss = d(layer + 1, 0, 0) + d(layer - 1, 0, 0) - 2.0 * center;
        let dxy = 0.25 * (d(layer, 1, 1) - d(layer, -1, 1) - d(layer, 1, -1) + d(layer, -1, -1));
        let dxs = 0.25
            * (d(layer + 1, 1, 0) - d(layer + 1, -1, 0) - d(layer - 1, 1, 0) + d(layer - 1, -1, 0));
        let dys = 0.25
            * (d(layer + 1, 0, 1) - d(layer + 1, 0, -1) - d(layer - 1, 0, 1) + d(layer - 1, 0, -1));
        let hessian = Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss);

        let offset = -hessian.lu().solve(&gradient)?;
        if offset.iter().all(|o| o.abs() < 0.5) {
            let contrast = center + 0.5 * gradient.dot(&offset);
            if contrast.abs() * (LAYERS as f32) < CONTRAST_THRESHOLD {
                return None;
            }
            // principal curvature ratio
            let trace = dxx + dyy;
            let det = dxx * dyy - dxy * dxy;
            let limit = (EDGE_THRESHOLD + 1.0).powi(2) / EDGE_THRESHOLD;
            if det <= 0.0 || trace * trace / det >= limit {
                return None;
            }
            return Some(Refined {
                x,
                y,
                layer,
                offset,
                contrast,
            });
        }
        if offset.iter().any(|o| o.abs() > (cols.max(rows)) as f32) {
            return None;
        }

        let step = |value: usize, delta: f32| (value as isize + delta.round() as isize) as usize;
        let (nx, ny, nl) = (step(x, offset.x), step(y, offset.y), step(layer, offset.z));
        if nl < 1
            || nl > LAYERS
            || nx < BORDER
            || nx >= cols - BORDER
            || ny < BORDER
            || ny >= rows - BORDER
        {
            return None;
        }
        (x, y, layer) = (nx, ny, nl);
    }
    None
}

pub fn detect(image: &GrayImage) -> Vec<Keypoint> {
    let pyramid = GaussianPyramid::new(image);
    let threshold = 0.5 * CONTRAST_THRESHOLD / LAYERS as f32;
    let mut keypoints = Vec::new();

    for octave in 0..pyramid.octave_count() {
        let dogs = pyramid.differences(octave);
        let (rows, cols) = dogs[0].shape();
        if rows <= 2 * BORDER || cols <= 2 * BORDER {
            continue;
        }
        let octave_scale = (1 << octave) as f32;
        let mut derivatives: HashMap<usize, (Plane, Plane)> = HashMap::new();

        for layer in 1..=LAYERS {
            for y in BORDER..rows - BORDER {
                for x in BORDER..cols - BORDER {
                    if dogs[layer][(y, x)].abs() <= threshold || !is_extremum(&dogs, layer, x, y) {
                        continue;
                    }
                    let Some(refined) = refine(&dogs, x, y, layer) else {
                        continue;
                    };

                    let local_sigma =
                        SIGMA * 2f32.powf((refined.layer as f32 + refined.offset.z) / LAYERS as f32);
                    let (dx, dy) = derivatives
                        .entry(refined.layer)
                        .or_insert_with(|| gradients(&pyramid.octaves[octave][refined.layer]));
                    let angles = dominant_orientations(
                        dx,
                        dy,
                        refined.x as f32,
                        refined.y as f32,
                        (ORIENTATION_RADIUS_FACTOR * local_sigma).round() as isize,
                        ORIENTATION_SIGMA_FACTOR * local_sigma,
                        ORIENTATION_BINS,
                        ORIENTATION_PEAK_RATIO,
                    );

                    let keypoint = Keypoint::new(
                        (refined.x as f32 + refined.offset.x) * octave_scale,
                        (refined.y as f32 + refined.offset.y) * octave_scale,
                        2.0 * local_sigma * octave_scale,
                    )
                    .with_response(refined.contrast.abs())
                    .with_octave(octave as u32);
                    keypoints.extend(angles.into_iter().map(|angle| keypoint.with_angle(angle)));
                }
            }
        }
    }
    keypoints
}

/// Orientation histograms over a `4 x 4` grid rotated with the keypoint,
/// accumulated with trilinear interpolation.
fn descriptor(dx: &Plane, dy: &Plane, x: f32, y: f32, local_sigma: f32, angle: f32) -> Vec<f32> {
    const D: usize = DESCRIPTOR_WIDTH;
    const N: usize = HISTOGRAM_BINS;

    let (sin, cos) = angle.to_radians().sin_cos();
    let bins_per_radian = N as f32 / std::f32::consts::TAU;
    let histogram_width = DESCRIPTOR_SCALE_FACTOR * local_sigma;
    let diagonal = ((dx.ncols().pow(2) + dx.nrows().pow(2)) as f32).sqrt();
    let radius = (histogram_width * std::f32::consts::SQRT_2 * (D as f32 + 1.0) * 0.5)
        .min(diagonal)
        .round() as isize;
    let weight_scale = -1.0 / (0.5 * (D * D) as f32);

    // padded by one bin on each side so interpolation never leaves the array
    let mut histogram = vec![0.0f32; (D + 2) * (D + 2) * (N + 2)];
    let index = |r: usize, c: usize, o: usize| (r * (D + 2) + c) * (N + 2) + o;
    let (cx, cy) = (x.round() as isize, y.round() as isize);

    for oy in -radius..=radius {
        for ox in -radius..=radius {
            let rot_x = (ox as f32 * cos + oy as f32 * sin) / histogram_width;
            let rot_y = (-(ox as f32) * sin + oy as f32 * cos) / histogram_width;
            let row = rot_y + D as f32 / 2.0 - 0.5;
            let col = rot_x + D as f32 / 2.0 - 0.5;
            if row <= -1.0 || row >= D as f32 || col <= -1.0 || col >= D as f32 {
                continue;
            }
            let (px, py) = (cx + ox, cy + oy);
            if px <= 0 || py <= 0 || px >= dx.ncols() as isize - 1 || py >= dx.nrows() as isize - 1 {
                continue;
            }

            let (gx, gy) = (dx[(py as usize, px as usize)], dy[(py as usize, px as usize)]);
            let magnitude = (gx * gx + gy * gy).sqrt()
                * ((rot_x * rot_x + rot_y * rot_y) * weight_scale).exp();
            let orientation = (gy.atan2(gx) - angle.to_radians()).rem_euclid(std::f32::consts::TAU);
            let bin = orientation * bins_per_radian;

            let (r0, c0, o0) = (row.floor(), col.floor(), bin.floor());
            let (dr, dc, d_o) = (row - r0, col - c0, bin - o0);
            let (r0, c0) = ((r0 + 1.0) as usize, (c0 + 1.0) as usize);
            let o0 = o0 as usize % N;

            for (r, wr) in [(r0, 1.0 - dr), (r0 + 1, dr)] {
                for (c, wc) in [(c0, 1.0 - dc), (c0 + 1, dc)] {
                    for (o, wo) in [(o0, 1.0 - d_o), (o0 + 1, d_o)] {
                        histogram[index(r, c, o)] += magnitude * wr * wc * wo;
                    }
                }
            }
        }
    }

    let mut values = Vec::with_capacity(SIFT_DIMENSIONS);
    for r in 1..=D {
        for c in 1..=D {
            // the orientation axis wraps around
            histogram[index(r, c, 0)] += histogram[index(r, c, N)];
            values.extend((0..N).map(|o| histogram[index(r, c, o)]));
        }
    }

    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    let clip = DESCRIPTOR_MAGNITUDE_CLIP * norm;
    values.iter_mut().for_each(|v| *v = v.min(clip));
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::EPSILON);
    values
        .iter_mut()
        .for_each(|v| *v = (*v * 512.0 / norm).clamp(0.0, 255.0));
    values
}

pub fn describe(image: &GrayImage, keypoints: &[Keypoint]) -> DescriptorTable<f32> {
    let mut table = DescriptorTable::with_capacity(SIFT_DIMENSIONS, keypoints.len());
    if keypoints.is_empty() {
        return table;
    }

    let pyramid = GaussianPyramid::new(image);
    let mut derivatives: HashMap<(usize, usize), (Plane, Plane)> = HashMap::new();

    for keypoint in keypoints {
        let (octave, layer) = pyramid.level_for(keypoint.size / 2.0);
        let octave_scale = (1 << octave) as f32;
        let local_sigma = (keypoint.size / 2.0 / octave_scale).max(0.5);
        let (x, y) = (keypoint.x() / octave_scale, keypoint.y() / octave_scale);

        let (dx, dy) = derivatives
            .entry((octave, layer))
            .or_insert_with(|| gradients(&pyramid.octaves[octave][layer]));
        let angle = keypoint.angle.unwrap_or_else(|| {
            dominant_orientations(
                dx,
                dy,
                x,
                y,
                (ORIENTATION_RADIUS_FACTOR * local_sigma).round() as isize,
                ORIENTATION_SIGMA_FACTOR * local_sigma,
                ORIENTATION_BINS,
                1.0,
            )[0]
        });

        table.push(&descriptor(dx, dy, x, y, local_sigma, angle));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blob(size: u32, cx: f32, cy: f32, sigma: f32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
            Luma([(30.0 + 200.0 * (-d2 / (2.0 * sigma * sigma)).exp()) as u8])
        })
    }

    #[test]
    fn pyramid_layout() {
        let pyramid = GaussianPyramid::new(&GrayImage::new(128, 96));
        assert_eq!(pyramid.octave_count(), 4);
        assert!(pyramid.octaves.iter().all(|o| o.len() == LAYERS + 3));
        assert_eq!(pyramid.octaves[1][0].shape(), (48, 64));
        assert_eq!(pyramid.level_for(SIGMA), (0, 0));
        assert_eq!(pyramid.level_for(2.0 * SIGMA), (1, 0));
    }

    #[test]
    fn finds_gaussian_blob_at_its_scale() {
        let image = blob(96, 48.0, 48.0, 5.0);
        let keypoints = detect(&image);
        let keypoint = keypoints
            .iter()
            .find(|kp| (kp.x() - 48.0).abs() < 2.0 && (kp.y() - 48.0).abs() < 2.0)
            .expect("blob center not detected");
        // blob radius ~ sqrt(2) * sigma
        assert!(keypoint.size > 5.0 && keypoint.size < 30.0, "size was {}", keypoint.size);
        assert!(keypoint.angle.is_some());
    }

    #[test]
    fn descriptors_are_normalized_and_bounded() {
        let image = GrayImage::from_fn(96, 96, |x, y| Luma([(x + y) as u8]));
        let keypoints = [Keypoint::new(48.0, 48.0, 8.0), Keypoint::new(2.0, 2.0, 8.0)];
        let table = describe(&image, &keypoints);
        assert_eq!(table.width(), 128);
        assert_eq!(table.len(), 2);
        for row in table.rows() {
            assert!(row.iter().all(|&v| (0.0..=255.0).contains(&v)));
        }
        let norm = table.row(0).iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 512.0).abs() < 1.0, "norm was {}", norm);
    }
}
