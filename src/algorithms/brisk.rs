//! BRISK: FAST scores tracked across octaves and intra-octaves, described by
//! brightness comparisons on a concentric sampling pattern.

use std::f32::consts::PI;

use image::{imageops::FilterType, GrayImage};
use imageproc::corners::Corner;
use nalgebra::{Point2, Rotation2, Vector2};
use once_cell::sync::Lazy;

use crate::{
    algorithms::{
        fast::fast_corners,
        sampling::{normalize_degrees, pack_bits, IntegralImage},
    },
    frame::{DescriptorTable, Keypoint},
};

pub const BRISK_BYTES: usize = 64;

const FAST_THRESHOLD: u8 = 30;

/// Diameter of a keypoint found at scale 1
const BASIC_SIZE: f32 = 12.0;

/// Octaves `2^i` interleaved with intra-octaves `1.5 * 2^i`
const LAYER_SCALES: [f32; 6] = [1.0, 1.5, 2.0, 3.0, 4.0, 6.0];

struct Layer {
    scale: f32,
    width: u32,
    height: u32,
    scores: Vec<f32>,
    corners: Vec<Corner>,
}

impl Layer {
    fn new(image: &GrayImage, scale: f32) -> Option<Self> {
        let width = (image.width() as f32 / scale).round() as u32;
        let height = (image.height() as f32 / scale).round() as u32;
        if width < 8 || height < 8 {
            return None;
        }

        let resized = if scale == 1.0 {
            image.clone()
        } else {
            image::imageops::resize(image, width, height, FilterType::Triangle)
        };
        let corners = fast_corners(&resized, FAST_THRESHOLD);
        let mut scores = vec![0.0; (width * height) as usize];
        for corner in &corners {
            scores[(corner.y * width + corner.x) as usize] = corner.score;
        }

        Some(Self {
            scale,
            width,
            height,
            scores,
            corners,
        })
    }

    /// Best FAST score within `radius` layer pixels of an original image position
    fn max_score_near(&self, x: f32, y: f32, radius: i64) -> f32 {
        let (cx, cy) = ((x / self.scale).round() as i64, (y / self.scale).round() as i64);
        let mut best = 0.0f32;
        for ny in (cy - radius).max(0)..=(cy + radius).min(self.height as i64 - 1) {
            for nx in (cx - radius).max(0)..=(cx + radius).min(self.width as i64 - 1) {
                best = best.max(self.scores[(ny * self.width as i64 + nx) as usize]);
            }
        }
        best
    }
}

/// FAST maxima that also beat the neighboring layers of the scale pyramid.
pub fn detect(image: &GrayImage) -> Vec<Keypoint> {
    let layers: Vec<Layer> = LAYER_SCALES
        .iter()
        .map_while(|&scale| Layer::new(image, scale))
        .collect();

    let mut keypoints = Vec::new();
    for (index, layer) in layers.iter().enumerate() {
        let neighbors = [index.checked_sub(1), Some(index + 1)];
        for corner in &layer.corners {
            let x = corner.x as f32 * layer.scale;
            let y = corner.y as f32 * layer.scale;

            let dominated = neighbors
                .iter()
                .flatten()
                .filter_map(|&i| layers.get(i))
                .any(|other| other.max_score_near(x, y, 1) > corner.score);
            if !dominated {
                keypoints.push(
                    Keypoint::new(x, y, BASIC_SIZE * layer.scale)
                        .with_response(corner.score)
                        .with_octave(index as u32),
                );
            }
        }
    }
    keypoints
}

struct PatternPoint {
    offset: Vector2<f32>,
    sigma: f32,
}

struct Pattern {
    points: Vec<PatternPoint>,
    /// pairs closer than the short distance, used for the bit string
    short_pairs: Vec<(usize, usize)>,
    /// pairs further apart than the long distance, used for the orientation
    long_pairs: Vec<(usize, usize)>,
}

static PATTERN: Lazy<Pattern> = Lazy::new(|| {
    const RADII: [f32; 5] = [0.0, 2.9, 4.9, 7.4, 10.8];
    const COUNTS: [usize; 5] = [1, 10, 14, 15, 20];
    const SHORT_DISTANCE: f32 = 9.75;
    const LONG_DISTANCE: f32 = 13.67;

    let mut points = Vec::new();
    for (ring, (&radius, &count)) in RADII.iter().zip(COUNTS.iter()).enumerate() {
        let sigma = if radius == 0.0 {
            0.5
        } else {
            0.165 * 2.0 * PI * radius / count as f32
        };
        // odd rings are rotated by half a step
        let phase = if ring % 2 == 1 { PI / count as f32 } else { 0.0 };
        for j in 0..count {
            let theta = 2.0 * PI * j as f32 / count as f32 + phase;
            points.push(PatternPoint {
                offset: Vector2::new(radius * theta.cos(), radius * theta.sin()),
                sigma,
            });
        }
    }

    let mut short_pairs = Vec::new();
    let mut long_pairs = Vec::new();
    for i in 1..points.len() {
        for j in 0..i {
            let distance = (points[i].offset - points[j].offset).norm();
            if distance < SHORT_DISTANCE {
                short_pairs.push((i, j));
            } else if distance > LONG_DISTANCE {
                long_pairs.push((i, j));
            }
        }
    }
    short_pairs.truncate(BRISK_BYTES * 8);

    Pattern {
        points,
        short_pairs,
        long_pairs,
    }
});

fn sample_pattern(integral: &IntegralImage, center: Point2<f32>, scale: f32, angle: f32) -> Vec<f32> {
    let rotation = Rotation2::new(angle.to_radians());
    PATTERN
        .points
        .iter()
        .map(|point| {
            let p = center + rotation * point.offset * scale;
            integral.mean(p.x, p.y, point.sigma * scale)
        })
        .collect()
}

/// Local gradient direction from the long distance pairs, in degrees.
fn orientation(intensities: &[f32], scale: f32) -> f32 {
    let mut gradient = Vector2::zeros();
    for &(i, j) in &PATTERN.long_pairs {
        let direction = (PATTERN.points[j].offset - PATTERN.points[i].offset) * scale;
        gradient += direction * ((intensities[j] - intensities[i]) / direction.norm_squared());
    }
    normalize_degrees(gradient.y.atan2(gradient.x).to_degrees())
}

/// Describes every keypoint, recomputing its orientation from the pattern.
///
/// Returns the descriptor table and the orientation found for each keypoint.
pub fn describe(image: &GrayImage, keypoints: &[Keypoint]) -> (DescriptorTable<u8>, Vec<f32>) {
    let integral = IntegralImage::new(image);
    let mut table = DescriptorTable::with_capacity(BRISK_BYTES, keypoints.len());
    let mut angles = Vec::with_capacity(keypoints.len());

    for keypoint in keypoints {
        let scale = (keypoint.size / BASIC_SIZE).max(1.0);
        let upright = sample_pattern(&integral, keypoint.position, scale, 0.0);
        let angle = orientation(&upright, scale);

        let steered = sample_pattern(&integral, keypoint.position, scale, angle);
        let bits = PATTERN
            .short_pairs
            .iter()
            .map(|&(i, j)| steered[i] > steered[j]);
        table.push(&pack_bits(bits, BRISK_BYTES));
        angles.push(angle);
    }

    (table, angles)
}
