//! FREAK (Fast Retina Keypoint) descriptor: a retina-like pattern with
//! overlapping receptive fields that shrink towards the center.

use std::f32::consts::PI;

use image::GrayImage;
use nalgebra::{Point2, Rotation2, Vector2};
use once_cell::sync::Lazy;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{
    algorithms::sampling::{normalize_degrees, pack_bits, IntegralImage},
    frame::{DescriptorTable, Keypoint},
};

pub const FREAK_BYTES: usize = 64;

const PATTERN_SCALE: f32 = 22.0;
const SMALLEST_KEYPOINT_SIZE: f32 = 7.0;
const POINTS_PER_RING: usize = 6;

struct ReceptiveField {
    offset: Vector2<f32>,
    sigma: f32,
}

struct Pattern {
    fields: Vec<ReceptiveField>,
    pairs: Vec<(usize, usize)>,
    orientation_pairs: Vec<(usize, usize)>,
}

static PATTERN: Lazy<Pattern> = Lazy::new(|| {
    let big_radius = 2.0 / 3.0;
    let small_radius = 2.0 / 24.0;
    let unit = (big_radius - small_radius) / 21.0;
    let radii: [f32; 8] = [
        big_radius,
        big_radius - 6.0 * unit,
        big_radius - 11.0 * unit,
        big_radius - 15.0 * unit,
        big_radius - 18.0 * unit,
        big_radius - 20.0 * unit,
        small_radius,
        0.0,
    ];
    let sigmas: [f32; 8] = [
        radii[0] / 2.0,
        radii[1] / 2.0,
        radii[2] / 2.0,
        radii[3] / 2.0,
        radii[4] / 2.0,
        radii[5] / 2.0,
        radii[6] / 2.0,
        radii[6] / 2.0,
    ];

    let mut fields = Vec::new();
    for (ring, (&radius, &sigma)) in radii.iter().zip(sigmas.iter()).enumerate() {
        let count = if radius == 0.0 { 1 } else { POINTS_PER_RING };
        let phase = (ring % 2) as f32 * PI / POINTS_PER_RING as f32;
        for j in 0..count {
            let theta = 2.0 * PI * j as f32 / count as f32 + phase;
            fields.push(ReceptiveField {
                offset: Vector2::new(radius * theta.cos(), radius * theta.sin()) * PATTERN_SCALE,
                sigma: sigma * PATTERN_SCALE,
            });
        }
    }

    // all pairs within each of the three outer rings
    let mut orientation_pairs = Vec::new();
    for ring in 0..3 {
        let base = ring * POINTS_PER_RING;
        for i in 0..POINTS_PER_RING {
            for j in i + 1..POINTS_PER_RING {
                orientation_pairs.push((base + i, base + j));
            }
        }
    }

    let mut pairs: Vec<(usize, usize)> = (1..fields.len())
        .flat_map(|i| (0..i).map(move |j| (i, j)))
        .collect();
    pairs.shuffle(&mut StdRng::seed_from_u64(43));
    pairs.truncate(FREAK_BYTES * 8);

    Pattern {
        fields,
        pairs,
        orientation_pairs,
    }
});

fn sample_fields(integral: &IntegralImage, center: Point2<f32>, scale: f32, angle: f32) -> Vec<f32> {
    let rotation = Rotation2::new(angle.to_radians());
    PATTERN
        .fields
        .iter()
        .map(|field| {
            let p = center + rotation * field.offset * scale;
            integral.mean(p.x, p.y, field.sigma * scale)
        })
        .collect()
}

fn orientation(intensities: &[f32]) -> f32 {
    let mut gradient = Vector2::<f32>::zeros();
    for &(i, j) in &PATTERN.orientation_pairs {
        let direction = PATTERN.fields[j].offset - PATTERN.fields[i].offset;
        gradient += direction * ((intensities[j] - intensities[i]) / direction.norm_squared());
    }
    normalize_degrees(gradient.y.atan2(gradient.x).to_degrees())
}

/// Describes every keypoint, together with the orientation estimated for it.
pub fn describe(image: &GrayImage, keypoints: &[Keypoint]) -> (DescriptorTable<u8>, Vec<f32>) {
    let integral = IntegralImage::new(image);
    let mut table = DescriptorTable::with_capacity(FREAK_BYTES, keypoints.len());
    let mut angles = Vec::with_capacity(keypoints.len());

    for keypoint in keypoints {
        let scale = (keypoint.size / SMALLEST_KEYPOINT_SIZE).max(1.0);
        let angle = orientation(&sample_fields(&integral, keypoint.position, scale, 0.0));

        let steered = sample_fields(&integral, keypoint.position, scale, angle);
        let bits = PATTERN.pairs.iter().map(|&(i, j)| steered[i] > steered[j]);
        table.push(&pack_bits(bits, FREAK_BYTES));
        angles.push(angle);
    }

    (table, angles)
}
