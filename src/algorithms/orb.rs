//! ORB: oriented FAST keypoints ranked by Harris response over an image
//! pyramid, described with steered BRIEF.

use image::{imageops::FilterType, GrayImage};
use imageproc::{corners::Corner, gradients};
use nalgebra::{Rotation2, Vector2};
use once_cell::sync::Lazy;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    algorithms::{
        fast::fast_corners,
        sampling::{intensity_centroid_angle, pack_bits, pixel_or_zero},
    },
    frame::{DescriptorTable, Keypoint},
};

pub const ORB_BYTES: usize = 32;

pub struct OrbParams {
    pub n_features: usize,
    pub scale_factor: f32,
    pub n_levels: usize,
    /// border in which no keypoint is kept, at least the patch radius
    pub edge_threshold: u32,
    pub fast_threshold: u8,
    pub patch_size: u32,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            n_features: 500,
            scale_factor: 1.2,
            n_levels: 8,
            edge_threshold: 31,
            fast_threshold: 20,
            patch_size: 31,
        }
    }
}

impl OrbParams {
    /// How many features each pyramid level contributes, shrinking
    /// geometrically with the level area.
    pub fn features_per_level(&self) -> Vec<usize> {
        let factor = 1.0 / self.scale_factor;
        let mut desired =
            self.n_features as f32 * (1.0 - factor) / (1.0 - factor.powi(self.n_levels as i32));

        let mut counts = Vec::with_capacity(self.n_levels);
        let mut total = 0;
        for _ in 0..self.n_levels.saturating_sub(1) {
            let count = desired.round() as usize;
            counts.push(count);
            total += count;
            desired *= factor;
        }
        counts.push(self.n_features.saturating_sub(total));
        counts
    }
}

/// Harris response of a `block x block` window of Sobel gradients.
fn harris_at(
    gx: &image::ImageBuffer<image::Luma<i16>, Vec<i16>>,
    gy: &image::ImageBuffer<image::Luma<i16>, Vec<i16>>,
    x: u32,
    y: u32,
    block: u32,
) -> f32 {
    const HARRIS_K: f32 = 0.04;
    let half = block / 2;
    let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
    for py in y - half..=y + half {
        for px in x - half..=x + half {
            let dx = gx.get_pixel(px, py).0[0] as f32;
            let dy = gy.get_pixel(px, py).0[0] as f32;
            a += dx * dx;
            b += dx * dy;
            c += dy * dy;
        }
    }
    a * c - b * b - HARRIS_K * (a + c) * (a + c)
}

pub fn detect(image: &GrayImage, params: &OrbParams) -> Vec<Keypoint> {
    let mut keypoints = Vec::new();
    let (width, height) = image.dimensions();

    for (level, wanted) in params.features_per_level().into_iter().enumerate() {
        let scale = params.scale_factor.powi(level as i32);
        let level_width = (width as f32 / scale).round() as u32;
        let level_height = (height as f32 / scale).round() as u32;
        if level_width <= 2 * params.edge_threshold || level_height <= 2 * params.edge_threshold {
            break;
        }

        let level_image = if level == 0 {
            image.clone()
        } else {
            image::imageops::resize(image, level_width, level_height, FilterType::Triangle)
        };

        let border = params.edge_threshold;
        let corners: Vec<Corner> = fast_corners(&level_image, params.fast_threshold)
            .into_iter()
            .filter(|c| {
                c.x >= border
                    && c.y >= border
                    && c.x < level_width - border
                    && c.y < level_height - border
            })
            .collect();

        let gx = gradients::horizontal_sobel(&level_image);
        let gy = gradients::vertical_sobel(&level_image);
        let mut ranked: Vec<(Corner, f32)> = corners
            .into_iter()
            .map(|c| (c, harris_at(&gx, &gy, c.x, c.y, 7)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(wanted);

        let radius = (params.patch_size / 2) as i32;
        keypoints.extend(ranked.into_iter().map(|(corner, response)| {
            let angle = intensity_centroid_angle(&level_image, corner.x as f32, corner.y as f32, radius);
            Keypoint::new(
                corner.x as f32 * scale,
                corner.y as f32 * scale,
                params.patch_size as f32 * scale,
            )
            .with_response(response)
            .with_angle(angle)
            .with_octave(level as u32)
        }));
    }

    keypoints
}

/// 256 steered BRIEF point pairs drawn uniformly from the 31x31 patch,
/// within radius 13 of the center so rotated points stay inside it.
static ORB_PATTERN: Lazy<Vec<[Vector2<f32>; 2]>> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(0x0b);
    (0..ORB_BYTES * 8)
        .map(|_| {
            let mut point = || Vector2::new(rng.gen_range(-13..=13) as f32, rng.gen_range(-13..=13) as f32);
            [point(), point()]
        })
        .collect()
});

/// Steered BRIEF around `(x, y)`, the pattern rotated by `angle` degrees and
/// stretched by `scale`.
fn steered_descriptor(smoothed: &GrayImage, x: f32, y: f32, angle: f32, scale: f32) -> Vec<u8> {
    let rotation = Rotation2::new(angle.to_radians());
    let sample = |offset: &Vector2<f32>| {
        let p = rotation * offset * scale;
        pixel_or_zero(smoothed, (x + p.x).round() as i32, (y + p.y).round() as i32)
    };

    let bits = ORB_PATTERN
        .iter()
        .map(|[first, second]| sample(first) < sample(second));
    pack_bits(bits, ORB_BYTES)
}

pub fn describe(image: &GrayImage, keypoints: &[Keypoint]) -> DescriptorTable<u8> {
    let smoothed = imageproc::filter::gaussian_blur_f32(image, 2.0);

    let mut table = DescriptorTable::with_capacity(ORB_BYTES, keypoints.len());
    for keypoint in keypoints {
        let scale = (keypoint.size / 31.0).max(1.0);
        let angle = keypoint.angle.unwrap_or_else(|| {
            intensity_centroid_angle(image, keypoint.x(), keypoint.y(), (15.0 * scale) as i32)
        });
        table.push(&steered_descriptor(
            &smoothed,
            keypoint.x(),
            keypoint.y(),
            angle,
            scale,
        ));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blobs(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let cell = ((x / 16) * 7 + (y / 16) * 13) % 5;
            Luma([40 + cell as u8 * 45])
        })
    }

    #[test]
    fn level_budget_sums_to_total() {
        let params = OrbParams::default();
        let counts = params.features_per_level();
        assert_eq!(counts.len(), 8);
        assert_eq!(counts.iter().sum::<usize>(), 500);
        assert!(counts[0] > counts[1]);
    }

    /// bright 3x3 dots on a dark background
    fn dots(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let on = x % 12 < 3 && y % 12 < 3;
            Luma([if on { 230 } else { 25 }])
        })
    }

    #[test]
    fn keypoints_are_oriented_and_scaled() {
        let image = dots(240, 200);
        let params = OrbParams::default();
        let keypoints = detect(&image, &params);

        assert!(!keypoints.is_empty());
        assert!(keypoints.len() <= params.n_features);
        for kp in &keypoints {
            let angle = kp.angle.expect("ORB keypoints carry an orientation");
            assert!((0.0..360.0).contains(&angle));
            let scale = params.scale_factor.powi(kp.octave as i32);
            assert!((kp.size - 31.0 * scale).abs() < 1e-3);
            assert!(kp.x() >= 31.0 * scale - 1.0 && kp.x() < 240.0);
        }
    }

    #[test]
    fn descriptor_is_rotation_aware() {
        let image = blobs(200, 200);
        let keypoint = Keypoint::new(100.0, 100.0, 31.0);
        let upright = describe(&image, &[keypoint.with_angle(0.0)]);
        let turned = describe(&image, &[keypoint.with_angle(90.0)]);
        assert_eq!(upright.len(), 1);
        assert_eq!(upright.width(), ORB_BYTES);
        assert_ne!(upright.row(0), turned.row(0));
    }
}
