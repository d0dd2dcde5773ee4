use image::GrayImage;
use once_cell::sync::Lazy;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::{
    algorithms::sampling::{pack_bits, pixel_or_zero},
    frame::{DescriptorTable, Keypoint},
};

pub const BRIEF_BYTES: usize = 32;

/// Side length of the square patch the sample pairs are drawn from
const PATCH_SIZE: i32 = 48;

// using a kernel value of 2 indicated by reference:
// https://medium.com/data-breach/introduction-to-brief-binary-robust-independent-elementary-features-436f4a31a0e6
const GAUSSIAN_KERNEL_SIGMA: f32 = 2.0;

/// Compute BRIEF (Binary Robust Independent Elementary Features) for the
/// keypoint at `(x, y)` of an already smoothed grayscale image.
///
/// Bit `i` is set when the first point of pair `i` is darker than the second.
pub fn compute_descriptor(x: i32, y: i32, smoothed: &GrayImage) -> [u8; BRIEF_BYTES] {
    let bits = BRIEF256_SAMPLES.iter().map(|&[p1x, p1y, p2x, p2y]| {
        let first = pixel_or_zero(smoothed, x + p1x as i32, y + p1y as i32);
        let second = pixel_or_zero(smoothed, x + p2x as i32, y + p2y as i32);
        first < second
    });

    let mut descriptor = [0; BRIEF_BYTES];
    descriptor.copy_from_slice(&pack_bits(bits, BRIEF_BYTES));
    descriptor
}

/// applies BRIEF to every keypoint, one row per keypoint in input order.
pub fn describe(image: &GrayImage, keypoints: &[Keypoint]) -> DescriptorTable<u8> {
    // apply a guassian blur to the image for computing BRIEF descriptors,
    // that way the image is not overly sensitive to high frequency noise.
    let smoothed = imageproc::filter::gaussian_blur_f32(image, GAUSSIAN_KERNEL_SIGMA);

    let mut table = DescriptorTable::with_capacity(BRIEF_BYTES, keypoints.len());
    for keypoint in keypoints {
        let (x, y) = (keypoint.x().round() as i32, keypoint.y().round() as i32);
        table.push(&compute_descriptor(x, y, &smoothed));
    }
    table
}

/// Precomputed point pairs for the 256 BRIEF tests, drawn from an isotropic
/// Gaussian (sigma = S/5 for an S x S patch) and clamped to the patch.
/// The values remain consistent across frames so descriptors of the same
/// feature agree between images.
static BRIEF256_SAMPLES: Lazy<[[i16; 4]; BRIEF_BYTES * 8]> = Lazy::new(|| {
    // use reproducible random numbers
    let mut rng = StdRng::seed_from_u64(42);

    let sigma = PATCH_SIZE as f64 / 5.0;
    let normal_dist: Normal<f64> = Normal::new(0.0, sigma).expect("valid standard deviation");
    let half = (PATCH_SIZE / 2) as f64;

    let mut samples = [[0; 4]; BRIEF_BYTES * 8];
    for sample in samples.iter_mut() {
        for coordinate in sample.iter_mut() {
            *coordinate = normal_dist.sample(&mut rng).round().clamp(-half, half - 1.0) as i16;
        }
    }

    samples
});

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn textured(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            Luma([((x * 37 + y * 91 + (x * y) % 23) % 256) as u8])
        })
    }

    #[test]
    fn samples_stay_inside_patch() {
        let half = (PATCH_SIZE / 2) as i16;
        assert!(BRIEF256_SAMPLES
            .iter()
            .flatten()
            .all(|&c| (-half..half).contains(&c)));
        // not degenerate
        assert!(BRIEF256_SAMPLES.iter().any(|s| s[0] != s[2] || s[1] != s[3]));
    }

    #[test]
    fn one_row_per_keypoint_even_near_borders() {
        let image = textured(64, 64);
        let keypoints = vec![
            Keypoint::new(32.0, 32.0, 7.0),
            Keypoint::new(0.0, 0.0, 7.0),
            Keypoint::new(63.0, 10.0, 7.0),
        ];
        let table = describe(&image, &keypoints);
        assert_eq!(table.len(), keypoints.len());
        assert_eq!(table.width(), BRIEF_BYTES);
    }

    #[test]
    fn translated_patch_gives_identical_descriptor() {
        let image = textured(120, 120);
        let shifted = GrayImage::from_fn(120, 120, |x, y| {
            if x >= 5 && y >= 3 {
                *image.get_pixel(x - 5, y - 3)
            } else {
                Luma([0])
            }
        });

        let a = describe(&image, &[Keypoint::new(50.0, 50.0, 7.0)]);
        let b = describe(&shifted, &[Keypoint::new(55.0, 53.0, 7.0)]);
        assert_eq!(a.row(0), b.row(0));
    }

    #[test]
    fn flat_image_sets_no_bits() {
        let image = GrayImage::from_pixel(64, 64, Luma([120]));
        let table = describe(&image, &[Keypoint::new(32.0, 32.0, 7.0)]);
        assert!(table.row(0).iter().all(|&b| b == 0));
    }
}
