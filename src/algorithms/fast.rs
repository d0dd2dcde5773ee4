//! FAST-9 corners with non-maximum suppression on top of `imageproc`.

use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};

use crate::frame::Keypoint;

pub const FAST_THRESHOLD: u8 = 30;

/// Diameter OpenCV assigns to FAST keypoints (the Bresenham circle of radius 3)
pub const FAST_KEYPOINT_SIZE: f32 = 7.0;

/// FAST-9 corners whose score is not exceeded by any 8-neighbor corner.
pub fn fast_corners(image: &GrayImage, threshold: u8) -> Vec<Corner> {
    let corners = corners_fast9(image, threshold);
    suppress_non_maxima(corners, image.width(), image.height())
}

/// Keep the corners no adjacent corner beats, in their original order.
pub fn suppress_non_maxima(corners: Vec<Corner>, width: u32, height: u32) -> Vec<Corner> {
    let (width, height) = (width as usize, height as usize);
    let mut scores = vec![0.0f32; width * height];
    for corner in &corners {
        scores[corner.y as usize * width + corner.x as usize] = corner.score;
    }

    corners
        .into_iter()
        .filter(|corner| {
            let (x, y) = (corner.x as usize, corner.y as usize);
            (y.saturating_sub(1)..=(y + 1).min(height - 1)).all(|ny| {
                (x.saturating_sub(1)..=(x + 1).min(width - 1))
                    .all(|nx| scores[ny * width + nx] <= corner.score)
            })
        })
        .collect()
}

pub fn detect(image: &GrayImage) -> Vec<Keypoint> {
    fast_corners(image, FAST_THRESHOLD)
        .into_iter()
        .map(|Corner { x, y, score }| {
            Keypoint::new(x as f32, y as f32, FAST_KEYPOINT_SIZE).with_response(score)
        })
        .collect()
}
