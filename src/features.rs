//! Detector and descriptor dispatch, plus the keypoint filters applied
//! between detection and description.

use image::GrayImage;
use imageproc::rect::Rect;

use crate::{
    algorithms::{akaze, brief, brisk, corners, fast, freak, orb, sift},
    config::{DescriptorKind, DetectorKind},
    frame::{Descriptors, Keypoint},
};

/// Fixed region covering the preceding vehicle in the KITTI sequence
pub fn vehicle_region() -> Rect {
    Rect::at(535, 180).of_size(180, 150)
}

pub fn detect_keypoints(kind: DetectorKind, image: &GrayImage) -> Vec<Keypoint> {
    match kind {
        DetectorKind::ShiTomasi => corners::shi_tomasi(image, &Default::default()),
        DetectorKind::Harris => corners::harris(image, &Default::default()),
        DetectorKind::Fast => fast::detect(image),
        DetectorKind::Brisk => brisk::detect(image),
        DetectorKind::Orb => orb::detect(image, &Default::default()),
        DetectorKind::Akaze => akaze::detect(image),
        DetectorKind::Sift => sift::detect(image),
    }
}

/// One descriptor row per keypoint, in keypoint order.
///
/// BRISK and FREAK estimate their own orientation and store it in the keypoints.
pub fn describe_keypoints(
    kind: DescriptorKind,
    image: &GrayImage,
    keypoints: &mut [Keypoint],
) -> Descriptors {
    let store_angles = |keypoints: &mut [Keypoint], angles: Vec<f32>| {
        for (keypoint, angle) in keypoints.iter_mut().zip(angles) {
            keypoint.angle = Some(angle);
        }
    };

    match kind {
        DescriptorKind::Brief => Descriptors::Binary(brief::describe(image, keypoints)),
        DescriptorKind::Orb => Descriptors::Binary(orb::describe(image, keypoints)),
        DescriptorKind::Akaze => Descriptors::Binary(akaze::describe(image, keypoints)),
        DescriptorKind::Sift => Descriptors::Float(sift::describe(image, keypoints)),
        DescriptorKind::Brisk => {
            let (table, angles) = brisk::describe(image, keypoints);
            store_angles(keypoints, angles);
            Descriptors::Binary(table)
        }
        DescriptorKind::Freak => {
            let (table, angles) = freak::describe(image, keypoints);
            store_angles(keypoints, angles);
            Descriptors::Binary(table)
        }
    }
}

/// `true` when the keypoint lies in the half-open rectangle
pub fn contains(region: &Rect, keypoint: &Keypoint) -> bool {
    let (x, y) = (keypoint.x(), keypoint.y());
    x >= region.left() as f32
        && x < (region.left() + region.width() as i32) as f32
        && y >= region.top() as f32
        && y < (region.top() + region.height() as i32) as f32
}

/// Keep only the keypoints inside `region`, preserving their order.
pub fn focus_on_region(keypoints: &mut Vec<Keypoint>, region: &Rect) {
    keypoints.retain(|keypoint| contains(region, keypoint));
}

/// Cap the number of keypoints at `max`.
///
/// Shi-Tomasi corners arrive strongest first, so they are cut positionally
/// before the general response based selection.
pub fn limit_keypoints(keypoints: &mut Vec<Keypoint>, max: usize, detector: DetectorKind) {
    if detector == DetectorKind::ShiTomasi {
        keypoints.truncate(max);
    }
    keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));
    keypoints.truncate(max);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn keypoint(x: f32, y: f32, response: f32) -> Keypoint {
        Keypoint::new(x, y, 4.0).with_response(response)
    }

    #[test]
    fn region_filter_is_half_open() {
        let mut keypoints = vec![
            keypoint(535.0, 180.0, 1.0),
            keypoint(714.9, 329.9, 1.0),
            keypoint(715.0, 200.0, 1.0),
            keypoint(600.0, 330.0, 1.0),
            keypoint(534.9, 200.0, 1.0),
            keypoint(600.0, 250.0, 1.0),
        ];
        focus_on_region(&mut keypoints, &vehicle_region());
        let kept: Vec<_> = keypoints.iter().map(|kp| (kp.x(), kp.y())).collect();
        assert_eq!(kept, vec![(535.0, 180.0), (714.9, 329.9), (600.0, 250.0)]);
    }

    #[test]
    fn region_filter_keeps_a_subset_in_order() {
        let original: Vec<Keypoint> = (0..400)
            .map(|i| keypoint((i * 37 % 1200) as f32, (i * 13 % 370) as f32, i as f32))
            .collect();
        let mut filtered = original.clone();
        focus_on_region(&mut filtered, &vehicle_region());

        let mut remaining = original.iter();
        for kp in &filtered {
            assert!(contains(&vehicle_region(), kp));
            assert!(remaining.any(|o| o == kp));
        }
        let expected = original.iter().filter(|kp| contains(&vehicle_region(), kp)).count();
        assert_eq!(filtered.len(), expected);
    }

    #[test]
    fn limiter_yields_min_of_limit_and_count() {
        for (count, max) in [(0, 5), (3, 5), (10, 5), (10, 0), (7, 7)] {
            let mut keypoints: Vec<_> = (0..count).map(|i| keypoint(i as f32, 0.0, (i % 4) as f32)).collect();
            limit_keypoints(&mut keypoints, max, DetectorKind::Fast);
            assert_eq!(keypoints.len(), count.min(max));
        }
    }

    #[test]
    fn limiter_keeps_strongest_responses() {
        let mut keypoints = vec![
            keypoint(0.0, 0.0, 1.0),
            keypoint(1.0, 0.0, 5.0),
            keypoint(2.0, 0.0, 3.0),
            keypoint(3.0, 0.0, 5.0),
        ];
        limit_keypoints(&mut keypoints, 2, DetectorKind::Harris);
        // ties keep their order
        let xs: Vec<_> = keypoints.iter().map(|kp| kp.x()).collect();
        assert_eq!(xs, vec![1.0, 3.0]);
    }

    #[test]
    fn shi_tomasi_limit_is_a_prefix() {
        let original: Vec<_> = (0..20).map(|i| keypoint(i as f32, 0.0, 100.0 - i as f32)).collect();
        let mut limited = original.clone();
        limit_keypoints(&mut limited, 8, DetectorKind::ShiTomasi);
        assert_eq!(limited, original[..8]);
    }

    #[test]
    fn dispatch_produces_one_row_per_keypoint() {
        let image = GrayImage::from_fn(96, 96, |x, y| {
            let on = (x / 12 + y / 12) % 2 == 0;
            Luma([if on { 200 } else { 40 }])
        });
        let keypoints = detect_keypoints(DetectorKind::ShiTomasi, &image);
        assert!(!keypoints.is_empty());

        for kind in [
            DescriptorKind::Brief,
            DescriptorKind::Orb,
            DescriptorKind::Brisk,
            DescriptorKind::Freak,
            DescriptorKind::Sift,
        ] {
            let mut keypoints = keypoints.clone();
            let descriptors = describe_keypoints(kind, &image, &mut keypoints);
            assert_eq!(descriptors.len(), keypoints.len(), "{}", kind);
            // SIFT is the only L2 descriptor, the rest compare by Hamming distance
            assert_eq!(
                matches!(descriptors, Descriptors::Float(_)),
                kind == DescriptorKind::Sift
            );
        }
    }

    #[test]
    fn empty_keypoints_give_empty_descriptors() {
        let image = GrayImage::from_pixel(40, 40, Luma([10]));
        assert!(describe_keypoints(DescriptorKind::Brisk, &image, &mut []).is_empty());
        assert!(describe_keypoints(DescriptorKind::Sift, &image, &mut []).is_empty());
    }
}
