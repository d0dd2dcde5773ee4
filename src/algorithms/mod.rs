//! Collection of the keypoint detectors and descriptor extractors
//! the benchmark can be configured with, plus the image sampling
//! helpers they share.

pub mod akaze;
pub mod brief;
pub mod brisk;
pub mod corners;
pub mod fast;
pub mod freak;
pub mod orb;
pub mod sampling;
pub mod scale_space;
pub mod sift;
