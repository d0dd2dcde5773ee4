//! Command line options and the validated run configuration.

use std::{fmt, path::PathBuf};

use clap::{builder::BoolishValueParser, ArgAction, Parser, ValueEnum};

use crate::{error::ConfigurationError, source::ImageSequence};

/// Keypoint detection algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum DetectorKind {
    #[value(name = "SHITOMASI")]
    ShiTomasi,
    #[value(name = "HARRIS")]
    Harris,
    #[value(name = "FAST")]
    Fast,
    #[value(name = "BRISK")]
    Brisk,
    #[value(name = "ORB")]
    Orb,
    #[value(name = "AKAZE")]
    Akaze,
    #[value(name = "SIFT")]
    Sift,
}

/// Descriptor extraction algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum DescriptorKind {
    #[value(name = "BRISK")]
    Brisk,
    #[value(name = "BRIEF")]
    Brief,
    #[value(name = "ORB")]
    Orb,
    #[value(name = "FREAK")]
    Freak,
    #[value(name = "AKAZE")]
    Akaze,
    #[value(name = "SIFT")]
    Sift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum MatcherKind {
    /// exhaustive search over every descriptor pair
    #[value(name = "MAT_BF")]
    BruteForce,
    /// approximate search through a kd-forest or LSH index
    #[value(name = "MAT_FLANN")]
    Flann,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum SelectorKind {
    /// keep the single closest candidate
    #[value(name = "SEL_NN")]
    NearestNeighbor,
    /// keep the closest of two candidates if it passes Lowe's ratio test
    #[value(name = "SEL_KNN")]
    KNearestNeighbor,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShiTomasi => "SHITOMASI",
            Self::Harris => "HARRIS",
            Self::Fast => "FAST",
            Self::Brisk => "BRISK",
            Self::Orb => "ORB",
            Self::Akaze => "AKAZE",
            Self::Sift => "SIFT",
        }
    }
}

impl DescriptorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brisk => "BRISK",
            Self::Brief => "BRIEF",
            Self::Orb => "ORB",
            Self::Freak => "FREAK",
            Self::Akaze => "AKAZE",
            Self::Sift => "SIFT",
        }
    }

    /// The only detector this descriptor can be paired with, if it is restricted.
    /// AKAZE descriptors index into the nonlinear scale space built by the AKAZE detector.
    pub fn required_detector(&self) -> Option<DetectorKind> {
        match self {
            Self::Akaze => Some(DetectorKind::Akaze),
            _ => None,
        }
    }
}

impl MatcherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BruteForce => "MAT_BF",
            Self::Flann => "MAT_FLANN",
        }
    }
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NearestNeighbor => "SEL_NN",
            Self::KNearestNeighbor => "SEL_KNN",
        }
    }
}

macro_rules! display_as_str {
    ($($kind:ty),*) => {
        $(impl fmt::Display for $kind {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(DetectorKind, DescriptorKind, MatcherKind, SelectorKind);

pub const DEFAULT_SUMMARY_PATH: &str = "/tmp/2dfeature.csv";
pub const DEFAULT_IMAGE_PREFIX: &str = "images/KITTI/2011_09_26/image_00/data/000000";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Benchmark 2D keypoint detectors, descriptors and matchers over a camera image sequence"
)]
pub struct Args {
    #[arg(long, value_enum, ignore_case = true, default_value_t = DetectorKind::ShiTomasi)]
    pub detector_type: DetectorKind,
    /// Only keep keypoints on the preceding vehicle.
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub focus_on_vehicle: bool,
    /// Max number of keypoints to process. -1 sets no limit.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub max_keypoints: i64,
    #[arg(long, value_enum, ignore_case = true, default_value_t = DescriptorKind::Brisk)]
    pub descriptor_type: DescriptorKind,
    #[arg(long, value_enum, ignore_case = true, default_value_t = MatcherKind::BruteForce)]
    pub matcher_type: MatcherKind,
    #[arg(long, value_enum, ignore_case = true, default_value_t = SelectorKind::NearestNeighbor)]
    pub selector_type: SelectorKind,
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub visualize_keypoints: bool,
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub visualize_matches: bool,
    /// Log a histogram of keypoint sizes for every image.
    #[arg(long, default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub keypoint_histogram: bool,

    /// Root directory of the dataset.
    #[arg(long, default_value = ".")]
    pub data_path: PathBuf,
    /// Image path prefix relative to the data path, up to the frame index.
    #[arg(long, default_value = DEFAULT_IMAGE_PREFIX)]
    pub img_prefix: String,
    #[arg(long, default_value = ".png")]
    pub img_suffix: String,
    /// First frame index to load.
    #[arg(long, default_value_t = 0)]
    pub start_index: u32,
    /// Last frame index to load (inclusive).
    #[arg(long, default_value_t = 9)]
    pub end_index: u32,
    /// Number of digits the frame index is zero-padded to.
    #[arg(long, default_value_t = 4)]
    pub fill_width: usize,
    /// Number of frames held in memory at the same time.
    #[arg(long, default_value_t = 2)]
    pub buffer_size: usize,
    /// File the per-run summary line is appended to.
    #[arg(long, default_value = DEFAULT_SUMMARY_PATH)]
    pub summary_path: PathBuf,
    /// Directory rendered visualizations are written to.
    #[arg(long, default_value = "snapshots")]
    pub snapshot_dir: PathBuf,
}

/// Resolved and validated run configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub detector: DetectorKind,
    pub descriptor: DescriptorKind,
    pub matcher: MatcherKind,
    pub selector: SelectorKind,
    pub focus_on_vehicle: bool,
    /// `None` keeps every keypoint
    pub max_keypoints: Option<usize>,
    pub visualize_keypoints: bool,
    pub visualize_matches: bool,
    pub keypoint_histogram: bool,
    pub buffer_size: usize,
    pub sequence: ImageSequence,
    pub summary_path: PathBuf,
    pub snapshot_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detector: DetectorKind::ShiTomasi,
            descriptor: DescriptorKind::Brisk,
            matcher: MatcherKind::BruteForce,
            selector: SelectorKind::NearestNeighbor,
            focus_on_vehicle: true,
            max_keypoints: None,
            visualize_keypoints: false,
            visualize_matches: false,
            keypoint_histogram: false,
            buffer_size: 2,
            sequence: ImageSequence::new(".", DEFAULT_IMAGE_PREFIX, ".png", 0, 9, 4),
            summary_path: PathBuf::from(DEFAULT_SUMMARY_PATH),
            snapshot_dir: PathBuf::from("snapshots"),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(required) = self.descriptor.required_detector() {
            if required != self.detector {
                return Err(ConfigurationError::IncompatibleDescriptor {
                    descriptor: self.descriptor,
                    detector: self.detector,
                    required,
                });
            }
        }

        if self.sequence.start > self.sequence.end {
            return Err(ConfigurationError::EmptyRange {
                start: self.sequence.start,
                end: self.sequence.end,
            });
        }

        if self.buffer_size < 2 {
            return Err(ConfigurationError::BufferTooSmall(self.buffer_size));
        }

        Ok(())
    }

    /// `detector/descriptor`, the first column of the summary line
    pub fn label(&self) -> String {
        format!("{}/{}", self.detector, self.descriptor)
    }

    pub fn visualization_enabled(&self) -> bool {
        self.visualize_keypoints || self.visualize_matches
    }
}

impl TryFrom<Args> for Config {
    type Error = ConfigurationError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let config = Config {
            detector: args.detector_type,
            descriptor: args.descriptor_type,
            matcher: args.matcher_type,
            selector: args.selector_type,
            focus_on_vehicle: args.focus_on_vehicle,
            max_keypoints: usize::try_from(args.max_keypoints).ok(),
            visualize_keypoints: args.visualize_keypoints,
            visualize_matches: args.visualize_matches,
            keypoint_histogram: args.keypoint_histogram,
            buffer_size: args.buffer_size,
            sequence: ImageSequence::new(
                args.data_path,
                args.img_prefix,
                args.img_suffix,
                args.start_index,
                args.end_index,
                args.fill_width,
            ),
            summary_path: args.summary_path,
            snapshot_dir: args.snapshot_dir,
        };
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Detector: {}", self.detector)?;
        writeln!(f, "Descriptor: {}", self.descriptor)?;
        writeln!(f, "Matcher: {}", self.matcher)?;
        write!(f, "Selector: {}", self.selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ConfigurationError> {
        let args = Args::try_parse_from(std::iter::once("featurebench").chain(args.iter().copied()))
            .expect("arguments should parse");
        Config::try_from(args)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.detector, DetectorKind::ShiTomasi);
        assert_eq!(config.descriptor, DescriptorKind::Brisk);
        assert_eq!(config.matcher, MatcherKind::BruteForce);
        assert_eq!(config.selector, SelectorKind::NearestNeighbor);
        assert!(config.focus_on_vehicle);
        assert_eq!(config.max_keypoints, None);
        assert!(!config.visualization_enabled());
        assert_eq!(config.buffer_size, 2);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn parses_explicit_values() {
        let config = parse(&[
            "--detector-type",
            "FAST",
            "--descriptor-type",
            "ORB",
            "--matcher-type",
            "MAT_FLANN",
            "--selector-type",
            "SEL_KNN",
            "--focus-on-vehicle",
            "false",
            "--max-keypoints",
            "50",
        ])
        .unwrap();
        assert_eq!(config.detector, DetectorKind::Fast);
        assert_eq!(config.descriptor, DescriptorKind::Orb);
        assert_eq!(config.matcher, MatcherKind::Flann);
        assert_eq!(config.selector, SelectorKind::KNearestNeighbor);
        assert!(!config.focus_on_vehicle);
        assert_eq!(config.max_keypoints, Some(50));
        assert_eq!(config.label(), "FAST/ORB");
    }

    #[test]
    fn negative_max_keypoints_means_unlimited() {
        let config = parse(&["--max-keypoints", "-1"]).unwrap();
        assert_eq!(config.max_keypoints, None);
    }

    #[test]
    fn akaze_descriptor_requires_akaze_detector() {
        let detectors = [
            DetectorKind::ShiTomasi,
            DetectorKind::Harris,
            DetectorKind::Fast,
            DetectorKind::Brisk,
            DetectorKind::Orb,
            DetectorKind::Sift,
        ];
        for detector in detectors {
            let config = Config {
                detector,
                descriptor: DescriptorKind::Akaze,
                ..Config::default()
            };
            assert_eq!(
                config.validate(),
                Err(ConfigurationError::IncompatibleDescriptor {
                    descriptor: DescriptorKind::Akaze,
                    detector,
                    required: DetectorKind::Akaze,
                })
            );
        }

        let config = Config {
            detector: DetectorKind::Akaze,
            descriptor: DescriptorKind::Akaze,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn every_other_pairing_is_valid() {
        for detector in DetectorKind::value_variants() {
            for descriptor in DescriptorKind::value_variants() {
                if *descriptor == DescriptorKind::Akaze {
                    continue;
                }
                let config = Config {
                    detector: *detector,
                    descriptor: *descriptor,
                    ..Config::default()
                };
                assert!(config.validate().is_ok(), "{}", config.label());
            }
        }
    }

    #[test]
    fn rejects_inverted_range_and_tiny_buffer() {
        assert_eq!(
            parse(&["--start-index", "5", "--end-index", "2"]),
            Err(ConfigurationError::EmptyRange { start: 5, end: 2 })
        );
        assert_eq!(
            parse(&["--buffer-size", "1"]),
            Err(ConfigurationError::BufferTooSmall(1))
        );
    }

    #[test]
    fn help_is_reported_as_an_error() {
        let err = Args::try_parse_from(["featurebench", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn prints_resolved_configuration() {
        let printed = Config::default().to_string();
        assert_eq!(
            printed,
            "Detector: SHITOMASI\nDescriptor: BRISK\nMatcher: MAT_BF\nSelector: SEL_NN"
        );
    }
}
