//! Benchmark harness for 2D keypoint detectors, descriptor extractors and
//! descriptor matchers over a camera image sequence.
//!
//! A [`Pipeline`] pulls frames from a [`FrameSource`], keeps the two most
//! recent ones in a [`DataBuffer`], and records detection and description
//! latency plus match counts in a [`Telemetry`] value.

pub mod algorithms;
pub mod config;
pub mod error;
pub mod features;
pub mod flann;
pub mod frame;
pub mod matching;
pub mod pipeline;
pub mod source;
pub mod telemetry;
pub mod visualize;

pub use config::{Args, Config, DescriptorKind, DetectorKind, MatcherKind, SelectorKind};
pub use error::{ConfigurationError, Error, Result};
pub use frame::{DataBuffer, DataFrame, DescriptorMatch, Descriptors, Keypoint};
pub use pipeline::{FrameReport, Pipeline};
pub use source::{FrameSource, ImageSequence};
pub use telemetry::{Summary, Telemetry};
pub use visualize::{Headless, SnapshotViewer, Visualizer};
