//! Per-frame control flow: detect, filter, limit, describe, buffer, match.

use std::time::{Duration, Instant};

use image::GrayImage;
use log::{debug, info};

use crate::{
    config::Config,
    error::{ConfigurationError, Result},
    features::{self, vehicle_region},
    frame::{DataBuffer, DataFrame},
    matching,
    source::FrameSource,
    telemetry::{self, KeypointSizeHistogram, Telemetry},
    visualize::Visualizer,
};

/// What happened to a single frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub index: usize,
    pub keypoints: usize,
    pub detection_time: Duration,
    pub description_time: Duration,
    /// `None` for the first frame, which has nothing to match against
    pub matches: Option<usize>,
}

pub struct Pipeline<V> {
    config: Config,
    buffer: DataBuffer,
    telemetry: Telemetry,
    visualizer: V,
}

impl<V: Visualizer> Pipeline<V> {
    pub fn new(config: Config, visualizer: V) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            buffer: DataBuffer::new(config.buffer_size),
            config,
            telemetry: Telemetry::default(),
            visualizer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn buffer(&self) -> &DataBuffer {
        &self.buffer
    }

    /// Run every frame of `source` in order, stopping at the first error.
    pub fn run<S: FrameSource>(&mut self, source: &S) -> Result<Vec<FrameReport>> {
        (0..source.len())
            .map(|index| {
                let image = source.load(index)?;
                self.process_frame(index, image)
            })
            .collect()
    }

    pub fn process_frame(&mut self, index: usize, image: GrayImage) -> Result<FrameReport> {
        let detector = self.config.detector;
        let descriptor = self.config.descriptor;

        let mut frame = DataFrame::new(image);

        let start = Instant::now();
        let mut keypoints = features::detect_keypoints(detector, &frame.image);
        let detection_time = start.elapsed();
        info!(
            "{} detection with n={} keypoints in {:.3} ms",
            detector,
            keypoints.len(),
            detection_time.as_secs_f64() * 1000.0
        );

        if self.config.visualize_keypoints {
            self.visualizer.show_keypoints(
                index,
                &format!("{} keypoints", detector),
                &frame.image,
                &keypoints,
            )?;
        }

        if self.config.focus_on_vehicle {
            features::focus_on_region(&mut keypoints, &vehicle_region());
        }

        if let Some(max) = self.config.max_keypoints {
            if keypoints.len() > max {
                features::limit_keypoints(&mut keypoints, max, detector);
                info!("NOTE: keypoints have been limited to {}", max);
            }
        }

        let start = Instant::now();
        let descriptors = features::describe_keypoints(descriptor, &frame.image, &mut keypoints);
        let description_time = start.elapsed();
        info!(
            "{} descriptor extraction in {:.3} ms",
            descriptor,
            description_time.as_secs_f64() * 1000.0
        );

        match telemetry::size_range(&keypoints) {
            Some((min, max)) => info!(
                "{} found {} keypoints in image {} with min/max size = {:.2}/{:.2}",
                detector,
                keypoints.len(),
                index,
                min,
                max
            ),
            None => info!("{} found 0 keypoints in image {}", detector, index),
        }
        if self.config.keypoint_histogram {
            debug!(
                "keypoint sizes in image {}:\n{}",
                index,
                KeypointSizeHistogram::new(&keypoints).render()
            );
        }

        let keypoint_count = keypoints.len();
        frame.keypoints = keypoints;
        frame.descriptors = descriptors;
        self.telemetry.record_frame(detection_time, description_time);

        self.buffer.push(frame);

        let matches = match self.buffer.latest_pair_mut() {
            Some((previous, current)) => {
                current.matches = matching::match_descriptors(
                    &previous.descriptors,
                    &current.descriptors,
                    self.config.matcher,
                    self.config.selector,
                )?;
                let count = current.matches.len();
                info!("{} found {} matches in image {}", self.config.label(), count, index);
                self.telemetry.record_matches(count);

                if self.config.visualize_matches {
                    self.visualizer.show_matches(
                        index,
                        &format!("{} matches", self.config.label()),
                        previous,
                        current,
                    )?;
                }
                Some(count)
            }
            None => None,
        };

        Ok(FrameReport {
            index,
            keypoints: keypoint_count,
            detection_time,
            description_time,
            matches,
        })
    }
}
