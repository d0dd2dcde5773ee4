//! Timing and match statistics for one benchmark run.

use std::{
    fmt::Write as _,
    fs::OpenOptions,
    io::Write as _,
    path::Path,
    time::Duration,
};

use crate::{
    error::{Error, Result},
    frame::Keypoint,
};

/// Accumulates per-frame measurements.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Telemetry {
    frames: usize,
    detection: Duration,
    description: Duration,
    matches: usize,
}

impl Telemetry {
    pub fn record_frame(&mut self, detection: Duration, description: Duration) {
        self.frames += 1;
        self.detection += detection;
        self.description += description;
    }

    pub fn record_matches(&mut self, count: usize) {
        self.matches += count;
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn total_matches(&self) -> usize {
        self.matches
    }

    /// Averages over the processed frames, `None` before the first frame.
    ///
    /// Matching starts with the second frame, so the average match count is
    /// taken over `frames - 1` pairs and is unavailable for a single frame.
    pub fn summary(&self) -> Option<Summary> {
        if self.frames == 0 {
            return None;
        }
        let frames = self.frames as f64;
        Some(Summary {
            avg_detection_ms: self.detection.as_secs_f64() * 1000.0 / frames,
            avg_description_ms: self.description.as_secs_f64() * 1000.0 / frames,
            avg_matches: (self.frames > 1).then(|| self.matches as f64 / (frames - 1.0)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub avg_detection_ms: f64,
    pub avg_description_ms: f64,
    pub avg_matches: Option<f64>,
}

impl Summary {
    /// `label,avgDetectionMs,avgDescriptionMs,avgMatches`
    pub fn csv_line(&self, label: &str) -> String {
        let matches = match self.avg_matches {
            Some(avg) => format!("{:.2}", avg),
            None => "n/a".to_string(),
        };
        format!(
            "{},{:.3},{:.3},{}",
            label, self.avg_detection_ms, self.avg_description_ms, matches
        )
    }

    /// Append the summary line to `path`, creating the file if needed.
    pub fn append_to(&self, path: &Path, label: &str) -> Result<()> {
        let to_error = |source| Error::Summary {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(to_error)?;
        writeln!(file, "{}", self.csv_line(label)).map_err(to_error)
    }
}

/// Log scale histogram of keypoint sizes over `[1, 50)`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeypointSizeHistogram {
    edges: Vec<f32>,
    counts: Vec<usize>,
    /// keypoints smaller than the first edge or not smaller than the last
    outside: usize,
}

impl KeypointSizeHistogram {
    pub const BINS: usize = 10;
    const LOWER: f32 = 1.0;
    const UPPER: f32 = 50.0;

    pub fn new(keypoints: &[Keypoint]) -> Self {
        let ratio = (Self::UPPER / Self::LOWER).powf(1.0 / Self::BINS as f32);
        let edges: Vec<f32> = (0..=Self::BINS)
            .map(|i| Self::LOWER * ratio.powi(i as i32))
            .collect();

        let mut counts = vec![0; Self::BINS];
        let mut outside = 0;
        for keypoint in keypoints {
            // edges are ascending, the bin is the last edge not above the size
            match edges[..Self::BINS]
                .iter()
                .rposition(|&edge| edge <= keypoint.size)
            {
                Some(bin) if keypoint.size < Self::UPPER => counts[bin] += 1,
                _ => outside += 1,
            }
        }

        Self {
            edges,
            counts,
            outside,
        }
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn outside(&self) -> usize {
        self.outside
    }

    /// One `[low, high): count` line per bin
    pub fn render(&self) -> String {
        let mut text = String::new();
        for (i, count) in self.counts.iter().enumerate() {
            let _ = writeln!(
                text,
                "[{:6.2}, {:6.2}): {}",
                self.edges[i],
                self.edges[i + 1],
                count
            );
        }
        let _ = write!(text, "outside: {}", self.outside);
        text
    }
}

/// Smallest and largest keypoint size
pub fn size_range(keypoints: &[Keypoint]) -> Option<(f32, f32)> {
    keypoints.iter().map(|kp| kp.size).fold(None, |range, size| match range {
        None => Some((size, size)),
        Some((min, max)) => Some((min.min(size), max.max(size))),
    })
}
