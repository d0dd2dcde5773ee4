use std::path::PathBuf;

use thiserror::Error;

use crate::config::{DescriptorKind, DetectorKind};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Invalid or incompatible command line options. Always fatal, raised before
/// the first frame is loaded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("{descriptor} descriptor can be used only with {required} detector (got {detector})")]
    IncompatibleDescriptor {
        descriptor: DescriptorKind,
        detector: DetectorKind,
        required: DetectorKind,
    },
    #[error("image index range is empty: start {start} > end {end}")]
    EmptyRange { start: u32, end: u32 },
    #[error("ring buffer must hold at least 2 frames, got {0}")]
    BufferTooSmall(usize),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("image file {} does not exist", path.display())]
    MissingImage { path: PathBuf },
    #[error("failed to read image {}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame {0} is out of range for this source")]
    FrameOutOfRange(usize),
    #[error("cannot match {current} descriptors against {previous} descriptors")]
    DescriptorMismatch {
        previous: &'static str,
        current: &'static str,
    },
    #[error("failed to append summary to {}", path.display())]
    Summary {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("visualization failed")]
    Visualization(#[source] Box<dyn std::error::Error + Send + Sync>),
}
