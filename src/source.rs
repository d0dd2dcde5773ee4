//! Frame sources: a numbered image sequence on disk, or frames already in memory.

use std::path::{Path, PathBuf};

use image::GrayImage;

use crate::error::{Error, Result};

/// Anything the pipeline can pull grayscale frames from, in order.
pub trait FrameSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load the frame at `position` (0-based, relative to the first frame).
    fn load(&self, position: usize) -> Result<GrayImage>;
}

/// Images named `<prefix><zero padded index><suffix>` under a base directory,
/// for an inclusive index range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSequence {
    pub base_dir: PathBuf,
    pub prefix: String,
    pub suffix: String,
    pub start: u32,
    pub end: u32,
    pub fill_width: usize,
}

impl ImageSequence {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        start: u32,
        end: u32,
        fill_width: usize,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
            start,
            end,
            fill_width,
        }
    }

    pub fn path_for(&self, index: u32) -> PathBuf {
        self.base_dir.join(format!(
            "{}{:0width$}{}",
            self.prefix,
            index,
            self.suffix,
            width = self.fill_width
        ))
    }

    /// Every file of the sequence in ascending index order
    pub fn paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        (self.start..=self.end).map(|index| self.path_for(index))
    }
}

impl FrameSource for ImageSequence {
    fn len(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    fn load(&self, position: usize) -> Result<GrayImage> {
        if position >= self.len() {
            return Err(Error::FrameOutOfRange(position));
        }
        load_grayscale(&self.path_for(self.start + position as u32))
    }
}

impl FrameSource for Vec<GrayImage> {
    fn len(&self) -> usize {
        <[GrayImage]>::len(self)
    }

    fn load(&self, position: usize) -> Result<GrayImage> {
        self.get(position)
            .cloned()
            .ok_or(Error::FrameOutOfRange(position))
    }
}

/// Decode an image file and drop its color information.
pub fn load_grayscale(path: &Path) -> Result<GrayImage> {
    if !path.is_file() {
        return Err(Error::MissingImage {
            path: path.to_path_buf(),
        });
    }

    let image = image::open(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(image.to_luma8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    #[test]
    fn builds_zero_padded_paths() {
        let sequence = ImageSequence::new("/data", "images/000000", ".png", 0, 9, 4);
        assert_eq!(
            sequence.path_for(7),
            PathBuf::from("/data/images/0000000007.png")
        );
    }

    #[test]
    fn yields_one_path_per_index_in_order() {
        for (start, end) in [(0, 0), (0, 9), (3, 17), (95, 105)] {
            let sequence = ImageSequence::new("base", "img-", ".jpg", start, end, 3);
            let paths: Vec<_> = sequence.paths().collect();
            assert_eq!(paths.len(), (end - start + 1) as usize);
            assert_eq!(sequence.len(), paths.len());

            let expected: Vec<_> = (start..=end)
                .map(|i| PathBuf::from(format!("base/img-{:03}.jpg", i)))
                .collect();
            assert_eq!(paths, expected);
        }
    }

    #[test]
    fn missing_image_fails_fast_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let sequence = ImageSequence::new(dir.path(), "frame", ".png", 0, 1, 2);
        match sequence.load(0) {
            Err(Error::MissingImage { path }) => assert_eq!(path, dir.path().join("frame00.png")),
            other => panic!("expected a missing image error, got {:?}", other),
        }
    }

    #[test]
    fn undecodable_image_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame00.png");
        std::fs::write(&path, b"not a png").unwrap();

        let sequence = ImageSequence::new(dir.path(), "frame", ".png", 0, 0, 2);
        assert!(matches!(sequence.load(0), Err(Error::Image { .. })));
    }

    #[test]
    fn loads_color_images_as_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let mut color = RgbImage::new(4, 3);
        color.put_pixel(1, 1, Rgb([255, 255, 255]));
        color.save(dir.path().join("frame05.png")).unwrap();

        let sequence = ImageSequence::new(dir.path(), "frame", ".png", 5, 5, 2);
        let gray = sequence.load(0).unwrap();
        assert_eq!(gray.dimensions(), (4, 3));
        assert_eq!(*gray.get_pixel(1, 1), Luma([255]));
        assert_eq!(*gray.get_pixel(0, 0), Luma([0]));
        assert!(matches!(sequence.load(1), Err(Error::FrameOutOfRange(1))));
    }
}
