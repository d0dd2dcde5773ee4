//! Optional rendering of keypoints and matches.
//!
//! The pipeline talks to a [`Visualizer`]; [`Headless`] ignores every call,
//! [`SnapshotViewer`] renders PNG files and waits for the user before the
//! pipeline continues.

use std::{
    io::{self, BufRead},
    path::PathBuf,
};

use image::{imageops, DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing;
use log::info;

use crate::{
    error::{Error, Result},
    frame::{DataFrame, Keypoint},
};

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const BLUE: Rgb<u8> = Rgb([0, 128, 255]);

pub trait Visualizer {
    /// Draw keypoints as they come out of the detector.
    fn show_keypoints(
        &mut self,
        index: usize,
        title: &str,
        image: &GrayImage,
        keypoints: &[Keypoint],
    ) -> Result<()>;

    /// Draw the matches of `current` against `previous`, the previous image on the left.
    fn show_matches(
        &mut self,
        index: usize,
        title: &str,
        previous: &DataFrame,
        current: &DataFrame,
    ) -> Result<()>;
}

/// Draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl Visualizer for Headless {
    fn show_keypoints(&mut self, _: usize, _: &str, _: &GrayImage, _: &[Keypoint]) -> Result<()> {
        Ok(())
    }

    fn show_matches(&mut self, _: usize, _: &str, _: &DataFrame, _: &DataFrame) -> Result<()> {
        Ok(())
    }
}

/// Writes every visualization to a PNG file and, when `pause` is set,
/// blocks until a line is read from stdin.
#[derive(Debug, Clone)]
pub struct SnapshotViewer {
    directory: PathBuf,
    pause: bool,
}

impl SnapshotViewer {
    pub fn new(directory: impl Into<PathBuf>, pause: bool) -> Self {
        Self {
            directory: directory.into(),
            pause,
        }
    }

    fn present(&self, name: String, title: &str, image: &RgbImage) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.directory).map_err(|e| Error::Visualization(Box::new(e)))?;
        let path = self.directory.join(name);
        image
            .save(&path)
            .map_err(|e| Error::Visualization(Box::new(e)))?;
        info!("{} written to {}", title, path.display());

        if self.pause {
            println!("Press Enter to continue");
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| Error::Visualization(Box::new(e)))?;
        }
        Ok(path)
    }
}

impl Visualizer for SnapshotViewer {
    fn show_keypoints(
        &mut self,
        index: usize,
        title: &str,
        image: &GrayImage,
        keypoints: &[Keypoint],
    ) -> Result<()> {
        let mut canvas = to_rgb(image);
        draw_keypoints(&mut canvas, keypoints, (0, 0));
        self.present(format!("keypoints_{:04}.png", index), title, &canvas)?;
        Ok(())
    }

    fn show_matches(
        &mut self,
        index: usize,
        title: &str,
        previous: &DataFrame,
        current: &DataFrame,
    ) -> Result<()> {
        let canvas = render_matches(previous, current);
        self.present(format!("matches_{:04}.png", index), title, &canvas)?;
        Ok(())
    }
}

fn to_rgb(image: &GrayImage) -> RgbImage {
    DynamicImage::ImageLuma8(image.clone()).to_rgb8()
}

/// Circle of the keypoint size plus a tick towards its orientation
fn draw_keypoints(canvas: &mut RgbImage, keypoints: &[Keypoint], (dx, dy): (i32, i32)) {
    for keypoint in keypoints {
        let (x, y) = (keypoint.x() + dx as f32, keypoint.y() + dy as f32);
        let radius = (keypoint.size / 2.0).round().max(1.0);
        drawing::draw_hollow_circle_mut(canvas, (x as i32, y as i32), radius as i32, GREEN);

        if let Some(angle) = keypoint.angle {
            let (sin, cos) = angle.to_radians().sin_cos();
            drawing::draw_line_segment_mut(
                canvas,
                (x, y),
                (x + radius * cos, y + radius * sin),
                RED,
            );
        }
    }
}

/// Previous and current image side by side with a line per match.
pub fn render_matches(previous: &DataFrame, current: &DataFrame) -> RgbImage {
    let offset = previous.image.width();
    let width = offset + current.image.width();
    let height = previous.image.height().max(current.image.height());

    let mut canvas = RgbImage::new(width, height);
    imageops::replace(&mut canvas, &to_rgb(&previous.image), 0, 0);
    imageops::replace(&mut canvas, &to_rgb(&current.image), offset as i64, 0);
    draw_keypoints(&mut canvas, &previous.keypoints, (0, 0));
    draw_keypoints(&mut canvas, &current.keypoints, (offset as i32, 0));

    for m in &current.matches {
        let (Some(train), Some(query)) = (
            previous.keypoints.get(m.train_idx),
            current.keypoints.get(m.query_idx),
        ) else {
            continue;
        };
        drawing::draw_line_segment_mut(
            &mut canvas,
            (train.x(), train.y()),
            (query.x() + offset as f32, query.y()),
            BLUE,
        );
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DescriptorMatch;
    use image::Luma;

    fn frame(keypoints: Vec<Keypoint>) -> DataFrame {
        let mut frame = DataFrame::new(GrayImage::from_pixel(40, 30, Luma([0])));
        frame.keypoints = keypoints;
        frame
    }

    #[test]
    fn match_canvas_holds_both_images() {
        let previous = frame(vec![Keypoint::new(10.0, 10.0, 4.0)]);
        let mut current = frame(vec![Keypoint::new(12.0, 11.0, 4.0)]);
        current.matches.push(DescriptorMatch {
            query_idx: 0,
            train_idx: 0,
            distance: 3.0,
        });

        let canvas = render_matches(&previous, &current);
        assert_eq!(canvas.dimensions(), (80, 30));
        // the match line crosses the seam between the images
        assert!((0..30).any(|y| *canvas.get_pixel(40, y) == BLUE));
    }

    #[test]
    fn snapshots_are_written_without_pausing() {
        let dir = tempfile::tempdir().unwrap();
        let mut viewer = SnapshotViewer::new(dir.path(), false);
        let previous = frame(vec![Keypoint::new(5.0, 5.0, 6.0).with_angle(45.0)]);

        viewer
            .show_keypoints(3, "keypoints", &previous.image, &previous.keypoints)
            .unwrap();
        viewer.show_matches(4, "matches", &previous, &previous).unwrap();
        assert!(dir.path().join("keypoints_0003.png").is_file());
        assert!(dir.path().join("matches_0004.png").is_file());
    }

    #[test]
    fn headless_does_nothing() {
        let frame = frame(Vec::new());
        assert!(Headless.show_keypoints(0, "", &frame.image, &[]).is_ok());
        assert!(Headless.show_matches(0, "", &frame, &frame).is_ok());
    }
}
