use std::collections::VecDeque;

use image::GrayImage;
use nalgebra::Point2;

/// A distinctive image location, following the OpenCV keypoint conventions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// +x faces right, +y faces down, origin at the top left pixel
    pub position: Point2<f32>,
    /// Diameter of the meaningful neighborhood in pixels
    pub size: f32,
    /// Orientation in degrees, `None` for detectors without orientation
    pub angle: Option<f32>,
    /// Detector strength, larger is better
    pub response: f32,
    /// Scale space level the keypoint was found in
    pub octave: u32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, size: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            size,
            angle: None,
            response: 0.0,
            octave: 0,
        }
    }

    pub fn with_response(mut self, response: f32) -> Self {
        self.response = response;
        self
    }

    pub fn with_angle(mut self, angle: f32) -> Self {
        self.angle = Some(angle);
        self
    }

    pub fn with_octave(mut self, octave: u32) -> Self {
        self.octave = octave;
        self
    }

    pub fn x(&self) -> f32 {
        self.position.x
    }

    pub fn y(&self) -> f32 {
        self.position.y
    }
}

/// Row-major table with one fixed-width descriptor per row.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorTable<T> {
    width: usize,
    data: Vec<T>,
}

impl<T: Copy> DescriptorTable<T> {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            data: Vec::new(),
        }
    }

    pub fn with_capacity(width: usize, rows: usize) -> Self {
        Self {
            width,
            data: Vec::with_capacity(width * rows),
        }
    }

    /// ### Panics
    /// when `row` does not have exactly `width` elements
    pub fn push(&mut self, row: &[T]) {
        assert_eq!(row.len(), self.width, "descriptor row has the wrong width");
        self.data.extend_from_slice(row);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, index: usize) -> &[T] {
        &self.data[index * self.width..(index + 1) * self.width]
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[T]> + Clone + '_ {
        // `chunks_exact` panics on a zero chunk size
        self.data.chunks_exact(self.width.max(1))
    }
}

/// Descriptors of one frame, either bit strings or floating point vectors.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptors {
    Binary(DescriptorTable<u8>),
    Float(DescriptorTable<f32>),
}

impl Descriptors {
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(table) => table.len(),
            Self::Float(table) => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Binary(_) => "binary",
            Self::Float(_) => "floating point",
        }
    }
}

impl Default for Descriptors {
    fn default() -> Self {
        Self::Binary(DescriptorTable::new(0))
    }
}

/// Correspondence between a keypoint in the current frame (query)
/// and a keypoint in the previous frame (train).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

/// Everything the pipeline knows about one camera image
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub image: GrayImage,
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Descriptors,
    /// matches against the frame pushed right before this one
    pub matches: Vec<DescriptorMatch>,
}

impl DataFrame {
    pub fn new(image: GrayImage) -> Self {
        Self {
            image,
            keypoints: Vec::new(),
            descriptors: Descriptors::default(),
            matches: Vec::new(),
        }
    }
}

/// Fixed capacity ring buffer of the most recent frames, oldest first.
#[derive(Debug)]
pub struct DataBuffer {
    capacity: usize,
    frames: VecDeque<DataFrame>,
}

impl DataBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Append a frame, evicting and returning the oldest one once over capacity.
    pub fn push(&mut self, frame: DataFrame) -> Option<DataFrame> {
        self.frames.push_back(frame);
        if self.frames.len() > self.capacity {
            self.frames.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn current(&self) -> Option<&DataFrame> {
        self.frames.back()
    }

    pub fn current_mut(&mut self) -> Option<&mut DataFrame> {
        self.frames.back_mut()
    }

    pub fn previous(&self) -> Option<&DataFrame> {
        self.frames.len().checked_sub(2).and_then(|i| self.frames.get(i))
    }

    /// Both the previous and the current frame, the latter mutable
    pub fn latest_pair_mut(&mut self) -> Option<(&DataFrame, &mut DataFrame)> {
        let len = self.frames.len();
        if len < 2 {
            return None;
        }
        let (front, back) = self.frames.as_mut_slices();
        // the two newest frames may straddle the deque's wrap point
        if back.len() >= 2 {
            let (rest, last) = back.split_at_mut(back.len() - 1);
            Some((&rest[rest.len() - 1], &mut last[0]))
        } else if back.len() == 1 {
            Some((&front[front.len() - 1], &mut back[0]))
        } else {
            let (rest, last) = front.split_at_mut(front.len() - 1);
            Some((&rest[rest.len() - 1], &mut last[0]))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataFrame> {
        self.frames.iter()
    }
}
