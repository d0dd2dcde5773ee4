//! Pixel access helpers shared by the binary descriptors.

use image::GrayImage;

/// Intensity at `(x, y)`, or 0 outside of the image.
pub fn pixel_or_zero(image: &GrayImage, x: i32, y: i32) -> u8 {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.get_pixel(x as u32, y as u32).0[0]
    } else {
        0
    }
}

/// Summed area table over a grayscale image, used to average square
/// neighborhoods in constant time.
pub struct IntegralImage {
    width: usize,
    height: usize,
    /// `(width + 1) x (height + 1)`, first row and column are zero
    sums: Vec<u64>,
}

impl IntegralImage {
    pub fn new(image: &GrayImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let stride = width + 1;
        let mut sums = vec![0u64; stride * (height + 1)];

        for y in 0..height {
            let mut row_sum = 0u64;
            for x in 0..width {
                row_sum += image.get_pixel(x as u32, y as u32).0[0] as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            }
        }

        Self {
            width,
            height,
            sums,
        }
    }

    /// Sum over the half-open box `[x0, x1) x [y0, y1)`, clipped to the image.
    fn box_sum(&self, x0: i64, y0: i64, x1: i64, y1: i64) -> (u64, u64) {
        let x0 = x0.clamp(0, self.width as i64) as usize;
        let x1 = x1.clamp(0, self.width as i64) as usize;
        let y0 = y0.clamp(0, self.height as i64) as usize;
        let y1 = y1.clamp(0, self.height as i64) as usize;
        if x1 <= x0 || y1 <= y0 {
            return (0, 0);
        }

        let stride = self.width + 1;
        let total = self.sums[y1 * stride + x1] + self.sums[y0 * stride + x0]
            - self.sums[y0 * stride + x1]
            - self.sums[y1 * stride + x0];
        (total, ((x1 - x0) * (y1 - y0)) as u64)
    }

    /// Mean intensity of the square of half side `radius` centered on `(x, y)`.
    /// Pixels outside of the image count as 0, as in [`pixel_or_zero`].
    pub fn mean(&self, x: f32, y: f32, radius: f32) -> f32 {
        let radius = radius.max(0.5);
        let x0 = (x - radius).round() as i64;
        let y0 = (y - radius).round() as i64;
        let x1 = (x + radius).round() as i64 + 1;
        let y1 = (y + radius).round() as i64 + 1;
        let area = ((x1 - x0) * (y1 - y0)) as f32;

        let (sum, _) = self.box_sum(x0, y0, x1, y1);
        sum as f32 / area
    }
}

/// Orientation of the intensity centroid of a circular patch, in degrees.
pub fn intensity_centroid_angle(image: &GrayImage, x: f32, y: f32, radius: i32) -> f32 {
    let (cx, cy) = (x.round() as i32, y.round() as i32);
    let mut m01 = 0.0f32;
    let mut m10 = 0.0f32;

    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let intensity = pixel_or_zero(image, cx + dx, cy + dy) as f32;
            m10 += dx as f32 * intensity;
            m01 += dy as f32 * intensity;
        }
    }

    normalize_degrees(m01.atan2(m10).to_degrees())
}

/// Wrap an angle into `[0, 360)`.
pub fn normalize_degrees(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Pack a sequence of comparison results into bytes, most significant bit first.
pub fn pack_bits(bits: impl IntoIterator<Item = bool>, bytes: usize) -> Vec<u8> {
    let mut packed = vec![0u8; bytes];
    for (i, bit) in bits.into_iter().enumerate().take(bytes * 8) {
        if bit {
            packed[i / 8] |= 0x80 >> (i % 8);
        }
    }
    packed
}
