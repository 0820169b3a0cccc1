use image::RgbImage;

/// A single video frame with its position in the stream.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The frame's image data.
    pub image: RgbImage,
    /// Ordinal of the frame within its stream (0-based).
    pub index: u64,
    /// Elapsed seconds from the start of the stream.
    pub timestamp_seconds: f64,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64, fps: f64) -> Self {
        let timestamp_seconds = if fps > 0.0 {
            index as f64 / fps
        } else {
            0.0
        };
        Self {
            image,
            index,
            timestamp_seconds,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Two consecutive frames bounding one interpolation interval.
#[derive(Debug, Clone, Copy)]
pub struct FramePair<'a> {
    pub left: &'a RgbImage,
    pub right: &'a RgbImage,
}

impl<'a> FramePair<'a> {
    pub fn new(left: &'a RgbImage, right: &'a RgbImage) -> Self {
        Self { left, right }
    }

    pub fn same_dimensions(&self) -> bool {
        self.left.dimensions() == self.right.dimensions()
    }
}
