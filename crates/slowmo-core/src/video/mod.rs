pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod memory;

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

use frame::Frame;

/// Sequential frame reader over a video container.
pub trait FrameSource {
    /// Read the next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn fps(&self) -> f64;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Approximate number of frames in the stream, if the container reports one.
    fn frame_count(&self) -> Option<u64>;
}

/// Sequential frame writer with dimensions and rate fixed at open.
///
/// Implementations reject frames whose size differs from the sink's; callers
/// resample with [`fit_to_sink`] first.
pub trait FrameSink {
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Finalize the output. Calling it more than once is a no-op.
    fn close(&mut self) -> Result<()>;

    fn width(&self) -> u32;

    fn height(&self) -> u32;
}

/// Resample `image` to the sink size with a Lanczos filter, or return it untouched
/// when it already matches.
pub fn fit_to_sink(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    debug!(
        from_width = image.width(),
        from_height = image.height(),
        width,
        height,
        "resampling frame to sink size"
    );
    imageops::resize(&image, width, height, FilterType::Lanczos3)
}
