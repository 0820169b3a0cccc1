//! In-memory frame source and sink, for embedding and for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use image::RgbImage;

use super::frame::Frame;
use super::{FrameSink, FrameSource};

/// Serves a fixed list of images as a stream.
pub struct MemorySource {
    images: VecDeque<RgbImage>,
    width: u32,
    height: u32,
    fps: f64,
    total: u64,
    next_index: u64,
}

impl MemorySource {
    pub fn new(images: Vec<RgbImage>, fps: f64) -> Self {
        let (width, height) = images.first().map(|i| i.dimensions()).unwrap_or((0, 0));
        let total = images.len() as u64;
        Self {
            images: images.into(),
            width,
            height,
            fps,
            total,
            next_index: 0,
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(image) = self.images.pop_front() else {
            return Ok(None);
        };
        let frame = Frame::new(image, self.next_index, self.fps);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.total)
    }
}

#[derive(Default)]
struct SinkState {
    frames: Vec<Frame>,
    closed: bool,
    close_calls: u32,
}

/// Collects written frames. Clones share the same storage, so a caller can keep
/// a handle while the run owns the sink.
#[derive(Clone)]
pub struct MemorySink {
    width: u32,
    height: u32,
    state: Arc<Mutex<SinkState>>,
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            state: Arc::default(),
            fail_after: None,
        }
    }

    /// Make every write after the first `n` fail, to exercise fatal sink errors.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        // A poisoned lock only means a writer panicked; the frames are still valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.lock().frames.clone()
    }

    pub fn images(&self) -> Vec<RgbImage> {
        self.lock().frames.iter().map(|f| f.image.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn close_calls(&self) -> u32 {
        self.lock().close_calls
    }
}

impl FrameSink for MemorySink {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            bail!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        let fail_after = self.fail_after;
        let mut state = self.lock();
        if state.closed {
            bail!("sink is already closed");
        }
        if fail_after.is_some_and(|n| state.frames.len() >= n) {
            bail!("simulated write failure");
        }
        state.frames.push(frame.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.close_calls += 1;
        state.closed = true;
        Ok(())
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(v: u8) -> RgbImage {
        RgbImage::from_pixel(2, 2, Rgb([v, v, v]))
    }

    #[test]
    fn source_yields_frames_in_order_with_timestamps() {
        let mut src = MemorySource::new(vec![solid(1), solid(2)], 10.0);
        assert_eq!(src.frame_count(), Some(2));
        let a = src.next_frame().unwrap().unwrap();
        let b = src.next_frame().unwrap().unwrap();
        assert!(src.next_frame().unwrap().is_none());
        assert_eq!((a.index, b.index), (0, 1));
        assert!((b.timestamp_seconds - 0.1).abs() < 1e-9);
    }

    #[test]
    fn sink_rejects_mismatched_size_and_shares_storage() {
        let handle = MemorySink::new(2, 2);
        let mut sink = handle.clone();
        sink.write(&Frame::new(solid(3), 0, 1.0)).unwrap();
        let big = Frame::new(RgbImage::new(3, 2), 1, 1.0);
        assert!(sink.write(&big).is_err());
        sink.close().unwrap();
        assert_eq!(handle.len(), 1);
        assert!(handle.is_closed());
    }
}
