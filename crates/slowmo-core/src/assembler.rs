use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{RunError, RunResult};
use crate::progress::ProgressReporter;
use crate::sample::{SampleExporter, SampleKind};
use crate::synthesis::blend::blend;
use crate::synthesis::{SynthesisOperator, SynthesisParams};
use crate::video::frame::{Frame, FramePair};
use crate::video::{fit_to_sink, FrameSink, FrameSource};

/// Every node of the recursion is synthesized halfway between its bounds.
const MIDPOINT: f32 = 0.5;

/// Accepted range of the analysis scale factor.
pub const SCALE_RANGE: std::ops::RangeInclusive<f32> = 0.25..=4.0;

/// Parameters for an interpolation run.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationConfig {
    /// Output frames per input interval. Must be a power of two; 1 copies the
    /// input through.
    pub multiplier: u32,
    /// Analysis resolution factor passed to the operator.
    pub scale: f32,
    /// Run the operator on mirrored inputs too and average.
    pub ensemble: bool,
    /// Expand the two halves of each interval concurrently.
    pub parallel: bool,
    /// Maximum number of frames handed to the sample exporter.
    pub sample_limit: usize,
    /// Rate stamped on written frames. Defaults to the source rate.
    pub output_fps: Option<f64>,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            multiplier: 2,
            scale: 1.0,
            ensemble: false,
            parallel: false,
            sample_limit: 20,
            output_fps: None,
        }
    }
}

impl InterpolationConfig {
    pub fn validate(&self) -> RunResult<()> {
        if !self.multiplier.is_power_of_two() {
            return Err(RunError::config(format!(
                "multiplier must be a power of two >= 1, got {}",
                self.multiplier
            )));
        }
        if !SCALE_RANGE.contains(&self.scale) {
            return Err(RunError::config(format!(
                "scale must be within {}..={}, got {}",
                SCALE_RANGE.start(),
                SCALE_RANGE.end(),
                self.scale
            )));
        }
        if let Some(fps) = self.output_fps {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(RunError::config(format!(
                    "output fps must be a positive number, got {fps}"
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    pub frames_read: u64,
    pub frames_written: u64,
    pub frames_interpolated: u64,
    pub samples_exported: u64,
    /// Nodes resolved by blending after the operator failed.
    pub fallbacks: u64,
    pub synthesis_calls: u64,
    pub elapsed: Duration,
    pub success: bool,
    pub cancelled: bool,
    pub input_fps: f64,
    pub output_fps: f64,
}

/// Streams a source into a sink, inserting `multiplier - 1` synthesized frames
/// between every pair of consecutive input frames.
///
/// Each interval is filled by recursive bisection: the midpoint is synthesized
/// first, then each half is filled the same way. Frames are written as soon as
/// their interval is complete, always in temporal order.
pub struct RecursiveAssembler<K: FrameSink> {
    config: InterpolationConfig,
    operator: Arc<dyn SynthesisOperator>,
    sink: K,
    cancel: Option<CancellationToken>,
    progress: Option<Box<dyn ProgressReporter>>,
    sampler: Option<Box<dyn SampleExporter>>,
    samples_offered: usize,
}

impl<K: FrameSink> RecursiveAssembler<K> {
    pub fn new(
        config: InterpolationConfig,
        operator: Arc<dyn SynthesisOperator>,
        sink: K,
    ) -> RunResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            operator,
            sink,
            cancel: None,
            progress: None,
            sampler: None,
            samples_offered: 0,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressReporter + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn with_sampler(mut self, sampler: impl SampleExporter + 'static) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    /// Consume `source` to the end or until cancelled. The sink is closed on
    /// every path, including fatal errors.
    pub fn run<S: FrameSource>(mut self, mut source: S) -> RunResult<RunStatistics> {
        let started = Instant::now();
        let input_fps = source.fps();
        let mut stats = RunStatistics {
            input_fps,
            output_fps: self.config.output_fps.unwrap_or(input_fps),
            ..RunStatistics::default()
        };

        info!(
            multiplier = self.config.multiplier,
            operator = self.operator.name(),
            scale = self.config.scale,
            ensemble = self.config.ensemble,
            parallel = self.config.parallel,
            input_fps,
            output_fps = stats.output_fps,
            expected_frames = ?source.frame_count(),
            "interpolation starting"
        );

        let outcome = self.stream(&mut source, &mut stats);
        let closed = self.sink.close().map_err(RunError::Sink);
        stats.elapsed = started.elapsed();

        match (outcome, closed) {
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "sink also failed to close");
                }
                error!(error = %e, frames_written = stats.frames_written, "interpolation failed");
                Err(e)
            }
            (Ok(()), Err(e)) => {
                error!(error = %e, "failed to finalize output");
                Err(e)
            }
            (Ok(()), Ok(())) => {
                info!(
                    frames_read = stats.frames_read,
                    frames_written = stats.frames_written,
                    frames_interpolated = stats.frames_interpolated,
                    fallbacks = stats.fallbacks,
                    cancelled = stats.cancelled,
                    elapsed_ms = stats.elapsed.as_millis() as u64,
                    "interpolation finished"
                );
                Ok(stats)
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn stream<S: FrameSource>(&mut self, source: &mut S, stats: &mut RunStatistics) -> RunResult<()> {
        let multiplier = self.config.multiplier;
        let total_pairs = source.frame_count().map(|n| n.saturating_sub(1)).filter(|&n| n > 0);

        let expander = Expander {
            operator: Arc::clone(&self.operator),
            params: SynthesisParams {
                timestep: MIDPOINT,
                scale: self.config.scale,
                ensemble: self.config.ensemble,
            },
            cancel: self.cancel.clone(),
            parallel: self.config.parallel,
            fallbacks: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        };

        if self.is_cancelled() {
            stats.cancelled = true;
            return Ok(());
        }
        let Some(mut last) = self.read(source, stats)? else {
            return self.complete(stats);
        };
        self.emit(last.clone(), 0.0, SampleKind::Original, stats)?;

        let mut pairs = 0u64;
        loop {
            if self.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            let Some(current) = self.read(source, stats)? else {
                break;
            };

            let interior = expander.expand(&last, &current, multiplier);
            stats.fallbacks = expander.fallbacks.load(Ordering::Relaxed);
            stats.synthesis_calls = expander.calls.load(Ordering::Relaxed);
            if self.is_cancelled() {
                debug!(pair = pairs, "cancelled mid-interval, dropping partial interval");
                stats.cancelled = true;
                break;
            }

            for (i, image) in interior.into_iter().enumerate() {
                let offset = (i + 1) as f64 / multiplier as f64;
                self.emit(image, offset, SampleKind::Interpolated, stats)?;
                stats.frames_interpolated += 1;
            }
            self.emit(current.clone(), 0.0, SampleKind::Original, stats)?;
            last = current;

            pairs += 1;
            debug!(pair = pairs, frames_written = stats.frames_written, "interval complete");
            if let (Some(total), Some(progress)) = (total_pairs, self.progress.as_mut()) {
                progress.report((pairs as f64 / total as f64).min(1.0));
            }
        }

        if stats.cancelled {
            info!(pairs, frames_written = stats.frames_written, "interpolation cancelled");
            return Ok(());
        }
        self.complete(stats)
    }

    fn complete(&mut self, stats: &mut RunStatistics) -> RunResult<()> {
        stats.success = true;
        if let Some(progress) = self.progress.as_mut() {
            progress.report(1.0);
        }
        Ok(())
    }

    /// Next source frame, resampled to the sink size.
    fn read<S: FrameSource>(
        &mut self,
        source: &mut S,
        stats: &mut RunStatistics,
    ) -> RunResult<Option<RgbImage>> {
        let Some(frame) = source.next_frame().map_err(RunError::Source)? else {
            return Ok(None);
        };
        stats.frames_read += 1;
        Ok(Some(fit_to_sink(frame.image, self.sink.width(), self.sink.height())))
    }

    fn emit(
        &mut self,
        image: RgbImage,
        offset: f64,
        kind: SampleKind,
        stats: &mut RunStatistics,
    ) -> RunResult<()> {
        let frame = Frame::new(image, stats.frames_written, stats.output_fps);
        self.sink.write(&frame).map_err(RunError::Sink)?;
        stats.frames_written += 1;

        if self.samples_offered < self.config.sample_limit {
            if let Some(sampler) = self.sampler.as_mut() {
                self.samples_offered += 1;
                match sampler.export(&frame.image, offset, kind) {
                    Ok(()) => stats.samples_exported += 1,
                    Err(e) => warn!(error = %format!("{e:#}"), index = frame.index, "failed to export sample"),
                }
            }
        }
        Ok(())
    }
}

/// Recursive interval bisection over a shared operator.
struct Expander {
    operator: Arc<dyn SynthesisOperator>,
    params: SynthesisParams,
    cancel: Option<CancellationToken>,
    parallel: bool,
    fallbacks: AtomicU64,
    calls: AtomicU64,
}

impl Expander {
    /// The `m - 1` frames strictly between `a` and `b`, in temporal order.
    /// Returns early with a partial result once cancellation is observed.
    fn expand(&self, a: &RgbImage, b: &RgbImage, m: u32) -> Vec<RgbImage> {
        if m <= 1 || self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Vec::new();
        }
        let mid = self.midpoint(a, b);
        let half = m / 2;

        let (mut frames, right) = if self.parallel && half > 1 {
            rayon::join(|| self.expand(a, &mid, half), || self.expand(&mid, b, half))
        } else {
            (self.expand(a, &mid, half), self.expand(&mid, b, half))
        };
        frames.reserve(right.len() + 1);
        frames.push(mid);
        frames.extend(right);
        frames
    }

    /// Synthesize the midpoint, blending instead when the operator fails.
    fn midpoint(&self, a: &RgbImage, b: &RgbImage) -> RgbImage {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.operator.synthesize(FramePair::new(a, b), &self.params) {
            Ok(mid) if mid.dimensions() == a.dimensions() => mid,
            Ok(mid) => {
                warn!(
                    operator = self.operator.name(),
                    expected = ?a.dimensions(),
                    actual = ?mid.dimensions(),
                    "synthesized frame has wrong size, falling back to blend"
                );
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                blend(a, b, MIDPOINT)
            }
            Err(e) => {
                warn!(
                    operator = self.operator.name(),
                    error = %e,
                    "synthesis failed, falling back to blend"
                );
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                blend(a, b, MIDPOINT)
            }
        }
    }
}
