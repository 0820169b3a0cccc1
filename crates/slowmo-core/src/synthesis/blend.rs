use image::{Rgb, RgbImage};

use super::{check_pair, SynthesisOperator, SynthesisParams};
use crate::error::SynthesisError;
use crate::video::frame::FramePair;

/// Per-pixel weighted average `(1 - t) * left + t * right`, rounded.
///
/// Frames of different sizes are blended over the left frame's extent, with the
/// right frame's edge pixels reused, so this never fails.
pub fn blend(left: &RgbImage, right: &RgbImage, timestep: f32) -> RgbImage {
    let t = if timestep.is_finite() {
        timestep.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let (rw, rh) = right.dimensions();
    RgbImage::from_fn(left.width(), left.height(), |x, y| {
        let a = left.get_pixel(x, y);
        let b = if rw == 0 || rh == 0 {
            a
        } else {
            right.get_pixel(x.min(rw - 1), y.min(rh - 1))
        };
        let mix = |c: usize| ((1.0 - t) * a[c] as f32 + t * b[c] as f32).round().clamp(0.0, 255.0) as u8;
        Rgb([mix(0), mix(1), mix(2)])
    })
}

/// Deterministic cross-fade. Also the recovery path for every failed synthesis.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearBlend;

impl SynthesisOperator for LinearBlend {
    fn name(&self) -> &'static str {
        "blend"
    }

    fn synthesize(
        &self,
        pair: FramePair<'_>,
        params: &SynthesisParams,
    ) -> Result<RgbImage, SynthesisError> {
        check_pair(&pair)?;
        Ok(blend(pair.left, pair.right, params.timestep))
    }
}
