use image::RgbImage;
use tracing::debug;

use super::{check_pair, SynthesisOperator, SynthesisParams};
use crate::config::Quantization;
use crate::error::SynthesisError;
use crate::flow::FlowEstimator;
use crate::tensor;
use crate::video::frame::FramePair;
use crate::warp::WarpEngine;

/// Motion-compensated interpolation without a model.
///
/// Estimates the left-to-right displacement field, scales it by the timestep and
/// pulls the left frame along it. Ignores `ensemble`.
pub struct OpticalFlowBlendOperator {
    estimator: FlowEstimator,
    warp: WarpEngine,
}

impl OpticalFlowBlendOperator {
    pub fn new(warp: WarpEngine) -> Self {
        Self {
            estimator: FlowEstimator::default(),
            warp,
        }
    }

    pub fn with_estimator(mut self, estimator: FlowEstimator) -> Self {
        self.estimator = estimator;
        self
    }
}

impl SynthesisOperator for OpticalFlowBlendOperator {
    fn name(&self) -> &'static str {
        "flow"
    }

    fn synthesize(
        &self,
        pair: FramePair<'_>,
        params: &SynthesisParams,
    ) -> Result<RgbImage, SynthesisError> {
        check_pair(&pair)?;
        if pair.left.width() == 0 || pair.left.height() == 0 {
            return Err(SynthesisError::numeric("cannot estimate flow on an empty frame"));
        }
        if !params.timestep.is_finite() {
            return Err(SynthesisError::numeric(format!(
                "timestep {} is not finite",
                params.timestep
            )));
        }

        let left = tensor::image_to_tensor(pair.left);
        let right = tensor::image_to_tensor(pair.right);
        let motion = self.estimator.estimate(&left, &right, params.scale);

        let t = params.timestep;
        let flow = motion.mapv(|d| -t * d);
        let warped = self.warp.warp(&left, &flow)?;
        if !tensor::all_finite(&warped) {
            return Err(SynthesisError::numeric("warped frame contains non-finite samples"));
        }

        debug!(timestep = t, scale = params.scale, edge = %self.warp.edge(), "flow synthesis complete");
        Ok(tensor::tensor_to_image(&warped, Quantization::Round))
    }
}
