use ndarray::{Array3, Axis, Zip};
use tracing::{debug, info, warn};

use super::weights::ModelWeights;
use crate::error::SynthesisError;
use crate::flow::FlowEstimator;
use crate::tensor::{all_finite, Tensor};
use crate::warp::WarpEngine;

/// Inference contract of an interpolation model.
///
/// Inputs are padded `[3, H, W]` tensors in [0, 1]; the output has the same
/// shape. Implementations hold fixed weights and are read concurrently.
pub trait FlowNetwork: Send + Sync {
    fn infer(
        &self,
        img0: &Tensor,
        img1: &Tensor,
        timestep: f32,
        scale: f32,
    ) -> Result<Tensor, SynthesisError>;
}

const REFINE_KERNEL: &str = "flow.refine.weight";
const MASK_BIAS: &str = "mask.bias";
const MASK_GAIN: &str = "mask.gain";
const MERGE_GAIN: &str = "merge.gain";
const MERGE_BIAS: &str = "merge.bias";

const KNOWN_PARAMS: &[(&str, &[usize])] = &[
    (REFINE_KERNEL, &[3, 3]),
    (MASK_BIAS, &[1]),
    (MASK_GAIN, &[1]),
    (MERGE_GAIN, &[3]),
    (MERGE_BIAS, &[3]),
];

/// Keeps the fusion mask's logit finite at t = 0 and t = 1.
const TIMESTEP_EPS: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
struct NetParams {
    refine: [f32; 9],
    mask_bias: f32,
    mask_gain: f32,
    merge_gain: [f32; 3],
    merge_bias: [f32; 3],
}

impl Default for NetParams {
    fn default() -> Self {
        Self {
            refine: [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            mask_bias: 0.0,
            mask_gain: 1.0,
            merge_gain: [1.0; 3],
            merge_bias: [0.0; 3],
        }
    }
}

/// Built-in CPU interpolation network.
///
/// Estimates bilateral motion with [`FlowEstimator`], smooths it with a learned
/// 3x3 kernel, backward-warps both frames to the timestep, fuses them with a
/// learned mask and applies a per-channel affine head. With default weights the
/// mask reduces to `1 - t`.
pub struct NativeFlowNet {
    params: NetParams,
    estimator: FlowEstimator,
    warp: WarpEngine,
}

impl NativeFlowNet {
    pub fn new(warp: WarpEngine) -> Self {
        Self {
            params: NetParams::default(),
            estimator: FlowEstimator::default(),
            warp,
        }
    }

    /// Build from a parameter map. Missing, unknown or mis-shaped entries are
    /// logged and the default value is kept for that parameter.
    pub fn from_weights(weights: &ModelWeights, warp: WarpEngine) -> Self {
        let mut params = NetParams::default();
        let mut matched = 0usize;

        for key in weights.keys() {
            if !KNOWN_PARAMS.iter().any(|(k, _)| *k == key) {
                warn!(key, "unmatched weight key, ignoring");
            }
        }

        for &(key, shape) in KNOWN_PARAMS {
            let Some(t) = weights.get(key) else {
                debug!(key, "weight missing, using default");
                continue;
            };
            if t.shape != shape || !t.is_consistent() {
                warn!(key, expected = ?shape, actual = ?t.shape, "weight shape mismatch, using default");
                continue;
            }
            match key {
                REFINE_KERNEL => params.refine.copy_from_slice(&t.data),
                MASK_BIAS => params.mask_bias = t.data[0],
                MASK_GAIN => params.mask_gain = t.data[0],
                MERGE_GAIN => params.merge_gain.copy_from_slice(&t.data),
                MERGE_BIAS => params.merge_bias.copy_from_slice(&t.data),
                _ => continue,
            }
            matched += 1;
        }

        info!(matched, total = KNOWN_PARAMS.len(), "native flow network initialized");
        Self {
            params,
            estimator: FlowEstimator::default(),
            warp,
        }
    }

    pub fn with_estimator(mut self, estimator: FlowEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    fn refine_flow(&self, flow: &Tensor) -> Tensor {
        let k = &self.params.refine;
        let (c, h, w) = flow.dim();
        Array3::from_shape_fn((c, h, w), |(ch, y, x)| {
            let mut acc = 0.0;
            for ky in 0..3 {
                for kx in 0..3 {
                    let yy = (y + ky).saturating_sub(1).min(h - 1);
                    let xx = (x + kx).saturating_sub(1).min(w - 1);
                    acc += k[ky * 3 + kx] * flow[[ch, yy, xx]];
                }
            }
            acc
        })
    }

    /// Weight of the left frame at timestep `t`.
    fn fusion_mask(&self, t: f32) -> f32 {
        let t = t.clamp(TIMESTEP_EPS, 1.0 - TIMESTEP_EPS);
        let logit = self.params.mask_bias + self.params.mask_gain * ((1.0 - t) / t).ln();
        1.0 / (1.0 + (-logit).exp())
    }
}

impl FlowNetwork for NativeFlowNet {
    fn infer(
        &self,
        img0: &Tensor,
        img1: &Tensor,
        timestep: f32,
        scale: f32,
    ) -> Result<Tensor, SynthesisError> {
        if img0.dim() != img1.dim() {
            let (_, h0, w0) = img0.dim();
            let (_, h1, w1) = img1.dim();
            return Err(SynthesisError::DimensionMismatch {
                expected: (h0, w0),
                actual: (h1, w1),
            });
        }
        if !timestep.is_finite() {
            return Err(SynthesisError::numeric(format!("timestep {timestep} is not finite")));
        }

        let motion = self.estimator.estimate(img0, img1, scale);
        let motion = self.refine_flow(&motion);

        let flow_t0 = motion.mapv(|d| -timestep * d);
        let flow_t1 = motion.mapv(|d| (1.0 - timestep) * d);
        let warped0 = self.warp.warp(img0, &flow_t0)?;
        let warped1 = self.warp.warp(img1, &flow_t1)?;

        let m = self.fusion_mask(timestep);
        let mut merged = Array3::zeros(warped0.raw_dim());
        Zip::from(&mut merged)
            .and(&warped0)
            .and(&warped1)
            .for_each(|o, &a, &b| *o = m * a + (1.0 - m) * b);

        for (c, mut plane) in merged.axis_iter_mut(Axis(0)).enumerate() {
            let (gain, bias) = (self.params.merge_gain[c % 3], self.params.merge_bias[c % 3]);
            plane.mapv_inplace(|v| gain * v + bias);
        }

        if !all_finite(&merged) {
            return Err(SynthesisError::numeric("network produced non-finite samples"));
        }
        Ok(merged)
    }
}
