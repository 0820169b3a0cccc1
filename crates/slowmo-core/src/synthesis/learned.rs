use std::path::Path;

use image::RgbImage;
use ndarray::Zip;
use tracing::{debug, info, warn};

use super::network::{FlowNetwork, NativeFlowNet};
use super::weights::ModelWeights;
use super::{check_pair, SynthesisOperator, SynthesisParams};
use crate::config::ModelContract;
use crate::error::SynthesisError;
use crate::tensor::{self, Tensor};
use crate::video::frame::FramePair;
use crate::warp::WarpEngine;

/// Runs an interpolation network on a frame pair.
///
/// Frames are normalized to [0, 1], padded up to the contract's alignment,
/// inferred, cropped back and quantized. With `ensemble` the pair is also run
/// mirrored left-to-right and the un-mirrored result is averaged in.
pub struct LearnedModelOperator {
    network: Box<dyn FlowNetwork>,
    contract: ModelContract,
}

impl LearnedModelOperator {
    pub fn new(network: Box<dyn FlowNetwork>, contract: ModelContract) -> Self {
        Self { network, contract }
    }

    /// Build the native network from a weights file. A missing or unreadable file
    /// is not fatal: the network starts from its default weights.
    pub fn from_weights_file(path: Option<&Path>, contract: ModelContract, warp: WarpEngine) -> Self {
        let weights = match path.map(ModelWeights::load) {
            Some(Ok(weights)) => weights,
            Some(Err(e)) => {
                warn!(error = %e, "failed to load model weights, using defaults");
                ModelWeights::default()
            }
            None => {
                info!("no weights file given, using default model weights");
                ModelWeights::default()
            }
        };
        let network = NativeFlowNet::from_weights(&weights, warp);
        Self::new(Box::new(network), contract)
    }

    pub fn contract(&self) -> &ModelContract {
        &self.contract
    }

    fn infer_padded(
        &self,
        i0: &Tensor,
        i1: &Tensor,
        params: &SynthesisParams,
    ) -> Result<Tensor, SynthesisError> {
        let out = self.network.infer(i0, i1, params.timestep, params.scale)?;
        if out.dim() != i0.dim() {
            let (_, h, w) = i0.dim();
            let (_, oh, ow) = out.dim();
            return Err(SynthesisError::DimensionMismatch {
                expected: (h, w),
                actual: (oh, ow),
            });
        }
        Ok(out)
    }
}

/// Elementwise mean of two same-shaped tensors.
fn average(a: &Tensor, b: &Tensor) -> Tensor {
    let mut out = a.clone();
    Zip::from(&mut out).and(b).for_each(|o, &v| *o = (*o + v) / 2.0);
    out
}

impl SynthesisOperator for LearnedModelOperator {
    fn name(&self) -> &'static str {
        "learned"
    }

    fn synthesize(
        &self,
        pair: FramePair<'_>,
        params: &SynthesisParams,
    ) -> Result<RgbImage, SynthesisError> {
        check_pair(&pair)?;
        let (w, h) = pair.left.dimensions();
        if w == 0 || h == 0 {
            return Err(SynthesisError::numeric("cannot run inference on an empty frame"));
        }
        let (h, w) = (h as usize, w as usize);
        let (ph, pw) = (self.contract.aligned(h), self.contract.aligned(w));

        let i0 = tensor::pad(&tensor::image_to_tensor(pair.left), ph, pw, self.contract.padding);
        let i1 = tensor::pad(&tensor::image_to_tensor(pair.right), ph, pw, self.contract.padding);

        let mut middle = self.infer_padded(&i0, &i1, params)?;
        if params.ensemble {
            let f0 = tensor::flip_horizontal(&i0);
            let f1 = tensor::flip_horizontal(&i1);
            let mirrored = tensor::flip_horizontal(&self.infer_padded(&f0, &f1, params)?);
            middle = average(&middle, &mirrored);
        }

        if !tensor::all_finite(&middle) {
            return Err(SynthesisError::numeric("model output contains non-finite samples"));
        }

        debug!(
            width = w,
            height = h,
            padded_width = pw,
            padded_height = ph,
            ensemble = params.ensemble,
            "learned synthesis complete"
        );

        let middle = tensor::crop(&middle, h, w);
        Ok(tensor::tensor_to_image(&middle, self.contract.quantization))
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;
    use ndarray::Array3;

    use super::*;
    use crate::config::{PaddingMode, Quantization};

    /// Returns a horizontal ramp, so mirrored passes differ from direct ones.
    struct RampNet;

    impl FlowNetwork for RampNet {
        fn infer(&self, img0: &Tensor, _: &Tensor, _: f32, _: f32) -> Result<Tensor, SynthesisError> {
            let (c, h, w) = img0.dim();
            Ok(Array3::from_shape_fn((c, h, w), |(_, _, x)| x as f32 / (w - 1) as f32))
        }
    }

    struct ShrinkingNet;

    impl FlowNetwork for ShrinkingNet {
        fn infer(&self, img0: &Tensor, _: &Tensor, _: f32, _: f32) -> Result<Tensor, SynthesisError> {
            let (c, h, w) = img0.dim();
            Ok(Array3::zeros((c, h - 1, w)))
        }
    }

    struct NanNet;

    impl FlowNetwork for NanNet {
        fn infer(&self, img0: &Tensor, _: &Tensor, _: f32, _: f32) -> Result<Tensor, SynthesisError> {
            Ok(Array3::from_elem(img0.raw_dim(), f32::NAN))
        }
    }

    fn frame(w: u32, h: u32, v: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([v, v / 2, 255 - v]))
    }

    #[test]
    fn pads_to_alignment_and_crops_back() {
        let op = LearnedModelOperator::new(Box::new(RampNet), ModelContract::default());
        let a = frame(70, 10, 40);
        let out = op
            .synthesize(FramePair::new(&a, &a), &SynthesisParams::default())
            .unwrap();
        assert_eq!(out.dimensions(), (70, 10));
    }

    #[test]
    fn ensemble_runs_twice_and_lies_between_single_passes() {
        let contract = ModelContract {
            alignment: 8,
            padding: PaddingMode::Reflect,
            quantization: Quantization::Round,
        };
        let a = frame(8, 2, 10);
        let b = frame(8, 2, 200);
        let pair = FramePair::new(&a, &b);

        let single = LearnedModelOperator::new(Box::new(RampNet), contract)
            .synthesize(pair, &SynthesisParams::default())
            .unwrap();

        // The mirrored pass alone is the ramp reversed.
        let mirrored = RgbImage::from_fn(8, 2, |x, y| *single.get_pixel(7 - x, y));

        let ensemble = LearnedModelOperator::new(Box::new(RampNet), contract)
            .synthesize(
                pair,
                &SynthesisParams {
                    ensemble: true,
                    ..SynthesisParams::default()
                },
            )
            .unwrap();

        for (x, y, p) in ensemble.enumerate_pixels() {
            for c in 0..3 {
                let lo = single.get_pixel(x, y)[c].min(mirrored.get_pixel(x, y)[c]);
                let hi = single.get_pixel(x, y)[c].max(mirrored.get_pixel(x, y)[c]);
                assert!(lo <= p[c] && p[c] <= hi, "({x},{y}) c{c}: {} not in [{lo},{hi}]", p[c]);
            }
        }
        // A ramp averaged with its mirror is flat.
        assert_eq!(ensemble.get_pixel(0, 0), ensemble.get_pixel(7, 1));
    }

    #[test]
    fn mismatched_pair_is_rejected_before_inference() {
        let op = LearnedModelOperator::new(Box::new(RampNet), ModelContract::default());
        let a = frame(8, 8, 1);
        let b = frame(8, 9, 1);
        let err = op
            .synthesize(FramePair::new(&a, &b), &SynthesisParams::default())
            .unwrap_err();
        assert!(matches!(err, SynthesisError::DimensionMismatch { .. }));
    }

    #[test]
    fn wrong_output_shape_is_dimension_mismatch() {
        let op = LearnedModelOperator::new(Box::new(ShrinkingNet), ModelContract::default());
        let a = frame(8, 8, 1);
        let err = op
            .synthesize(FramePair::new(&a, &a), &SynthesisParams::default())
            .unwrap_err();
        assert!(matches!(err, SynthesisError::DimensionMismatch { .. }));
    }

    #[test]
    fn non_finite_output_is_numeric_failure() {
        let op = LearnedModelOperator::new(Box::new(NanNet), ModelContract::default());
        let a = frame(4, 4, 1);
        let err = op
            .synthesize(FramePair::new(&a, &a), &SynthesisParams::default())
            .unwrap_err();
        assert!(matches!(err, SynthesisError::NumericFailure(_)));
    }

    #[test]
    fn native_model_from_missing_file_keeps_working() {
        let op = LearnedModelOperator::from_weights_file(
            Some(Path::new("/nonexistent/flownet.json")),
            ModelContract {
                alignment: 16,
                ..ModelContract::default()
            },
            WarpEngine::default(),
        );
        let a = frame(12, 12, 80);
        let out = op
            .synthesize(FramePair::new(&a, &a), &SynthesisParams::default())
            .unwrap();
        assert_eq!(out, a);
    }
}
