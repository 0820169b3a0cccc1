pub mod blend;
pub mod learned;
pub mod network;
pub mod optical_flow;
pub mod weights;

use std::fmt;
use std::str::FromStr;

use image::RgbImage;

use crate::error::SynthesisError;
use crate::video::frame::FramePair;

pub use blend::LinearBlend;
pub use learned::LearnedModelOperator;
pub use network::{FlowNetwork, NativeFlowNet};
pub use optical_flow::OpticalFlowBlendOperator;
pub use weights::ModelWeights;

/// Per-call synthesis settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisParams {
    /// Fractional position of the estimated frame between left (0) and right (1).
    pub timestep: f32,
    /// Analysis resolution factor. 1.0 is normal; 2.0 handles fast motion better
    /// at higher cost.
    pub scale: f32,
    /// Also run on horizontally mirrored inputs and average the two results.
    pub ensemble: bool,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            timestep: 0.5,
            scale: 1.0,
            ensemble: false,
        }
    }
}

/// Produces one intermediate frame from a pair.
///
/// Implementations must not mutate their inputs, must return a frame of the
/// pair's dimensions, and must be pure: the same inputs and params always give
/// the same output. They are shared across threads during a run.
pub trait SynthesisOperator: Send + Sync {
    fn name(&self) -> &'static str;

    fn synthesize(
        &self,
        pair: FramePair<'_>,
        params: &SynthesisParams,
    ) -> Result<RgbImage, SynthesisError>;
}

/// Reject pairs whose frames differ in size.
pub fn check_pair(pair: &FramePair<'_>) -> Result<(), SynthesisError> {
    if pair.same_dimensions() {
        return Ok(());
    }
    let (lw, lh) = pair.left.dimensions();
    let (rw, rh) = pair.right.dimensions();
    Err(SynthesisError::DimensionMismatch {
        expected: (lh as usize, lw as usize),
        actual: (rh as usize, rw as usize),
    })
}

/// Selects which operator a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatorKind {
    #[default]
    Learned,
    Flow,
    Blend,
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::Learned => write!(f, "learned"),
            OperatorKind::Flow => write!(f, "flow"),
            OperatorKind::Blend => write!(f, "blend"),
        }
    }
}

impl FromStr for OperatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "learned" | "model" => Ok(OperatorKind::Learned),
            "flow" => Ok(OperatorKind::Flow),
            "blend" => Ok(OperatorKind::Blend),
            other => Err(format!("unknown operator '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_pair_reports_both_sizes() {
        let a = RgbImage::new(4, 3);
        let b = RgbImage::new(5, 3);
        let err = check_pair(&FramePair::new(&a, &b)).unwrap_err();
        assert_eq!(
            err,
            SynthesisError::DimensionMismatch {
                expected: (3, 4),
                actual: (3, 5)
            }
        );
        assert!(check_pair(&FramePair::new(&a, &a)).is_ok());
    }

    #[test]
    fn operator_kind_parses() {
        assert_eq!("Flow".parse::<OperatorKind>().unwrap(), OperatorKind::Flow);
        assert_eq!(OperatorKind::default().to_string(), "learned");
        assert!("magic".parse::<OperatorKind>().is_err());
    }
}
