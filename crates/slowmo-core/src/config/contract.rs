use std::fmt;
use std::str::FromStr;

/// How a tensor is extended to the model's required alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingMode {
    /// Mirror interior samples without repeating the edge (`dcb|abcd|cba`).
    #[default]
    Reflect,
    /// Repeat the edge sample (`aaa|abcd|ddd`).
    Replicate,
    /// Fill with zeros. Biases flow estimates near the padded border.
    Zero,
}

/// How continuous model output is converted back to 8-bit samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quantization {
    /// Round to nearest, which avoids the banding truncation produces.
    #[default]
    Round,
    Truncate,
}

impl Quantization {
    /// Convert a normalized sample in [0, 1] to u8, clamping out-of-range values.
    pub fn to_u8(self, v: f32) -> u8 {
        let scaled = (v * 255.0).clamp(0.0, 255.0);
        match self {
            Quantization::Round => scaled.round() as u8,
            Quantization::Truncate => scaled as u8,
        }
    }
}

/// Model-specific tensor contract. These vary between model releases and must
/// be pinned per weights file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelContract {
    /// Spatial extent is padded up to a multiple of this.
    pub alignment: usize,
    pub padding: PaddingMode,
    pub quantization: Quantization,
}

impl Default for ModelContract {
    fn default() -> Self {
        Self {
            alignment: 64,
            padding: PaddingMode::Reflect,
            quantization: Quantization::Round,
        }
    }
}

impl ModelContract {
    /// Padded size of a dimension under this contract.
    pub fn aligned(&self, n: usize) -> usize {
        let align = self.alignment.max(1);
        n.div_ceil(align) * align
    }
}

impl fmt::Display for PaddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaddingMode::Reflect => write!(f, "reflect"),
            PaddingMode::Replicate => write!(f, "replicate"),
            PaddingMode::Zero => write!(f, "zero"),
        }
    }
}

impl FromStr for PaddingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reflect" => Ok(PaddingMode::Reflect),
            "replicate" | "edge" => Ok(PaddingMode::Replicate),
            "zero" | "zeros" => Ok(PaddingMode::Zero),
            other => Err(format!("unknown padding mode '{other}'")),
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantization::Round => write!(f, "round"),
            Quantization::Truncate => write!(f, "truncate"),
        }
    }
}

impl FromStr for Quantization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "round" => Ok(Quantization::Round),
            "truncate" | "trunc" => Ok(Quantization::Truncate),
            other => Err(format!("unknown quantization '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_rounds_up_to_multiple() {
        let c = ModelContract::default();
        assert_eq!(c.aligned(64), 64);
        assert_eq!(c.aligned(65), 128);
        assert_eq!(c.aligned(1), 64);
        let c = ModelContract {
            alignment: 32,
            ..c
        };
        assert_eq!(c.aligned(720), 736);
    }

    #[test]
    fn rounding_beats_truncation() {
        assert_eq!(Quantization::Round.to_u8(0.999), 255);
        assert_eq!(Quantization::Truncate.to_u8(0.999), 254);
        assert_eq!(Quantization::Round.to_u8(-0.2), 0);
        assert_eq!(Quantization::Round.to_u8(1.7), 255);
    }

    #[test]
    fn parse_round_trips_display() {
        for m in [PaddingMode::Reflect, PaddingMode::Replicate, PaddingMode::Zero] {
            assert_eq!(m.to_string().parse::<PaddingMode>().unwrap(), m);
        }
        assert_eq!("TRUNCATE".parse::<Quantization>().unwrap(), Quantization::Truncate);
        assert!("bogus".parse::<PaddingMode>().is_err());
    }
}
