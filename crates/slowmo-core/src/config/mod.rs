pub mod contract;

pub use contract::{ModelContract, PaddingMode, Quantization};
