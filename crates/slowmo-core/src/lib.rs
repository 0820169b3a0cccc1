pub mod assembler;
pub mod cancel;
pub mod config;
pub mod error;
pub mod flow;
pub mod progress;
pub mod sample;
pub mod synthesis;
pub mod tensor;
pub mod video;
pub mod warp;

pub use assembler::{InterpolationConfig, RecursiveAssembler, RunStatistics};
pub use cancel::CancellationToken;
pub use error::{RunError, SynthesisError};
