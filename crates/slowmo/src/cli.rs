use std::path::PathBuf;

use clap::{Parser, Subcommand};

use slowmo_core::config::{PaddingMode, Quantization};
use slowmo_core::synthesis::OperatorKind;
use slowmo_core::warp::EdgeStrategy;

#[derive(Parser)]
#[command(name = "slowmo", about = "Recursive video frame interpolation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Raise the frame count of a video by a power-of-two factor.
    Interpolate {
        /// Path to the input video file (MP4, etc.).
        #[arg(short, long)]
        input: PathBuf,

        /// Path to write the interpolated video.
        #[arg(short, long)]
        output: PathBuf,

        /// Output frames per input interval (power of two).
        #[arg(short, long, default_value_t = 2)]
        multiplier: u32,

        /// Playback rate of the output. Defaults to the input rate (slow motion).
        #[arg(long)]
        output_fps: Option<f64>,

        /// Motion analysis resolution factor (0.25 to 4.0); 2.0 helps with fast motion.
        #[arg(long, default_value_t = 1.0)]
        scale: f32,

        /// Also run on mirrored frames and average the results.
        #[arg(long)]
        ensemble: bool,

        /// Synthesis operator: learned, flow or blend.
        #[arg(long, default_value_t = OperatorKind::Learned)]
        operator: OperatorKind,

        /// JSON weights for the learned operator. Defaults are used when absent.
        #[arg(long)]
        weights: Option<PathBuf>,

        /// Number of emitted frames to save as PNG samples (default: 20).
        #[arg(long)]
        samples: Option<usize>,

        /// Directory to write PNG samples to.
        #[arg(long)]
        samples_dir: Option<PathBuf>,

        /// TrueType font used to label samples.
        #[arg(long)]
        font: Option<PathBuf>,

        /// Path to write a length-delimited protobuf run report.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Expand the halves of each interval concurrently.
        #[arg(long)]
        parallel: bool,

        /// Model spatial alignment.
        #[arg(long, default_value_t = 64)]
        align: usize,

        /// Model padding mode: reflect, replicate or zero.
        #[arg(long, default_value_t = PaddingMode::Reflect)]
        padding: PaddingMode,

        /// Model output quantization: round or truncate.
        #[arg(long, default_value_t = Quantization::Round)]
        quantization: Quantization,

        /// Warp edge handling: border or clamped-zeros.
        #[arg(long, default_value_t = EdgeStrategy::Border)]
        edge: EdgeStrategy,
    },
}
