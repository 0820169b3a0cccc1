mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use prost::Message;
use tracing::{info, warn};

use slowmo_core::config::ModelContract;
use slowmo_core::progress::LoggingProgress;
use slowmo_core::sample::PngSampleExporter;
use slowmo_core::synthesis::{
    LearnedModelOperator, LinearBlend, OperatorKind, OpticalFlowBlendOperator, SynthesisOperator,
};
use slowmo_core::video::decoder::FfmpegSource;
use slowmo_core::video::encoder::{EncodeConfig, FfmpegSink};
use slowmo_core::video::FrameSource;
use slowmo_core::warp::{EdgeStrategy, WarpEngine};
use slowmo_core::{InterpolationConfig, RecursiveAssembler, RunError, RunStatistics};
use slowmo_proto::proto::{ModelContractInfo, RunReport};

const DEFAULT_SAMPLE_LIMIT: usize = 20;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Interpolate {
            input,
            output,
            multiplier,
            output_fps,
            scale,
            ensemble,
            operator,
            weights,
            samples,
            samples_dir,
            font,
            report,
            parallel,
            align,
            padding,
            quantization,
            edge,
        } => {
            info!(?input, ?output, multiplier, %operator, "starting interpolation");

            if !input.exists() {
                return Err(RunError::config(format!(
                    "input video does not exist: {}",
                    input.display()
                ))
                .into());
            }
            if samples.is_some_and(|k| k > 0) && samples_dir.is_none() {
                return Err(RunError::config("--samples requires --samples-dir").into());
            }

            let config = InterpolationConfig {
                multiplier,
                scale,
                ensemble,
                parallel,
                sample_limit: samples.unwrap_or(DEFAULT_SAMPLE_LIMIT),
                output_fps,
            };
            config.validate()?;

            let contract = ModelContract {
                alignment: align,
                padding,
                quantization,
            };
            let synthesis = build_operator(operator, weights.as_deref(), contract, edge);

            let source = FfmpegSource::open(&input)
                .map_err(RunError::Source)
                .context("failed to open input video")?;
            let fps = output_fps.unwrap_or(source.fps());
            let sink = FfmpegSink::open(EncodeConfig::new(
                &output,
                source.width(),
                source.height(),
                fps,
            ))
            .map_err(RunError::Sink)
            .context("failed to open output video")?;

            let mut assembler = RecursiveAssembler::new(config.clone(), synthesis, sink)?
                .with_progress(LoggingProgress::new());
            if let Some(dir) = &samples_dir {
                let mut exporter = PngSampleExporter::new(dir)?;
                if let Some(font) = &font {
                    exporter = exporter.with_font(font);
                }
                assembler = assembler.with_sampler(exporter);
            }

            let stats = assembler.run(source).context("interpolation failed")?;

            if stats.fallbacks > 0 {
                warn!(
                    fallbacks = stats.fallbacks,
                    synthesis_calls = stats.synthesis_calls,
                    "some frames were blended instead of synthesized"
                );
            }

            if let Some(report_path) = &report {
                let run = RunReport {
                    input_path: input.to_string_lossy().into_owned(),
                    output_path: output.to_string_lossy().into_owned(),
                    operator: operator.to_string(),
                    multiplier: config.multiplier,
                    scale: config.scale,
                    ensemble: config.ensemble,
                    contract: (operator == OperatorKind::Learned).then(|| ModelContractInfo {
                        alignment: contract.alignment as u32,
                        padding: contract.padding.to_string(),
                        quantization: contract.quantization.to_string(),
                        edge: edge.to_string(),
                    }),
                    ..report_from_stats(&stats)
                };
                write_report(&run, report_path)?;
            }

            info!(
                frames_written = stats.frames_written,
                success = stats.success,
                elapsed_seconds = stats.elapsed.as_secs_f64(),
                ?output,
                "interpolation complete"
            );

            Ok(())
        }
    }
}

fn build_operator(
    kind: OperatorKind,
    weights: Option<&Path>,
    contract: ModelContract,
    edge: EdgeStrategy,
) -> Arc<dyn SynthesisOperator> {
    match kind {
        OperatorKind::Learned => {
            info!(?weights, ?contract, %edge, "building learned operator");
            Arc::new(LearnedModelOperator::from_weights_file(
                weights,
                contract,
                WarpEngine::new(edge),
            ))
        }
        OperatorKind::Flow => {
            if weights.is_some() {
                warn!("--weights is ignored by the flow operator");
            }
            Arc::new(OpticalFlowBlendOperator::new(WarpEngine::new(edge)))
        }
        OperatorKind::Blend => Arc::new(LinearBlend),
    }
}

fn report_from_stats(stats: &RunStatistics) -> RunReport {
    RunReport {
        input_fps: stats.input_fps,
        output_fps: stats.output_fps,
        frames_read: stats.frames_read,
        frames_written: stats.frames_written,
        frames_interpolated: stats.frames_interpolated,
        samples_exported: stats.samples_exported,
        fallbacks: stats.fallbacks,
        synthesis_calls: stats.synthesis_calls,
        elapsed_seconds: stats.elapsed.as_secs_f64(),
        success: stats.success,
        cancelled: stats.cancelled,
        ..RunReport::default()
    }
}

/// Serialize the run report as length-delimited protobuf and write to file.
fn write_report(report: &RunReport, output: &Path) -> Result<()> {
    info!(?output, "writing run report");

    let mut buf = Vec::new();
    report
        .encode_length_delimited(&mut buf)
        .context("failed to encode RunReport")?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).context("failed to create report directory")?;
    }

    std::fs::write(output, &buf)
        .with_context(|| format!("failed to write {}", output.display()))?;

    info!(?output, bytes = buf.len(), "run report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn report_carries_run_statistics() {
        let stats = RunStatistics {
            frames_read: 5,
            frames_written: 9,
            frames_interpolated: 4,
            fallbacks: 1,
            elapsed: Duration::from_millis(1500),
            success: true,
            input_fps: 30.0,
            output_fps: 30.0,
            ..RunStatistics::default()
        };
        let report = report_from_stats(&stats);
        assert_eq!(report.frames_written, 9);
        assert_eq!(report.fallbacks, 1);
        assert!((report.elapsed_seconds - 1.5).abs() < 1e-9);
        assert!(report.success && !report.cancelled);
    }

    #[test]
    fn written_report_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.pb");
        let report = RunReport {
            operator: "blend".into(),
            multiplier: 2,
            ..RunReport::default()
        };
        write_report(&report, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let decoded = RunReport::decode_length_delimited(bytes.as_slice()).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn every_operator_kind_builds() {
        for kind in [OperatorKind::Learned, OperatorKind::Flow, OperatorKind::Blend] {
            let op = build_operator(kind, None, ModelContract::default(), EdgeStrategy::Border);
            assert_eq!(op.name(), kind.to_string());
        }
    }
}
