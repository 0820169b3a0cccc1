use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use super::frame::Frame;
use super::FrameSink;

/// Output settings fixed when the sink is opened.
#[derive(Debug, Clone)]
pub struct EncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub out_path: PathBuf,
    pub overwrite: bool,
}

impl EncodeConfig {
    pub fn new(out_path: impl Into<PathBuf>, width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            out_path: out_path.into(),
            overwrite: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("encode width/height must be non-zero");
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            bail!("encode fps must be positive, got {}", self.fps);
        }
        Ok(())
    }
}

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create output directory '{}'", parent.display())
            })?;
        }
    }
    Ok(())
}

/// Encodes frames by piping raw RGB24 data into the ffmpeg CLI.
///
/// The child is finalized on drop when [`FrameSink::close`] was never called,
/// so an aborted run still leaves a playable file behind.
pub struct FfmpegSink {
    cfg: EncodeConfig,
    child: Child,
    stdin: Option<ChildStdin>,
    frames_written: u64,
}

impl FfmpegSink {
    pub fn open(cfg: EncodeConfig) -> Result<Self> {
        cfg.validate()?;
        ensure_parent_dir(&cfg.out_path)?;

        if !cfg.overwrite && cfg.out_path.exists() {
            bail!("output file '{}' already exists", cfg.out_path.display());
        }

        if !is_ffmpeg_on_path() {
            bail!("ffmpeg is required for encoding, but was not found on PATH");
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.arg(if cfg.overwrite { "-y" } else { "-n" });

        cmd.args([
            "-loglevel", "error",
            "-f", "rawvideo",
            "-pix_fmt", "rgb24",
            "-s", &format!("{}x{}", cfg.width, cfg.height),
            "-r", &cfg.fps.to_string(),
            "-i", "pipe:0",
            "-an",
            // yuv420p needs even dimensions.
            "-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2",
            "-c:v", "libx264",
            "-pix_fmt", "yuv420p",
            "-movflags", "+faststart",
        ])
        .arg(&cfg.out_path);

        info!(
            out_path = ?cfg.out_path,
            width = cfg.width,
            height = cfg.height,
            fps = cfg.fps,
            "spawning ffmpeg encoder process"
        );

        let mut child = cmd
            .spawn()
            .context("failed to spawn ffmpeg (is ffmpeg installed?)")?;

        let stdin = child
            .stdin
            .take()
            .context("failed to open ffmpeg stdin")?;

        Ok(Self {
            cfg,
            child,
            stdin: Some(stdin),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finish(&mut self) -> Result<()> {
        let Some(stdin) = self.stdin.take() else {
            return Ok(());
        };
        drop(stdin);

        let status = self
            .child
            .wait()
            .context("failed to wait for ffmpeg to finish")?;

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = self.child.stderr.take() {
                use std::io::Read;
                let _ = pipe.read_to_string(&mut stderr);
            }
            error!(%status, stderr = stderr.trim(), "ffmpeg encoder failed");
            bail!("ffmpeg exited with status {status}: {}", stderr.trim());
        }

        info!(
            frames_written = self.frames_written,
            out_path = ?self.cfg.out_path,
            "video sink finalized"
        );
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.cfg.width || frame.height() != self.cfg.height {
            bail!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                self.cfg.width,
                self.cfg.height
            );
        }

        let stdin = self
            .stdin
            .as_mut()
            .context("ffmpeg encoder is already finalized")?;

        stdin
            .write_all(frame.image.as_raw())
            .context("failed to write frame to ffmpeg stdin")?;

        self.frames_written += 1;
        debug!(index = frame.index, "encoded frame");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.finish()
    }

    fn width(&self) -> u32 {
        self.cfg.width
    }

    fn height(&self) -> u32 {
        self.cfg.height
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            if let Err(e) = self.finish() {
                warn!(error = %e, "failed to finalize ffmpeg encoder on drop");
            }
        }
    }
}
