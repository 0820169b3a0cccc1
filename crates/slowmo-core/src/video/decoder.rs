use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::frame::Frame;
use super::FrameSource;

/// Video metadata obtained by probing with ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: Option<u64>,
}

pub fn probe(path: &Path) -> Result<ProbeResult> {
    info!(?path, "probing video metadata with ffprobe");

    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate,nb_frames",
            "-of", "csv=p=0",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe (is ffmpeg installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe failed");
        bail!("ffprobe failed: {stderr}");
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let result = parse_probe_output(&stdout)?;

    if result.fps <= 0.0 {
        warn!(fps = result.fps, ?path, "video has non-positive fps, timestamps will be 0.0");
    }

    info!(
        width = result.width,
        height = result.height,
        fps = result.fps,
        frame_count = ?result.frame_count,
        "probe completed"
    );
    Ok(result)
}

/// Parse ffprobe csv output of the form `width,height,num/den[,nb_frames]`.
fn parse_probe_output(stdout: &str) -> Result<ProbeResult> {
    let parts: Vec<&str> = stdout.trim().split(',').collect();
    if parts.len() < 3 {
        error!(%stdout, "unexpected ffprobe output format, expected width,height,fps");
        bail!("unexpected ffprobe output: {stdout}");
    }

    let width: u32 = parts[0].parse().context("failed to parse width")?;
    let height: u32 = parts[1].parse().context("failed to parse height")?;

    let fps = if let Some((num, den)) = parts[2].split_once('/') {
        let num: f64 = num.parse().context("failed to parse fps numerator")?;
        let den: f64 = den.parse().context("failed to parse fps denominator")?;
        if den > 0.0 { num / den } else { 0.0 }
    } else {
        parts[2].parse().context("failed to parse fps")?
    };

    // Containers without an index report "N/A".
    let frame_count = parts.get(3).and_then(|s| s.trim().parse::<u64>().ok());

    Ok(ProbeResult {
        width,
        height,
        fps,
        frame_count,
    })
}

/// Decodes video frames by piping raw RGB24 data from the ffmpeg CLI.
pub struct FfmpegSource {
    child: Child,
    width: u32,
    height: u32,
    fps: f64,
    frame_count: Option<u64>,
    frames_read: u64,
    frame_bytes: usize,
}

impl FfmpegSource {
    /// Open a video file for decoding.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("video file does not exist: {}", path.display());
        }

        let info = probe(path)?;
        if info.width == 0 || info.height == 0 {
            bail!("invalid video dimensions: {}x{}", info.width, info.height);
        }

        info!(?path, "spawning ffmpeg decoder process");

        let child = Command::new("ffmpeg")
            .args(["-i"])
            .arg(path)
            .args([
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "-an",
                "-v", "error",
                "pipe:1",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn ffmpeg (is ffmpeg installed?)")?;

        let frame_bytes = (info.width as usize) * (info.height as usize) * 3;

        info!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            frame_bytes,
            "video source opened"
        );

        Ok(Self {
            child,
            width: info.width,
            height: info.height,
            fps: info.fps,
            frame_count: info.frame_count,
            frames_read: 0,
            frame_bytes,
        })
    }
}

impl FfmpegSource {
    /// Reap ffmpeg after its stdout closed. An early exit on a bad input also
    /// closes stdout at a frame boundary, so only the exit status tells the two apart.
    fn finish_stream(&mut self) -> Result<()> {
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        let status = self
            .child
            .wait()
            .context("failed to wait for ffmpeg decoder to exit")?;
        check_decoder_exit(status.code(), &stderr).inspect_err(|e| {
            error!(%status, frames_read = self.frames_read, error = %e, "ffmpeg decoder failed");
        })
    }
}

/// Map the decoder's exit code and stderr to a result. `None` means the
/// process was terminated by a signal.
fn check_decoder_exit(code: Option<i32>, stderr: &str) -> Result<()> {
    match code {
        Some(0) => Ok(()),
        Some(code) => bail!("ffmpeg decoder exited with code {code}: {}", stderr.trim()),
        None => bail!("ffmpeg decoder was terminated by a signal: {}", stderr.trim()),
    }
}

impl FrameSource for FfmpegSource {
    /// Read the next frame from the ffmpeg pipe, or `None` if the video is finished.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let stdout = self
            .child
            .stdout
            .as_mut()
            .context("ffmpeg stdout not available")?;

        let mut buf = vec![0u8; self.frame_bytes];
        let mut read = 0;

        while read < self.frame_bytes {
            match stdout.read(&mut buf[read..]) {
                Ok(0) => {
                    if read == 0 {
                        self.finish_stream()?;
                        info!(total_frames = self.frames_read, "video stream ended");
                        return Ok(None);
                    }
                    error!(
                        read_bytes = read,
                        expected_bytes = self.frame_bytes,
                        frame = self.frames_read,
                        "ffmpeg stream ended mid-frame"
                    );
                    bail!(
                        "ffmpeg stream ended mid-frame (read {read}/{} bytes)",
                        self.frame_bytes,
                    );
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(frame = self.frames_read, %e, "failed to read from ffmpeg pipe");
                    return Err(e).context("failed to read from ffmpeg pipe");
                }
            }
        }

        let image = RgbImage::from_raw(self.width, self.height, buf)
            .context("failed to create RgbImage from raw frame data")?;

        let frame = Frame::new(image, self.frames_read, self.fps);
        self.frames_read += 1;

        debug!(
            index = frame.index,
            timestamp_seconds = frame.timestamp_seconds,
            "decoded frame"
        );

        Ok(Some(frame))
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        info!(total_frames = self.frames_read, "closing video source");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_rate_and_frame_count() {
        let p = parse_probe_output("1920,1080,30000/1001,240\n").unwrap();
        assert_eq!(p.width, 1920);
        assert_eq!(p.height, 1080);
        assert!((p.fps - 29.97).abs() < 0.01);
        assert_eq!(p.frame_count, Some(240));
    }

    #[test]
    fn missing_frame_count_is_none() {
        let p = parse_probe_output("640,360,25/1,N/A").unwrap();
        assert_eq!(p.fps, 25.0);
        assert_eq!(p.frame_count, None);

        let p = parse_probe_output("640,360,24").unwrap();
        assert_eq!(p.fps, 24.0);
        assert_eq!(p.frame_count, None);
    }

    #[test]
    fn zero_denominator_yields_zero_fps() {
        let p = parse_probe_output("640,360,0/0,10").unwrap();
        assert_eq!(p.fps, 0.0);
    }

    #[test]
    fn rejects_truncated_output() {
        assert!(parse_probe_output("640,360").is_err());
    }

    #[test]
    fn clean_decoder_exit_is_end_of_stream() {
        assert!(check_decoder_exit(Some(0), "").is_ok());
    }

    #[test]
    fn failed_decoder_exit_keeps_diagnostics() {
        let err = check_decoder_exit(Some(1), "clip.mp4: Invalid data found when processing input\n")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("code 1"), "{msg}");
        assert!(msg.contains("Invalid data found"), "{msg}");

        let err = check_decoder_exit(None, "").unwrap_err();
        assert!(err.to_string().contains("terminated by a signal"));
    }

    #[test]
    fn open_missing_file_fails() {
        let err = FfmpegSource::open(Path::new("/nonexistent/clip.mp4"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("does not exist"));
    }
}
