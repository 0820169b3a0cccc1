use std::fmt;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use tracing::{debug, info, warn};

const TEXT_SCALE: f32 = 28.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_MARGIN: i32 = 10;

/// Whether an emitted frame came from the source or was synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Original,
    Interpolated,
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKind::Original => write!(f, "original"),
            SampleKind::Interpolated => write!(f, "interpolated"),
        }
    }
}

/// Receives emitted frames for inspection.
///
/// `offset` is the frame's position within its source interval: 0 for an
/// original frame, `i / M` for the i-th synthesized one.
pub trait SampleExporter: Send {
    fn export(&mut self, frame: &RgbImage, offset: f64, kind: SampleKind) -> Result<()>;
}

/// Writes samples as numbered PNG files, optionally labelled with their kind and
/// offset.
pub struct PngSampleExporter {
    dir: PathBuf,
    font: Option<FontVec>,
    written: u32,
}

impl PngSampleExporter {
    /// Create the exporter, creating `dir` if needed.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create samples directory {}", dir.display()))?;
        info!(?dir, "samples directory ready");
        Ok(Self {
            dir: dir.to_path_buf(),
            font: None,
            written: 0,
        })
    }

    /// Draw labels with the font at `path`. An unreadable font disables labels.
    pub fn with_font(mut self, path: &Path) -> Self {
        self.font = load_font(path);
        self
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    fn draw_label(&self, img: &mut RgbImage, offset: f64, kind: SampleKind) {
        let Some(font) = &self.font else { return };
        let label = format!("{kind} t={offset:.3}");
        draw_text_mut(
            img,
            TEXT_COLOR,
            TEXT_MARGIN,
            TEXT_MARGIN,
            PxScale::from(TEXT_SCALE),
            font,
            &label,
        );
    }
}

/// File name for the `index`-th sample.
pub fn sample_file_name(index: u32, offset: f64, kind: SampleKind) -> String {
    format!("idx{index:04}_time{offset:.3}_{kind}.png")
}

impl SampleExporter for PngSampleExporter {
    fn export(&mut self, frame: &RgbImage, offset: f64, kind: SampleKind) -> Result<()> {
        let path = self.dir.join(sample_file_name(self.written, offset, kind));
        let saved = if self.font.is_some() {
            let mut img = frame.clone();
            self.draw_label(&mut img, offset, kind);
            img.save(&path)
        } else {
            frame.save(&path)
        };
        saved.with_context(|| format!("failed to save sample to {}", path.display()))?;

        self.written += 1;
        debug!(?path, "saved sample frame");
        Ok(())
    }
}

fn load_font(path: &Path) -> Option<FontVec> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!(?path, error = %e, "failed to read font file");
            return None;
        }
    };
    match FontVec::try_from_vec(data) {
        Ok(font) => {
            info!(?path, "loaded sample label font");
            Some(font)
        }
        Err(e) => {
            warn!(?path, error = %e, "failed to parse font file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn file_names_carry_index_offset_and_kind() {
        assert_eq!(
            sample_file_name(3, 0.25, SampleKind::Interpolated),
            "idx0003_time0.250_interpolated.png"
        );
        assert_eq!(
            sample_file_name(0, 0.0, SampleKind::Original),
            "idx0000_time0.000_original.png"
        );
    }

    #[test]
    fn export_writes_numbered_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let samples = dir.path().join("samples");
        let mut exporter = PngSampleExporter::new(&samples).unwrap();
        let img = RgbImage::from_pixel(6, 4, Rgb([10, 20, 30]));

        exporter.export(&img, 0.0, SampleKind::Original).unwrap();
        exporter.export(&img, 0.5, SampleKind::Interpolated).unwrap();
        assert_eq!(exporter.written(), 2);

        let reread = image::open(samples.join("idx0001_time0.500_interpolated.png"))
            .unwrap()
            .to_rgb8();
        assert_eq!(reread, img);
        assert!(samples.join("idx0000_time0.000_original.png").exists());
    }

    #[traced_test]
    #[test]
    fn missing_font_disables_labels() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = PngSampleExporter::new(dir.path())
            .unwrap()
            .with_font(&dir.path().join("missing.ttf"));
        assert!(exporter.font.is_none());
        assert!(logs_contain("failed to read font file"));
    }

    #[test]
    fn unwritable_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = PngSampleExporter::new(dir.path()).unwrap();
        std::fs::remove_dir_all(dir.path()).unwrap();
        let img = RgbImage::new(2, 2);
        assert!(exporter.export(&img, 0.0, SampleKind::Original).is_err());
    }
}
