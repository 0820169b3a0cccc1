//! Backward warping: each output pixel is sampled bilinearly from the input at
//! `position + displacement`.
//!
//! Positions live on a normalized grid spanning [-1, 1] corner to corner. The
//! grid depends only on the spatial size, so each engine builds it once per
//! size and reuses it. The cache belongs to the engine instance; two engines
//! never share grids.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use ndarray::{Array3, ArrayView2};
use tracing::debug;

use crate::error::SynthesisError;
use crate::tensor::Tensor;

/// Edge handling for samples that land outside the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeStrategy {
    /// Clamp sample positions to the nearest edge pixel (border extension).
    #[default]
    Border,
    /// Clamp the normalized grid into [-1, 1], then sample with zero fill beyond
    /// the image. This emulates border extension for backends without it and is
    /// NOT numerically identical: clamping happens before denormalization, so
    /// rounding of the grid can differ from true border extension in the last
    /// bits at the edges.
    ClampedZeros,
}

impl fmt::Display for EdgeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeStrategy::Border => write!(f, "border"),
            EdgeStrategy::ClampedZeros => write!(f, "clamped-zeros"),
        }
    }
}

impl FromStr for EdgeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "border" => Ok(EdgeStrategy::Border),
            "clamped-zeros" | "clamped_zeros" | "clamp" => Ok(EdgeStrategy::ClampedZeros),
            other => Err(format!("unknown edge strategy '{other}'")),
        }
    }
}

/// Normalized sampling grid, `[2, H, W]` with x in channel 0 and y in channel 1.
type Grid = Array3<f32>;

fn linspace(n: usize) -> impl Fn(usize) -> f32 {
    move |i| {
        if n <= 1 {
            -1.0
        } else {
            -1.0 + 2.0 * i as f32 / (n - 1) as f32
        }
    }
}

fn build_grid(height: usize, width: usize) -> Grid {
    let gx = linspace(width);
    let gy = linspace(height);
    Array3::from_shape_fn((2, height, width), |(c, y, x)| if c == 0 { gx(x) } else { gy(y) })
}

/// Pixels per normalized unit along an axis of length `n`.
fn half_extent(n: usize) -> f32 {
    if n <= 1 {
        0.0
    } else {
        (n as f32 - 1.0) / 2.0
    }
}

pub struct WarpEngine {
    edge: EdgeStrategy,
    grids: Mutex<HashMap<(usize, usize), Arc<Grid>>>,
}

impl WarpEngine {
    pub fn new(edge: EdgeStrategy) -> Self {
        Self {
            edge,
            grids: Mutex::new(HashMap::new()),
        }
    }

    pub fn edge(&self) -> EdgeStrategy {
        self.edge
    }

    fn grid(&self, height: usize, width: usize) -> Arc<Grid> {
        let mut grids = self.grids.lock().unwrap_or_else(|e| e.into_inner());
        grids
            .entry((height, width))
            .or_insert_with(|| {
                debug!(height, width, "building warp grid");
                Arc::new(build_grid(height, width))
            })
            .clone()
    }

    /// Number of distinct grid sizes built so far.
    pub fn cached_grids(&self) -> usize {
        self.grids.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// Resample `input` (`[C, H, W]`) along `flow` (`[2, H, W]`, pixel units,
    /// x displacement in channel 0). The output has the input's shape.
    pub fn warp(&self, input: &Tensor, flow: &Tensor) -> Result<Tensor, SynthesisError> {
        let (channels, h, w) = input.dim();
        let (fc, fh, fw) = flow.dim();
        if fc != 2 || (fh, fw) != (h, w) {
            return Err(SynthesisError::DimensionMismatch {
                expected: (h, w),
                actual: (fh, fw),
            });
        }
        if h == 0 || w == 0 {
            return Ok(input.clone());
        }

        let grid = self.grid(h, w);
        let (hx, hy) = (half_extent(w), half_extent(h));
        let (limit, sample): (f32, Sampler) = match self.edge {
            EdgeStrategy::Border => (f32::INFINITY, sample_border as Sampler),
            EdgeStrategy::ClampedZeros => (1.0, sample_zeros as Sampler),
        };
        let planes: Vec<_> = input.outer_iter().collect();

        let mut out = Array3::zeros((channels, h, w));
        for y in 0..h {
            for x in 0..w {
                // Flow is in pixels; normalize before adding to the grid.
                let gx = grid[[0, y, x]] + if hx > 0.0 { flow[[0, y, x]] / hx } else { 0.0 };
                let gy = grid[[1, y, x]] + if hy > 0.0 { flow[[1, y, x]] / hy } else { 0.0 };
                let px = (gx.clamp(-limit, limit) + 1.0) * hx;
                let py = (gy.clamp(-limit, limit) + 1.0) * hy;
                for (c, plane) in planes.iter().enumerate() {
                    out[[c, y, x]] = sample(plane, py, px);
                }
            }
        }
        Ok(out)
    }
}

impl Default for WarpEngine {
    fn default() -> Self {
        Self::new(EdgeStrategy::Border)
    }
}

type Sampler = fn(&ArrayView2<f32>, f32, f32) -> f32;

fn bilinear(y: f32, x: f32, fetch: impl Fn(isize, isize) -> f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as isize, y0 as isize);

    let v00 = fetch(y0, x0);
    let v01 = fetch(y0, x0 + 1);
    let v10 = fetch(y0 + 1, x0);
    let v11 = fetch(y0 + 1, x0 + 1);

    v00 * (1.0 - fx) * (1.0 - fy) + v01 * fx * (1.0 - fy) + v10 * (1.0 - fx) * fy + v11 * fx * fy
}

fn sample_border(plane: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = plane.dim();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    bilinear(y, x, |yy, xx| {
        let yy = yy.clamp(0, h as isize - 1) as usize;
        let xx = xx.clamp(0, w as isize - 1) as usize;
        plane[[yy, xx]]
    })
}

fn sample_zeros(plane: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = plane.dim();
    bilinear(y, x, |yy, xx| {
        if yy < 0 || xx < 0 || yy >= h as isize || xx >= w as isize {
            0.0
        } else {
            plane[[yy as usize, xx as usize]]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(h: usize, w: usize) -> Tensor {
        Array3::from_shape_fn((3, h, w), |(c, y, x)| {
            ((c * 31 + y * 7 + x * 13) % 17) as f32 / 16.0
        })
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(p, q)| (p - q).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn zero_flow_is_identity() {
        let input = pattern(9, 13);
        let flow = Array3::zeros((2, 9, 13));
        for edge in [EdgeStrategy::Border, EdgeStrategy::ClampedZeros] {
            let out = WarpEngine::new(edge).warp(&input, &flow).unwrap();
            assert_eq!(out.dim(), input.dim());
            assert!(max_abs_diff(&out, &input) < 1e-4, "{edge} drifted");
        }
    }

    #[test]
    fn integer_shift_samples_neighbor() {
        let input = pattern(6, 8);
        let mut flow = Array3::zeros((2, 6, 8));
        flow.index_axis_mut(ndarray::Axis(0), 0).fill(1.0);
        let out = WarpEngine::default().warp(&input, &flow).unwrap();
        for y in 0..6 {
            for x in 0..7 {
                assert!((out[[0, y, x]] - input[[0, y, x + 1]]).abs() < 1e-4);
            }
            // Past the right edge the last column is reused.
            assert!((out[[0, y, 7]] - input[[0, y, 7]]).abs() < 1e-4);
        }
    }

    #[test]
    fn half_pixel_shift_averages_neighbors() {
        let input = Array3::from_shape_fn((1, 1, 4), |(_, _, x)| x as f32);
        let mut flow = Array3::zeros((2, 1, 4));
        flow[[0, 0, 1]] = 0.5;
        let out = WarpEngine::default().warp(&input, &flow).unwrap();
        assert!((out[[0, 0, 1]] - 1.5).abs() < 1e-4);
    }

    #[test]
    fn huge_displacement_stays_in_bounds() {
        let input = pattern(5, 5);
        let mut flow = Array3::from_elem((2, 5, 5), 1.0e6f32);
        flow[[0, 2, 2]] = -1.0e6;
        flow[[1, 0, 0]] = f32::NAN;
        for edge in [EdgeStrategy::Border, EdgeStrategy::ClampedZeros] {
            let out = WarpEngine::new(edge).warp(&input, &flow).unwrap();
            assert_eq!(out.dim(), input.dim());
            // Bottom-right corner is reused for everything pushed past the far edge.
            assert!((out[[1, 4, 0]] - input[[1, 4, 4]]).abs() < 1e-4);
        }
    }

    #[test]
    fn every_channel_follows_the_engine_edge_strategy() {
        let input = pattern(4, 6);
        let flow = Array3::from_shape_fn((2, 4, 6), |(c, _, _)| if c == 0 { -20.0 } else { 0.5 });
        for edge in [EdgeStrategy::Border, EdgeStrategy::ClampedZeros] {
            let engine = WarpEngine::new(edge);
            assert_eq!(engine.edge(), edge);
            let out = engine.warp(&input, &flow).unwrap();
            for c in 0..3 {
                // Pushed past the left edge, half a row down.
                let expected = (input[[c, 1, 0]] + input[[c, 2, 0]]) / 2.0;
                assert!((out[[c, 1, 3]] - expected).abs() < 1e-4, "{edge} channel {c}");
            }
        }
    }

    #[test]
    fn mismatched_flow_is_rejected() {
        let input = pattern(4, 4);
        let flow = Array3::zeros((2, 4, 5));
        let err = WarpEngine::default().warp(&input, &flow).unwrap_err();
        assert!(matches!(err, SynthesisError::DimensionMismatch { .. }));
    }

    #[test]
    fn grid_is_built_once_per_size() {
        let engine = WarpEngine::default();
        let flow = Array3::zeros((2, 4, 4));
        engine.warp(&pattern(4, 4), &flow).unwrap();
        engine.warp(&pattern(4, 4), &flow).unwrap();
        assert_eq!(engine.cached_grids(), 1);
        engine.warp(&pattern(3, 3), &Array3::zeros((2, 3, 3))).unwrap();
        assert_eq!(engine.cached_grids(), 2);
    }

    #[test]
    fn single_pixel_image_is_stable() {
        let input = Array3::from_elem((3, 1, 1), 0.4f32);
        let flow = Array3::from_elem((2, 1, 1), 3.0f32);
        let out = WarpEngine::default().warp(&input, &flow).unwrap();
        assert!((out[[2, 0, 0]] - 0.4).abs() < 1e-6);
    }
}
