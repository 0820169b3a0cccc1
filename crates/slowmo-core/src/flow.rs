//! Dense optical flow by coarse-to-fine block matching over a luma pyramid.
//!
//! The returned field `d` satisfies `a(p) ≈ b(p + d(p))`, in pixels, with the
//! x component in channel 0. Vectors are integer-valued.

use ndarray::{Array2, Array3};
use tracing::debug;

use crate::tensor::Tensor;

/// Penalty per pixel of candidate offset, so flat regions settle on zero motion.
const MOTION_PENALTY: f32 = 1e-3;

/// Smallest pyramid level side worth matching on.
const MIN_LEVEL_SIDE: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct FlowEstimator {
    /// Search radius at the coarsest level, in that level's pixels.
    pub search_radius: usize,
    /// Half-size of the matching window.
    pub patch_radius: usize,
}

impl Default for FlowEstimator {
    fn default() -> Self {
        Self {
            search_radius: 4,
            patch_radius: 1,
        }
    }
}

impl FlowEstimator {
    /// Estimate the field from `a` to `b`. `scale` follows the model convention:
    /// the coarsest level is downsampled by `4 / scale`, so larger values analyze
    /// at higher resolution.
    pub fn estimate(&self, a: &Tensor, b: &Tensor, scale: f32) -> Tensor {
        let (_, h, w) = a.dim();
        let levels = pyramid_levels(scale, h, w);

        let mut pa = vec![luma(a)];
        let mut pb = vec![luma(b)];
        for _ in 1..levels {
            let next_a = downsample(&pa[pa.len() - 1]);
            let next_b = downsample(&pb[pb.len() - 1]);
            pa.push(next_a);
            pb.push(next_b);
        }

        let (ch, cw) = pa[levels - 1].dim();
        let mut flow = Array3::zeros((2, ch, cw));
        for level in (0..levels).rev() {
            let (lh, lw) = pa[level].dim();
            let radius = if level == levels - 1 {
                self.search_radius
            } else {
                flow = upsample_flow(&flow, lh, lw);
                1
            };
            refine(&pa[level], &pb[level], &mut flow, radius, self.patch_radius);
        }

        debug!(levels, height = h, width = w, scale, "flow estimated");
        flow
    }
}

/// Pyramid depth for `scale`, capped so the coarsest level stays matchable.
fn pyramid_levels(scale: f32, h: usize, w: usize) -> usize {
    let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
    let factor = (4.0 / scale).max(1.0);
    let mut levels = (1 + factor.log2().round() as usize).min(usize::BITS as usize);
    let side_at = |levels: usize| h.min(w).checked_shr(levels as u32 - 1).unwrap_or(0);
    while levels > 1 && side_at(levels) < MIN_LEVEL_SIDE {
        levels -= 1;
    }
    levels
}

/// Rec. 601 luma of a `[3, H, W]` tensor.
fn luma(t: &Tensor) -> Array2<f32> {
    let (_, h, w) = t.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        0.299 * t[[0, y, x]] + 0.587 * t[[1, y, x]] + 0.114 * t[[2, y, x]]
    })
}

/// 2x2 box downsample; odd edges average what exists.
fn downsample(img: &Array2<f32>) -> Array2<f32> {
    let (h, w) = img.dim();
    let (nh, nw) = (h.div_ceil(2), w.div_ceil(2));
    Array2::from_shape_fn((nh, nw), |(y, x)| {
        let mut sum = 0.0;
        let mut n = 0.0;
        for yy in (2 * y)..(2 * y + 2).min(h) {
            for xx in (2 * x)..(2 * x + 2).min(w) {
                sum += img[[yy, xx]];
                n += 1.0;
            }
        }
        sum / n
    })
}

fn upsample_flow(flow: &Tensor, h: usize, w: usize) -> Tensor {
    let (_, fh, fw) = flow.dim();
    Array3::from_shape_fn((2, h, w), |(c, y, x)| {
        2.0 * flow[[c, (y / 2).min(fh - 1), (x / 2).min(fw - 1)]]
    })
}

fn at_clamped(img: &Array2<f32>, y: isize, x: isize) -> f32 {
    let (h, w) = img.dim();
    img[[y.clamp(0, h as isize - 1) as usize, x.clamp(0, w as isize - 1) as usize]]
}

fn patch_cost(a: &Array2<f32>, b: &Array2<f32>, y: isize, x: isize, dy: isize, dx: isize, r: isize) -> f32 {
    let mut cost = 0.0;
    for py in -r..=r {
        for px in -r..=r {
            cost += (at_clamped(a, y + py, x + px) - at_clamped(b, y + py + dy, x + px + dx)).abs();
        }
    }
    cost
}

/// Search `radius` around the current vector at every pixel and keep the best match.
fn refine(a: &Array2<f32>, b: &Array2<f32>, flow: &mut Tensor, radius: usize, patch_radius: usize) {
    let (h, w) = a.dim();
    let r = radius as isize;
    let pr = patch_radius as isize;
    for y in 0..h {
        for x in 0..w {
            let cx = flow[[0, y, x]] as isize;
            let cy = flow[[1, y, x]] as isize;
            let (yi, xi) = (y as isize, x as isize);

            let mut best = (cx, cy);
            let mut best_cost = patch_cost(a, b, yi, xi, cy, cx, pr)
                + MOTION_PENALTY * (cx.abs() + cy.abs()) as f32;
            for oy in -r..=r {
                for ox in -r..=r {
                    if ox == 0 && oy == 0 {
                        continue;
                    }
                    let (dx, dy) = (cx + ox, cy + oy);
                    let cost = patch_cost(a, b, yi, xi, dy, dx, pr)
                        + MOTION_PENALTY * (dx.abs() + dy.abs()) as f32;
                    if cost < best_cost {
                        best_cost = cost;
                        best = (dx, dy);
                    }
                }
            }
            flow[[0, y, x]] = best.0 as f32;
            flow[[1, y, x]] = best.1 as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smooth, non-repeating texture sampled at continuous coordinates.
    fn texture(x: f32, y: f32) -> f32 {
        0.5 + 0.25 * (0.45 * x).sin() + 0.2 * (0.5 * y + 0.2 * x).cos()
    }

    fn shifted(h: usize, w: usize, shift_x: f32) -> Tensor {
        Array3::from_shape_fn((3, h, w), |(_, y, x)| texture(x as f32 - shift_x, y as f32))
    }

    #[test]
    fn identical_frames_have_zero_flow() {
        let a = shifted(24, 24, 0.0);
        let flow = FlowEstimator::default().estimate(&a, &a, 1.0);
        assert!(flow.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn recovers_global_translation() {
        let a = shifted(32, 32, 0.0);
        let b = shifted(32, 32, 2.0);
        let flow = FlowEstimator::default().estimate(&a, &b, 2.0);
        for y in 4..28 {
            for x in 4..26 {
                assert_eq!(flow[[0, y, x]], 2.0, "dx at ({x},{y})");
                assert_eq!(flow[[1, y, x]], 0.0, "dy at ({x},{y})");
            }
        }
    }

    #[test]
    fn level_count_follows_scale_and_size() {
        assert_eq!(pyramid_levels(1.0, 256, 256), 3);
        assert_eq!(pyramid_levels(2.0, 256, 256), 2);
        assert_eq!(pyramid_levels(4.0, 256, 256), 1);
        assert_eq!(pyramid_levels(0.5, 256, 256), 4);
        assert_eq!(pyramid_levels(1.0, 12, 200), 1);
        assert_eq!(pyramid_levels(f32::NAN, 256, 256), 3);
    }

    #[test]
    fn tiny_scale_is_capped_by_frame_size() {
        assert_eq!(pyramid_levels(1e-25, 16, 16), 2);
        assert_eq!(pyramid_levels(f32::MIN_POSITIVE, 4, 4), 1);

        let a = shifted(16, 16, 0.0);
        let flow = FlowEstimator::default().estimate(&a, &a, 1e-25);
        assert!(flow.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn downsample_handles_odd_sizes() {
        let img = Array2::from_shape_fn((3, 3), |(y, x)| (y * 3 + x) as f32);
        let d = downsample(&img);
        assert_eq!(d.dim(), (2, 2));
        assert_eq!(d[[1, 1]], 8.0);
        assert_eq!(d[[0, 0]], 2.0);
    }
}
