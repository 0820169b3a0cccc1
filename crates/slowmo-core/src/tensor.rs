//! Conversions between 8-bit RGB images and planar `[C, H, W]` float tensors.

use image::RgbImage;
use ndarray::{s, Array3};

use crate::config::{PaddingMode, Quantization};

/// Planar image tensor, `[channels, height, width]`, samples nominally in [0, 1].
pub type Tensor = Array3<f32>;

pub fn image_to_tensor(image: &RgbImage) -> Tensor {
    let (w, h) = image.dimensions();
    Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| {
        image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Convert a 3-channel tensor back to an image. Values outside [0, 1] are clamped.
pub fn tensor_to_image(t: &Tensor, quantization: Quantization) -> RgbImage {
    let (_, h, w) = t.dim();
    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        image::Rgb([
            quantization.to_u8(t[[0, y, x]]),
            quantization.to_u8(t[[1, y, x]]),
            quantization.to_u8(t[[2, y, x]]),
        ])
    })
}

/// Mirror index `i` into `[0, n)` without repeating the edge sample.
fn reflect_index(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - m) as usize
    }
}

/// Extend the bottom and right edges of `t` to `height` x `width`.
pub fn pad(t: &Tensor, height: usize, width: usize, mode: PaddingMode) -> Tensor {
    let (c, h, w) = t.dim();
    if h == height && w == width {
        return t.clone();
    }
    Array3::from_shape_fn((c, height, width), |(ch, y, x)| {
        if y < h && x < w {
            return t[[ch, y, x]];
        }
        match mode {
            PaddingMode::Zero => 0.0,
            PaddingMode::Replicate => t[[ch, y.min(h - 1), x.min(w - 1)]],
            PaddingMode::Reflect => {
                t[[ch, reflect_index(y as isize, h), reflect_index(x as isize, w)]]
            }
        }
    })
}

/// Keep the top-left `height` x `width` region.
pub fn crop(t: &Tensor, height: usize, width: usize) -> Tensor {
    t.slice(s![.., ..height, ..width]).to_owned()
}

pub fn flip_horizontal(t: &Tensor) -> Tensor {
    t.slice(s![.., .., ..;-1]).to_owned()
}

pub fn all_finite(t: &Tensor) -> bool {
    t.iter().all(|v| v.is_finite())
}
