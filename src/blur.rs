//! Blur engine seam and the CPU Gaussian implementation
//!
//! Large-sigma blurs are the reason the pipeline carries a multi-pass
//! rescaler; the engine itself only ever sees modest sigmas and a decal
//! source. The seam is a registry lookup by color type so GPU backends can
//! substitute their own kernels.

use std::sync::Arc;

use crate::color::{pack_premul, ColorType, TRANSPARENT_PREMUL};
use crate::geometry::{IRect, Size};
use crate::image::SpecialImage;
use crate::sampling::TileMode;
use crate::shader::tile_index;
use crate::surface::new_surface_pixmap;

/// Thread-safe registry of blur algorithms, looked up per color type.
pub trait BlurEngine: Send + Sync {
  fn find_algorithm(&self, sigma: Size, color_type: ColorType) -> Option<&dyn BlurAlgorithm>;
}

/// One blur implementation.
pub trait BlurAlgorithm: Send + Sync {
  /// The largest per-axis sigma this algorithm accepts; callers rescale
  /// input to stay below it.
  fn max_sigma(&self) -> f32;

  /// Blurs `src_bounds` of `src` (tiled per `tile_mode`) and returns the
  /// pixels of `dst_bounds`. Both rectangles are in the image's local
  /// coordinates; the output image is `dst_bounds`-sized. `None` when the
  /// output cannot be allocated.
  fn blur(
    &self,
    sigma: Size,
    src: &SpecialImage,
    src_bounds: IRect,
    tile_mode: TileMode,
    dst_bounds: IRect,
  ) -> Option<Arc<SpecialImage>>;
}

/// CPU blur engine: separable two-pass Gaussian.
pub struct RasterBlurEngine {
  algorithm: GaussianBlurAlgorithm,
}

impl RasterBlurEngine {
  pub fn new() -> Self {
    Self {
      algorithm: GaussianBlurAlgorithm,
    }
  }
}

impl Default for RasterBlurEngine {
  fn default() -> Self {
    Self::new()
  }
}

impl BlurEngine for RasterBlurEngine {
  fn find_algorithm(&self, sigma: Size, color_type: ColorType) -> Option<&dyn BlurAlgorithm> {
    if color_type != ColorType::Rgba8888 {
      return None;
    }
    if sigma.width > self.algorithm.max_sigma() || sigma.height > self.algorithm.max_sigma() {
      return None;
    }
    Some(&self.algorithm)
  }
}

struct GaussianBlurAlgorithm;

/// Normalized 1D Gaussian kernel with radius `ceil(3 * sigma)`. A zero
/// sigma yields the identity kernel.
fn gaussian_kernel(sigma: f32) -> (Vec<f32>, usize) {
  let radius = (sigma.abs() * 3.0).ceil() as usize;
  if radius == 0 {
    return (vec![1.0], 0);
  }

  let mut kernel = Vec::with_capacity(radius * 2 + 1);
  let sigma_sq = sigma * sigma;
  let mut sum = 0.0;
  for i in 0..=radius * 2 {
    let x = i as f32 - radius as f32;
    let value = (-x * x / (2.0 * sigma_sq)).exp();
    kernel.push(value);
    sum += value;
  }
  if sum != 0.0 {
    for k in &mut kernel {
      *k /= sum;
    }
  }
  (kernel, radius)
}

impl BlurAlgorithm for GaussianBlurAlgorithm {
  fn max_sigma(&self) -> f32 {
    512.0
  }

  fn blur(
    &self,
    sigma: Size,
    src: &SpecialImage,
    src_bounds: IRect,
    tile_mode: TileMode,
    dst_bounds: IRect,
  ) -> Option<Arc<SpecialImage>> {
    if dst_bounds.is_empty() || src_bounds.is_empty() {
      return None;
    }

    let (kx, rx) = gaussian_kernel(sigma.width);
    let (ky, ry) = gaussian_kernel(sigma.height);
    let rx = rx as i32;
    let ry = ry as i32;

    // Taps outside 'src_bounds' follow the tile mode; decal taps simply
    // contribute nothing (the kernel is normalized so in-bounds content
    // keeps its weight).
    let sw = src_bounds.width();
    let sh = src_bounds.height();
    let src_at = |x: i32, y: i32| -> [f32; 4] {
      let tx = tile_index(x - src_bounds.left, sw, tile_mode);
      let ty = tile_index(y - src_bounds.top, sh, tile_mode);
      match (tx, ty) {
        (Some(tx), Some(ty)) => src.texel(src_bounds.left + tx, src_bounds.top + ty, true),
        _ => TRANSPARENT_PREMUL,
      }
    };

    let dw = dst_bounds.width() as usize;
    let dh = dst_bounds.height() as usize;

    // Horizontal pass over the rows the vertical pass will tap.
    let temp_h = dh + 2 * ry as usize;
    let mut temp = vec![[0.0f32; 4]; dw * temp_h];
    for j in 0..temp_h {
      let y = dst_bounds.top - ry + j as i32;
      for i in 0..dw {
        let x = dst_bounds.left + i as i32;
        let mut acc = [0.0f32; 4];
        for (k, weight) in kx.iter().enumerate() {
          let sample = src_at(x + k as i32 - rx, y);
          for c in 0..4 {
            acc[c] += sample[c] * weight;
          }
        }
        temp[j * dw + i] = acc;
      }
    }

    let mut pixmap = new_surface_pixmap(dst_bounds.width(), dst_bounds.height()).ok()?;
    for j in 0..dh {
      for i in 0..dw {
        let mut acc = [0.0f32; 4];
        for (k, weight) in ky.iter().enumerate() {
          let sample = temp[(j + k) * dw + i];
          for c in 0..4 {
            acc[c] += sample[c] * weight;
          }
        }
        pixmap.pixels_mut()[j * dw + i] = pack_premul(acc);
      }
    }

    Some(SpecialImage::from_pixmap(pixmap, src.color_space()))
  }
}
