//! CPU shader synthesis
//!
//! Deferred filter state is lowered to a tree of [`Shader`] values that the
//! raster device evaluates per pixel: an image shader carrying tile mode
//! and sampling, optionally wrapped by a layer-space decal, a local matrix,
//! a color filter, or a color-space conversion. The tree mirrors what the
//! analyzed shader view of a FilterResult defers.

use std::fmt;
use std::sync::Arc;

use crate::color::{convert_premul, Color, ColorSpace, TRANSPARENT_PREMUL};
use crate::color_filter::{filter_premul, ColorFilter};
use crate::geometry::{Point, Rect};
use crate::image::SpecialImage;
use crate::sampling::{CubicResampler, FilterMode, SamplingOptions, TileMode};
use crate::transform::Matrix;

/// Evaluates premultiplied RGBA at a point of its domain.
pub trait Shader: fmt::Debug + Send + Sync {
  fn eval(&self, x: f32, y: f32) -> [f32; 4];
}

/// A constant color everywhere.
#[derive(Debug, Clone, Copy)]
pub struct SolidShader {
  premul: [f32; 4],
}

impl SolidShader {
  pub fn new(color: Color) -> Self {
    Self {
      premul: color.premultiply(),
    }
  }
}

impl Shader for SolidShader {
  fn eval(&self, _x: f32, _y: f32) -> [f32; 4] {
    self.premul
  }
}

struct ImageShader {
  image: Arc<SpecialImage>,
  tile_mode: TileMode,
  sampling: SamplingOptions,
  inv_local: Matrix,
  strict: bool,
}

impl fmt::Debug for ImageShader {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ImageShader")
      .field("image", &self.image)
      .field("tile_mode", &self.tile_mode)
      .field("sampling", &self.sampling)
      .field("strict", &self.strict)
      .finish()
  }
}

impl Shader for ImageShader {
  fn eval(&self, x: f32, y: f32) -> [f32; 4] {
    let p = self.inv_local.map_point(Point::new(x, y));
    if !p.is_finite() {
      return TRANSPARENT_PREMUL;
    }
    sample_image(
      &self.image,
      p.x,
      p.y,
      self.tile_mode,
      self.sampling,
      self.strict,
    )
  }
}

/// Builds an image shader whose `local_matrix` maps image coordinates into
/// the shader domain. `None` when the local matrix cannot be inverted.
pub(crate) fn make_image_shader(
  image: Arc<SpecialImage>,
  tile_mode: TileMode,
  sampling: SamplingOptions,
  local_matrix: Matrix,
  strict: bool,
) -> Option<Arc<dyn Shader>> {
  let inv_local = local_matrix.invert()?;
  Some(Arc::new(ImageShader {
    image,
    tile_mode,
    sampling,
    inv_local,
    strict,
  }))
}

#[derive(Debug)]
struct LocalMatrixShader {
  inner: Arc<dyn Shader>,
  inv: Matrix,
}

impl Shader for LocalMatrixShader {
  fn eval(&self, x: f32, y: f32) -> [f32; 4] {
    let p = self.inv.map_point(Point::new(x, y));
    if !p.is_finite() {
      return TRANSPARENT_PREMUL;
    }
    self.inner.eval(p.x, p.y)
  }
}

/// Re-parents `shader` so its domain is transformed by `local_matrix`.
pub fn with_local_matrix(
  shader: Arc<dyn Shader>,
  local_matrix: &Matrix,
) -> Option<Arc<dyn Shader>> {
  if local_matrix.is_identity() {
    return Some(shader);
  }
  let inv = local_matrix.invert()?;
  Some(Arc::new(LocalMatrixShader { inner: shader, inv }))
}

/// Applies decal coverage in the shader's own (layer) space with one pixel
/// of analytic antialiasing: each side contributes `saturate(d + 0.5)`
/// where `d` is the signed distance to the decal rectangle.
#[derive(Debug)]
pub(crate) struct LayerDecalShader {
  inner: Arc<dyn Shader>,
  bounds: Rect,
}

impl LayerDecalShader {
  pub(crate) fn new(inner: Arc<dyn Shader>, bounds: Rect) -> Self {
    Self { inner, bounds }
  }
}

impl Shader for LayerDecalShader {
  fn eval(&self, x: f32, y: f32) -> [f32; 4] {
    let cov = saturate(x - self.bounds.left + 0.5)
      * saturate(y - self.bounds.top + 0.5)
      * saturate(self.bounds.right - x + 0.5)
      * saturate(self.bounds.bottom - y + 0.5);
    if cov <= 0.0 {
      return TRANSPARENT_PREMUL;
    }
    let c = self.inner.eval(x, y);
    [c[0] * cov, c[1] * cov, c[2] * cov, c[3] * cov]
  }
}

fn saturate(v: f32) -> f32 {
  v.clamp(0.0, 1.0)
}

#[derive(Debug)]
struct ColorFilterShader {
  inner: Arc<dyn Shader>,
  filter: Arc<dyn ColorFilter>,
}

impl Shader for ColorFilterShader {
  fn eval(&self, x: f32, y: f32) -> [f32; 4] {
    filter_premul(self.filter.as_ref(), self.inner.eval(x, y))
  }
}

/// Wraps `shader` so every sample passes through `filter`.
pub fn with_color_filter(shader: Arc<dyn Shader>, filter: Arc<dyn ColorFilter>) -> Arc<dyn Shader> {
  Arc::new(ColorFilterShader {
    inner: shader,
    filter,
  })
}

#[derive(Debug)]
struct ColorSpaceXformShader {
  inner: Arc<dyn Shader>,
  from: ColorSpace,
  to: ColorSpace,
}

impl Shader for ColorSpaceXformShader {
  fn eval(&self, x: f32, y: f32) -> [f32; 4] {
    convert_premul(self.inner.eval(x, y), self.from, self.to)
  }
}

/// Converts shader output from `from` to `to`; a no-op wrapper is elided.
pub(crate) fn with_color_space_xform(
  shader: Arc<dyn Shader>,
  from: ColorSpace,
  to: ColorSpace,
) -> Arc<dyn Shader> {
  if from == to {
    return shader;
  }
  Arc::new(ColorSpaceXformShader {
    inner: shader,
    from,
    to,
  })
}

/// Maps a tap index onto `[0, n)` per the tile mode; `None` is a decal tap
/// (transparent black contribution).
pub(crate) fn tile_index(i: i32, n: i32, tile_mode: TileMode) -> Option<i32> {
  debug_assert!(n > 0);
  match tile_mode {
    TileMode::Clamp => Some(i.clamp(0, n - 1)),
    TileMode::Repeat => Some(i.rem_euclid(n)),
    TileMode::Mirror => {
      let m = i.rem_euclid(2 * n);
      Some(if m < n { m } else { 2 * n - 1 - m })
    }
    TileMode::Decal => (0..n).contains(&i).then_some(i),
  }
}

/// Fetches one tiled texel in image-local coordinates.
///
/// Strict taps tile at the subset edge. Fast taps tile at the backing-store
/// edge, which is what texturing hardware does; the bounds analysis only
/// permits the fast path when those coincide or the difference is invisible.
fn fetch_tiled(
  image: &SpecialImage,
  ix: i32,
  iy: i32,
  tile_mode: TileMode,
  strict: bool,
) -> [f32; 4] {
  if strict {
    let w = image.width();
    let h = image.height();
    let (Some(tx), Some(ty)) = (tile_index(ix, w, tile_mode), tile_index(iy, h, tile_mode)) else {
      return TRANSPARENT_PREMUL;
    };
    image.texel(tx, ty, true)
  } else {
    let backing = image.backing_store_dimensions();
    let subset = image.subset();
    let (Some(bx), Some(by)) = (
      tile_index(ix + subset.left, backing.width, tile_mode),
      tile_index(iy + subset.top, backing.height, tile_mode),
    ) else {
      return TRANSPARENT_PREMUL;
    };
    image.texel(bx - subset.left, by - subset.top, false)
  }
}

/// Samples `image` at image-local `(u, v)` with filtering and tiling.
///
/// Anisotropic sampling evaluates as bilinear on the CPU; the aniso level
/// only participates in the sampling merge algebra upstream.
pub(crate) fn sample_image(
  image: &SpecialImage,
  u: f32,
  v: f32,
  tile_mode: TileMode,
  sampling: SamplingOptions,
  strict: bool,
) -> [f32; 4] {
  match sampling {
    SamplingOptions::Filter {
      filter: FilterMode::Nearest,
      ..
    } => fetch_tiled(
      image,
      u.floor() as i32,
      v.floor() as i32,
      tile_mode,
      strict,
    ),
    SamplingOptions::Filter {
      filter: FilterMode::Linear,
      ..
    }
    | SamplingOptions::Aniso { .. } => {
      let fx = u - 0.5;
      let fy = v - 0.5;
      let x0 = fx.floor();
      let y0 = fy.floor();
      let tx = fx - x0;
      let ty = fy - y0;
      let x0 = x0 as i32;
      let y0 = y0 as i32;

      let mut acc = [0.0f32; 4];
      for (dy, wy) in [(0, 1.0 - ty), (1, ty)] {
        if wy == 0.0 {
          continue;
        }
        for (dx, wx) in [(0, 1.0 - tx), (1, tx)] {
          if wx == 0.0 {
            continue;
          }
          let texel = fetch_tiled(image, x0 + dx, y0 + dy, tile_mode, strict);
          let w = wx * wy;
          for c in 0..4 {
            acc[c] += texel[c] * w;
          }
        }
      }
      acc
    }
    SamplingOptions::Cubic(resampler) => {
      let fx = u - 0.5;
      let fy = v - 0.5;
      let x0 = fx.floor();
      let y0 = fy.floor();
      let tx = fx - x0;
      let ty = fy - y0;
      let x0 = x0 as i32;
      let y0 = y0 as i32;

      let wx = cubic_weights(resampler, tx);
      let wy = cubic_weights(resampler, ty);

      let mut acc = [0.0f32; 4];
      for (j, wyj) in wy.iter().enumerate() {
        if *wyj == 0.0 {
          continue;
        }
        for (i, wxi) in wx.iter().enumerate() {
          let w = wxi * wyj;
          if w == 0.0 {
            continue;
          }
          let texel = fetch_tiled(
            image,
            x0 + i as i32 - 1,
            y0 + j as i32 - 1,
            tile_mode,
            strict,
          );
          for c in 0..4 {
            acc[c] += texel[c] * w;
          }
        }
      }
      acc
    }
  }
}

/// Mitchell-Netravali weights for taps at offsets -1..=2 around the sample,
/// where `t` is the fractional position within the center interval.
fn cubic_weights(resampler: CubicResampler, t: f32) -> [f32; 4] {
  let CubicResampler { b, c } = resampler;
  let kernel = |x: f32| -> f32 {
    let x = x.abs();
    if x < 1.0 {
      ((12.0 - 9.0 * b - 6.0 * c) * x * x * x
        + (-18.0 + 12.0 * b + 6.0 * c) * x * x
        + (6.0 - 2.0 * b))
        / 6.0
    } else if x < 2.0 {
      ((-b - 6.0 * c) * x * x * x
        + (6.0 * b + 30.0 * c) * x * x
        + (-12.0 * b - 48.0 * c) * x
        + (8.0 * b + 24.0 * c))
        / 6.0
    } else {
      0.0
    }
  };
  [
    kernel(t + 1.0),
    kernel(t),
    kernel(1.0 - t),
    kernel(2.0 - t),
  ]
}
