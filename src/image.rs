//! Immutable special images
//!
//! A [`SpecialImage`] is a reference-counted view of premultiplied RGBA8
//! pixels: a shared backing pixmap plus a subset rectangle. Snapping a
//! surface and taking sub-images both produce views of the same backing
//! store, so the pipeline can crop and re-wrap without copying.
//!
//! Image-local coordinates run over `[0, w) x [0, h)` of the subset. Reads
//! outside the subset model hardware texturing: under a strict constraint
//! they clamp at the subset edge, otherwise they may reach neighboring
//! backing-store texels.

use std::fmt;
use std::sync::Arc;

use tiny_skia::Pixmap;

use crate::color::{unpack_premul, Color, ColorSpace, ColorType, TRANSPARENT_PREMUL};
use crate::geometry::{IRect, ISize};
use crate::sampling::{SamplingOptions, TileMode};
use crate::shader::make_image_shader;
use crate::shader::Shader;
use crate::transform::Matrix;

pub struct SpecialImage {
  pixels: Arc<Pixmap>,
  subset: IRect,
  color_space: ColorSpace,
}

impl fmt::Debug for SpecialImage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SpecialImage")
      .field("subset", &self.subset)
      .field(
        "backing",
        &ISize::new(self.pixels.width() as i32, self.pixels.height() as i32),
      )
      .field("color_space", &self.color_space)
      .finish()
  }
}

impl SpecialImage {
  /// Wraps an entire pixmap.
  pub fn from_pixmap(pixmap: Pixmap, color_space: ColorSpace) -> Arc<Self> {
    let subset = IRect::from_wh(pixmap.width() as i32, pixmap.height() as i32);
    Arc::new(Self {
      pixels: Arc::new(pixmap),
      subset,
      color_space,
    })
  }

  /// Wraps a shared pixmap restricted to `subset` (in backing-store
  /// coordinates). `None` when the subset is empty or escapes the backing
  /// store.
  pub fn wrap(pixels: Arc<Pixmap>, subset: IRect, color_space: ColorSpace) -> Option<Arc<Self>> {
    let backing = IRect::from_wh(pixels.width() as i32, pixels.height() as i32);
    if !backing.contains(subset) {
      return None;
    }
    Some(Arc::new(Self {
      pixels,
      subset,
      color_space,
    }))
  }

  pub fn width(&self) -> i32 {
    self.subset.width()
  }

  pub fn height(&self) -> i32 {
    self.subset.height()
  }

  pub fn dimensions(&self) -> ISize {
    self.subset.size()
  }

  /// The view rectangle within the backing store.
  pub fn subset(&self) -> IRect {
    self.subset
  }

  pub fn backing_store_dimensions(&self) -> ISize {
    ISize::new(self.pixels.width() as i32, self.pixels.height() as i32)
  }

  /// True when the view covers its entire backing store, i.e. hardware
  /// tiling at the texture edge matches tiling at the subset edge.
  pub fn is_exact_fit(&self) -> bool {
    self.subset == IRect::from_wh(self.pixels.width() as i32, self.pixels.height() as i32)
  }

  pub fn color_space(&self) -> ColorSpace {
    self.color_space
  }

  pub fn color_type(&self) -> ColorType {
    ColorType::Rgba8888
  }

  /// The shared backing store. Views produced by subsetting and snapping
  /// share it; comparing these pointers distinguishes zero-copy paths from
  /// renders.
  pub fn backing(&self) -> &Arc<Pixmap> {
    &self.pixels
  }

  /// Reads the image-local pixel as unpremultiplied color; coordinates
  /// clamp to the subset.
  pub fn pixel(&self, x: i32, y: i32) -> Color {
    Color::from_premul(self.texel(x, y, true))
  }

  /// A new view of `subset` given in image-local coordinates. `None` when
  /// the subset escapes this image.
  pub fn make_subset(&self, subset: IRect) -> Option<Arc<Self>> {
    let within = IRect::from_wh(self.width(), self.height());
    if !within.contains(subset) {
      return None;
    }
    Some(Arc::new(Self {
      pixels: Arc::clone(&self.pixels),
      subset: subset.offset(self.subset.left, self.subset.top),
      color_space: self.color_space,
    }))
  }

  /// Reads the texel at image-local `(x, y)`.
  ///
  /// Out-of-range reads clamp: to the subset under a strict constraint, to
  /// the backing store otherwise (the fast path may legally pick up
  /// neighboring texels, as sampling hardware does).
  pub(crate) fn texel(&self, x: i32, y: i32, strict: bool) -> [f32; 4] {
    let (bx, by) = if strict {
      (
        self.subset.left + x.clamp(0, self.width() - 1),
        self.subset.top + y.clamp(0, self.height() - 1),
      )
    } else {
      let backing = self.backing_store_dimensions();
      (
        (self.subset.left + x).clamp(0, backing.width - 1),
        (self.subset.top + y).clamp(0, backing.height - 1),
      )
    };
    let idx = by as usize * self.pixels.width() as usize + bx as usize;
    match self.pixels.pixels().get(idx) {
      Some(px) => unpack_premul(*px),
      None => TRANSPARENT_PREMUL,
    }
  }

  /// Wraps the image as a layer-space shader. `local_matrix` maps image
  /// coordinates into the shader's domain; a singular matrix yields `None`.
  ///
  /// `strict` requests shader-based tiling at the subset edge rather than
  /// the backing-store edge.
  pub fn as_shader(
    self: &Arc<Self>,
    tile_mode: TileMode,
    sampling: SamplingOptions,
    local_matrix: Matrix,
    strict: bool,
  ) -> Option<Arc<dyn Shader>> {
    make_image_shader(Arc::clone(self), tile_mode, sampling, local_matrix, strict)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::color::pack_premul;

  fn checkerboard(size: u32) -> Pixmap {
    let mut pixmap = Pixmap::new(size, size).unwrap();
    for y in 0..size {
      for x in 0..size {
        let on = (x + y) % 2 == 0;
        let px = if on {
          pack_premul([1.0, 1.0, 1.0, 1.0])
        } else {
          pack_premul([0.0, 0.0, 0.0, 1.0])
        };
        pixmap.pixels_mut()[(y * size + x) as usize] = px;
      }
    }
    pixmap
  }

  #[test]
  fn full_pixmap_is_exact_fit() {
    let image = SpecialImage::from_pixmap(checkerboard(8), ColorSpace::Srgb);
    assert!(image.is_exact_fit());
    assert_eq!(image.dimensions(), ISize::new(8, 8));
    assert_eq!(image.backing_store_dimensions(), ISize::new(8, 8));
  }

  #[test]
  fn make_subset_shares_backing() {
    let image = SpecialImage::from_pixmap(checkerboard(8), ColorSpace::Srgb);
    let sub = image.make_subset(IRect::from_ltrb(2, 2, 6, 6)).unwrap();
    assert_eq!(sub.dimensions(), ISize::new(4, 4));
    assert!(!sub.is_exact_fit());
    assert_eq!(sub.subset(), IRect::from_ltrb(2, 2, 6, 6));

    // Nested subsets compose offsets.
    let nested = sub.make_subset(IRect::from_ltrb(1, 1, 3, 3)).unwrap();
    assert_eq!(nested.subset(), IRect::from_ltrb(3, 3, 5, 5));

    assert!(sub.make_subset(IRect::from_ltrb(0, 0, 5, 5)).is_none());
  }

  #[test]
  fn texel_reads_are_subset_relative() {
    let image = SpecialImage::from_pixmap(checkerboard(8), ColorSpace::Srgb);
    let sub = image.make_subset(IRect::from_ltrb(1, 0, 5, 4)).unwrap();
    // (0, 0) of the subset is (1, 0) of the checkerboard: off/black.
    assert_eq!(sub.texel(0, 0, true)[0], 0.0);
    assert_eq!(sub.texel(1, 0, true)[0], 1.0);
  }

  #[test]
  fn strict_reads_clamp_to_subset() {
    let image = SpecialImage::from_pixmap(checkerboard(8), ColorSpace::Srgb);
    let sub = image.make_subset(IRect::from_ltrb(2, 2, 4, 4)).unwrap();
    // Strict clamps to the subset's own edge texel...
    assert_eq!(sub.texel(-1, 0, true), sub.texel(0, 0, true));
    // ...fast may read the neighboring backing texel, which differs on a
    // checkerboard.
    assert_ne!(sub.texel(-1, 0, false), sub.texel(0, 0, true));
  }
}
