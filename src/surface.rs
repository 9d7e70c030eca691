//! Render targets for materialization steps
//!
//! A [`Device`] is the drawing seam between the filter core and a pixel
//! backend: the core only ever fills with a shader, draws a special image
//! with an explicit matrix, and clips. [`RasterDevice`] is the CPU
//! implementation, evaluating shaders per pixel into a guarded
//! premultiplied RGBA8 pixmap.
//!
//! Allocation is bounded: dimensions are validated and the byte size
//! reserved with `try_reserve` against [`MAX_SURFACE_BYTES`], so hostile
//! filter graphs degrade to an empty result instead of aborting on OOM.

use std::fmt;
use std::sync::Arc;

use tiny_skia::{IntSize, Pixmap};

use crate::blend::{BlendMode, Blender};
use crate::color::{convert_premul, pack_premul, unpack_premul, Color, ColorSpace};
use crate::color_filter::{filter_premul, ColorFilter};
use crate::error::{SurfaceError, SurfaceResult};
use crate::geometry::{round_out, IRect, ISize, Point, Rect};
use crate::image::SpecialImage;
use crate::sampling::{SamplingOptions, TileMode};
use crate::shader::{sample_image, Shader};
use crate::transform::Matrix;

const BYTES_PER_PIXEL: u64 = 4;

/// Upper bound on a single surface allocation, to keep runaway filter
/// graphs from aborting the process on OOM.
pub(crate) const MAX_SURFACE_BYTES: u64 = 512 * 1024 * 1024;

/// Allocates a zeroed pixmap with dimension and byte-budget guards.
pub(crate) fn new_surface_pixmap(width: i32, height: i32) -> SurfaceResult<Pixmap> {
  if width <= 0 || height <= 0 {
    return Err(SurfaceError::EmptyDimensions { width, height });
  }

  let bytes = width as u64 * height as u64 * BYTES_PER_PIXEL;
  if bytes > MAX_SURFACE_BYTES {
    return Err(SurfaceError::OverBudget {
      width,
      height,
      bytes,
      limit: MAX_SURFACE_BYTES,
    });
  }

  let capacity = bytes as usize;
  let mut buffer = Vec::new();
  buffer
    .try_reserve_exact(capacity)
    .map_err(|_| SurfaceError::AllocationFailed { bytes })?;
  buffer.resize(capacity, 0);

  let size = IntSize::from_wh(width as u32, height as u32)
    .ok_or(SurfaceError::AllocationFailed { bytes })?;
  Pixmap::from_vec(buffer, size).ok_or(SurfaceError::AllocationFailed { bytes })
}

/// Subpixel layout of a surface, relevant to LCD-style rendering decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelGeometry {
  #[default]
  Unknown,
  RgbHorizontal,
  BgrHorizontal,
  RgbVertical,
  BgrVertical,
}

/// Properties a backend applies when allocating surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceProps {
  pub pixel_geometry: PixelGeometry,
}

impl SurfaceProps {
  pub fn new(pixel_geometry: PixelGeometry) -> Self {
    Self { pixel_geometry }
  }

  /// The same props with the pixel geometry erased, used for offscreen
  /// content rendered at a resolution unrelated to the screen's.
  pub fn with_unknown_pixel_geometry(self) -> Self {
    Self {
      pixel_geometry: PixelGeometry::Unknown,
    }
  }
}

/// How a special image draw treats texels outside the image subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrcRectConstraint {
  /// Edge taps may read neighboring backing-store texels.
  Fast,
  /// Edge taps must stay within the subset.
  Strict,
}

/// Draw state consumed by [`Device`] operations.
#[derive(Clone, Default)]
pub struct Paint {
  /// Source color when no shader is set.
  pub color: Color,
  pub shader: Option<Arc<dyn Shader>>,
  /// Applied to the shader (or color) output before blending.
  pub color_filter: Option<Arc<dyn ColorFilter>>,
  /// Blend into the destination; source-over when absent.
  pub blender: Option<Arc<dyn Blender>>,
}

impl fmt::Debug for Paint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Paint")
      .field("color", &self.color)
      .field("has_shader", &self.shader.is_some())
      .field("has_color_filter", &self.color_filter.is_some())
      .field("has_blender", &self.blender.is_some())
      .finish()
  }
}

/// An abstract render target.
///
/// `local_to_device` maps the caller's working space (layer space during
/// filter evaluation) onto device pixels. Clips accumulate as an integer
/// device-space rectangle.
pub trait Device {
  fn dimensions(&self) -> ISize;
  fn color_space(&self) -> ColorSpace;

  fn local_to_device(&self) -> Matrix;
  fn set_local_to_device(&mut self, matrix: Matrix);

  /// Pre-concats a translation onto the current transform.
  fn translate(&mut self, dx: f32, dy: f32) {
    let mut m = self.local_to_device();
    m.pre_concat(&Matrix::translate(dx, dy));
    self.set_local_to_device(m);
  }

  /// Pre-concats `matrix` onto the current transform.
  fn concat(&mut self, matrix: &Matrix) {
    let mut m = self.local_to_device();
    m.pre_concat(matrix);
    self.set_local_to_device(m);
  }

  /// The device-space bounds that drawing can currently touch.
  fn dev_clip_bounds(&self) -> IRect;

  fn push_clip_stack(&mut self);
  fn pop_clip_stack(&mut self);

  /// Intersects the clip with a local-space rectangle. The AA flag is
  /// accepted for interface fidelity; integer devices resolve it as a
  /// conservative round-out.
  fn clip_rect(&mut self, rect: Rect, aa: bool);

  /// Replaces every pixel with `color`, ignoring the clip.
  fn clear(&mut self, color: Color);

  /// Fills the clip with the paint's shader or color.
  fn draw_paint(&mut self, paint: &Paint);

  /// Draws `image` mapped by `matrix` (image coordinates to device
  /// coordinates; the current transform is deliberately not applied).
  fn draw_special(
    &mut self,
    image: &SpecialImage,
    matrix: &Matrix,
    sampling: SamplingOptions,
    paint: &Paint,
    constraint: SrcRectConstraint,
  );

  /// Finalizes the device into an immutable image view of `subset` (device
  /// pixel coordinates). Consumes the device; `None` when `subset` escapes
  /// the surface.
  fn snap_special(self: Box<Self>, subset: IRect) -> Option<Arc<SpecialImage>>;

  /// Marks the backing pixels immutable ahead of snapping.
  fn set_immutable(&mut self);
}

/// CPU implementation of [`Device`] over a tiny-skia pixmap.
pub struct RasterDevice {
  pixmap: Pixmap,
  color_space: ColorSpace,
  props: SurfaceProps,
  local_to_device: Matrix,
  clip: IRect,
  clip_stack: Vec<IRect>,
  immutable: bool,
}

impl fmt::Debug for RasterDevice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RasterDevice")
      .field("dimensions", &self.dimensions())
      .field("color_space", &self.color_space)
      .field("clip", &self.clip)
      .finish()
  }
}

impl RasterDevice {
  pub fn new(size: ISize, color_space: ColorSpace, props: SurfaceProps) -> SurfaceResult<Self> {
    let pixmap = new_surface_pixmap(size.width, size.height)?;
    let clip = IRect::from_size(size);
    Ok(Self {
      pixmap,
      color_space,
      props,
      local_to_device: Matrix::IDENTITY,
      clip,
      clip_stack: Vec::new(),
      immutable: false,
    })
  }

  pub fn props(&self) -> &SurfaceProps {
    &self.props
  }

  pub fn pixmap(&self) -> &Pixmap {
    &self.pixmap
  }

  fn blend_pixel(&mut self, x: i32, y: i32, src: [f32; 4], blender: Option<&dyn Blender>) {
    let idx = y as usize * self.pixmap.width() as usize + x as usize;
    let Some(px) = self.pixmap.pixels_mut().get_mut(idx) else {
      return;
    };
    let dst = unpack_premul(*px);
    let out = match blender {
      Some(b) => b.blend(src, dst),
      None => BlendMode::SrcOver.apply(src, dst),
    };
    *px = pack_premul(out);
  }
}

impl Device for RasterDevice {
  fn dimensions(&self) -> ISize {
    ISize::new(self.pixmap.width() as i32, self.pixmap.height() as i32)
  }

  fn color_space(&self) -> ColorSpace {
    self.color_space
  }

  fn local_to_device(&self) -> Matrix {
    self.local_to_device
  }

  fn set_local_to_device(&mut self, matrix: Matrix) {
    self.local_to_device = matrix;
  }

  fn dev_clip_bounds(&self) -> IRect {
    self.clip
  }

  fn push_clip_stack(&mut self) {
    self.clip_stack.push(self.clip);
  }

  fn pop_clip_stack(&mut self) {
    debug_assert!(!self.clip_stack.is_empty(), "unbalanced clip stack");
    if let Some(clip) = self.clip_stack.pop() {
      self.clip = clip;
    }
  }

  fn clip_rect(&mut self, rect: Rect, _aa: bool) {
    let mapped = self.local_to_device.map_rect(rect);
    self.clip = self.clip.intersect(round_out(mapped)).unwrap_or(IRect::EMPTY);
  }

  fn clear(&mut self, color: Color) {
    debug_assert!(!self.immutable);
    let px = pack_premul(color.premultiply());
    for p in self.pixmap.pixels_mut() {
      *p = px;
    }
  }

  fn draw_paint(&mut self, paint: &Paint) {
    debug_assert!(!self.immutable);
    let bounds = self.clip;
    if bounds.is_empty() {
      return;
    }
    let Some(inv) = self.local_to_device.invert() else {
      return;
    };

    let shader = paint.shader.clone();
    let color_filter = paint.color_filter.clone();
    let blender = paint.blender.clone();
    let solid = paint.color.premultiply();

    for y in bounds.top..bounds.bottom {
      for x in bounds.left..bounds.right {
        let p = inv.map_point(Point::new(x as f32 + 0.5, y as f32 + 0.5));
        let mut src = match &shader {
          Some(s) => {
            if !p.is_finite() {
              continue;
            }
            s.eval(p.x, p.y)
          }
          None => solid,
        };
        if let Some(cf) = &color_filter {
          src = filter_premul(cf.as_ref(), src);
        }
        self.blend_pixel(x, y, src, blender.as_deref());
      }
    }
  }

  fn draw_special(
    &mut self,
    image: &SpecialImage,
    matrix: &Matrix,
    sampling: SamplingOptions,
    paint: &Paint,
    constraint: SrcRectConstraint,
  ) {
    debug_assert!(!self.immutable);
    let w = image.width() as f32;
    let h = image.height() as f32;
    let image_rect = Rect::from_ltrb(0.0, 0.0, w, h);

    let device_bounds = round_out(matrix.map_rect(image_rect));
    let Some(bounds) = self.clip.intersect(device_bounds) else {
      return;
    };
    let Some(inv) = matrix.invert() else {
      return;
    };
    let strict = constraint == SrcRectConstraint::Strict;

    let color_filter = paint.color_filter.clone();
    let blender = paint.blender.clone();
    let image_cs = image.color_space();
    let device_cs = self.color_space;

    for y in bounds.top..bounds.bottom {
      for x in bounds.left..bounds.right {
        let p = inv.map_point(Point::new(x as f32 + 0.5, y as f32 + 0.5));
        if !p.is_finite() {
          continue;
        }
        // The draw geometry is the image rectangle itself; pixels mapping
        // outside it receive no coverage.
        if p.x < 0.0 || p.x > w || p.y < 0.0 || p.y > h {
          continue;
        }
        let mut src = sample_image(image, p.x, p.y, TileMode::Clamp, sampling, strict);
        src = convert_premul(src, image_cs, device_cs);
        if let Some(cf) = &color_filter {
          src = filter_premul(cf.as_ref(), src);
        }
        self.blend_pixel(x, y, src, blender.as_deref());
      }
    }
  }

  fn snap_special(self: Box<Self>, subset: IRect) -> Option<Arc<SpecialImage>> {
    SpecialImage::wrap(Arc::new(self.pixmap), subset, self.color_space)
  }

  fn set_immutable(&mut self) {
    self.immutable = true;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::shader::SolidShader;

  fn device(w: i32, h: i32) -> RasterDevice {
    RasterDevice::new(ISize::new(w, h), ColorSpace::Srgb, SurfaceProps::default()).unwrap()
  }

  fn pixel(device: &RasterDevice, x: i32, y: i32) -> [f32; 4] {
    let idx = y as usize * device.pixmap.width() as usize + x as usize;
    unpack_premul(device.pixmap.pixels()[idx])
  }

  #[test]
  fn allocation_guards() {
    assert!(matches!(
      new_surface_pixmap(0, 10),
      Err(SurfaceError::EmptyDimensions { .. })
    ));
    assert!(matches!(
      new_surface_pixmap(-5, 10),
      Err(SurfaceError::EmptyDimensions { .. })
    ));
    assert!(matches!(
      new_surface_pixmap(1 << 20, 1 << 20),
      Err(SurfaceError::OverBudget { .. })
    ));
    assert!(new_surface_pixmap(16, 16).is_ok());
  }

  #[test]
  fn draw_paint_respects_clip() {
    let mut device = device(8, 8);
    device.clip_rect(Rect::from_ltrb(2.0, 2.0, 6.0, 6.0), false);
    let mut paint = Paint::default();
    paint.shader = Some(Arc::new(SolidShader::new(Color::WHITE)));
    device.draw_paint(&paint);

    assert_eq!(pixel(&device, 0, 0)[3], 0.0);
    assert_eq!(pixel(&device, 3, 3)[3], 1.0);
    assert_eq!(pixel(&device, 6, 6)[3], 0.0);
  }

  #[test]
  fn clip_stack_restores() {
    let mut device = device(8, 8);
    device.push_clip_stack();
    device.clip_rect(Rect::from_ltrb(0.0, 0.0, 2.0, 2.0), true);
    assert_eq!(device.dev_clip_bounds(), IRect::from_ltrb(0, 0, 2, 2));
    device.pop_clip_stack();
    assert_eq!(device.dev_clip_bounds(), IRect::from_ltrb(0, 0, 8, 8));
  }

  #[test]
  fn draw_paint_uses_local_to_device() {
    let mut device = device(8, 8);
    // Shader produces white only where layer x < 2; translate layer by 4.
    #[derive(Debug)]
    struct LeftHalf;
    impl Shader for LeftHalf {
      fn eval(&self, x: f32, _y: f32) -> [f32; 4] {
        if x < 2.0 {
          [1.0, 1.0, 1.0, 1.0]
        } else {
          [0.0; 4]
        }
      }
    }
    device.translate(4.0, 0.0);
    let mut paint = Paint::default();
    paint.shader = Some(Arc::new(LeftHalf));
    device.draw_paint(&paint);

    // Layer x < 2 corresponds to device x in [4, 6).
    assert_eq!(pixel(&device, 4, 0)[3], 1.0);
    assert_eq!(pixel(&device, 5, 0)[3], 1.0);
    assert_eq!(pixel(&device, 3, 0)[3], 0.0);
    assert_eq!(pixel(&device, 6, 0)[3], 0.0);
  }

  #[test]
  fn draw_special_places_image() {
    let mut src = device(2, 2);
    src.clear(Color::new(1.0, 0.0, 0.0, 1.0));
    let image = Box::new(src).snap_special(IRect::from_wh(2, 2)).unwrap();

    let mut dst = device(8, 8);
    dst.draw_special(
      &image,
      &Matrix::translate(3.0, 3.0),
      crate::sampling::NEAREST,
      &Paint::default(),
      SrcRectConstraint::Fast,
    );
    assert_eq!(pixel(&dst, 3, 3)[0], 1.0);
    assert_eq!(pixel(&dst, 4, 4)[0], 1.0);
    assert_eq!(pixel(&dst, 5, 5)[3], 0.0);
    assert_eq!(pixel(&dst, 2, 3)[3], 0.0);
  }

  #[test]
  fn snap_rejects_escaping_subset() {
    let d = Box::new(device(4, 4));
    assert!(d.snap_special(IRect::from_ltrb(0, 0, 5, 4)).is_none());
  }
}
