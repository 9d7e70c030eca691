//! Color values and color space plumbing
//!
//! Pixel math inside the pipeline runs on premultiplied `[f32; 4]` RGBA;
//! color filters see unpremultiplied [`Color`] values. Storage is always
//! premultiplied RGBA8 via `tiny_skia`.

use tiny_skia::PremultipliedColorU8;

/// An unpremultiplied RGBA color with f32 components, nominally in
/// `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
  pub r: f32,
  pub g: f32,
  pub b: f32,
  pub a: f32,
}

impl Color {
  pub const TRANSPARENT: Self = Self {
    r: 0.0,
    g: 0.0,
    b: 0.0,
    a: 0.0,
  };

  pub const BLACK: Self = Self {
    r: 0.0,
    g: 0.0,
    b: 0.0,
    a: 1.0,
  };

  pub const WHITE: Self = Self {
    r: 1.0,
    g: 1.0,
    b: 1.0,
    a: 1.0,
  };

  pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
    Self { r, g, b, a }
  }

  pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
    Self {
      r: r as f32 / 255.0,
      g: g as f32 / 255.0,
      b: b as f32 / 255.0,
      a: a as f32 / 255.0,
    }
  }

  pub fn clamped(self) -> Self {
    Self {
      r: self.r.clamp(0.0, 1.0),
      g: self.g.clamp(0.0, 1.0),
      b: self.b.clamp(0.0, 1.0),
      a: self.a.clamp(0.0, 1.0),
    }
  }

  pub fn premultiply(self) -> [f32; 4] {
    [self.r * self.a, self.g * self.a, self.b * self.a, self.a]
  }

  pub fn from_premul(p: [f32; 4]) -> Self {
    if p[3] <= 0.0 {
      return Self::TRANSPARENT;
    }
    Self {
      r: p[0] / p[3],
      g: p[1] / p[3],
      b: p[2] / p[3],
      a: p[3],
    }
  }
}

pub(crate) const TRANSPARENT_PREMUL: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

/// Packs premultiplied f32 RGBA into storage, clamping channels to alpha so
/// the premultiplied invariant holds after rounding.
pub(crate) fn pack_premul(p: [f32; 4]) -> PremultipliedColorU8 {
  let a = (p[3].clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
  let r = ((p[0].clamp(0.0, 1.0) * 255.0 + 0.5) as u8).min(a);
  let g = ((p[1].clamp(0.0, 1.0) * 255.0 + 0.5) as u8).min(a);
  let b = ((p[2].clamp(0.0, 1.0) * 255.0 + 0.5) as u8).min(a);
  PremultipliedColorU8::from_rgba(r, g, b, a).unwrap_or(PremultipliedColorU8::TRANSPARENT)
}

pub(crate) fn unpack_premul(p: PremultipliedColorU8) -> [f32; 4] {
  [
    p.red() as f32 / 255.0,
    p.green() as f32 / 255.0,
    p.blue() as f32 / 255.0,
    p.alpha() as f32 / 255.0,
  ]
}

/// The color spaces the raster backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
  Srgb,
  LinearSrgb,
}

/// Pixel formats the raster backend can allocate. CPU evaluation is
/// premultiplied RGBA8 only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorType {
  Rgba8888,
}

pub fn srgb_to_linear(value: f32) -> f32 {
  if value <= 0.04045 {
    value / 12.92
  } else {
    ((value + 0.055) / 1.055).powf(2.4)
  }
}

pub fn linear_to_srgb(value: f32) -> f32 {
  if value <= 0.003_130_8 {
    value * 12.92
  } else {
    1.055 * value.powf(1.0 / 2.4) - 0.055
  }
}

/// Converts a premultiplied color between color spaces. The transfer
/// function applies to unpremultiplied channels, so this unpremultiplies,
/// re-encodes, and premultiplies back.
pub(crate) fn convert_premul(p: [f32; 4], from: ColorSpace, to: ColorSpace) -> [f32; 4] {
  if from == to || p[3] <= 0.0 {
    return p;
  }
  let c = Color::from_premul(p);
  let f = match (from, to) {
    (ColorSpace::Srgb, ColorSpace::LinearSrgb) => srgb_to_linear,
    (ColorSpace::LinearSrgb, ColorSpace::Srgb) => linear_to_srgb,
    _ => return p,
  };
  Color::new(f(c.r), f(c.g), f(c.b), c.a).premultiply()
}
