//! Color filters deferred by the pipeline
//!
//! Filters run after sampling and tiling but before the layer-bounds crop.
//! Whether a filter turns transparent black into something visible is the
//! property the bounds analysis keys on: such filters "fill out" a layer
//! beyond the image content.

use std::fmt;
use std::sync::Arc;

use crate::blend::BlendMode;
use crate::color::Color;

/// A per-color transform, evaluated on unpremultiplied color.
pub trait ColorFilter: fmt::Debug + Send + Sync {
  fn filter_color(&self, color: Color) -> Color;

  /// Whether `filter_color(transparent)` is no longer transparent. The
  /// default probes the filter directly; implementations with a cheap
  /// analytic answer override it.
  fn affects_transparent_black(&self) -> bool {
    self.filter_color(Color::TRANSPARENT) != Color::TRANSPARENT
  }

  /// If the filter is equivalent to blending a constant color, returns that
  /// color and mode. Such filters are cheap enough to re-evaluate per
  /// sample, which lets shader synthesis skip a resolve.
  fn as_blend_mode(&self) -> Option<(Color, BlendMode)> {
    None
  }
}

/// Applies `filter` to a premultiplied color.
pub(crate) fn filter_premul(filter: &dyn ColorFilter, p: [f32; 4]) -> [f32; 4] {
  filter
    .filter_color(Color::from_premul(p))
    .clamped()
    .premultiply()
}

/// A 4x5 row-major color matrix on unpremultiplied RGBA. Each output
/// channel is a dot product of the input channels plus a bias in the fifth
/// column; outputs clamp to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct MatrixColorFilter {
  m: [f32; 20],
}

impl MatrixColorFilter {
  pub fn new(m: [f32; 20]) -> Self {
    Self { m }
  }

  /// Inverts RGB and leaves alpha; turns transparent black opaque white.
  pub fn invert() -> Self {
    #[rustfmt::skip]
    let m = [
      -1.0, 0.0, 0.0, 0.0, 1.0,
      0.0, -1.0, 0.0, 0.0, 1.0,
      0.0, 0.0, -1.0, 0.0, 1.0,
      0.0, 0.0, 0.0, 1.0, 0.0,
    ];
    Self { m }
  }
}

impl ColorFilter for MatrixColorFilter {
  fn filter_color(&self, c: Color) -> Color {
    let m = &self.m;
    let row = |r: usize| m[r * 5] * c.r + m[r * 5 + 1] * c.g + m[r * 5 + 2] * c.b + m[r * 5 + 3] * c.a + m[r * 5 + 4];
    Color::new(row(0), row(1), row(2), row(3)).clamped()
  }

  fn affects_transparent_black(&self) -> bool {
    // Only the bias column survives a transparent input, and negative
    // biases clamp away.
    self.m[4] > 0.0 || self.m[9] > 0.0 || self.m[14] > 0.0 || self.m[19] > 0.0
  }
}

/// Blends a constant color into each filtered pixel.
#[derive(Debug, Clone)]
pub struct BlendColorFilter {
  pub color: Color,
  pub mode: BlendMode,
}

impl BlendColorFilter {
  pub fn new(color: Color, mode: BlendMode) -> Self {
    Self { color, mode }
  }
}

impl ColorFilter for BlendColorFilter {
  fn filter_color(&self, c: Color) -> Color {
    let out = self.mode.apply(self.color.premultiply(), c.premultiply());
    Color::from_premul(out).clamped()
  }

  fn as_blend_mode(&self) -> Option<(Color, BlendMode)> {
    Some((self.color, self.mode))
  }
}

/// `outer(inner(x))`.
#[derive(Debug, Clone)]
pub struct ComposeColorFilter {
  outer: Arc<dyn ColorFilter>,
  inner: Arc<dyn ColorFilter>,
}

impl ColorFilter for ComposeColorFilter {
  fn filter_color(&self, c: Color) -> Color {
    self.outer.filter_color(self.inner.filter_color(c))
  }
}

/// Composes a newly applied filter after an optional existing one, so the
/// new filter runs second: `new(existing(x))`.
pub fn compose_color_filters(
  new: Arc<dyn ColorFilter>,
  existing: Option<Arc<dyn ColorFilter>>,
) -> Arc<dyn ColorFilter> {
  match existing {
    Some(inner) => Arc::new(ComposeColorFilter { outer: new, inner }),
    None => new,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn invert_affects_transparent_black() {
    let invert = MatrixColorFilter::invert();
    assert!(invert.affects_transparent_black());
    let out = invert.filter_color(Color::TRANSPARENT);
    assert_eq!(out, Color::new(1.0, 1.0, 1.0, 0.0));
  }

  #[test]
  fn identity_matrix_preserves_transparent() {
    #[rustfmt::skip]
    let identity = MatrixColorFilter::new([
      1.0, 0.0, 0.0, 0.0, 0.0,
      0.0, 1.0, 0.0, 0.0, 0.0,
      0.0, 0.0, 1.0, 0.0, 0.0,
      0.0, 0.0, 0.0, 1.0, 0.0,
    ]);
    assert!(!identity.affects_transparent_black());
    let c = Color::new(0.25, 0.5, 0.75, 1.0);
    assert_eq!(identity.filter_color(c), c);
  }

  #[test]
  fn alpha_bias_floods() {
    // A filter that raises alpha converts transparent black to a color.
    #[rustfmt::skip]
    let flood = MatrixColorFilter::new([
      0.0, 0.0, 0.0, 0.0, 1.0,
      0.0, 0.0, 0.0, 0.0, 0.0,
      0.0, 0.0, 0.0, 0.0, 0.0,
      0.0, 0.0, 0.0, 0.0, 1.0,
    ]);
    assert!(flood.affects_transparent_black());
    assert_eq!(
      flood.filter_color(Color::TRANSPARENT),
      Color::new(1.0, 0.0, 0.0, 1.0)
    );
  }

  #[test]
  fn compose_runs_new_filter_second() {
    // inner doubles red (via matrix), outer inverts.
    #[rustfmt::skip]
    let double_red = Arc::new(MatrixColorFilter::new([
      2.0, 0.0, 0.0, 0.0, 0.0,
      0.0, 1.0, 0.0, 0.0, 0.0,
      0.0, 0.0, 1.0, 0.0, 0.0,
      0.0, 0.0, 0.0, 1.0, 0.0,
    ])) as Arc<dyn ColorFilter>;
    let invert = Arc::new(MatrixColorFilter::invert()) as Arc<dyn ColorFilter>;

    let composed = compose_color_filters(invert, Some(double_red));
    let out = composed.filter_color(Color::new(0.25, 0.0, 0.0, 1.0));
    // double: r=0.5, then invert: r=0.5.
    assert!((out.r - 0.5).abs() < 1e-6);
    assert!((out.g - 1.0).abs() < 1e-6);
  }

  #[test]
  fn blend_filter_reports_mode() {
    let f = BlendColorFilter::new(Color::new(1.0, 0.0, 0.0, 1.0), BlendMode::SrcOver);
    assert!(f.as_blend_mode().is_some());
    // SrcOver of an opaque color affects transparent black.
    assert!(f.affects_transparent_black());

    let dst_in = BlendColorFilter::new(Color::new(1.0, 0.0, 0.0, 0.5), BlendMode::DstIn);
    assert!(!dst_in.affects_transparent_black());
  }
}
