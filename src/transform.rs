//! 3x3 transforms for filter geometry
//!
//! The matrix is stored in row-major order:
//! ```text
//! [ m0 m1 m2 ]
//! [ m3 m4 m5 ]
//! [ m6 m7 m8 ]
//! ```
//! mapping a point `(x, y, 1)` to homogeneous `(x', y', w')`; the projected
//! point is `(x'/w', y'/w')`. Affine matrices keep the bottom row `[0 0 1]`.
//!
//! Many pipeline fast paths key off the classification ladder
//! identity < translate < scale-translate < rect-stays-rect < affine <
//! perspective, and off [`Matrix::as_integer_translation`].

use crate::geometry::{round_out, IPoint, IRect, Point, Rect, Size, Vector, ROUND_EPSILON};

const INVERT_EPSILON: f32 = 1e-6;

/// A 2D projective transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
  m: [f32; 9],
}

impl Default for Matrix {
  fn default() -> Self {
    Self::IDENTITY
  }
}

impl Matrix {
  pub const IDENTITY: Self = Self {
    m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
  };

  pub const fn from_row_major(m: [f32; 9]) -> Self {
    Self { m }
  }

  pub const fn translate(tx: f32, ty: f32) -> Self {
    Self {
      m: [1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0],
    }
  }

  pub const fn scale(sx: f32, sy: f32) -> Self {
    Self {
      m: [sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0],
    }
  }

  pub const fn scale_translate(sx: f32, sy: f32, tx: f32, ty: f32) -> Self {
    Self {
      m: [sx, 0.0, tx, 0.0, sy, ty, 0.0, 0.0, 1.0],
    }
  }

  /// Rotation by `radians` about the origin (positive rotates +x toward +y).
  pub fn rotate(radians: f32) -> Self {
    let (sin, cos) = radians.sin_cos();
    Self {
      m: [cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0],
    }
  }

  /// The scale-translate matrix mapping `src` onto `dst`, or `None` when
  /// `src` is degenerate.
  pub fn rect_to_rect(src: Rect, dst: Rect) -> Option<Self> {
    if src.is_empty() || !(dst.width() >= 0.0) || !(dst.height() >= 0.0) {
      return None;
    }
    let sx = dst.width() / src.width();
    let sy = dst.height() / src.height();
    if !sx.is_finite() || !sy.is_finite() {
      return None;
    }
    Some(Self::scale_translate(
      sx,
      sy,
      dst.left - src.left * sx,
      dst.top - src.top * sy,
    ))
  }

  /// Row/column accessor: `rc(0, 2)` is the x translation.
  pub fn rc(&self, row: usize, col: usize) -> f32 {
    self.m[row * 3 + col]
  }

  pub fn scale_x(&self) -> f32 {
    self.m[0]
  }

  pub fn skew_x(&self) -> f32 {
    self.m[1]
  }

  pub fn translate_x(&self) -> f32 {
    self.m[2]
  }

  pub fn skew_y(&self) -> f32 {
    self.m[3]
  }

  pub fn scale_y(&self) -> f32 {
    self.m[4]
  }

  pub fn translate_y(&self) -> f32 {
    self.m[5]
  }

  pub fn is_finite(&self) -> bool {
    self.m.iter().all(|v| v.is_finite())
  }

  pub fn has_perspective(&self) -> bool {
    self.m[6] != 0.0 || self.m[7] != 0.0 || self.m[8] != 1.0
  }

  pub fn is_identity(&self) -> bool {
    *self == Self::IDENTITY
  }

  pub fn is_translate(&self) -> bool {
    !self.has_perspective()
      && self.m[0] == 1.0
      && self.m[1] == 0.0
      && self.m[3] == 0.0
      && self.m[4] == 1.0
  }

  pub fn is_scale_translate(&self) -> bool {
    !self.has_perspective() && self.m[1] == 0.0 && self.m[3] == 0.0
  }

  /// True when axis-aligned rectangles map to axis-aligned rectangles:
  /// a non-degenerate scale, or a non-degenerate 90-degree rotation.
  pub fn rect_stays_rect(&self) -> bool {
    if self.has_perspective() {
      return false;
    }
    if self.m[1] == 0.0 && self.m[3] == 0.0 {
      self.m[0] != 0.0 && self.m[4] != 0.0
    } else {
      self.m[0] == 0.0 && self.m[4] == 0.0 && self.m[1] != 0.0 && self.m[3] != 0.0
    }
  }

  /// `self = other * self`: `other` applies after the current transform.
  pub fn post_concat(&mut self, other: &Matrix) {
    *self = concat(other, self);
  }

  /// `self = self * other`: `other` applies before the current transform.
  pub fn pre_concat(&mut self, other: &Matrix) {
    *self = concat(self, other);
  }

  pub fn pre_scale(&mut self, sx: f32, sy: f32) {
    self.pre_concat(&Matrix::scale(sx, sy));
  }

  pub fn determinant(&self) -> f32 {
    let [a, b, c, d, e, f, g, h, i] = self.m;
    a * (e * i - f * h) - b * (d * i - f * g) + c * (d * h - e * g)
  }

  pub fn invert(&self) -> Option<Matrix> {
    let [a, b, c, d, e, f, g, h, i] = self.m;
    let det = self.determinant();
    if !det.is_finite() || det.abs() < INVERT_EPSILON {
      return None;
    }
    let inv_det = 1.0 / det;
    let m = [
      (e * i - f * h) * inv_det,
      (c * h - b * i) * inv_det,
      (b * f - c * e) * inv_det,
      (f * g - d * i) * inv_det,
      (a * i - c * g) * inv_det,
      (c * d - a * f) * inv_det,
      (d * h - e * g) * inv_det,
      (b * g - a * h) * inv_det,
      (a * e - b * d) * inv_det,
    ];
    if m.iter().all(|v| v.is_finite()) {
      Some(Matrix { m })
    } else {
      None
    }
  }

  /// Maps a point, performing the perspective divide. A point at or behind
  /// `w = 0` maps to non-finite coordinates, which downstream bounds logic
  /// treats as empty.
  pub fn map_point(&self, p: Point) -> Point {
    if !self.has_perspective() {
      return Point::new(
        self.m[0] * p.x + self.m[1] * p.y + self.m[2],
        self.m[3] * p.x + self.m[4] * p.y + self.m[5],
      );
    }
    let x = self.m[0] * p.x + self.m[1] * p.y + self.m[2];
    let y = self.m[3] * p.x + self.m[4] * p.y + self.m[5];
    let w = self.m[6] * p.x + self.m[7] * p.y + self.m[8];
    Point::new(x / w, y / w)
  }

  /// Maps a direction, ignoring translation (and perspective translation).
  pub fn map_vector(&self, v: Vector) -> Vector {
    Vector::new(
      self.m[0] * v.x + self.m[1] * v.y,
      self.m[3] * v.x + self.m[4] * v.y,
    )
  }

  /// Axis-aligned bounding box of the mapped rectangle.
  pub fn map_rect(&self, r: Rect) -> Rect {
    if r.is_empty() {
      return Rect::EMPTY;
    }
    if self.is_scale_translate() {
      let p0 = self.map_point(Point::new(r.left, r.top));
      let p1 = self.map_point(Point::new(r.right, r.bottom));
      return Rect::from_ltrb(
        p0.x.min(p1.x),
        p0.y.min(p1.y),
        p0.x.max(p1.x),
        p0.y.max(p1.y),
      );
    }
    let mut left = f32::INFINITY;
    let mut top = f32::INFINITY;
    let mut right = f32::NEG_INFINITY;
    let mut bottom = f32::NEG_INFINITY;
    for corner in r.corners() {
      let p = self.map_point(corner);
      if !p.is_finite() {
        return Rect::EMPTY;
      }
      left = left.min(p.x);
      top = top.min(p.y);
      right = right.max(p.x);
      bottom = bottom.max(p.y);
    }
    Rect::from_ltrb(left, top, right, bottom)
  }

  /// Pixel-precise mapping for integer rectangles.
  ///
  /// Scale-translate matrices are applied in double precision with the
  /// epsilon-adjusted rounding so exact integer inputs survive transforms
  /// whose float form is a hair off. Anything else maps the float rect and
  /// rounds out.
  pub fn map_irect(&self, r: IRect) -> IRect {
    if r.is_empty() {
      return IRect::EMPTY;
    }
    if self.is_scale_translate() {
      let sx = self.m[0] as f64;
      let sy = self.m[4] as f64;
      let tx = self.m[2] as f64;
      let ty = self.m[5] as f64;
      let l = sx * r.left as f64 + tx;
      let rt = sx * r.right as f64 + tx;
      let t = sy * r.top as f64 + ty;
      let b = sy * r.bottom as f64 + ty;
      let eps = ROUND_EPSILON as f64;
      return IRect::from_ltrb(
        saturate_i32((l.min(rt) + eps).floor()),
        saturate_i32((t.min(b) + eps).floor()),
        saturate_i32((l.max(rt) - eps).ceil()),
        saturate_i32((t.max(b) - eps).ceil()),
      );
    }
    round_out(self.map_rect(Rect::from_irect(r)))
  }

  /// Inverse of [`Matrix::map_irect`] without computing a full inverse for
  /// scale-translate matrices, preserving the same 1-pixel precision.
  pub fn inverse_map_irect(&self, r: IRect) -> Option<IRect> {
    if r.is_empty() {
      // An empty input inverse-maps to an empty rect "successfully".
      return Some(IRect::EMPTY);
    }
    if self.is_scale_translate() {
      let sx = self.m[0] as f64;
      let sy = self.m[4] as f64;
      if sx == 0.0 || sy == 0.0 {
        return None;
      }
      let tx = self.m[2] as f64;
      let ty = self.m[5] as f64;
      let l = (r.left as f64 - tx) / sx;
      let rt = (r.right as f64 - tx) / sx;
      let t = (r.top as f64 - ty) / sy;
      let b = (r.bottom as f64 - ty) / sy;
      let eps = ROUND_EPSILON as f64;
      return Some(IRect::from_ltrb(
        saturate_i32((l.min(rt) + eps).floor()),
        saturate_i32((t.min(b) + eps).floor()),
        saturate_i32((l.max(rt) - eps).ceil()),
        saturate_i32((t.max(b) - eps).ceil()),
      ));
    }
    let inv = self.invert()?;
    Some(round_out(inv.map_rect(Rect::from_irect(r))))
  }

  pub fn inverse_map_rect(&self, r: Rect) -> Option<Rect> {
    if r.is_empty() {
      return Some(Rect::EMPTY);
    }
    let inv = self.invert()?;
    Some(inv.map_rect(r))
  }

  /// Splits into `remaining * scale(sx, sy)`; fails for perspective or a
  /// degenerate axis.
  pub fn decompose_scale(&self) -> Option<(Size, Matrix)> {
    if self.has_perspective() {
      return None;
    }
    let sx = Vector::new(self.m[0], self.m[3]).length();
    let sy = Vector::new(self.m[1], self.m[4]).length();
    if !sx.is_finite() || !sy.is_finite() || sx.abs() < INVERT_EPSILON || sy.abs() < INVERT_EPSILON
    {
      return None;
    }
    let mut remaining = *self;
    remaining.pre_scale(1.0 / sx, 1.0 / sy);
    Some((Size::new(sx, sy), remaining))
  }

  /// Min and max scale factors (singular values of the upper 2x2); fails
  /// for perspective.
  pub fn min_max_scales(&self) -> Option<(f32, f32)> {
    if self.has_perspective() {
      return None;
    }
    let [a, b, _, c, d, ..] = self.m;
    // Eigenvalues of M^T M.
    let p = a * a + c * c;
    let q = b * b + d * d;
    let r = a * b + c * d;
    let trace = p + q;
    let disc = ((p - q) * (p - q) + 4.0 * r * r).max(0.0).sqrt();
    let s_max_sq = 0.5 * (trace + disc);
    let s_min_sq = (0.5 * (trace - disc)).max(0.0);
    if !s_max_sq.is_finite() {
      return None;
    }
    Some((s_min_sq.sqrt(), s_max_sq.sqrt()))
  }

  /// The local area scale factor of the projective map at `p`, used to pick
  /// a representative resolution for perspective layers. Returns infinity
  /// when `p` sits at or behind the `w = 0` plane.
  pub fn differential_area_scale(&self, p: Point) -> f32 {
    let x = self.m[0] * p.x + self.m[1] * p.y + self.m[2];
    let y = self.m[3] * p.x + self.m[4] * p.y + self.m[5];
    let w = self.m[6] * p.x + self.m[7] * p.y + self.m[8];
    if !(w > INVERT_EPSILON) {
      return f32::INFINITY;
    }
    let px = x / w;
    let py = y / w;
    let j00 = self.m[0] - self.m[6] * px;
    let j01 = self.m[1] - self.m[7] * px;
    let j10 = self.m[3] - self.m[6] * py;
    let j11 = self.m[4] - self.m[7] * py;
    ((j00 * j11 - j01 * j10) / (w * w)).abs()
  }

  /// If the matrix is within [`ROUND_EPSILON`] of an integer translation,
  /// returns that translation.
  pub fn as_integer_translation(&self) -> Option<IPoint> {
    let tx = (self.m[2] / self.m[8]).round();
    let ty = (self.m[5] / self.m[8]).round();
    if !tx.is_finite() || !ty.is_finite() {
      return None;
    }
    let expected = Matrix::translate(tx, ty);
    for i in 0..9 {
      if (self.m[i] - expected.m[i]).abs() > ROUND_EPSILON {
        return None;
      }
    }
    Some(IPoint::new(tx as i32, ty as i32))
  }
}

/// `concat(a, b)` applies `b` first, then `a`.
pub fn concat(a: &Matrix, b: &Matrix) -> Matrix {
  let mut out = [0.0f32; 9];
  for row in 0..3 {
    for col in 0..3 {
      out[row * 3 + col] = a.m[row * 3] * b.m[col]
        + a.m[row * 3 + 1] * b.m[3 + col]
        + a.m[row * 3 + 2] * b.m[6 + col];
    }
  }
  Matrix { m: out }
}

fn saturate_i32(v: f64) -> i32 {
  if v >= i32::MAX as f64 {
    i32::MAX
  } else if v <= i32::MIN as f64 {
    i32::MIN
  } else {
    v as i32
  }
}

/// Splits `transform` into `post_scaling * scaling` where `scaling` is
/// axis-aligned, choosing the scale to minimize post-filter resampling.
///
/// With perspective there is no exact factoring; a single isotropic factor
/// is estimated from the differential area scale at `representative_point`
/// (square-rooted to go from area to per-axis). A point behind `w = 0`
/// leaves the scale at identity.
pub(crate) fn decompose_transform(transform: &Matrix, representative_point: Point) -> (Matrix, Matrix) {
  if let Some((scale, post_scaling)) = transform.decompose_scale() {
    (post_scaling, Matrix::scale(scale.width, scale.height))
  } else {
    let area = transform.differential_area_scale(representative_point);
    let approx_scale = if area.is_finite() && area > INVERT_EPSILON {
      area.sqrt()
    } else {
      1.0
    };
    let mut post_scaling = *transform;
    post_scaling.pre_scale(1.0 / approx_scale, 1.0 / approx_scale);
    (post_scaling, Matrix::scale(approx_scale, approx_scale))
  }
}

/// Per-edge test of whether the quad `matrix * src` contains `dst`, within
/// `tolerance`. The result is ordered top, right, bottom, left, naming the
/// edges of `src` in its own space.
///
/// Implemented by inverse-mapping the corners of `dst` into the source
/// space; the tolerance therefore applies in source units. A non-invertible
/// matrix or a corner behind `w = 0` reports every edge exceeded.
pub(crate) fn quad_contains_rect_mask(
  matrix: &Matrix,
  src: Rect,
  dst: Rect,
  tolerance: f32,
) -> [bool; 4] {
  let Some(inv) = matrix.invert() else {
    return [false; 4];
  };
  let mut mask = [true; 4];
  for corner in dst.corners() {
    if matrix.has_perspective() {
      let w = inv.m[6] * corner.x + inv.m[7] * corner.y + inv.m[8];
      if !(w > 0.0) {
        return [false; 4];
      }
    }
    let p = inv.map_point(corner);
    if !p.is_finite() {
      return [false; 4];
    }
    mask[0] &= p.y >= src.top - tolerance;
    mask[1] &= p.x <= src.right + tolerance;
    mask[2] &= p.y <= src.bottom + tolerance;
    mask[3] &= p.x >= src.left - tolerance;
  }
  mask
}

/// True when the quad `matrix * src` contains all of `dst` within
/// `tolerance`.
pub(crate) fn quad_contains_rect(matrix: &Matrix, src: Rect, dst: Rect, tolerance: f32) -> bool {
  quad_contains_rect_mask(matrix, src, dst, tolerance) == [true; 4]
}
