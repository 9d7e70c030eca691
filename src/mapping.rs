//! Decomposing a CTM into layer and device components
//!
//! A filter node cannot always evaluate under the full current transform:
//! a blur under a rotation must blur in an axis-aligned frame and let the
//! rotation apply afterwards. [`Mapping`] holds that split: a
//! parameter-to-layer matrix filters evaluate with, and a layer-to-device
//! remainder applied when the filtered result is drawn.

use crate::geometry::{IPoint, IRect, ISize, IVector, Point, Rect, Size, Vector, ROUND_EPSILON};
use crate::space::{DeviceSpace, LayerSpace, ParameterSpace, Spaced};
use crate::transform::{concat, decompose_transform, Matrix};

/// The most general layer matrix a filter can tolerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatrixCapability {
  /// The filter must evaluate axis-aligned at unit scale; everything is
  /// applied post-filter.
  Translate,
  /// The filter tolerates axis-aligned scaling.
  ScaleTranslate,
  /// The filter handles any matrix.
  Complex,
}

/// The bridge between parameter, layer, and device space.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
  param_to_layer: Matrix,
  layer_to_dev: Matrix,
  dev_to_layer: Matrix,
}

impl Default for Mapping {
  fn default() -> Self {
    Self::identity()
  }
}

impl Mapping {
  pub fn identity() -> Self {
    Self {
      param_to_layer: Matrix::IDENTITY,
      layer_to_dev: Matrix::IDENTITY,
      dev_to_layer: Matrix::IDENTITY,
    }
  }

  /// A mapping whose layer space equals device space, with `layer` as the
  /// parameter-to-layer matrix.
  pub fn with_layer_matrix(layer: Matrix) -> Self {
    Self {
      param_to_layer: layer,
      layer_to_dev: Matrix::IDENTITY,
      dev_to_layer: Matrix::IDENTITY,
    }
  }

  /// Splits `ctm` into a layer matrix no more general than `capability` and
  /// an invertible remainder applied post-filter.
  ///
  /// For matrices beyond the capability, an axis-aligned scale is factored
  /// out to minimize post-filter resampling; under perspective a single
  /// isotropic scale is estimated at `representative_point`. Returns `None`
  /// when the remainder is not invertible, in which case layering should be
  /// abandoned: the scale factors are so extreme that no drawing would be
  /// reasonable.
  pub fn decompose_ctm(
    ctm: &Matrix,
    capability: MatrixCapability,
    representative_point: ParameterSpace<Point>,
  ) -> Option<Mapping> {
    let (layer, remainder) = if capability == MatrixCapability::Translate {
      // Apply the entire CTM post-filtering.
      (Matrix::IDENTITY, *ctm)
    } else if ctm.is_scale_translate() || capability == MatrixCapability::Complex {
      // The layer space can be equivalent to device space.
      (*ctm, Matrix::IDENTITY)
    } else {
      let (post_scaling, scaling) = decompose_transform(ctm, *representative_point.inner());
      (scaling, post_scaling)
    };

    let inv_remainder = remainder.invert()?;
    Some(Mapping {
      param_to_layer: layer,
      layer_to_dev: remainder,
      dev_to_layer: inv_remainder,
    })
  }

  /// Composes an additional layer-space transform into the mapping. Fails
  /// (leaving the mapping untouched) when `layer` is singular.
  pub fn adjust_layer_space(&mut self, layer: &Matrix) -> bool {
    let Some(inv_layer) = layer.invert() else {
      return false;
    };
    self.param_to_layer.post_concat(layer);
    self.dev_to_layer.post_concat(layer);
    self.layer_to_dev.pre_concat(&inv_layer);
    true
  }

  pub fn layer_matrix(&self) -> LayerSpace<Matrix> {
    Spaced::new(self.param_to_layer)
  }

  pub fn layer_to_device(&self) -> &Matrix {
    &self.layer_to_dev
  }

  pub fn device_to_layer(&self) -> &Matrix {
    &self.dev_to_layer
  }

  /// The full parameter-to-device transform.
  pub fn total_matrix(&self) -> Matrix {
    concat(&self.layer_to_dev, &self.param_to_layer)
  }

  pub fn param_to_layer<T: MapGeometry>(&self, geom: ParameterSpace<T>) -> LayerSpace<T> {
    Spaced::new(geom.into_inner().map(&self.param_to_layer))
  }

  pub fn layer_to_dev<T: MapGeometry>(&self, geom: LayerSpace<T>) -> DeviceSpace<T> {
    Spaced::new(geom.into_inner().map(&self.layer_to_dev))
  }

  pub fn dev_to_layer<T: MapGeometry>(&self, geom: DeviceSpace<T>) -> LayerSpace<T> {
    Spaced::new(geom.into_inner().map(&self.dev_to_layer))
  }
}

/// Geometry that can be carried across a space boundary by a matrix.
///
/// Each type documents its own rounding contract; the important one is
/// `IRect`, which preserves 1-pixel precision for scale-translate matrices
/// by mapping in double precision with the epsilon offsets.
pub trait MapGeometry: Sized {
  fn map(self, matrix: &Matrix) -> Self;
}

impl MapGeometry for Rect {
  fn map(self, matrix: &Matrix) -> Self {
    matrix.map_rect(self)
  }
}

impl MapGeometry for IRect {
  fn map(self, matrix: &Matrix) -> Self {
    matrix.map_irect(self)
  }
}

impl MapGeometry for Point {
  fn map(self, matrix: &Matrix) -> Self {
    matrix.map_point(self)
  }
}

impl MapGeometry for IPoint {
  fn map(self, matrix: &Matrix) -> Self {
    let p = matrix.map_point(Point::new(self.x as f32, self.y as f32));
    IPoint::new(p.x.round() as i32, p.y.round() as i32)
  }
}

impl MapGeometry for Vector {
  fn map(self, matrix: &Matrix) -> Self {
    matrix.map_vector(self)
  }
}

impl MapGeometry for IVector {
  fn map(self, matrix: &Matrix) -> Self {
    let v = matrix.map_vector(Vector::new(self.x as f32, self.y as f32));
    IVector::new(v.x.round() as i32, v.y.round() as i32)
  }
}

// Sizes are non-positioned: they specify lengths along the local axes and
// map to the lengths of those mapped axes.
impl MapGeometry for Size {
  fn map(self, matrix: &Matrix) -> Self {
    if matrix.is_scale_translate() {
      let v = matrix.map_vector(Vector::new(self.width, self.height));
      return Size::new(v.x.abs(), v.y.abs());
    }
    let x_axis = matrix.map_vector(Vector::new(self.width, 0.0));
    let y_axis = matrix.map_vector(Vector::new(0.0, self.height));
    Size::new(x_axis.length(), y_axis.length())
  }
}

impl MapGeometry for ISize {
  fn map(self, matrix: &Matrix) -> Self {
    let s = Size::new(self.width as f32, self.height as f32).map(matrix);
    ISize::new(
      (s.width - ROUND_EPSILON).ceil() as i32,
      (s.height - ROUND_EPSILON).ceil() as i32,
    )
  }
}

// Conjugation: if `matrix` maps space C1 to C2 and `self` operates within
// C1, the result operates within C2.
impl MapGeometry for Matrix {
  fn map(self, matrix: &Matrix) -> Self {
    let Some(inv) = matrix.invert() else {
      debug_assert!(false, "conjugating by a singular matrix");
      return self;
    };
    let mut out = inv;
    out.post_concat(&self);
    out.post_concat(matrix);
    out
  }
}
