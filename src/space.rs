//! Coordinate-space discipline
//!
//! Filter evaluation moves geometry between three coordinate frames: the
//! caller's *parameter* space, the *layer* space filters evaluate in, and
//! the final *device* space. Mixing them silently is the classic image
//! filter bug, so every piece of geometry is wrapped in [`Spaced`] with a
//! phantom tag, and only [`crate::mapping::Mapping`] converts between tags.
//!
//! [`Spaced::new`] is the trust boundary: constructing a tagged value
//! asserts the caller knows which frame the raw geometry lives in.

use std::fmt;
use std::marker::PhantomData;

use crate::geometry::{
  closest_disjoint_edge, round_in, round_out, IPoint, IRect, ISize, Point, Rect, Size, Vector,
  ROUND_EPSILON,
};
use crate::sampling::TileMode;
use crate::transform::Matrix;

/// Tag for the caller's local coordinates at filter invocation.
pub enum Parameter {}

/// Tag for the frame filters evaluate in.
pub enum Layer {}

/// Tag for the frame of the final target surface.
pub enum Device {}

/// Geometry tagged with the coordinate space it lives in.
///
/// The tag is purely static; a `Spaced<Layer, IRect>` is an `IRect` at
/// runtime. Same-space arithmetic is provided as inherent methods; crossing
/// spaces requires a `Mapping`.
pub struct Spaced<S, T> {
  data: T,
  _space: PhantomData<fn() -> S>,
}

pub type ParameterSpace<T> = Spaced<Parameter, T>;
pub type LayerSpace<T> = Spaced<Layer, T>;
pub type DeviceSpace<T> = Spaced<Device, T>;

impl<S, T: Clone> Clone for Spaced<S, T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      _space: PhantomData,
    }
  }
}

impl<S, T: Copy> Copy for Spaced<S, T> {}

impl<S, T: PartialEq> PartialEq for Spaced<S, T> {
  fn eq(&self, other: &Self) -> bool {
    self.data == other.data
  }
}

impl<S, T: fmt::Debug> fmt::Debug for Spaced<S, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.data.fmt(f)
  }
}

impl<S, T: Default> Default for Spaced<S, T> {
  fn default() -> Self {
    Self::new(T::default())
  }
}

impl<S, T> Spaced<S, T> {
  /// Wraps raw geometry, asserting it lives in space `S`.
  pub const fn new(data: T) -> Self {
    Self {
      data,
      _space: PhantomData,
    }
  }

  /// The raw geometry, dropping the space tag.
  pub fn into_inner(self) -> T {
    self.data
  }

  pub fn inner(&self) -> &T {
    &self.data
  }
}

impl<S> Spaced<S, IPoint> {
  pub fn x(&self) -> i32 {
    self.data.x
  }

  pub fn y(&self) -> i32 {
    self.data.y
  }
}

impl<S> Spaced<S, Point> {
  pub fn x(&self) -> f32 {
    self.data.x
  }

  pub fn y(&self) -> f32 {
    self.data.y
  }
}

impl<S> Spaced<S, ISize> {
  pub fn width(&self) -> i32 {
    self.data.width
  }

  pub fn height(&self) -> i32 {
    self.data.height
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

impl<S> Spaced<S, Size> {
  pub fn width(&self) -> f32 {
    self.data.width
  }

  pub fn height(&self) -> f32 {
    self.data.height
  }

  /// Ceiling with the rounding epsilon, matching integer rect tolerances.
  pub fn ceil(&self) -> Spaced<S, ISize> {
    Spaced::new(ISize::new(
      (self.data.width - ROUND_EPSILON).ceil() as i32,
      (self.data.height - ROUND_EPSILON).ceil() as i32,
    ))
  }
}

impl<S> Spaced<S, IRect> {
  pub fn empty() -> Self {
    Self::new(IRect::EMPTY)
  }

  pub fn left(&self) -> i32 {
    self.data.left
  }

  pub fn top(&self) -> i32 {
    self.data.top
  }

  pub fn right(&self) -> i32 {
    self.data.right
  }

  pub fn bottom(&self) -> i32 {
    self.data.bottom
  }

  pub fn width(&self) -> i32 {
    self.data.width()
  }

  pub fn height(&self) -> i32 {
    self.data.height()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn size(&self) -> Spaced<S, ISize> {
    Spaced::new(self.data.size())
  }

  pub fn top_left(&self) -> Spaced<S, IPoint> {
    Spaced::new(self.data.top_left())
  }

  pub fn intersect(self, other: Self) -> Option<Self> {
    self.data.intersect(other.data).map(Spaced::new)
  }

  pub fn union(self, other: Self) -> Self {
    Spaced::new(self.data.union(other.data))
  }

  pub fn contains(&self, other: Self) -> bool {
    self.data.contains(other.data)
  }

  pub fn offset(self, v: Spaced<S, IPoint>) -> Self {
    Spaced::new(self.data.offset(v.x(), v.y()))
  }

  pub fn outset(self, s: Spaced<S, ISize>) -> Self {
    Spaced::new(self.data.outset(s.width(), s.height()))
  }

  pub fn inset(self, s: Spaced<S, ISize>) -> Self {
    Spaced::new(self.data.inset(s.width(), s.height()))
  }

  /// The portion of `self` relevant when it is tiled over `dst`.
  ///
  /// Decal and clamp only sample what overlaps `dst`; a disjoint decal is
  /// empty, a disjoint clamp still needs the closest edge or corner pixels.
  /// Periodic modes sample everything, so the source is returned unchanged.
  pub fn relevant_subset(self, dst: Self, tile_mode: TileMode) -> Self {
    match tile_mode {
      TileMode::Decal | TileMode::Clamp => match self.intersect(dst) {
        Some(fitted) => fitted,
        None if tile_mode == TileMode::Decal => Self::empty(),
        None => Spaced::new(closest_disjoint_edge(self.data, dst.data)),
      },
      TileMode::Repeat | TileMode::Mirror => self,
    }
  }
}

impl<S> Spaced<S, Rect> {
  pub fn empty() -> Self {
    Self::new(Rect::EMPTY)
  }

  pub fn from_irect(r: Spaced<S, IRect>) -> Self {
    Self::new(Rect::from_irect(r.into_inner()))
  }

  pub fn left(&self) -> f32 {
    self.data.left
  }

  pub fn top(&self) -> f32 {
    self.data.top
  }

  pub fn right(&self) -> f32 {
    self.data.right
  }

  pub fn bottom(&self) -> f32 {
    self.data.bottom
  }

  pub fn width(&self) -> f32 {
    self.data.width()
  }

  pub fn height(&self) -> f32 {
    self.data.height()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn intersect(self, other: Self) -> Option<Self> {
    self.data.intersect(other.data).map(Spaced::new)
  }

  pub fn union(self, other: Self) -> Self {
    Spaced::new(self.data.union(other.data))
  }

  pub fn round_out(&self) -> Spaced<S, IRect> {
    Spaced::new(round_out(self.data))
  }

  pub fn round_in(&self) -> Spaced<S, IRect> {
    Spaced::new(round_in(self.data))
  }
}

impl<S> Spaced<S, Matrix> {
  pub fn identity() -> Self {
    Self::new(Matrix::IDENTITY)
  }

  /// `self = other * self` within the same space.
  pub fn post_concat(&mut self, other: Self) {
    self.data.post_concat(other.inner());
  }

  /// `self = self * other` within the same space.
  pub fn pre_concat(&mut self, other: Self) {
    self.data.pre_concat(other.inner());
  }

  pub fn invert(&self) -> Option<Self> {
    self.data.invert().map(Spaced::new)
  }

  pub fn map_rect(&self, r: Spaced<S, Rect>) -> Spaced<S, Rect> {
    Spaced::new(self.data.map_rect(r.into_inner()))
  }

  /// Pixel-precise rect mapping; see [`Matrix::map_irect`].
  pub fn map_irect(&self, r: Spaced<S, IRect>) -> Spaced<S, IRect> {
    Spaced::new(self.data.map_irect(r.into_inner()))
  }

  pub fn map_point(&self, p: Spaced<S, Point>) -> Spaced<S, Point> {
    Spaced::new(self.data.map_point(p.into_inner()))
  }

  pub fn map_vector(&self, v: Spaced<S, Vector>) -> Spaced<S, Vector> {
    Spaced::new(self.data.map_vector(v.into_inner()))
  }

  pub fn inverse_map_irect(&self, r: Spaced<S, IRect>) -> Option<Spaced<S, IRect>> {
    self.data.inverse_map_irect(r.into_inner()).map(Spaced::new)
  }

  pub fn inverse_map_rect(&self, r: Spaced<S, Rect>) -> Option<Spaced<S, Rect>> {
    self.data.inverse_map_rect(r.into_inner()).map(Spaced::new)
  }

  pub fn as_integer_translation(&self) -> Option<Spaced<S, IPoint>> {
    self.data.as_integer_translation().map(Spaced::new)
  }
}

/// Union over an indexed set of same-space rectangles.
pub fn union_of<S, F>(count: usize, mut rect_at: F) -> Spaced<S, IRect>
where
  F: FnMut(usize) -> Spaced<S, IRect>,
{
  let mut acc = Spaced::<S, IRect>::empty();
  for i in 0..count {
    acc = acc.union(rect_at(i));
  }
  acc
}
