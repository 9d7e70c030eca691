//! Blending of premultiplied colors

use std::fmt;

/// Porter-Duff and coefficient-expressible separable blend modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
  Clear,
  Src,
  Dst,
  SrcOver,
  DstOver,
  SrcIn,
  DstIn,
  SrcOut,
  DstOut,
  SrcAtop,
  DstAtop,
  Xor,
  Plus,
  Modulate,
  Screen,
}

impl BlendMode {
  /// Blends premultiplied `src` over premultiplied `dst`.
  pub fn apply(self, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let sa = src[3];
    let da = dst[3];
    match self {
      BlendMode::Modulate => [
        src[0] * dst[0],
        src[1] * dst[1],
        src[2] * dst[2],
        src[3] * dst[3],
      ],
      BlendMode::Screen => [
        src[0] + dst[0] - src[0] * dst[0],
        src[1] + dst[1] - src[1] * dst[1],
        src[2] + dst[2] - src[2] * dst[2],
        src[3] + dst[3] - src[3] * dst[3],
      ],
      BlendMode::Plus => [
        (src[0] + dst[0]).min(1.0),
        (src[1] + dst[1]).min(1.0),
        (src[2] + dst[2]).min(1.0),
        (src[3] + dst[3]).min(1.0),
      ],
      _ => {
        let (fs, fd) = self.coefficients(sa, da);
        [
          src[0] * fs + dst[0] * fd,
          src[1] * fs + dst[1] * fd,
          src[2] * fs + dst[2] * fd,
          src[3] * fs + dst[3] * fd,
        ]
      }
    }
  }

  fn coefficients(self, sa: f32, da: f32) -> (f32, f32) {
    match self {
      BlendMode::Clear => (0.0, 0.0),
      BlendMode::Src => (1.0, 0.0),
      BlendMode::Dst => (0.0, 1.0),
      BlendMode::SrcOver => (1.0, 1.0 - sa),
      BlendMode::DstOver => (1.0 - da, 1.0),
      BlendMode::SrcIn => (da, 0.0),
      BlendMode::DstIn => (0.0, sa),
      BlendMode::SrcOut => (1.0 - da, 0.0),
      BlendMode::DstOut => (0.0, 1.0 - sa),
      BlendMode::SrcAtop => (da, 1.0 - sa),
      BlendMode::DstAtop => (1.0 - da, sa),
      BlendMode::Xor => (1.0 - da, 1.0 - sa),
      // Handled before coefficient dispatch.
      BlendMode::Plus | BlendMode::Modulate | BlendMode::Screen => (1.0, 1.0),
    }
  }

  /// True when blending a transparent-black source changes the destination,
  /// i.e. the destination coefficient under `sa = 0` is not one.
  pub fn affects_transparent_black(self) -> bool {
    matches!(
      self,
      BlendMode::Clear
        | BlendMode::Src
        | BlendMode::SrcIn
        | BlendMode::DstIn
        | BlendMode::SrcOut
        | BlendMode::DstAtop
        | BlendMode::Modulate
    )
  }
}

/// Programmable blending between a filter output and the destination.
pub trait Blender: fmt::Debug + Send + Sync {
  /// Blends premultiplied `src` into premultiplied `dst`.
  fn blend(&self, src: [f32; 4], dst: [f32; 4]) -> [f32; 4];

  /// Whether `blend(transparent, dst)` can differ from `dst`. Decides if a
  /// draw must cover pixels the source image never touches.
  fn affects_transparent_black(&self) -> bool;
}

/// A [`Blender`] for a fixed [`BlendMode`].
#[derive(Debug, Clone, Copy)]
pub struct BlendModeBlender(pub BlendMode);

impl Blender for BlendModeBlender {
  fn blend(&self, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    self.0.apply(src, dst)
  }

  fn affects_transparent_black(&self) -> bool {
    self.0.affects_transparent_black()
  }
}
