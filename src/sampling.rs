//! Sampling policies and tile modes

/// Filtering applied when a sample does not land on a texel center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
  Nearest,
  Linear,
}

/// Mip level selection. Special images are never mipmapped by this pipeline,
/// but the mode participates in sampling equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MipmapMode {
  None,
  Nearest,
  Linear,
}

/// Parameters of the cubic resampling family (Mitchell-Netravali).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicResampler {
  pub b: f32,
  pub c: f32,
}

impl CubicResampler {
  pub const fn mitchell() -> Self {
    Self {
      b: 1.0 / 3.0,
      c: 1.0 / 3.0,
    }
  }

  pub const fn catmull_rom() -> Self {
    Self { b: 0.0, c: 0.5 }
  }
}

/// How an image is sampled: a filter/mipmap pair, a bicubic resampler, or
/// an anisotropic level. The three are disjoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingOptions {
  Filter {
    filter: FilterMode,
    mipmap: MipmapMode,
  },
  Cubic(CubicResampler),
  Aniso {
    max_aniso: u32,
  },
}

/// Default sampling for deferred transforms: bilinear, no mipmaps. Bilinear
/// merges maximally in the sampling algebra.
pub const DEFAULT_SAMPLING: SamplingOptions = SamplingOptions::Filter {
  filter: FilterMode::Linear,
  mipmap: MipmapMode::None,
};

/// Nearest-neighbor sampling.
pub const NEAREST: SamplingOptions = SamplingOptions::Filter {
  filter: FilterMode::Nearest,
  mipmap: MipmapMode::None,
};

impl SamplingOptions {
  pub fn is_aniso(&self) -> bool {
    matches!(self, SamplingOptions::Aniso { .. })
  }

  pub fn is_cubic(&self) -> bool {
    matches!(self, SamplingOptions::Cubic(_))
  }

  pub fn aniso(max_aniso: u32) -> Self {
    SamplingOptions::Aniso {
      max_aniso: max_aniso.max(1),
    }
  }
}

impl Default for SamplingOptions {
  fn default() -> Self {
    DEFAULT_SAMPLING
  }
}

/// What an image produces outside its pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileMode {
  /// Edge pixels extend outward.
  Clamp,
  /// The image repeats periodically.
  Repeat,
  /// The image repeats, flipped every other period.
  Mirror,
  /// Outside samples are transparent black.
  Decal,
}

impl TileMode {
  pub fn is_periodic(self) -> bool {
    matches!(self, TileMode::Repeat | TileMode::Mirror)
  }
}
