//! Error types for the surface/allocation layer
//!
//! Filter operations themselves are total: failure is the empty
//! FilterResult (an absent image), never an error value. The fallible edge
//! is surface allocation, which sits behind `Backend::make_device`; these
//! errors exist so the raster backend can guard allocations precisely and
//! collapse the result to `None` at the trait boundary.

use thiserror::Error;

/// Result alias for surface allocation paths.
pub type SurfaceResult<T> = std::result::Result<T, SurfaceError>;

/// Why a surface could not be allocated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
  /// Zero or negative dimensions were requested.
  #[error("surface dimensions are empty ({width}x{height})")]
  EmptyDimensions { width: i32, height: i32 },

  /// The pixel count or byte size overflowed, or exceeded the allocation
  /// budget.
  #[error("surface {width}x{height} would allocate {bytes} bytes (limit {limit})")]
  OverBudget {
    width: i32,
    height: i32,
    bytes: u64,
    limit: u64,
  },

  /// The allocator refused the reservation.
  #[error("surface allocation failed for {bytes} bytes")]
  AllocationFailed { bytes: u64 },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages_name_the_dimensions() {
    let err = SurfaceError::EmptyDimensions {
      width: 0,
      height: 10,
    };
    assert!(format!("{err}").contains("0x10"));

    let err = SurfaceError::OverBudget {
      width: 100_000,
      height: 100_000,
      bytes: 40_000_000_000,
      limit: 1,
    };
    let text = format!("{err}");
    assert!(text.contains("100000x100000"));
    assert!(text.contains("limit"));
  }
}
