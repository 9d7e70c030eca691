//! Evaluation statistics
//!
//! Five counters describing how much real work a filter evaluation did:
//! nodes visited, cache hits, offscreen surfaces rendered, and how many
//! draws needed shader-based tiling (split by clamp vs the other modes,
//! since clamp is the cheap case). The sink is shared by value through
//! `Context` clones and uses relaxed atomics; a single evaluation is
//! single-threaded, the atomics just make sharing across evaluations safe.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::sampling::TileMode;
use crate::trace::TraceHandle;

#[derive(Debug, Default)]
pub struct Stats {
  num_visited_image_filters: AtomicU32,
  num_cache_hits: AtomicU32,
  num_offscreen_surfaces: AtomicU32,
  num_shader_clamped_draws: AtomicU32,
  num_shader_based_tiling_draws: AtomicU32,
}

impl Stats {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn mark_visited_image_filter(&self) {
    self.num_visited_image_filters.fetch_add(1, Ordering::Relaxed);
  }

  pub fn mark_cache_hit(&self) {
    self.num_cache_hits.fetch_add(1, Ordering::Relaxed);
  }

  pub fn mark_new_surface(&self) {
    self.num_offscreen_surfaces.fetch_add(1, Ordering::Relaxed);
  }

  pub fn mark_shader_based_tiling(&self, tile_mode: TileMode) {
    match tile_mode {
      TileMode::Clamp => self.num_shader_clamped_draws.fetch_add(1, Ordering::Relaxed),
      _ => self
        .num_shader_based_tiling_draws
        .fetch_add(1, Ordering::Relaxed),
    };
  }

  pub fn visited_image_filters(&self) -> u32 {
    self.num_visited_image_filters.load(Ordering::Relaxed)
  }

  pub fn cache_hits(&self) -> u32 {
    self.num_cache_hits.load(Ordering::Relaxed)
  }

  pub fn offscreen_surfaces(&self) -> u32 {
    self.num_offscreen_surfaces.load(Ordering::Relaxed)
  }

  pub fn shader_clamped_draws(&self) -> u32 {
    self.num_shader_clamped_draws.load(Ordering::Relaxed)
  }

  pub fn shader_based_tiling_draws(&self) -> u32 {
    self.num_shader_based_tiling_draws.load(Ordering::Relaxed)
  }

  /// Human-readable report of the counters.
  pub fn dump(&self) -> String {
    format!(
      "ImageFilter Stats:\n\
       \x20     # visited filters: {}\n\
       \x20          # cache hits: {}\n\
       \x20  # offscreen surfaces: {}\n\
       \x20# shader-clamped draws: {}\n\
       \x20  # shader-tiled draws: {}\n",
      self.visited_image_filters(),
      self.cache_hits(),
      self.offscreen_surfaces(),
      self.shader_clamped_draws(),
      self.shader_based_tiling_draws(),
    )
  }

  /// Emits the counters as two instant trace events: graph size and
  /// surface/tiling work.
  pub fn report(&self, trace: &TraceHandle) {
    trace.instant(
      "ImageFilter Graph Size",
      &[
        ("count", self.visited_image_filters() as u64),
        ("cache hits", self.cache_hits() as u64),
      ],
    );
    trace.instant(
      "ImageFilter Surfaces",
      &[
        ("count", self.offscreen_surfaces() as u64),
        ("shader clamp", self.shader_clamped_draws() as u64),
        ("shader tiled", self.shader_based_tiling_draws() as u64),
      ],
    );
  }
}
