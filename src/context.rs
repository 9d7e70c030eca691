//! Per-evaluation environment

use std::sync::Arc;

use crate::backend::Backend;
use crate::color::ColorSpace;
use crate::geometry::IRect;
use crate::mapping::Mapping;
use crate::sampling::TileMode;
use crate::space::LayerSpace;
use crate::stats::Stats;

/// Everything one traversal of a filter graph evaluates against: the
/// coordinate mapping, the layer-space rectangle the current node must
/// produce, the pixel backend, the target color space, and the stats sink.
///
/// Contexts are cheap to clone; derived contexts (`with_new_desired_output`
/// and friends) share the backend and stats sink.
#[derive(Clone)]
pub struct Context {
  mapping: Mapping,
  desired_output: LayerSpace<IRect>,
  backend: Arc<dyn Backend>,
  color_space: ColorSpace,
  stats: Arc<Stats>,
}

impl Context {
  pub fn new(
    mapping: Mapping,
    desired_output: LayerSpace<IRect>,
    backend: Arc<dyn Backend>,
    color_space: ColorSpace,
  ) -> Self {
    Self {
      mapping,
      desired_output,
      backend,
      color_space,
      stats: Arc::new(Stats::new()),
    }
  }

  pub fn with_stats(mut self, stats: Arc<Stats>) -> Self {
    self.stats = stats;
    self
  }

  pub fn mapping(&self) -> &Mapping {
    &self.mapping
  }

  /// The layer-space rectangle the current filter node has been asked to
  /// produce.
  pub fn desired_output(&self) -> LayerSpace<IRect> {
    self.desired_output
  }

  pub fn backend(&self) -> &Arc<dyn Backend> {
    &self.backend
  }

  pub fn color_space(&self) -> ColorSpace {
    self.color_space
  }

  pub fn stats(&self) -> &Arc<Stats> {
    &self.stats
  }

  pub fn with_new_desired_output(&self, desired_output: LayerSpace<IRect>) -> Context {
    let mut ctx = self.clone();
    ctx.desired_output = desired_output;
    ctx
  }

  pub fn with_new_mapping(&self, mapping: Mapping) -> Context {
    let mut ctx = self.clone();
    ctx.mapping = mapping;
    ctx
  }

  pub fn with_new_color_space(&self, color_space: ColorSpace) -> Context {
    let mut ctx = self.clone();
    ctx.color_space = color_space;
    ctx
  }

  pub fn mark_visited_image_filter(&self) {
    self.stats.mark_visited_image_filter();
  }

  pub fn mark_cache_hit(&self) {
    self.stats.mark_cache_hit();
  }

  pub(crate) fn mark_new_surface(&self) {
    self.stats.mark_new_surface();
  }

  pub(crate) fn mark_shader_based_tiling_required(&self, tile_mode: TileMode) {
    self.stats.mark_shader_based_tiling(tile_mode);
  }
}
