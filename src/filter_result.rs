//! The lazy filter value
//!
//! A [`FilterResult`] is an image plus deferred work: a layer-space
//! transform, a sampling policy, a tile mode, a color filter, and a soft
//! crop (`layer_bounds`). The evaluation order is fixed: sample the image,
//! tile, color-filter, crop. Every operation either folds into that pending
//! state algebraically or materializes pixels through an [`AutoSurface`];
//! the bounds analysis decides which edges and effects are actually visible
//! and therefore which simplifications are sound.
//!
//! Failure is always the empty result (no image); no operation here returns
//! an error.

use std::sync::Arc;

use crate::blend::Blender;
use crate::color::Color;
use crate::color_filter::{compose_color_filters, ColorFilter};
use crate::context::Context;
use crate::geometry::{IPoint, IRect, ISize, Rect, Size, ROUND_EPSILON};
use crate::image::SpecialImage;
use crate::mapping::MapGeometry;
use crate::sampling::{FilterMode, SamplingOptions, TileMode, DEFAULT_SAMPLING, NEAREST};
use crate::shader::{
  with_color_filter, with_color_space_xform, with_local_matrix, LayerDecalShader, Shader,
};
use crate::space::{LayerSpace, ParameterSpace, Spaced};
use crate::surface::{Device, Paint, SrcRectConstraint, SurfaceProps};
use crate::transform::{
  decompose_transform, quad_contains_rect, quad_contains_rect_mask, Matrix,
};

/// What the bounds analyzer found about a FilterResult relative to a
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundsAnalysis(u8);

impl BoundsAnalysis {
  /// The image fully covers the destination with no deferred effects
  /// visible.
  pub const SIMPLE: Self = Self(0);
  /// The layer-bounds crop is visible and must be applied externally
  /// (clip or resolve).
  pub const REQUIRES_LAYER_CROP: Self = Self(1 << 0);
  /// The image's mapped pixels do not cover the destination.
  pub const DST_BOUNDS_NOT_COVERED: Self = Self(1 << 1);
  /// Tiling or a transparency-affecting color filter produces content
  /// beyond the image, out to the layer bounds.
  pub const HAS_LAYER_FILLING_EFFECT: Self = Self(1 << 2);
  /// Sampling would read texels outside the image subset across a
  /// non-hardware edge, so tiling must happen in shader logic.
  pub const REQUIRES_SHADER_TILING: Self = Self(1 << 3);
  /// Decal tiling must be evaluated in layer space to keep its antialiased
  /// edge at layer resolution.
  pub const REQUIRES_DECAL_IN_LAYER_SPACE: Self = Self(1 << 4);

  pub fn contains(self, flags: Self) -> bool {
    self.0 & flags.0 == flags.0
  }

  pub fn remove(&mut self, flags: Self) {
    self.0 &= !flags.0;
  }
}

impl std::ops::BitOr for BoundsAnalysis {
  type Output = Self;

  fn bitor(self, rhs: Self) -> Self {
    Self(self.0 | rhs.0)
  }
}

impl std::ops::BitOrAssign for BoundsAnalysis {
  fn bitor_assign(&mut self, rhs: Self) {
    self.0 |= rhs.0;
  }
}

/// How a FilterResult will be consumed when wrapped as a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderFlags(u8);

impl ShaderFlags {
  pub const NONE: Self = Self(0);
  /// The shader is evaluated many times per output pixel (e.g.
  /// displacement or lighting), so deferred per-sample work should be
  /// resolved first.
  pub const SAMPLED_REPEATEDLY: Self = Self(1 << 0);
  /// The consumer samples at non-pixel-aligned coordinates.
  pub const NON_TRIVIAL_SAMPLING: Self = Self(1 << 1);

  pub fn contains(self, flags: Self) -> bool {
    self.0 & flags.0 == flags.0
  }
}

impl std::ops::BitOr for ShaderFlags {
  type Output = Self;

  fn bitor(self, rhs: Self) -> Self {
    Self(self.0 | rhs.0)
  }
}

/// Recorded drawing commands replayed into a layer; the picture machinery
/// itself lives outside this crate.
pub trait Picture {
  /// Conservative parameter-space bounds of the content.
  fn cull_rect(&self) -> Rect;

  /// Replays the content onto `device`, whose transform has been set up so
  /// drawing happens in parameter space.
  fn playback(&self, device: &mut dyn Device);
}

/// An image with deferred transform, sampling, tiling, color filter, and
/// crop. Immutable; every operation returns a new value. An absent image is
/// the canonical transparent-black (and failure) value.
#[derive(Clone, Debug)]
pub struct FilterResult {
  image: Option<Arc<SpecialImage>>,
  /// Maps the image's pixel rectangle into layer space; usually an integer
  /// translation.
  transform: LayerSpace<Matrix>,
  sampling: SamplingOptions,
  tile_mode: TileMode,
  /// Applied after sampling and tiling, before the layer-bounds crop.
  color_filter: Option<Arc<dyn ColorFilter>>,
  /// Layer-space rectangle outside which this result is transparent black.
  layer_bounds: LayerSpace<IRect>,
}

impl Default for FilterResult {
  fn default() -> Self {
    Self::empty()
  }
}

impl FilterResult {
  pub fn empty() -> Self {
    Self {
      image: None,
      transform: LayerSpace::identity(),
      sampling: DEFAULT_SAMPLING,
      tile_mode: TileMode::Decal,
      color_filter: None,
      layer_bounds: LayerSpace::<IRect>::empty(),
    }
  }

  /// Wraps an image whose top-left pixel sits at `origin` in layer space.
  pub fn from_image_and_offset(
    image: Option<Arc<SpecialImage>>,
    origin: LayerSpace<IPoint>,
  ) -> Self {
    let Some(image) = image else {
      return Self::empty();
    };
    let bounds = IRect::from_xywh(origin.x(), origin.y(), image.width(), image.height());
    Self {
      image: Some(image),
      transform: Spaced::new(Matrix::translate(origin.x() as f32, origin.y() as f32)),
      sampling: DEFAULT_SAMPLING,
      tile_mode: TileMode::Decal,
      color_filter: None,
      layer_bounds: Spaced::new(bounds),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.image.is_none()
  }

  pub fn image(&self) -> Option<&Arc<SpecialImage>> {
    self.image.as_ref()
  }

  pub fn layer_bounds(&self) -> LayerSpace<IRect> {
    self.layer_bounds
  }

  pub fn transform(&self) -> &LayerSpace<Matrix> {
    &self.transform
  }

  pub fn sampling(&self) -> SamplingOptions {
    self.sampling
  }

  pub fn tile_mode(&self) -> TileMode {
    self.tile_mode
  }

  pub fn color_filter(&self) -> Option<&Arc<dyn ColorFilter>> {
    self.color_filter.as_ref()
  }

  /// Resolves all deferred state and returns the pixels plus their
  /// layer-space origin.
  pub fn image_and_offset(&self, ctx: &Context) -> (Option<Arc<SpecialImage>>, LayerSpace<IPoint>) {
    let resolved = self.resolve(ctx, self.layer_bounds, false);
    let origin = resolved.layer_bounds.top_left();
    (resolved.image, origin)
  }

  fn fills_layer_bounds(&self) -> bool {
    self.tile_mode != TileMode::Decal
      || self
        .color_filter
        .as_ref()
        .is_some_and(|cf| cf.affects_transparent_black())
  }

  fn update_tile_mode(&mut self, ctx: &Context, tile_mode: TileMode) {
    if self.image.is_some() {
      self.tile_mode = tile_mode;
      if tile_mode != TileMode::Decal {
        self.layer_bounds = ctx.desired_output();
      }
    }
  }

  /// Layer-space analysis against `dst_bounds`.
  pub fn analyze_bounds(&self, dst_bounds: LayerSpace<IRect>) -> BoundsAnalysis {
    self.analyze_bounds_with(&Matrix::IDENTITY, *dst_bounds.inner())
  }

  /// Analysis of how this result interacts with `dst_bounds` after the
  /// additional layer-to-target transform `xtra_transform`.
  fn analyze_bounds_with(&self, xtra_transform: &Matrix, dst_bounds: IRect) -> BoundsAnalysis {
    const HALF_PIXEL: f32 = 0.5;
    const CUBIC_RADIUS: f32 = 1.5;

    let Some(image) = &self.image else {
      return BoundsAnalysis::SIMPLE;
    };

    let mut analysis = BoundsAnalysis::SIMPLE;
    let fills_layer_bounds = self.fills_layer_bounds();

    // 1. Is the layer geometry visible in dst_bounds (ignoring whether any
    //    shading effect highlights that boundary)?
    let dst_rect = Rect::from_irect(dst_bounds);
    let mut pixel_center_bounds = dst_rect;
    if !quad_contains_rect(
      xtra_transform,
      Rect::from_irect(*self.layer_bounds.inner()),
      dst_rect,
      ROUND_EPSILON,
    ) {
      // 1a. If no effect fills out to the layer bounds, is the image
      //     content itself clipped by them?
      let require_layer_crop = if fills_layer_bounds {
        true
      } else {
        let image_bounds = self
          .transform
          .map_irect(Spaced::new(IRect::from_size(image.dimensions())));
        !self.layer_bounds.contains(image_bounds)
      };

      if require_layer_crop {
        analysis |= BoundsAnalysis::REQUIRES_LAYER_CROP;
        // The crop is applied externally, so sampling can be restricted to
        // the intersection of dst_bounds and the mapped layer bounds. When
        // they do not intersect (an unclipped leaf in a complex graph),
        // keep dst_bounds; sampling still does the right thing.
        let layer_in_dst = self.layer_bounds.inner().map(xtra_transform);
        if let Some(restricted) = pixel_center_bounds.intersect(Rect::from_irect(layer_in_dst)) {
          pixel_center_bounds = restricted;
        }
      }
    }

    // 2. Are the tiling and deferred color filter visible in the sampled
    //    bounds?
    let image_bounds = Rect::from_ltrb(0.0, 0.0, image.width() as f32, image.height() as f32);
    let mut net_transform = self.transform;
    net_transform.post_concat(Spaced::new(*xtra_transform));

    if !quad_contains_rect(
      net_transform.inner(),
      image_bounds,
      pixel_center_bounds,
      ROUND_EPSILON,
    ) {
      analysis |= BoundsAnalysis::DST_BOUNDS_NOT_COVERED;
      if fills_layer_bounds {
        analysis |= BoundsAnalysis::HAS_LAYER_FILLING_EFFECT;
      }
    }

    // 3. Would texels outside the subset be sampled if shader tiling were
    //    skipped?
    let sample_radius = if self.sampling.is_cubic() {
      CUBIC_RADIUS
    } else {
      HALF_PIXEL
    };
    let mut safe_image_bounds = image_bounds.inset(sample_radius, sample_radius);
    if self.sampling == DEFAULT_SAMPLING && net_transform.as_integer_translation().is_none() {
      // With default sampling, integer translations later downgrade to
      // nearest neighbor, so the half-pixel inset suffices. Staying with
      // bilinear, a tap exactly at the half-pixel boundary touches one
      // outside texel with weight zero; inset by epsilon to keep every
      // read in bounds.
      safe_image_bounds = safe_image_bounds.inset(ROUND_EPSILON, ROUND_EPSILON);
    }
    let pixel_centers = pixel_center_bounds.inset(HALF_PIXEL, HALF_PIXEL);

    let edge_mask = quad_contains_rect_mask(
      net_transform.inner(),
      safe_image_bounds,
      pixel_centers,
      ROUND_EPSILON,
    );
    if edge_mask != [true; 4] {
      // Out-of-subset sampling occurs; edges backed by the full texture
      // (hardware edges) still tile correctly without shader logic.
      let subset = image.subset();
      let backing = image.backing_store_dimensions();
      let mut hw_edge = [
        subset.top == 0,
        subset.right == backing.width,
        subset.bottom == backing.height,
        subset.left == 0,
      ];
      if self.tile_mode.is_periodic() {
        // Periodic modes need both opposite edges to be hardware edges.
        hw_edge = [
          hw_edge[0] && hw_edge[2],
          hw_edge[1] && hw_edge[3],
          hw_edge[2] && hw_edge[0],
          hw_edge[3] && hw_edge[1],
        ];
      }
      if (0..4).any(|i| !edge_mask[i] && !hw_edge[i]) {
        analysis |= BoundsAnalysis::REQUIRES_SHADER_TILING;
      }

      if self.tile_mode == TileMode::Decal {
        // Visible decal tiling only needs the layer-space treatment when
        // sampling is non-trivial and the scale is meaningfully not 1.
        let near_identity_scale = net_transform
          .inner()
          .min_max_scales()
          .is_some_and(|(min, max)| (min - 1.0).abs() <= 0.2 && (max - 1.0).abs() <= 0.2);
        if self.sampling != NEAREST && !near_identity_scale {
          analysis |= BoundsAnalysis::REQUIRES_DECAL_IN_LAYER_SPACE;
        }
      }
    }

    analysis
  }

  /// Restricts this result to `crop` and tiles it with `tile_mode`,
  /// clipped by the context's desired output.
  pub fn apply_crop(
    &self,
    ctx: &Context,
    crop: LayerSpace<IRect>,
    tile_mode: TileMode,
  ) -> FilterResult {
    if crop.is_empty() || ctx.desired_output().is_empty() {
      // An empty crop cannot be anything but fully transparent.
      return FilterResult::empty();
    }

    // The portion of 'crop' that can hold non-transparent content.
    let Some(mut crop_content) = (match &self.image {
      Some(_) => crop.intersect(self.layer_bounds),
      None => None,
    }) else {
      return FilterResult::empty();
    };

    // The subset of 'crop' relevant to the desired output.
    let mut fitted_crop = crop.relevant_subset(ctx.desired_output(), tile_mode);

    // No overlap between the non-transparent content and what tiles the
    // output means the result is empty. This restricts 'crop_content', not
    // 'fitted_crop', so transparent padding survives if periodic tiling
    // must keep the original geometry.
    match crop_content.intersect(fitted_crop) {
      Some(overlap) => crop_content = overlap,
      None => return FilterResult::empty(),
    }

    // A periodic tiling that covers the output with a single instance of
    // the image simplifies to a plain transform.
    if let Some(periodic) = periodic_axis_transform(tile_mode, fitted_crop, ctx.desired_output()) {
      return self.apply_transform(ctx, periodic, DEFAULT_SAMPLING);
    }

    let mut tile_mode = tile_mode;
    let mut preserve_transparency_in_crop = false;
    if tile_mode == TileMode::Decal {
      // The crop dimensions can shrink to the non-transparent content.
      fitted_crop = crop_content;
    } else if fitted_crop.contains(ctx.desired_output()) {
      tile_mode = TileMode::Decal;
      fitted_crop = ctx.desired_output();
    } else if !crop_content.contains(fitted_crop) {
      // Transparency inside fitted_crop must be resolved to keep the new
      // tiling geometry.
      preserve_transparency_in_crop = true;
      if self.tile_mode == TileMode::Decal && tile_mode == TileMode::Clamp {
        // Keep a 1px belt of the original decal transparency.
        crop_content = crop_content.outset(Spaced::new(ISize::new(1, 1)));
        if let Some(fitted) = fitted_crop.intersect(crop_content) {
          fitted_crop = fitted;
        }
      }
    }

    // With an integer translation, prior and new tiling can often be
    // addressed analytically by moving the crop into image space, keeping
    // later transforms and color filters foldable.
    let double_clamp = self.tile_mode == TileMode::Clamp && tile_mode == TileMode::Clamp;
    let origin = self.transform.as_integer_translation();
    if !preserve_transparency_in_crop
      && origin.is_some()
      && (double_clamp
        || !self
          .analyze_bounds(fitted_crop)
          .contains(BoundsAnalysis::HAS_LAYER_FILLING_EFFECT))
    {
      let image = self.image.as_ref().map(Arc::clone);
      let Some(image) = image else {
        return FilterResult::empty();
      };
      let mut restricted = extract_subset(
        &image,
        origin.unwrap_or_default(),
        fitted_crop,
        double_clamp,
      );
      // extract_subset does not run the color filter, so carry it over.
      restricted.color_filter = self.color_filter.clone();
      restricted.update_tile_mode(ctx, tile_mode);
      restricted
    } else if tile_mode == TileMode::Decal {
      // A decal crop is always expressible as a layer-bounds adjustment.
      debug_assert!(!preserve_transparency_in_crop);
      let mut restricted = self.clone();
      restricted.layer_bounds = fitted_crop;
      restricted
    } else {
      // A non-trivial transform must be applied before the non-decal tile
      // mode is valid over the axis-aligned crop.
      let mut tiled = self.resolve(ctx, fitted_crop, true);
      tiled.update_tile_mode(ctx, tile_mode);
      tiled
    }
  }

  /// Composes `color_filter` after any deferred filter, accounting for how
  /// transparency-affecting filters fill out the desired output.
  pub fn apply_color_filter(
    &self,
    ctx: &Context,
    color_filter: Arc<dyn ColorFilter>,
  ) -> FilterResult {
    if ctx.desired_output().is_empty() {
      return FilterResult::empty();
    }

    let mut new_layer_bounds = self.layer_bounds;
    if color_filter.affects_transparent_black() {
      let visible = match &self.image {
        Some(_) => new_layer_bounds.intersect(ctx.desired_output()),
        None => None,
      };
      let Some(visible) = visible else {
        // The visible content is fully transparent but the filter turns
        // transparent into a color: the entire output becomes that color.
        // Render one pixel and clamp-tile it.
        let flood = Spaced::new(IRect::from_xywh(
          ctx.desired_output().left(),
          ctx.desired_output().top(),
          1,
          1,
        ));
        let mut surface = AutoSurface::new(ctx, flood, false, None);
        if let Some(device) = surface.device_mut() {
          let paint = Paint {
            color: Color::TRANSPARENT,
            color_filter: Some(color_filter),
            ..Paint::default()
          };
          device.draw_paint(&paint);
        }
        let mut solid = surface.snap();
        solid.update_tile_mode(ctx, TileMode::Clamp);
        return solid;
      };
      new_layer_bounds = visible;

      if self
        .analyze_bounds(ctx.desired_output())
        .contains(BoundsAnalysis::REQUIRES_LAYER_CROP)
      {
        // The new layer bounds must become the desired output, but the
        // current crop would be lost if the filter floods past it; bake
        // the crop in first.
        new_layer_bounds = new_layer_bounds.outset(Spaced::new(ISize::new(1, 1)));
        if let Some(restricted) = new_layer_bounds.intersect(ctx.desired_output()) {
          new_layer_bounds = restricted;
        }
        let mut filtered = self.resolve(ctx, new_layer_bounds, true);
        filtered.color_filter = Some(color_filter);
        filtered.update_tile_mode(ctx, TileMode::Clamp);
        return filtered;
      }

      // Otherwise the filter fills the desired output without losing any
      // crop.
      new_layer_bounds = ctx.desired_output();
    } else {
      let visible = match &self.image {
        Some(_) => new_layer_bounds.intersect(ctx.desired_output()),
        None => None,
      };
      let Some(visible) = visible else {
        // Transparent stays transparent.
        return FilterResult::empty();
      };
      new_layer_bounds = visible;
    }

    let mut filtered = self.clone();
    filtered.layer_bounds = new_layer_bounds;
    filtered.color_filter = Some(compose_color_filters(
      color_filter,
      self.color_filter.clone(),
    ));
    filtered
  }

  /// Concatenates `transform` (and `sampling`) onto this result, resolving
  /// first only when sampling policies cannot merge or a visible crop
  /// blocks the fold.
  pub fn apply_transform(
    &self,
    ctx: &Context,
    transform: LayerSpace<Matrix>,
    sampling: SamplingOptions,
  ) -> FilterResult {
    if self.image.is_none() || ctx.desired_output().is_empty() {
      // Transformed transparent black is still transparent black.
      debug_assert!(self.color_filter.is_none());
      return FilterResult::empty();
    }

    let current_is_integer = self.transform.as_integer_translation().is_some();
    let next_is_integer = transform.as_integer_translation().is_some();
    debug_assert!(!current_is_integer || self.sampling == DEFAULT_SAMPLING);

    let mut next_sampling = if next_is_integer {
      DEFAULT_SAMPLING
    } else {
      sampling
    };

    // A visible layer-bounds edge blocks merging, unless the new transform
    // is an integer translation (then the edge stays axis-aligned and the
    // final intersection handles it).
    let is_cropped = !next_is_integer
      && self
        .analyze_bounds_with(transform.inner(), *ctx.desired_output().inner())
        .contains(BoundsAnalysis::REQUIRES_LAYER_CROP);

    let mut transformed;
    if !is_cropped
      && compatible_sampling(
        self.sampling,
        current_is_integer,
        &mut next_sampling,
        next_is_integer,
      )
    {
      transformed = self.clone();
    } else {
      // Resolve into the tightest bounds that cover the desired output
      // once transformed.
      let Some(tight_bounds) = transform.inverse_map_irect(ctx.desired_output()) else {
        return FilterResult::empty();
      };
      transformed = self.resolve(ctx, tight_bounds, false);
      if transformed.image.is_none() {
        return FilterResult::empty();
      }
    }

    transformed.sampling = next_sampling;
    transformed.transform.post_concat(transform);
    // Map the existing layer bounds (which carry prior soft crops) rather
    // than re-deriving them from the image.
    transformed.layer_bounds = transform.map_irect(transformed.layer_bounds);
    match transformed.layer_bounds.intersect(ctx.desired_output()) {
      Some(bounds) => transformed.layer_bounds = bounds,
      None => return FilterResult::empty(),
    }

    transformed
  }

  /// Materializes deferred state into a new image covering `dst_bounds`.
  ///
  /// Unless `preserve_transparency` is set, `dst_bounds` is first
  /// restricted to the layer bounds (the final crop always applies). When
  /// the deferred state is a pure decal integer translation, a sub-image is
  /// extracted instead of rendering.
  pub fn resolve(
    &self,
    ctx: &Context,
    dst_bounds: LayerSpace<IRect>,
    preserve_transparency: bool,
  ) -> FilterResult {
    let Some(image) = &self.image else {
      return FilterResult::empty();
    };
    let mut dst_bounds = dst_bounds;
    if !preserve_transparency {
      match dst_bounds.intersect(self.layer_bounds) {
        Some(bounds) => dst_bounds = bounds,
        None => return FilterResult::empty(),
      }
    }

    let subset_compatible =
      self.color_filter.is_none() && self.tile_mode == TileMode::Decal && !preserve_transparency;
    if subset_compatible {
      if let Some(origin) = self.transform.as_integer_translation() {
        return extract_subset(image, origin, dst_bounds, false);
      }
    }

    // Plain props for internal stages; surface-specific pixel geometry
    // only matters for the final target.
    let props = SurfaceProps::default();
    let mut surface = AutoSurface::new(ctx, dst_bounds, false, Some(&props));
    if let Some(device) = surface.device_mut() {
      self.draw_internal(ctx, device, false, None);
    }
    surface.snap()
  }

  /// Draws this result into `device` in layer space (the device transform
  /// is temporarily replaced by the context's layer-to-device matrix).
  pub fn draw(&self, ctx: &Context, device: &mut dyn Device, blender: Option<&Arc<dyn Blender>>) {
    let saved = device.local_to_device();
    device.set_local_to_device(*ctx.mapping().layer_to_device());
    self.draw_internal(ctx, device, true, blender);
    device.set_local_to_device(saved);
  }

  pub(crate) fn draw_internal(
    &self,
    ctx: &Context,
    device: &mut dyn Device,
    preserve_device_state: bool,
    blender: Option<&Arc<dyn Blender>>,
  ) {
    let blend_affects_transparent = blender.is_some_and(|b| b.affects_transparent_black());
    let Some(image) = &self.image else {
      // Transparent black; a no-op unless the blend mode cares.
      if blend_affects_transparent {
        let clear = Paint {
          color: Color::TRANSPARENT,
          blender: blender.cloned(),
          ..Paint::default()
        };
        device.draw_paint(&clear);
      }
      return;
    };

    let local_to_device = device.local_to_device();
    let analysis = self.analyze_bounds_with(&local_to_device, device.dev_clip_bounds());

    if analysis.contains(BoundsAnalysis::REQUIRES_LAYER_CROP) {
      if blend_affects_transparent {
        // The blend must also cover pixels outside the layer bounds, so
        // the crop has to be baked in before blending: resolve the clip
        // region and draw that.
        let Some(dst_bounds) = local_to_device.inverse_map_irect(device.dev_clip_bounds()) else {
          return;
        };
        let clipped = self.resolve(ctx, Spaced::new(dst_bounds), false);
        clipped.draw_internal(ctx, device, preserve_device_state, blender);
        return;
      }
      if preserve_device_state {
        device.push_clip_stack();
      }
      device.clip_rect(Rect::from_irect(*self.layer_bounds.inner()), true);
    }

    // An integer-translation chain under default sampling is equivalent to
    // nearest neighbor; downgrade explicitly so shader paths cannot leak
    // neighboring texels through bilinear edge taps.
    let mut sampling = self.sampling;
    if sampling == DEFAULT_SAMPLING
      && self.transform.as_integer_translation().is_some()
      && local_to_device.as_integer_translation().is_some()
    {
      sampling = NEAREST;
    }

    let mut paint = Paint {
      blender: blender.cloned(),
      ..Paint::default()
    };

    if analysis.contains(BoundsAnalysis::HAS_LAYER_FILLING_EFFECT)
      || (blend_affects_transparent && analysis.contains(BoundsAnalysis::DST_BOUNDS_NOT_COVERED))
    {
      // Fill the clip with the analyzed shader so pixels beyond the image
      // still receive tiling, color filtering, and the blend.
      paint.shader = self.analyzed_shader_view(ctx, sampling, analysis);
      device.draw_paint(&paint);
    } else {
      paint.color_filter = self.color_filter.clone();
      let mut net_transform = *self.transform.inner();
      net_transform.post_concat(&local_to_device);

      let mut constraint = SrcRectConstraint::Fast;
      if analysis.contains(BoundsAnalysis::REQUIRES_SHADER_TILING) {
        constraint = SrcRectConstraint::Strict;
        ctx.mark_shader_based_tiling_required(TileMode::Clamp);
      }
      device.draw_special(image, &net_transform, sampling, &paint, constraint);
    }

    if preserve_device_state && analysis.contains(BoundsAnalysis::REQUIRES_LAYER_CROP) {
      device.pop_clip_stack();
    }
  }

  /// Wraps this result as a layer-space shader for `sample_bounds`,
  /// resolving first when deferred state cannot be expressed in shader
  /// form (incompatible sampling, a visible crop, or expensive per-sample
  /// work under repeated sampling).
  pub fn as_shader(
    &self,
    ctx: &Context,
    xtra_sampling: SamplingOptions,
    flags: ShaderFlags,
    sample_bounds: LayerSpace<IRect>,
  ) -> Option<Arc<dyn Shader>> {
    let image = self.image.as_ref()?;

    let current_is_integer = self.transform.as_integer_translation().is_some();
    let next_is_integer = !flags.contains(ShaderFlags::NON_TRIVIAL_SAMPLING);

    let analysis = self.analyze_bounds(sample_bounds);
    let mut sampling = xtra_sampling;

    let cheap_color_filter = self
      .color_filter
      .as_ref()
      .map_or(true, |cf| cf.as_blend_mode().is_some());
    let needs_resolve = (flags.contains(ShaderFlags::SAMPLED_REPEATEDLY)
      && ((self.color_filter.is_some() && !cheap_color_filter)
        || image.color_space() != ctx.color_space()))
      || !compatible_sampling(
        self.sampling,
        current_is_integer,
        &mut sampling,
        next_is_integer,
      )
      || analysis.contains(BoundsAnalysis::REQUIRES_LAYER_CROP);

    // Downgrade to nearest when the sampling chain does nothing.
    if sampling == DEFAULT_SAMPLING && next_is_integer && (needs_resolve || current_is_integer) {
      sampling = NEAREST;
    }

    if needs_resolve {
      // The resolve bakes in the transform (sans origin), tile mode, color
      // filter, and layer bounds.
      let resolved = self.resolve(ctx, self.layer_bounds, false);
      let pixels = resolved.image.as_ref()?;
      let origin = resolved.layer_bounds.top_left();
      let strict = !pixels.is_exact_fit();
      if strict {
        ctx.mark_shader_based_tiling_required(TileMode::Decal);
      }
      let shader = pixels.as_shader(
        TileMode::Decal,
        sampling,
        Matrix::translate(origin.x() as f32, origin.y() as f32),
        strict,
      )?;
      Some(with_color_space_xform(
        shader,
        pixels.color_space(),
        ctx.color_space(),
      ))
    } else {
      self.analyzed_shader_view(ctx, sampling, analysis)
    }
  }

  /// Synthesizes the shader form of the deferred state, consulting
  /// `analysis` for which effects are visible. The layer-bounds crop is
  /// not included; callers clip or resolve for it.
  fn analyzed_shader_view(
    &self,
    ctx: &Context,
    final_sampling: SamplingOptions,
    analysis: BoundsAnalysis,
  ) -> Option<Arc<dyn Shader>> {
    let image = self.image.as_ref()?;
    let local_matrix = *self.transform.inner();
    let image_bounds = Rect::from_ltrb(0.0, 0.0, image.width() as f32, image.height() as f32);

    // The decal edge must be antialiased at layer resolution. If the
    // transform preserves rectangles the decal bounds can simply be mapped;
    // otherwise split into a scaling pre-decal matrix and a rotation/skew
    // post-decal matrix.
    let (post_decal, pre_decal) = if local_matrix.rect_stays_rect()
      || !analysis.contains(BoundsAnalysis::REQUIRES_DECAL_IN_LAYER_SPACE)
    {
      (Matrix::IDENTITY, local_matrix)
    } else {
      decompose_transform(&local_matrix, image_bounds.center())
    };

    // When the image covers the destination, or the decal wrapper below
    // implements the tiling, the image shader itself can use clamp.
    let mut effective_tile_mode = self.tile_mode;
    if !analysis.contains(BoundsAnalysis::DST_BOUNDS_NOT_COVERED)
      || analysis.contains(BoundsAnalysis::REQUIRES_DECAL_IN_LAYER_SPACE)
    {
      effective_tile_mode = TileMode::Clamp;
    }
    let strict = analysis.contains(BoundsAnalysis::REQUIRES_SHADER_TILING);
    if strict {
      ctx.mark_shader_based_tiling_required(effective_tile_mode);
    }

    let mut shader = image.as_shader(effective_tile_mode, final_sampling, pre_decal, strict)?;
    shader = with_color_space_xform(shader, image.color_space(), ctx.color_space());

    if analysis.contains(BoundsAnalysis::REQUIRES_DECAL_IN_LAYER_SPACE) {
      debug_assert!(self.tile_mode == TileMode::Decal);
      let decal_bounds = pre_decal.map_rect(image_bounds);
      shader = Arc::new(LayerDecalShader::new(shader, decal_bounds));
    }

    if !post_decal.is_identity() {
      shader = with_local_matrix(shader, &post_decal)?;
    }

    if let Some(color_filter) = &self.color_filter {
      shader = with_color_filter(shader, Arc::clone(color_filter));
    }

    // The shader now covers the image, sampling, tiling, transform, and
    // color filter; layer-bounds cropping is handled externally.
    Some(shader)
  }

  /// Produces a low-resolution version of this result for large-sigma
  /// blurs: repeated half-scale passes with tile-mode-preserving padding,
  /// wrapped in a transform that maps back to the original layer geometry.
  pub fn rescale(
    &self,
    ctx: &Context,
    scale: LayerSpace<Size>,
    enforce_decal: bool,
  ) -> FilterResult {
    let visible = match &self.image {
      Some(_) => self.layer_bounds.intersect(ctx.desired_output()),
      None => None,
    };
    let Some(visible_layer_bounds) = visible else {
      return FilterResult::empty();
    };
    if !(scale.width() > 0.0) || !(scale.height() > 0.0) {
      return FilterResult::empty();
    }
    let image = self.image.as_ref().map(Arc::clone);
    let Some(image) = image else {
      return FilterResult::empty();
    };

    let mut x_steps = downscale_step_count(scale.width());
    let mut y_steps = downscale_step_count(scale.height());

    let pixel_aligned = self.transform.as_integer_translation();
    let analysis = self.analyze_bounds(ctx.desired_output());

    let can_defer_tiling = pixel_aligned.is_some()
      && !analysis.contains(BoundsAnalysis::REQUIRES_LAYER_CROP)
      && !(enforce_decal && analysis.contains(BoundsAnalysis::HAS_LAYER_FILLING_EFFECT));

    let has_effects_to_apply = !can_defer_tiling
      || self.color_filter.is_some()
      || image.color_type() != ctx.backend().color_type()
      || image.color_space() != ctx.color_space();

    if x_steps == 0 && y_steps == 0 && !has_effects_to_apply {
      if analysis.contains(BoundsAnalysis::HAS_LAYER_FILLING_EFFECT) {
        // The only visible effect is a non-decal tile mode; keep it and
        // tighten the layer bounds.
        let mut noop = self.clone();
        noop.layer_bounds = visible_layer_bounds;
        return noop;
      } else {
        return extract_subset(
          &image,
          pixel_aligned.unwrap_or_default(),
          visible_layer_bounds,
          false,
        );
      }
    }

    let (mut src_rect, mut tile_mode) =
      if can_defer_tiling && analysis.contains(BoundsAnalysis::HAS_LAYER_FILLING_EFFECT) {
        // Tiling is deferred and visible: rescale the original image so
        // the intermediate textures stay small.
        let origin = pixel_aligned.unwrap_or_default();
        let image_rect = Spaced::new(IRect::from_xywh(
          origin.x(),
          origin.y(),
          image.width(),
          image.height(),
        ));
        (image_rect, self.tile_mode)
      } else {
        // Either tiling cannot be deferred, or it is not visible and the
        // layer bounds describe a smaller effective image.
        (visible_layer_bounds, TileMode::Decal)
      };

    src_rect = src_rect.relevant_subset(ctx.desired_output(), tile_mode);
    if src_rect.is_empty() {
      return FilterResult::empty();
    }

    // Track the logical bounds in float across steps; integer rounding
    // only produces conservative buffers. The 1px outset represents the
    // first downscale triggering the tile mode, and later steps sampling
    // the preserved belt.
    let mut step_bounds_f = Rect::from_irect(*src_rect.inner());
    let mut step_pixel_bounds = src_rect.inner().outset(1, 1);

    let mut current: Option<Arc<SpecialImage>> = None;
    let mut origin = IPoint::ZERO;
    while current.is_none() || x_steps > 0 || y_steps > 0 {
      let mut sx = 1.0f32;
      if x_steps > 0 {
        sx = if x_steps > 1 {
          0.5
        } else {
          src_rect.width() as f32 * scale.width() / step_bounds_f.width()
        };
        x_steps -= 1;
      }

      let mut sy = 1.0f32;
      if y_steps > 0 {
        sy = if y_steps > 1 {
          0.5
        } else {
          src_rect.height() as f32 * scale.height() / step_bounds_f.height()
        };
        y_steps -= 1;
      }

      let dst_bounds_f = Rect::from_xywh(0.0, 0.0, step_bounds_f.width() * sx, step_bounds_f.height() * sy);
      let mut dst_pixel_bounds = crate::geometry::round_out(dst_bounds_f);
      if tile_mode == TileMode::Clamp || tile_mode == TileMode::Decal {
        // Sampling past the padded source texel needs
        //   dstFrac + px - 1/2 > sx * (srcFrac - 1/2);
        // px = 1 covers sx = 1/2, but fractional rounding on the final
        // partial step can require more. Measured from the right/bottom
        // because the left/top pixel stays aligned.
        let src_frac_x = step_pixel_bounds.right as f32 - step_bounds_f.right - 0.5;
        let dst_frac_x = dst_pixel_bounds.right as f32 - dst_bounds_f.right - 0.5;
        let px = ((sx * src_frac_x - dst_frac_x).ceil() as i32).max(1);

        let src_frac_y = step_pixel_bounds.bottom as f32 - step_bounds_f.bottom - 0.5;
        let dst_frac_y = dst_pixel_bounds.bottom as f32 - dst_bounds_f.bottom - 0.5;
        let py = ((sy * src_frac_y - dst_frac_y).ceil() as i32).max(1);

        dst_pixel_bounds = dst_pixel_bounds.outset(px, py);
        debug_assert!(sx != 1.0 || dst_pixel_bounds.width() == step_pixel_bounds.width());
        debug_assert!(sy != 1.0 || dst_pixel_bounds.height() == step_pixel_bounds.height());
      }

      let Some(scale_xform) = Matrix::rect_to_rect(step_bounds_f, dst_bounds_f) else {
        return FilterResult::empty();
      };

      let mut surface = AutoSurface::new(ctx, Spaced::new(dst_pixel_bounds), false, None);
      let Some(device) = surface.device_mut() else {
        // Rescaling cannot complete; no sense downscaling nothing.
        return FilterResult::empty();
      };
      device.concat(&scale_xform);

      let mut paint = Paint::default();
      match &current {
        None => {
          // First iteration: draw the original result under the scale
          // transform. Decal-in-layer-space is masked out; the final
          // upscale transform re-applies it.
          let mut step_analysis = self.analyze_bounds_with(&scale_xform, dst_pixel_bounds);
          step_analysis.remove(BoundsAnalysis::REQUIRES_DECAL_IN_LAYER_SPACE);
          paint.shader = self.analyzed_shader_view(ctx, self.sampling, step_analysis);
        }
        Some(prior) => {
          // Later iterations bilinearly downsample the prior image.
          let strict = !prior.is_exact_fit();
          if strict {
            ctx.mark_shader_based_tiling_required(tile_mode);
          }
          paint.shader = prior.as_shader(
            tile_mode,
            DEFAULT_SAMPLING,
            Matrix::translate(origin.x as f32, origin.y as f32),
            strict,
          );
        }
      }
      device.draw_paint(&paint);

      if tile_mode == TileMode::Decal {
        // The transparent belt is baked in now; later steps can clamp.
        tile_mode = TileMode::Clamp;
      }

      let snapped = surface.snap();
      let Some(snapped_image) = snapped.image else {
        return FilterResult::empty();
      };
      origin = *snapped.layer_bounds.top_left().inner();
      current = Some(snapped_image);
      step_bounds_f = dst_bounds_f;
      step_pixel_bounds = dst_pixel_bounds;
    }

    // Wrap the decimated image with a transform back to the original
    // layer-space geometry and restore the layer bounds it fills.
    let mut result = FilterResult::from_image_and_offset(current, Spaced::new(origin));
    let Some(final_xform) =
      Matrix::rect_to_rect(step_bounds_f, Rect::from_irect(*src_rect.inner()))
    else {
      return FilterResult::empty();
    };
    result.transform.post_concat(Spaced::new(final_xform));
    result.layer_bounds = visible_layer_bounds;

    if enforce_decal {
      // The decimation added transparent padding and switched to clamp;
      // calling it decal has no visual effect but matches what blur
      // algorithms expect.
      debug_assert!(!can_defer_tiling && tile_mode == TileMode::Clamp);
      result.tile_mode = TileMode::Decal;
    } else {
      result.tile_mode = tile_mode;
    }
    result
  }

  /// Builds a FilterResult from `src_rect` of a raw image drawn into the
  /// parameter-space `dst_rect`.
  ///
  /// When `src_rect` is already pixel-aligned the image is wrapped
  /// directly and the src-to-dst mapping folds into the deferred
  /// transform; otherwise the subset is drawn through a strict-constraint
  /// pass.
  pub fn make_from_image(
    ctx: &Context,
    image: Arc<tiny_skia::Pixmap>,
    color_space: crate::color::ColorSpace,
    src_rect: Rect,
    dst_rect: ParameterSpace<Rect>,
    sampling: SamplingOptions,
  ) -> FilterResult {
    let src_subset = crate::geometry::round_out(src_rect);
    if Rect::from_irect(src_subset) == src_rect {
      let Some(special) = ctx
        .backend()
        .make_image(src_subset, Arc::clone(&image), color_space)
      else {
        return FilterResult::empty();
      };
      // Treat the subset's top-left as layer space: the src-to-dst and
      // parameter-to-layer transforms fold into one deferred step.
      let subset_result =
        FilterResult::from_image_and_offset(Some(special), Spaced::new(src_subset.top_left()));
      let Some(mut transform) = Matrix::rect_to_rect(src_rect, *dst_rect.inner()) else {
        return FilterResult::empty();
      };
      transform.post_concat(ctx.mapping().layer_matrix().inner());
      return subset_result.apply_transform(ctx, Spaced::new(transform), sampling);
    }

    // Fractional subset: draw src -> dst into a new layer image.
    let dst_bounds = ctx.mapping().param_to_layer(dst_rect).round_out();
    let Some(dst_bounds) = dst_bounds.intersect(ctx.desired_output()) else {
      return FilterResult::empty();
    };

    let mut surface = AutoSurface::new(ctx, dst_bounds, true, None);
    if let Some(device) = surface.device_mut() {
      let backing = IRect::from_wh(image.width() as i32, image.height() as i32);
      if let Some(subset) = src_subset.intersect(backing) {
        if let Some(special) = SpecialImage::wrap(image, subset, color_space) {
          let src_in_subset = src_rect.offset(-(subset.left as f32), -(subset.top as f32));
          if let Some(mut matrix) = Matrix::rect_to_rect(src_in_subset, *dst_rect.inner()) {
            matrix.post_concat(&device.local_to_device());
            device.draw_special(
              &special,
              &matrix,
              sampling,
              &Paint::default(),
              SrcRectConstraint::Strict,
            );
          }
        }
      }
    }
    surface.snap()
  }

  /// Renders recorded content into a layer, clipped to its cull rect.
  pub fn make_from_picture(
    ctx: &Context,
    picture: &dyn Picture,
    cull_rect: ParameterSpace<Rect>,
  ) -> FilterResult {
    let dst_bounds = ctx.mapping().param_to_layer(cull_rect).round_out();
    let Some(dst_bounds) = dst_bounds.intersect(ctx.desired_output()) else {
      return FilterResult::empty();
    };

    // Pictures render at a resolution unrelated to the screen; drop the
    // pixel geometry so no subpixel decisions leak in.
    let props = ctx.backend().surface_props().with_unknown_pixel_geometry();
    let mut surface = AutoSurface::new(ctx, dst_bounds, true, Some(&props));
    if let Some(device) = surface.device_mut() {
      device.clip_rect(*cull_rect.inner(), true);
      picture.playback(device);
    }
    surface.snap()
  }

  /// Fills the desired output by evaluating `shader` in parameter space.
  pub fn make_from_shader(
    ctx: &Context,
    shader: Arc<dyn Shader>,
    _dither: bool,
  ) -> FilterResult {
    let mut surface = AutoSurface::new(ctx, ctx.desired_output(), true, None);
    if let Some(device) = surface.device_mut() {
      let paint = Paint {
        shader: Some(shader),
        ..Paint::default()
      };
      device.draw_paint(&paint);
    }
    surface.snap()
  }
}

/// Extracts the subset of a decal-tiled image relevant to `dst_bounds`.
///
/// With `clamp_src_if_disjoint`, a disjoint image contributes its closest
/// edge/corner pixels instead of nothing (it will be clamp-tiled).
fn extract_subset(
  image: &Arc<SpecialImage>,
  origin: LayerSpace<IPoint>,
  dst_bounds: LayerSpace<IRect>,
  clamp_src_if_disjoint: bool,
) -> FilterResult {
  let image_bounds = Spaced::new(IRect::from_xywh(
    origin.x(),
    origin.y(),
    image.width(),
    image.height(),
  ));
  let image_bounds = image_bounds.relevant_subset(
    dst_bounds,
    if clamp_src_if_disjoint {
      TileMode::Clamp
    } else {
      TileMode::Decal
    },
  );
  if image_bounds.is_empty() {
    return FilterResult::empty();
  }

  // Subtract the origin edge-by-edge: the intersection guarantees the
  // result is within the image, even when origin components are extreme.
  let subset = IRect::from_ltrb(
    image_bounds.left() - origin.x(),
    image_bounds.top() - origin.y(),
    image_bounds.right() - origin.x(),
    image_bounds.bottom() - origin.y(),
  );
  match image.make_subset(subset) {
    Some(sub) => FilterResult::from_image_and_offset(Some(sub), image_bounds.top_left()),
    None => FilterResult::empty(),
  }
}

/// If tiling `crop` over `output` shows at most one period per axis,
/// returns the transform that re-expresses the visible tile as a plain
/// axis-aligned mapping (with sign flips for odd mirror periods).
///
/// Returns `None` when multiple periods are visible or the translation
/// cannot round-trip exactly through f32.
fn periodic_axis_transform(
  tile_mode: TileMode,
  crop: LayerSpace<IRect>,
  output: LayerSpace<IRect>,
) -> Option<LayerSpace<Matrix>> {
  if !tile_mode.is_periodic() {
    return None;
  }

  // 64-bit math so crop/output combinations cannot overflow.
  let crop_l = crop.left() as f64;
  let crop_t = crop.top() as f64;
  let crop_width = crop.right() as f64 - crop_l;
  let crop_height = crop.bottom() as f64 - crop_t;

  let period_l = ((output.left() as f64 - crop_l) / crop_width).floor() as i64;
  let period_t = ((output.top() as f64 - crop_t) / crop_height).floor() as i64;
  let period_r = ((output.right() as f64 - crop_l) / crop_width).ceil() as i64;
  let period_b = ((output.bottom() as f64 - crop_t) / crop_height).ceil() as i64;

  if period_r - period_l > 1 || period_b - period_t > 1 {
    // Multiple periods (or a mirrored boundary) are visible; keep the
    // periodic tiling.
    return None;
  }

  let mut sx = 1.0f32;
  let mut sy = 1.0f32;
  let mut tx = -crop_l;
  let mut ty = -crop_t;

  if tile_mode == TileMode::Mirror {
    // Flip the image on odd periods of each axis.
    if period_l % 2 != 0 {
      sx = -1.0;
      tx = crop_width - tx;
    }
    if period_t % 2 != 0 {
      sy = -1.0;
      ty = crop_height - ty;
    }
  }
  tx += period_l as f64 * crop_width + crop_l;
  ty += period_t as f64 * crop_height + crop_t;

  // The matrix is f32; refuse the simplification when that would lose the
  // pixel-exact translation.
  if (tx as f32) as f64 != tx || (ty as f32) as f64 != ty {
    return None;
  }

  Some(Spaced::new(Matrix::scale_translate(
    sx, sy, tx as f32, ty as f32,
  )))
}

/// Whether a second resampling with `next` on top of a pending `current`
/// is visually indistinguishable from a single resampling of the
/// concatenated transform; on success `next` holds the merged policy.
///
/// The nearest-neighbor arms depend on whether the adjacent transform is a
/// near-integer translation, so the predicate is threaded in from both
/// sides rather than derived here.
fn compatible_sampling(
  current: SamplingOptions,
  current_xform_wont_affect_nearest: bool,
  next: &mut SamplingOptions,
  next_xform_wont_affect_nearest: bool,
) -> bool {
  use SamplingOptions::{Aniso, Cubic, Filter};

  match (current, *next) {
    (Aniso { max_aniso: a }, Aniso { max_aniso: b }) => {
      // One sampling at the higher anisotropy.
      *next = SamplingOptions::aniso(a.max(b));
      true
    }
    (
      Aniso { .. },
      Filter {
        filter: FilterMode::Linear,
        ..
      },
    ) => {
      *next = current;
      true
    }
    (
      Filter {
        filter: FilterMode::Linear,
        ..
      },
      Aniso { .. },
    ) => true,
    (
      Cubic(_),
      Filter {
        filter: FilterMode::Linear,
        ..
      },
    ) => {
      // A bilerp after a bicubic upgrades to the bicubic.
      *next = current;
      true
    }
    (Cubic(a), Cubic(b)) if a == b => {
      *next = current;
      true
    }
    (
      Filter {
        filter: FilterMode::Linear,
        ..
      },
      Cubic(_),
    ) => true,
    (
      Filter {
        filter: FilterMode::Linear,
        ..
      },
      Filter {
        filter: FilterMode::Linear,
        ..
      },
    ) => true,
    (
      Filter {
        filter: FilterMode::Linear,
        ..
      },
      Filter {
        filter: FilterMode::Nearest,
        ..
      },
    ) if current_xform_wont_affect_nearest => {
      // The current transform is pixel-aligned, so its bilerp is a no-op
      // under the next nearest-neighbor sampling.
      true
    }
    (
      Filter {
        filter: FilterMode::Nearest,
        ..
      },
      Filter {
        filter: FilterMode::Linear,
        ..
      },
    ) if next_xform_wont_affect_nearest => {
      // The next transform is pixel-aligned and cannot disturb the
      // current nearest-neighbor texels.
      *next = current;
      true
    }
    // Visible nearest-neighbor texels are assumed intentional; do not
    // blend them away.
    _ => false,
  }
}

/// `nextLog2(ceil(1 / scale))`, minus one step when the final pass would
/// be close enough to identity: within 0.8 for multi-pass chains, within
/// epsilon of 1 for a single pass (where dropping the step means skipping
/// the rescale entirely).
fn downscale_step_count(net_scale_factor: f32) -> i32 {
  let inv = (1.0 / net_scale_factor).ceil();
  if !inv.is_finite() || inv <= 1.0 {
    return 0;
  }
  let mut steps = 32 - (inv as u32 - 1).leading_zeros() as i32;
  if steps > 0 {
    const MULTI_PASS_LIMIT: f32 = 0.8;
    const NEAR_IDENTITY_LIMIT: f32 = 1.0 - ROUND_EPSILON;

    let final_step_scale = net_scale_factor * (1 << (steps - 1)) as f32;
    let limit = if steps == 1 {
      NEAR_IDENTITY_LIMIT
    } else {
      MULTI_PASS_LIMIT
    };
    if final_step_scale >= limit {
      steps -= 1;
    }
  }
  steps
}

/// Scoped render target for materialization steps.
///
/// Construction charges the offscreen-surface stat, allocates through the
/// backend, translates so `dst_bounds.top_left()` is the origin, clears,
/// and clips to the target bounds. [`AutoSurface::snap`] is the only
/// success-path consumer; dropping the value on any other path releases
/// the device and its pixels.
pub(crate) struct AutoSurface {
  device: Option<Box<dyn Device>>,
  dst_bounds: LayerSpace<IRect>,
}

impl AutoSurface {
  /// The caller is responsible for having applied the desired output;
  /// `dst_bounds` is used as-is. With `render_in_parameter_space` the
  /// mapping's layer matrix is concatenated so drawing happens in
  /// parameter coordinates.
  pub(crate) fn new(
    ctx: &Context,
    dst_bounds: LayerSpace<IRect>,
    render_in_parameter_space: bool,
    props: Option<&SurfaceProps>,
  ) -> Self {
    ctx.mark_new_surface();
    let device = if dst_bounds.is_empty() {
      None
    } else {
      ctx
        .backend()
        .make_device(*dst_bounds.size().inner(), ctx.color_space(), props)
    };

    let mut surface = Self { device, dst_bounds };
    if let Some(device) = surface.device.as_deref_mut() {
      device.translate(-(dst_bounds.left() as f32), -(dst_bounds.top() as f32));
      device.clear(Color::TRANSPARENT);
      // The backend may have handed back an approx-fit surface; clip to
      // the expected bounds.
      device.clip_rect(Rect::from_irect(*dst_bounds.inner()), false);

      if render_in_parameter_space {
        device.concat(ctx.mapping().layer_matrix().inner());
      }
    }
    surface
  }

  pub(crate) fn device_mut(&mut self) -> Option<&mut (dyn Device + '_)> {
    match &mut self.device {
      Some(device) => Some(device.as_mut()),
      None => None,
    }
  }

  /// Finalizes into a FilterResult positioned at the target bounds; an
  /// allocation failure earlier yields the empty result.
  pub(crate) fn snap(mut self) -> FilterResult {
    match self.device.take() {
      Some(mut device) => {
        device.set_immutable();
        let subset = IRect::from_wh(self.dst_bounds.width(), self.dst_bounds.height());
        FilterResult::from_image_and_offset(
          device.snap_special(subset),
          self.dst_bounds.top_left(),
        )
      }
      None => FilterResult::empty(),
    }
  }
}
