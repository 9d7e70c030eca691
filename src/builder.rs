//! Composing multiple FilterResults
//!
//! The builder accumulates inputs and produces one of three outputs: a
//! merge (draw everything in order into one surface), a shader evaluation
//! (each input becomes a shader fed to a caller-composed shader), or a
//! blur. Each consumes the accumulated inputs.

use std::sync::Arc;

use crate::context::Context;
use crate::filter_result::{AutoSurface, FilterResult, ShaderFlags};
use crate::geometry::{IRect, ISize, Size};
use crate::sampling::{SamplingOptions, TileMode, DEFAULT_SAMPLING};
use crate::shader::{with_local_matrix, Shader};
use crate::space::{union_of, LayerSpace, Spaced};
use crate::surface::Paint;
use crate::transform::Matrix;

/// One input to a composition, with how it will be sampled.
#[derive(Clone, Debug)]
struct SampledFilterResult {
  image: FilterResult,
  sampling: SamplingOptions,
  flags: ShaderFlags,
  /// Override for the layer-space region the consumer will sample;
  /// defaults to the output bounds.
  sample_bounds: Option<LayerSpace<IRect>>,
}

pub struct Builder<'a> {
  context: &'a Context,
  inputs: Vec<SampledFilterResult>,
}

impl<'a> Builder<'a> {
  pub fn new(context: &'a Context) -> Self {
    Self {
      context,
      inputs: Vec::new(),
    }
  }

  /// Adds an input consumed with default sampling over the output bounds.
  pub fn add(&mut self, input: FilterResult) -> &mut Self {
    self.add_sampled(input, None, ShaderFlags::NONE, DEFAULT_SAMPLING)
  }

  pub fn add_sampled(
    &mut self,
    input: FilterResult,
    sample_bounds: Option<LayerSpace<IRect>>,
    flags: ShaderFlags,
    sampling: SamplingOptions,
  ) -> &mut Self {
    self.inputs.push(SampledFilterResult {
      image: input,
      sampling,
      flags,
      sample_bounds,
    });
    self
  }

  pub fn input_count(&self) -> usize {
    self.inputs.len()
  }

  fn output_bounds(&self, explicit: Option<LayerSpace<IRect>>) -> LayerSpace<IRect> {
    // Pessimistically the output fills the full desired bounds.
    let output = self.context.desired_output();
    match explicit {
      Some(explicit) => output.intersect(explicit).unwrap_or_else(LayerSpace::<IRect>::empty),
      None => output,
    }
  }

  fn create_input_shaders(
    &self,
    output_bounds: LayerSpace<IRect>,
    evaluate_in_parameter_space: bool,
  ) -> Option<Vec<Option<Arc<dyn Shader>>>> {
    let mut xtra_flags = ShaderFlags::NONE;
    let mut layer_to_param = Matrix::IDENTITY;
    if evaluate_in_parameter_space {
      // The inputs are sampled in layer space but the outer shader runs in
      // parameter space; bridge with the inverse layer matrix, and flag
      // non-trivial sampling when that bridge is not pixel aligned.
      layer_to_param = self.context.mapping().layer_matrix().inner().invert()?;
      if layer_to_param.as_integer_translation().is_none() {
        xtra_flags = xtra_flags | ShaderFlags::NON_TRIVIAL_SAMPLING;
      }
    }

    let mut shaders = Vec::with_capacity(self.inputs.len());
    for input in &self.inputs {
      let sample_bounds = input.sample_bounds.unwrap_or(output_bounds);
      let mut shader = input.image.as_shader(
        self.context,
        input.sampling,
        input.flags | xtra_flags,
        sample_bounds,
      );
      if evaluate_in_parameter_space {
        shader = shader.and_then(|s| with_local_matrix(s, &layer_to_param));
      }
      shaders.push(shader);
    }
    Some(shaders)
  }

  fn draw_shader(
    &self,
    shader: Option<Arc<dyn Shader>>,
    output_bounds: LayerSpace<IRect>,
    evaluate_in_parameter_space: bool,
  ) -> FilterResult {
    let Some(shader) = shader else {
      return FilterResult::empty();
    };
    let mut surface = AutoSurface::new(self.context, output_bounds, evaluate_in_parameter_space, None);
    if let Some(device) = surface.device_mut() {
      let paint = Paint {
        shader: Some(shader),
        ..Paint::default()
      };
      device.draw_paint(&paint);
    }
    surface.snap()
  }

  /// Draws every input in order into one surface sized to the union of
  /// their layer bounds (intersected with the desired output). A single
  /// input is returned as-is.
  pub fn merge(&mut self) -> FilterResult {
    if self.inputs.is_empty() {
      return FilterResult::empty();
    }
    if self.inputs.len() == 1 {
      let input = &self.inputs[0];
      debug_assert!(
        input.sample_bounds.is_none()
          && input.sampling == DEFAULT_SAMPLING
          && input.flags == ShaderFlags::NONE
      );
      return input.image.clone();
    }

    let merged_bounds = union_of(self.inputs.len(), |i| self.inputs[i].image.layer_bounds());
    let output_bounds = self.output_bounds(Some(merged_bounds));

    let mut surface = AutoSurface::new(self.context, output_bounds, false, None);
    if let Some(device) = surface.device_mut() {
      for input in &self.inputs {
        debug_assert!(
          input.sample_bounds.is_none()
            && input.sampling == DEFAULT_SAMPLING
            && input.flags == ShaderFlags::NONE
        );
        input
          .image
          .draw_internal(self.context, device, true, None);
      }
    }
    surface.snap()
  }

  /// Builds per-input shaders and fills a surface with the shader the
  /// callback composes from them. With `evaluate_in_parameter_space` the
  /// callback's shader runs in parameter coordinates.
  pub fn eval<F>(
    &mut self,
    explicit_output: Option<LayerSpace<IRect>>,
    evaluate_in_parameter_space: bool,
    compose: F,
  ) -> FilterResult
  where
    F: FnOnce(&[Option<Arc<dyn Shader>>]) -> Option<Arc<dyn Shader>>,
  {
    let output_bounds = self.output_bounds(explicit_output);
    if output_bounds.is_empty() {
      return FilterResult::empty();
    }
    let Some(shaders) = self.create_input_shaders(output_bounds, evaluate_in_parameter_space)
    else {
      return FilterResult::empty();
    };
    let shader = compose(&shaders);
    self.draw_shader(shader, output_bounds, evaluate_in_parameter_space)
  }

  /// Blurs the single accumulated input: resolves it with a 3-sigma outset
  /// and invokes the backend's blur algorithm with decal tiling.
  pub fn blur(&mut self, sigma: LayerSpace<Size>) -> FilterResult {
    debug_assert!(self.inputs.len() == 1);
    if self.inputs.len() != 1 {
      return FilterResult::empty();
    }

    let Some(blur_engine) = self.context.backend().get_blur_engine() else {
      return FilterResult::empty();
    };
    let Some(algorithm) =
      blur_engine.find_algorithm(*sigma.inner(), self.context.backend().color_type())
    else {
      return FilterResult::empty();
    };
    debug_assert!(
      sigma.width() <= algorithm.max_sigma() && sigma.height() <= algorithm.max_sigma()
    );

    let radii: LayerSpace<ISize> =
      Spaced::new(Size::new(3.0 * sigma.width(), 3.0 * sigma.height())).ceil();
    let max_output = self.inputs[0].image.layer_bounds().outset(radii);

    let output_bounds = self.output_bounds(Some(max_output));
    if output_bounds.is_empty() {
      return FilterResult::empty();
    }

    // The blur's access pattern is well defined, so the source pixels can
    // be derived here instead of being provided through add().
    let sample_bounds = output_bounds.outset(radii);

    let resolved = self.inputs[0]
      .image
      .resolve(self.context, sample_bounds, false);
    let (Some(image), origin) = (resolved.image().cloned(), resolved.layer_bounds().top_left())
    else {
      return FilterResult::empty();
    };

    let src_relative_output = output_bounds
      .inner()
      .offset(-origin.x(), -origin.y());
    let blurred = algorithm.blur(
      *sigma.inner(),
      &image,
      IRect::from_size(image.dimensions()),
      TileMode::Decal,
      src_relative_output,
    );

    FilterResult::from_image_and_offset(blurred, output_bounds.top_left())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::make_raster_backend;
  use crate::color::{Color, ColorSpace, ColorType};
  use crate::geometry::IPoint;
  use crate::image::SpecialImage;
  use crate::mapping::Mapping;
  use crate::surface::SurfaceProps;

  fn test_context(desired: IRect) -> Context {
    Context::new(
      Mapping::identity(),
      Spaced::new(desired),
      make_raster_backend(&SurfaceProps::default(), ColorType::Rgba8888),
      ColorSpace::Srgb,
    )
  }

  fn solid_result(bounds: IRect, color: Color) -> FilterResult {
    let mut pixmap = crate::surface::new_surface_pixmap(bounds.width(), bounds.height()).unwrap();
    let px = crate::color::pack_premul(color.premultiply());
    for p in pixmap.pixels_mut() {
      *p = px;
    }
    FilterResult::from_image_and_offset(
      Some(SpecialImage::from_pixmap(pixmap, ColorSpace::Srgb)),
      Spaced::new(IPoint::new(bounds.left, bounds.top)),
    )
  }

  #[test]
  fn merge_of_one_is_verbatim() {
    let ctx = test_context(IRect::from_wh(16, 16));
    let input = solid_result(IRect::from_wh(8, 8), Color::WHITE);
    let input_image = Arc::clone(input.image().unwrap());
    let mut builder = Builder::new(&ctx);
    builder.add(input);
    let merged = builder.merge();
    assert!(Arc::ptr_eq(merged.image().unwrap(), &input_image));
    assert_eq!(ctx.stats().offscreen_surfaces(), 0);
  }

  #[test]
  fn merge_draws_in_order() {
    let ctx = test_context(IRect::from_wh(16, 16));
    let red = solid_result(IRect::from_wh(8, 8), Color::new(1.0, 0.0, 0.0, 1.0));
    let green = solid_result(IRect::from_xywh(4, 0, 8, 8), Color::new(0.0, 1.0, 0.0, 1.0));
    let mut builder = Builder::new(&ctx);
    builder.add(red).add(green);
    let merged = builder.merge();

    let image = merged.image().unwrap();
    // Union of [0,8) and [4,12) on x.
    assert_eq!(image.width(), 12);
    // Green draws second and wins in the overlap.
    let overlap = image.texel(6, 4, true);
    assert!(overlap[1] > 0.99);
    let left = image.texel(1, 4, true);
    assert!(left[0] > 0.99);
  }

  #[test]
  fn merge_empty_inputs_is_empty() {
    let ctx = test_context(IRect::from_wh(16, 16));
    let mut builder = Builder::new(&ctx);
    assert!(builder.merge().is_empty());
  }

  #[test]
  fn eval_composes_input_shader() {
    let ctx = test_context(IRect::from_wh(8, 8));
    let input = solid_result(IRect::from_wh(8, 8), Color::new(0.0, 0.0, 1.0, 1.0));
    let mut builder = Builder::new(&ctx);
    builder.add_sampled(input, None, ShaderFlags::NONE, DEFAULT_SAMPLING);
    let out = builder.eval(None, false, |shaders| shaders[0].clone());
    let image = out.image().unwrap();
    let px = image.texel(4, 4, true);
    assert!(px[2] > 0.99);
  }

  #[test]
  fn blur_expands_bounds_by_three_sigma() {
    let ctx = test_context(IRect::from_ltrb(-64, -64, 64, 64));
    let input = solid_result(IRect::from_wh(10, 10), Color::WHITE);
    let mut builder = Builder::new(&ctx);
    builder.add(input);
    let blurred = builder.blur(Spaced::new(Size::new(2.0, 2.0)));
    assert!(!blurred.is_empty());
    // ceil(3 * 2) = 6 on each side.
    assert_eq!(
      *blurred.layer_bounds().inner(),
      IRect::from_ltrb(-6, -6, 16, 16)
    );
    // The blurred center remains near opaque.
    let image = blurred.image().unwrap();
    let center = image.texel(11, 11, true);
    assert!(center[3] > 0.9);
  }

  #[test]
  fn blur_of_empty_input_is_empty() {
    let ctx = test_context(IRect::from_wh(16, 16));
    let mut builder = Builder::new(&ctx);
    builder.add(FilterResult::empty());
    assert!(builder.blur(Spaced::new(Size::new(2.0, 2.0))).is_empty());
  }
}
