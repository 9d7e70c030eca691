//! End-to-end scenarios for the FilterResult pipeline
//!
//! Each test builds a small context over the raster backend, runs one
//! pipeline operation, and checks both the deferred structure (layer
//! bounds, transforms, surface counts) and the resolved pixels.

use std::sync::Arc;

use filterpipe::color_filter::MatrixColorFilter;
use filterpipe::{
  make_raster_backend, Color, ColorSpace, ColorType, Context, FilterResult, IPoint, IRect,
  Mapping, Size, Spaced, SpecialImage, SurfaceProps, TileMode, DEFAULT_SAMPLING,
};

fn context_with(desired: IRect) -> Context {
  Context::new(
    Mapping::identity(),
    Spaced::new(desired),
    make_raster_backend(&SurfaceProps::default(), ColorType::Rgba8888),
    ColorSpace::Srgb,
  )
}

/// An opaque gradient so every texel is distinguishable.
fn gradient_image(width: i32, height: i32) -> Arc<SpecialImage> {
  let mut pixmap = tiny_skia::Pixmap::new(width as u32, height as u32).unwrap();
  for y in 0..height {
    for x in 0..width {
      let r = (x as f32 + 0.5) / width as f32;
      let g = (y as f32 + 0.5) / height as f32;
      let c = tiny_skia::ColorU8::from_rgba(
        (r * 255.0) as u8,
        (g * 255.0) as u8,
        128,
        255,
      )
      .premultiply();
      pixmap.pixels_mut()[(y * width + x) as usize] = c;
    }
  }
  SpecialImage::from_pixmap(pixmap, ColorSpace::Srgb)
}

fn gradient_result(width: i32, height: i32) -> FilterResult {
  FilterResult::from_image_and_offset(Some(gradient_image(width, height)), Spaced::new(IPoint::ZERO))
}

fn assert_color_near(actual: Color, expected: Color, what: &str) {
  let close = (actual.r - expected.r).abs() < 0.02
    && (actual.g - expected.g).abs() < 0.02
    && (actual.b - expected.b).abs() < 0.02
    && (actual.a - expected.a).abs() < 0.02;
  assert!(close, "{what}: {actual:?} != {expected:?}");
}

#[test]
fn identity_crop_reuses_image() {
  let ctx = context_with(IRect::from_wh(10, 10));
  let base = gradient_result(10, 10);
  let base_backing = Arc::clone(base.image().unwrap().backing());

  let cropped = base.apply_crop(&ctx, Spaced::new(IRect::from_wh(10, 10)), TileMode::Decal);

  assert!(!cropped.is_empty());
  assert_eq!(*cropped.layer_bounds().inner(), IRect::from_wh(10, 10));
  assert!(Arc::ptr_eq(cropped.image().unwrap().backing(), &base_backing));
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);
}

#[test]
fn decal_crop_disjoint_is_empty() {
  let ctx = context_with(IRect::from_wh(30, 30));
  let base = gradient_result(10, 10);
  let cropped = base.apply_crop(
    &ctx,
    Spaced::new(IRect::from_ltrb(20, 20, 30, 30)),
    TileMode::Decal,
  );
  assert!(cropped.is_empty());
}

#[test]
fn clamp_crop_disjoint_stretches_corner_pixel() {
  // First clamp-tile the image over a large output, then crop a region
  // entirely past its bottom-right corner: every output pixel is the
  // clamped corner texel.
  let ctx = context_with(IRect::from_wh(30, 30));
  let base = gradient_result(10, 10);
  let tiled = base.apply_crop(&ctx, Spaced::new(IRect::from_wh(10, 10)), TileMode::Clamp);
  assert_eq!(tiled.tile_mode(), TileMode::Clamp);
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);

  let far_ctx = ctx.with_new_desired_output(Spaced::new(IRect::from_ltrb(20, 20, 30, 30)));
  let far = tiled.apply_crop(
    &far_ctx,
    Spaced::new(IRect::from_ltrb(20, 20, 30, 30)),
    TileMode::Clamp,
  );
  assert!(!far.is_empty());
  // Still no rendering: the corner stretch stays deferred.
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);

  let corner = gradient_image(10, 10).pixel(9, 9);
  let resolved = far.resolve(&far_ctx, Spaced::new(IRect::from_ltrb(20, 20, 30, 30)), true);
  let image = resolved.image().expect("resolved pixels");
  for y in 0..10 {
    for x in 0..10 {
      assert_color_near(image.pixel(x, y), corner, "stretched corner");
    }
  }
}

#[test]
fn single_period_mirror_collapses_to_transform() {
  let ctx = context_with(IRect::from_ltrb(-10, -10, 0, 0));
  let base = gradient_result(10, 10);
  let source = gradient_image(10, 10);

  let mirrored = base.apply_crop(&ctx, Spaced::new(IRect::from_wh(10, 10)), TileMode::Mirror);

  assert!(!mirrored.is_empty());
  // The single visible tile is re-expressed as a flip, with no surface.
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);
  assert!(mirrored.transform().inner().scale_x() < 0.0);
  assert!(mirrored.transform().inner().scale_y() < 0.0);
  assert_eq!(
    *mirrored.layer_bounds().inner(),
    IRect::from_ltrb(-10, -10, 0, 0)
  );

  // Pixels are the mirror image of the source.
  let resolved = mirrored.resolve(&ctx, Spaced::new(IRect::from_ltrb(-10, -10, 0, 0)), true);
  let image = resolved.image().expect("resolved pixels");
  for y in 0..10 {
    for x in 0..10 {
      assert_color_near(
        image.pixel(x, y),
        source.pixel(9 - x, 9 - y),
        "mirrored pixel",
      );
    }
  }
}

#[test]
fn transparency_affecting_color_filter_fills_output() {
  let ctx = context_with(IRect::from_wh(20, 20));

  // Full RGBA inversion: transparent black becomes opaque white.
  #[rustfmt::skip]
  let invert_rgba = Arc::new(MatrixColorFilter::new([
    -1.0, 0.0, 0.0, 0.0, 1.0,
    0.0, -1.0, 0.0, 0.0, 1.0,
    0.0, 0.0, -1.0, 0.0, 1.0,
    0.0, 0.0, 0.0, -1.0, 1.0,
  ]));

  let base = gradient_result(10, 10);
  let filtered = base.apply_color_filter(&ctx, invert_rgba);

  // The filter floods the whole desired output.
  assert_eq!(*filtered.layer_bounds().inner(), IRect::from_wh(20, 20));
  // And it stays deferred: no surface was rendered yet.
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);

  let resolved = filtered.resolve(&ctx, Spaced::new(IRect::from_wh(20, 20)), true);
  let image = resolved.image().expect("resolved pixels");
  // Outside the original image: invert(transparent black) = opaque white.
  assert_color_near(image.pixel(15, 15), Color::WHITE, "flooded corner");
  assert_color_near(image.pixel(5, 15), Color::WHITE, "flooded bottom band");
  // Inside the image the opaque gradient inverts to transparent alpha.
  assert!(image.pixel(5, 5).a < 0.02);
}

#[test]
fn color_filter_on_empty_input_floods_with_constant() {
  let ctx = context_with(IRect::from_wh(8, 8));
  #[rustfmt::skip]
  let to_red = Arc::new(MatrixColorFilter::new([
    0.0, 0.0, 0.0, 0.0, 1.0,
    0.0, 0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0, 1.0,
  ]));

  let flooded = FilterResult::empty().apply_color_filter(&ctx, to_red);
  assert!(!flooded.is_empty());
  assert_eq!(flooded.tile_mode(), TileMode::Clamp);
  assert_eq!(*flooded.layer_bounds().inner(), IRect::from_wh(8, 8));
  // A single 1x1 surface carries the constant color.
  assert_eq!(ctx.stats().offscreen_surfaces(), 1);
  assert_eq!(flooded.image().unwrap().dimensions().width, 1);

  let resolved = flooded.resolve(&ctx, Spaced::new(IRect::from_wh(8, 8)), true);
  let image = resolved.image().unwrap();
  assert_color_near(image.pixel(7, 3), Color::new(1.0, 0.0, 0.0, 1.0), "flood");
}

#[test]
fn rescale_surface_counts_follow_step_count() {
  // scale 1.0: nothing to do, the subset is reused.
  let ctx = context_with(IRect::from_wh(32, 32));
  let base = gradient_result(32, 32);
  let same = base.rescale(&ctx, Spaced::new(Size::new(1.0, 1.0)), false);
  assert!(!same.is_empty());
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);

  // scale 0.25: two half steps, two surfaces.
  let ctx = context_with(IRect::from_wh(32, 32));
  let base = gradient_result(32, 32);
  let quarter = base.rescale(&ctx, Spaced::new(Size::new(0.25, 0.25)), false);
  assert!(!quarter.is_empty());
  assert_eq!(ctx.stats().offscreen_surfaces(), 2);
  // The layer geometry is unchanged even though the backing is small.
  assert_eq!(*quarter.layer_bounds().inner(), IRect::from_wh(32, 32));
  assert!(quarter.image().unwrap().dimensions().width <= 12);
}

#[test]
fn make_from_shader_fills_desired_output() {
  use filterpipe::{Shader, SolidShader};

  let ctx = context_with(IRect::from_ltrb(4, 4, 12, 12));
  let shader: Arc<dyn Shader> = Arc::new(SolidShader::new(Color::new(0.0, 0.0, 1.0, 1.0)));
  let result = FilterResult::make_from_shader(&ctx, shader, false);

  assert_eq!(*result.layer_bounds().inner(), IRect::from_ltrb(4, 4, 12, 12));
  let image = result.image().expect("rendered shader");
  assert_color_near(image.pixel(0, 0), Color::new(0.0, 0.0, 1.0, 1.0), "fill");
}

#[test]
fn make_from_image_integer_subset_defers() {
  let ctx = context_with(IRect::from_wh(16, 16));
  let pixmap = Arc::new({
    let mut p = tiny_skia::Pixmap::new(8, 8).unwrap();
    p.fill(tiny_skia::Color::from_rgba8(0, 255, 0, 255));
    p
  });

  let result = FilterResult::make_from_image(
    &ctx,
    pixmap,
    ColorSpace::Srgb,
    filterpipe::Rect::from_ltrb(0.0, 0.0, 8.0, 8.0),
    Spaced::new(filterpipe::Rect::from_ltrb(2.0, 2.0, 10.0, 10.0)),
    DEFAULT_SAMPLING,
  );

  // Integer srcRect + integer translation: wrapped directly, no render.
  assert!(!result.is_empty());
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);
  assert_eq!(*result.layer_bounds().inner(), IRect::from_ltrb(2, 2, 10, 10));
}

#[test]
fn stats_dump_reflects_pipeline_work() {
  let ctx = context_with(IRect::from_wh(16, 16));
  let base = gradient_result(8, 8);
  // Force one render through a transparency-affecting filter resolve.
  #[rustfmt::skip]
  let opaque = Arc::new(MatrixColorFilter::new([
    1.0, 0.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 0.0, 1.0,
  ]));
  let filtered = base.apply_color_filter(&ctx, opaque);
  let _ = filtered.resolve(&ctx, ctx.desired_output(), true);

  let text = ctx.stats().dump();
  assert!(text.contains("# offscreen surfaces: 1"));

  let trace = filterpipe::TraceHandle::enabled();
  ctx.stats().report(&trace);
  assert_eq!(trace.event_count(), 2);
}
