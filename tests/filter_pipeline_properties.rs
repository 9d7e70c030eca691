//! Algebraic properties of the FilterResult pipeline
//!
//! These check the laws the fusion logic relies on: results stay
//! transparent outside their desired output, folds do not change pixels,
//! and deferred paths stay deferred (verified through the stats sink).

use std::sync::Arc;

use filterpipe::color_filter::MatrixColorFilter;
use filterpipe::{
  make_raster_backend, BlendMode, BlendModeBlender, Blender, Color, ColorSpace, ColorType,
  Context, Device, FilterResult, IPoint, IRect, Mapping, Matrix, RasterDevice, Size, Spaced,
  SpecialImage, SurfaceProps, TileMode, DEFAULT_SAMPLING,
};

fn context_with(desired: IRect) -> Context {
  Context::new(
    Mapping::identity(),
    Spaced::new(desired),
    make_raster_backend(&SurfaceProps::default(), ColorType::Rgba8888),
    ColorSpace::Srgb,
  )
}

fn gradient_image(width: i32, height: i32) -> Arc<SpecialImage> {
  let mut pixmap = tiny_skia::Pixmap::new(width as u32, height as u32).unwrap();
  for y in 0..height {
    for x in 0..width {
      let r = (x as f32 + 0.5) / width as f32;
      let g = (y as f32 + 0.5) / height as f32;
      let c = tiny_skia::ColorU8::from_rgba((r * 255.0) as u8, (g * 255.0) as u8, 64, 255)
        .premultiply();
      pixmap.pixels_mut()[(y * width + x) as usize] = c;
    }
  }
  SpecialImage::from_pixmap(pixmap, ColorSpace::Srgb)
}

fn gradient_result(width: i32, height: i32) -> FilterResult {
  FilterResult::from_image_and_offset(Some(gradient_image(width, height)), Spaced::new(IPoint::ZERO))
}

/// Resolves `result` over `bounds` and returns the pixels row-major.
fn pixels_of(ctx: &Context, result: &FilterResult, bounds: IRect) -> Vec<Color> {
  let resolved = result.resolve(ctx, Spaced::new(bounds), true);
  let mut out = Vec::with_capacity((bounds.width() * bounds.height()) as usize);
  match resolved.image() {
    Some(image) => {
      for y in 0..bounds.height() {
        for x in 0..bounds.width() {
          out.push(image.pixel(x, y));
        }
      }
    }
    None => out.resize((bounds.width() * bounds.height()) as usize, Color::TRANSPARENT),
  }
  out
}

fn assert_pixels_near(a: &[Color], b: &[Color], tolerance: f32, what: &str) {
  assert_eq!(a.len(), b.len());
  for (i, (pa, pb)) in a.iter().zip(b.iter()).enumerate() {
    let close = (pa.r - pb.r).abs() <= tolerance
      && (pa.g - pb.g).abs() <= tolerance
      && (pa.b - pb.b).abs() <= tolerance
      && (pa.a - pb.a).abs() <= tolerance;
    assert!(close, "{what}: pixel {i} differs: {pa:?} vs {pb:?}");
  }
}

#[test]
fn coordinate_safety_outside_desired_output() {
  let desired = IRect::from_ltrb(2, 2, 8, 8);
  let ctx = context_with(desired);
  let result = gradient_result(10, 10).apply_crop(&ctx, Spaced::new(desired), TileMode::Decal);

  let mut device =
    RasterDevice::new(filterpipe::ISize::new(16, 16), ColorSpace::Srgb, SurfaceProps::default())
      .unwrap();
  result.draw(&ctx, &mut device, None);

  let pixmap = device.pixmap();
  for y in 0..16i32 {
    for x in 0..16i32 {
      let inside = x >= 2 && x < 8 && y >= 2 && y < 8;
      let alpha = pixmap.pixels()[(y * 16 + x) as usize].alpha();
      if inside {
        assert!(alpha > 0, "expected content at ({x}, {y})");
      } else {
        assert_eq!(alpha, 0, "leaked pixel at ({x}, {y})");
      }
    }
  }
}

#[test]
fn decal_resolve_disjoint_is_transparent() {
  let ctx = context_with(IRect::from_wh(32, 32));
  let result = gradient_result(10, 10);

  // The final crop applies: a disjoint resolve has no pixels at all.
  let resolved = result.resolve(&ctx, Spaced::new(IRect::from_ltrb(20, 20, 30, 30)), false);
  assert!(resolved.is_empty());

  // Forcing a render of the disjoint region yields only transparency.
  let px = pixels_of(&ctx, &result, IRect::from_ltrb(20, 20, 30, 30));
  assert!(px.iter().all(|c| c.a == 0.0));
}

#[test]
fn crop_is_idempotent() {
  let desired = IRect::from_wh(16, 16);
  let crop = IRect::from_ltrb(3, 3, 12, 12);
  for tile_mode in [TileMode::Decal, TileMode::Clamp, TileMode::Repeat, TileMode::Mirror] {
    let ctx = context_with(desired);
    let once = gradient_result(10, 10).apply_crop(&ctx, Spaced::new(crop), tile_mode);
    let twice = once.apply_crop(&ctx, Spaced::new(crop), tile_mode);

    assert_eq!(
      once.layer_bounds(),
      twice.layer_bounds(),
      "layer bounds changed under {tile_mode:?}"
    );
    let a = pixels_of(&ctx, &once, desired);
    let b = pixels_of(&ctx, &twice, desired);
    assert_pixels_near(&a, &b, 0.01, "idempotent crop");
  }
}

#[test]
fn color_filters_compose_associatively() {
  // Neither filter affects transparent black.
  #[rustfmt::skip]
  let halve = Arc::new(MatrixColorFilter::new([
    0.5, 0.0, 0.0, 0.0, 0.0,
    0.0, 0.5, 0.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0, 0.0,
    0.0, 0.0, 0.0, 1.0, 0.0,
  ]));
  #[rustfmt::skip]
  let swap_rg = Arc::new(MatrixColorFilter::new([
    0.0, 1.0, 0.0, 0.0, 0.0,
    1.0, 0.0, 0.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.0, 1.0, 0.0,
  ]));

  let desired = IRect::from_wh(10, 10);
  let ctx = context_with(desired);

  let stepwise = gradient_result(10, 10)
    .apply_color_filter(&ctx, halve.clone())
    .apply_color_filter(&ctx, swap_rg.clone());
  let composed = gradient_result(10, 10).apply_color_filter(
    &ctx,
    filterpipe::compose_color_filters(swap_rg, Some(halve)),
  );

  // Both stay deferred on the same image.
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);
  let a = pixels_of(&ctx, &stepwise, desired);
  let b = pixels_of(&ctx, &composed, desired);
  assert_pixels_near(&a, &b, 0.01, "associativity");
}

#[test]
fn integer_translations_fuse_without_surfaces() {
  let desired = IRect::from_wh(32, 32);

  let ctx = context_with(desired);
  let base = gradient_result(10, 10);
  let backing = Arc::clone(base.image().unwrap().backing());
  let chained = base
    .apply_transform(&ctx, Spaced::new(Matrix::translate(3.0, 0.0)), DEFAULT_SAMPLING)
    .apply_transform(&ctx, Spaced::new(Matrix::translate(0.0, 4.0)), DEFAULT_SAMPLING);

  let ctx2 = context_with(desired);
  let direct = gradient_result(10, 10).apply_transform(
    &ctx2,
    Spaced::new(Matrix::translate(3.0, 4.0)),
    DEFAULT_SAMPLING,
  );

  // Fusion: no materialization either way, identical placement.
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);
  assert_eq!(ctx2.stats().offscreen_surfaces(), 0);
  assert!(Arc::ptr_eq(chained.image().unwrap().backing(), &backing));
  assert_eq!(chained.layer_bounds(), direct.layer_bounds());
  assert_eq!(
    chained.transform().as_integer_translation(),
    direct.transform().as_integer_translation()
  );
  assert_eq!(
    chained.transform().as_integer_translation().map(|p| (p.x(), p.y())),
    Some((3, 4))
  );
}

#[test]
fn near_integer_translation_is_treated_as_integer() {
  let desired = IRect::from_wh(32, 32);
  let ctx = context_with(desired);
  let nudged = gradient_result(10, 10).apply_transform(
    &ctx,
    Spaced::new(Matrix::translate(5.0004, 2.9996)),
    DEFAULT_SAMPLING,
  );
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);
  assert_eq!(
    nudged.transform().as_integer_translation().map(|p| (p.x(), p.y())),
    Some((5, 3))
  );
}

#[test]
fn identity_transform_is_a_no_op() {
  let desired = IRect::from_wh(10, 10);
  let ctx = context_with(desired);
  let base = gradient_result(10, 10);
  let image = Arc::clone(base.image().unwrap());

  let same = base.apply_transform(&ctx, Spaced::new(Matrix::IDENTITY), DEFAULT_SAMPLING);
  assert!(Arc::ptr_eq(same.image().unwrap(), &image));
  assert_eq!(same.layer_bounds(), base.layer_bounds());
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);
}

#[test]
fn non_axis_aligned_transform_still_lands_pixels() {
  let desired = IRect::from_wh(24, 24);
  let ctx = context_with(desired);
  let base = gradient_result(10, 10);

  // Rotate 90 degrees about (5, 5): the image occupies the same square.
  let mut rotate = Matrix::rotate(std::f32::consts::FRAC_PI_2);
  rotate.pre_concat(&Matrix::translate(-5.0, -5.0));
  rotate.post_concat(&Matrix::translate(5.0, 5.0));

  let turned = base.apply_transform(&ctx, Spaced::new(rotate), DEFAULT_SAMPLING);
  assert!(!turned.is_empty());
  let px = pixels_of(&ctx, &turned, IRect::from_wh(10, 10));
  // Interior content survives the rotation.
  assert!(px[5 * 10 + 5].a > 0.9);
}

#[test]
fn rescale_round_trips_within_tolerance() {
  let desired = IRect::from_wh(32, 32);
  for scale in [0.5f32, 0.25] {
    let ctx = context_with(desired);
    let base = gradient_result(32, 32);
    let reference = pixels_of(&ctx, &base, desired);

    let rescaled = base.rescale(&ctx, Spaced::new(Size::new(scale, scale)), false);
    assert!(!rescaled.is_empty());
    let approx = pixels_of(&ctx, &rescaled, desired);

    // Compare the interior; the decal belt softens the outermost pixels.
    let mut err = 0.0f64;
    let mut count = 0u32;
    for y in 4..28 {
      for x in 4..28 {
        let a = reference[(y * 32 + x) as usize];
        let b = approx[(y * 32 + x) as usize];
        for (ca, cb) in [(a.r, b.r), (a.g, b.g), (a.b, b.b), (a.a, b.a)] {
          err += ((ca - cb) as f64).powi(2);
          count += 1;
        }
      }
    }
    let rmse = (err / count as f64).sqrt();
    assert!(rmse < 0.05, "rmse {rmse} for scale {scale}");
  }
}

#[test]
fn periodic_collapse_uses_no_surface() {
  let ctx = context_with(IRect::from_ltrb(-10, -10, 0, 0));
  let tiled = gradient_result(10, 10).apply_crop(
    &ctx,
    Spaced::new(IRect::from_wh(10, 10)),
    TileMode::Repeat,
  );
  assert!(!tiled.is_empty());
  assert_eq!(ctx.stats().offscreen_surfaces(), 0);
}

#[test]
fn transparency_affecting_blender_covers_whole_clip() {
  let ctx = context_with(IRect::from_wh(8, 8));
  let result = gradient_result(4, 4);

  let mut device =
    RasterDevice::new(filterpipe::ISize::new(8, 8), ColorSpace::Srgb, SurfaceProps::default())
      .unwrap();
  device.clear(Color::WHITE);

  let blender: Arc<dyn Blender> = Arc::new(BlendModeBlender(BlendMode::SrcIn));
  result.draw(&ctx, &mut device, Some(&blender));

  let pixmap = device.pixmap();
  // Inside the image: source-in keeps the source over the opaque dst.
  assert!(pixmap.pixels()[2 * 8 + 2].alpha() > 0);
  // Outside: transparent source erases the white destination.
  assert_eq!(pixmap.pixels()[6 * 8 + 6].alpha(), 0);
}

#[test]
fn cubic_then_linear_keeps_cubic_without_resolve() {
  use filterpipe::{CubicResampler, SamplingOptions};

  let desired = IRect::from_wh(64, 64);
  let ctx = context_with(desired);
  let base = gradient_result(10, 10);

  let scaled = base.apply_transform(
    &ctx,
    Spaced::new(Matrix::scale(1.5, 1.5)),
    SamplingOptions::Cubic(CubicResampler::mitchell()),
  );
  let nudged = scaled.apply_transform(
    &ctx,
    Spaced::new(Matrix::scale(1.1, 1.1)),
    DEFAULT_SAMPLING,
  );

  assert_eq!(ctx.stats().offscreen_surfaces(), 0);
  assert!(nudged.sampling().is_cubic());
}
