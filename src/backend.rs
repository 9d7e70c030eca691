//! Backend seam: surfaces, image wrapping, caches, blur lookup
//!
//! The filter core never allocates pixels directly; everything goes through
//! a [`Backend`]. The raster implementation allocates guarded pixmaps and
//! carries the two shared caches: the filter-result cache (keyed by the
//! caller's DAG fingerprint) and a cached-bitmap table for repeated decodes.
//! Both are bounded LRU maps behind a mutex; no lock is held across any
//! user-visible work.

use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use rustc_hash::FxHasher;
use tiny_skia::Pixmap;

use crate::blur::{BlurEngine, RasterBlurEngine};
use crate::color::{ColorSpace, ColorType};
use crate::geometry::{IPoint, IRect, ISize};
use crate::image::SpecialImage;
use crate::space::LayerSpace;
use crate::surface::{Device, RasterDevice, SurfaceProps};

type CacheHasher = BuildHasherDefault<FxHasher>;

const FILTER_CACHE_ENTRIES: usize = 128;
const BITMAP_CACHE_ENTRIES: usize = 32;

/// A previously evaluated filter node: resolved pixels plus where they land
/// in layer space.
#[derive(Debug, Clone)]
pub struct CachedFilterResult {
  pub image: Arc<SpecialImage>,
  pub origin: LayerSpace<IPoint>,
}

/// Shared cache of intermediate filter results.
///
/// Keys are opaque `u64` fingerprints computed by the filter DAG (which is
/// outside this crate); the core only reports hits and misses through the
/// stats sink. Lookup and insertion are separate calls so no lock spans
/// filter evaluation.
pub struct FilterCache {
  entries: Mutex<LruCache<u64, CachedFilterResult, CacheHasher>>,
}

impl FilterCache {
  pub fn new(capacity: usize) -> Self {
    let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
    Self {
      entries: Mutex::new(LruCache::with_hasher(capacity, CacheHasher::default())),
    }
  }

  pub fn get(&self, key: u64) -> Option<CachedFilterResult> {
    let mut entries = self.entries.lock().ok()?;
    entries.get(&key).cloned()
  }

  pub fn insert(&self, key: u64, value: CachedFilterResult) {
    if let Ok(mut entries) = self.entries.lock() {
      entries.put(key, value);
    }
  }

  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) {
    if let Ok(mut entries) = self.entries.lock() {
      entries.clear();
    }
  }
}

/// Factory for surfaces, special images, and the blur engine.
pub trait Backend: Send + Sync {
  /// Allocates a drawable surface, or `None` when allocation fails; the
  /// caller degrades to an empty result.
  fn make_device(
    &self,
    size: ISize,
    color_space: ColorSpace,
    props: Option<&SurfaceProps>,
  ) -> Option<Box<dyn Device>>;

  /// Wraps shared pixels restricted to `subset` as a special image.
  fn make_image(
    &self,
    subset: IRect,
    pixels: Arc<Pixmap>,
    color_space: ColorSpace,
  ) -> Option<Arc<SpecialImage>>;

  /// A shared, cached copy of `bitmap`, deduplicated by content.
  fn get_cached_image(&self, bitmap: &Pixmap) -> Arc<Pixmap>;

  fn get_blur_engine(&self) -> Option<&dyn BlurEngine>;

  fn surface_props(&self) -> &SurfaceProps;

  fn color_type(&self) -> ColorType;

  fn cache(&self) -> &FilterCache;
}

/// CPU backend over tiny-skia pixmaps.
pub struct RasterBackend {
  props: SurfaceProps,
  color_type: ColorType,
  cache: FilterCache,
  bitmaps: Mutex<LruCache<u64, Arc<Pixmap>, CacheHasher>>,
  blur: RasterBlurEngine,
}

/// Creates the CPU raster backend. The color type is forced to RGBA8888,
/// the only format the CPU evaluators support.
pub fn make_raster_backend(props: &SurfaceProps, _color_type: ColorType) -> Arc<dyn Backend> {
  Arc::new(RasterBackend {
    props: *props,
    color_type: ColorType::Rgba8888,
    cache: FilterCache::new(FILTER_CACHE_ENTRIES),
    bitmaps: Mutex::new(LruCache::with_hasher(
      NonZeroUsize::new(BITMAP_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN),
      CacheHasher::default(),
    )),
    blur: RasterBlurEngine::new(),
  })
}

fn bitmap_fingerprint(bitmap: &Pixmap) -> u64 {
  let mut hasher = FxHasher::default();
  bitmap.width().hash(&mut hasher);
  bitmap.height().hash(&mut hasher);
  bitmap.data().hash(&mut hasher);
  hasher.finish()
}

impl Backend for RasterBackend {
  fn make_device(
    &self,
    size: ISize,
    color_space: ColorSpace,
    props: Option<&SurfaceProps>,
  ) -> Option<Box<dyn Device>> {
    let props = props.copied().unwrap_or(self.props);
    let device = RasterDevice::new(size, color_space, props).ok()?;
    Some(Box::new(device))
  }

  fn make_image(
    &self,
    subset: IRect,
    pixels: Arc<Pixmap>,
    color_space: ColorSpace,
  ) -> Option<Arc<SpecialImage>> {
    SpecialImage::wrap(pixels, subset, color_space)
  }

  fn get_cached_image(&self, bitmap: &Pixmap) -> Arc<Pixmap> {
    let key = bitmap_fingerprint(bitmap);
    if let Ok(mut bitmaps) = self.bitmaps.lock() {
      if let Some(cached) = bitmaps.get(&key) {
        return Arc::clone(cached);
      }
      let shared = Arc::new(bitmap.clone());
      bitmaps.put(key, Arc::clone(&shared));
      return shared;
    }
    Arc::new(bitmap.clone())
  }

  fn get_blur_engine(&self) -> Option<&dyn BlurEngine> {
    Some(&self.blur)
  }

  fn surface_props(&self) -> &SurfaceProps {
    &self.props
  }

  fn color_type(&self) -> ColorType {
    self.color_type
  }

  fn cache(&self) -> &FilterCache {
    &self.cache
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::space::Spaced;

  fn backend() -> Arc<dyn Backend> {
    make_raster_backend(&SurfaceProps::default(), ColorType::Rgba8888)
  }

  #[test]
  fn make_device_allocates_and_bounds() {
    let backend = backend();
    let device = backend
      .make_device(ISize::new(16, 16), ColorSpace::Srgb, None)
      .unwrap();
    assert_eq!(device.dimensions(), ISize::new(16, 16));

    assert!(backend
      .make_device(ISize::new(0, 16), ColorSpace::Srgb, None)
      .is_none());
    assert!(backend
      .make_device(ISize::new(1 << 20, 1 << 20), ColorSpace::Srgb, None)
      .is_none());
  }

  #[test]
  fn make_image_validates_subset() {
    let backend = backend();
    let pixels = Arc::new(Pixmap::new(8, 8).unwrap());
    assert!(backend
      .make_image(IRect::from_ltrb(2, 2, 6, 6), Arc::clone(&pixels), ColorSpace::Srgb)
      .is_some());
    assert!(backend
      .make_image(IRect::from_ltrb(2, 2, 9, 6), pixels, ColorSpace::Srgb)
      .is_none());
  }

  #[test]
  fn cached_bitmap_deduplicates() {
    let backend = backend();
    let bitmap = Pixmap::new(4, 4).unwrap();
    let first = backend.get_cached_image(&bitmap);
    let second = backend.get_cached_image(&bitmap);
    assert!(Arc::ptr_eq(&first, &second));
  }

  #[test]
  fn filter_cache_round_trip() {
    let cache = FilterCache::new(4);
    assert!(cache.get(42).is_none());

    let image = SpecialImage::from_pixmap(Pixmap::new(2, 2).unwrap(), ColorSpace::Srgb);
    cache.insert(
      42,
      CachedFilterResult {
        image: Arc::clone(&image),
        origin: Spaced::new(IPoint::new(3, 4)),
      },
    );
    let hit = cache.get(42).unwrap();
    assert!(Arc::ptr_eq(&hit.image, &image));
    assert_eq!(hit.origin.x(), 3);
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn filter_cache_evicts_lru() {
    let cache = FilterCache::new(2);
    let image = SpecialImage::from_pixmap(Pixmap::new(1, 1).unwrap(), ColorSpace::Srgb);
    for key in 0..3u64 {
      cache.insert(
        key,
        CachedFilterResult {
          image: Arc::clone(&image),
          origin: Spaced::new(IPoint::ZERO),
        },
      );
    }
    assert!(cache.get(0).is_none());
    assert!(cache.get(2).is_some());
  }
}
