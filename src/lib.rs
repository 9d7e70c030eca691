//! filterpipe: lazy 2D image-filter evaluation
//!
//! The core value is [`FilterResult`]: an image plus deferred work (an
//! axis-aligned transform, sampling policy, tile mode, color filter, and
//! layer-space crop). Operations fold into that pending state when the
//! algebra allows and render through the backend only when it does not,
//! so chains of crops, offsets, and color filters cost at most one
//! offscreen pass.
//!
//! Geometry is tagged by coordinate space (parameter, layer, device) and
//! only a [`Mapping`] moves values between spaces. Pixels live behind the
//! [`Backend`] seam; the built-in raster backend evaluates everything on
//! the CPU over premultiplied RGBA8 pixmaps.

pub mod backend;
pub mod blend;
pub mod blur;
pub mod builder;
pub mod color;
pub mod color_filter;
pub mod context;
pub mod error;
pub mod filter_result;
pub mod geometry;
pub mod image;
pub mod mapping;
pub mod sampling;
pub mod shader;
pub mod space;
pub mod stats;
pub mod surface;
pub mod trace;
pub mod transform;

pub use backend::{make_raster_backend, Backend, CachedFilterResult, FilterCache};
pub use blend::{BlendMode, BlendModeBlender, Blender};
pub use blur::{BlurAlgorithm, BlurEngine};
pub use builder::Builder;
pub use color::{Color, ColorSpace, ColorType};
pub use color_filter::{
  compose_color_filters, BlendColorFilter, ColorFilter, ComposeColorFilter, MatrixColorFilter,
};
pub use context::Context;
pub use error::{SurfaceError, SurfaceResult};
pub use filter_result::{BoundsAnalysis, FilterResult, Picture, ShaderFlags};
pub use geometry::{IPoint, IRect, ISize, IVector, Point, Rect, Size, Vector, ROUND_EPSILON};
pub use image::SpecialImage;
pub use mapping::{MapGeometry, Mapping, MatrixCapability};
pub use sampling::{
  CubicResampler, FilterMode, MipmapMode, SamplingOptions, TileMode, DEFAULT_SAMPLING, NEAREST,
};
pub use shader::{Shader, SolidShader};
pub use space::{DeviceSpace, Layer, LayerSpace, Parameter, ParameterSpace, Spaced};
pub use stats::Stats;
pub use surface::{
  Device, Paint, PixelGeometry, RasterDevice, SrcRectConstraint, SurfaceProps,
};
pub use trace::TraceHandle;
pub use transform::Matrix;

// The space tag for device coordinates shares its name with the render
// target trait; re-export it under an explicit alias.
pub use space::Device as DeviceTag;
