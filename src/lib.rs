//! glpath
//!
//! Vector path filling on a triangle-only backend: contours are decomposed into
//! trapezoids once, stored as compact triangle blocks and drawn with jittered
//! multi-pass oversampling. Also binds pixel surfaces as textures and provides
//! the small set of immediate-mode helpers a 2D renderer needs on top.
//!
//! Design rule: keep this file thin.

pub mod render;
pub mod tessellate;
pub mod util;

pub use render::device::soft::SoftDevice;
pub use render::{
    AffineTransform, BackendError, BitmapSurface, BlendMode, Colour, Context, EdgeTable, RectI, RenderDevice,
    TextureFromSurface, TextureId, TriangulatedPath,
};
pub use tessellate::{Contour, ContourBuilder, FillRule, TessError};
pub use util::config::{render_config, RenderConfig};
pub use util::logging::init_logger;
