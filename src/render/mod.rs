pub mod cache;
pub mod context;
pub mod device;
pub mod edge_table;
pub mod path;
pub mod texture;
pub mod types;

pub use cache::bitmaps::{BitmapSurface, BitmapView};
pub use cache::mesh::{MeshStore, Triangle, TriangleBlock};
pub use context::{BackendError, Context};
pub use device::{BlendMode, DeviceError, FramebufferId, RenderDevice, TextureId};
pub use edge_table::{EdgeTable, EdgeTableSpan};
pub use path::{oversampling_passes, JitterPass, TriangulatedPath};
pub use texture::{FramebufferImage, PixelRows, PixelSurface, TextureError, TextureFromSurface, TextureResource};
pub use types::{AffineTransform, Colour, Mat4, RectI};
