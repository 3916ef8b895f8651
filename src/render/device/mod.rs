pub mod soft;

use core::ffi::c_void;
use core::ptr::NonNull;

use thiserror::Error;

use crate::render::types::{Colour, RectI};

/// Extension advertising non-power-of-two texture sizes.
pub const NPOT_EXTENSION: &str = "GL_ARB_texture_non_power_of_two";

/// Backend texture name. `TextureId::NONE` never refers to a live texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct TextureId(pub u32);

impl TextureId {
    pub const NONE: TextureId = TextureId(0);

    pub fn is_valid(self) -> bool {
        self != Self::NONE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct FramebufferId(pub u32);

impl FramebufferId {
    pub const NONE: FramebufferId = FramebufferId(0);

    pub fn is_valid(self) -> bool {
        self != Self::NONE
    }
}

/// Window-space vertex (pixels, y down) with a texture coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct DeviceVertex {
    pub x: f32,
    pub y: f32,
    pub u: f32,
    pub v: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Overwrite the target.
    Replace,
    /// `dst = src * a + dst * (1 - a)`.
    #[default]
    Alpha,
    /// `dst += src * a`; used to accumulate oversampling passes.
    Additive,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[error("texture size {width}x{height} exceeds the device maximum of {max}")]
    TextureTooLarge { width: u32, height: u32, max: u32 },
    #[error("zero-sized texture or framebuffer")]
    ZeroSize,
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),
    #[error("unknown framebuffer {0:?}")]
    UnknownFramebuffer(FramebufferId),
    #[error("pixel data too short: expected {expected} bytes, got {actual}")]
    PixelDataTooShort { expected: usize, actual: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DeviceStats {
    pub draw_calls: u32,
    pub triangles: u32,
}

/// Raw rasterization backend.
///
/// Design rule: only `render/device/*` talks to the platform. Everything above works
/// in terms of this trait and window-space triangle lists.
pub trait RenderDevice {
    /// Render target width in pixels.
    fn surface_width(&self) -> u32;

    /// Render target height in pixels.
    fn surface_height(&self) -> u32;

    fn clear(&mut self, colour: Colour);

    /// Set or clear the scissor rectangle.
    fn set_scissor(&mut self, rect: Option<RectI>);

    fn set_blend_mode(&mut self, mode: BlendMode);

    /// Draw a triangle list (`verts.len()` is a multiple of 3) in `colour`,
    /// modulated by `texture` when one is bound.
    fn draw_triangles(&mut self, verts: &[DeviceVertex], colour: Colour, texture: Option<TextureId>);

    fn max_texture_size(&self) -> u32;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, DeviceError>;

    /// Copy RGBA8 rows into `region` of `texture`. `stride` is the byte distance between rows.
    fn upload_texture(
        &mut self,
        texture: TextureId,
        region: RectI,
        pixels: &[u8],
        stride: usize,
    ) -> Result<(), DeviceError>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Create an off-screen framebuffer with a colour texture attachment.
    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FramebufferId, DeviceError>;

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId>;

    /// Copy RGBA8 rows into `region` of the framebuffer's colour attachment.
    fn write_framebuffer(
        &mut self,
        framebuffer: FramebufferId,
        region: RectI,
        pixels: &[u8],
        stride: usize,
    ) -> Result<(), DeviceError>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    fn has_extension(&self, name: &str) -> bool;

    fn extension_function(&self, name: &str) -> Option<NonNull<c_void>>;

    /// Whether textures may have non-power-of-two sizes.
    fn supports_npot_textures(&self) -> bool {
        self.has_extension(NPOT_EXTENSION)
    }

    fn stats(&self) -> DeviceStats {
        DeviceStats::default()
    }
}
