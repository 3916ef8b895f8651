//! Texture binding for pixel surfaces.
//!
//! A surface is either GPU-backed (its texture is borrowed as is) or a block of RGBA8
//! rows that gets copied into an owned texture or framebuffer. Owned resources are
//! released when the binding is dropped; borrowed ones never are.

use std::marker::PhantomData;

use thiserror::Error;

use crate::render::context::{BackendError, Context};
use crate::render::device::{DeviceError, FramebufferId, RenderDevice, TextureId};
use crate::render::types::{Colour, RectI};
use crate::util::config::{render_config, RenderConfig};

/// RGBA8 rows borrowed from a surface. `stride` is the byte distance between rows.
#[derive(Clone, Copy, Debug)]
pub struct PixelRows<'a> {
    pub data: &'a [u8],
    pub stride: usize,
}

impl<'a> PixelRows<'a> {
    /// Row `y`, `width` pixels long, or `None` if the data ends first.
    pub fn row(&self, y: usize, width: usize) -> Option<&'a [u8]> {
        let start = y * self.stride;
        self.data.get(start..start + width * 4)
    }

    pub fn is_contiguous(&self, width: usize) -> bool {
        self.stride == width * 4
    }
}

/// Image source for `TextureFromSurface`.
pub trait PixelSurface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Texture of a GPU-backed surface.
    fn gpu_texture(&self) -> Option<TextureId>;

    /// CPU pixels, when the surface has them.
    fn pixels(&self) -> Option<PixelRows<'_>>;
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TextureError {
    #[error("surface has zero width or height")]
    ZeroSize,
    #[error("texture of {width}x{height} exceeds the maximum size {max}")]
    TooLarge { width: u32, height: u32, max: u32 },
    #[error("surface exposes neither a GPU texture nor pixel data")]
    NoPixelData,
    #[error("no active rendering context on this thread")]
    NoActiveContext,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Off-screen framebuffer owned through a context; a GPU-backed `PixelSurface`.
pub struct FramebufferImage<D: RenderDevice> {
    context: Context<D>,
    framebuffer: FramebufferId,
    texture: TextureId,
    width: u32,
    height: u32,
}

impl<D: RenderDevice> FramebufferImage<D> {
    pub fn new(context: &Context<D>, width: u32, height: u32) -> Result<Self, TextureError> {
        let mut st = context.begin("FramebufferImage::new").ok_or(TextureError::NoActiveContext)?;
        let framebuffer = st.device.create_framebuffer(width, height)?;
        let Some(texture) = st.device.framebuffer_texture(framebuffer) else {
            st.device.delete_framebuffer(framebuffer);
            return Err(DeviceError::UnknownFramebuffer(framebuffer).into());
        };
        drop(st);
        Ok(Self { context: context.clone(), framebuffer, texture, width, height })
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    /// Copy RGBA8 rows into `region` of the image.
    pub fn write_pixels(&self, region: RectI, rows: PixelRows<'_>) -> Result<(), TextureError> {
        let mut st = self.context.begin("FramebufferImage::write_pixels").ok_or(TextureError::NoActiveContext)?;
        st.device.write_framebuffer(self.framebuffer, region, rows.data, rows.stride)?;
        Ok(())
    }
}

impl<D: RenderDevice> PixelSurface for FramebufferImage<D> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn gpu_texture(&self) -> Option<TextureId> {
        Some(self.texture)
    }

    fn pixels(&self) -> Option<PixelRows<'_>> {
        None
    }
}

impl<D: RenderDevice> Drop for FramebufferImage<D> {
    fn drop(&mut self) {
        let fb = self.framebuffer;
        self.context.with_device(|d| d.delete_framebuffer(fb));
    }
}

/// Who owns the texture behind a `TextureFromSurface`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureResource {
    /// The surface's own texture; never released here.
    Borrowed(TextureId),
    OwnedTexture(TextureId),
    OwnedFramebuffer { framebuffer: FramebufferId, texture: TextureId },
    /// Construction failed.
    Invalid,
}

impl TextureResource {
    pub fn texture(self) -> TextureId {
        match self {
            Self::Borrowed(t) | Self::OwnedTexture(t) | Self::OwnedFramebuffer { texture: t, .. } => t,
            Self::Invalid => TextureId::NONE,
        }
    }

    pub fn is_owned(self) -> bool {
        matches!(self, Self::OwnedTexture(_) | Self::OwnedFramebuffer { .. })
    }
}

/// Texture binding for a surface, valid for the lifetime of this value.
///
/// The binding borrows the surface, so a GPU-backed surface cannot be dropped while its
/// texture is still bound:
///
/// ```compile_fail
/// use glpath::render::FramebufferImage;
/// use glpath::{Context, SoftDevice, TextureFromSurface};
///
/// let ctx = Context::new(SoftDevice::new(4, 4));
/// ctx.make_current();
/// let image = FramebufferImage::new(&ctx, 8, 8).unwrap();
/// let texture = TextureFromSurface::try_new(&ctx, &image).unwrap();
/// drop(image);
/// assert!(texture.is_valid());
/// ```
pub struct TextureFromSurface<'a, D: RenderDevice> {
    context: Context<D>,
    resource: TextureResource,
    width: u32,
    height: u32,
    texture_width: u32,
    texture_height: u32,
    error: Option<TextureError>,
    surface: PhantomData<&'a ()>,
}

/// `None` when power-of-two rounding overflows `u32`.
fn allocation_size(width: u32, height: u32, npot: bool) -> Option<(u32, u32)> {
    if npot {
        Some((width, height))
    } else {
        Some((width.checked_next_power_of_two()?, height.checked_next_power_of_two()?))
    }
}

impl<'a, D: RenderDevice> TextureFromSurface<'a, D> {
    /// Bind `surface`, using the process-wide config.
    pub fn try_new(context: &Context<D>, surface: &'a impl PixelSurface) -> Result<Self, TextureError> {
        Self::try_new_with_config(context, surface, render_config())
    }

    pub fn try_new_with_config(
        context: &Context<D>,
        surface: &'a impl PixelSurface,
        config: &RenderConfig,
    ) -> Result<Self, TextureError> {
        let (width, height) = (surface.width(), surface.height());
        let mut st = context.begin("TextureFromSurface").ok_or(TextureError::NoActiveContext)?;
        if width == 0 || height == 0 {
            return Err(TextureError::ZeroSize);
        }

        let bind = |resource, texture_width, texture_height| Self {
            context: context.clone(),
            resource,
            width,
            height,
            texture_width,
            texture_height,
            error: None,
            surface: PhantomData,
        };

        if let Some(texture) = surface.gpu_texture() {
            log::trace!("texture: borrowing {texture:?} ({width}x{height})");
            return Ok(bind(TextureResource::Borrowed(texture), width, height));
        }

        let rows = surface.pixels().ok_or(TextureError::NoPixelData)?;
        let npot = st.device.supports_npot_textures() && !config.force_power_of_two;
        let max = st.device.max_texture_size();
        let Some((tw, th)) = allocation_size(width, height, npot) else {
            return Err(TextureError::TooLarge { width, height, max });
        };
        if tw > max || th > max {
            return Err(TextureError::TooLarge { width: tw, height: th, max });
        }

        let pixel_count = width as u64 * height as u64;
        let direct = rows.is_contiguous(width as usize) && pixel_count <= config.direct_upload_max_pixels as u64;
        let full = RectI::new(0, 0, width as i32, height as i32);

        if direct {
            let texture = st.device.create_texture(tw, th)?;
            if let Err(e) = st.device.upload_texture(texture, full, rows.data, rows.stride) {
                st.device.delete_texture(texture);
                st.record_error(BackendError::Device(e));
                return Err(e.into());
            }
            log::trace!("texture: uploaded {width}x{height} into {texture:?} ({tw}x{th})");
            return Ok(bind(TextureResource::OwnedTexture(texture), tw, th));
        }

        let framebuffer = st.device.create_framebuffer(tw, th)?;
        let Some(texture) = st.device.framebuffer_texture(framebuffer) else {
            st.device.delete_framebuffer(framebuffer);
            return Err(DeviceError::UnknownFramebuffer(framebuffer).into());
        };
        // Copy in bands no larger than the direct upload limit.
        let band = (config.direct_upload_max_pixels / width).clamp(1, height);
        let mut y = 0;
        while y < height {
            let n = band.min(height - y);
            let start = y as usize * rows.stride;
            let data = rows.data.get(start..).unwrap_or(&[]);
            let region = RectI::new(0, y as i32, width as i32, n as i32);
            if let Err(e) = st.device.write_framebuffer(framebuffer, region, data, rows.stride) {
                st.device.delete_framebuffer(framebuffer);
                st.record_error(BackendError::Device(e));
                return Err(e.into());
            }
            y += n;
        }
        log::trace!("texture: copied {width}x{height} into framebuffer {framebuffer:?} in bands of {band} rows");
        Ok(bind(TextureResource::OwnedFramebuffer { framebuffer, texture }, tw, th))
    }

    /// Like `try_new`, but failure leaves `texture_id() == TextureId::NONE` and `error()` set.
    pub fn new(context: &Context<D>, surface: &'a impl PixelSurface) -> Self {
        Self::new_with_config(context, surface, render_config())
    }

    pub fn new_with_config(context: &Context<D>, surface: &'a impl PixelSurface, config: &RenderConfig) -> Self {
        match Self::try_new_with_config(context, surface, config) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("texture: could not bind {}x{} surface: {e}", surface.width(), surface.height());
                Self {
                    context: context.clone(),
                    resource: TextureResource::Invalid,
                    width: surface.width(),
                    height: surface.height(),
                    texture_width: 0,
                    texture_height: 0,
                    error: Some(e),
                    surface: PhantomData,
                }
            }
        }
    }

    pub fn texture_id(&self) -> TextureId {
        self.resource.texture()
    }

    pub fn resource(&self) -> TextureResource {
        self.resource
    }

    pub fn is_valid(&self) -> bool {
        self.texture_id().is_valid()
    }

    pub fn error(&self) -> Option<TextureError> {
        self.error
    }

    /// Surface width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Surface height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Allocated texture width; larger than `width()` after power-of-two rounding.
    pub fn texture_width(&self) -> u32 {
        self.texture_width
    }

    pub fn texture_height(&self) -> u32 {
        self.texture_height
    }

    /// Texture-space extent of the surface content.
    pub fn uv_extent(&self) -> (f32, f32) {
        if self.texture_width == 0 || self.texture_height == 0 {
            return (0.0, 0.0);
        }
        (
            self.width as f32 / self.texture_width as f32,
            self.height as f32 / self.texture_height as f32,
        )
    }

    /// Draw the surface content at `(x, y)` in its own size, untinted.
    pub fn draw_at(&self, x: f32, y: f32, alpha: f32) {
        let Some(mut st) = self.context.begin("TextureFromSurface::draw_at") else { return };
        if !self.is_valid() {
            st.record_error(BackendError::InvalidValue);
            return;
        }
        let (u, v) = self.uv_extent();
        let (x1, y1) = (x + self.width as f32, y + self.height as f32);
        let positions = [[x, y], [x1, y], [x1, y1], [x, y], [x1, y1], [x, y1]];
        let uvs = [[0.0, 0.0], [u, 0.0], [u, v], [0.0, 0.0], [u, v], [0.0, v]];
        st.draw_list_2d(&positions, Some(&uvs), Colour::WHITE.with_alpha(alpha), Some(self.texture_id()));
    }
}

impl<D: RenderDevice> Drop for TextureFromSurface<'_, D> {
    fn drop(&mut self) {
        match self.resource {
            TextureResource::OwnedTexture(texture) => {
                self.context.with_device(|d| d.delete_texture(texture));
            }
            TextureResource::OwnedFramebuffer { framebuffer, .. } => {
                self.context.with_device(|d| d.delete_framebuffer(framebuffer));
            }
            TextureResource::Borrowed(_) | TextureResource::Invalid => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::cache::bitmaps::BitmapSurface;
    use crate::render::device::soft::SoftDevice;

    fn ctx(w: u32, h: u32) -> Context<SoftDevice> {
        let ctx = Context::new(SoftDevice::new(w, h));
        ctx.make_current();
        ctx
    }

    fn gradient(w: u32, h: u32) -> BitmapSurface {
        let mut bmp = BitmapSurface::filled(w, h, [0, 0, 0, 255]);
        for y in 0..h {
            for x in 0..w {
                bmp.set_pixel(x, y, [x as u8, y as u8, 7, 255]);
            }
        }
        bmp
    }

    #[test]
    fn gpu_surface_is_borrowed_without_allocating() {
        let ctx = ctx(8, 8);
        let image = FramebufferImage::new(&ctx, 16, 16).unwrap();
        let before = (ctx.device().live_textures(), ctx.device().live_framebuffers());
        {
            let tex = TextureFromSurface::try_new(&ctx, &image).unwrap();
            assert_eq!(tex.resource(), TextureResource::Borrowed(image.gpu_texture().unwrap()));
            assert_eq!(tex.texture_id(), image.gpu_texture().unwrap());
            assert_eq!((ctx.device().live_textures(), ctx.device().live_framebuffers()), before);
        }
        assert_eq!(ctx.device().live_framebuffers(), 1);
        drop(image);
        assert_eq!(ctx.device().live_framebuffers(), 0);
    }

    #[test]
    fn small_bitmap_is_uploaded_into_one_owned_texture() {
        let ctx = ctx(8, 8);
        let bmp = gradient(5, 3);
        let tex = TextureFromSurface::try_new_with_config(&ctx, &bmp, &RenderConfig::default()).unwrap();
        assert!(matches!(tex.resource(), TextureResource::OwnedTexture(_)));
        assert_eq!(ctx.device().live_textures(), 1);
        assert_eq!((tex.width(), tex.height()), (5, 3));
        assert_eq!((tex.texture_width(), tex.texture_height()), (5, 3));
        {
            let dev = ctx.device();
            let (w, _, data) = dev.texture_pixels(tex.texture_id()).unwrap();
            let i = 4 * (2 * w as usize + 4);
            assert_eq!(&data[i..i + 4], &[4, 2, 7, 255]);
        }
        drop(tex);
        assert_eq!(ctx.device().live_textures(), 0);
    }

    #[test]
    fn strided_view_goes_through_a_framebuffer_in_bands() {
        let ctx = ctx(8, 8);
        let bmp = gradient(10, 10);
        let view = bmp.view(RectI::new(2, 1, 6, 7));
        let cfg = RenderConfig { direct_upload_max_pixels: 12, ..RenderConfig::default() };
        let tex = TextureFromSurface::try_new_with_config(&ctx, &view, &cfg).unwrap();
        assert!(matches!(tex.resource(), TextureResource::OwnedFramebuffer { .. }));
        assert_eq!(ctx.device().live_framebuffers(), 1);
        assert_eq!(ctx.device().live_textures(), 0);
        {
            let dev = ctx.device();
            let (w, h, data) = dev.texture_pixels(tex.texture_id()).unwrap();
            assert_eq!((w, h), (6, 7));
            let i = 4 * (6 * w as usize + 5);
            assert_eq!(&data[i..i + 4], &[7, 7, 7, 255]);
        }
        drop(tex);
        assert_eq!(ctx.device().live_framebuffers(), 0);
    }

    #[test]
    fn large_contiguous_bitmap_also_uses_framebuffer() {
        let ctx = ctx(4, 4);
        let bmp = gradient(40, 40);
        let cfg = RenderConfig { direct_upload_max_pixels: 100, ..RenderConfig::default() };
        let tex = TextureFromSurface::try_new_with_config(&ctx, &bmp, &cfg).unwrap();
        assert!(matches!(tex.resource(), TextureResource::OwnedFramebuffer { .. }));
        let dev = ctx.device();
        let (w, _, data) = dev.texture_pixels(tex.texture_id()).unwrap();
        let i = 4 * (39 * w as usize + 39);
        assert_eq!(&data[i..i + 4], &[39, 39, 7, 255]);
    }

    #[test]
    fn power_of_two_rounding_without_npot_support() {
        let pot_ctx = Context::new(SoftDevice::new(4, 4).with_extensions(&[]));
        pot_ctx.make_current();
        let bmp = gradient(5, 3);
        let tex = TextureFromSurface::try_new_with_config(&pot_ctx, &bmp, &RenderConfig::default()).unwrap();
        assert_eq!((tex.texture_width(), tex.texture_height()), (8, 4));
        assert_eq!(tex.uv_extent(), (0.625, 0.75));

        let npot_ctx = ctx(4, 4);
        let forced = RenderConfig { force_power_of_two: true, ..RenderConfig::default() };
        let tex = TextureFromSurface::try_new_with_config(&npot_ctx, &bmp, &forced).unwrap();
        assert_eq!((tex.texture_width(), tex.texture_height()), (8, 4));
    }

    #[test]
    fn oversized_surface_leaves_invalid_handle() {
        let ctx = Context::new(SoftDevice::new(4, 4).with_max_texture_size(64));
        ctx.make_current();
        let bmp = BitmapSurface::filled(65, 2, [1, 2, 3, 4]);
        let tex = TextureFromSurface::new(&ctx, &bmp);
        assert_eq!(tex.texture_id(), TextureId::NONE);
        assert!(!tex.is_valid());
        assert_eq!(tex.error(), Some(TextureError::TooLarge { width: 65, height: 2, max: 64 }));
        assert_eq!(ctx.device().live_textures(), 0);
    }

    #[test]
    fn release_under_device_guard_is_skipped() {
        let ctx = ctx(4, 4);
        let bmp = gradient(2, 2);
        let tex = TextureFromSurface::try_new_with_config(&ctx, &bmp, &RenderConfig::default()).unwrap();
        let image = FramebufferImage::new(&ctx, 4, 4).unwrap();
        let dev = ctx.device();
        drop(tex);
        drop(image);
        assert_eq!(dev.live_textures(), 1);
        assert_eq!(dev.live_framebuffers(), 1);
    }

    /// Wider than any power of two a `u32` can hold.
    struct OverwideSurface;

    impl PixelSurface for OverwideSurface {
        fn width(&self) -> u32 {
            (1 << 31) + 1
        }

        fn height(&self) -> u32 {
            1
        }

        fn gpu_texture(&self) -> Option<TextureId> {
            None
        }

        fn pixels(&self) -> Option<PixelRows<'_>> {
            Some(PixelRows { data: &[], stride: 0 })
        }
    }

    #[test]
    fn power_of_two_overflow_reports_too_large() {
        let ctx = Context::new(SoftDevice::new(4, 4).with_extensions(&[]));
        ctx.make_current();
        let surface = OverwideSurface;
        let tex = TextureFromSurface::new_with_config(&ctx, &surface, &RenderConfig::default());
        assert!(!tex.is_valid());
        assert_eq!(tex.texture_id(), TextureId::NONE);
        assert_eq!(tex.error(), Some(TextureError::TooLarge { width: (1 << 31) + 1, height: 1, max: 2048 }));
        assert_eq!(ctx.device().live_textures(), 0);
    }

    #[test]
    fn zero_size_and_inactive_context_fail() {
        let ctx = ctx(4, 4);
        let empty = BitmapSurface::new(0, 4, Vec::new());
        assert_eq!(TextureFromSurface::try_new(&ctx, &empty).err(), Some(TextureError::ZeroSize));

        ctx.release_current();
        let bmp = gradient(2, 2);
        assert_eq!(TextureFromSurface::try_new(&ctx, &bmp).err(), Some(TextureError::NoActiveContext));
    }

    #[test]
    fn repeated_bind_release_cycles_do_not_leak() {
        let ctx = ctx(4, 4);
        let small = gradient(4, 4);
        let big = gradient(30, 30);
        let cfg = RenderConfig { direct_upload_max_pixels: 256, ..RenderConfig::default() };
        for _ in 0..25 {
            let a = TextureFromSurface::try_new_with_config(&ctx, &small, &cfg).unwrap();
            let b = TextureFromSurface::try_new_with_config(&ctx, &big, &cfg).unwrap();
            assert!(a.is_valid() && b.is_valid());
        }
        assert_eq!(ctx.device().live_textures(), 0);
        assert_eq!(ctx.device().live_framebuffers(), 0);
    }

    #[test]
    fn draw_at_samples_only_surface_content() {
        let ctx = Context::new(SoftDevice::new(8, 8).with_extensions(&[]));
        ctx.make_current();
        ctx.set_blend_mode(crate::render::device::BlendMode::Replace);
        let bmp = BitmapSurface::filled(3, 3, [255, 0, 0, 255]);
        let tex = TextureFromSurface::try_new_with_config(&ctx, &bmp, &RenderConfig::default()).unwrap();
        assert_eq!(tex.texture_width(), 4);
        tex.draw_at(1.0, 1.0, 1.0);
        let dev = ctx.device();
        assert_eq!(dev.pixel(1, 1), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(dev.pixel(3, 3), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(dev.pixel(4, 4), Some([0.0; 4]));
    }
}
