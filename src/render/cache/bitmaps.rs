use crate::render::device::TextureId;
use crate::render::texture::{PixelRows, PixelSurface};
use crate::render::types::RectI;

/// CPU-side bitmap surface in RGBA8.
///
/// - `rgba` is row-major, 4 bytes per pixel (R,G,B,A), no row padding.
/// - Alpha is *straight* (not pre-multiplied).
#[derive(Clone, Debug, PartialEq)]
pub struct BitmapSurface {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl BitmapSurface {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self { width, height, rgba }
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let px = width as usize * height as usize;
        Self { width, height, rgba: rgba.repeat(px) }
    }

    pub fn is_valid(&self) -> bool {
        let px = self.width as usize * self.height as usize;
        self.rgba.len() == px * 4
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = 4 * (y as usize * self.width as usize + x as usize);
        self.rgba.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = 4 * (y as usize * self.width as usize + x as usize);
        if let Some(p) = self.rgba.get_mut(i..i + 4) {
            p.copy_from_slice(&rgba);
        }
    }

    /// Borrow a sub-rectangle without copying; rows keep the parent's stride.
    ///
    /// The rectangle is clipped to the bitmap.
    pub fn view(&self, rect: RectI) -> BitmapView<'_> {
        let clip = rect.intersection(&RectI::new(0, 0, self.width as i32, self.height as i32));
        BitmapView { parent: self, rect: clip }
    }
}

impl PixelSurface for BitmapSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn gpu_texture(&self) -> Option<TextureId> {
        None
    }

    fn pixels(&self) -> Option<PixelRows<'_>> {
        if !self.is_valid() {
            return None;
        }
        Some(PixelRows { data: &self.rgba, stride: self.width as usize * 4 })
    }
}

/// Strided window into a `BitmapSurface`.
#[derive(Clone, Copy, Debug)]
pub struct BitmapView<'a> {
    parent: &'a BitmapSurface,
    rect: RectI,
}

impl BitmapView<'_> {
    pub fn rect(&self) -> RectI {
        self.rect
    }
}

impl PixelSurface for BitmapView<'_> {
    fn width(&self) -> u32 {
        self.rect.w.max(0) as u32
    }

    fn height(&self) -> u32 {
        self.rect.h.max(0) as u32
    }

    fn gpu_texture(&self) -> Option<TextureId> {
        None
    }

    fn pixels(&self) -> Option<PixelRows<'_>> {
        if !self.parent.is_valid() || self.rect.is_empty() {
            return None;
        }
        let stride = self.parent.width as usize * 4;
        let start = self.rect.y as usize * stride + self.rect.x as usize * 4;
        Some(PixelRows { data: &self.parent.rgba[start..], stride })
    }
}
