//! In-memory reference backend.
//!
//! Colour is accumulated in `f32` so jittered passes blended at `1/N²` sum back to
//! exact coverage. Triangles are sampled at pixel centres with the top-left rule, so
//! triangles sharing an edge never cover a pixel twice.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::collections::HashMap;

use crate::render::device::{
    BlendMode, DeviceError, DeviceStats, DeviceVertex, FramebufferId, RenderDevice, TextureId,
    NPOT_EXTENSION,
};
use crate::render::types::{Colour, RectI};

const DEFAULT_MAX_TEXTURE_SIZE: u32 = 2048;

#[derive(Debug)]
struct SoftTexture {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
    /// Colour attachment of a framebuffer; released with it.
    attachment: bool,
}

impl SoftTexture {
    fn write(&mut self, region: RectI, pixels: &[u8], stride: usize) -> Result<(), DeviceError> {
        let bounds = RectI::new(0, 0, self.width as i32, self.height as i32);
        if region.is_empty() || region.intersection(&bounds) != region {
            return Err(DeviceError::ZeroSize);
        }
        let row_bytes = region.w as usize * 4;
        let expected = (region.h as usize - 1) * stride + row_bytes;
        if pixels.len() < expected || stride < row_bytes {
            return Err(DeviceError::PixelDataTooShort { expected, actual: pixels.len() });
        }
        for row in 0..region.h as usize {
            let src = &pixels[row * stride..row * stride + row_bytes];
            let dst_start = 4 * ((region.y as usize + row) * self.width as usize + region.x as usize);
            self.rgba[dst_start..dst_start + row_bytes].copy_from_slice(src);
        }
        Ok(())
    }

    /// Nearest sample; `u`/`v` are clamped to the texture.
    fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        let x = ((u * self.width as f32).floor() as i64).clamp(0, self.width as i64 - 1) as usize;
        let y = ((v * self.height as f32).floor() as i64).clamp(0, self.height as i64 - 1) as usize;
        let i = 4 * (y * self.width as usize + x);
        let p = &self.rgba[i..i + 4];
        [
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
            p[3] as f32 / 255.0,
        ]
    }
}

/// Software device rendering into an RGBA `f32` buffer.
pub struct SoftDevice {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
    scissor: Option<RectI>,
    blend: BlendMode,
    max_texture_size: u32,
    extensions: Vec<String>,
    functions: HashMap<String, NonNull<c_void>>,
    textures: HashMap<u32, SoftTexture>,
    framebuffers: HashMap<u32, TextureId>,
    next_id: u32,
    stats: DeviceStats,
}

impl SoftDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; width as usize * height as usize],
            scissor: None,
            blend: BlendMode::default(),
            max_texture_size: DEFAULT_MAX_TEXTURE_SIZE,
            extensions: vec![NPOT_EXTENSION.to_string()],
            functions: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            next_id: 1,
            stats: DeviceStats::default(),
        }
    }

    pub fn with_max_texture_size(mut self, max: u32) -> Self {
        self.max_texture_size = max;
        self
    }

    /// Replace the advertised extension list.
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn register_extension_function(&mut self, name: &str, function: NonNull<c_void>) {
        self.functions.insert(name.to_string(), function);
    }

    /// Accumulated RGBA of a target pixel.
    ///
    /// Under `Alpha` and `Additive` blending the colour channels come out premultiplied
    /// by coverage: a half-covered red pixel over transparent reads `[0.5, 0, 0, 0.5]`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y as usize * self.width as usize + x as usize).copied()
    }

    /// Read back a texture's RGBA8 contents.
    pub fn texture_pixels(&self, texture: TextureId) -> Option<(u32, u32, &[u8])> {
        self.textures
            .get(&texture.0)
            .map(|t| (t.width, t.height, t.rgba.as_slice()))
    }

    /// Standalone textures currently alive (framebuffer attachments excluded).
    pub fn live_textures(&self) -> usize {
        self.textures.values().filter(|t| !t.attachment).count()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn reset_stats(&mut self) {
        self.stats = DeviceStats::default();
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn check_size(&self, width: u32, height: u32) -> Result<(), DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::ZeroSize);
        }
        if width > self.max_texture_size || height > self.max_texture_size {
            return Err(DeviceError::TextureTooLarge { width, height, max: self.max_texture_size });
        }
        Ok(())
    }

    fn new_texture(&mut self, width: u32, height: u32, attachment: bool) -> Result<TextureId, DeviceError> {
        self.check_size(width, height)?;
        let id = self.alloc_id();
        self.textures.insert(
            id,
            SoftTexture {
                width,
                height,
                rgba: vec![0; width as usize * height as usize * 4],
                attachment,
            },
        );
        Ok(TextureId(id))
    }

    fn clip_rect(&self) -> RectI {
        let full = RectI::new(0, 0, self.width as i32, self.height as i32);
        match self.scissor {
            Some(s) => full.intersection(&s),
            None => full,
        }
    }

    #[inline(always)]
    fn blend_pixel(&mut self, x: i32, y: i32, src: [f32; 4]) {
        let idx = y as usize * self.width as usize + x as usize;
        let Some(dst) = self.pixels.get_mut(idx) else { return };
        let a = src[3];
        match self.blend {
            BlendMode::Replace => *dst = src,
            BlendMode::Alpha => {
                for c in 0..3 {
                    dst[c] = src[c] * a + dst[c] * (1.0 - a);
                }
                dst[3] = a + dst[3] * (1.0 - a);
            }
            BlendMode::Additive => {
                for c in 0..3 {
                    dst[c] = (dst[c] + src[c] * a).min(1.0);
                }
                dst[3] = (dst[3] + a).min(1.0);
            }
        }
    }

    fn fill_triangle(&mut self, v: [DeviceVertex; 3], colour: Colour, texture: Option<&SoftTexture>, clip: RectI) {
        let [mut a, mut b, c] = v;
        let mut area2 = edge(&a, &b, c.x, c.y);
        if area2 == 0.0 || !area2.is_finite() {
            return;
        }
        if area2 < 0.0 {
            std::mem::swap(&mut a, &mut b);
            area2 = -area2;
        }

        let minx = (a.x.min(b.x).min(c.x) - 0.5).ceil().max(clip.x as f32) as i32;
        let maxx = (a.x.max(b.x).max(c.x) - 0.5).floor().min((clip.right() - 1) as f32) as i32;
        let miny = (a.y.min(b.y).min(c.y) - 0.5).ceil().max(clip.y as f32) as i32;
        let maxy = (a.y.max(b.y).max(c.y) - 0.5).floor().min((clip.bottom() - 1) as f32) as i32;
        if maxx < minx || maxy < miny {
            return;
        }

        let bias = [top_left(&b, &c), top_left(&c, &a), top_left(&a, &b)];
        for y in miny..=maxy {
            let py = y as f32 + 0.5;
            for x in minx..=maxx {
                let px = x as f32 + 0.5;
                let w = [edge(&b, &c, px, py), edge(&c, &a, px, py), edge(&a, &b, px, py)];
                let inside = w
                    .iter()
                    .zip(bias)
                    .all(|(&wi, tl)| wi > 0.0 || (wi == 0.0 && tl));
                if !inside {
                    continue;
                }
                let mut src = [colour.r, colour.g, colour.b, colour.a];
                if let Some(tex) = texture {
                    let (l0, l1, l2) = (w[0] / area2, w[1] / area2, w[2] / area2);
                    let u = l0 * a.u + l1 * b.u + l2 * c.u;
                    let t = l0 * a.v + l1 * b.v + l2 * c.v;
                    let texel = tex.sample(u, t);
                    for i in 0..4 {
                        src[i] *= texel[i];
                    }
                }
                self.blend_pixel(x, y, src);
            }
        }
    }
}

/// Twice the signed area of `(a, b, p)`; positive when `p` is on the inner side of `a -> b`.
#[inline(always)]
fn edge(a: &DeviceVertex, b: &DeviceVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Top or left edge for positively oriented triangles in y-down space.
#[inline(always)]
fn top_left(a: &DeviceVertex, b: &DeviceVertex) -> bool {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    (dy == 0.0 && dx > 0.0) || dy < 0.0
}

impl RenderDevice for SoftDevice {
    fn surface_width(&self) -> u32 {
        self.width
    }

    fn surface_height(&self) -> u32 {
        self.height
    }

    fn clear(&mut self, colour: Colour) {
        let clip = self.clip_rect();
        let value = [colour.r, colour.g, colour.b, colour.a];
        for y in clip.y..clip.bottom() {
            let row = y as usize * self.width as usize;
            for x in clip.x..clip.right() {
                self.pixels[row + x as usize] = value;
            }
        }
    }

    fn set_scissor(&mut self, rect: Option<RectI>) {
        self.scissor = rect;
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.blend = mode;
    }

    fn draw_triangles(&mut self, verts: &[DeviceVertex], colour: Colour, texture: Option<TextureId>) {
        self.stats.draw_calls += 1;
        let clip = self.clip_rect();
        if clip.is_empty() {
            return;
        }
        // Sampling borrows the texture while blending mutates the target; take it out for the draw.
        let bound = texture.and_then(|t| self.textures.remove(&t.0).map(|tex| (t, tex)));
        if texture.is_some() && bound.is_none() {
            log::debug!("soft: draw with unknown texture {:?} skipped", texture);
            return;
        }
        for tri in verts.chunks_exact(3) {
            self.stats.triangles += 1;
            self.fill_triangle([tri[0], tri[1], tri[2]], colour, bound.as_ref().map(|(_, t)| t), clip);
        }
        if let Some((id, tex)) = bound {
            self.textures.insert(id.0, tex);
        }
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, DeviceError> {
        self.new_texture(width, height, false)
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        region: RectI,
        pixels: &[u8],
        stride: usize,
    ) -> Result<(), DeviceError> {
        self.textures
            .get_mut(&texture.0)
            .ok_or(DeviceError::UnknownTexture(texture))?
            .write(region, pixels, stride)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        match self.textures.get(&texture.0) {
            Some(t) if !t.attachment => {
                self.textures.remove(&texture.0);
            }
            Some(_) => log::warn!("soft: refusing to delete framebuffer attachment {:?}", texture),
            None => {}
        }
    }

    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FramebufferId, DeviceError> {
        let texture = self.new_texture(width, height, true)?;
        let id = self.alloc_id();
        self.framebuffers.insert(id, texture);
        Ok(FramebufferId(id))
    }

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.framebuffers.get(&framebuffer.0).copied()
    }

    fn write_framebuffer(
        &mut self,
        framebuffer: FramebufferId,
        region: RectI,
        pixels: &[u8],
        stride: usize,
    ) -> Result<(), DeviceError> {
        let texture = self
            .framebuffer_texture(framebuffer)
            .ok_or(DeviceError::UnknownFramebuffer(framebuffer))?;
        self.textures
            .get_mut(&texture.0)
            .ok_or(DeviceError::UnknownTexture(texture))?
            .write(region, pixels, stride)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if let Some(texture) = self.framebuffers.remove(&framebuffer.0) {
            self.textures.remove(&texture.0);
        }
    }

    fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    fn extension_function(&self, name: &str) -> Option<NonNull<c_void>> {
        self.functions.get(name).copied()
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}
