//! Explicit rendering context.
//!
//! Owns the device plus the fixed-function style state around it: projection and
//! modelview matrices, current colour, blend mode, scissor and a sticky error flag.
//! A context is bound to the thread that created it (`Rc` state, so `!Send`) and is
//! only usable while it is that thread's current context.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::render::device::{BlendMode, DeviceError, DeviceVertex, RenderDevice, TextureId};
use crate::render::edge_table::EdgeTable;
use crate::render::types::{AffineTransform, Colour, Mat4, RectI};

/// The backend's error flag. Only the first error is kept until it is read or reset.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    #[error("no active rendering context on this thread")]
    NoActiveContext,
    #[error("invalid value passed to a rendering call")]
    InvalidValue,
    #[error("matrix stack underflow")]
    StackUnderflow,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<u64> = const { Cell::new(0) };
}

pub(crate) struct ContextState<D> {
    pub(crate) device: D,
    error: Option<BackendError>,
    colour: Colour,
    blend: BlendMode,
    viewport: (u32, u32),
    projection: Mat4,
    modelview: Mat4,
    stack: Vec<Mat4>,
    /// Window-space offset added after projection (sub-pixel jitter).
    window_offset: (f32, f32),
    scissor: Option<RectI>,
}

impl<D: RenderDevice> ContextState<D> {
    pub(crate) fn record_error(&mut self, error: BackendError) {
        if self.error.is_none() {
            log::debug!("backend error: {error}");
            self.error = Some(error);
        }
    }

    fn mvp(&self) -> Mat4 {
        self.projection.mul(&self.modelview)
    }

    /// Object space to window pixels; `None` behind the eye.
    #[inline(always)]
    fn project(&self, mvp: &Mat4, x: f32, y: f32, z: f32) -> Option<(f32, f32)> {
        let p = mvp.transform([x, y, z, 1.0]);
        if p[3] <= 0.0 {
            return None;
        }
        let (nx, ny) = (p[0] / p[3], p[1] / p[3]);
        let (vw, vh) = (self.viewport.0 as f32, self.viewport.1 as f32);
        Some((
            (nx + 1.0) * 0.5 * vw + self.window_offset.0,
            (1.0 - ny) * 0.5 * vh + self.window_offset.1,
        ))
    }

    /// Transform and submit a triangle list. Triangles touching the eye plane are dropped.
    pub(crate) fn draw_list(
        &mut self,
        positions: &[[f32; 3]],
        uvs: Option<&[[f32; 2]]>,
        colour: Colour,
        texture: Option<TextureId>,
    ) {
        if texture.is_some_and(|t| !t.is_valid()) {
            self.record_error(BackendError::InvalidValue);
            return;
        }
        let mvp = self.mvp();
        let mut out: Vec<DeviceVertex> = Vec::with_capacity(positions.len());
        for (t, tri) in positions.chunks_exact(3).enumerate() {
            let mut verts = [DeviceVertex::default(); 3];
            let mut visible = true;
            for (k, p) in tri.iter().enumerate() {
                match self.project(&mvp, p[0], p[1], p[2]) {
                    Some((x, y)) => {
                        let [u, v] = uvs.and_then(|uv| uv.get(t * 3 + k)).copied().unwrap_or([0.0, 0.0]);
                        verts[k] = DeviceVertex { x, y, u, v };
                    }
                    None => visible = false,
                }
            }
            if visible {
                out.extend_from_slice(&verts);
            }
        }
        if !out.is_empty() {
            self.device.draw_triangles(&out, colour, texture);
        }
    }

    pub(crate) fn draw_list_2d(
        &mut self,
        positions: &[[f32; 2]],
        uvs: Option<&[[f32; 2]]>,
        colour: Colour,
        texture: Option<TextureId>,
    ) {
        let lifted: Vec<[f32; 3]> = positions.iter().map(|p| [p[0], p[1], 0.0]).collect();
        self.draw_list(&lifted, uvs, colour, texture);
    }

    fn draw_rect(&mut self, rect: RectI, colour: Colour, texture: Option<TextureId>) {
        if rect.is_empty() {
            return;
        }
        let (x0, y0, x1, y1) = (rect.x as f32, rect.y as f32, rect.right() as f32, rect.bottom() as f32);
        let positions = [[x0, y0], [x1, y0], [x1, y1], [x0, y0], [x1, y1], [x0, y1]];
        let uvs = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        self.draw_list_2d(&positions, texture.map(|_| &uvs[..]), colour, texture);
    }

    pub(crate) fn blend(&self) -> BlendMode {
        self.blend
    }

    pub(crate) fn set_blend(&mut self, mode: BlendMode) {
        self.blend = mode;
        self.device.set_blend_mode(mode);
    }

    pub(crate) fn colour(&self) -> Colour {
        self.colour
    }

    pub(crate) fn set_window_offset(&mut self, dx: f32, dy: f32) {
        self.window_offset = (dx, dy);
    }
}

/// Handle to a rendering context. Clones refer to the same context.
pub struct Context<D: RenderDevice> {
    id: u64,
    state: Rc<RefCell<ContextState<D>>>,
}

impl<D: RenderDevice> Clone for Context<D> {
    fn clone(&self) -> Self {
        Self { id: self.id, state: Rc::clone(&self.state) }
    }
}

impl<D: RenderDevice> Drop for Context<D> {
    fn drop(&mut self) {
        if Rc::strong_count(&self.state) == 1 {
            self.release_current();
        }
    }
}

impl<D: RenderDevice> Context<D> {
    /// Wrap `device`, set up for 2D drawing in device pixels. The context is not current yet.
    pub fn new(mut device: D) -> Self {
        let (w, h) = (device.surface_width(), device.surface_height());
        device.set_blend_mode(BlendMode::default());
        let state = ContextState {
            device,
            error: None,
            colour: Colour::WHITE,
            blend: BlendMode::default(),
            viewport: (w, h),
            projection: Mat4::ortho(0.0, w as f32, h as f32, 0.0, -1.0, 1.0),
            modelview: Mat4::IDENTITY,
            stack: Vec::new(),
            window_offset: (0.0, 0.0),
            scissor: None,
        };
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Make this the calling thread's current context.
    pub fn make_current(&self) {
        CURRENT.with(|c| c.set(self.id));
    }

    /// Detach this context from the thread if it is current.
    pub fn release_current(&self) {
        CURRENT.with(|c| {
            if c.get() == self.id {
                c.set(0);
            }
        });
    }

    /// True if this context is the calling thread's current context.
    pub fn is_active(&self) -> bool {
        CURRENT.with(|c| c.get() == self.id)
    }

    /// True if the calling thread has any current context.
    pub fn is_any_context_active() -> bool {
        CURRENT.with(|c| c.get() != 0)
    }

    pub fn device(&self) -> Ref<'_, D> {
        Ref::map(self.state.borrow(), |s| &s.device)
    }

    pub fn device_mut(&self) -> RefMut<'_, D> {
        RefMut::map(self.state.borrow_mut(), |s| &mut s.device)
    }

    /// Borrow the state for an operation that needs the context to be current.
    ///
    /// Records `NoActiveContext` and returns `None` otherwise. Also returns `None`, with a
    /// warning, while a `device()` / `device_mut()` guard is still alive.
    pub(crate) fn begin(&self, op: &str) -> Option<RefMut<'_, ContextState<D>>> {
        let Ok(mut state) = self.state.try_borrow_mut() else {
            log::warn!("{op}: context {} is borrowed by a device guard; call skipped", self.id);
            return None;
        };
        if !self.is_active() {
            log::debug!("{op}: context {} is not current", self.id);
            state.record_error(BackendError::NoActiveContext);
            return None;
        }
        Some(state)
    }

    /// Release path for RAII resources: runs even when the context is not current.
    ///
    /// Skipped with a warning while a device guard is alive; the resource then leaks.
    pub(crate) fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> Option<R> {
        match self.state.try_borrow_mut() {
            Ok(mut state) => Some(f(&mut state.device)),
            Err(_) => {
                log::warn!("context {}: device is borrowed; resource release skipped", self.id);
                None
            }
        }
    }

    /// Peek at the error flag.
    pub fn error(&self) -> Option<BackendError> {
        self.state.borrow().error
    }

    /// Read and clear the error flag.
    pub fn take_error(&self) -> Option<BackendError> {
        self.state.try_borrow_mut().ok().and_then(|mut s| s.error.take())
    }

    /// Clear the error flag.
    pub fn reset_error_state(&self) {
        if let Ok(mut s) = self.state.try_borrow_mut() {
            s.error = None;
        }
    }

    pub fn colour(&self) -> Colour {
        self.state.borrow().colour
    }

    pub fn set_colour(&self, colour: Colour) {
        if let Some(mut st) = self.begin("set_colour") {
            st.colour = colour;
        }
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.state.borrow().blend
    }

    pub fn set_blend_mode(&self, mode: BlendMode) {
        if let Some(mut st) = self.begin("set_blend_mode") {
            st.set_blend(mode);
        }
    }

    pub fn clear(&self, colour: Colour) {
        if let Some(mut st) = self.begin("clear") {
            st.device.clear(colour);
        }
    }

    /// Orthographic projection mapping `(0, 0)..(width, height)` onto the viewport, y down.
    pub fn prepare_for_2d(&self, width: u32, height: u32) {
        if let Some(mut st) = self.begin("prepare_for_2d") {
            if width == 0 || height == 0 {
                st.record_error(BackendError::InvalidValue);
                return;
            }
            st.viewport = (width, height);
            st.projection = Mat4::ortho(0.0, width as f32, height as f32, 0.0, -1.0, 1.0);
            st.modelview = Mat4::IDENTITY;
        }
    }

    /// Replace the projection with a `gluPerspective` style frustum. `fovy` is in degrees.
    pub fn set_perspective(&self, fovy: f64, aspect: f64, near: f64, far: f64) {
        if let Some(mut st) = self.begin("set_perspective") {
            if aspect <= 0.0 || near <= 0.0 || far <= near || fovy <= 0.0 || fovy >= 180.0 {
                st.record_error(BackendError::InvalidValue);
                return;
            }
            st.projection = Mat4::perspective(fovy, aspect, near, far);
        }
    }

    /// Post-multiply the modelview matrix: `t` applies to vertices first.
    pub fn apply_transform(&self, t: &AffineTransform) {
        if let Some(mut st) = self.begin("apply_transform") {
            st.modelview = st.modelview.mul(&t.to_mat4());
        }
    }

    pub fn push_matrix(&self) {
        if let Some(mut st) = self.begin("push_matrix") {
            let top = st.modelview;
            st.stack.push(top);
        }
    }

    pub fn pop_matrix(&self) {
        if let Some(mut st) = self.begin("pop_matrix") {
            match st.stack.pop() {
                Some(m) => st.modelview = m,
                None => st.record_error(BackendError::StackUnderflow),
            }
        }
    }

    pub fn enable_scissor_test(&self, clip: RectI) {
        if let Some(mut st) = self.begin("enable_scissor_test") {
            st.scissor = Some(clip);
            st.device.set_scissor(Some(clip));
        }
    }

    pub fn disable_scissor_test(&self) {
        if let Some(mut st) = self.begin("disable_scissor_test") {
            st.scissor = None;
            st.device.set_scissor(None);
        }
    }

    pub fn scissor(&self) -> Option<RectI> {
        self.state.borrow().scissor
    }

    /// Fill the quad with corners given in perimeter order.
    pub fn draw_quad_2d(&self, corners: [(f32, f32); 4], colour: Colour) {
        if let Some(mut st) = self.begin("draw_quad_2d") {
            let [a, b, c, d] = corners.map(|(x, y)| [x, y]);
            st.draw_list_2d(&[a, b, c, a, c, d], None, colour, None);
        }
    }

    /// 3D variant of `draw_quad_2d`, through the current projection.
    pub fn draw_quad_3d(&self, corners: [(f32, f32, f32); 4], colour: Colour) {
        if let Some(mut st) = self.begin("draw_quad_3d") {
            let [a, b, c, d] = corners.map(|(x, y, z)| [x, y, z]);
            st.draw_list(&[a, b, c, a, c, d], None, colour, None);
        }
    }

    /// Draw a triangle strip in the current colour. `tex_coords` must match `vertices`
    /// in length when a texture is given; it is ignored otherwise.
    pub fn draw_triangle_strip(&self, vertices: &[[f32; 2]], tex_coords: &[[f32; 2]], texture: Option<TextureId>) {
        let Some(mut st) = self.begin("draw_triangle_strip") else { return };
        if texture.is_some() && tex_coords.len() != vertices.len() {
            st.record_error(BackendError::InvalidValue);
            return;
        }
        if vertices.len() < 3 {
            return;
        }
        let mut positions = Vec::with_capacity((vertices.len() - 2) * 3);
        let mut uvs = Vec::with_capacity(if texture.is_some() { positions.capacity() } else { 0 });
        for i in 0..vertices.len() - 2 {
            // Odd triangles swap their first two vertices to keep one winding.
            let idx = if i % 2 == 0 { [i, i + 1, i + 2] } else { [i + 1, i, i + 2] };
            for k in idx {
                positions.push(vertices[k]);
                if texture.is_some() {
                    uvs.push(tex_coords[k]);
                }
            }
        }
        let colour = st.colour;
        let uvs = texture.map(|_| uvs.as_slice());
        st.draw_list_2d(&positions, uvs, colour, texture);
    }

    /// Draw the whole texture into the given rectangle, untinted.
    pub fn draw_texture_quad(&self, texture: TextureId, x: i32, y: i32, w: i32, h: i32) {
        if let Some(mut st) = self.begin("draw_texture_quad") {
            st.draw_rect(RectI::new(x, y, w, h), Colour::WHITE, Some(texture));
        }
    }

    pub fn fill_rect_with_texture(&self, rect: RectI, texture: TextureId, alpha: f32) {
        if let Some(mut st) = self.begin("fill_rect_with_texture") {
            st.draw_rect(rect, Colour::WHITE.with_alpha(alpha), Some(texture));
        }
    }

    /// Fill in the current colour.
    pub fn fill_rect(&self, rect: RectI) {
        if let Some(mut st) = self.begin("fill_rect") {
            let colour = st.colour;
            st.draw_rect(rect, colour, None);
        }
    }

    pub fn fill_rect_with_colour(&self, rect: RectI, colour: Colour) {
        if let Some(mut st) = self.begin("fill_rect_with_colour") {
            st.draw_rect(rect, colour, None);
        }
    }

    /// Rasterize scanline coverage runs in the current colour with alpha blending.
    pub fn fill_edge_table(&self, table: &EdgeTable) {
        let Some(mut st) = self.begin("fill_edge_table") else { return };
        let base = st.colour;
        let saved = st.blend();
        st.set_blend(BlendMode::Alpha);
        for span in table.spans() {
            let colour = base.with_multiplied_alpha(span.level as f32 / 255.0);
            st.draw_rect(RectI::new(span.x, span.y, span.width, 1), colour, None);
        }
        st.set_blend(saved);
    }

    pub fn is_extension_supported(&self, name: &str) -> bool {
        self.begin("is_extension_supported")
            .is_some_and(|st| st.device.has_extension(name))
    }

    pub fn get_extension_function(&self, name: &str) -> Option<NonNull<c_void>> {
        self.begin("get_extension_function")
            .and_then(|st| st.device.extension_function(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::soft::SoftDevice;

    fn ctx(w: u32, h: u32) -> Context<SoftDevice> {
        let ctx = Context::new(SoftDevice::new(w, h));
        ctx.make_current();
        ctx
    }

    fn alpha_sum(ctx: &Context<SoftDevice>) -> f32 {
        let dev = ctx.device();
        let mut sum = 0.0;
        for y in 0..dev.surface_height() {
            for x in 0..dev.surface_width() {
                sum += dev.pixel(x, y).map_or(0.0, |p| p[3]);
            }
        }
        sum
    }

    #[test]
    fn inactive_context_records_error_and_skips_device() {
        let ctx = Context::new(SoftDevice::new(8, 8));
        assert!(!ctx.is_active());
        ctx.fill_rect_with_colour(RectI::new(0, 0, 8, 8), Colour::WHITE);
        assert_eq!(ctx.device().stats().draw_calls, 0);
        assert_eq!(ctx.error(), Some(BackendError::NoActiveContext));

        ctx.make_current();
        ctx.reset_error_state();
        assert_eq!(ctx.error(), None);
        ctx.fill_rect_with_colour(RectI::new(0, 0, 8, 8), Colour::WHITE);
        assert_eq!(ctx.device().stats().draw_calls, 1);
    }

    #[test]
    fn only_one_context_is_current_per_thread() {
        let a = ctx(4, 4);
        let b = Context::new(SoftDevice::new(4, 4));
        assert!(a.is_active());
        b.make_current();
        assert!(!a.is_active() && b.is_active());
        drop(b);
        assert!(!Context::<SoftDevice>::is_any_context_active());
        assert!(!a.is_active());
    }

    #[test]
    fn helpers_skip_while_device_guard_is_alive() {
        let ctx = ctx(8, 8);
        {
            let dev = ctx.device();
            ctx.fill_rect_with_colour(RectI::new(0, 0, 8, 8), Colour::WHITE);
            ctx.push_matrix();
            ctx.reset_error_state();
            assert_eq!(ctx.take_error(), None);
            assert_eq!(dev.stats().draw_calls, 0);
        }
        ctx.fill_rect_with_colour(RectI::new(0, 0, 8, 8), Colour::WHITE);
        assert_eq!(ctx.device().stats().draw_calls, 1);
    }

    #[test]
    fn first_error_sticks_until_taken() {
        let ctx = ctx(4, 4);
        ctx.pop_matrix();
        ctx.prepare_for_2d(0, 0);
        assert_eq!(ctx.take_error(), Some(BackendError::StackUnderflow));
        assert_eq!(ctx.take_error(), None);
    }

    #[test]
    fn fill_rect_covers_exact_pixels() {
        let ctx = ctx(16, 16);
        ctx.set_colour(Colour::rgba(1.0, 0.0, 0.0, 1.0));
        ctx.fill_rect(RectI::new(2, 3, 5, 4));
        assert_eq!(alpha_sum(&ctx), 20.0);
        assert_eq!(ctx.device().pixel(2, 3), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(ctx.device().pixel(7, 3), Some([0.0; 4]));
    }

    #[test]
    fn apply_transform_and_matrix_stack() {
        let ctx = ctx(32, 32);
        ctx.push_matrix();
        ctx.apply_transform(&AffineTransform::translation(10.0, 10.0));
        ctx.fill_rect_with_colour(RectI::new(0, 0, 2, 2), Colour::WHITE);
        ctx.pop_matrix();
        ctx.fill_rect_with_colour(RectI::new(0, 0, 1, 1), Colour::WHITE);
        let dev = ctx.device();
        assert_eq!(dev.pixel(10, 10).map(|p| p[3]), Some(1.0));
        assert_eq!(dev.pixel(0, 0).map(|p| p[3]), Some(1.0));
        assert_eq!(dev.pixel(1, 1).map(|p| p[3]), Some(0.0));
    }

    #[test]
    fn scissor_limits_fills() {
        let ctx = ctx(16, 16);
        ctx.enable_scissor_test(RectI::new(0, 0, 4, 4));
        ctx.fill_rect_with_colour(RectI::new(0, 0, 16, 16), Colour::WHITE);
        assert_eq!(alpha_sum(&ctx), 16.0);
        ctx.disable_scissor_test();
        assert_eq!(ctx.scissor(), None);
    }

    #[test]
    fn triangle_strip_fills_rectangle() {
        let ctx = ctx(16, 16);
        let strip = [[0.0, 0.0], [0.0, 8.0], [8.0, 0.0], [8.0, 8.0]];
        ctx.draw_triangle_strip(&strip, &[], None);
        assert_eq!(alpha_sum(&ctx), 64.0);
        assert_eq!(ctx.device().stats().triangles, 2);

        ctx.draw_triangle_strip(&strip, &[[0.0, 0.0]], Some(TextureId(1)));
        assert_eq!(ctx.take_error(), Some(BackendError::InvalidValue));
    }

    #[test]
    fn invalid_texture_handle_draws_nothing() {
        let ctx = ctx(8, 8);
        ctx.draw_texture_quad(TextureId::NONE, 0, 0, 8, 8);
        assert_eq!(alpha_sum(&ctx), 0.0);
        assert_eq!(ctx.error(), Some(BackendError::InvalidValue));
    }

    #[test]
    fn quads_in_2d_and_3d() {
        let ctx = ctx(20, 20);
        ctx.draw_quad_2d([(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)], Colour::WHITE);
        assert_eq!(alpha_sum(&ctx), 16.0);

        ctx.clear(Colour::TRANSPARENT);
        ctx.set_perspective(90.0, 1.0, 0.1, 100.0);
        // At z = -1 a 90 degree frustum spans [-1, 1]; this quad covers the left half.
        ctx.draw_quad_3d(
            [(-1.0, -1.0, -1.0), (0.0, -1.0, -1.0), (0.0, 1.0, -1.0), (-1.0, 1.0, -1.0)],
            Colour::WHITE,
        );
        assert_eq!(alpha_sum(&ctx), 200.0);
        // Behind the eye: dropped.
        ctx.clear(Colour::TRANSPARENT);
        ctx.draw_quad_3d(
            [(-1.0, -1.0, 1.0), (0.0, -1.0, 1.0), (0.0, 1.0, 1.0), (-1.0, 1.0, 1.0)],
            Colour::WHITE,
        );
        assert_eq!(alpha_sum(&ctx), 0.0);
    }

    #[test]
    fn extension_queries_pass_through() {
        let mut dev = SoftDevice::new(4, 4).with_extensions(&["GL_EXT_demo"]);
        let mut marker = 0u8;
        dev.register_extension_function("glDemoEXT", NonNull::from(&mut marker).cast());
        let ctx = Context::new(dev);
        assert!(!ctx.is_extension_supported("GL_EXT_demo"));
        ctx.make_current();
        assert!(ctx.is_extension_supported("GL_EXT_demo"));
        assert!(!ctx.is_extension_supported(crate::render::device::NPOT_EXTENSION));
        assert!(ctx.get_extension_function("glDemoEXT").is_some());
        assert!(ctx.get_extension_function("glMissing").is_none());
    }

    #[test]
    fn edge_table_runs_are_alpha_weighted() {
        let ctx = ctx(8, 8);
        let mut table = EdgeTable::new(RectI::new(0, 0, 8, 8));
        table.push_span(1, 0, 4, 255);
        table.push_span(2, 2, 3, 51);
        ctx.fill_edge_table(&table);
        let dev = ctx.device();
        assert_eq!(dev.pixel(0, 1).map(|p| p[3]), Some(1.0));
        assert!((dev.pixel(2, 2).map_or(0.0, |p| p[3]) - 0.2).abs() < 1e-6);
        assert_eq!(dev.pixel(3, 2).map(|p| p[3]), Some(0.0));
        assert_eq!(dev.stats().draw_calls, 2);
    }
}
