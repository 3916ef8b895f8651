//! Triangulated paths and the jittered multi-pass draw.

use crate::render::cache::mesh::MeshStore;
use crate::render::context::Context;
use crate::render::device::{BlendMode, RenderDevice};
use crate::render::types::AffineTransform;
use crate::tessellate::{decompose, Contour, TessError};
use crate::util::config::{render_config, MAX_OVERSAMPLING_LEVEL};

/// One oversampling pass: window-space offset and blend weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JitterPass {
    pub dx: f32,
    pub dy: f32,
    pub weight: f32,
}

/// `level²` passes on a stratified grid inside one pixel.
///
/// Level 0 is treated as 1; levels above `MAX_OVERSAMPLING_LEVEL` are clamped to it.
pub fn oversampling_passes(level: u32) -> impl Iterator<Item = JitterPass> {
    let n = level.clamp(1, MAX_OVERSAMPLING_LEVEL);
    let weight = 1.0 / (n * n) as f32;
    (0..n * n).map(move |k| {
        let (i, j) = (k % n, k / n);
        JitterPass {
            dx: (i as f32 + 0.5) / n as f32 - 0.5,
            dy: (j as f32 + 0.5) / n as f32 - 0.5,
            weight,
        }
    })
}

/// A filled contour stored as triangles, drawn with software oversampling.
#[derive(Debug)]
pub struct TriangulatedPath {
    mesh: MeshStore,
}

impl TriangulatedPath {
    pub fn new(contour: &Contour, transform: &AffineTransform) -> Result<Self, TessError> {
        Self::with_block_capacity(contour, transform, render_config().block_capacity)
    }

    pub fn with_block_capacity(
        contour: &Contour,
        transform: &AffineTransform,
        block_capacity: usize,
    ) -> Result<Self, TessError> {
        let trapezoids = decompose(contour, transform)?;
        let mut mesh = MeshStore::new(block_capacity);
        for t in &trapezoids {
            mesh.add_trapezoid(t);
        }
        log::debug!(
            "path: {} sub-paths -> {} trapezoids -> {} triangles in {} blocks",
            contour.sub_paths().len(),
            trapezoids.len(),
            mesh.triangle_count(),
            mesh.block_count()
        );
        Ok(Self { mesh })
    }

    pub fn mesh(&self) -> &MeshStore {
        &self.mesh
    }

    pub fn triangle_count(&self) -> usize {
        self.mesh.triangle_count()
    }

    pub fn area(&self) -> f32 {
        self.mesh.area()
    }

    pub fn is_empty(&self) -> bool {
        self.mesh.is_empty()
    }

    /// Compact the mesh storage. Idempotent; geometry is unchanged.
    pub fn optimise_storage(&mut self) {
        self.mesh.optimise();
    }

    /// Fill in the context's current colour using `oversampling_level²` jittered passes.
    ///
    /// Passes are accumulated with additive blending at `1/level²` each, so the target
    /// should start transparent where the path lands. Blend mode and window offset are
    /// restored afterwards.
    pub fn draw<D: RenderDevice>(&self, context: &Context<D>, oversampling_level: u32) {
        let Some(mut st) = context.begin("TriangulatedPath::draw") else { return };
        if self.mesh.is_empty() {
            return;
        }
        let colour = st.colour();
        let saved_blend = st.blend();
        st.set_blend(BlendMode::Additive);

        for pass in oversampling_passes(oversampling_level) {
            #[cfg(feature = "verbose_logs")]
            log::trace!("path pass: offset ({}, {}) weight {}", pass.dx, pass.dy, pass.weight);
            st.set_window_offset(pass.dx, pass.dy);
            let pass_colour = colour.with_multiplied_alpha(pass.weight);
            for block in self.mesh.blocks().iter().filter(|b| !b.is_empty()) {
                st.draw_list_2d(block.vertices(), None, pass_colour, None);
            }
        }

        st.set_window_offset(0.0, 0.0);
        st.set_blend(saved_blend);
    }

    /// `draw` at the configured oversampling level.
    pub fn draw_default<D: RenderDevice>(&self, context: &Context<D>) {
        self.draw(context, render_config().oversampling_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::context::BackendError;
    use crate::render::device::soft::SoftDevice;
    use crate::render::types::Colour;
    use crate::tessellate::FillRule;

    fn ctx(w: u32, h: u32) -> Context<SoftDevice> {
        let ctx = Context::new(SoftDevice::new(w, h));
        ctx.make_current();
        ctx
    }

    fn square(x: f32, y: f32, size: f32) -> Contour {
        Contour::from_polygon(&[(x, y), (x + size, y), (x + size, y + size), (x, y + size)], FillRule::NonZero)
    }

    fn alpha_at(ctx: &Context<SoftDevice>, x: u32, y: u32) -> f32 {
        ctx.device().pixel(x, y).map_or(0.0, |p| p[3])
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
    fn passes_form_a_weighted_grid() {
        assert_eq!(oversampling_passes(0).collect::<Vec<_>>(), vec![JitterPass { dx: 0.0, dy: 0.0, weight: 1.0 }]);
        assert_eq!(oversampling_passes(1).count(), 1);
        for level in 2..=5u32 {
            let passes: Vec<_> = oversampling_passes(level).collect();
            assert_eq!(passes.len(), (level * level) as usize);
            let total: f32 = passes.iter().map(|p| p.weight).sum();
            assert!((total - 1.0).abs() < 1e-5);
            assert!(passes.iter().all(|p| p.dx.abs() < 0.5 && p.dy.abs() < 0.5));
            let mean_dx: f32 = passes.iter().map(|p| p.dx).sum::<f32>() / passes.len() as f32;
            assert!(mean_dx.abs() < 1e-6);
        }
    }

    #[test]
    fn huge_levels_are_clamped() {
        let max = MAX_OVERSAMPLING_LEVEL as usize;
        assert_eq!(oversampling_passes(70_000).count(), max * max);
        assert_eq!(oversampling_passes(u32::MAX).count(), max * max);
        let first = oversampling_passes(u32::MAX).next().unwrap();
        assert_eq!(first.weight, 1.0 / (max * max) as f32);
    }

    #[test]
    fn rectangle_becomes_two_triangles() {
        let contour = square(0.0, 0.0, 10.0);
        let path = TriangulatedPath::new(&contour, &AffineTransform::identity()).unwrap();
        assert_eq!(path.triangle_count(), 2);
        assert!((path.area() - 100.0).abs() < 1e-3);

        let scaled = TriangulatedPath::new(&contour, &AffineTransform::scale(2.0, 2.0)).unwrap();
        assert_eq!(scaled.triangle_count(), 2);
        assert!((scaled.area() - 400.0).abs() < 1e-3);
    }

    #[test]
    fn degenerate_input_is_rejected() {
        let contour = Contour::from_polygon(&[(0.0, 0.0), (5.0, 5.0)], FillRule::NonZero);
        assert_eq!(
            TriangulatedPath::new(&contour, &AffineTransform::identity()).err(),
            Some(TessError::DegenerateSubPath { index: 0, points: 2 })
        );
    }

    #[test]
    fn level_n_issues_n_squared_passes() {
        let path = TriangulatedPath::new(&square(2.0, 2.0, 8.0), &AffineTransform::identity()).unwrap();
        for level in 1..=4u32 {
            let ctx = ctx(16, 16);
            path.draw(&ctx, level);
            assert_eq!(ctx.device().stats().draw_calls, level * level);
            assert_eq!(ctx.blend_mode(), BlendMode::Alpha);
        }
    }

    #[test]
    fn pixel_aligned_fill_has_exact_coverage() {
        let ctx = ctx(16, 16);
        ctx.set_colour(Colour::rgba(0.0, 0.0, 1.0, 1.0));
        let path = TriangulatedPath::new(&square(2.0, 2.0, 10.0), &AffineTransform::identity()).unwrap();
        path.draw(&ctx, 4);
        assert_eq!(alpha_sum(&ctx), 100.0);
        assert_eq!(ctx.device().pixel(2, 2), Some([0.0, 0.0, 1.0, 1.0]));
        assert_eq!(alpha_at(&ctx, 12, 2), 0.0);
    }

    #[test]
    fn half_covered_pixels_get_half_alpha() {
        let ctx = ctx(16, 16);
        let path = TriangulatedPath::new(&square(0.0, 0.0, 4.5), &AffineTransform::identity()).unwrap();
        path.draw(&ctx, 4);
        assert_eq!(alpha_at(&ctx, 1, 1), 1.0);
        assert!((alpha_at(&ctx, 4, 1) - 0.5).abs() < 1e-6);
        assert!((alpha_at(&ctx, 4, 4) - 0.25).abs() < 1e-6);

        let aliased = self::ctx(16, 16);
        path.draw(&aliased, 1);
        assert!(alpha_at(&aliased, 4, 1) == 0.0 || alpha_at(&aliased, 4, 1) == 1.0);
    }

    #[test]
    fn draw_restores_blend_mode_and_offset() {
        let ctx = ctx(16, 16);
        ctx.set_blend_mode(BlendMode::Replace);
        let path = TriangulatedPath::new(&square(0.0, 0.0, 4.0), &AffineTransform::identity()).unwrap();
        path.draw(&ctx, 3);
        assert_eq!(ctx.blend_mode(), BlendMode::Replace);
        ctx.fill_rect_with_colour(crate::render::types::RectI::new(8, 8, 1, 1), Colour::WHITE);
        assert_eq!(alpha_at(&ctx, 8, 8), 1.0);
        assert_eq!(alpha_at(&ctx, 9, 8), 0.0);
    }

    #[test]
    fn optimise_keeps_triangles_and_pixels() {
        let mut contour = Contour::new(FillRule::EvenOdd);
        contour.add_rectangle(1.0, 1.0, 12.0, 12.0);
        contour.add_rectangle(4.0, 4.0, 5.0, 5.0);
        let mut path =
            TriangulatedPath::with_block_capacity(&contour, &AffineTransform::rotation(0.3), 3).unwrap();
        let count = path.triangle_count();

        let before = ctx(16, 16);
        path.draw(&before, 3);
        path.optimise_storage();
        path.optimise_storage();
        assert_eq!(path.triangle_count(), count);
        assert_eq!(path.mesh().allocated_triangles(), count);
        let after = ctx(16, 16);
        path.draw(&after, 3);

        let (a, b) = (before.device(), after.device());
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(a.pixel(x, y), b.pixel(x, y));
            }
        }
    }

    #[test]
    fn drawing_without_current_context_is_an_error() {
        let ctx = Context::new(SoftDevice::new(8, 8));
        let path = TriangulatedPath::new(&square(0.0, 0.0, 4.0), &AffineTransform::identity()).unwrap();
        path.draw(&ctx, 2);
        assert_eq!(ctx.device().stats().draw_calls, 0);
        assert_eq!(ctx.take_error(), Some(BackendError::NoActiveContext));
    }

    #[test]
    fn empty_contour_draws_nothing() {
        let ctx = ctx(8, 8);
        let path = TriangulatedPath::new(&Contour::new(FillRule::NonZero), &AffineTransform::identity()).unwrap();
        assert!(path.is_empty());
        path.draw_default(&ctx);
        assert_eq!(ctx.device().stats().draw_calls, 0);
    }
}
