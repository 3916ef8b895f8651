use crate::tessellate::Trapezoid;

/// Widths below this count as a collapsed trapezoid side.
const DEGENERATE_WIDTH: f32 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Triangle {
    pub a: [f32; 2],
    pub b: [f32; 2],
    pub c: [f32; 2],
}

impl Triangle {
    /// Shoelace area; positive for every triangle the store emits from trapezoids.
    pub fn signed_area(&self) -> f32 {
        0.5 * ((self.b[0] - self.a[0]) * (self.c[1] - self.a[1])
            - (self.b[1] - self.a[1]) * (self.c[0] - self.a[0]))
    }
}

/// Append-only run of triangles, stored as three consecutive vertices each.
#[derive(Debug)]
pub struct TriangleBlock {
    vertices: Vec<[f32; 2]>,
}

impl TriangleBlock {
    fn with_capacity(triangles: usize) -> Self {
        Self { vertices: Vec::with_capacity(triangles * 3) }
    }

    /// Vertex array ready for a triangle-list draw.
    pub fn vertices(&self) -> &[[f32; 2]] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Triangles this block can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.vertices.capacity() / 3
    }

    fn is_full(&self) -> bool {
        self.vertices.len() + 3 > self.vertices.capacity()
    }

    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.vertices
            .chunks_exact(3)
            .map(|v| Triangle { a: v[0], b: v[1], c: v[2] })
    }
}

/// Growable triangle storage made of fixed-capacity blocks.
///
/// Blocks are only ever released all together (on drop). `optimise` rebuilds the
/// arena with exactly-sized blocks instead of trimming in place.
#[derive(Debug)]
pub struct MeshStore {
    blocks: Vec<TriangleBlock>,
    block_capacity: usize,
    optimised: bool,
}

impl MeshStore {
    pub fn new(block_capacity: usize) -> Self {
        Self {
            blocks: Vec::new(),
            block_capacity: block_capacity.max(1),
            optimised: false,
        }
    }

    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }

    pub fn blocks(&self) -> &[TriangleBlock] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.blocks.iter().map(TriangleBlock::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(TriangleBlock::is_empty)
    }

    /// Triangle slots currently allocated, used or not.
    pub fn allocated_triangles(&self) -> usize {
        self.blocks.iter().map(TriangleBlock::capacity).sum()
    }

    pub fn is_optimised(&self) -> bool {
        self.optimised
    }

    /// All triangles in emission order.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.blocks.iter().flat_map(TriangleBlock::triangles)
    }

    pub fn area(&self) -> f32 {
        self.triangles().map(|t| t.signed_area().abs()).sum()
    }

    /// `(min_x, min_y, max_x, max_y)`, or `None` when empty.
    pub fn bounds(&self) -> Option<(f32, f32, f32, f32)> {
        let mut it = self.blocks.iter().flat_map(|b| b.vertices.iter());
        let first = it.next()?;
        let init = (first[0], first[1], first[0], first[1]);
        Some(it.fold(init, |(x0, y0, x1, y1), v| {
            (x0.min(v[0]), y0.min(v[1]), x1.max(v[0]), y1.max(v[1]))
        }))
    }

    fn start_new_block(&mut self) {
        self.blocks.push(TriangleBlock::with_capacity(self.block_capacity));
    }

    pub fn add_triangle(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x3: f32, y3: f32) {
        if self.blocks.last().map_or(true, TriangleBlock::is_full) {
            self.start_new_block();
        }
        self.optimised = false;
        if let Some(block) = self.blocks.last_mut() {
            block.vertices.extend_from_slice(&[[x1, y1], [x2, y2], [x3, y3]]);
        }
    }

    pub fn extend<I: IntoIterator<Item = Triangle>>(&mut self, triangles: I) {
        for t in triangles {
            self.add_triangle(t.a[0], t.a[1], t.b[0], t.b[1], t.c[0], t.c[1]);
        }
    }

    /// Split a trapezoid into at most two triangles sharing one orientation.
    pub fn add_trapezoid(&mut self, t: &Trapezoid) {
        let (y1, y2) = (t.top, t.bottom);
        if y2 - y1 <= 0.0 {
            return;
        }
        let top_collapsed = t.top_right - t.top_left <= DEGENERATE_WIDTH;
        let bottom_collapsed = t.bottom_right - t.bottom_left <= DEGENERATE_WIDTH;

        match (top_collapsed, bottom_collapsed) {
            (true, true) => {}
            (true, false) => {
                let apex = 0.5 * (t.top_left + t.top_right);
                self.add_triangle(apex, y1, t.bottom_right, y2, t.bottom_left, y2);
            }
            (false, true) => {
                let apex = 0.5 * (t.bottom_left + t.bottom_right);
                self.add_triangle(t.top_left, y1, t.top_right, y1, apex, y2);
            }
            (false, false) => {
                self.add_triangle(t.top_left, y1, t.top_right, y1, t.bottom_right, y2);
                self.add_triangle(t.top_left, y1, t.bottom_right, y2, t.bottom_left, y2);
            }
        }
    }

    /// Rebuild storage into the fewest blocks whose allocation matches their contents.
    ///
    /// Idempotent, order preserving and a no-op on an empty store.
    pub fn optimise(&mut self) {
        if self.optimised {
            return;
        }
        let total = self.triangle_count();
        let mut compacted: Vec<TriangleBlock> = Vec::with_capacity(total.div_ceil(self.block_capacity));
        let mut source = self.blocks.iter().flat_map(|b| b.vertices.chunks_exact(3));
        let mut remaining = total;
        while remaining > 0 {
            let n = remaining.min(self.block_capacity);
            let mut vertices: Vec<[f32; 2]> = Vec::with_capacity(n * 3);
            for tri in source.by_ref().take(n) {
                vertices.extend_from_slice(tri);
            }
            vertices.shrink_to_fit();
            compacted.push(TriangleBlock { vertices });
            remaining -= n;
        }

        log::debug!(
            "mesh optimise: {} triangles, {} -> {} blocks, {} -> {} slots",
            total,
            self.blocks.len(),
            compacted.len(),
            self.allocated_triangles(),
            compacted.iter().map(TriangleBlock::capacity).sum::<usize>()
        );
        self.blocks = compacted;
        self.optimised = true;
    }
}
