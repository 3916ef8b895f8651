//! Scanline sweep turning a contour into horizontal trapezoids.
//!
//! Edges are swept top to bottom. Slab boundaries sit at every vertex Y and at every
//! Y where two edges swap horizontal order, so inside a slab the edge order is fixed
//! and the fill rule only needs a winding counter, never explicit intersection points.

use std::cmp::Ordering;

use crate::render::types::AffineTransform;
use crate::tessellate::{Contour, FillRule, TessError};

/// Slabs or crossings closer than this are treated as coincident.
const Y_EPSILON: f64 = 1e-9;
/// Trapezoids with less area than this are dropped.
const AREA_EPSILON: f64 = 1e-9;

/// Horizontal slab of filled area, `top < bottom` in y-down coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trapezoid {
    pub top: f32,
    pub bottom: f32,
    pub top_left: f32,
    pub top_right: f32,
    pub bottom_left: f32,
    pub bottom_right: f32,
}

impl Trapezoid {
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        0.5 * ((self.top_right - self.top_left) + (self.bottom_right - self.bottom_left)) * self.height()
    }
}

#[derive(Clone, Copy, Debug)]
struct Edge {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    /// +1 when the outline runs downwards along this edge, -1 upwards.
    dir: i32,
}

impl Edge {
    #[inline(always)]
    fn x_at(&self, y: f64) -> f64 {
        if y <= self.y0 {
            return self.x0;
        }
        if y >= self.y1 {
            return self.x1;
        }
        self.x0 + (y - self.y0) * (self.x1 - self.x0) / (self.y1 - self.y0)
    }
}

/// Edge sample inside one slab.
#[derive(Clone, Copy, Debug)]
struct Crossing {
    edge: usize,
    x_top: f64,
    x_bottom: f64,
    x_mid: f64,
    dir: i32,
}

/// Open trapezoid that may still grow downwards.
#[derive(Clone, Copy, Debug)]
struct Pending {
    left: usize,
    right: usize,
    top: f64,
    bottom: f64,
    top_left: f64,
    top_right: f64,
    bottom_left: f64,
    bottom_right: f64,
}

impl Pending {
    fn area(&self) -> f64 {
        0.5 * ((self.top_right - self.top_left) + (self.bottom_right - self.bottom_left))
            * (self.bottom - self.top)
    }

    fn to_trapezoid(self) -> Trapezoid {
        Trapezoid {
            top: self.top as f32,
            bottom: self.bottom as f32,
            top_left: self.top_left as f32,
            top_right: self.top_right as f32,
            bottom_left: self.bottom_left as f32,
            bottom_right: self.bottom_right as f32,
        }
    }
}

/// Decompose `contour` (after `transform`) into trapezoids under the contour's fill rule.
///
/// Open sub-paths are closed implicitly. Output is sorted by top edge, then left X.
pub fn decompose(contour: &Contour, transform: &AffineTransform) -> Result<Vec<Trapezoid>, TessError> {
    contour.validate()?;

    let mut edges = build_edges(contour, transform);
    if edges.is_empty() {
        return Ok(Vec::new());
    }
    edges.sort_by(|a, b| a.y0.total_cmp(&b.y0));

    let mut ys: Vec<f64> = edges.iter().flat_map(|e| [e.y0, e.y1]).collect();
    ys.sort_by(f64::total_cmp);
    ys.dedup_by(|a, b| (*a - *b).abs() <= Y_EPSILON);

    let rule = contour.fill_rule();
    let mut sweep = Sweep::default();
    let mut active: Vec<usize> = Vec::new();
    let mut next_edge = 0usize;

    for pair in ys.windows(2) {
        let (ya, yb) = (pair[0], pair[1]);

        active.retain(|&i| edges[i].y1 > ya + Y_EPSILON);
        while next_edge < edges.len() && edges[next_edge].y0 <= ya + Y_EPSILON {
            if edges[next_edge].y1 > ya + Y_EPSILON {
                active.push(next_edge);
            }
            next_edge += 1;
        }

        let mut cuts = vec![ya];
        cuts.extend(order_swaps(&edges, &active, ya, yb));
        cuts.push(yb);
        cuts.sort_by(f64::total_cmp);
        cuts.dedup_by(|a, b| (*a - *b).abs() <= Y_EPSILON);

        for cut in cuts.windows(2) {
            sweep.slab(&edges, &active, cut[0], cut[1], rule);
        }
    }

    let mut out = sweep.finish();
    out.sort_by(|a, b| match a.top.total_cmp(&b.top) {
        Ordering::Equal => a.top_left.total_cmp(&b.top_left),
        other => other,
    });
    log::debug!(
        "decompose: {} edges, {} slabs, {} trapezoids",
        edges.len(),
        ys.len().saturating_sub(1),
        out.len()
    );
    Ok(out)
}

fn build_edges(contour: &Contour, transform: &AffineTransform) -> Vec<Edge> {
    let mut edges = Vec::new();
    for sub_path in contour.sub_paths() {
        let ring = sub_path.ring();
        if !sub_path.is_closed() {
            log::debug!("decompose: auto-closing open sub-path of {} points", ring.len());
        }
        let pts: Vec<(f64, f64)> = ring
            .iter()
            .map(|p| transform.apply_f64(p.x as f64, p.y as f64))
            .collect();
        for (i, &(ax, ay)) in pts.iter().enumerate() {
            let (bx, by) = pts[(i + 1) % pts.len()];
            // Horizontal edges bound no vertical extent; their endpoints still
            // show up as vertices of the neighbouring edges.
            if ay == by {
                continue;
            }
            let edge = if ay < by {
                Edge { x0: ax, y0: ay, x1: bx, y1: by, dir: 1 }
            } else {
                Edge { x0: bx, y0: by, x1: ax, y1: ay, dir: -1 }
            };
            edges.push(edge);
        }
    }
    edges
}

/// Y values strictly inside `(ya, yb)` where two active edges trade places.
///
/// Edges are ordered by X at `ya`, then insertion-sorted by X at `yb`: every swap is one
/// crossing pair, so the cost is `O(E log E + K)` for `K` crossings.
fn order_swaps(edges: &[Edge], active: &[usize], ya: f64, yb: f64) -> Vec<f64> {
    let mut order: Vec<(f64, f64)> = active
        .iter()
        .map(|&i| (edges[i].x_at(ya), edges[i].x_at(yb)))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let mut out = Vec::new();
    for n in 1..order.len() {
        let mut k = n;
        while k > 0 && order[k - 1].1 > order[k].1 {
            let (a, b) = (order[k - 1], order[k]);
            let d_top = a.0 - b.0;
            let d_bot = a.1 - b.1;
            // Equal tops are ordered by bottom X and never land here; d_top < 0 < d_bot.
            if d_top < 0.0 {
                let y = ya + (yb - ya) * d_top / (d_top - d_bot);
                if y > ya + Y_EPSILON && y < yb - Y_EPSILON {
                    out.push(y);
                }
            }
            order.swap(k - 1, k);
            k -= 1;
        }
    }
    out
}

#[derive(Default)]
struct Sweep {
    open: Vec<Pending>,
    done: Vec<Pending>,
}

impl Sweep {
    fn slab(&mut self, edges: &[Edge], active: &[usize], y0: f64, y1: f64, rule: FillRule) {
        let ymid = 0.5 * (y0 + y1);
        let mut crossings: Vec<Crossing> = active
            .iter()
            .map(|&i| {
                let e = &edges[i];
                Crossing {
                    edge: i,
                    x_top: e.x_at(y0),
                    x_bottom: e.x_at(y1),
                    x_mid: e.x_at(ymid),
                    dir: e.dir,
                }
            })
            .collect();
        crossings.sort_by(|a, b| a.x_mid.total_cmp(&b.x_mid));

        let mut still_open = Vec::with_capacity(self.open.len());
        let mut winding = 0i32;
        let mut left: Option<Crossing> = None;
        for c in crossings {
            let was_inside = rule.is_inside(winding);
            winding += c.dir;
            let now_inside = rule.is_inside(winding);
            if !was_inside && now_inside {
                left = Some(c);
            } else if was_inside && !now_inside {
                if let Some(l) = left.take() {
                    still_open.push(self.extend_or_open(l, c, y0, y1));
                }
            }
        }

        // Anything not continued in this slab is final.
        self.done.append(&mut self.open);
        self.open = still_open;
    }

    fn extend_or_open(&mut self, l: Crossing, r: Crossing, y0: f64, y1: f64) -> Pending {
        let continued = self.open.iter().position(|p| {
            (p.bottom - y0).abs() <= Y_EPSILON
                && ((p.left == l.edge && p.right == r.edge)
                    || (continues(p.top, p.bottom, p.top_left, p.bottom_left, &l, y0, y1)
                        && continues(p.top, p.bottom, p.top_right, p.bottom_right, &r, y0, y1)))
        });
        match continued {
            Some(idx) => {
                let mut p = self.open.swap_remove(idx);
                p.left = l.edge;
                p.right = r.edge;
                p.bottom = y1;
                p.bottom_left = l.x_bottom;
                p.bottom_right = r.x_bottom;
                p
            }
            None => Pending {
                left: l.edge,
                right: r.edge,
                top: y0,
                bottom: y1,
                top_left: l.x_top,
                top_right: r.x_top,
                bottom_left: l.x_bottom,
                bottom_right: r.x_bottom,
            },
        }
    }

    fn finish(mut self) -> Vec<Trapezoid> {
        self.done.append(&mut self.open);
        self.done
            .into_iter()
            .filter(|p| p.area() > AREA_EPSILON)
            .map(Pending::to_trapezoid)
            .collect()
    }
}

/// True when `c` carries on the straight side running from `(x_top, top)` to `(x_bottom, bottom)`.
fn continues(top: f64, bottom: f64, x_top: f64, x_bottom: f64, c: &Crossing, y0: f64, y1: f64) -> bool {
    const X_EPSILON: f64 = 1e-9;
    if (x_bottom - c.x_top).abs() > X_EPSILON {
        return false;
    }
    let slope_prev = (x_bottom - x_top) / (bottom - top);
    let slope_next = (c.x_bottom - c.x_top) / (y1 - y0);
    (slope_prev - slope_next).abs() <= X_EPSILON
}
