use crate::render::types::RectI;

/// One horizontal run of constant coverage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeTableSpan {
    pub y: i32,
    pub x: i32,
    pub width: i32,
    /// Coverage, 0..=255.
    pub level: u8,
}

/// Scanline coverage table.
///
/// Each line holds `(x, level)` transitions ordered by `x`; a level holds until the next
/// transition and the last transition on a line is always level 0.
#[derive(Clone, Debug)]
pub struct EdgeTable {
    bounds: RectI,
    lines: Vec<Vec<(i32, u8)>>,
}

fn level_at(line: &[(i32, u8)], x: i32) -> u8 {
    let i = line.partition_point(|&(tx, _)| tx <= x);
    if i == 0 {
        0
    } else {
        line[i - 1].1
    }
}

impl EdgeTable {
    pub fn new(bounds: RectI) -> Self {
        let rows = bounds.h.max(0) as usize;
        Self { bounds, lines: vec![Vec::new(); rows] }
    }

    pub fn bounds(&self) -> RectI {
        self.bounds
    }

    pub fn is_empty(&self) -> bool {
        self.spans().next().is_none()
    }

    /// Set coverage over `x0..x1` on line `y`, replacing what was there. Clipped to bounds.
    pub fn push_span(&mut self, y: i32, x0: i32, x1: i32, level: u8) {
        if y < self.bounds.y || y >= self.bounds.bottom() {
            return;
        }
        let x0 = x0.max(self.bounds.x);
        let x1 = x1.min(self.bounds.right());
        if x0 >= x1 {
            return;
        }
        let line = &mut self.lines[(y - self.bounds.y) as usize];
        let after = level_at(line, x1);
        line.retain(|&(x, _)| x < x0 || x > x1);
        let at = line.partition_point(|&(x, _)| x < x0);
        line.insert(at, (x0, level));
        line.insert(at + 1, (x1, after));
        line.dedup_by(|next, prev| next.1 == prev.1);
    }

    /// Coverage of one pixel.
    pub fn level(&self, x: i32, y: i32) -> u8 {
        if y < self.bounds.y || y >= self.bounds.bottom() {
            return 0;
        }
        level_at(&self.lines[(y - self.bounds.y) as usize], x)
    }

    /// Non-zero runs, top to bottom then left to right.
    pub fn spans(&self) -> impl Iterator<Item = EdgeTableSpan> + '_ {
        let top = self.bounds.y;
        self.lines.iter().enumerate().flat_map(move |(row, line)| {
            line.windows(2).filter_map(move |pair| {
                let ((x, level), (next, _)) = (pair[0], pair[1]);
                (level != 0).then_some(EdgeTableSpan { y: top + row as i32, x, width: next - x, level })
            })
        })
    }
}
