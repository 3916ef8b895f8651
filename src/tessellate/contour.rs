//! Already-flattened vector outlines: the decomposer's input.

use crate::tessellate::TessError;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// Policy deciding which regions of a self-intersecting contour are inside.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

impl FillRule {
    pub fn is_inside(self, winding: i32) -> bool {
        match self {
            FillRule::NonZero => winding != 0,
            FillRule::EvenOdd => winding % 2 != 0,
        }
    }
}

/// One polyline of a contour.
///
/// Open sub-paths are closed implicitly (last point joined back to the first)
/// when the contour is decomposed.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SubPath {
    points: Vec<Point>,
    closed: bool,
}

impl SubPath {
    pub fn new(points: Vec<Point>, closed: bool) -> Self {
        Self { points, closed }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Points with a duplicated closing vertex removed.
    pub(crate) fn ring(&self) -> &[Point] {
        let mut n = self.points.len();
        while n >= 2 && self.points[0] == self.points[n - 1] {
            n -= 1;
        }
        &self.points[..n]
    }
}

/// A fillable outline made of one or more sub-paths plus its fill rule.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Contour {
    sub_paths: Vec<SubPath>,
    fill_rule: FillRule,
}

impl Contour {
    pub fn new(fill_rule: FillRule) -> Self {
        Self { sub_paths: Vec::new(), fill_rule }
    }

    /// A single closed polygon.
    pub fn from_polygon<P: Into<Point> + Copy>(points: &[P], fill_rule: FillRule) -> Self {
        let mut contour = Self::new(fill_rule);
        contour.add_sub_path(SubPath::new(points.iter().map(|&p| p.into()).collect(), true));
        contour
    }

    pub fn add_sub_path(&mut self, sub_path: SubPath) {
        self.sub_paths.push(sub_path);
    }

    pub fn add_rectangle(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.add_sub_path(SubPath::new(
            vec![
                Point::new(x, y),
                Point::new(x + w, y),
                Point::new(x + w, y + h),
                Point::new(x, y + h),
            ],
            true,
        ));
    }

    pub fn sub_paths(&self) -> &[SubPath] {
        &self.sub_paths
    }

    pub fn fill_rule(&self) -> FillRule {
        self.fill_rule
    }

    pub fn set_fill_rule(&mut self, fill_rule: FillRule) {
        self.fill_rule = fill_rule;
    }

    pub fn is_empty(&self) -> bool {
        self.sub_paths.is_empty()
    }

    /// Reject input the decomposer cannot turn into correct geometry.
    pub fn validate(&self) -> Result<(), TessError> {
        for (index, sub_path) in self.sub_paths.iter().enumerate() {
            if sub_path.points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
                return Err(TessError::NonFiniteCoordinate { index });
            }
            let points = sub_path.ring().len();
            if points < 3 {
                return Err(TessError::DegenerateSubPath { index, points });
            }
        }
        Ok(())
    }
}

/// Incremental builder in the familiar move/line/close style.
#[derive(Debug, Default)]
pub struct ContourBuilder {
    contour: Contour,
    current: Vec<Point>,
}

impl ContourBuilder {
    pub fn new(fill_rule: FillRule) -> Self {
        Self { contour: Contour::new(fill_rule), current: Vec::new() }
    }

    /// Start a new sub-path, finishing the current one as open.
    pub fn move_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.finish(false);
        self.current.push(Point::new(x, y));
        self
    }

    /// Without a preceding `move_to`, the first `line_to` starts the sub-path.
    pub fn line_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.current.push(Point::new(x, y));
        self
    }

    pub fn close(&mut self) -> &mut Self {
        self.finish(true);
        self
    }

    pub fn build(mut self) -> Contour {
        self.finish(false);
        self.contour
    }

    fn finish(&mut self, closed: bool) {
        if self.current.is_empty() {
            return;
        }
        let points = std::mem::take(&mut self.current);
        self.contour.add_sub_path(SubPath::new(points, closed));
    }
}
