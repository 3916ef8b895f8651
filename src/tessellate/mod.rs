//! Registration-time tessellation: flattened contours in, horizontal trapezoids out.
//!
//! Design rule: nothing in here touches a rendering context. The output is plain
//! geometry that `render::cache::mesh` turns into triangle blocks.

pub mod contour;
pub mod trapezoid;

pub use contour::{Contour, ContourBuilder, FillRule, Point, SubPath};
pub use trapezoid::{decompose, Trapezoid};

use thiserror::Error;

/// Input the decomposer refuses rather than guessing at.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TessError {
    /// A sub-path has fewer than three distinct points once its closing vertex is dropped.
    #[error("sub-path {index} has only {points} point(s); at least 3 are required")]
    DegenerateSubPath { index: usize, points: usize },
    #[error("sub-path {index} contains a non-finite coordinate")]
    NonFiniteCoordinate { index: usize },
}
