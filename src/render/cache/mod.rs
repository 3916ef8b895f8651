pub mod bitmaps;
pub mod mesh;
