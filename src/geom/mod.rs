mod clip;
mod measure;

pub use clip::{Clip, LinePiece, PolygonPiece, clip_lines, clip_polygons};
pub(crate) use measure::{line_length_m, polygon_area_m2};
