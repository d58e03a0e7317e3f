use geo::{BooleanOps, BoundingRect, MultiLineString, MultiPolygon};

use super::measure::{line_length_m, polygon_area_m2};
use crate::mesh::{GridTiler, Tiling};

/// A line feature's contribution to one grid cell.
#[derive(Debug, Clone)]
pub struct LinePiece {
    pub mesh_id: String,
    pub geom: MultiLineString<f64>,
    pub length_m: f64,
    pub length_ratio: f64,
}

/// A polygon feature's contribution to one grid cell.
#[derive(Debug, Clone)]
pub struct PolygonPiece {
    pub mesh_id: String,
    pub geom: MultiPolygon<f64>,
    pub area_m2: f64,
    pub area_ratio: f64,
}

/// Outcome of decomposing one feature onto the grid.
#[derive(Debug)]
pub enum Clip<P> {
    /// Per-cell pieces. Empty when the feature misses the national extent,
    /// in which case the feature is skipped entirely.
    Pieces(Vec<P>),
    /// Zero or non-finite total measure, or no usable bounding box; the
    /// feature is skipped entirely.
    Degenerate,
    /// The tiler's cell-count guard fired; the feature is stored without
    /// mesh decomposition.
    TooFine,
}

/// Decompose a line feature into per-cell pieces with length ratios.
///
/// Multi-part inputs are clipped as one unit per cell, so a piece may itself
/// be multi-part. Ratios are clamped to 1 to absorb clipping float error.
pub fn clip_lines(tiler: &GridTiler, lines: &MultiLineString<f64>) -> Clip<LinePiece> {
    let total = line_length_m(lines);
    if !total.is_finite() || total <= 0.0 {
        return Clip::Degenerate;
    }
    let Some(bbox) = lines.bounding_rect() else {
        return Clip::Degenerate;
    };
    let cells = match tiler.cells(&bbox) {
        Tiling::Cells(cells) => cells,
        Tiling::TooFine { .. } => return Clip::TooFine,
    };

    let mut pieces = Vec::new();
    for cell in cells {
        let clipped = cell.bbox.to_polygon().clip(lines, false);
        if clipped.0.is_empty() {
            continue;
        }
        let length_m = line_length_m(&clipped);
        if !length_m.is_finite() || length_m <= 0.0 {
            continue;
        }
        pieces.push(LinePiece {
            mesh_id: cell.mesh_id,
            geom: clipped,
            length_m,
            length_ratio: (length_m / total).min(1.0),
        });
    }
    Clip::Pieces(pieces)
}

/// Decompose a polygon feature into per-cell pieces with area ratios.
pub fn clip_polygons(tiler: &GridTiler, polygons: &MultiPolygon<f64>) -> Clip<PolygonPiece> {
    let total = polygon_area_m2(polygons);
    if !total.is_finite() || total <= 0.0 {
        return Clip::Degenerate;
    }
    let Some(bbox) = polygons.bounding_rect() else {
        return Clip::Degenerate;
    };
    let cells = match tiler.cells(&bbox) {
        Tiling::Cells(cells) => cells,
        Tiling::TooFine { .. } => return Clip::TooFine,
    };

    let mut pieces = Vec::new();
    for cell in cells {
        let clipped = cell.bbox.to_polygon().intersection(polygons);
        if clipped.0.is_empty() {
            continue;
        }
        let area_m2 = polygon_area_m2(&clipped);
        if !area_m2.is_finite() || area_m2 <= 0.0 {
            continue;
        }
        pieces.push(PolygonPiece {
            mesh_id: cell.mesh_id,
            geom: clipped,
            area_m2,
            area_ratio: (area_m2 / total).min(1.0),
        });
    }
    Clip::Pieces(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Coord, LineString, Polygon};

    fn line(coords: &[(f64, f64)]) -> MultiLineString<f64> {
        MultiLineString(vec![LineString(
            coords.iter().map(|&(x, y)| Coord { x, y }).collect(),
        )])
    }

    fn square(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![Polygon::new(
            LineString(vec![
                Coord { x: min_lon, y: min_lat },
                Coord { x: max_lon, y: min_lat },
                Coord { x: max_lon, y: max_lat },
                Coord { x: min_lon, y: max_lat },
                Coord { x: min_lon, y: min_lat },
            ]),
            vec![],
        )])
    }

    #[test]
    fn crossing_line_splits_with_ratios_summing_to_one() {
        let tiler = GridTiler::new(None);
        let lines = line(&[(139.759, 35.678), (139.771, 35.688)]);
        let Clip::Pieces(pieces) = clip_lines(&tiler, &lines) else {
            panic!("expected pieces")
        };
        assert!(pieces.len() >= 2, "got {} pieces", pieces.len());

        let sum: f64 = pieces.iter().map(|p| p.length_ratio).sum();
        assert!((sum - 1.0).abs() < 1e-6, "ratios sum to {sum}");
        for piece in &pieces {
            assert!(piece.length_ratio > 0.0 && piece.length_ratio <= 1.0);
            assert_eq!(piece.mesh_id.len(), 10);
        }
    }

    #[test]
    fn polygon_splits_with_area_conserved() {
        let tiler = GridTiler::new(None);
        let polys = square(139.7605, 35.6805, 139.7635, 35.6835);
        let Clip::Pieces(pieces) = clip_polygons(&tiler, &polys) else {
            panic!("expected pieces")
        };
        assert!(pieces.len() >= 4, "got {} pieces", pieces.len());

        let sum: f64 = pieces.iter().map(|p| p.area_ratio).sum();
        assert!((sum - 1.0).abs() < 1e-6, "ratios sum to {sum}");
        for piece in &pieces {
            assert!(piece.area_ratio > 0.0 && piece.area_ratio <= 1.0);
        }
    }

    #[test]
    fn degenerate_geometry_is_skipped() {
        let tiler = GridTiler::new(None);
        assert!(matches!(clip_lines(&tiler, &line(&[])), Clip::Degenerate));
        assert!(matches!(
            clip_lines(&tiler, &line(&[(139.7, 35.6), (139.7, 35.6)])),
            Clip::Degenerate
        ));
        assert!(matches!(
            clip_polygons(&tiler, &MultiPolygon(vec![])),
            Clip::Degenerate
        ));
    }

    #[test]
    fn geometry_outside_the_extent_yields_no_pieces() {
        let tiler = GridTiler::new(None);
        let Clip::Pieces(pieces) = clip_lines(&tiler, &line(&[(-122.4, 37.7), (-122.3, 37.8)]))
        else {
            panic!("expected empty pieces")
        };
        assert!(pieces.is_empty());
    }

    #[test]
    fn capacity_guard_reports_too_fine() {
        let tiler = GridTiler::new(Some(4));
        let lines = line(&[(139.759, 35.678), (139.771, 35.688)]);
        assert!(matches!(clip_lines(&tiler, &lines), Clip::TooFine));
    }

    #[test]
    fn line_within_one_cell_keeps_full_ratio() {
        let tiler = GridTiler::new(None);
        // Well inside the quarter cell that contains (35.681, 139.767).
        let lines = line(&[(139.767, 35.681), (139.7671, 35.6811)]);
        let Clip::Pieces(pieces) = clip_lines(&tiler, &lines) else {
            panic!("expected pieces")
        };
        assert_eq!(pieces.len(), 1);
        assert!((pieces[0].length_ratio - 1.0).abs() < 1e-9);
        assert_eq!(pieces[0].mesh_id, crate::mesh::mesh_code(35.681, 139.767));
    }
}
