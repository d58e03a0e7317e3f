use geo::{Coord, Rect};
use log::warn;

use super::code::{CELL_LAT_SEC, CELL_LON_SEC, mesh_code};

/// National extent covered by the grid, as [min_lon, min_lat, max_lon, max_lat].
/// Geometry outside this box is never decomposed.
pub const NATIONAL_BBOX: [f64; 4] = [122.0, 20.0, 154.0, 46.0];

/// A single grid cell: its identifier and geographic bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshCell {
    pub mesh_id: String,
    pub bbox: Rect<f64>,
}

/// Result of tiling a bounding box.
#[derive(Debug, Clone, PartialEq)]
pub enum Tiling {
    /// Every cell overlapping the requested extent (none when the extent
    /// misses the national bbox entirely).
    Cells(Vec<MeshCell>),
    /// The extent spans more cells than the configured guard allows; the
    /// geometry is too fine to decompose and callers should skip it.
    TooFine { rows: usize, cols: usize },
}

impl Tiling {
    /// Cells when under the guard, empty otherwise.
    pub fn into_cells(self) -> Vec<MeshCell> {
        match self {
            Tiling::Cells(cells) => cells,
            Tiling::TooFine { .. } => Vec::new(),
        }
    }

    #[inline]
    pub fn is_too_fine(&self) -> bool {
        matches!(self, Tiling::TooFine { .. })
    }
}

/// Enumerates the grid cells overlapping a bounding box, clipped to the
/// national extent. The cell-count guard is explicit configuration so that
/// behavior stays deterministic and testable.
#[derive(Debug, Clone)]
pub struct GridTiler {
    max_cells: Option<usize>,
}

impl GridTiler {
    /// Create a tiler with the given cell-count guard (`None` = unbounded).
    pub fn new(max_cells: Option<usize>) -> Self {
        Self { max_cells }
    }

    /// Enumerate every quarter-mesh cell intersecting `bbox`.
    pub fn cells(&self, bbox: &Rect<f64>) -> Tiling {
        // 1) Clip to the national extent; disjoint boxes tile to nothing.
        let [nat_min_lon, nat_min_lat, nat_max_lon, nat_max_lat] = NATIONAL_BBOX;
        let min_lon = bbox.min().x.max(nat_min_lon);
        let min_lat = bbox.min().y.max(nat_min_lat);
        let max_lon = bbox.max().x.min(nat_max_lon);
        let max_lat = bbox.max().y.min(nat_max_lat);
        if min_lon > max_lon || min_lat > max_lat {
            return Tiling::Cells(Vec::new());
        }

        // 2) Snap outward to the cell grid, working in arc-seconds.
        let row0 = (min_lat * 3600.0 / CELL_LAT_SEC).floor() as i64;
        let mut row1 = (max_lat * 3600.0 / CELL_LAT_SEC).ceil() as i64;
        let col0 = (min_lon * 3600.0 / CELL_LON_SEC).floor() as i64;
        let mut col1 = (max_lon * 3600.0 / CELL_LON_SEC).ceil() as i64;
        // A degenerate span lying exactly on a grid line still owns the
        // half-open cell starting there.
        if row1 == row0 {
            row1 = row0 + 1;
        }
        if col1 == col0 {
            col1 = col0 + 1;
        }

        // 3) Enforce the cell-count guard before materializing anything.
        let rows = (row1 - row0) as usize;
        let cols = (col1 - col0) as usize;
        if let Some(max) = self.max_cells {
            if rows.saturating_mul(cols) > max {
                warn!("bbox spans {rows}x{cols} cells, over the {max}-cell guard");
                return Tiling::TooFine { rows, cols };
            }
        }

        // 4) Enumerate cells; identifiers come from each cell's center, which
        // sits half a step away from any boundary and cannot drift across.
        let mut cells = Vec::with_capacity(rows * cols);
        for row in row0..row1 {
            for col in col0..col1 {
                cells.push(cell_at(row, col));
            }
        }
        Tiling::Cells(cells)
    }
}

/// Build the cell at a (row, col) position on the quarter-mesh grid.
fn cell_at(row: i64, col: i64) -> MeshCell {
    let min_lat = row as f64 * CELL_LAT_SEC / 3600.0;
    let max_lat = (row + 1) as f64 * CELL_LAT_SEC / 3600.0;
    let min_lon = col as f64 * CELL_LON_SEC / 3600.0;
    let max_lon = (col + 1) as f64 * CELL_LON_SEC / 3600.0;
    MeshCell {
        mesh_id: mesh_code((min_lat + max_lat) / 2.0, (min_lon + max_lon) / 2.0),
        bbox: Rect::new(
            Coord { x: min_lon, y: min_lat },
            Coord { x: max_lon, y: max_lat },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Rect<f64> {
        Rect::new(Coord { x: min_lon, y: min_lat }, Coord { x: max_lon, y: max_lat })
    }

    #[test]
    fn disjoint_bbox_tiles_to_nothing() {
        let tiler = GridTiler::new(None);
        // Western hemisphere: entirely outside the national extent.
        let tiling = tiler.cells(&rect(-123.0, 37.0, -122.0, 38.0));
        assert_eq!(tiling, Tiling::Cells(Vec::new()));
    }

    #[test]
    fn single_cell_for_a_tiny_bbox() {
        let tiler = GridTiler::new(None);
        let cells = tiler.cells(&rect(139.767, 35.681, 139.7671, 35.6811)).into_cells();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].mesh_id, mesh_code(35.681, 139.767));
    }

    #[test]
    fn cells_cover_the_requested_extent_without_gaps() {
        let tiler = GridTiler::new(None);
        let query = rect(139.76, 35.678, 139.772, 35.688);
        let Tiling::Cells(cells) = tiler.cells(&query) else {
            panic!("guard is unbounded")
        };
        assert!(!cells.is_empty());

        // Union of cell bboxes covers the query box.
        let min_lon = cells.iter().map(|c| c.bbox.min().x).fold(f64::INFINITY, f64::min);
        let min_lat = cells.iter().map(|c| c.bbox.min().y).fold(f64::INFINITY, f64::min);
        let max_lon = cells.iter().map(|c| c.bbox.max().x).fold(f64::NEG_INFINITY, f64::max);
        let max_lat = cells.iter().map(|c| c.bbox.max().y).fold(f64::NEG_INFINITY, f64::max);
        assert!(min_lon <= query.min().x && min_lat <= query.min().y);
        assert!(max_lon >= query.max().x && max_lat >= query.max().y);

        // No duplicates, and the count matches the row/col span exactly.
        let rows = ((max_lat - min_lat) * 3600.0 / CELL_LAT_SEC).round() as usize;
        let cols = ((max_lon - min_lon) * 3600.0 / CELL_LON_SEC).round() as usize;
        assert_eq!(cells.len(), rows * cols);
        let mut ids: Vec<&str> = cells.iter().map(|c| c.mesh_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), cells.len());
    }

    #[test]
    fn upper_edge_on_a_grid_line_is_exclusive() {
        let tiler = GridTiler::new(None);
        // 36.0 / 140.0 lie exactly on cell boundaries at every level.
        let below = tiler.cells(&rect(139.99, 35.99, 140.0, 36.0)).into_cells();
        assert!(!below.is_empty());
        assert!(below.iter().all(|c| c.bbox.max().y <= 36.0 + 1e-12));
        assert!(below.iter().all(|c| c.bbox.max().x <= 140.0 + 1e-12));
    }

    #[test]
    fn degenerate_span_on_a_grid_line_owns_one_cell() {
        let tiler = GridTiler::new(None);
        // A horizontal line exactly on a cell boundary.
        let cells = tiler.cells(&rect(139.99, 36.0, 139.999, 36.0)).into_cells();
        assert!(!cells.is_empty());
        assert!(cells.iter().all(|c| (c.bbox.min().y - 36.0).abs() < 1e-12));
    }

    #[test]
    fn bbox_is_clipped_to_the_national_extent() {
        let tiler = GridTiler::new(None);
        let cells = tiler.cells(&rect(121.0, 19.0, 122.01, 20.01)).into_cells();
        assert!(!cells.is_empty());
        assert!(cells.iter().all(|c| c.bbox.max().x > 122.0 - 1e-12));
        assert!(cells.iter().all(|c| c.bbox.max().y > 20.0 - 1e-12));
    }

    #[test]
    fn capacity_guard_returns_too_fine_instead_of_failing() {
        let tiler = GridTiler::new(Some(100));
        // A country-spanning sliver: far beyond 100 cells.
        let tiling = tiler.cells(&rect(123.0, 30.0, 150.0, 30.001));
        assert!(tiling.is_too_fine());
        assert!(tiling.into_cells().is_empty());
    }

    #[test]
    fn guard_boundary_is_inclusive() {
        // Exactly max cells is allowed; one more trips the guard.
        let query = rect(139.76, 35.678, 139.772, 35.688);
        let unbounded = GridTiler::new(None).cells(&query).into_cells();
        assert!(!unbounded.is_empty());
        let at = GridTiler::new(Some(unbounded.len())).cells(&query);
        assert!(!at.is_too_fine());
        let under = GridTiler::new(Some(unbounded.len() - 1)).cells(&query);
        assert!(under.is_too_fine());
    }

    #[test]
    fn cell_ids_match_the_codec_on_cell_centers() {
        let cells = GridTiler::new(None)
            .cells(&rect(139.76, 35.678, 139.772, 35.688))
            .into_cells();
        for cell in cells {
            let center = cell.bbox.center();
            assert_eq!(cell.mesh_id, mesh_code(center.y, center.x));
        }
    }
}
