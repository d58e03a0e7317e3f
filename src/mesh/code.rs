//! Mesh identifier computation.
//!
//! The national grid nests five subdivisions. A primary cell spans 40'
//! of latitude by 1° of longitude; each subsequent level splits its parent
//! into 8×8 (secondary), 10×10 ("1km"), 2×2 ("500m"), and 2×2 ("250m")
//! children. The 10-character identifier concatenates the indices picked at
//! every level, so stripping trailing characters coarsens the cell.

/// Seconds of latitude spanned by one quarter-mesh ("250m") cell.
pub(crate) const CELL_LAT_SEC: f64 = 7.5;
/// Seconds of longitude spanned by one quarter-mesh ("250m") cell.
pub(crate) const CELL_LON_SEC: f64 = 11.25;

/// Compute the 10-character mesh identifier of the cell containing the
/// given WGS84 coordinate.
///
/// Pure and deterministic: every coordinate inside the same quarter-mesh
/// cell yields the same string, and this is the single implementation used
/// by ingestion, the tiler, and the CLI alike.
pub fn mesh_code(lat: f64, lon: f64) -> String {
    // Primary grid: 40' of latitude by 1 degree of longitude.
    let p = (lat * 1.5).floor() as i64;
    let q = lon.floor() as i64 - 100;

    // Offsets into the primary cell, in minutes.
    let lat_min = (lat * 60.0 - p as f64 * 40.0).max(0.0);
    let lon_min = ((lon - lon.floor()) * 60.0).max(0.0);

    // Secondary grid: 5' x 7'30".
    let (r, lat_min) = subdivide(lat_min, 5.0, 8);
    let (s, lon_min) = subdivide(lon_min, 7.5, 8);

    // Tertiary ("1km") grid: 30" x 45".
    let (t, lat_sec) = subdivide(lat_min * 60.0, 30.0, 10);
    let (u, lon_sec) = subdivide(lon_min * 60.0, 45.0, 10);

    // Half ("500m") and quarter ("250m") cells: quadrant digits 1-4,
    // numbered SW, SE, NW, NE.
    let (half_lat, lat_sec) = subdivide(lat_sec, 15.0, 2);
    let (half_lon, lon_sec) = subdivide(lon_sec, 22.5, 2);
    let half = half_lat * 2 + half_lon + 1;

    let (quarter_lat, _) = subdivide(lat_sec, CELL_LAT_SEC, 2);
    let (quarter_lon, _) = subdivide(lon_sec, CELL_LON_SEC, 2);
    let quarter = quarter_lat * 2 + quarter_lon + 1;

    format!("{p:02}{q:02}{r}{s}{t}{u}{half}{quarter}")
}

/// Split an offset into a subdivision index and the remaining offset.
/// The index is clamped to its half-open range so floating error at a cell
/// boundary cannot overflow the digit, and the remainder never goes negative.
fn subdivide(offset: f64, step: f64, count: i64) -> (i64, f64) {
    let idx = ((offset / step).floor() as i64).clamp(0, count - 1);
    (idx, (offset - idx as f64 * step).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokyo_station_quarter_mesh() {
        // Hand-derived: 5339 primary/secondary block over central Tokyo.
        assert_eq!(mesh_code(35.681, 139.767), "5339461132");
    }

    #[test]
    fn code_is_ten_characters_across_the_extent() {
        for &(lat, lon) in &[
            (24.45, 122.93), // far southwest
            (35.681, 139.767),
            (43.06, 141.35), // far north
            (45.9, 153.9),   // extent corner
            (20.0, 122.0),   // extent origin
        ] {
            assert_eq!(mesh_code(lat, lon).len(), 10, "({lat}, {lon})");
        }
    }

    #[test]
    fn same_cell_same_code() {
        // Quarter cells are 7.5" x 11.25"; these points sit well inside one.
        let a = mesh_code(35.6810, 139.7670);
        let b = mesh_code(35.6812, 139.7673);
        assert_eq!(a, b);
    }

    #[test]
    fn adjacent_cells_differ() {
        let lat = 35.681;
        let lon = 139.767;
        let east = mesh_code(lat, lon + CELL_LON_SEC / 3600.0);
        let north = mesh_code(lat + CELL_LAT_SEC / 3600.0, lon);
        assert_ne!(mesh_code(lat, lon), east);
        assert_ne!(mesh_code(lat, lon), north);
        assert_ne!(east, north);
    }

    #[test]
    fn boundary_coordinate_belongs_to_upper_cell() {
        // 36.0 and 140.0 are exactly representable and sit on boundaries of
        // every subdivision level; half-open cells put them in the cell whose
        // lower bound equals the coordinate.
        assert_eq!(mesh_code(36.0, 140.0), mesh_code(36.0 + 1e-7, 140.0 + 1e-7));
        assert_ne!(mesh_code(36.0, 140.0), mesh_code(36.0 - 1e-7, 140.0));
        assert_ne!(mesh_code(36.0, 140.0), mesh_code(36.0, 140.0 - 1e-7));

        // 36.125 = 36°07'30" is exactly a 1km-cell boundary.
        assert_eq!(mesh_code(36.125, 140.0), mesh_code(36.125 + 1e-7, 140.0));
        assert_ne!(mesh_code(36.125, 140.0), mesh_code(36.125 - 1e-7, 140.0));
    }

    #[test]
    fn subdivide_clamps_overflow() {
        // An offset nudged past the last child by float error stays inside it.
        let (idx, rem) = subdivide(40.0 + 1e-12, 5.0, 8);
        assert_eq!(idx, 7);
        assert!(rem >= 0.0);
        let (idx, rem) = subdivide(-1e-12, 5.0, 8);
        assert_eq!(idx, 0);
        assert_eq!(rem, 0.0);
    }

    #[test]
    fn digits_follow_the_published_decomposition() {
        // 35.681N: p = floor(35.681 * 1.5) = 53, remainder 20.86' -> r = 4;
        // 139.767E: q = 39, remainder 46.02' -> s = 6; then 1km cell (1, 1),
        // NW half (3), SE quarter of that half (2).
        let code = mesh_code(35.681, 139.767);
        assert_eq!(&code[0..2], "53");
        assert_eq!(&code[2..4], "39");
        assert_eq!(&code[4..6], "46");
        assert_eq!(&code[6..8], "11");
        assert_eq!(&code[8..9], "3");
        assert_eq!(&code[9..10], "2");
    }
}
