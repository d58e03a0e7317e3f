use geo::{Coord, GeodesicArea, MultiLineString, MultiPolygon};

/// Mean earth radius in meters (IUGG).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle length of a polyline in meters.
pub(crate) fn line_length_m(lines: &MultiLineString<f64>) -> f64 {
    lines
        .iter()
        .map(|ls| ls.0.windows(2).map(|w| haversine_m(w[0], w[1])).sum::<f64>())
        .sum()
}

/// Unsigned geodesic area of a multipolygon in square meters.
pub(crate) fn polygon_area_m2(polygons: &MultiPolygon<f64>) -> f64 {
    polygons.geodesic_area_unsigned()
}

/// Haversine distance between two lon/lat coordinates, in meters.
fn haversine_m(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let lat1 = a.y.to_radians();
    let lat2 = b.y.to_radians();
    let dlat = (b.y - a.y).to_radians();
    let dlon = (b.x - a.x).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * h.sqrt().asin()
}
