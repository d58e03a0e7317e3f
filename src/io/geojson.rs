use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use geo::{Coord, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use serde_json::{json, Map, Value};

use crate::feature::{Feature, FeatureGeom};

/// Read all features from a GeoJSON file.
///
/// Accepts a `FeatureCollection` or a single `Feature` at the root. Features
/// with unsupported or missing geometry are skipped with a warning; malformed
/// JSON or coordinate structure fails the whole file.
pub(crate) fn read_geojson_file(path: &Path) -> Result<Vec<Feature>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse GeoJSON in {}", path.display()))?;

    let raw_features: Vec<&Value> = match value["type"].as_str() {
        Some("FeatureCollection") => value["features"]
            .as_array()
            .map(|array| array.iter().collect())
            .unwrap_or_default(),
        Some("Feature") => vec![&value],
        other => bail!(
            "Unsupported GeoJSON root type {:?} in {}",
            other,
            path.display()
        ),
    };

    let mut features = Vec::with_capacity(raw_features.len());
    for (idx, raw) in raw_features.into_iter().enumerate() {
        match parse_feature(raw)
            .with_context(|| format!("Invalid feature {} in {}", idx, path.display()))?
        {
            Some(feature) => features.push(feature),
            None => {
                let kind = raw["geometry"]["type"].as_str().unwrap_or("<missing>");
                log::warn!(
                    "skipping feature {} in {}: unsupported geometry type {}",
                    idx,
                    path.display(),
                    kind
                );
            }
        }
    }
    Ok(features)
}

/// Parse one GeoJSON feature. Returns None for geometry types the pipeline
/// does not index (GeometryCollection, null geometry).
fn parse_feature(value: &Value) -> Result<Option<Feature>> {
    let properties = value["properties"]
        .as_object()
        .cloned()
        .unwrap_or_else(Map::new);

    let geometry = &value["geometry"];
    let Some(kind) = geometry["type"].as_str() else {
        return Ok(None);
    };
    let coords = geometry["coordinates"]
        .as_array()
        .ok_or_else(|| anyhow!("Geometry {} has no coordinates array", kind))?;

    let geom = match kind {
        "Point" => FeatureGeom::Points(vec![Point(parse_coord(&geometry["coordinates"])?)]),
        "MultiPoint" => {
            let points = coords
                .iter()
                .map(|pair| Ok(Point(parse_coord(pair)?)))
                .collect::<Result<Vec<_>>>()?;
            FeatureGeom::Points(points)
        }
        "LineString" => FeatureGeom::Lines(MultiLineString(vec![parse_line_coords(coords)?])),
        "MultiLineString" => {
            let lines = coords
                .iter()
                .map(|line| {
                    let pairs = line
                        .as_array()
                        .ok_or_else(|| anyhow!("Invalid MultiLineString: part is not an array"))?;
                    parse_line_coords(pairs)
                })
                .collect::<Result<Vec<_>>>()?;
            FeatureGeom::Lines(MultiLineString(lines))
        }
        "Polygon" => FeatureGeom::Polygons(MultiPolygon(vec![parse_polygon_coords(coords)?])),
        "MultiPolygon" => {
            let polygons = coords
                .iter()
                .map(|poly| {
                    let rings = poly
                        .as_array()
                        .ok_or_else(|| anyhow!("Invalid MultiPolygon: polygon is not an array"))?;
                    parse_polygon_coords(rings)
                })
                .collect::<Result<Vec<_>>>()?;
            FeatureGeom::Polygons(MultiPolygon(polygons))
        }
        _ => return Ok(None),
    };

    Ok(Some(Feature { geom, properties }))
}

/// Parse a single GeoJSON position: [x, y] with optional extra dimensions.
fn parse_coord(value: &Value) -> Result<Coord<f64>> {
    let pair = value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid coordinate: expected an array"))?;
    if pair.len() < 2 {
        bail!("Invalid coordinate: expected at least two numbers");
    }
    let x = pair[0]
        .as_f64()
        .ok_or_else(|| anyhow!("Invalid coordinate: x must be a number"))?;
    let y = pair[1]
        .as_f64()
        .ok_or_else(|| anyhow!("Invalid coordinate: y must be a number"))?;
    Ok(Coord { x, y })
}

/// Parse a sequence of positions into a LineString, preserving open ends.
fn parse_line_coords(coords: &[Value]) -> Result<LineString<f64>> {
    let points = coords
        .iter()
        .map(parse_coord)
        .collect::<Result<Vec<_>>>()?;
    Ok(LineString(points))
}

/// Parse a ring (exterior or interior) from GeoJSON coordinates.
fn parse_ring_coords(coords: &[Value]) -> Result<LineString<f64>> {
    let mut points = coords
        .iter()
        .map(parse_coord)
        .collect::<Result<Vec<_>>>()?;

    // Ensure ring is closed (first point == last point)
    if !points.is_empty() && points[0] != points[points.len() - 1] {
        points.push(points[0]);
    }
    Ok(LineString(points))
}

/// Parse one polygon: first ring is the exterior, the rest are holes.
fn parse_polygon_coords(rings: &[Value]) -> Result<Polygon<f64>> {
    let exterior_coords = rings
        .first()
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("Invalid Polygon: missing exterior ring"))?;
    let exterior = parse_ring_coords(exterior_coords)?;

    let mut interiors = Vec::new();
    for ring in &rings[1..] {
        let ring_coords = ring
            .as_array()
            .ok_or_else(|| anyhow!("Invalid Polygon: interior ring is not an array"))?;
        interiors.push(parse_ring_coords(ring_coords)?);
    }
    Ok(Polygon::new(exterior, interiors))
}

/// Helper to convert a Point to a serde_json::Value representing GeoJSON geometry.
pub(crate) fn point_to_geojson(point: &Point<f64>) -> Value {
    json!({
        "type": "Point",
        "coordinates": [point.x(), point.y()],
    })
}

/// Helper to convert a MultiLineString to a serde_json::Value representing GeoJSON geometry.
pub(crate) fn multilinestring_to_geojson(lines: &MultiLineString<f64>) -> Value {
    let parts: Vec<Vec<Vec<f64>>> = lines
        .0
        .iter()
        .map(|ls| ls.coords().map(|c| vec![c.x, c.y]).collect())
        .collect();
    json!({
        "type": "MultiLineString",
        "coordinates": parts,
    })
}

/// Helper to convert a MultiPolygon to a serde_json::Value representing GeoJSON geometry.
pub(crate) fn multipolygon_to_geojson(mp: &MultiPolygon<f64>) -> Value {
    let mut polygons_json = Vec::new();
    for polygon in mp.0.iter() {
        let mut rings: Vec<Vec<Vec<f64>>> = Vec::with_capacity(1 + polygon.interiors().len());
        rings.push(polygon.exterior().coords().map(|c| vec![c.x, c.y]).collect());
        for interior in polygon.interiors() {
            rings.push(interior.coords().map(|c| vec![c.x, c.y]).collect());
        }
        polygons_json.push(rings);
    }
    json!({
        "type": "MultiPolygon",
        "coordinates": polygons_json,
    })
}
