use geo::{MultiLineString, MultiPolygon, Point};
use serde::Serialize;
use serde_json::{Map, Value};

/// Geometry kind of an ingested layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeomKind {
    Point,
    Line,
    Polygon,
}

impl GeomKind {
    pub const ALL: [GeomKind; 3] = [GeomKind::Point, GeomKind::Line, GeomKind::Polygon];

    pub fn to_str(&self) -> &'static str {
        match self {
            GeomKind::Point => "point",
            GeomKind::Line => "line",
            GeomKind::Polygon => "polygon",
        }
    }

    pub fn parse(s: &str) -> Option<GeomKind> {
        match s {
            "point" => Some(GeomKind::Point),
            "line" => Some(GeomKind::Line),
            "polygon" => Some(GeomKind::Polygon),
            _ => None,
        }
    }

    /// Layer-name suffix used when one source file yields several kinds.
    pub fn suffix(&self) -> &'static str {
        match self {
            GeomKind::Point => "_points",
            GeomKind::Line => "_lines",
            GeomKind::Polygon => "_polygons",
        }
    }
}

/// The recognized geometry of one input feature. Single- and multi-part
/// variants of the same kind collapse into the multi-part representation.
#[derive(Debug, Clone)]
pub enum FeatureGeom {
    Points(Vec<Point<f64>>),
    Lines(MultiLineString<f64>),
    Polygons(MultiPolygon<f64>),
}

impl FeatureGeom {
    #[inline]
    pub fn kind(&self) -> GeomKind {
        match self {
            FeatureGeom::Points(_) => GeomKind::Point,
            FeatureGeom::Lines(_) => GeomKind::Line,
            FeatureGeom::Polygons(_) => GeomKind::Polygon,
        }
    }
}

/// A single input feature: one recognized geometry plus its properties.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geom: FeatureGeom,
    pub properties: Map<String, Value>,
}

impl Feature {
    #[inline]
    pub fn kind(&self) -> GeomKind {
        self.geom.kind()
    }
}
