#![doc = "Meshdex public API"]
mod common;
mod feature;
mod geom;
mod ingest;
mod io;
mod mesh;
mod store;

#[doc(inline)]
pub use feature::{Feature, FeatureGeom, GeomKind};

#[doc(inline)]
pub use geom::{Clip, LinePiece, PolygonPiece, clip_lines, clip_polygons};

#[doc(inline)]
pub use ingest::{
    FileOutcome, FileStatus, FileSummary, IngestOptions, IngestReport, ingest_dir, ingest_file,
};

#[doc(inline)]
pub use mesh::{GridTiler, MeshCell, NATIONAL_BBOX, Tiling, mesh_code};

#[doc(inline)]
pub use store::{LayerDef, LayerFeature, MeshIndexEntry, MeshStore};
