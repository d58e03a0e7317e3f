//! Layer ingestion pipeline.
//!
//! Turns a directory of GeoJSON files into per-layer tables plus a consistent
//! mesh presence index. Each layer is replaced wholesale inside one
//! transaction: delete, re-insert, index delta, registry upsert. Re-running
//! the same input converges to the same state.

use std::path::{Path, PathBuf};

use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use geo::Coord;
use rusqlite::{params, types::Value as SqlValue, Connection};
use serde::Serialize;
use walkdir::WalkDir;

use crate::common::require_dir_exists;
use crate::feature::{Feature, FeatureGeom, GeomKind};
use crate::geom::{clip_lines, clip_polygons, Clip};
use crate::io::geojson::{
    multilinestring_to_geojson, multipolygon_to_geojson, point_to_geojson, read_geojson_file,
};
use crate::mesh::{mesh_code, GridTiler, NATIONAL_BBOX};
use crate::store::{
    batch_insert, delete_registry_row, drop_layer_tables, find_layer, layer_mesh_ids,
    layers_for_source, normalize_layer_name, provision_layer_tables, refresh_presence_flags,
    set_layer_presence, upsert_layer, LayerDef, MeshStore,
};

/// Ingestion tuning knobs.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Upper bound on candidate cells per line/polygon feature. Features
    /// tiling to more cells are stored without mesh decomposition.
    pub max_cells_per_feature: Option<usize>,
}

/// Outcome of one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Parsed and committed.
    Ingested,
    /// Unreadable or malformed input; the run continues.
    Skipped,
    /// Store-level failure; the run continues but reports failure.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: String,
    pub status: FileStatus,
}

/// What one file contributed.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FileSummary {
    pub layers: usize,
    pub features: usize,
    pub pieces: usize,
}

/// Aggregate outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files: Vec<FileOutcome>,
    pub layers_written: usize,
    pub features_written: usize,
    pub pieces_written: usize,
}

impl IngestReport {
    pub fn ingested(&self) -> usize {
        self.count(FileStatus::Ingested)
    }

    pub fn skipped(&self) -> usize {
        self.count(FileStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(FileStatus::Failed)
    }

    /// True when no file hit a store-level failure.
    pub fn ok(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }
}

/// Ingest every `.geojson`/`.json` file under `dir`, in path order.
///
/// Input problems skip the file; store failures mark the run as failed but
/// later files are still attempted. Files already committed stay committed.
pub fn ingest_dir(store: &mut MeshStore, dir: &Path, options: &IngestOptions) -> Result<IngestReport> {
    require_dir_exists(dir)?;

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("geojson") || ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut report = IngestReport::default();
    for path in paths {
        let file = path.display().to_string();
        match ingest_file(store, &path, options) {
            Ok(summary) => {
                log::info!(
                    "ingested {file}: {} layers, {} features, {} pieces",
                    summary.layers,
                    summary.features,
                    summary.pieces
                );
                report.layers_written += summary.layers;
                report.features_written += summary.features;
                report.pieces_written += summary.pieces;
                report.files.push(FileOutcome {
                    file,
                    status: FileStatus::Ingested,
                });
            }
            Err(err) if is_store_error(&err) => {
                log::error!("store failure on {file}: {err:#}");
                report.files.push(FileOutcome {
                    file,
                    status: FileStatus::Failed,
                });
            }
            Err(err) => {
                log::warn!("skipping {file}: {err:#}");
                report.files.push(FileOutcome {
                    file,
                    status: FileStatus::Skipped,
                });
            }
        }
    }
    Ok(report)
}

/// Ingest one file: group features by kind, remove layers the file no longer
/// produces, then replace each produced layer inside its own transaction.
pub fn ingest_file(store: &mut MeshStore, path: &Path, options: &IngestOptions) -> Result<FileSummary> {
    // 1) Parse. Failures here are input errors; nothing has been written.
    let features = read_geojson_file(path)?;
    let source_file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    // 2) Group by geometry kind.
    let mut groups: AHashMap<GeomKind, Vec<Feature>> = AHashMap::new();
    for feature in features {
        groups.entry(feature.kind()).or_default().push(feature);
    }

    // 3) Expected layer names; kind suffixes only when the file yields more
    //    than one kind.
    let base = normalize_layer_name(&stem);
    let multi_kind = groups.len() > 1;
    let expected: Vec<(GeomKind, String)> = GeomKind::ALL
        .iter()
        .filter(|kind| groups.contains_key(kind))
        .map(|kind| {
            let name = if multi_kind {
                format!("{base}{}", kind.suffix())
            } else {
                base.clone()
            };
            (*kind, name)
        })
        .collect();

    // 4) Diff against the registry; drop layers this file stopped producing.
    let registered = layers_for_source(store.conn(), &source_file)?;
    let expected_names: AHashSet<&str> = expected.iter().map(|(_, name)| name.as_str()).collect();
    for stale in &registered {
        if !expected_names.contains(stale.layer_name.as_str()) {
            log::info!("removing layer {} no longer produced by {source_file}", stale.layer_name);
            remove_layer(store, stale)?;
        }
    }

    // 5) Replace each produced layer. The previous registration is resolved
    //    by layer name, not source file: a stem re-delivered under another
    //    extension still owns the same layer, and the index delta must start
    //    from that registration's coverage and kind.
    let tiler = GridTiler::new(options.max_cells_per_feature);
    let mut summary = FileSummary::default();
    for (kind, layer_name) in &expected {
        let def = LayerDef::new(layer_name, *kind, &source_file);
        let previous = find_layer(store.conn(), layer_name)?;
        let stats = ingest_layer(store, &tiler, &def, previous.as_ref(), &groups[kind])?;
        summary.layers += 1;
        summary.features += stats.features;
        summary.pieces += stats.pieces;
    }
    Ok(summary)
}

/// Remove one layer entirely: rows, dynamic tables, registry entry, and its
/// contribution to the presence index. Runs in one transaction.
fn remove_layer(store: &mut MeshStore, def: &LayerDef) -> Result<()> {
    let tx = store.transaction()?;

    let touched = layer_mesh_ids(&tx, &def.layer_name, def.kind)?;
    let feature_table = generic_feature_table(def.kind);
    // Mesh-map rows cascade from the feature rows.
    tx.execute(
        &format!("DELETE FROM {feature_table} WHERE source_layer = ?1"),
        params![def.layer_name],
    )?;
    drop_layer_tables(&tx, def)?;
    delete_registry_row(&tx, &def.layer_name)?;
    set_layer_presence(&tx, &def.layer_name, &touched, false)?;
    refresh_presence_flags(&tx, &touched)?;

    tx.commit()?;
    Ok(())
}

struct LayerStats {
    features: usize,
    pieces: usize,
}

/// Replace one layer's rows and update the presence index from the delta of
/// old vs. new mesh ids, all in one transaction.
fn ingest_layer(
    store: &mut MeshStore,
    tiler: &GridTiler,
    def: &LayerDef,
    previous: Option<&LayerDef>,
    features: &[Feature],
) -> Result<LayerStats> {
    let tx = store.transaction()?;

    // Coverage before replacement, read from the kind the layer used to be.
    let old_ids = match previous {
        Some(prev) => layer_mesh_ids(&tx, &prev.layer_name, prev.kind)?,
        None => AHashSet::new(),
    };

    provision_layer_tables(&tx, def, previous)?;

    // Wholesale replacement of this layer's rows. Generic mesh-map rows
    // cascade from the generic feature rows.
    if let Some(prev) = previous {
        if prev.kind != def.kind {
            let old_table = generic_feature_table(prev.kind);
            tx.execute(
                &format!("DELETE FROM {old_table} WHERE source_layer = ?1"),
                params![def.layer_name],
            )?;
        }
    }
    let feature_table = generic_feature_table(def.kind);
    tx.execute(
        &format!("DELETE FROM {feature_table} WHERE source_layer = ?1"),
        params![def.layer_name],
    )?;
    tx.execute(&format!("DELETE FROM {}", def.table_name), [])?;
    if let Some(map) = &def.mesh_map_table {
        tx.execute(&format!("DELETE FROM {map}"), [])?;
    }

    let stats = match def.kind {
        GeomKind::Point => insert_point_rows(&tx, def, features)?,
        GeomKind::Line => insert_line_rows(&tx, tiler, def, features)?,
        GeomKind::Polygon => insert_polygon_rows(&tx, tiler, def, features)?,
    };

    // Index delta: clear cells the layer left, set cells it now touches,
    // then refresh the per-kind flags for everything affected.
    let new_ids = layer_mesh_ids(&tx, &def.layer_name, def.kind)?;
    let removed: AHashSet<String> = old_ids.difference(&new_ids).cloned().collect();
    set_layer_presence(&tx, &def.layer_name, &removed, false)?;
    set_layer_presence(&tx, &def.layer_name, &new_ids, true)?;
    let affected: AHashSet<String> = old_ids.union(&new_ids).cloned().collect();
    refresh_presence_flags(&tx, &affected)?;

    upsert_layer(&tx, def)?;
    tx.commit()?;
    Ok(stats)
}

fn generic_feature_table(kind: GeomKind) -> &'static str {
    match kind {
        GeomKind::Point => "point_features",
        GeomKind::Line => "line_features",
        GeomKind::Polygon => "polygon_features",
    }
}

fn next_feature_id(conn: &Connection, table: &str) -> Result<i64> {
    let max: i64 = conn.query_row(
        &format!("SELECT COALESCE(MAX(id), 0) FROM {table}"),
        [],
        |row| row.get(0),
    )?;
    Ok(max + 1)
}

fn in_national_extent(lon: f64, lat: f64) -> bool {
    let [min_lon, min_lat, max_lon, max_lat] = NATIONAL_BBOX;
    lon >= min_lon && lon < max_lon && lat >= min_lat && lat < max_lat
}

/// Representative cell for a line/polygon feature row: the cell of its first
/// coordinate, or NULL when that coordinate falls outside the extent.
fn representative_mesh(coord: Option<&Coord<f64>>) -> Option<String> {
    let c = coord?;
    in_national_extent(c.x, c.y).then(|| mesh_code(c.y, c.x))
}

fn insert_point_rows(conn: &Connection, def: &LayerDef, features: &[Feature]) -> Result<LayerStats> {
    let mut id = next_feature_id(conn, "point_features")?;
    let mut generic_rows: Vec<Vec<SqlValue>> = Vec::new();
    let mut layer_rows: Vec<Vec<SqlValue>> = Vec::new();

    for feature in features {
        let FeatureGeom::Points(points) = &feature.geom else {
            continue;
        };
        let props = serde_json::to_string(&feature.properties)?;
        // Multi-point features expand to one row per point.
        for point in points {
            if !in_national_extent(point.x(), point.y()) {
                log::warn!(
                    "point ({}, {}) outside the national extent, rejected",
                    point.x(),
                    point.y()
                );
                continue;
            }
            let code = mesh_code(point.y(), point.x());
            let geom = point_to_geojson(point).to_string();
            generic_rows.push(vec![
                SqlValue::Integer(id),
                SqlValue::Text(def.layer_name.clone()),
                SqlValue::Text(code.clone()),
                SqlValue::Text(geom.clone()),
                SqlValue::Text(props.clone()),
            ]);
            layer_rows.push(vec![
                SqlValue::Integer(id),
                SqlValue::Text(code),
                SqlValue::Text(geom),
                SqlValue::Text(props.clone()),
            ]);
            id += 1;
        }
    }

    let written = generic_rows.len();
    batch_insert(
        conn,
        "point_features",
        &["id", "source_layer", "mesh_id", "geometry", "properties"],
        &generic_rows,
    )?;
    batch_insert(
        conn,
        &def.table_name,
        &["id", "mesh_id", "geometry", "properties"],
        &layer_rows,
    )?;
    Ok(LayerStats {
        features: written,
        pieces: 0,
    })
}

fn insert_line_rows(
    conn: &Connection,
    tiler: &GridTiler,
    def: &LayerDef,
    features: &[Feature],
) -> Result<LayerStats> {
    let mut id = next_feature_id(conn, "line_features")?;
    let mut feature_rows: Vec<Vec<SqlValue>> = Vec::new();
    let mut layer_rows: Vec<Vec<SqlValue>> = Vec::new();
    let mut map_rows: Vec<Vec<SqlValue>> = Vec::new();
    let mut layer_map_rows: Vec<Vec<SqlValue>> = Vec::new();

    for feature in features {
        let FeatureGeom::Lines(lines) = &feature.geom else {
            continue;
        };
        let pieces = match clip_lines(tiler, lines) {
            Clip::Pieces(pieces) if pieces.is_empty() => {
                log::debug!("line feature outside the national extent, skipped");
                continue;
            }
            Clip::Pieces(pieces) => Some(pieces),
            Clip::Degenerate => {
                log::debug!("degenerate line feature skipped");
                continue;
            }
            Clip::TooFine => {
                log::warn!(
                    "line feature exceeds the cell guard, stored without mesh decomposition"
                );
                None
            }
        };

        let rep = representative_mesh(lines.0.first().and_then(|ls| ls.0.first()));
        let props = serde_json::to_string(&feature.properties)?;
        let geom = multilinestring_to_geojson(lines).to_string();
        feature_rows.push(vec![
            SqlValue::Integer(id),
            SqlValue::Text(def.layer_name.clone()),
            SqlValue::from(rep.clone()),
            SqlValue::Text(geom.clone()),
            SqlValue::Text(props.clone()),
        ]);
        layer_rows.push(vec![
            SqlValue::Integer(id),
            SqlValue::from(rep),
            SqlValue::Text(geom),
            SqlValue::Text(props),
        ]);

        if let Some(pieces) = pieces {
            for piece in &pieces {
                let piece_geom = multilinestring_to_geojson(&piece.geom).to_string();
                map_rows.push(vec![
                    SqlValue::Text(def.layer_name.clone()),
                    SqlValue::Integer(id),
                    SqlValue::Text(piece.mesh_id.clone()),
                    SqlValue::Text(piece_geom.clone()),
                    SqlValue::Real(piece.length_m),
                    SqlValue::Real(piece.length_ratio),
                ]);
                layer_map_rows.push(vec![
                    SqlValue::Integer(id),
                    SqlValue::Text(piece.mesh_id.clone()),
                    SqlValue::Text(piece_geom),
                    SqlValue::Real(piece.length_m),
                    SqlValue::Real(piece.length_ratio),
                ]);
            }
        }
        id += 1;
    }

    let stats = LayerStats {
        features: feature_rows.len(),
        pieces: map_rows.len(),
    };
    batch_insert(
        conn,
        "line_features",
        &["id", "source_layer", "mesh_id", "geometry", "properties"],
        &feature_rows,
    )?;
    batch_insert(
        conn,
        &def.table_name,
        &["id", "mesh_id", "geometry", "properties"],
        &layer_rows,
    )?;
    batch_insert(
        conn,
        "line_mesh_map",
        &["source_layer", "feature_id", "mesh_id", "geometry", "length_m", "length_ratio"],
        &map_rows,
    )?;
    if let Some(map) = &def.mesh_map_table {
        batch_insert(
            conn,
            map,
            &["feature_id", "mesh_id", "geometry", "length_m", "length_ratio"],
            &layer_map_rows,
        )?;
    }
    Ok(stats)
}

fn insert_polygon_rows(
    conn: &Connection,
    tiler: &GridTiler,
    def: &LayerDef,
    features: &[Feature],
) -> Result<LayerStats> {
    let mut id = next_feature_id(conn, "polygon_features")?;
    let mut feature_rows: Vec<Vec<SqlValue>> = Vec::new();
    let mut layer_rows: Vec<Vec<SqlValue>> = Vec::new();
    let mut map_rows: Vec<Vec<SqlValue>> = Vec::new();
    let mut layer_map_rows: Vec<Vec<SqlValue>> = Vec::new();

    for feature in features {
        let FeatureGeom::Polygons(polygons) = &feature.geom else {
            continue;
        };
        let pieces = match clip_polygons(tiler, polygons) {
            Clip::Pieces(pieces) if pieces.is_empty() => {
                log::debug!("polygon feature outside the national extent, skipped");
                continue;
            }
            Clip::Pieces(pieces) => Some(pieces),
            Clip::Degenerate => {
                log::debug!("degenerate polygon feature skipped");
                continue;
            }
            Clip::TooFine => {
                log::warn!(
                    "polygon feature exceeds the cell guard, stored without mesh decomposition"
                );
                None
            }
        };

        let rep = representative_mesh(
            polygons
                .0
                .first()
                .map(|poly| poly.exterior())
                .and_then(|ring| ring.0.first()),
        );
        let props = serde_json::to_string(&feature.properties)?;
        let geom = multipolygon_to_geojson(polygons).to_string();
        feature_rows.push(vec![
            SqlValue::Integer(id),
            SqlValue::Text(def.layer_name.clone()),
            SqlValue::from(rep.clone()),
            SqlValue::Text(geom.clone()),
            SqlValue::Text(props.clone()),
        ]);
        layer_rows.push(vec![
            SqlValue::Integer(id),
            SqlValue::from(rep),
            SqlValue::Text(geom),
            SqlValue::Text(props),
        ]);

        if let Some(pieces) = pieces {
            for piece in &pieces {
                let piece_geom = multipolygon_to_geojson(&piece.geom).to_string();
                map_rows.push(vec![
                    SqlValue::Text(def.layer_name.clone()),
                    SqlValue::Integer(id),
                    SqlValue::Text(piece.mesh_id.clone()),
                    SqlValue::Text(piece_geom.clone()),
                    SqlValue::Real(piece.area_m2),
                    SqlValue::Real(piece.area_ratio),
                ]);
                layer_map_rows.push(vec![
                    SqlValue::Integer(id),
                    SqlValue::Text(piece.mesh_id.clone()),
                    SqlValue::Text(piece_geom),
                    SqlValue::Real(piece.area_m2),
                    SqlValue::Real(piece.area_ratio),
                ]);
            }
        }
        id += 1;
    }

    let stats = LayerStats {
        features: feature_rows.len(),
        pieces: map_rows.len(),
    };
    batch_insert(
        conn,
        "polygon_features",
        &["id", "source_layer", "mesh_id", "geometry", "properties"],
        &feature_rows,
    )?;
    batch_insert(
        conn,
        &def.table_name,
        &["id", "mesh_id", "geometry", "properties"],
        &layer_rows,
    )?;
    batch_insert(
        conn,
        "polygon_mesh_map",
        &["source_layer", "feature_id", "mesh_id", "geometry", "area_m2", "area_ratio"],
        &map_rows,
    )?;
    if let Some(map) = &def.mesh_map_table {
        batch_insert(
            conn,
            map,
            &["feature_id", "mesh_id", "geometry", "area_m2", "area_ratio"],
            &layer_map_rows,
        )?;
    }
    Ok(stats)
}

/// A store-level failure anywhere in the chain makes the whole run fail;
/// anything else is an input problem local to one file.
fn is_store_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<rusqlite::Error>().is_some())
}
