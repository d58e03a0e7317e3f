//! SQLite-backed mesh store.
//!
//! Holds the generic cross-layer feature tables, the per-layer dynamic
//! tables, the layer registry, and the mesh presence index. Table names for
//! dynamic layers are never taken from input directly; they are generated
//! and validated in `registry`.

mod index;
mod lookup;
mod registry;

pub use lookup::{LayerFeature, MeshIndexEntry};
pub use registry::LayerDef;

pub(crate) use index::{layer_mesh_ids, refresh_presence_flags, set_layer_presence};
pub(crate) use registry::{
    delete_registry_row, drop_layer_tables, ensure_safe_ident, find_layer, layers_for_source,
    list_layers, normalize_layer_name, provision_layer_tables, upsert_layer,
};

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, Transaction};

use crate::common::ensure_dir_exists;

/// Upper bound on rows per INSERT statement, keeping bound parameter counts
/// well under SQLite's limit.
pub(crate) const INSERT_BATCH_ROWS: usize = 500;

/// Handle to one mesh index database.
pub struct MeshStore {
    conn: Connection,
}

impl MeshStore {
    /// Open (or create) a mesh store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir_exists(dir)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory store")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Initialize the fixed part of the schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- One row per mesh cell ever touched by any layer; never deleted.
            CREATE TABLE IF NOT EXISTS mesh_index (
                mesh_id        TEXT PRIMARY KEY,
                has_points     INTEGER NOT NULL DEFAULT 0,
                has_lines      INTEGER NOT NULL DEFAULT 0,
                has_polygons   INTEGER NOT NULL DEFAULT 0,
                layer_presence TEXT NOT NULL DEFAULT '{}'
            );

            -- Catalog of ingested layers; the single source of truth for
            -- layer-name -> table mapping.
            CREATE TABLE IF NOT EXISTS layer_registry (
                layer_name     TEXT PRIMARY KEY,
                table_name     TEXT NOT NULL,
                geometry_kind  TEXT NOT NULL,
                mesh_map_table TEXT,
                source_file    TEXT NOT NULL
            );

            -- Generic cross-layer feature tables.
            CREATE TABLE IF NOT EXISTS point_features (
                id           INTEGER PRIMARY KEY,
                source_layer TEXT NOT NULL,
                mesh_id      TEXT NOT NULL,
                geometry     TEXT NOT NULL,
                properties   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS line_features (
                id           INTEGER PRIMARY KEY,
                source_layer TEXT NOT NULL,
                mesh_id      TEXT,
                geometry     TEXT NOT NULL,
                properties   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS polygon_features (
                id           INTEGER PRIMARY KEY,
                source_layer TEXT NOT NULL,
                mesh_id      TEXT,
                geometry     TEXT NOT NULL,
                properties   TEXT NOT NULL
            );

            -- Per-cell decomposition rows for line and polygon features.
            CREATE TABLE IF NOT EXISTS line_mesh_map (
                id           INTEGER PRIMARY KEY,
                source_layer TEXT NOT NULL,
                feature_id   INTEGER NOT NULL REFERENCES line_features(id) ON DELETE CASCADE,
                mesh_id      TEXT NOT NULL,
                geometry     TEXT NOT NULL,
                length_m     REAL NOT NULL,
                length_ratio REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS polygon_mesh_map (
                id           INTEGER PRIMARY KEY,
                source_layer TEXT NOT NULL,
                feature_id   INTEGER NOT NULL REFERENCES polygon_features(id) ON DELETE CASCADE,
                mesh_id      TEXT NOT NULL,
                geometry     TEXT NOT NULL,
                area_m2      REAL NOT NULL,
                area_ratio   REAL NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_point_features_mesh ON point_features(mesh_id);
            CREATE INDEX IF NOT EXISTS idx_point_features_layer ON point_features(source_layer);
            CREATE INDEX IF NOT EXISTS idx_line_features_layer ON line_features(source_layer);
            CREATE INDEX IF NOT EXISTS idx_polygon_features_layer ON polygon_features(source_layer);
            CREATE INDEX IF NOT EXISTS idx_line_mesh_map_mesh ON line_mesh_map(mesh_id);
            CREATE INDEX IF NOT EXISTS idx_line_mesh_map_layer ON line_mesh_map(source_layer);
            CREATE INDEX IF NOT EXISTS idx_line_mesh_map_feature ON line_mesh_map(feature_id);
            CREATE INDEX IF NOT EXISTS idx_polygon_mesh_map_mesh ON polygon_mesh_map(mesh_id);
            CREATE INDEX IF NOT EXISTS idx_polygon_mesh_map_layer ON polygon_mesh_map(source_layer);
            CREATE INDEX IF NOT EXISTS idx_polygon_mesh_map_feature ON polygon_mesh_map(feature_id);
            "#,
        )
        .context("Failed to initialize store schema")?;
        Ok(())
    }

    pub(crate) fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.conn
            .transaction()
            .context("Failed to begin transaction")
    }

    #[inline]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Fetch index entries for the given mesh identifiers; unknown
    /// identifiers are omitted.
    pub fn lookup_meshes(&self, mesh_ids: &[String]) -> Result<Vec<MeshIndexEntry>> {
        lookup::lookup_meshes(&self.conn, mesh_ids)
    }

    /// List all registered layers.
    pub fn layer_catalog(&self) -> Result<Vec<LayerDef>> {
        list_layers(&self.conn)
    }

    /// Fetch one layer's feature payloads within one mesh cell.
    pub fn layer_features(&self, layer_name: &str, mesh_id: &str) -> Result<Vec<LayerFeature>> {
        lookup::layer_features(&self.conn, layer_name, mesh_id)
    }

    /// Rebuild every presence flag and layer-presence map from the feature
    /// tables. Returns the number of index entries written. This is a
    /// maintenance backstop; normal ingestion keeps the index current
    /// incrementally.
    pub fn reconcile_presence(&mut self) -> Result<usize> {
        let tx = self.transaction()?;
        let count = index::reconcile_presence(&tx)?;
        tx.commit().context("Failed to commit reconciliation")?;
        Ok(count)
    }
}

/// Insert rows into `table` in bounded batches.
///
/// `rows` must all have one value per column. The table name must already be
/// validated; callers never pass input-derived identifiers here directly.
pub(crate) fn batch_insert(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    rows: &[Vec<SqlValue>],
) -> Result<usize> {
    ensure_safe_ident(table)?;
    let row_placeholder = format!("({})", vec!["?"; columns.len()].join(", "));

    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_BATCH_ROWS) {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            columns.join(", "),
            vec![row_placeholder.as_str(); chunk.len()].join(", ")
        );
        inserted += conn
            .execute(&sql, params_from_iter(chunk.iter().flatten()))
            .with_context(|| format!("Failed to insert rows into {table}"))?;
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_fixed_tables() {
        let store = MeshStore::open_in_memory().unwrap();
        let mut stmt = store
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for expected in [
            "layer_registry",
            "line_features",
            "line_mesh_map",
            "mesh_index",
            "point_features",
            "polygon_features",
            "polygon_mesh_map",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn open_creates_a_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.db");
        MeshStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn open_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mesh.db");
        MeshStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn batch_insert_splits_large_row_sets() {
        let store = MeshStore::open_in_memory().unwrap();
        let rows: Vec<Vec<SqlValue>> = (0..INSERT_BATCH_ROWS + 73)
            .map(|i| {
                vec![
                    SqlValue::Integer(i as i64 + 1),
                    SqlValue::Text("roads".into()),
                    SqlValue::Text(format!("53394611{:02}", i % 100)),
                    SqlValue::Text("{}".into()),
                    SqlValue::Text("{}".into()),
                ]
            })
            .collect();
        let inserted = batch_insert(
            store.conn(),
            "point_features",
            &["id", "source_layer", "mesh_id", "geometry", "properties"],
            &rows,
        )
        .unwrap();
        assert_eq!(inserted, INSERT_BATCH_ROWS + 73);

        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM point_features", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count as usize, INSERT_BATCH_ROWS + 73);
    }

    #[test]
    fn batch_insert_rejects_unsafe_table_names() {
        let store = MeshStore::open_in_memory().unwrap();
        let err = batch_insert(store.conn(), "points; DROP TABLE mesh_index", &["id"], &[]);
        assert!(err.is_err());
    }
}
