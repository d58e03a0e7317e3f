use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::feature::GeomKind;

/// One registered layer: the unit of replacement and removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerDef {
    pub layer_name: String,
    pub table_name: String,
    pub kind: GeomKind,
    pub mesh_map_table: Option<String>,
    pub source_file: String,
}

impl LayerDef {
    /// Build the definition for a named layer, deriving its table names.
    pub(crate) fn new(layer_name: &str, kind: GeomKind, source_file: &str) -> Self {
        let table_name = format!("layer_{layer_name}");
        let mesh_map_table = match kind {
            GeomKind::Point => None,
            GeomKind::Line | GeomKind::Polygon => Some(format!("layer_{layer_name}_mesh")),
        };
        Self {
            layer_name: layer_name.to_string(),
            table_name,
            kind,
            mesh_map_table,
            source_file: source_file.to_string(),
        }
    }
}

/// Normalize a file stem into an identifier-safe layer name: lowercase,
/// non-alphanumeric runs collapsed to underscores.
pub(crate) fn normalize_layer_name(stem: &str) -> String {
    let re = Regex::new(r"[^a-z0-9]+").unwrap();
    let lowered = stem.to_lowercase();
    let cleaned = re.replace_all(&lowered, "_");
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Reject any identifier that is not a plain lowercase SQL name. Applied to
/// every table name before it is spliced into DDL or DML.
pub(crate) fn ensure_safe_ident(name: &str) -> Result<()> {
    let re = Regex::new(r"^[a-z][a-z0-9_]*$").unwrap();
    if !re.is_match(name) {
        bail!("Unsafe table identifier: {name:?}");
    }
    Ok(())
}

/// Measure column names for a layer's mesh-decomposition table.
pub(crate) fn measure_columns(kind: GeomKind) -> (&'static str, &'static str) {
    match kind {
        GeomKind::Polygon => ("area_m2", "area_ratio"),
        _ => ("length_m", "length_ratio"),
    }
}

/// Create a layer's dynamic table(s) if absent. When the layer's geometry
/// kind changed since its previous registration, the old mesh-decomposition
/// table is dropped first so its column set cannot go stale.
pub(crate) fn provision_layer_tables(
    conn: &Connection,
    def: &LayerDef,
    previous: Option<&LayerDef>,
) -> Result<()> {
    ensure_safe_ident(&def.table_name)?;
    if let Some(prev) = previous {
        if prev.kind != def.kind {
            if let Some(old_map) = &prev.mesh_map_table {
                ensure_safe_ident(old_map)?;
                conn.execute_batch(&format!("DROP TABLE IF EXISTS {old_map};"))
                    .with_context(|| format!("Failed to drop stale mesh map {old_map}"))?;
            }
        }
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {t} (
            id         INTEGER PRIMARY KEY,
            mesh_id    TEXT,
            geometry   TEXT NOT NULL,
            properties TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{t}_mesh ON {t}(mesh_id);",
        t = def.table_name
    ))
    .with_context(|| format!("Failed to create layer table {}", def.table_name))?;

    if let Some(map) = &def.mesh_map_table {
        ensure_safe_ident(map)?;
        let (measure, ratio) = measure_columns(def.kind);
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {m} (
                id         INTEGER PRIMARY KEY,
                feature_id INTEGER NOT NULL REFERENCES {t}(id) ON DELETE CASCADE,
                mesh_id    TEXT NOT NULL,
                geometry   TEXT NOT NULL,
                {measure}  REAL NOT NULL,
                {ratio}    REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{m}_mesh ON {m}(mesh_id);",
            m = map,
            t = def.table_name
        ))
        .with_context(|| format!("Failed to create mesh map table {map}"))?;
    }
    Ok(())
}

/// Drop a layer's dynamic table(s).
pub(crate) fn drop_layer_tables(conn: &Connection, def: &LayerDef) -> Result<()> {
    if let Some(map) = &def.mesh_map_table {
        ensure_safe_ident(map)?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {map};"))
            .with_context(|| format!("Failed to drop {map}"))?;
    }
    ensure_safe_ident(&def.table_name)?;
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", def.table_name))
        .with_context(|| format!("Failed to drop {}", def.table_name))?;
    Ok(())
}

/// Insert or update one registry row.
pub(crate) fn upsert_layer(conn: &Connection, def: &LayerDef) -> Result<()> {
    conn.execute(
        "INSERT INTO layer_registry (layer_name, table_name, geometry_kind, mesh_map_table, source_file)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(layer_name) DO UPDATE SET
             table_name = excluded.table_name,
             geometry_kind = excluded.geometry_kind,
             mesh_map_table = excluded.mesh_map_table,
             source_file = excluded.source_file",
        params![
            def.layer_name,
            def.table_name,
            def.kind.to_str(),
            def.mesh_map_table,
            def.source_file,
        ],
    )
    .with_context(|| format!("Failed to register layer {}", def.layer_name))?;
    Ok(())
}

pub(crate) fn delete_registry_row(conn: &Connection, layer_name: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM layer_registry WHERE layer_name = ?1",
        params![layer_name],
    )
    .with_context(|| format!("Failed to delete registry row for {layer_name}"))?;
    Ok(())
}

fn row_to_layer(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, Option<String>, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn into_layer_def(
    (layer_name, table_name, kind, mesh_map_table, source_file): (
        String,
        String,
        String,
        Option<String>,
        String,
    ),
) -> Result<LayerDef> {
    let kind = GeomKind::parse(&kind)
        .ok_or_else(|| anyhow!("Unknown geometry kind {kind:?} in registry"))?;
    Ok(LayerDef {
        layer_name,
        table_name,
        kind,
        mesh_map_table,
        source_file,
    })
}

/// All layers registered for one source file.
pub(crate) fn layers_for_source(conn: &Connection, source_file: &str) -> Result<Vec<LayerDef>> {
    let mut stmt = conn.prepare(
        "SELECT layer_name, table_name, geometry_kind, mesh_map_table, source_file
         FROM layer_registry WHERE source_file = ?1 ORDER BY layer_name",
    )?;
    let rows = stmt
        .query_map(params![source_file], row_to_layer)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read layer registry")?;
    rows.into_iter().map(into_layer_def).collect()
}

pub(crate) fn find_layer(conn: &Connection, layer_name: &str) -> Result<Option<LayerDef>> {
    let row = conn
        .query_row(
            "SELECT layer_name, table_name, geometry_kind, mesh_map_table, source_file
             FROM layer_registry WHERE layer_name = ?1",
            params![layer_name],
            row_to_layer,
        )
        .optional()
        .context("Failed to read layer registry")?;
    row.map(into_layer_def).transpose()
}

pub(crate) fn list_layers(conn: &Connection) -> Result<Vec<LayerDef>> {
    let mut stmt = conn.prepare(
        "SELECT layer_name, table_name, geometry_kind, mesh_map_table, source_file
         FROM layer_registry ORDER BY layer_name",
    )?;
    let rows = stmt
        .query_map([], row_to_layer)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read layer registry")?;
    rows.into_iter().map(into_layer_def).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MeshStore;

    #[test]
    fn normalizes_file_stems_into_layer_names() {
        assert_eq!(normalize_layer_name("Road Network (2024)"), "road_network_2024");
        assert_eq!(normalize_layer_name("rivers"), "rivers");
        assert_eq!(normalize_layer_name("東京-roads"), "roads");
        assert_eq!(normalize_layer_name("---"), "unnamed");
    }

    #[test]
    fn rejects_hostile_identifiers() {
        assert!(ensure_safe_ident("layer_roads").is_ok());
        assert!(ensure_safe_ident("layer_roads_mesh").is_ok());
        assert!(ensure_safe_ident("roads; DROP TABLE mesh_index").is_err());
        assert!(ensure_safe_ident("Roads").is_err());
        assert!(ensure_safe_ident("").is_err());
        assert!(ensure_safe_ident("1roads").is_err());
    }

    #[test]
    fn layer_def_derives_table_names_per_kind() {
        let point = LayerDef::new("stations", GeomKind::Point, "stations.geojson");
        assert_eq!(point.table_name, "layer_stations");
        assert_eq!(point.mesh_map_table, None);

        let line = LayerDef::new("roads", GeomKind::Line, "roads.geojson");
        assert_eq!(line.mesh_map_table.as_deref(), Some("layer_roads_mesh"));
    }

    #[test]
    fn upsert_replaces_an_existing_registration() {
        let store = MeshStore::open_in_memory().unwrap();
        let first = LayerDef::new("roads", GeomKind::Line, "roads.geojson");
        upsert_layer(store.conn(), &first).unwrap();

        let changed = LayerDef::new("roads", GeomKind::Polygon, "roads.geojson");
        upsert_layer(store.conn(), &changed).unwrap();

        let layers = list_layers(store.conn()).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].kind, GeomKind::Polygon);

        delete_registry_row(store.conn(), "roads").unwrap();
        assert!(find_layer(store.conn(), "roads").unwrap().is_none());
    }

    #[test]
    fn provision_creates_and_kind_change_replaces_the_mesh_map() {
        let store = MeshStore::open_in_memory().unwrap();
        let line = LayerDef::new("roads", GeomKind::Line, "roads.geojson");
        provision_layer_tables(store.conn(), &line, None).unwrap();

        let has_col = |table: &str, col: &str| -> bool {
            let mut stmt = store
                .conn()
                .prepare(&format!("PRAGMA table_info({table})"))
                .unwrap();
            let cols: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(1))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            cols.iter().any(|c| c == col)
        };
        assert!(has_col("layer_roads_mesh", "length_m"));

        // Same layer re-registered as polygons: the map table is rebuilt
        // with area columns.
        let poly = LayerDef::new("roads", GeomKind::Polygon, "roads.geojson");
        provision_layer_tables(store.conn(), &poly, Some(&line)).unwrap();
        assert!(has_col("layer_roads_mesh", "area_m2"));
        assert!(!has_col("layer_roads_mesh", "length_m"));

        drop_layer_tables(store.conn(), &poly).unwrap();
        let count: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE 'layer_roads%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
