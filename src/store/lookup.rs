use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use super::registry::{ensure_safe_ident, find_layer};

/// One mesh index row as exposed to the query layer.
#[derive(Debug, Clone, Serialize)]
pub struct MeshIndexEntry {
    pub mesh_id: String,
    pub has_points: bool,
    pub has_lines: bool,
    pub has_polygons: bool,
    pub layer_presence: BTreeMap<String, bool>,
}

/// One feature payload from a layer's dynamic table.
#[derive(Debug, Clone, Serialize)]
pub struct LayerFeature {
    pub id: i64,
    pub mesh_id: Option<String>,
    pub geometry: Value,
    pub properties: Value,
}

pub(crate) fn lookup_meshes(conn: &Connection, mesh_ids: &[String]) -> Result<Vec<MeshIndexEntry>> {
    let mut stmt = conn.prepare(
        "SELECT mesh_id, has_points, has_lines, has_polygons, layer_presence
         FROM mesh_index WHERE mesh_id = ?1",
    )?;

    let mut entries = Vec::new();
    for id in mesh_ids {
        let row = stmt
            .query_row(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .optional()
            .with_context(|| format!("Failed to look up mesh {id}"))?;
        if let Some((mesh_id, has_points, has_lines, has_polygons, presence)) = row {
            entries.push(MeshIndexEntry {
                mesh_id,
                has_points,
                has_lines,
                has_polygons,
                layer_presence: serde_json::from_str(&presence).unwrap_or_default(),
            });
        }
    }
    Ok(entries)
}

/// Fetch one layer's features inside one mesh cell. Point layers match on
/// the feature row directly; line/polygon layers match through their
/// mesh-decomposition table so partial overlaps count.
pub(crate) fn layer_features(
    conn: &Connection,
    layer_name: &str,
    mesh_id: &str,
) -> Result<Vec<LayerFeature>> {
    let def =
        find_layer(conn, layer_name)?.ok_or_else(|| anyhow!("Unknown layer {layer_name:?}"))?;
    ensure_safe_ident(&def.table_name)?;

    let sql = match &def.mesh_map_table {
        None => format!(
            "SELECT id, mesh_id, geometry, properties FROM {} WHERE mesh_id = ?1 ORDER BY id",
            def.table_name
        ),
        Some(map) => {
            ensure_safe_ident(map)?;
            format!(
                "SELECT id, mesh_id, geometry, properties FROM {t}
                 WHERE id IN (SELECT feature_id FROM {m} WHERE mesh_id = ?1)
                 ORDER BY id",
                t = def.table_name,
                m = map
            )
        }
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![mesh_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut features = Vec::new();
    for row in rows {
        let (id, mesh, geometry, properties) = row?;
        features.push(LayerFeature {
            id,
            mesh_id: mesh,
            geometry: serde_json::from_str(&geometry)
                .with_context(|| format!("Corrupt geometry for feature {id} in {layer_name}"))?,
            properties: serde_json::from_str(&properties)
                .with_context(|| format!("Corrupt properties for feature {id} in {layer_name}"))?,
        });
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::GeomKind;
    use crate::store::registry::{provision_layer_tables, upsert_layer, LayerDef};
    use crate::store::MeshStore;

    #[test]
    fn lookup_returns_only_known_ids() {
        let store = MeshStore::open_in_memory().unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO mesh_index (mesh_id, has_points, layer_presence)
                 VALUES ('5339461132', 1, '{\"stations\":true}')",
                [],
            )
            .unwrap();

        let entries = store
            .lookup_meshes(&["5339461132".to_string(), "0000000000".to_string()])
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mesh_id, "5339461132");
        assert!(entries[0].has_points);
        assert!(!entries[0].has_lines);
        assert_eq!(entries[0].layer_presence.get("stations"), Some(&true));
    }

    #[test]
    fn point_layer_features_match_on_their_own_mesh_id() {
        let store = MeshStore::open_in_memory().unwrap();
        let def = LayerDef::new("stations", GeomKind::Point, "stations.geojson");
        provision_layer_tables(store.conn(), &def, None).unwrap();
        upsert_layer(store.conn(), &def).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO layer_stations (id, mesh_id, geometry, properties)
                 VALUES (1, '5339461132',
                         '{\"type\":\"Point\",\"coordinates\":[139.767,35.681]}',
                         '{\"name\":\"tokyo\"}')",
                [],
            )
            .unwrap();

        let features = store.layer_features("stations", "5339461132").unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].properties["name"], "tokyo");
        assert!(store.layer_features("stations", "5339461199").unwrap().is_empty());
    }

    #[test]
    fn line_layer_features_match_through_the_mesh_map() {
        let store = MeshStore::open_in_memory().unwrap();
        let def = LayerDef::new("roads", GeomKind::Line, "roads.geojson");
        provision_layer_tables(store.conn(), &def, None).unwrap();
        upsert_layer(store.conn(), &def).unwrap();
        store
            .conn()
            .execute_batch(
                "INSERT INTO layer_roads (id, mesh_id, geometry, properties)
                     VALUES (7, '5339461132', '{\"type\":\"MultiLineString\",\"coordinates\":[]}', '{}');
                 INSERT INTO layer_roads_mesh
                     (id, feature_id, mesh_id, geometry, length_m, length_ratio)
                     VALUES (1, 7, '5339461134', '{\"type\":\"MultiLineString\",\"coordinates\":[]}', 42.0, 0.4);",
            )
            .unwrap();

        // The feature's own representative cell differs from the piece's
        // cell; the piece is what makes it discoverable there.
        let features = store.layer_features("roads", "5339461134").unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id, 7);
    }

    #[test]
    fn unknown_layer_is_an_error() {
        let store = MeshStore::open_in_memory().unwrap();
        assert!(store.layer_features("nope", "5339461132").is_err());
    }
}
