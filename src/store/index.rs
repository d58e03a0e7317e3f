use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::feature::GeomKind;

/// Create index rows for mesh ids seen for the first time. Existing rows are
/// left untouched; index rows are never deleted.
fn ensure_index_entries(conn: &Connection, mesh_ids: &AHashSet<String>) -> Result<()> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO mesh_index (mesh_id) VALUES (?1)")?;
    for id in mesh_ids {
        stmt.execute(params![id])
            .with_context(|| format!("Failed to create index entry for {id}"))?;
    }
    Ok(())
}

/// Add or remove one layer from the presence map of each given mesh id.
/// Re-applying with the same arguments is a no-op.
pub(crate) fn set_layer_presence(
    conn: &Connection,
    layer_name: &str,
    mesh_ids: &AHashSet<String>,
    present: bool,
) -> Result<()> {
    if mesh_ids.is_empty() {
        return Ok(());
    }
    ensure_index_entries(conn, mesh_ids)?;

    let mut read = conn.prepare("SELECT layer_presence FROM mesh_index WHERE mesh_id = ?1")?;
    let mut write = conn.prepare("UPDATE mesh_index SET layer_presence = ?2 WHERE mesh_id = ?1")?;
    for id in mesh_ids {
        let text: String = read
            .query_row(params![id], |row| row.get(0))
            .with_context(|| format!("Failed to read presence for {id}"))?;
        // Unparseable presence text is treated as empty and rebuilt.
        let mut map: BTreeMap<String, bool> = serde_json::from_str(&text).unwrap_or_default();
        let changed = if present {
            map.insert(layer_name.to_string(), true) != Some(true)
        } else {
            map.remove(layer_name).is_some()
        };
        if changed {
            write
                .execute(params![id, serde_json::to_string(&map)?])
                .with_context(|| format!("Failed to write presence for {id}"))?;
        }
    }
    Ok(())
}

/// Recompute the per-kind flags for exactly the given mesh ids from the
/// generic feature and mesh-map tables.
pub(crate) fn refresh_presence_flags(conn: &Connection, mesh_ids: &AHashSet<String>) -> Result<()> {
    if mesh_ids.is_empty() {
        return Ok(());
    }
    ensure_index_entries(conn, mesh_ids)?;

    let mut stmt = conn.prepare(
        "UPDATE mesh_index SET
             has_points   = EXISTS(SELECT 1 FROM point_features WHERE mesh_id = ?1),
             has_lines    = EXISTS(SELECT 1 FROM line_features WHERE mesh_id = ?1)
                         OR EXISTS(SELECT 1 FROM line_mesh_map WHERE mesh_id = ?1),
             has_polygons = EXISTS(SELECT 1 FROM polygon_features WHERE mesh_id = ?1)
                         OR EXISTS(SELECT 1 FROM polygon_mesh_map WHERE mesh_id = ?1)
         WHERE mesh_id = ?1",
    )?;
    for id in mesh_ids {
        stmt.execute(params![id])
            .with_context(|| format!("Failed to refresh flags for {id}"))?;
    }
    Ok(())
}

/// The set of mesh ids a layer currently touches, across its generic feature
/// rows and (for lines/polygons) its mesh-map rows.
pub(crate) fn layer_mesh_ids(
    conn: &Connection,
    layer_name: &str,
    kind: GeomKind,
) -> Result<AHashSet<String>> {
    let sql = match kind {
        GeomKind::Point => {
            "SELECT DISTINCT mesh_id FROM point_features WHERE source_layer = ?1"
        }
        GeomKind::Line => {
            "SELECT DISTINCT mesh_id FROM line_features
                 WHERE source_layer = ?1 AND mesh_id IS NOT NULL
             UNION
             SELECT DISTINCT mesh_id FROM line_mesh_map WHERE source_layer = ?1"
        }
        GeomKind::Polygon => {
            "SELECT DISTINCT mesh_id FROM polygon_features
                 WHERE source_layer = ?1 AND mesh_id IS NOT NULL
             UNION
             SELECT DISTINCT mesh_id FROM polygon_mesh_map WHERE source_layer = ?1"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params![layer_name], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<AHashSet<_>>>()
        .with_context(|| format!("Failed to collect mesh ids for layer {layer_name}"))?;
    Ok(ids)
}

/// Rebuild the whole presence index from the feature tables: every flag and
/// every layer-presence map, for every index row. Returns the number of rows
/// written.
pub(crate) fn reconcile_presence(conn: &Connection) -> Result<usize> {
    // 1) Entries for every referenced mesh id.
    let mut referenced = AHashSet::new();
    for sql in [
        "SELECT DISTINCT mesh_id FROM point_features",
        "SELECT DISTINCT mesh_id FROM line_features WHERE mesh_id IS NOT NULL",
        "SELECT DISTINCT mesh_id FROM line_mesh_map",
        "SELECT DISTINCT mesh_id FROM polygon_features WHERE mesh_id IS NOT NULL",
        "SELECT DISTINCT mesh_id FROM polygon_mesh_map",
    ] {
        let mut stmt = conn.prepare(sql)?;
        for id in stmt.query_map([], |row| row.get::<_, String>(0))? {
            referenced.insert(id?);
        }
    }
    ensure_index_entries(conn, &referenced)?;

    // 2) Per-kind flags, set-based over the whole index.
    conn.execute(
        "UPDATE mesh_index SET
             has_points   = EXISTS(SELECT 1 FROM point_features p
                                   WHERE p.mesh_id = mesh_index.mesh_id),
             has_lines    = EXISTS(SELECT 1 FROM line_features l
                                   WHERE l.mesh_id = mesh_index.mesh_id)
                         OR EXISTS(SELECT 1 FROM line_mesh_map lm
                                   WHERE lm.mesh_id = mesh_index.mesh_id),
             has_polygons = EXISTS(SELECT 1 FROM polygon_features g
                                   WHERE g.mesh_id = mesh_index.mesh_id)
                         OR EXISTS(SELECT 1 FROM polygon_mesh_map gm
                                   WHERE gm.mesh_id = mesh_index.mesh_id)",
        [],
    )
    .context("Failed to rebuild presence flags")?;

    // 3) Layer presence maps, rebuilt from scratch.
    let mut presence: AHashMap<String, BTreeMap<String, bool>> = AHashMap::new();
    for sql in [
        "SELECT DISTINCT mesh_id, source_layer FROM point_features",
        "SELECT DISTINCT mesh_id, source_layer FROM line_features WHERE mesh_id IS NOT NULL",
        "SELECT DISTINCT mesh_id, source_layer FROM line_mesh_map",
        "SELECT DISTINCT mesh_id, source_layer FROM polygon_features WHERE mesh_id IS NOT NULL",
        "SELECT DISTINCT mesh_id, source_layer FROM polygon_mesh_map",
    ] {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (mesh_id, layer) = row?;
            presence.entry(mesh_id).or_default().insert(layer, true);
        }
    }

    let all_ids: Vec<String> = conn
        .prepare("SELECT mesh_id FROM mesh_index")?
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let mut write = conn.prepare("UPDATE mesh_index SET layer_presence = ?2 WHERE mesh_id = ?1")?;
    for id in &all_ids {
        let text = match presence.get(id) {
            Some(map) => serde_json::to_string(map)?,
            None => "{}".to_string(),
        };
        write.execute(params![id, text])?;
    }
    Ok(all_ids.len())
}
