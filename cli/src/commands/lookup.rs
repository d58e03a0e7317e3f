use anyhow::Result;
use meshdex::MeshStore;

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::LookupArgs) -> Result<()> {
    let db_path = &args.db.clone().unwrap_or("./mesh.db".into());

    let store = MeshStore::open(db_path)?;
    let entries = store.lookup_meshes(&args.mesh_ids)?;

    if entries.is_empty() {
        println!("[lookup] no index entries for the given identifiers");
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&entries)?);

    if let Some(layer) = &args.layer {
        for entry in &entries {
            let features = store.layer_features(layer, &entry.mesh_id)?;
            println!("[lookup] {} has {} feature(s) in layer {}", entry.mesh_id, features.len(), layer);
            println!("{}", serde_json::to_string_pretty(&features)?);
        }
    }

    Ok(())
}
