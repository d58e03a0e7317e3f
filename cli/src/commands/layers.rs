use anyhow::Result;
use meshdex::MeshStore;

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::LayersArgs) -> Result<()> {
    let db_path = &args.db.clone().unwrap_or("./mesh.db".into());

    let store = MeshStore::open(db_path)?;
    let layers = store.layer_catalog()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&layers)?);
        return Ok(());
    }

    if layers.is_empty() {
        println!("[layers] no layers registered");
        return Ok(());
    }

    for layer in &layers {
        println!(
            "[layers] {} ({}) from {} -> {}",
            layer.layer_name,
            layer.kind.to_str(),
            layer.source_file,
            layer.table_name,
        );
    }

    Ok(())
}
