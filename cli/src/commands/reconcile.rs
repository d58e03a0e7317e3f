use anyhow::Result;
use meshdex::MeshStore;

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::ReconcileArgs) -> Result<()> {
    let db_path = &args.db.clone().unwrap_or("./mesh.db".into());

    println!("[reconcile] opening index at {}", db_path.display());
    let mut store = MeshStore::open(db_path)?;

    let rewritten = store.reconcile_presence()?;
    println!("[reconcile] rebuilt {} index entries", rewritten);

    Ok(())
}
