use anyhow::{bail, Result};
use meshdex::{FileStatus, IngestOptions, MeshStore, ingest_dir};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::IngestArgs) -> Result<()> {
    let db_path = &args.db.clone().unwrap_or("./mesh.db".into());
    let options = IngestOptions { max_cells_per_feature: args.max_cells };

    println!("[ingest] opening index at {}", db_path.display());
    let mut store = MeshStore::open(db_path)?;

    println!("[ingest] scanning {}", args.input.display());
    let report = ingest_dir(&mut store, &args.input, &options)?;

    for outcome in &report.files {
        let status = match outcome.status {
            FileStatus::Ingested => "ingested",
            FileStatus::Skipped => "skipped",
            FileStatus::Failed => "failed",
        };
        println!("[ingest] {}: {}", outcome.file, status);
    }

    println!(
        "[ingest] {} layers, {} features, {} mesh pieces from {} files ({} skipped)",
        report.layers_written,
        report.features_written,
        report.pieces_written,
        report.ingested(),
        report.skipped(),
    );

    if !report.ok() {
        bail!("{} file(s) failed with store errors", report.failed());
    }

    Ok(())
}
