use std::path::PathBuf;

/// Mesh indexing CLI (argument schema only)
#[derive(clap::Parser, Debug)]
#[command(name = "meshdex", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Ingest a directory of GeoJSON files into the mesh index
    Ingest(IngestArgs),

    /// List registered layers
    Layers(LayersArgs),

    /// Look up mesh index entries by identifier
    Lookup(LookupArgs),

    /// Compute the mesh identifier for a coordinate
    Code(CodeArgs),

    /// Rebuild the presence index from the feature tables
    Reconcile(ReconcileArgs),
}

#[derive(clap::Args, Debug)]
pub struct IngestArgs {
    /// Directory of .geojson/.json input files
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub input: PathBuf,

    /// Index database, defaults to "./mesh.db"
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Maximum candidate cells per feature (unbounded when omitted)
    #[arg(long)]
    pub max_cells: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct LayersArgs {
    /// Index database, defaults to "./mesh.db"
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Emit the catalog as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct LookupArgs {
    /// Mesh identifiers (10 characters each)
    #[arg(required = true)]
    pub mesh_ids: Vec<String>,

    /// Index database, defaults to "./mesh.db"
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Also print this layer's feature payloads per mesh
    #[arg(long)]
    pub layer: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct CodeArgs {
    /// Latitude in degrees (WGS84)
    pub lat: f64,

    /// Longitude in degrees (WGS84)
    pub lon: f64,
}

#[derive(clap::Args, Debug)]
pub struct ReconcileArgs {
    /// Index database, defaults to "./mesh.db"
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,
}
