
mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{code, ingest, layers, lookup, reconcile};

pub fn run() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match &cli.command {
        Commands::Ingest(args) => ingest::run(&cli, args),
        Commands::Layers(args) => layers::run(&cli, args),
        Commands::Lookup(args) => lookup::run(&cli, args),
        Commands::Code(args) => code::run(&cli, args),
        Commands::Reconcile(args) => reconcile::run(&cli, args),
    }
}

fn main() -> anyhow::Result<()> { run() }
