use clap::Parser;

mod cli;

use cli::commands::{init, walk, watch};
use cli::{Cli, Commands};
use dirwatch::Settings;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            eprintln!("Using default configuration for now.");
            Settings::default()
        }),
    };

    dirwatch::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => init::run_init(force),
        Commands::Config => init::run_config(&settings),
        Commands::Watch {
            path,
            no_recursive,
            ignore,
        } => watch::run_watch(&settings, path, no_recursive, ignore).await,
        Commands::Walk {
            path,
            types,
            ignore,
        } => walk::run_walk(&path, &types, &ignore),
    }
}
