mod categorizer;
mod cli;
mod error;
mod fmt;
mod importer;
mod models;
mod reports;
mod reviewer;
mod rules;
mod runner;
mod settings;
mod taxonomy;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Classify {
            config,
            input,
            output_dir,
        } => cli::classify::run(&config, input.as_deref(), output_dir.as_deref()),
        Commands::Validate { config } => cli::validate::run(&config),
        Commands::Rules { config } => cli::rules::run(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
