//! ingot - rubygems mirror CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use ingot_cli::cmd;
use ingot_cli::{Cli, Commands};
use ingot_core::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut filter = EnvFilter::from_default_env();
    if cli.verbose {
        filter = filter.add_directive(LevelFilter::DEBUG.into());
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.unwrap_or_else(Settings::default_path);

    match cli.command {
        Commands::Update { dry_run } => cmd::update::update(&config, dry_run).await,
        Commands::Plan => cmd::plan::plan(&config).await,
        Commands::Cleanup { apply } => cmd::cleanup::cleanup(&config, apply).await,
        Commands::Slot { name, constraint } => cmd::slot::slot(&config, &name, &constraint).await,
    }
}
