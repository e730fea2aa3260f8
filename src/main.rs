//! gainstage CLI
//!
//! Command-line front end for the gain-staging engine.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gainstage::cli::{commands, Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("gainstage v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Process {
            input,
            output,
            units,
            config,
            input_trim_db,
            output_trim_db,
            bit_depth,
        } => commands::process_audio(
            &input,
            &output,
            &units,
            config.as_deref(),
            input_trim_db,
            output_trim_db,
            bit_depth,
        )
        .with_context(|| format!("failed to process {}", input.display())),
        Commands::Curve { knee, points } => {
            commands::print_curve(knee, points).context("failed to print curve")
        }
        Commands::Policy => commands::print_policy().context("failed to print policy"),
    }
}
