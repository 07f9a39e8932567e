use anyhow::Result;
use chainscript::cli::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    let verbosity = cli.verbosity();

    // Initialize logging with verbosity-aware level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| verbosity.to_log_level().to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Execute command with verbosity
    match cli.command {
        Commands::Check(args) => {
            chainscript::cli::commands::check(args, verbosity)?;
        }
        Commands::Run(args) => {
            chainscript::cli::commands::run(args, verbosity)?;
        }
        Commands::Query(args) => {
            chainscript::cli::commands::query(args, verbosity)?;
        }
    }

    Ok(())
}
