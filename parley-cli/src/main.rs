use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::ConfigLoader;

#[derive(Parser)]
#[command(name = "parley", about = "Relay text messages through a single linked messaging session")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the messaging session and serve the HTTP API
    Serve(commands::serve::ServeArgs),
    /// Forget stored session credentials
    Logout(commands::logout::LogoutArgs),
    /// Inspect configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = ConfigLoader::load()?;
            init_logging(cli.verbose, config.log_level.as_filter());
            commands::serve::run(args, config).await
        }
        Commands::Logout(args) => {
            init_logging(cli.verbose, "info");
            commands::logout::run(args).await
        }
        Commands::Config(args) => {
            init_logging(cli.verbose, "warn");
            commands::config::run(args)
        }
    }
}

/// `RUST_LOG` wins over the configured level; `--verbose` wins over both.
fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
