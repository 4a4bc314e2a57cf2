//! Halyard CLI — asynchronous module loader.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "halyard",
    version,
    about = "Asynchronous module loader — deterministic identifier resolution, deduplicated fetching, cycle-safe compilation"
)]
struct Cli {
    #[command(subcommand)]
    command: halyard::cli::Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = halyard::cli::dispatch(cli.command).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
