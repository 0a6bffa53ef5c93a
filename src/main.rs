use clap::Parser;

use jobstore::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // `start` sets up its own stderr + file logging
    if cli.verbose && !matches!(cli.command, Some(Commands::Start { .. })) {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    }

    if let Err(e) = cli::dispatch(&cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
