mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use relunet_sql::error::Result;

fn main() -> Result<()> {
    init_logging();
    cli::run(cli::Cli::parse())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,relunet_sql=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
