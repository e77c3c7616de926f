use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, display_error, display_notice};

/// A harness that's setting up our logging and environment variables and calls
/// into our "real" `run()`.
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .init();

    let cli = Cli::parse();

    match cli::run(cli).await {
        Ok(message) => {
            display_notice(&message);
            ExitCode::SUCCESS
        }
        Err(err) => {
            display_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}
