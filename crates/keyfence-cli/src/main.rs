//! keyfence CLI entry point
//!
//! Exit codes: 0 valid, 1 token rejected, 2 keys unavailable or bad configuration.

mod cli;

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let code = match cli.execute().await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            2
        }
    };
    std::process::exit(code);
}
