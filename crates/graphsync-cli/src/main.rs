//! `graphsync` binary: load a schema, apply one payload to an in-memory
//! store, print the JSON report.

mod cli;

use clap::Parser;
use cli::{Cli, run};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = match run(&cli) {
        Ok(output) => output,
        Err(err) => {
            error!(error = %err, "graphsync failed");
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&output) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: failed to render report: {err}");
            ExitCode::FAILURE
        }
    }
}

// RUST_LOG wins over --verbose; logs go to stderr so stdout stays JSON.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
