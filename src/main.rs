//! # layerpin CLI
//!
//! Binary entry point for the `layerpin` command-line tool.
//!
//! It parses arguments with `clap`, sets up logging, runs the selected
//! command and turns a failure into a single readable error message and a
//! non-zero exit code. All resolution logic lives in the library crate.

mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    cli.init_logging();
    let output = cli.output();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", output.failure(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}
