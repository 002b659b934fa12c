//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use layerpin::output::OutputConfig;

/// layerpin - resolve layered build configurations and pin their repositories
#[derive(Parser, Debug)]
#[command(name = "layerpin")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve the configuration, check out every repository and apply patches
    Checkout(commands::checkout::CheckoutArgs),

    /// Print the merged configuration
    Dump(commands::dump::DumpArgs),

    /// Pin every repository to its resolved commit in a lock file
    Lock(commands::lock::LockArgs),

    /// Print resolved repository paths, commits and layers as JSON
    Repos(commands::repos::ReposArgs),
}

impl Cli {
    pub fn output(&self) -> OutputConfig {
        OutputConfig::from_env_and_flag(&self.color)
    }

    /// Route `log` records to stderr at the requested level.
    pub fn init_logging(&self) {
        env_logger::Builder::new()
            .parse_filters(&self.log_level)
            .format_timestamp(None)
            .format_target(false)
            .init();
    }

    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        let output = self.output();
        match self.command {
            Commands::Checkout(args) => commands::checkout::execute(args, &output),
            Commands::Dump(args) => commands::dump::execute(args),
            Commands::Lock(args) => commands::lock::execute(args, &output),
            Commands::Repos(args) => commands::repos::execute(args),
        }
    }
}
