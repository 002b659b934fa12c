//! Checkout command implementation
//!
//! Resolves the configuration, brings every repository to its pinned
//! revision and applies patches.

use anyhow::Result;
use clap::Args;
use std::time::Instant;

use layerpin::output::{checkout_summary, OutputConfig};

use super::RunArgs;

/// Arguments for the checkout command
#[derive(Args, Debug)]
pub struct CheckoutArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Suppress the per-repository summary
    #[arg(short, long)]
    pub quiet: bool,
}

/// Execute the checkout command
pub fn execute(args: CheckoutArgs, output: &OutputConfig) -> Result<()> {
    let start_time = Instant::now();
    let config = args.run.resolve(false)?;

    if !args.quiet {
        for line in checkout_summary(output, &config) {
            println!("{}", line);
        }
        println!(
            "{}",
            output.success(&format!(
                "{} repositories ready in {:.1}s",
                config.repos().len(),
                start_time.elapsed().as_secs_f64()
            ))
        );
    }
    Ok(())
}
