//! Lock command implementation
//!
//! Resolves the configuration and writes `<stem>.lock.<ext>` next to the
//! first configuration file, pinning every repository to the commit it
//! resolved to.

use anyhow::Result;
use clap::Args;

use layerpin::output::OutputConfig;

use super::RunArgs;

/// Arguments for the lock command
#[derive(Args, Debug)]
pub struct LockArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Execute the lock command
pub fn execute(args: LockArgs, output: &OutputConfig) -> Result<()> {
    let config = args.run.resolve(true)?;
    if config.repos().iter().all(|r| r.operations_disabled) {
        eprintln!("{}", output.warning("No versioned repositories to lock"));
    }
    let path = config.write_lock()?;
    println!(
        "{}",
        output.success(&format!("Lock file written to {}", path.display()))
    );
    Ok(())
}
