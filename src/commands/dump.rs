//! Dump command implementation
//!
//! Prints the merged configuration in the input document shape. Patches are
//! never applied for a dump.

use anyhow::Result;
use clap::Args;

use layerpin::config::{render, DocumentFormat};

use super::RunArgs;

/// Arguments for the dump command
#[derive(Args, Debug)]
pub struct DumpArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Output format (yaml or json)
    #[arg(long, value_name = "FORMAT", default_value = "yaml")]
    pub format: DocumentFormat,

    /// Replace branches and tags by the commits they resolved to
    #[arg(long)]
    pub resolve_refs: bool,
}

/// Execute the dump command
pub fn execute(args: DumpArgs) -> Result<()> {
    let config = args.run.resolve(true)?;
    let doc = config.dump(args.resolve_refs);
    print!("{}", render(&doc, args.format)?);
    Ok(())
}
