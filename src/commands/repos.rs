//! Repos command implementation

use anyhow::Result;
use clap::Args;

use super::RunArgs;

/// Arguments for the repos command
#[derive(Args, Debug)]
pub struct ReposArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Print `{id: {path, commit, layers}}` in declaration order.
pub fn execute(args: ReposArgs) -> Result<()> {
    let config = args.run.resolve(false)?;
    println!("{}", serde_json::to_string_pretty(&config.repos_view())?);
    Ok(())
}
