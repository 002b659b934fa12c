//! # CLI Command Implementations
//!
//! Each subcommand of the `layerpin` tool lives in its own module with an
//! `Args` struct (derived with `clap`) and an `execute` function that calls
//! into the `layerpin` library.
//!
//! Every command resolves the same way, so the shared options live here in
//! [`RunArgs`], which each command flattens into its own arguments.

pub mod checkout;
pub mod dump;
pub mod lock;
pub mod repos;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::Args;

use layerpin::config::MergedConfig;
use layerpin::context::{Context, EnvOverrides, InterruptFlag};
use layerpin::document::BasicValidator;
use layerpin::phases;
use layerpin::vcs::command::CommandRunner;
use layerpin::vcs::VcsSet;

/// Options shared by every command that resolves a configuration.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Configuration files, in merge order. `a.yml:b.yml` is the same as
    /// passing both separately.
    #[arg(value_name = "FILE", required = true, num_args = 1..)]
    pub files: Vec<String>,

    /// Directory repositories are checked out into (defaults to the current
    /// directory)
    #[arg(long, value_name = "DIR", env = "LAYERPIN_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Directory of shared object caches repositories are cloned from
    #[arg(long, value_name = "DIR", env = "LAYERPIN_REPO_REF_DIR")]
    pub ref_dir: Option<PathBuf>,

    /// Discard local modifications when switching revisions
    #[arg(long)]
    pub force_checkout: bool,

    /// Fetch branches and tags that are not pinned to a commit
    #[arg(long)]
    pub update: bool,

    /// Shallow clone depth (0 for full clones)
    #[arg(long, value_name = "N", env = "LAYERPIN_CLONE_DEPTH")]
    pub depth: Option<u32>,

    /// Number of repositories processed in parallel
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Do not apply repository patches
    #[arg(long)]
    pub skip_patches: bool,

    /// Machine, overriding the configuration
    #[arg(long, value_name = "MACHINE", env = "LAYERPIN_MACHINE")]
    pub machine: Option<String>,

    /// Distro, overriding the configuration
    #[arg(long, value_name = "DISTRO", env = "LAYERPIN_DISTRO")]
    pub distro: Option<String>,

    /// Build targets, overriding the configuration (space separated)
    #[arg(long, value_name = "TARGETS", env = "LAYERPIN_TARGET")]
    pub target: Option<String>,

    /// Build task, overriding the configuration
    #[arg(long, value_name = "TASK", env = "LAYERPIN_TASK")]
    pub task: Option<String>,

    /// URL rewrite rules, one `<regex> <replacement>` pair per line
    #[arg(long, value_name = "RULES", env = "LAYERPIN_PREMIRRORS", hide = true)]
    pub premirrors: Option<String>,
}

impl RunArgs {
    /// Configuration files with colon-separated arguments split up.
    pub fn config_files(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .flat_map(|arg| arg.split(':'))
            .filter(|part| !part.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    pub fn context(&self, skip_patches: bool) -> Result<Context> {
        let work_dir = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("cannot determine current directory")?,
        };
        let mut builder = Context::builder(work_dir)
            .repo_ref_dir(self.ref_dir.clone())
            .force_checkout(self.force_checkout)
            .update(self.update)
            .clone_depth(self.depth)
            .skip_patches(skip_patches || self.skip_patches)
            .env_overrides(EnvOverrides {
                machine: self.machine.clone(),
                distro: self.distro.clone(),
                targets: self
                    .target
                    .as_ref()
                    .map(|t| t.split_whitespace().map(str::to_string).collect()),
                task: self.task.clone(),
            })
            .interrupt(InterruptFlag::new());
        if let Some(jobs) = self.jobs {
            builder = builder.jobs(jobs);
        }
        if let Some(rules) = &self.premirrors {
            builder = builder.mirrors_from_str(rules);
        }
        Ok(builder.build()?)
    }

    /// Run a complete resolution.
    pub fn resolve(&self, skip_patches: bool) -> Result<MergedConfig> {
        let files = self.config_files();
        for file in &files {
            if !file.is_file() {
                bail!("Configuration file not found: {}", file.display());
            }
        }
        let ctx = self.context(skip_patches)?;
        let vcs = VcsSet::system(CommandRunner::new(ctx.interrupt.clone()));
        Ok(phases::resolve(Arc::new(ctx), vcs, &BasicValidator, &files)?)
    }
}
