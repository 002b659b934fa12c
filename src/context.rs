//! # Run Context
//!
//! Everything a resolution run needs to know about its environment lives in
//! one immutable [`Context`], built once by the caller and shared as
//! `Arc<Context>` by the resolver, the checkout scheduler and the patch
//! applicator. The library never reads process environment variables on its
//! own; the CLI maps flags and `LAYERPIN_*` variables into a [`ContextBuilder`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use regex::Regex;

use crate::error::Result;
use crate::vcs::PatchIdentity;

/// Default bound on fixpoint iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 32;

/// Shared cancellation flag, observed before every VCS subprocess launch.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that no further subprocesses be started.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded retry with exponential backoff for network VCS operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
        }
    }
}

/// Values that take precedence over the merged configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub machine: Option<String>,
    pub distro: Option<String>,
    pub targets: Option<Vec<String>>,
    pub task: Option<String>,
}

/// Immutable settings of one run.
#[derive(Debug, Clone)]
pub struct Context {
    pub work_dir: PathBuf,
    pub repo_ref_dir: Option<PathBuf>,
    pub force_checkout: bool,
    pub update: bool,
    pub clone_depth: Option<u32>,
    pub jobs: usize,
    pub max_iterations: usize,
    pub retry: RetryPolicy,
    /// URL rewrite rules, first match wins.
    pub mirrors: Vec<(Regex, String)>,
    pub skip_patches: bool,
    pub env_overrides: EnvOverrides,
    pub patch_identity: PatchIdentity,
    pub interrupt: InterruptFlag,
}

impl Context {
    pub fn builder(work_dir: impl Into<PathBuf>) -> ContextBuilder {
        ContextBuilder::new(work_dir)
    }

    /// Resolve a configured repo path against the work directory.
    pub fn work_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }
}

/// Builder for [`Context`].
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    ctx: Context,
    mirror_specs: Vec<(String, String)>,
}

impl ContextBuilder {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            ctx: Context {
                work_dir: work_dir.into(),
                repo_ref_dir: None,
                force_checkout: false,
                update: false,
                clone_depth: None,
                jobs: default_jobs(),
                max_iterations: DEFAULT_MAX_ITERATIONS,
                retry: RetryPolicy::default(),
                mirrors: Vec::new(),
                skip_patches: false,
                env_overrides: EnvOverrides::default(),
                patch_identity: PatchIdentity::default(),
                interrupt: InterruptFlag::new(),
            },
            mirror_specs: Vec::new(),
        }
    }

    pub fn repo_ref_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.ctx.repo_ref_dir = dir;
        self
    }

    pub fn force_checkout(mut self, force: bool) -> Self {
        self.ctx.force_checkout = force;
        self
    }

    pub fn update(mut self, update: bool) -> Self {
        self.ctx.update = update;
        self
    }

    /// Shallow clone depth; `0` means a full clone.
    pub fn clone_depth(mut self, depth: Option<u32>) -> Self {
        self.ctx.clone_depth = depth.filter(|d| *d > 0);
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.ctx.jobs = jobs.max(1);
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.ctx.max_iterations = max.max(1);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.ctx.retry = retry;
        self
    }

    /// Add a URL rewrite rule. Patterns are compiled in [`ContextBuilder::build`].
    pub fn mirror(mut self, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.mirror_specs.push((pattern.into(), replacement.into()));
        self
    }

    /// Parse mirror rules from `pattern replacement` lines, the format of
    /// `LAYERPIN_PREMIRRORS`. Blank lines are ignored, malformed ones are
    /// skipped with a warning.
    pub fn mirrors_from_str(mut self, spec: &str) -> Self {
        for line in spec.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [pattern, replacement] => self
                    .mirror_specs
                    .push((pattern.to_string(), replacement.to_string())),
                _ => warn!(
                    "Ignoring malformed mirror rule \"{}\": expected \"<pattern> <replacement>\"",
                    line
                ),
            }
        }
        self
    }

    pub fn skip_patches(mut self, skip: bool) -> Self {
        self.ctx.skip_patches = skip;
        self
    }

    pub fn env_overrides(mut self, overrides: EnvOverrides) -> Self {
        self.ctx.env_overrides = overrides;
        self
    }

    pub fn patch_identity(mut self, identity: PatchIdentity) -> Self {
        self.ctx.patch_identity = identity;
        self
    }

    pub fn interrupt(mut self, flag: InterruptFlag) -> Self {
        self.ctx.interrupt = flag;
        self
    }

    pub fn build(mut self) -> Result<Context> {
        for (pattern, replacement) in self.mirror_specs {
            self.ctx.mirrors.push((Regex::new(&pattern)?, replacement));
        }
        Ok(self.ctx)
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(16)
}
