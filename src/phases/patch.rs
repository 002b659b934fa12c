//! Patch applicator
//!
//! Runs once the fixpoint is complete. Every repository with patches gets
//! them applied on the worker pool; a conflict fails only its own repository
//! and the outcomes are reported together. A patch entry that names an
//! undeclared repository aborts the run with that error alone.

use std::collections::BTreeMap;
use std::sync::Mutex;

use log::info;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::repository::RepositoryManager;
use crate::repospec::RepoSpec;

/// Apply the patches of every spec in `specs`.
pub fn apply_all(manager: &RepositoryManager, specs: &[RepoSpec]) -> Result<()> {
    let ctx = manager.context();
    if ctx.skip_patches {
        info!("Skipping patch application");
        return Ok(());
    }
    let targets: Vec<&RepoSpec> = specs
        .iter()
        .filter(|s| !s.patches.is_empty() && !s.operations_disabled)
        .collect();
    if targets.is_empty() {
        return Ok(());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.jobs)
        .build()?;
    let failures: Mutex<BTreeMap<String, Error>> = Mutex::new(BTreeMap::new());
    pool.install(|| {
        targets.par_iter().for_each(|spec| {
            let outcome = if ctx.interrupt.is_set() {
                Err(Error::Interrupted)
            } else {
                manager.apply_patches(spec, specs)
            };
            if let Err(e) = outcome {
                if let Ok(mut failures) = failures.lock() {
                    failures.insert(spec.id.clone(), e);
                }
            }
        });
    });

    let failures = failures.into_inner().map_err(|_| Error::LockPoisoned {
        context: "patch outcomes".to_string(),
    })?;
    // a patch entry naming an undeclared repo is a config mistake, not a
    // failure of the repository it patches
    let (structural, failures): (Vec<_>, Vec<_>) = failures
        .into_iter()
        .partition(|(_, e)| e.is_structural());
    if let Some((_, err)) = structural.into_iter().next() {
        return Err(err);
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::RepositoryFailures { failures })
    }
}
