//! Checkout scheduler
//!
//! Brings a batch of repositories to their target revisions on a bounded
//! rayon pool. Requests for the same id are deduplicated; operations on the
//! same checkout path are serialised by the registry's path locks inside
//! [`RepositoryManager::sync`]. One failing repository never cancels its
//! siblings: every outcome is collected and returned with the batch.

use std::collections::BTreeMap;
use std::sync::Mutex;

use log::{debug, warn};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::repository::RepositoryManager;
use crate::repospec::RepoSpec;

/// Outcome of one checkout batch, keyed by repository id.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Resolved commit of every repository that reached its target.
    pub synced: BTreeMap<String, Option<String>>,
    pub failures: BTreeMap<String, Error>,
}

/// Keep the first spec per id, warning about later requests that disagree
/// on where the repository lives.
pub fn dedup_specs(specs: &[RepoSpec]) -> Vec<RepoSpec> {
    let mut seen: BTreeMap<&str, &RepoSpec> = BTreeMap::new();
    let mut unique = Vec::new();
    for spec in specs {
        match seen.get(spec.id.as_str()) {
            Some(first) => {
                if !first.same_location(spec) {
                    warn!(
                        "Conflicting checkout requests for repo \"{}\": {:?} at {} vs {:?} at {}",
                        spec.id,
                        first.url,
                        first.path.display(),
                        spec.url,
                        spec.path.display()
                    );
                }
            }
            None => {
                seen.insert(&spec.id, spec);
                unique.push(spec.clone());
            }
        }
    }
    unique
}

/// Check out every spec of the batch in parallel.
///
/// Returns `Err` only for failures of the scheduler itself (worker pool,
/// poisoned locks). Per-repository failures land in the report.
pub fn checkout_batch(manager: &RepositoryManager, specs: &[RepoSpec]) -> Result<BatchReport> {
    let specs = dedup_specs(specs);
    if specs.is_empty() {
        return Ok(BatchReport::default());
    }
    let ctx = manager.context();
    debug!("Checking out {} repositories", specs.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.jobs)
        .build()?;
    let outcomes: Mutex<BTreeMap<String, Result<Option<String>>>> = Mutex::new(BTreeMap::new());

    pool.install(|| {
        specs.par_iter().for_each(|spec| {
            let outcome = if ctx.interrupt.is_set() {
                Err(Error::Interrupted)
            } else {
                manager.sync(spec)
            };
            if let Ok(mut outcomes) = outcomes.lock() {
                outcomes.insert(spec.id.clone(), outcome);
            }
        });
    });

    let outcomes = outcomes.into_inner().map_err(|_| Error::LockPoisoned {
        context: "checkout outcomes".to_string(),
    })?;
    let mut report = BatchReport::default();
    for (id, outcome) in outcomes {
        match outcome {
            Ok(commit) => {
                report.synced.insert(id, commit);
            }
            Err(e) => {
                warn!("Checkout of repo \"{}\" failed: {}", id, e);
                report.failures.insert(id, e);
            }
        }
    }
    Ok(report)
}
