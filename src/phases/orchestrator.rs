//! Orchestrator for a complete resolution run
//!
//! Coordinates the phases behind one entry point, [`resolve`].

use std::path::PathBuf;
use std::sync::Arc;

use log::debug;

use super::{patch, resolve::EntryScope, resolve::IncludeResolver};
use crate::config::MergedConfig;
use crate::context::Context;
use crate::document::SchemaValidator;
use crate::error::Result;
use crate::registry::RepoRegistry;
use crate::repository::RepositoryManager;
use crate::vcs::VcsSet;
use crate::worklock::WorkdirLock;

/// Resolve `entrypoints` into a [`MergedConfig`].
///
/// 1. Reject top-level documents that do not share one repository, before
///    anything is checked out
/// 2. Take the work directory lock
/// 3. Run the include/checkout fixpoint
/// 4. Apply patches, unless the context skips them
pub fn resolve(
    ctx: Arc<Context>,
    vcs: VcsSet,
    validator: &dyn SchemaValidator,
    entrypoints: &[PathBuf],
) -> Result<MergedConfig> {
    // Phase 1: Scope check
    let scope = EntryScope::detect(&vcs, entrypoints)?;
    let entry_files = scope.files.clone();

    let _lock = WorkdirLock::acquire(&ctx.work_dir)?;
    let registry = Arc::new(RepoRegistry::new());
    let manager = RepositoryManager::new(ctx.clone(), vcs, registry.clone());

    // Phase 2: Include fixpoint
    let resolution = IncludeResolver::new(&manager, validator, scope).resolve()?;

    // Phase 3: Patches
    patch::apply_all(&manager, &resolution.specs)?;

    let commits = registry
        .snapshot()?
        .into_iter()
        .map(|(id, state)| (id, state.commit))
        .collect();
    debug!("Resolved {} repositories", resolution.specs.len());

    Ok(MergedConfig::new(
        resolution.merged.body,
        resolution.merged.version,
        resolution.specs,
        commits,
        ctx.env_overrides.clone(),
        entry_files,
    ))
}
