//! # Repository Management
//!
//! This module provides the `RepositoryManager`, which brings one repository
//! to the state its [`RepoSpec`] demands. It owns the checkout *policy*: when
//! to create a reference cache, when a fetch is needed, how a branch or tag
//! must agree with a pinned commit, when a dirty working tree blocks a
//! switch, and how patches are committed. The *mechanics* are delegated to a
//! [`VcsOperations`] implementation selected by the `RepoSpec`'s VCS kind.
//!
//! ## Design
//!
//! The manager is built around the trait-based [`VcsSet`], so tests can swap
//! in mock adapters and exercise the whole policy without running `git` or
//! `hg`. Every operation on a checkout directory runs under that directory's
//! lock from the [`RepoRegistry`], and every outcome is recorded there.
//!
//! Adapter errors are converted into crate errors here, attributed to the
//! repository they happened in. Network operations (clone, fetch, reference
//! creation) go through the context's retry policy first.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use log::{debug, info, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::registry::RepoRegistry;
use crate::repospec::{PatchSpec, RepoSpec};
use crate::vcs::command::with_retry;
use crate::vcs::{CloneOptions, VcsError, VcsKind, VcsOperations, VcsSet};

/// Applies checkout and patch policy to repositories.
pub struct RepositoryManager {
    ctx: Arc<Context>,
    vcs: VcsSet,
    registry: Arc<RepoRegistry>,
}

impl RepositoryManager {
    pub fn new(ctx: Arc<Context>, vcs: VcsSet, registry: Arc<RepoRegistry>) -> Self {
        Self { ctx, vcs, registry }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<RepoRegistry> {
        &self.registry
    }

    pub fn vcs(&self) -> &VcsSet {
        &self.vcs
    }

    fn ops(&self, spec: &RepoSpec) -> &Arc<dyn VcsOperations> {
        self.vcs.get(spec.kind)
    }

    fn vcs_error(&self, spec: &RepoSpec, err: VcsError) -> Error {
        Error::from_vcs(&spec.id, spec.effective_url(&self.ctx).as_deref(), err)
    }

    /// Clone (if needed), fetch (if needed) and check out `spec`, recording
    /// the outcome in the registry. Returns the resolved commit.
    pub fn sync(&self, spec: &RepoSpec) -> Result<Option<String>> {
        let lock = self.registry.path_lock(&spec.path)?;
        let _guard = lock.lock().map_err(|_| Error::LockPoisoned {
            context: format!("checkout path {}", spec.path.display()),
        })?;

        self.registry.begin(spec)?;
        let result = self
            .ensure_cloned(spec)
            .and_then(|()| self.checkout(spec));
        match &result {
            Ok(commit) => {
                let dirty = if spec.operations_disabled {
                    false
                } else {
                    self.ops(spec).is_dirty(&spec.path).unwrap_or_else(|e| {
                        warn!("Could not query status of repo \"{}\": {}", spec.name, e);
                        false
                    })
                };
                self.registry.record_ready(&spec.id, commit.clone(), dirty)?;
            }
            Err(_) => self.registry.record_failed(&spec.id)?,
        }
        result
    }

    /// Make sure a checkout of `spec` exists at its path with up-to-date
    /// objects for the requested revision.
    pub fn ensure_cloned(&self, spec: &RepoSpec) -> Result<()> {
        if spec.operations_disabled {
            return Ok(());
        }
        let ops = self.ops(spec);
        let url = spec
            .effective_url(&self.ctx)
            .ok_or_else(|| Error::InvalidRepo {
                repo: spec.id.clone(),
                message: "repository has no url".to_string(),
            })?;

        let reference = self.ensure_reference(spec, &url)?;

        if !spec.path.exists() {
            info!("Cloning repository {}", spec.name);
            let opts = CloneOptions {
                depth: self.ctx.clone_depth,
                branch: spec.selector.branch.as_deref(),
                reference: reference.as_deref(),
            };
            with_retry(&self.ctx.retry, &format!("clone of {}", spec.name), || {
                ops.clone_repo(&url, &spec.path, &opts)
            })
            .map_err(|e| self.vcs_error(spec, e))?;
        }

        if ops.remote_url(&spec.path).as_deref() != Some(url.as_str()) {
            match ops.set_remote_url(&spec.path, &url) {
                Ok(()) => {}
                Err(VcsError::Unsupported { .. }) => {
                    warn!("Repo implementation does not support changing the remote url.")
                }
                Err(e) => return Err(self.vcs_error(spec, e)),
            }
        }

        if spec.selector.is_empty() {
            return Ok(());
        }

        let wants_update = self.ctx.update && spec.selector.commit.is_none();
        if !wants_update && self.has_revision(spec)? {
            debug!(
                "Repository {} already contains {}",
                spec.name,
                spec.selector.describe()
            );
            return Ok(());
        }

        match with_retry(&self.ctx.retry, &format!("fetch of {}", spec.name), || {
            ops.fetch(&spec.path, &spec.selector, self.ctx.clone_depth)
        }) {
            Ok(()) => {
                info!("Repository {} updated", spec.name);
                Ok(())
            }
            Err(e) if e.is_transient() || matches!(e, VcsError::Interrupted) => {
                Err(self.vcs_error(spec, e))
            }
            // checkout reports a revision that is still missing
            Err(e) => {
                warn!("Could not update repository {}: {}", spec.name, e);
                Ok(())
            }
        }
    }

    /// Whether the selector is satisfiable without fetching.
    fn has_revision(&self, spec: &RepoSpec) -> Result<bool> {
        let ops = self.ops(spec);
        let present = ops
            .contains_revision(&spec.path, &spec.selector)
            .map_err(|e| self.vcs_error(spec, e))?;
        if !present {
            return Ok(false);
        }
        match (&spec.selector.branch, &spec.selector.commit) {
            (Some(branch), Some(commit)) if self.ctx.clone_depth.is_none() => ops
                .branch_contains(&spec.path, branch, commit)
                .map_err(|e| self.vcs_error(spec, e)),
            _ => Ok(true),
        }
    }

    /// Create the shared object cache for `spec` if configured and missing.
    fn ensure_reference(&self, spec: &RepoSpec, url: &str) -> Result<Option<PathBuf>> {
        let (Some(ref_dir), Some(qualified)) = (&self.ctx.repo_ref_dir, spec.qualified_name())
        else {
            return Ok(None);
        };
        if spec.kind != VcsKind::Git {
            return Ok(None);
        }
        let sdir = ref_dir.join(&qualified);
        if sdir.exists() {
            return Ok(Some(sdir));
        }

        fs::create_dir_all(ref_dir)?;
        let tmp = ref_dir.join(format!(".{}.{}.tmp", qualified, std::process::id()));
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        let created = with_retry(
            &self.ctx.retry,
            &format!("reference clone of {}", spec.name),
            || self.ops(spec).create_reference(url, &tmp),
        )
        .map_err(|e| self.vcs_error(spec, e))?;
        if !created {
            return Ok(None);
        }

        debug!("Created repo ref for {}", qualified);
        if fs::rename(&tmp, &sdir).is_err() {
            debug!("repo {} already cloned by other instance", qualified);
            let _ = fs::remove_dir_all(&tmp);
        }
        Ok(Some(sdir))
    }

    /// Resolve the selector and switch the working tree to it.
    pub fn checkout(&self, spec: &RepoSpec) -> Result<Option<String>> {
        if spec.operations_disabled {
            return Ok(self.local_commit(&spec.path));
        }
        let ops = self.ops(spec);
        if spec.selector.is_empty() {
            return ops
                .commit_id(&spec.path, None)
                .map_err(|e| self.vcs_error(spec, e));
        }

        let mismatch = |message: String| Error::RevisionMismatch {
            repo: spec.id.clone(),
            message,
        };
        let sel = &spec.selector;
        let (desired, branch) = if let Some(tag) = &sel.tag {
            let resolved = ops
                .resolve_tag(&spec.path, tag)
                .map_err(|e| self.vcs_error(spec, e))?
                .ok_or_else(|| {
                    mismatch(format!("tag \"{}\" cannot be found in the repository", tag))
                })?;
            if let Some(commit) = &sel.commit {
                if &resolved != commit {
                    return Err(mismatch(format!(
                        "tag \"{}\" (\"{}\") does not match provided commit \"{}\"",
                        tag, resolved, commit
                    )));
                }
            }
            (resolved, None)
        } else if let Some(branch) = &sel.branch {
            let tip = ops
                .resolve_branch(&spec.path, branch)
                .map_err(|e| self.vcs_error(spec, e))?
                .ok_or_else(|| {
                    mismatch(format!(
                        "branch \"{}\" cannot be found in the repository",
                        branch
                    ))
                })?;
            // shallow clones carry no branch history
            if let Some(commit) = &sel.commit {
                if self.ctx.clone_depth.is_none()
                    && !ops
                        .branch_contains(&spec.path, branch, commit)
                        .map_err(|e| self.vcs_error(spec, e))?
                {
                    return Err(mismatch(format!(
                        "branch \"{}\" does not contain commit \"{}\"",
                        branch, commit
                    )));
                }
            }
            (sel.commit.clone().unwrap_or(tip), Some(branch.as_str()))
        } else {
            // a commit alone, checked by is_empty above
            (sel.commit.clone().unwrap_or_default(), None)
        };

        let head = ops
            .commit_id(&spec.path, None)
            .map_err(|e| self.vcs_error(spec, e))?;
        let target = ops
            .commit_id(&spec.path, Some(&desired))
            .map_err(|e| self.vcs_error(spec, e))?;
        if target.is_none() {
            return Err(mismatch(format!(
                "commit \"{}\" cannot be found in the repository",
                desired
            )));
        }
        let at_target = head == target;

        if !self.ctx.force_checkout
            && ops
                .is_dirty(&spec.path)
                .map_err(|e| self.vcs_error(spec, e))?
        {
            if at_target {
                warn!("Repo {} is dirty - no checkout", spec.name);
                return Ok(head);
            }
            return Err(Error::DirtyRepository {
                repo: spec.id.clone(),
                path: spec.path.clone(),
                message: format!(
                    "local modifications block checkout of {}",
                    sel.describe()
                ),
            });
        }

        ops.checkout(&spec.path, &desired, branch, self.ctx.force_checkout)
            .map_err(|e| self.vcs_error(spec, e))?;
        info!("Repository {} checked out to {}", spec.name, desired);

        ops.commit_id(&spec.path, None)
            .map_err(|e| self.vcs_error(spec, e))
    }

    /// Commit of a repository used as found on disk, if it is a checkout.
    fn local_commit(&self, path: &Path) -> Option<String> {
        let (_, kind) = self.vcs.find_root(path)?;
        self.vcs.get(kind).commit_id(path, None).ok().flatten()
    }

    /// Apply `spec`'s patches in ascending id order. `all` resolves the
    /// repositories patch paths are relative to.
    pub fn apply_patches(&self, spec: &RepoSpec, all: &[RepoSpec]) -> Result<()> {
        if spec.operations_disabled || spec.patches.is_empty() {
            return Ok(());
        }
        let lock = self.registry.path_lock(&spec.path)?;
        let _guard = lock.lock().map_err(|_| Error::LockPoisoned {
            context: format!("checkout path {}", spec.path.display()),
        })?;

        let ops = self.ops(spec);
        if ops
            .is_dirty(&spec.path)
            .map_err(|e| self.vcs_error(spec, e))?
        {
            return Err(Error::DirtyRepository {
                repo: spec.id.clone(),
                path: spec.path.clone(),
                message: "local modifications block patching".to_string(),
            });
        }

        let files = patch_files(spec, all)?;
        ops.prepare_patches(&spec.path, spec.selector.patch_label())
            .map_err(|e| self.vcs_error(spec, e))?;

        let identity = &self.ctx.patch_identity;
        for (patch, file, display) in &files {
            let date = ops
                .patch_date(file)
                .or_else(|| fallback_patch_date(spec.kind, file))
                .unwrap_or_default();
            let message = format!("{}: {}\n\npatch {} applied", identity.name, patch.id, display);
            match ops.apply_patch(&spec.path, file, identity, &message, &date) {
                Ok(()) => info!(
                    "Patch applied. (patch path: {}, repo: {}, patch entry: {})",
                    display, spec.name, patch.id
                ),
                Err(VcsError::Interrupted) => return Err(Error::Interrupted),
                Err(e) => {
                    self.registry.mark_unusable(&spec.id)?;
                    return Err(Error::PatchConflict {
                        repo: spec.id.clone(),
                        patch: patch.id.clone(),
                        path: file.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let commit = ops.commit_id(&spec.path, None).ok().flatten();
        self.registry.record_patched(&spec.id, commit)
    }
}

/// Expand the patch entries of `spec` into individual diff files, each with
/// its entry and a display path relative to the owning repository.
pub fn patch_files(
    spec: &RepoSpec,
    all: &[RepoSpec],
) -> Result<Vec<(PatchSpec, PathBuf, String)>> {
    let mut files = Vec::new();
    for patch in &spec.patches {
        let owner = all
            .iter()
            .find(|r| r.id == patch.repo)
            .ok_or_else(|| Error::InvalidRepo {
                repo: spec.id.clone(),
                message: format!(
                    "could not find referenced repo \"{}\" of patch entry \"{}\"",
                    patch.repo, patch.id
                ),
            })?;
        let path = owner.path.join(&patch.path);
        let not_found = |path: PathBuf| Error::PatchNotFound {
            repo: spec.id.clone(),
            patch: patch.id.clone(),
            path,
        };

        if path.is_file() {
            files.push((patch.clone(), path, patch.path.clone()));
        } else if path.join("series").is_file() {
            let series = fs::read_to_string(path.join("series"))?;
            for entry in parse_series(&series) {
                let file = path.join(&entry);
                if !file.is_file() {
                    return Err(not_found(file));
                }
                let display = format!("{}/{}", patch.path.trim_end_matches('/'), entry);
                files.push((patch.clone(), file, display));
            }
        } else {
            return Err(not_found(path));
        }
    }
    Ok(files)
}

/// Entries of a quilt `series` file.
pub fn parse_series(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.starts_with('#'))
        .map(|line| line.split(" #").next().unwrap_or(line).trim_end().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn fallback_patch_date(kind: VcsKind, file: &Path) -> Option<String> {
    let secs = fs::metadata(file)
        .ok()?
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs();
    Some(match kind {
        VcsKind::Git => format!("{} +0000", secs),
        VcsKind::Mercurial => format!("{} 0", secs),
    })
}
