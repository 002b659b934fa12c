//! # Version-Control Adapters
//!
//! The [`VcsOperations`] trait is the primitive capability set every
//! supported version-control system implements: clone, fetch, resolve
//! symbolic refs, checkout, dirtiness and commit-id queries, and patch
//! application. It knows nothing about configuration semantics. The policy
//! built on top of these primitives (when to fetch, how a branch and a pinned
//! commit must agree, when a dirty tree blocks a checkout) lives in
//! [`crate::repository::RepositoryManager`] and is shared by every kind.
//!
//! Implementations:
//!
//! - [`git::Git`] drives the `git` command-line tool.
//! - [`hg::Mercurial`] drives the `hg` command-line tool.
//!
//! Both shell out through [`command::CommandRunner`], so authentication is
//! whatever the user's SSH agent and credential helpers provide.
//!
//! A [`VcsSet`] bundles one adapter per kind; the kind of each repository is
//! selected once, when its `RepoSpec` is built.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::repospec::RevisionSelector;

pub mod command;
pub mod git;
pub mod hg;

/// Errors raised by a VCS adapter.
#[derive(Error, Debug, Clone)]
pub enum VcsError {
    /// Network-level failure; worth retrying.
    #[error("{command}: {message}")]
    Unavailable { command: String, message: String },

    /// The command ran and failed for a structural reason.
    #[error("{command}: {stderr}")]
    Command { command: String, stderr: String },

    /// The tool could not be started at all.
    #[error("cannot run {program}: {message}")]
    Spawn { program: String, message: String },

    /// The adapter does not implement this operation.
    #[error("{operation} is not supported")]
    Unsupported { operation: String },

    /// The run was interrupted before the command started.
    #[error("interrupted")]
    Interrupted,
}

impl VcsError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, VcsError::Unavailable { .. })
    }
}

pub type VcsResult<T> = std::result::Result<T, VcsError>;

/// Supported version-control systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VcsKind {
    Git,
    Mercurial,
}

impl VcsKind {
    /// Parse the `type` key of a repo entry.
    pub fn from_config(value: &str) -> Option<Self> {
        match value {
            "git" => Some(VcsKind::Git),
            "hg" => Some(VcsKind::Mercurial),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VcsKind::Git => "git",
            VcsKind::Mercurial => "hg",
        }
    }
}

impl fmt::Display for VcsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a fresh clone.
#[derive(Debug, Clone, Default)]
pub struct CloneOptions<'a> {
    /// Shallow clone depth.
    pub depth: Option<u32>,
    /// Branch to check out after a shallow clone.
    pub branch: Option<&'a str>,
    /// Local object cache to borrow from.
    pub reference: Option<&'a Path>,
}

/// Identity recorded on commits created while applying patches.
///
/// It is passed to each commit subprocess through its environment or command
/// line only, so the user's own VCS configuration is never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchIdentity {
    pub name: String,
    pub email: String,
}

impl PatchIdentity {
    pub fn as_author(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

impl Default for PatchIdentity {
    fn default() -> Self {
        Self {
            name: "layerpin".to_string(),
            email: "layerpin@example.com".to_string(),
        }
    }
}

/// Primitive operations of one version-control system.
pub trait VcsOperations: Send + Sync {
    fn kind(&self) -> VcsKind;

    /// Create a bare object cache of `url` at `dest`. Returns `false` when
    /// this VCS has no notion of object caches.
    fn create_reference(&self, url: &str, dest: &Path) -> VcsResult<bool>;

    /// Clone `url` into `dest`, which must not exist yet.
    fn clone_repo(&self, url: &str, dest: &Path, opts: &CloneOptions<'_>) -> VcsResult<()>;

    /// Point the default remote at `url`.
    fn set_remote_url(&self, path: &Path, url: &str) -> VcsResult<()>;

    /// Fetch whatever is needed to realise `selector`.
    fn fetch(&self, path: &Path, selector: &RevisionSelector, depth: Option<u32>)
        -> VcsResult<()>;

    /// Whether the revision named by `selector` already exists locally.
    fn contains_revision(&self, path: &Path, selector: &RevisionSelector) -> VcsResult<bool>;

    /// Commit id of the remote branch tip, if the branch exists.
    fn resolve_branch(&self, path: &Path, branch: &str) -> VcsResult<Option<String>>;

    /// Commit id a tag points to, if the tag exists.
    fn resolve_tag(&self, path: &Path, tag: &str) -> VcsResult<Option<String>>;

    /// Whether `branch` contains `commit`.
    fn branch_contains(&self, path: &Path, branch: &str, commit: &str) -> VcsResult<bool>;

    /// Switch the working tree to `rev`, optionally (re)creating a local
    /// branch at it.
    fn checkout(&self, path: &Path, rev: &str, branch: Option<&str>, force: bool)
        -> VcsResult<()>;

    /// Whether tracked files differ from the checked-out commit.
    fn is_dirty(&self, path: &Path) -> VcsResult<bool>;

    /// Full commit id of `rev`, or of the working tree parent when `None`.
    fn commit_id(&self, path: &Path, rev: Option<&str>) -> VcsResult<Option<String>>;

    /// Move onto a dedicated branch before patches are committed.
    fn prepare_patches(&self, path: &Path, label: &str) -> VcsResult<()>;

    /// Apply one diff, stage the result and commit it as `identity`.
    fn apply_patch(
        &self,
        path: &Path,
        patch: &Path,
        identity: &PatchIdentity,
        message: &str,
        date: &str,
    ) -> VcsResult<()>;

    /// Author date recorded in a patch header, if present.
    fn patch_date(&self, patch: &Path) -> Option<String>;

    /// Root of the checkout containing `dir`, if `dir` is under this VCS.
    fn find_root(&self, dir: &Path) -> Option<PathBuf>;

    /// URL of the default remote of the checkout at `path`.
    fn remote_url(&self, path: &Path) -> Option<String>;
}

/// One adapter per supported VCS kind.
#[derive(Clone)]
pub struct VcsSet {
    git: Arc<dyn VcsOperations>,
    hg: Arc<dyn VcsOperations>,
}

impl VcsSet {
    /// Adapters backed by the system `git` and `hg` tools.
    pub fn system(runner: command::CommandRunner) -> Self {
        Self {
            git: Arc::new(git::Git::new(runner.clone())),
            hg: Arc::new(hg::Mercurial::new(runner)),
        }
    }

    /// Build a set from custom adapters, e.g. test doubles.
    pub fn with_operations(git: Arc<dyn VcsOperations>, hg: Arc<dyn VcsOperations>) -> Self {
        Self { git, hg }
    }

    pub fn get(&self, kind: VcsKind) -> &Arc<dyn VcsOperations> {
        match kind {
            VcsKind::Git => &self.git,
            VcsKind::Mercurial => &self.hg,
        }
    }

    /// Find the checkout root containing `dir`, trying git first.
    pub fn find_root(&self, dir: &Path) -> Option<(PathBuf, VcsKind)> {
        [&self.git, &self.hg]
            .into_iter()
            .find_map(|ops| ops.find_root(dir).map(|root| (root, ops.kind())))
    }
}

impl fmt::Debug for VcsSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VcsSet").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vcs_kind_from_config() {
        assert_eq!(VcsKind::from_config("git"), Some(VcsKind::Git));
        assert_eq!(VcsKind::from_config("hg"), Some(VcsKind::Mercurial));
        assert_eq!(VcsKind::from_config("svn"), None);
    }

    #[test]
    fn test_patch_identity_author_string() {
        let id = PatchIdentity {
            name: "Build Bot".to_string(),
            email: "bot@example.com".to_string(),
        };
        assert_eq!(id.as_author(), "Build Bot <bot@example.com>");
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(VcsError::Unavailable {
            command: "git fetch".to_string(),
            message: "timeout".to_string()
        }
        .is_transient());
        assert!(!VcsError::Interrupted.is_transient());
        assert!(!VcsError::Unsupported {
            operation: "set-url".to_string()
        }
        .is_transient());
    }
}
