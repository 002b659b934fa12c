//! Shared test utilities for integration and E2E tests.
//!
//! The centrepiece is [`DirVcs`], a [`VcsOperations`] double whose "remote
//! urls" are local directories: cloning copies the directory, and every
//! call is recorded so tests can assert what reached the VCS layer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! let fixture = Fixture::new();
//! let remote = fixture.remote("meta-b", &[("b.yml", "header:\n  version: 14\n")]);
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use assert_fs::prelude::*;
use assert_fs::TempDir;

use layerpin::config::MergedConfig;
use layerpin::context::Context;
use layerpin::document::BasicValidator;
use layerpin::error::Result;
use layerpin::phases;
use layerpin::repospec::RevisionSelector;
use layerpin::vcs::{
    CloneOptions, PatchIdentity, VcsError, VcsKind, VcsOperations, VcsResult, VcsSet,
};

/// Re-export commonly used test dependencies for convenience.
#[allow(unused_imports)]
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    pub use super::{DirVcs, Fixture, MARKER};
}

/// File marking the root of a [`DirVcs`] checkout; holds the remote url.
pub const MARKER: &str = ".dirvcs";

/// Commit every fixture checkout reports until something is checked out.
pub const INITIAL_COMMIT: &str = "0000000000000000000000000000000000000000";

/// A VCS whose remotes are plain directories.
#[derive(Default)]
pub struct DirVcs {
    pub calls: Arc<Mutex<Vec<String>>>,
    heads: Mutex<HashMap<PathBuf, String>>,
}

impl DirVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn copy_dir(src: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

impl VcsOperations for DirVcs {
    fn kind(&self) -> VcsKind {
        VcsKind::Git
    }

    fn create_reference(&self, _url: &str, _dest: &Path) -> VcsResult<bool> {
        Ok(false)
    }

    fn clone_repo(&self, url: &str, dest: &Path, _opts: &CloneOptions<'_>) -> VcsResult<()> {
        self.record(format!("clone {}", url));
        let src = Path::new(url);
        if !src.is_dir() {
            return Err(VcsError::Command {
                command: format!("git clone {}", url),
                stderr: "repository not found".to_string(),
            });
        }
        copy_dir(src, dest)
            .and_then(|_| fs::write(dest.join(MARKER), url))
            .map_err(|e| VcsError::Command {
                command: format!("git clone {}", url),
                stderr: e.to_string(),
            })
    }

    fn set_remote_url(&self, path: &Path, url: &str) -> VcsResult<()> {
        self.record(format!("set-url {}", url));
        let _ = fs::write(path.join(MARKER), url);
        Ok(())
    }

    fn fetch(&self, _path: &Path, selector: &RevisionSelector, _depth: Option<u32>) -> VcsResult<()> {
        self.record(format!("fetch {}", selector.describe()));
        Ok(())
    }

    fn contains_revision(&self, _path: &Path, _selector: &RevisionSelector) -> VcsResult<bool> {
        Ok(true)
    }

    fn resolve_branch(&self, _path: &Path, branch: &str) -> VcsResult<Option<String>> {
        Ok(Some(format!("{:0>40}", branch.len())))
    }

    fn resolve_tag(&self, _path: &Path, _tag: &str) -> VcsResult<Option<String>> {
        Ok(None)
    }

    fn branch_contains(&self, _path: &Path, _branch: &str, _commit: &str) -> VcsResult<bool> {
        Ok(true)
    }

    fn checkout(&self, path: &Path, rev: &str, _branch: Option<&str>, _force: bool) -> VcsResult<()> {
        self.record(format!("checkout {}", rev));
        self.heads
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), rev.to_string());
        Ok(())
    }

    fn is_dirty(&self, _path: &Path) -> VcsResult<bool> {
        Ok(false)
    }

    fn commit_id(&self, path: &Path, rev: Option<&str>) -> VcsResult<Option<String>> {
        Ok(match rev {
            Some(rev) => Some(rev.to_string()),
            None => Some(
                self.heads
                    .lock()
                    .unwrap()
                    .get(path)
                    .cloned()
                    .unwrap_or_else(|| INITIAL_COMMIT.to_string()),
            ),
        })
    }

    fn prepare_patches(&self, _path: &Path, label: &str) -> VcsResult<()> {
        self.record(format!("prepare {}", label));
        Ok(())
    }

    fn apply_patch(
        &self,
        _path: &Path,
        patch: &Path,
        _identity: &PatchIdentity,
        _message: &str,
        _date: &str,
    ) -> VcsResult<()> {
        let name = patch.file_name().unwrap_or_default().to_string_lossy();
        self.record(format!("apply {}", name));
        Ok(())
    }

    fn patch_date(&self, _patch: &Path) -> Option<String> {
        None
    }

    fn find_root(&self, dir: &Path) -> Option<PathBuf> {
        dir.ancestors()
            .find(|d| d.join(MARKER).is_file())
            .map(Path::to_path_buf)
    }

    fn remote_url(&self, path: &Path) -> Option<String> {
        fs::read_to_string(path.join(MARKER)).ok()
    }
}

/// Scratch layout: `remotes/` holds fixture remotes, `cfg/` the top-level
/// documents and `work/` the checkouts.
pub struct Fixture {
    pub temp: TempDir,
    pub vcs: Arc<DirVcs>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            vcs: Arc::new(DirVcs::new()),
        }
    }

    /// Create a remote named `name` containing `files`; returns its url.
    pub fn remote(&self, name: &str, files: &[(&str, &str)]) -> String {
        let dir = self.temp.child("remotes").child(name);
        dir.create_dir_all().unwrap();
        for (file, content) in files {
            dir.child(file).write_str(content).unwrap();
        }
        dir.path().display().to_string()
    }

    /// Write a top-level document under `cfg/`.
    pub fn config(&self, name: &str, content: &str) -> PathBuf {
        let file = self.temp.child("cfg").child(name);
        file.write_str(content).unwrap();
        file.path().to_path_buf()
    }

    /// Turn `cfg/` into a checkout of a repository.
    pub fn make_cfg_a_repo(&self, url: &str) {
        self.temp
            .child("cfg")
            .child(MARKER)
            .write_str(url)
            .unwrap();
    }

    pub fn work_dir(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    pub fn context(&self) -> Context {
        Context::builder(self.work_dir()).jobs(2).build().unwrap()
    }

    pub fn vcs_set(&self) -> VcsSet {
        let ops: Arc<dyn VcsOperations> = self.vcs.clone();
        VcsSet::with_operations(ops.clone(), ops)
    }

    pub fn resolve(&self, files: &[PathBuf]) -> Result<MergedConfig> {
        self.resolve_with(self.context(), files)
    }

    pub fn resolve_with(&self, ctx: Context, files: &[PathBuf]) -> Result<MergedConfig> {
        phases::resolve(Arc::new(ctx), self.vcs_set(), &BasicValidator, files)
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
