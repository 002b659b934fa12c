use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use super::command::CommandRunner;
use super::{CloneOptions, PatchIdentity, VcsError, VcsKind, VcsOperations, VcsResult};
use crate::repospec::RevisionSelector;

/// Mercurial adapter backed by the system `hg` command.
#[derive(Debug, Clone, Default)]
pub struct Mercurial {
    runner: CommandRunner,
}

impl Mercurial {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

fn revision_of(selector: &RevisionSelector) -> Option<&str> {
    selector
        .commit
        .as_deref()
        .or(selector.tag.as_deref())
        .or(selector.branch.as_deref())
}

/// Patch branch label; Mercurial branch names may not contain `:`.
fn patch_branch(label: &str) -> String {
    let label = label.rsplit(':').next().unwrap_or(label);
    format!("patched-{}", label)
}

fn commit_args(identity: &PatchIdentity, message: &str, date: &str) -> Vec<String> {
    vec![
        "commit".to_string(),
        "--user".to_string(),
        identity.as_author(),
        "-m".to_string(),
        message.to_string(),
        "--date".to_string(),
        date.to_string(),
    ]
}

fn parse_patch_date(content: &str) -> Option<String> {
    let mut lines = content.lines().skip(2);
    if !lines.next()?.starts_with("# Date ") {
        return None;
    }
    let date = lines.next()?.strip_prefix("# ")?.trim();
    if date.is_empty() {
        None
    } else {
        Some(date.to_string())
    }
}

impl VcsOperations for Mercurial {
    fn kind(&self) -> VcsKind {
        VcsKind::Mercurial
    }

    fn create_reference(&self, _url: &str, _dest: &Path) -> VcsResult<bool> {
        Ok(false)
    }

    fn clone_repo(&self, url: &str, dest: &Path, opts: &CloneOptions<'_>) -> VcsResult<()> {
        if opts.depth.is_some() {
            warn!("Shallow clones are not supported for Mercurial, cloning {} in full", url);
        }
        let parent = dest.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|e| VcsError::Spawn {
            program: "hg".to_string(),
            message: format!("cannot create {}: {}", parent.display(), e),
        })?;
        let dest = dest.to_string_lossy();
        self.runner
            .run_network("hg", &["clone", url, dest.as_ref()], parent)?;
        Ok(())
    }

    fn set_remote_url(&self, _path: &Path, _url: &str) -> VcsResult<()> {
        Err(VcsError::Unsupported {
            operation: "hg remote set-url".to_string(),
        })
    }

    fn fetch(
        &self,
        path: &Path,
        _selector: &RevisionSelector,
        _depth: Option<u32>,
    ) -> VcsResult<()> {
        self.runner.run_network("hg", &["pull"], path)?;
        Ok(())
    }

    fn contains_revision(&self, path: &Path, selector: &RevisionSelector) -> VcsResult<bool> {
        let Some(rev) = revision_of(selector) else {
            return Ok(false);
        };
        Ok(self.runner.output("hg", &["log", "-r", rev], path)?.success)
    }

    fn resolve_branch(&self, path: &Path, branch: &str) -> VcsResult<Option<String>> {
        let revset = format!("limit(heads(branch({})))", branch);
        Ok(self
            .runner
            .output(
                "hg",
                &["log", "-r", &revset, "--template", "{node}\n"],
                path,
            )?
            .stdout_if_success()
            .filter(|s| !s.is_empty()))
    }

    fn resolve_tag(&self, path: &Path, tag: &str) -> VcsResult<Option<String>> {
        let revset = format!("tag({})", tag);
        Ok(self
            .runner
            .output("hg", &["log", "-r", &revset, "--template", "{node}"], path)?
            .stdout_if_success()
            .filter(|s| !s.is_empty()))
    }

    fn branch_contains(&self, path: &Path, branch: &str, commit: &str) -> VcsResult<bool> {
        let output = self
            .runner
            .output("hg", &["log", "-r", commit, "-b", branch], path)?;
        Ok(output.success && !output.stdout.trim().is_empty())
    }

    fn checkout(
        &self,
        path: &Path,
        rev: &str,
        _branch: Option<&str>,
        force: bool,
    ) -> VcsResult<()> {
        let mut args = vec!["checkout", rev];
        if force {
            args.push("--clean");
        }
        self.runner.run("hg", &args, path)?;
        Ok(())
    }

    fn is_dirty(&self, path: &Path) -> VcsResult<bool> {
        let out = self.runner.output(
            "hg",
            &["status", "--modified", "--added", "--removed", "--deleted"],
            path,
        )?;
        Ok(!out.check()?.stdout.trim().is_empty())
    }

    fn commit_id(&self, path: &Path, rev: Option<&str>) -> VcsResult<Option<String>> {
        Ok(self
            .runner
            .output(
                "hg",
                &["log", "-r", rev.unwrap_or("."), "--template", "{node}\n"],
                path,
            )?
            .stdout_if_success()
            .filter(|s| !s.is_empty()))
    }

    fn prepare_patches(&self, path: &Path, label: &str) -> VcsResult<()> {
        self.runner
            .run("hg", &["branch", "-f", &patch_branch(label)], path)?;
        Ok(())
    }

    fn apply_patch(
        &self,
        path: &Path,
        patch: &Path,
        identity: &PatchIdentity,
        message: &str,
        date: &str,
    ) -> VcsResult<()> {
        let patch = patch.to_string_lossy();
        self.runner
            .run("hg", &["import", "--no-commit", patch.as_ref()], path)?;
        self.runner.run("hg", &["add"], path)?;
        self.runner
            .run("hg", &commit_args(identity, message, date), path)?;
        Ok(())
    }

    fn patch_date(&self, patch: &Path) -> Option<String> {
        parse_patch_date(&fs::read_to_string(patch).ok()?)
    }

    fn find_root(&self, dir: &Path) -> Option<PathBuf> {
        self.runner
            .output("hg", &["root"], dir)
            .ok()?
            .stdout_if_success()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    fn remote_url(&self, path: &Path) -> Option<String> {
        self.runner
            .output("hg", &["paths", "default"], path)
            .ok()?
            .stdout_if_success()
    }
}
