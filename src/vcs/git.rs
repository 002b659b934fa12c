use std::fs;
use std::path::{Path, PathBuf};

use super::command::CommandRunner;
use super::{CloneOptions, PatchIdentity, VcsKind, VcsOperations, VcsResult};
use crate::repospec::RevisionSelector;

/// Git adapter backed by the system `git` command.
///
/// Using the command-line tool means SSH keys, credential helpers and any
/// `~/.gitconfig` settings apply exactly as they do for the user.
#[derive(Debug, Clone, Default)]
pub struct Git {
    runner: CommandRunner,
}

impl Git {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

/// Strip a leading `refs/` from a ref name.
pub fn remove_ref_prefix(r: &str) -> &str {
    r.strip_prefix("refs/").unwrap_or(r)
}

fn clone_args(url: &str, dest: &Path, opts: &CloneOptions<'_>) -> Vec<String> {
    let mut args = vec!["clone".to_string(), "-q".to_string()];
    if let Some(depth) = opts.depth {
        args.push("--depth".to_string());
        args.push(depth.to_string());
        if let Some(branch) = opts.branch {
            args.push("--branch".to_string());
            let branch = remove_ref_prefix(branch);
            args.push(branch.strip_prefix("heads/").unwrap_or(branch).to_string());
        }
    }
    match opts.reference {
        Some(reference) => {
            let reference = reference.to_string_lossy().into_owned();
            args.push(reference.clone());
            args.push("--reference".to_string());
            args.push(reference);
        }
        None => args.push(url.to_string()),
    }
    args.push(dest.to_string_lossy().into_owned());
    args
}

fn fetch_args(selector: &RevisionSelector, depth: Option<u32>) -> Vec<String> {
    let mut args = vec!["fetch".to_string(), "-q".to_string()];
    if let Some(depth) = depth {
        args.push("--depth".to_string());
        args.push(depth.to_string());
    }

    if let Some(tag) = &selector.tag {
        let tag = remove_ref_prefix(tag);
        let tag = tag.strip_prefix("tags/").unwrap_or(tag);
        args.push("origin".to_string());
        args.push(format!("+{}:refs/tags/{}", tag, tag));
        return args;
    }

    // a shallow fetch of a pinned commit loses branch information
    if depth.is_some() {
        if let Some(commit) = &selector.commit {
            args.push("origin".to_string());
            args.push(commit.clone());
            return args;
        }
    }

    if let Some(branch) = &selector.branch {
        if branch.starts_with("refs/") || depth.is_some() {
            let branch = remove_ref_prefix(branch);
            args.push("origin".to_string());
            args.push(format!("+{}:refs/remotes/origin/{}", branch, branch));
        }
    }
    args
}

fn contains_target(selector: &RevisionSelector) -> Option<String> {
    if let Some(commit) = &selector.commit {
        return Some(commit.clone());
    }
    if let Some(tag) = &selector.tag {
        return Some(tag.clone());
    }
    selector.branch.as_ref().map(|branch| {
        if branch.starts_with("refs/") {
            format!("remotes/origin/{}", remove_ref_prefix(branch))
        } else {
            branch.clone()
        }
    })
}

fn checkout_args(rev: &str, branch: Option<&str>, force: bool) -> Vec<String> {
    let mut args = vec![
        "checkout".to_string(),
        "-q".to_string(),
        remove_ref_prefix(rev).to_string(),
    ];
    if let Some(branch) = branch {
        let branch = remove_ref_prefix(branch);
        let branch = branch.strip_prefix("heads/").unwrap_or(branch);
        args.push("-B".to_string());
        args.push(branch.to_string());
    }
    if force {
        args.push("--force".to_string());
    }
    args
}

impl VcsOperations for Git {
    fn kind(&self) -> VcsKind {
        VcsKind::Git
    }

    fn create_reference(&self, url: &str, dest: &Path) -> VcsResult<bool> {
        let parent = dest.parent().unwrap_or(Path::new("."));
        let dest = dest.to_string_lossy();
        self.runner
            .run_network("git", &["clone", "-q", url, "--bare", &dest], parent)?;
        Ok(true)
    }

    fn clone_repo(&self, url: &str, dest: &Path, opts: &CloneOptions<'_>) -> VcsResult<()> {
        let parent = dest.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|e| super::VcsError::Spawn {
            program: "git".to_string(),
            message: format!("cannot create {}: {}", parent.display(), e),
        })?;
        self.runner
            .run_network("git", &clone_args(url, dest, opts), parent)?;
        Ok(())
    }

    fn set_remote_url(&self, path: &Path, url: &str) -> VcsResult<()> {
        self.runner
            .run("git", &["remote", "set-url", "origin", url], path)?;
        Ok(())
    }

    fn fetch(
        &self,
        path: &Path,
        selector: &RevisionSelector,
        depth: Option<u32>,
    ) -> VcsResult<()> {
        self.runner
            .run_network("git", &fetch_args(selector, depth), path)?;
        Ok(())
    }

    fn contains_revision(&self, path: &Path, selector: &RevisionSelector) -> VcsResult<bool> {
        let Some(target) = contains_target(selector) else {
            return Ok(false);
        };
        Ok(self
            .runner
            .output("git", &["cat-file", "-t", &target], path)?
            .success)
    }

    fn resolve_branch(&self, path: &Path, branch: &str) -> VcsResult<Option<String>> {
        let spec = format!("origin/{}", remove_ref_prefix(branch));
        Ok(self
            .runner
            .output("git", &["rev-parse", "--verify", "-q", &spec], path)?
            .stdout_if_success())
    }

    fn resolve_tag(&self, path: &Path, tag: &str) -> VcsResult<Option<String>> {
        Ok(self
            .runner
            .output("git", &["rev-list", "-n", "1", remove_ref_prefix(tag)], path)?
            .stdout_if_success())
    }

    fn branch_contains(&self, path: &Path, branch: &str, commit: &str) -> VcsResult<bool> {
        let remote = format!("origin/{}", remove_ref_prefix(branch));
        let output = self.runner.output(
            "git",
            &["branch", &remote, "-r", "--contains", commit],
            path,
        )?;
        Ok(output.success && !output.stdout.trim().is_empty())
    }

    fn checkout(
        &self,
        path: &Path,
        rev: &str,
        branch: Option<&str>,
        force: bool,
    ) -> VcsResult<()> {
        self.runner
            .run("git", &checkout_args(rev, branch, force), path)?;
        Ok(())
    }

    fn is_dirty(&self, path: &Path) -> VcsResult<bool> {
        let out = self.runner.output(
            "git",
            &["status", "--porcelain", "--untracked-files=no"],
            path,
        )?;
        Ok(!out.check()?.stdout.trim().is_empty())
    }

    fn commit_id(&self, path: &Path, rev: Option<&str>) -> VcsResult<Option<String>> {
        let rev = format!("{}^{{commit}}", rev.unwrap_or("HEAD"));
        Ok(self
            .runner
            .output("git", &["rev-parse", "--verify", "-q", &rev], path)?
            .stdout_if_success())
    }

    fn prepare_patches(&self, path: &Path, label: &str) -> VcsResult<()> {
        let branch = format!("patched-{}", remove_ref_prefix(label));
        self.runner
            .run("git", &["checkout", "-q", "-B", &branch], path)?;
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
            .run("git", &["apply", "--whitespace=nowarn", &patch], path)?;
        self.runner.run("git", &["add", "-A"], path)?;

        let env = [
            ("GIT_AUTHOR_NAME", identity.name.as_str()),
            ("GIT_AUTHOR_EMAIL", identity.email.as_str()),
            ("GIT_AUTHOR_DATE", date),
            ("GIT_COMMITTER_NAME", identity.name.as_str()),
            ("GIT_COMMITTER_EMAIL", identity.email.as_str()),
            ("GIT_COMMITTER_DATE", date),
        ];
        self.runner
            .output_with_env("git", &["commit", "-q", "-a", "-m", message], path, &env)?
            .check()?;
        Ok(())
    }

    fn patch_date(&self, patch: &Path) -> Option<String> {
        let content = fs::read_to_string(patch).ok()?;
        let line = content.lines().nth(2)?;
        line.strip_prefix("Date: ").map(|d| d.trim().to_string())
    }

    fn find_root(&self, dir: &Path) -> Option<PathBuf> {
        let out = self
            .runner
            .output(
                "git",
                &[
                    "rev-parse",
                    "--show-toplevel",
                    "--show-superproject-working-tree",
                ],
                dir,
            )
            .ok()?
            .stdout_if_success()?;
        // a submodule reports its superproject too; the superproject wins
        let mut roots: Vec<&str> = out.lines().filter(|l| !l.is_empty()).collect();
        roots.sort();
        roots.first().map(PathBuf::from)
    }

    fn remote_url(&self, path: &Path) -> Option<String> {
        self.runner
            .output("git", &["remote", "get-url", "origin"], path)
            .ok()?
            .stdout_if_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(commit: Option<&str>, branch: Option<&str>, tag: Option<&str>) -> RevisionSelector {
        RevisionSelector {
            commit: commit.map(str::to_string),
            branch: branch.map(str::to_string),
            tag: tag.map(str::to_string),
        }
    }

    #[test]
    fn test_remove_ref_prefix() {
        assert_eq!(remove_ref_prefix("refs/heads/main"), "heads/main");
        assert_eq!(remove_ref_prefix("main"), "main");
    }

    #[test]
    fn test_clone_args_plain() {
        let args = clone_args(
            "https://x/B.git",
            Path::new("/work/B"),
            &CloneOptions::default(),
        );
        assert_eq!(args, vec!["clone", "-q", "https://x/B.git", "/work/B"]);
    }

    #[test]
    fn test_clone_args_shallow_with_branch() {
        let opts = CloneOptions {
            depth: Some(1),
            branch: Some("refs/heads/kirkstone"),
            reference: None,
        };
        let args = clone_args("https://x/poky.git", Path::new("/work/poky"), &opts);
        assert_eq!(
            args,
            vec![
                "clone",
                "-q",
                "--depth",
                "1",
                "--branch",
                "kirkstone",
                "https://x/poky.git",
                "/work/poky"
            ]
        );
    }

    #[test]
    fn test_clone_args_from_reference() {
        let opts = CloneOptions {
            depth: None,
            branch: None,
            reference: Some(Path::new("/refs/x.poky.git")),
        };
        let args = clone_args("https://x/poky.git", Path::new("/work/poky"), &opts);
        assert_eq!(
            args,
            vec![
                "clone",
                "-q",
                "/refs/x.poky.git",
                "--reference",
                "/refs/x.poky.git",
                "/work/poky"
            ]
        );
    }

    #[test]
    fn test_fetch_args_tag() {
        let args = fetch_args(&selector(None, None, Some("v1.0")), None);
        assert_eq!(args, vec!["fetch", "-q", "origin", "+v1.0:refs/tags/v1.0"]);
    }

    #[test]
    fn test_fetch_args_shallow_commit() {
        let args = fetch_args(&selector(Some("deadbeef"), Some("main"), None), Some(1));
        assert_eq!(args, vec!["fetch", "-q", "--depth", "1", "origin", "deadbeef"]);
    }

    #[test]
    fn test_fetch_args_full_ref_branch() {
        let args = fetch_args(&selector(None, Some("refs/heads/next"), None), None);
        assert_eq!(
            args,
            vec![
                "fetch",
                "-q",
                "origin",
                "+heads/next:refs/remotes/origin/heads/next"
            ]
        );
    }

    #[test]
    fn test_fetch_args_plain_branch_fetches_everything() {
        let args = fetch_args(&selector(None, Some("main"), None), None);
        assert_eq!(args, vec!["fetch", "-q"]);
    }

    #[test]
    fn test_contains_target_prefers_commit() {
        assert_eq!(
            contains_target(&selector(Some("cafe"), Some("main"), None)),
            Some("cafe".to_string())
        );
        assert_eq!(
            contains_target(&selector(None, Some("refs/heads/main"), None)),
            Some("remotes/origin/heads/main".to_string())
        );
        assert_eq!(contains_target(&selector(None, None, None)), None);
    }

    #[test]
    fn test_checkout_args_branch() {
        let args = checkout_args("deadbeef", Some("refs/heads/main"), true);
        assert_eq!(
            args,
            vec!["checkout", "-q", "deadbeef", "-B", "main", "--force"]
        );
    }
}
