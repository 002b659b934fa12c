//! Include resolver
//!
//! Drives the include/checkout fixpoint. Each iteration walks every known
//! document depth first, merges what could be resolved into a provisional
//! configuration, derives the repository specs from it and hands the ones not
//! yet at their target to the checkout scheduler. Includes into repositories
//! that are not checked out yet are deferred and retried on the next pass.
//! The loop ends when an iteration has nothing left to check out.
//!
//! The walk uses an explicit stack instead of recursion, so deep include
//! chains cannot overflow, and parsed documents are cached by path until the
//! repository they live in is checked out again.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use serde_yaml::Value;

use crate::document::{lockfile_path, ConfigDocument, IncludeRef, SchemaValidator};
use crate::error::{Error, Result};
use crate::merge::{merge_documents, MergedBody};
use crate::phases::checkout::checkout_batch;
use crate::repository::RepositoryManager;
use crate::repospec::{apply_overrides, get_string, repos_from_config, RepoSpec};
use crate::vcs::VcsSet;

/// The top-level documents of a run and the repository they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryScope {
    /// Absolute paths, in command-line order.
    pub files: Vec<PathBuf>,
    /// Checkout root shared by all files, if they are versioned.
    pub root: Option<PathBuf>,
}

impl EntryScope {
    /// Determine the scope of `files`, rejecting combinations that span
    /// several repositories or mix versioned and unversioned files.
    pub fn detect(vcs: &VcsSet, files: &[PathBuf]) -> Result<Self> {
        let mut resolved = Vec::with_capacity(files.len());
        let mut roots = Vec::with_capacity(files.len());
        for file in files {
            let path = fs::canonicalize(file).map_err(|e| Error::Parse {
                path: file.clone(),
                message: e.to_string(),
            })?;
            let dir = path.parent().unwrap_or(Path::new("/"));
            roots.push(vcs.find_root(dir).map(|(root, _)| root));
            resolved.push(path);
        }

        let first = roots.first().cloned().flatten();
        if roots.iter().any(|r| *r != first) {
            let message = resolved
                .iter()
                .zip(&roots)
                .map(|(file, root)| match root {
                    Some(root) => format!("{} in {}", file.display(), root.display()),
                    None => format!("{} outside any repository", file.display()),
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Error::MixedScopes { message });
        }
        Ok(Self {
            files: resolved,
            root: first,
        })
    }

    /// Where repositories without url and path live.
    pub fn fallback_root(&self) -> PathBuf {
        match &self.root {
            Some(root) => root.clone(),
            None => self
                .files
                .first()
                .and_then(|f| f.parent())
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }
}

/// A `{repo, file}` include whose repository is not available yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingInclude {
    pub repo: String,
    pub file: String,
    /// Document containing the include.
    pub document: PathBuf,
}

/// Repository a document was reached through, for the redefinition guard.
#[derive(Debug, Clone)]
struct IncludedFrom {
    repo: String,
    url: Option<String>,
    /// Document whose `{repo, file}` include entered the repository.
    via: PathBuf,
}

#[derive(Debug, Clone)]
struct Origin {
    owning_repo: Option<String>,
    root: Option<PathBuf>,
    /// Every `{repo, file}` hop that led here, outermost first.
    included_from: Vec<IncludedFrom>,
}

enum Frame {
    Enter { path: PathBuf, origin: Origin },
    Exit(Arc<ConfigDocument>),
}

/// Result of one walk over the known documents.
#[derive(Debug, Default)]
pub struct Walk {
    /// Documents in merge order: includes before includers, lock files
    /// right after their companion.
    pub documents: Vec<Arc<ConfigDocument>>,
    pub pending: Vec<PendingInclude>,
}

/// State at the fixpoint.
#[derive(Debug)]
pub struct Resolution {
    pub documents: Vec<Arc<ConfigDocument>>,
    pub merged: MergedBody,
    /// Final specs with overrides applied, in `repos` order.
    pub specs: Vec<RepoSpec>,
    pub iterations: usize,
}

type CacheKey = (PathBuf, Option<String>);

/// Fixpoint driver over one [`EntryScope`].
pub struct IncludeResolver<'a> {
    manager: &'a RepositoryManager,
    validator: &'a dyn SchemaValidator,
    scope: EntryScope,
    cache: HashMap<CacheKey, Arc<ConfigDocument>>,
    /// Deferred failures of repositories nothing was blocked on.
    failures: BTreeMap<String, Error>,
}

impl<'a> IncludeResolver<'a> {
    pub fn new(
        manager: &'a RepositoryManager,
        validator: &'a dyn SchemaValidator,
        scope: EntryScope,
    ) -> Self {
        Self {
            manager,
            validator,
            scope,
            cache: HashMap::new(),
            failures: BTreeMap::new(),
        }
    }

    /// Run the fixpoint to completion.
    pub fn resolve(&mut self) -> Result<Resolution> {
        let ctx = self.manager.context().clone();
        let registry = self.manager.registry().clone();
        let fallback_root = self.scope.fallback_root();
        let mut known: BTreeMap<String, RepoSpec> = BTreeMap::new();
        let mut iteration = 0;

        loop {
            if ctx.interrupt.is_set() {
                return Err(Error::Interrupted);
            }
            iteration += 1;
            if iteration > ctx.max_iterations {
                return Err(Error::IterationLimit {
                    iterations: ctx.max_iterations,
                });
            }

            let walk = self.walk(&known)?;
            let merged = merge_documents(walk.documents.iter().map(AsRef::as_ref));
            let specs = apply_overrides(
                &repos_from_config(&merged.body, &fallback_root, &ctx)?,
                &merged.body,
                false,
            );
            debug!(
                "Iteration {}: {} documents, {} repositories, {} pending includes",
                iteration,
                walk.documents.len(),
                specs.len(),
                walk.pending.len()
            );

            let mut todo = Vec::new();
            for spec in &specs {
                if !registry.is_ready_for(spec)? && !registry.has_failed_for(spec)? {
                    todo.push(spec.clone());
                }
            }
            known = specs.iter().map(|s| (s.id.clone(), s.clone())).collect();

            if todo.is_empty() {
                return self.finish(walk, merged, specs, &known, iteration);
            }

            let report = checkout_batch(self.manager, &todo)?;
            for id in report.synced.keys() {
                if let Some(spec) = known.get(id) {
                    self.cache.retain(|(path, _), _| !path.starts_with(&spec.path));
                }
            }

            let mut blocking = Vec::new();
            for (id, err) in report.failures {
                if matches!(err, Error::Interrupted) || err.is_structural() {
                    return Err(err);
                }
                if walk.pending.iter().any(|p| p.repo == id) {
                    blocking.push((id, err));
                } else {
                    self.failures.insert(id, err);
                }
            }
            if !blocking.is_empty() {
                return Err(Error::RepositoryFailures { failures: blocking });
            }
        }
    }

    fn finish(
        &mut self,
        walk: Walk,
        merged: MergedBody,
        specs: Vec<RepoSpec>,
        known: &BTreeMap<String, RepoSpec>,
        iterations: usize,
    ) -> Result<Resolution> {
        let mut blocked: Vec<(String, Error)> = Vec::new();
        let mut unresolvable = Vec::new();
        for pending in &walk.pending {
            if blocked.iter().any(|(repo, _)| *repo == pending.repo) {
                continue;
            }
            let failure = known
                .contains_key(&pending.repo)
                .then(|| self.failures.remove(&pending.repo))
                .flatten();
            match failure {
                Some(err) => blocked.push((pending.repo.clone(), err)),
                None => unresolvable.push(Error::UnresolvableInclude {
                    repo: pending.repo.clone(),
                    file: pending.file.clone(),
                    document: pending.document.clone(),
                }),
            }
        }
        if !blocked.is_empty() {
            return Err(Error::RepositoryFailures { failures: blocked });
        }
        if unresolvable.len() == 1 {
            return Err(unresolvable.remove(0));
        }
        if !unresolvable.is_empty() {
            return Err(Error::UnresolvableIncludes {
                includes: unresolvable,
            });
        }

        let ctx = self.manager.context();
        let registry = self.manager.registry();
        // re-applied to report unknown ids once
        let specs = apply_overrides(&specs, &merged.body, true);
        let mut failures = Vec::new();
        for spec in &specs {
            for message in spec.lint(ctx.update) {
                warn!("{}", message);
            }
            if registry.has_failed_for(spec)? {
                if let Some(err) = self.failures.remove(&spec.id) {
                    failures.push((spec.id.clone(), err));
                }
            }
        }
        if !failures.is_empty() {
            return Err(Error::RepositoryFailures { failures });
        }

        info!(
            "Configuration resolved after {} iteration{}",
            iterations,
            if iterations == 1 { "" } else { "s" }
        );
        Ok(Resolution {
            documents: walk.documents,
            merged,
            specs,
            iterations,
        })
    }

    /// Walk all top-level documents depth first, expanding includes.
    pub fn walk(&mut self, known: &BTreeMap<String, RepoSpec>) -> Result<Walk> {
        let registry = self.manager.registry().clone();
        let mut walk = Walk::default();
        let mut active: Vec<PathBuf> = Vec::new();
        let mut stack: Vec<Frame> = self
            .scope
            .files
            .iter()
            .rev()
            .map(|path| Frame::Enter {
                path: path.clone(),
                origin: Origin {
                    owning_repo: None,
                    root: self.scope.root.clone(),
                    included_from: Vec::new(),
                },
            })
            .collect();

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter { path, origin } => {
                    if let Some(pos) = active.iter().position(|p| *p == path) {
                        let mut cycle: Vec<String> =
                            active[pos..].iter().map(|p| p.display().to_string()).collect();
                        cycle.push(path.display().to_string());
                        return Err(Error::IncludeCycle {
                            cycle: cycle.join(" -> "),
                        });
                    }

                    let doc = self.load(&path, &origin)?;
                    for from in &origin.included_from {
                        check_redefinition(&doc, from)?;
                    }
                    active.push(path);
                    stack.push(Frame::Exit(doc.clone()));

                    let base = doc.include_base();
                    for include in doc.includes.iter().rev() {
                        match include {
                            IncludeRef::Path(file) => stack.push(Frame::Enter {
                                path: base.join(file),
                                origin: origin.clone(),
                            }),
                            IncludeRef::Repo { repo, file } => {
                                let ready = match known.get(repo) {
                                    Some(spec) => registry.is_ready_for(spec)?.then_some(spec),
                                    None => None,
                                };
                                match ready {
                                    Some(spec) => {
                                        let mut chain = origin.included_from.clone();
                                        chain.push(IncludedFrom {
                                            repo: repo.clone(),
                                            url: spec.url.clone(),
                                            via: doc.path.clone(),
                                        });
                                        stack.push(Frame::Enter {
                                            path: spec.path.join(file),
                                            origin: Origin {
                                                owning_repo: Some(repo.clone()),
                                                root: Some(spec.path.clone()),
                                                included_from: chain,
                                            },
                                        })
                                    }
                                    None => {
                                        debug!(
                                            "Deferring include of {} from repo \"{}\"",
                                            file, repo
                                        );
                                        let pending = PendingInclude {
                                            repo: repo.clone(),
                                            file: file.clone(),
                                            document: doc.path.clone(),
                                        };
                                        if !walk.pending.contains(&pending) {
                                            walk.pending.push(pending);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                Frame::Exit(doc) => {
                    active.pop();
                    let lock = self.lock_for(&doc)?;
                    walk.documents.push(doc);
                    if let Some(lock) = lock {
                        walk.documents.push(lock);
                    }
                }
            }
        }
        Ok(walk)
    }

    fn load(&mut self, path: &Path, origin: &Origin) -> Result<Arc<ConfigDocument>> {
        let key = (path.to_path_buf(), origin.owning_repo.clone());
        if let Some(doc) = self.cache.get(&key) {
            return Ok(doc.clone());
        }
        debug!("Loading {}", path.display());
        let doc = Arc::new(ConfigDocument::load(
            path,
            origin.owning_repo.clone(),
            origin.root.clone(),
            self.validator,
        )?);
        self.cache.insert(key, doc.clone());
        Ok(doc)
    }

    /// Companion lock document of `doc`, if one exists on disk.
    fn lock_for(&mut self, doc: &ConfigDocument) -> Result<Option<Arc<ConfigDocument>>> {
        let Some(path) = lockfile_path(&doc.path).filter(|p| p.is_file()) else {
            return Ok(None);
        };
        let key = (path.clone(), doc.owning_repo.clone());
        if let Some(lock) = self.cache.get(&key) {
            return Ok(Some(lock.clone()));
        }
        let lock = Arc::new(ConfigDocument::load(
            &path,
            doc.owning_repo.clone(),
            doc.root.clone(),
            self.validator,
        )?);
        for key in unexpected_lock_keys(&lock) {
            warn!(
                "Lock file {} sets \"{}\", which lock files are not meant to change",
                path.display(),
                key
            );
        }
        self.cache.insert(key, lock.clone());
        Ok(Some(lock))
    }
}

/// An included document may not change the url of the repository it was
/// included from.
fn check_redefinition(doc: &ConfigDocument, from: &IncludedFrom) -> Result<()> {
    let entry = doc
        .body
        .get("repos")
        .and_then(Value::as_mapping)
        .and_then(|repos| repos.get(from.repo.as_str()))
        .and_then(Value::as_mapping);
    let Some(declared) = entry.and_then(|e| get_string(e, "url")) else {
        return Ok(());
    };
    if from.url.as_deref() == Some(declared.as_str()) {
        return Ok(());
    }
    Err(Error::ConflictingRepoDefinition {
        repo: from.repo.clone(),
        first: from.via.display().to_string(),
        second: doc.path.display().to_string(),
        message: format!(
            "url changed from {} to {}",
            from.url.as_deref().unwrap_or("none"),
            declared
        ),
    })
}

/// Dotted paths of lock-document keys other than `header.version` and
/// `overrides.repos.<id>.commit`.
fn unexpected_lock_keys(lock: &ConfigDocument) -> Vec<String> {
    let mut keys = Vec::new();
    for (key, value) in &lock.body {
        let key = key.as_str().unwrap_or_default();
        match key {
            "header" => {
                if let Some(header) = value.as_mapping() {
                    keys.extend(
                        header
                            .keys()
                            .filter_map(Value::as_str)
                            .filter(|k| *k != "version")
                            .map(|k| format!("header.{}", k)),
                    );
                }
            }
            "overrides" => {
                let Some(overrides) = value.as_mapping() else {
                    continue;
                };
                for (okey, ovalue) in overrides {
                    let okey = okey.as_str().unwrap_or_default();
                    if okey != "repos" {
                        keys.push(format!("overrides.{}", okey));
                        continue;
                    }
                    for (id, entry) in ovalue.as_mapping().into_iter().flatten() {
                        let id = id.as_str().unwrap_or_default();
                        keys.extend(
                            entry
                                .as_mapping()
                                .into_iter()
                                .flat_map(|m| m.keys())
                                .filter_map(Value::as_str)
                                .filter(|k| *k != "commit")
                                .map(|k| format!("overrides.repos.{}.{}", id, k)),
                        );
                    }
                }
            }
            other => keys.push(other.to_string()),
        }
    }
    keys
}
