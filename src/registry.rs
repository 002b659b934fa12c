//! Live checkout state of every repository in a run

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::repospec::{RepoSpec, RevisionSelector};

/// Where a repository stands in the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoStatus {
    /// Scheduled, not yet at its target revision.
    Pending,
    /// Checked out at its target and usable for includes.
    Ready,
    /// The last checkout attempt failed.
    Failed,
    /// A patch did not apply; the tree is left in its conflict state.
    Unusable,
}

/// Live state of one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoState {
    pub id: String,
    pub path: PathBuf,
    pub url: Option<String>,
    pub target: RevisionSelector,
    pub commit: Option<String>,
    pub dirty: bool,
    pub patched: bool,
    pub status: RepoStatus,
}

impl RepoState {
    fn for_spec(spec: &RepoSpec) -> Self {
        Self {
            id: spec.id.clone(),
            path: spec.path.clone(),
            url: spec.url.clone(),
            target: spec.selector.clone(),
            commit: None,
            dirty: false,
            patched: false,
            status: RepoStatus::Pending,
        }
    }

    /// Whether this state was produced for exactly `spec`'s target.
    pub fn matches(&self, spec: &RepoSpec) -> bool {
        self.path == spec.path && self.url == spec.url && self.target == spec.selector
    }
}

/// Shared registry of repository states, plus the per-path locks that
/// serialise VCS operations on one checkout directory.
///
/// This is the only shared mutable structure of a run. The checkout
/// scheduler and the patch applicator mutate it; everyone else reads
/// snapshots.
#[derive(Debug, Default)]
pub struct RepoRegistry {
    states: Mutex<BTreeMap<String, RepoState>>,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RepoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock guarding VCS operations on `path`.
    pub fn path_lock(&self, path: &Path) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.path_locks.lock().map_err(|_| Error::LockPoisoned {
            context: "path lock table".to_string(),
        })?;
        Ok(locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    fn with_states<T>(&self, f: impl FnOnce(&mut BTreeMap<String, RepoState>) -> T) -> Result<T> {
        let mut states = self.states.lock().map_err(|_| Error::LockPoisoned {
            context: "repository registry".to_string(),
        })?;
        Ok(f(&mut states))
    }

    /// Start tracking `spec`, replacing any state for an older target.
    pub fn begin(&self, spec: &RepoSpec) -> Result<()> {
        self.with_states(|states| {
            states.insert(spec.id.clone(), RepoState::for_spec(spec));
        })
    }

    pub fn record_ready(&self, id: &str, commit: Option<String>, dirty: bool) -> Result<()> {
        self.update(id, |state| {
            state.commit = commit;
            state.dirty = dirty;
            state.status = RepoStatus::Ready;
        })
    }

    pub fn record_failed(&self, id: &str) -> Result<()> {
        self.update(id, |state| state.status = RepoStatus::Failed)
    }

    pub fn record_patched(&self, id: &str, commit: Option<String>) -> Result<()> {
        self.update(id, |state| {
            state.patched = true;
            if commit.is_some() {
                state.commit = commit;
            }
        })
    }

    pub fn mark_unusable(&self, id: &str) -> Result<()> {
        self.update(id, |state| state.status = RepoStatus::Unusable)
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut RepoState)) -> Result<()> {
        self.with_states(|states| {
            if let Some(state) = states.get_mut(id) {
                f(state);
            }
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<RepoState>> {
        self.with_states(|states| states.get(id).cloned())
    }

    /// Whether `spec` is checked out at its current target.
    pub fn is_ready_for(&self, spec: &RepoSpec) -> Result<bool> {
        self.with_states(|states| {
            states
                .get(&spec.id)
                .is_some_and(|s| s.status == RepoStatus::Ready && s.matches(spec))
        })
    }

    /// Whether the last attempt for exactly this target failed.
    pub fn has_failed_for(&self, spec: &RepoSpec) -> Result<bool> {
        self.with_states(|states| {
            states
                .get(&spec.id)
                .is_some_and(|s| s.status == RepoStatus::Failed && s.matches(spec))
        })
    }

    /// Checkout path of a ready repository.
    pub fn ready_path(&self, id: &str) -> Result<Option<PathBuf>> {
        self.with_states(|states| {
            states
                .get(id)
                .filter(|s| s.status == RepoStatus::Ready)
                .map(|s| s.path.clone())
        })
    }

    /// Resolved commit of a repository, if known.
    pub fn commit(&self, id: &str) -> Result<Option<String>> {
        self.with_states(|states| states.get(id).and_then(|s| s.commit.clone()))
    }

    pub fn snapshot(&self) -> Result<BTreeMap<String, RepoState>> {
        self.with_states(|states| states.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::VcsKind;

    fn spec(id: &str, commit: &str) -> RepoSpec {
        RepoSpec {
            id: id.to_string(),
            name: id.to_string(),
            url: Some(format!("https://x/{}.git", id)),
            kind: VcsKind::Git,
            selector: RevisionSelector {
                commit: Some(commit.to_string()),
                branch: None,
                tag: None,
            },
            path: PathBuf::from(format!("/work/{}", id)),
            layers: vec![String::new()],
            patches: Vec::new(),
            signed: false,
            allowed_signers: Vec::new(),
            operations_disabled: false,
        }
    }

    #[test]
    fn test_lifecycle() {
        let registry = RepoRegistry::new();
        let b = spec("B", "aaa");
        registry.begin(&b).unwrap();
        assert!(!registry.is_ready_for(&b).unwrap());
        assert_eq!(registry.ready_path("B").unwrap(), None);

        registry
            .record_ready("B", Some("aaa".to_string()), false)
            .unwrap();
        assert!(registry.is_ready_for(&b).unwrap());
        assert_eq!(
            registry.ready_path("B").unwrap(),
            Some(PathBuf::from("/work/B"))
        );
        assert_eq!(registry.commit("B").unwrap().as_deref(), Some("aaa"));
    }

    #[test]
    fn test_new_target_is_not_ready() {
        let registry = RepoRegistry::new();
        registry.begin(&spec("C", "deadbeef")).unwrap();
        registry.record_ready("C", None, false).unwrap();
        assert!(!registry.is_ready_for(&spec("C", "cafef00d")).unwrap());
    }

    #[test]
    fn test_failure_is_target_specific() {
        let registry = RepoRegistry::new();
        let c = spec("C", "deadbeef");
        registry.begin(&c).unwrap();
        registry.record_failed("C").unwrap();
        assert!(registry.has_failed_for(&c).unwrap());
        assert!(!registry.has_failed_for(&spec("C", "cafef00d")).unwrap());
    }

    #[test]
    fn test_unusable_is_not_ready() {
        let registry = RepoRegistry::new();
        let c = spec("C", "deadbeef");
        registry.begin(&c).unwrap();
        registry.record_ready("C", None, false).unwrap();
        registry.mark_unusable("C").unwrap();
        assert!(!registry.is_ready_for(&c).unwrap());
        assert_eq!(
            registry.get("C").unwrap().map(|s| s.status),
            Some(RepoStatus::Unusable)
        );
    }

    #[test]
    fn test_path_lock_is_shared_per_path() {
        let registry = RepoRegistry::new();
        let a = registry.path_lock(Path::new("/work/A")).unwrap();
        let a2 = registry.path_lock(Path::new("/work/A")).unwrap();
        let b = registry.path_lock(Path::new("/work/B")).unwrap();
        assert!(Arc::ptr_eq(&a, &a2));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
