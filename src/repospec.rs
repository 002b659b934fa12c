//! # Repository Specifications
//!
//! A [`RepoSpec`] is the declared intent for one repository, built from an
//! entry of the merged `repos` mapping plus the `defaults.repos` node. Specs
//! are plain values: the resolver rebuilds them from every provisional merge
//! and overrides produce a new list instead of mutating the old one.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use url::Url;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::vcs::VcsKind;

/// Layer values that disable a layer.
const DISABLED_LAYER_VALUES: &[&str] = &["disabled", "excluded", "n", "no", "0", "false"];

/// Which revision of a repository is wanted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct RevisionSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl RevisionSelector {
    pub fn is_empty(&self) -> bool {
        self.commit.is_none() && self.branch.is_none() && self.tag.is_none()
    }

    /// Short human-readable form, e.g. `branch main @ deadbeef`.
    pub fn describe(&self) -> String {
        let symbolic = match (&self.branch, &self.tag) {
            (Some(b), _) => Some(format!("branch {}", b)),
            (None, Some(t)) => Some(format!("tag {}", t)),
            (None, None) => None,
        };
        match (symbolic, &self.commit) {
            (Some(s), Some(c)) => format!("{} @ {}", s, c),
            (Some(s), None) => s,
            (None, Some(c)) => format!("commit {}", c),
            (None, None) => "no revision".to_string(),
        }
    }

    /// Label used for the patch branch.
    pub fn patch_label(&self) -> &str {
        self.branch
            .as_deref()
            .or(self.tag.as_deref())
            .or(self.commit.as_deref())
            .unwrap_or("HEAD")
    }
}

/// One patch or quilt patch set of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchSpec {
    pub id: String,
    /// Repository whose checkout the patch path is relative to.
    pub repo: String,
    pub path: String,
}

/// Declared specification of one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub kind: VcsKind,
    pub selector: RevisionSelector,
    pub path: PathBuf,
    /// Enabled layer names, relative to `path`.
    pub layers: Vec<String>,
    /// Sorted by id.
    pub patches: Vec<PatchSpec>,
    pub signed: bool,
    pub allowed_signers: Vec<String>,
    /// No url: the repository is used as found on disk.
    pub operations_disabled: bool,
}

impl RepoSpec {
    /// Build a spec from one `repos` entry. `defaults` is the
    /// `defaults.repos` node; `fallback_root` is where url-less repos without
    /// a path live.
    pub fn from_entry(
        id: &str,
        entry: &Value,
        defaults: Option<&Mapping>,
        fallback_root: &Path,
        ctx: &Context,
    ) -> Result<Self> {
        let empty = Mapping::new();
        let entry = match entry {
            Value::Null => &empty,
            Value::Mapping(m) => m,
            _ => {
                return Err(Error::InvalidRepo {
                    repo: id.to_string(),
                    message: "repo entry must be a mapping or null".to_string(),
                })
            }
        };
        let default = |key: &str| defaults.and_then(|d| get_string(d, key));

        let name = get_string(entry, "name").unwrap_or_else(|| id.to_string());
        let url = get_string(entry, "url");
        let kind_str = get_string(entry, "type").unwrap_or_else(|| "git".to_string());
        let kind = VcsKind::from_config(&kind_str).ok_or_else(|| Error::InvalidRepo {
            repo: id.to_string(),
            message: format!("repo type \"{}\" not supported", kind_str),
        })?;

        let selector = RevisionSelector {
            commit: get_string(entry, "commit"),
            branch: get_string(entry, "branch").or_else(|| default("branch")),
            tag: get_string(entry, "tag").or_else(|| default("tag")),
        };

        if url.is_some() && selector.is_empty() {
            return Err(Error::InvalidRepo {
                repo: id.to_string(),
                message: "no commit, tag or branch specified; this is only allowed for \
                          local repositories"
                    .to_string(),
            });
        }
        if selector.branch.is_some() && selector.tag.is_some() {
            return Err(Error::InvalidRepo {
                repo: id.to_string(),
                message: "branch and tag cannot be combined".to_string(),
            });
        }

        let signed = entry
            .get("signed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let allowed_signers: Vec<String> = match entry.get("allowed_signers") {
            Some(Value::Sequence(seq)) => seq.iter().filter_map(scalar_to_string).collect(),
            _ => Vec::new(),
        };
        if signed && allowed_signers.is_empty() {
            return Err(Error::InvalidRepo {
                repo: id.to_string(),
                message: "repository is signed but no allowed signers specified".to_string(),
            });
        }

        let path = match get_string(entry, "path") {
            Some(p) => ctx.work_path(Path::new(&p)),
            None if url.is_none() => fallback_root.to_path_buf(),
            None => ctx.work_dir.join(&name),
        };

        let default_patch_repo = defaults
            .and_then(|d| d.get("patches"))
            .and_then(Value::as_mapping)
            .and_then(|p| get_string(p, "repo"));

        Ok(RepoSpec {
            id: id.to_string(),
            name,
            operations_disabled: url.is_none(),
            url,
            kind,
            selector,
            path,
            layers: parse_layers(entry.get("layers")),
            patches: parse_patches(id, entry.get("patches"), default_patch_repo)?,
            signed,
            allowed_signers,
        })
    }

    /// Absolute paths of the enabled layers.
    pub fn layer_paths(&self) -> Vec<String> {
        self.layers
            .iter()
            .map(|layer| {
                let joined = if layer.is_empty() {
                    format!("{}/", self.path.display())
                } else {
                    self.path.join(layer).display().to_string()
                };
                joined.trim_end_matches(['/', '.']).to_string()
            })
            .collect()
    }

    /// URL used for clone and fetch, after mirror rewriting.
    pub fn effective_url(&self, ctx: &Context) -> Option<String> {
        let url = self.url.as_deref()?;
        for (pattern, replacement) in &ctx.mirrors {
            if pattern.find(url).is_some_and(|m| m.start() == 0) {
                return Some(pattern.replace_all(url, replacement.as_str()).into_owned());
            }
        }
        Some(url.to_string())
    }

    /// Filesystem-safe name derived from the url, used for reference caches.
    pub fn qualified_name(&self) -> Option<String> {
        self.url.as_deref().map(qualified_name)
    }

    /// Advisory messages about risky selectors.
    pub fn lint(&self, update: bool) -> Vec<String> {
        let mut messages = Vec::new();
        if self.selector.tag.is_some() && self.selector.commit.is_none() {
            messages.push(format!(
                "Using tag without commit for repository \"{}\" is unsafe as tags are mutable.",
                self.name
            ));
        }
        if let Some(commit) = &self.selector.commit {
            if self.kind == VcsKind::Git && !is_full_hash(commit) {
                messages.push(format!(
                    "{} is not a full-length hash for repo \"{}\".",
                    commit, self.name
                ));
            }
            if update && !self.operations_disabled {
                messages.push(format!(
                    "Update of \"{}\" requested, but repo is pinned to a fixed commit. \
                     Not updating.",
                    self.name
                ));
            }
        }
        messages
    }

    /// Whether a different spec for the same id points somewhere else.
    pub fn same_location(&self, other: &RepoSpec) -> bool {
        self.url == other.url && self.path == other.path
    }
}

/// `<host><path>` with `@ : / *` replaced by `.`.
pub fn qualified_name(url: &str) -> String {
    let raw = match Url::parse(url) {
        Ok(parsed) => {
            let mut netloc = String::new();
            if !parsed.username().is_empty() {
                netloc.push_str(parsed.username());
                netloc.push('@');
            }
            netloc.push_str(parsed.host_str().unwrap_or_default());
            if let Some(port) = parsed.port() {
                netloc.push_str(&format!(":{}", port));
            }
            format!("{}{}", netloc, parsed.path())
        }
        // scp-like `user@host:path` urls carry no scheme
        Err(_) => url.to_string(),
    };
    raw.chars()
        .map(|c| if matches!(c, '@' | ':' | '/' | '*') { '.' } else { c })
        .collect()
}

fn is_full_hash(commit: &str) -> bool {
    (commit.len() == 40 || commit.len() == 64)
        && commit.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Build specs for every entry of the merged `repos` mapping, in mapping order.
pub fn repos_from_config(
    body: &Mapping,
    fallback_root: &Path,
    ctx: &Context,
) -> Result<Vec<RepoSpec>> {
    let defaults = body
        .get("defaults")
        .and_then(Value::as_mapping)
        .and_then(|d| d.get("repos"))
        .and_then(Value::as_mapping);
    let Some(repos) = body.get("repos").and_then(Value::as_mapping) else {
        return Ok(Vec::new());
    };
    repos
        .iter()
        .map(|(id, entry)| {
            let id = scalar_to_string(id).unwrap_or_default();
            RepoSpec::from_entry(&id, entry, defaults, fallback_root, ctx)
        })
        .collect()
}

/// Apply `overrides.repos.<id>.commit` from the merged body. Only `commit`
/// changes; everything else in each spec is left as declared. Overrides for
/// unknown repositories are reported once and ignored.
pub fn apply_overrides(specs: &[RepoSpec], body: &Mapping, warn_unknown: bool) -> Vec<RepoSpec> {
    let overrides = body
        .get("overrides")
        .and_then(Value::as_mapping)
        .and_then(|o| o.get("repos"))
        .and_then(Value::as_mapping);
    let Some(overrides) = overrides else {
        return specs.to_vec();
    };

    if warn_unknown {
        let known: BTreeSet<&str> = specs.iter().map(|s| s.id.as_str()).collect();
        for id in overrides.keys().filter_map(Value::as_str) {
            if !known.contains(id) {
                warn!("Override for unknown repository \"{}\" ignored", id);
            }
        }
    }

    specs
        .iter()
        .map(|spec| {
            let mut spec = spec.clone();
            let commit = overrides
                .get(spec.id.as_str())
                .and_then(Value::as_mapping)
                .and_then(|o| get_string(o, "commit"));
            if let Some(commit) = commit {
                spec.selector.commit = Some(commit);
            }
            spec
        })
        .collect()
}

fn parse_layers(layers: Option<&Value>) -> Vec<String> {
    let Some(Value::Mapping(layers)) = layers else {
        return vec![String::new()];
    };
    layers
        .iter()
        .filter_map(|(name, value)| {
            let name = scalar_to_string(name)?;
            if is_disabled_layer(value) {
                return None;
            }
            if !matches!(value, Value::Null) {
                warn!(
                    "Use of deprecated value \"{}\" for layer \"{}\". Replace with \"disabled\".",
                    scalar_to_string(value).unwrap_or_default(),
                    name
                );
            }
            Some(name)
        })
        .collect()
}

fn is_disabled_layer(value: &Value) -> bool {
    match value {
        Value::Null => false,
        other => scalar_to_string(other)
            .map(|s| DISABLED_LAYER_VALUES.contains(&s.to_lowercase().as_str()))
            .unwrap_or(false),
    }
}

fn parse_patches(
    repo: &str,
    patches: Option<&Value>,
    default_repo: Option<String>,
) -> Result<Vec<PatchSpec>> {
    let Some(Value::Mapping(patches)) = patches else {
        return Ok(Vec::new());
    };
    let mut specs = Vec::new();
    for (id, entry) in patches {
        let Some(id) = scalar_to_string(id) else {
            continue;
        };
        let Value::Mapping(entry) = entry else {
            continue;
        };
        let owner = get_string(entry, "repo")
            .or_else(|| default_repo.clone())
            .ok_or_else(|| Error::InvalidRepo {
                repo: repo.to_string(),
                message: format!(
                    "no repo specified for patch entry \"{}\" and no default repo specified",
                    id
                ),
            })?;
        let path = get_string(entry, "path").ok_or_else(|| Error::InvalidRepo {
            repo: repo.to_string(),
            message: format!("patch entry \"{}\" has no path", id),
        })?;
        specs.push(PatchSpec {
            id,
            repo: owner,
            path,
        });
    }
    specs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(specs)
}

/// String form of a scalar YAML value.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn get_string(map: &Mapping, key: &str) -> Option<String> {
    map.get(key).and_then(scalar_to_string)
}
