//! # Merged Configuration
//!
//! [`MergedConfig`] is the single result of a resolution run: the flattened
//! body mapping, the resolved format version, the final repository specs and
//! the commit each repository ended up at. Build-file generators and the
//! inspection commands consume it through derived views rather than by
//! poking at the raw mapping.
//!
//! ## Derived views
//!
//! - [`MergedConfig::layers`] lists enabled layer paths sorted by repository
//!   name, then layer path.
//! - [`MergedConfig::bblayers_conf_header`] and
//!   [`MergedConfig::local_conf_header`] concatenate their fragments in
//!   ascending id order, independent of document order.
//! - `machine`, `distro`, `targets` and `task` fall back to the usual
//!   defaults, and pins from the run context take precedence over the files.
//!
//! ## Serialisation
//!
//! [`MergedConfig::dump`] turns the result back into a document of the input
//! shape and [`MergedConfig::lock_document`] produces the companion lock
//! document. Both can be rendered as YAML or JSON with [`render`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_yaml::{Mapping, Value};

use crate::context::EnvOverrides;
use crate::document::{lockfile_path, SUPPORTED_FILE_VERSION};
use crate::error::{Error, Result};
use crate::repospec::{scalar_to_string, RepoSpec};

pub const DEFAULT_MACHINE: &str = "qemux86-64";
pub const DEFAULT_DISTRO: &str = "poky";
pub const DEFAULT_TARGET: &str = "core-image-minimal";
pub const DEFAULT_TASK: &str = "build";

/// Output format of dumped documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentFormat {
    #[default]
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Format implied by a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Some(DocumentFormat::Yaml),
            Some("json") => Some(DocumentFormat::Json),
            _ => None,
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(DocumentFormat::Yaml),
            "json" => Ok(DocumentFormat::Json),
            other => Err(format!("unknown format \"{}\"", other)),
        }
    }
}

/// Resolved location of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoView {
    pub path: PathBuf,
    pub commit: Option<String>,
    pub layers: Vec<String>,
}

/// Repositories in declaration order, serialised as a mapping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReposView(pub Vec<(String, RepoView)>);

impl ReposView {
    pub fn get(&self, id: &str) -> Option<&RepoView> {
        self.0.iter().find(|(key, _)| key == id).map(|(_, view)| view)
    }
}

impl Serialize for ReposView {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, view) in &self.0 {
            map.serialize_entry(id, view)?;
        }
        map.end()
    }
}

/// Final configuration of a run.
#[derive(Debug, Clone)]
pub struct MergedConfig {
    body: Mapping,
    version: i64,
    repos: Vec<RepoSpec>,
    commits: BTreeMap<String, Option<String>>,
    env_overrides: EnvOverrides,
    entry_files: Vec<PathBuf>,
}

impl MergedConfig {
    pub fn new(
        body: Mapping,
        version: i64,
        repos: Vec<RepoSpec>,
        commits: BTreeMap<String, Option<String>>,
        env_overrides: EnvOverrides,
        entry_files: Vec<PathBuf>,
    ) -> Self {
        Self {
            body,
            version,
            repos,
            commits,
            env_overrides,
            entry_files,
        }
    }

    pub fn body(&self) -> &Mapping {
        &self.body
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn repos(&self) -> &[RepoSpec] {
        &self.repos
    }

    pub fn repo(&self, id: &str) -> Option<&RepoSpec> {
        self.repos.iter().find(|r| r.id == id)
    }

    /// Commit a repository was checked out at.
    pub fn commit(&self, id: &str) -> Option<&str> {
        self.commits.get(id).and_then(|c| c.as_deref())
    }

    pub fn entry_files(&self) -> &[PathBuf] {
        &self.entry_files
    }

    pub fn repos_view(&self) -> ReposView {
        ReposView(
            self.repos
                .iter()
                .map(|spec| {
                    (
                        spec.id.clone(),
                        RepoView {
                            path: spec.path.clone(),
                            commit: self.commit(&spec.id).map(str::to_string),
                            layers: spec.layers.clone(),
                        },
                    )
                })
                .collect(),
        )
    }

    /// Enabled layer paths, sorted by repository name, then layer path.
    pub fn layers(&self) -> Vec<String> {
        let mut layers: Vec<(&str, String)> = self
            .repos
            .iter()
            .flat_map(|spec| {
                spec.layer_paths()
                    .into_iter()
                    .map(move |layer| (spec.name.as_str(), layer))
            })
            .collect();
        layers.sort();
        layers.into_iter().map(|(_, layer)| layer).collect()
    }

    pub fn bblayers_conf_header(&self) -> String {
        self.conf_header("bblayers_conf_header")
    }

    pub fn local_conf_header(&self) -> String {
        self.conf_header("local_conf_header")
    }

    fn conf_header(&self, key: &str) -> String {
        let Some(fragments) = self.body.get(key).and_then(Value::as_mapping) else {
            return String::new();
        };
        let sorted: BTreeMap<String, String> = fragments
            .iter()
            .filter_map(|(id, text)| Some((scalar_to_string(id)?, scalar_to_string(text)?)))
            .collect();
        sorted
            .iter()
            .map(|(id, text)| format!("# {}\n{}\n", id, text))
            .collect()
    }

    pub fn machine(&self) -> String {
        self.env_overrides
            .machine
            .clone()
            .or_else(|| self.string("machine"))
            .unwrap_or_else(|| DEFAULT_MACHINE.to_string())
    }

    pub fn distro(&self) -> String {
        self.env_overrides
            .distro
            .clone()
            .or_else(|| self.string("distro"))
            .unwrap_or_else(|| DEFAULT_DISTRO.to_string())
    }

    pub fn targets(&self) -> Vec<String> {
        if let Some(targets) = &self.env_overrides.targets {
            return targets.clone();
        }
        match self.body.get("target") {
            Some(Value::Sequence(seq)) => seq.iter().filter_map(scalar_to_string).collect(),
            Some(value) => match scalar_to_string(value) {
                Some(target) => vec![target],
                None => vec![DEFAULT_TARGET.to_string()],
            },
            None => vec![DEFAULT_TARGET.to_string()],
        }
    }

    pub fn task(&self) -> String {
        self.env_overrides
            .task
            .clone()
            .or_else(|| self.string("task"))
            .unwrap_or_else(|| DEFAULT_TASK.to_string())
    }

    /// The `env` mapping. `None` values are to be taken from the caller's
    /// environment.
    pub fn environment(&self) -> Vec<(String, Option<String>)> {
        self.body
            .get("env")
            .and_then(Value::as_mapping)
            .into_iter()
            .flatten()
            .filter_map(|(key, value)| Some((scalar_to_string(key)?, scalar_to_string(value))))
            .collect()
    }

    fn string(&self, key: &str) -> Option<String> {
        self.body.get(key).and_then(scalar_to_string)
    }

    /// The merged body as a document. With `resolve_refs`, every
    /// VCS-managed repository is pinned to its resolved commit and the
    /// already-applied `overrides` node is dropped.
    pub fn dump(&self, resolve_refs: bool) -> Mapping {
        let mut body = self.body.clone();
        if !resolve_refs {
            return body;
        }
        body.remove("overrides");
        if let Some(Value::Mapping(repos)) = body.get_mut("repos") {
            for spec in self.repos.iter().filter(|s| !s.operations_disabled) {
                let Some(commit) = self.commit(&spec.id) else {
                    continue;
                };
                if let Some(Value::Mapping(entry)) = repos.get_mut(spec.id.as_str()) {
                    entry.insert(Value::from("commit"), Value::from(commit));
                }
            }
        }
        body
    }

    /// Lock document pinning every VCS-managed repository to its resolved
    /// commit.
    pub fn lock_document(&self) -> Mapping {
        let mut pins = Mapping::new();
        for spec in self.repos.iter().filter(|s| !s.operations_disabled) {
            if let Some(commit) = self.commit(&spec.id) {
                let mut entry = Mapping::new();
                entry.insert(Value::from("commit"), Value::from(commit));
                pins.insert(Value::from(spec.id.as_str()), Value::Mapping(entry));
            }
        }

        let mut header = Mapping::new();
        header.insert(Value::from("version"), Value::from(SUPPORTED_FILE_VERSION));
        let mut overrides = Mapping::new();
        overrides.insert(Value::from("repos"), Value::Mapping(pins));

        let mut doc = Mapping::new();
        doc.insert(Value::from("header"), Value::Mapping(header));
        doc.insert(Value::from("overrides"), Value::Mapping(overrides));
        doc
    }

    /// Write the lock document next to the first entry file.
    pub fn write_lock(&self) -> Result<PathBuf> {
        let entry = self.entry_files.first().ok_or_else(|| Error::Parse {
            path: PathBuf::new(),
            message: "no configuration file to lock".to_string(),
        })?;
        let path = lockfile_path(entry).ok_or_else(|| Error::Parse {
            path: entry.clone(),
            message: "a lock file cannot be locked again".to_string(),
        })?;
        let format = DocumentFormat::from_path(&path).unwrap_or_default();
        fs::write(&path, render(&self.lock_document(), format)?)?;
        Ok(path)
    }
}

/// Render a document as YAML or JSON.
pub fn render(doc: &Mapping, format: DocumentFormat) -> Result<String> {
    match format {
        DocumentFormat::Yaml => Ok(serde_yaml::to_string(doc)?),
        DocumentFormat::Json => {
            let mut json = serde_json::to_string_pretty(doc)?;
            json.push('\n');
            Ok(json)
        }
    }
}
