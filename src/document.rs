//! # Document Loader
//!
//! Parses one configuration file into a [`ConfigDocument`]: an ordered body
//! mapping plus the header metadata (format version, include list). Mapping
//! key order is preserved exactly as written, which the merge engine relies
//! on for deterministic output.
//!
//! ## Supported formats
//!
//! The file extension selects the parser: `.yml`/`.yaml` for YAML and `.json`
//! for JSON. Both are read into the same [`serde_yaml::Value`] tree.
//!
//! ## Validation
//!
//! Documents pass through a [`SchemaValidator`] before they reach the rest of
//! the engine. [`BasicValidator`] checks the documented top-level shapes; a
//! full JSON-schema validator can be plugged in behind the same trait.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};

/// Highest document format version this engine understands.
pub const SUPPORTED_FILE_VERSION: i64 = 14;

/// Lowest document format version still accepted.
pub const COMPATIBLE_FILE_VERSION: i64 = 1;

/// One entry of `header.includes`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IncludeRef {
    /// Path relative to the including document (or its repository root).
    Path(String),
    /// File inside a declared repository.
    Repo { repo: String, file: String },
}

/// A parsed configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    pub path: PathBuf,
    /// Id of the repository the document was included through, if any.
    pub owning_repo: Option<String>,
    /// Root of the checkout containing the document, when it is versioned.
    /// Plain includes are resolved against it.
    pub root: Option<PathBuf>,
    pub version: i64,
    pub includes: Vec<IncludeRef>,
    pub body: Mapping,
}

impl ConfigDocument {
    /// Parse `path`, validating it with `validator`.
    pub fn load(
        path: &Path,
        owning_repo: Option<String>,
        root: Option<PathBuf>,
        validator: &dyn SchemaValidator,
    ) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(path, &content, owning_repo, root, validator)
    }

    /// Parse already-read `content` as if it came from `path`.
    pub fn parse(
        path: &Path,
        content: &str,
        owning_repo: Option<String>,
        root: Option<PathBuf>,
        validator: &dyn SchemaValidator,
    ) -> Result<Self> {
        let value = parse_value(path, content)?;
        let Value::Mapping(body) = value else {
            return Err(Error::Parse {
                path: path.to_path_buf(),
                message: "configuration file does not contain a mapping as base type"
                    .to_string(),
            });
        };

        let version = parse_version(path, &body)?;
        let includes = parse_includes(path, &body)?;
        let doc = ConfigDocument {
            path: path.to_path_buf(),
            owning_repo,
            root,
            version,
            includes,
            body,
        };

        let errors = validator.validate(&doc);
        if !errors.is_empty() {
            return Err(Error::Schema {
                path: doc.path,
                errors,
            });
        }
        Ok(doc)
    }

    /// Directory plain includes are resolved against.
    pub fn include_base(&self) -> PathBuf {
        match &self.root {
            Some(root) => root.clone(),
            None => self
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }
}

fn parse_value(path: &Path, content: &str) -> Result<Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parsed = match ext {
        "yml" | "yaml" => serde_yaml::from_str::<Value>(content).map_err(|e| e.to_string()),
        "json" => serde_json::from_str::<Value>(content).map_err(|e| e.to_string()),
        _ => {
            return Err(Error::Parse {
                path: path.to_path_buf(),
                message: "config file extension not recognized".to_string(),
            })
        }
    };
    parsed.map_err(|message| Error::Parse {
        path: path.to_path_buf(),
        message,
    })
}

fn parse_version(path: &Path, body: &Mapping) -> Result<i64> {
    let raw = body
        .get("header")
        .and_then(Value::as_mapping)
        .and_then(|h| h.get("version"));
    let version = match raw {
        Some(Value::Number(n)) => n.as_i64(),
        // legacy string form, equivalent to version 1
        Some(Value::String(s)) if s == "0.10" => Some(1),
        _ => None,
    }
    .ok_or_else(|| Error::Schema {
        path: path.to_path_buf(),
        errors: vec!["header.version must be an integer".to_string()],
    })?;

    if !(COMPATIBLE_FILE_VERSION..=SUPPORTED_FILE_VERSION).contains(&version) {
        return Err(Error::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
            min: COMPATIBLE_FILE_VERSION,
            max: SUPPORTED_FILE_VERSION,
        });
    }
    Ok(version)
}

fn parse_includes(path: &Path, body: &Mapping) -> Result<Vec<IncludeRef>> {
    let includes = body
        .get("header")
        .and_then(Value::as_mapping)
        .and_then(|h| h.get("includes"));
    let entries = match includes {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Sequence(seq)) => seq,
        Some(_) => {
            return Err(Error::Schema {
                path: path.to_path_buf(),
                errors: vec!["header.includes must be a list".to_string()],
            })
        }
    };

    let schema_error = |message: String| Error::Schema {
        path: path.to_path_buf(),
        errors: vec![message],
    };
    entries
        .iter()
        .map(|entry| match entry {
            Value::String(s) => Ok(IncludeRef::Path(s.clone())),
            Value::Mapping(m) => {
                let file = m
                    .get("file")
                    .and_then(Value::as_str)
                    .ok_or_else(|| schema_error(format!("\"file\" is not specified: {:?}", m)))?;
                match m.get("repo") {
                    None | Some(Value::Null) => Ok(IncludeRef::Path(file.to_string())),
                    Some(Value::String(repo)) => Ok(IncludeRef::Repo {
                        repo: repo.clone(),
                        file: file.to_string(),
                    }),
                    Some(other) => Err(schema_error(format!(
                        "include repo must be a string: {:?}",
                        other
                    ))),
                }
            }
            other => Err(schema_error(format!("invalid include entry: {:?}", other))),
        })
        .collect()
}

/// Lock file belonging to `path`: `<stem>.lock.<ext>` in the same directory.
pub fn lockfile_path(path: &Path) -> Option<PathBuf> {
    if is_lockfile(path) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension()?.to_str()?;
    Some(path.with_file_name(format!("{}.lock.{}", stem, ext)))
}

fn is_lockfile(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(".lock"))
}

/// External schema-validation seam.
pub trait SchemaValidator: Send + Sync {
    /// Return a list of human-readable problems; empty means valid.
    fn validate(&self, doc: &ConfigDocument) -> Vec<String>;
}

/// Checks the documented top-level shapes of a document.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicValidator;

const MAPPING_KEYS: &[&str] = &[
    "repos",
    "env",
    "overrides",
    "defaults",
    "bblayers_conf_header",
    "local_conf_header",
    "menu_configuration",
    "artifacts",
    "signers",
];

impl SchemaValidator for BasicValidator {
    fn validate(&self, doc: &ConfigDocument) -> Vec<String> {
        let mut errors = Vec::new();
        match doc.body.get("header") {
            Some(Value::Mapping(_)) => {}
            Some(_) => errors.push("header must be a mapping".to_string()),
            None => errors.push("header is required".to_string()),
        }

        for key in MAPPING_KEYS {
            if let Some(value) = doc.body.get(*key) {
                if !matches!(value, Value::Mapping(_) | Value::Null) {
                    errors.push(format!("{} must be a mapping", key));
                }
            }
        }

        for key in ["machine", "distro", "task"] {
            if let Some(value) = doc.body.get(key) {
                if !matches!(value, Value::String(_)) {
                    errors.push(format!("{} must be a string", key));
                }
            }
        }

        if let Some(Value::Mapping(repos)) = doc.body.get("repos") {
            for (id, entry) in repos {
                if !matches!(entry, Value::Mapping(_) | Value::Null) {
                    errors.push(format!("repos.{:?} must be a mapping or null", id));
                }
            }
        }

        if let Some(Value::Mapping(overrides)) = doc.body.get("overrides") {
            match overrides.get("repos") {
                None | Some(Value::Null) => {}
                Some(Value::Mapping(repos)) => {
                    for (id, entry) in repos {
                        if !matches!(entry, Value::Mapping(_)) {
                            errors.push(format!("overrides.repos.{:?} must be a mapping", id));
                        }
                    }
                }
                Some(_) => errors.push("overrides.repos must be a mapping".to_string()),
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str, content: &str) -> Result<ConfigDocument> {
        ConfigDocument::parse(Path::new(name), content, None, None, &BasicValidator)
    }

    #[test]
    fn test_parse_yaml_document() {
        let doc = parse(
            "/cfg/a.yml",
            "header:\n  version: 14\n  includes:\n    - common.yml\n    - repo: B\n      file: b.yml\nmachine: qemuarm\n",
        )
        .unwrap();
        assert_eq!(doc.version, 14);
        assert_eq!(
            doc.includes,
            vec![
                IncludeRef::Path("common.yml".to_string()),
                IncludeRef::Repo {
                    repo: "B".to_string(),
                    file: "b.yml".to_string()
                }
            ]
        );
    }

    #[test]
    fn test_parse_json_document() {
        let doc = parse(
            "/cfg/a.json",
            r#"{"header": {"version": 10, "includes": [{"file": "x.json"}]}, "distro": "poky"}"#,
        )
        .unwrap();
        assert_eq!(doc.version, 10);
        assert_eq!(doc.includes, vec![IncludeRef::Path("x.json".to_string())]);
    }

    #[test]
    fn test_key_order_is_preserved() {
        let doc = parse(
            "/cfg/a.yml",
            "header: {version: 14}\nzeta: 1\nalpha: 2\nmid: 3\n",
        )
        .unwrap();
        let keys: Vec<&str> = doc.body.keys().filter_map(Value::as_str).collect();
        assert_eq!(keys, vec!["header", "zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_legacy_version_string() {
        let doc = parse("/cfg/a.yml", "header: {version: '0.10'}\n").unwrap();
        assert_eq!(doc.version, 1);
    }

    #[test]
    fn test_quoted_integer_version_rejected() {
        let err = parse("/cfg/a.yml", "header: {version: '14'}\n").unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
        assert!(err.to_string().contains("header.version"));
    }

    #[test]
    fn test_version_out_of_range() {
        let err = parse("/cfg/a.yml", "header: {version: 15}\n").unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { version: 15, .. }));
        let err = parse("/cfg/a.yml", "header: {version: 0}\n").unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { version: 0, .. }));
    }

    #[test]
    fn test_unknown_extension() {
        let err = parse("/cfg/a.toml", "header = 1").unwrap_err();
        assert!(err.to_string().contains("extension not recognized"));
    }

    #[test]
    fn test_non_mapping_top_level() {
        let err = parse("/cfg/a.yml", "- 1\n- 2\n").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_malformed_yaml_names_file() {
        let err = parse("/cfg/broken.yml", "header: [unclosed\n").unwrap_err();
        assert!(err.to_string().contains("/cfg/broken.yml"));
    }

    #[test]
    fn test_include_without_file_is_schema_error() {
        let err = parse(
            "/cfg/a.yml",
            "header:\n  version: 14\n  includes:\n    - repo: B\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }

    #[test]
    fn test_validator_rejects_bad_shapes() {
        let err = parse(
            "/cfg/a.yml",
            "header: {version: 14}\nrepos: [a, b]\nmachine: [x]\n",
        )
        .unwrap_err();
        match err {
            Error::Schema { errors, .. } => {
                assert!(errors.iter().any(|e| e.contains("repos")));
                assert!(errors.iter().any(|e| e.contains("machine")));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_header_is_schema_error() {
        let err = parse("/cfg/a.yml", "machine: qemux86\n").unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }

    #[test]
    fn test_lockfile_naming() {
        assert_eq!(
            lockfile_path(Path::new("/cfg/kas-project.yml")),
            Some(PathBuf::from("/cfg/kas-project.lock.yml"))
        );
        assert_eq!(
            lockfile_path(Path::new("/cfg/a.json")),
            Some(PathBuf::from("/cfg/a.lock.json"))
        );
        assert_eq!(lockfile_path(Path::new("/cfg/a.lock.yml")), None);
    }

    #[test]
    fn test_include_base() {
        let mut doc = parse("/work/B/conf/b.yml", "header: {version: 14}\n").unwrap();
        assert_eq!(doc.include_base(), PathBuf::from("/work/B/conf"));
        doc.root = Some(PathBuf::from("/work/B"));
        assert_eq!(doc.include_base(), PathBuf::from("/work/B"));
    }
}
