//! # Error Handling
//!
//! This module defines the centralized error type for `layerpin`. It uses the
//! `thiserror` library to build one `Error` enum covering every anticipated
//! failure mode, each variant carrying enough context (document path,
//! include, repository id) that the message alone tells the user what to fix.
//!
//! ## Classes of errors
//!
//! - **Structural** errors (`Parse`, `Schema`, `UnresolvableInclude`,
//!   `ConflictingRepoDefinition` and friends) are configuration-author mistakes.
//!   They abort the run immediately and are never retried.
//! - **Per-repository** errors (`VcsUnavailable`, `RevisionMismatch`,
//!   `DirtyRepository`, `PatchConflict`, `VcsCommand`) are attributed to one
//!   repository. Batches keep going for unaffected repositories and report
//!   them together through `RepositoryFailures`.
//!
//! The `Result` alias is used throughout the library.

use std::path::PathBuf;

use thiserror::Error;

use crate::vcs::VcsError;

/// Main error type for layerpin operations
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration document could not be read or parsed.
    #[error("Parse error in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A document was rejected by schema validation.
    #[error("Schema error in {}: {}", path.display(), errors.join("; "))]
    Schema { path: PathBuf, errors: Vec<String> },

    /// A document declares a format version this engine cannot handle.
    #[error(
        "Unsupported file version {version} in {} (supported: {min} to {max})",
        path.display()
    )]
    UnsupportedVersion {
        path: PathBuf,
        version: i64,
        min: i64,
        max: i64,
    },

    /// Top-level documents belong to different repositories (or some to none).
    #[error("Top-level documents must share one repository: {message}")]
    MixedScopes { message: String },

    /// The fixpoint ended with includes that reference undeclared repositories.
    #[error(
        "Unresolvable include: repo '{repo}', file '{file}' (included from {})",
        document.display()
    )]
    UnresolvableInclude {
        repo: String,
        file: String,
        document: PathBuf,
    },

    /// Several includes were left unresolvable; each entry is an
    /// [`Error::UnresolvableInclude`].
    #[error("{} unresolvable includes:\n{}", includes.len(), format_list(includes))]
    UnresolvableIncludes { includes: Vec<Error> },

    /// A plain include chain loops back onto itself.
    #[error("Include cycle detected: {cycle}")]
    IncludeCycle { cycle: String },

    /// The fixpoint loop did not settle within the configured bound.
    #[error("Include resolution did not converge after {iterations} iterations")]
    IterationLimit { iterations: usize },

    /// An included document changed the definition of the repo it came from.
    #[error(
        "Conflicting definition of repo '{repo}': {first} vs {second} ({message})"
    )]
    ConflictingRepoDefinition {
        repo: String,
        first: String,
        second: String,
        message: String,
    },

    /// A repository entry is structurally invalid.
    #[error("Invalid repo '{repo}': {message}")]
    InvalidRepo { repo: String, message: String },

    /// A network-level VCS failure that persisted through every retry.
    #[error("VCS unavailable for repo '{repo}' ({url}): {message}")]
    VcsUnavailable {
        repo: String,
        url: String,
        message: String,
    },

    /// A non-retryable VCS command failure.
    #[error("VCS command failed for repo '{repo}': {command} - {stderr}")]
    VcsCommand {
        repo: String,
        command: String,
        stderr: String,
    },

    /// A branch or tag does not agree with the pinned commit.
    #[error("Revision mismatch in repo '{repo}': {message}")]
    RevisionMismatch { repo: String, message: String },

    /// Local modifications block checkout or patching.
    #[error("Repo '{repo}' has local modifications ({}): {message}", path.display())]
    DirtyRepository {
        repo: String,
        path: PathBuf,
        message: String,
    },

    /// A patch did not apply; the tree is left in its conflict state.
    #[error("Could not apply patch '{patch}' ({}) to repo '{repo}': {message}", path.display())]
    PatchConflict {
        repo: String,
        patch: String,
        path: PathBuf,
        message: String,
    },

    /// A declared patch file or series is missing.
    #[error("Patch '{patch}' of repo '{repo}' not found: {}", path.display())]
    PatchNotFound {
        repo: String,
        patch: String,
        path: PathBuf,
    },

    /// The run was aborted by the operator.
    #[error("Interrupted")]
    Interrupted,

    /// Another process holds the work directory.
    #[error("Work directory {} is locked by another process", path.display())]
    WorkdirLocked { path: PathBuf },

    /// One or more repositories ended in error.
    #[error("{} repositor{} failed:\n{}", failures.len(), if failures.len() == 1 { "y" } else { "ies" }, format_failures(failures))]
    RepositoryFailures { failures: Vec<(String, Error)> },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML serialization error, wrapped from `serde_yaml::Error`.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON serialization error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The checkout worker pool could not be started.
    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },
}

fn format_failures(failures: &[(String, Error)]) -> String {
    failures
        .iter()
        .map(|(repo, err)| format!("  {}: {}", repo, err))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_list(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|err| format!("  {}", err))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Whether this error is a configuration mistake that aborts the run
    /// immediately.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Parse { .. }
                | Error::Schema { .. }
                | Error::UnsupportedVersion { .. }
                | Error::MixedScopes { .. }
                | Error::UnresolvableInclude { .. }
                | Error::UnresolvableIncludes { .. }
                | Error::IncludeCycle { .. }
                | Error::IterationLimit { .. }
                | Error::ConflictingRepoDefinition { .. }
                | Error::InvalidRepo { .. }
        )
    }

    /// Attribute a VCS adapter error to a repository.
    pub fn from_vcs(repo: &str, url: Option<&str>, err: VcsError) -> Self {
        match err {
            VcsError::Unavailable { message, .. } => Error::VcsUnavailable {
                repo: repo.to_string(),
                url: url.unwrap_or_default().to_string(),
                message,
            },
            VcsError::Interrupted => Error::Interrupted,
            VcsError::Command {
                command, stderr, ..
            } => Error::VcsCommand {
                repo: repo.to_string(),
                command,
                stderr,
            },
            VcsError::Spawn { program, message } => Error::VcsCommand {
                repo: repo.to_string(),
                command: program,
                stderr: message,
            },
            VcsError::Unsupported { operation } => Error::VcsCommand {
                repo: repo.to_string(),
                command: operation,
                stderr: "not supported by this VCS".to_string(),
            },
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_parse() {
        let error = Error::Parse {
            path: PathBuf::from("/cfg/a.yml"),
            message: "Invalid YAML".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Parse error"));
        assert!(display.contains("/cfg/a.yml"));
        assert!(display.contains("Invalid YAML"));
    }

    #[test]
    fn test_error_display_unresolvable_include() {
        let error = Error::UnresolvableInclude {
            repo: "meta-foo".to_string(),
            file: "foo.yml".to_string(),
            document: PathBuf::from("/cfg/a.yml"),
        };
        let display = format!("{}", error);
        assert!(display.contains("meta-foo"));
        assert!(display.contains("foo.yml"));
        assert!(display.contains("/cfg/a.yml"));
    }

    #[test]
    fn test_error_display_lists_every_unresolvable_include() {
        let include = |repo: &str, file: &str| Error::UnresolvableInclude {
            repo: repo.to_string(),
            file: file.to_string(),
            document: PathBuf::from("/cfg/a.yml"),
        };
        let error = Error::UnresolvableIncludes {
            includes: vec![include("meta-foo", "foo.yml"), include("meta-bar", "bar.yml")],
        };
        let display = format!("{}", error);
        assert!(display.starts_with("2 unresolvable includes:"));
        assert!(display.contains("meta-foo"));
        assert!(display.contains("bar.yml"));
        assert!(error.is_structural());
    }

    #[test]
    fn test_error_display_conflicting_repo_names_both_sources() {
        let error = Error::ConflictingRepoDefinition {
            repo: "B".to_string(),
            first: "/cfg/a.yml".to_string(),
            second: "/work/B/b.yml".to_string(),
            message: "url changed".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("/cfg/a.yml"));
        assert!(display.contains("/work/B/b.yml"));
    }

    #[test]
    fn test_error_display_repository_failures() {
        let error = Error::RepositoryFailures {
            failures: vec![
                (
                    "poky".to_string(),
                    Error::RevisionMismatch {
                        repo: "poky".to_string(),
                        message: "branch does not contain commit".to_string(),
                    },
                ),
                (
                    "meta-oe".to_string(),
                    Error::VcsUnavailable {
                        repo: "meta-oe".to_string(),
                        url: "https://example.com/meta-oe.git".to_string(),
                        message: "Could not resolve host".to_string(),
                    },
                ),
            ],
        };
        let display = format!("{}", error);
        assert!(display.starts_with("2 repositories failed"));
        assert!(display.contains("  poky: "));
        assert!(display.contains("  meta-oe: "));
    }

    #[test]
    fn test_structural_classification() {
        assert!(Error::IncludeCycle {
            cycle: "a -> a".to_string()
        }
        .is_structural());
        assert!(!Error::PatchConflict {
            repo: "r".to_string(),
            patch: "01".to_string(),
            path: PathBuf::from("p.patch"),
            message: "conflict".to_string(),
        }
        .is_structural());
    }

    #[test]
    fn test_from_vcs_maps_transient_to_unavailable() {
        let err = Error::from_vcs(
            "poky",
            Some("https://git.example.com/poky"),
            VcsError::Unavailable {
                command: "git fetch".to_string(),
                message: "Connection timed out".to_string(),
            },
        );
        assert!(matches!(err, Error::VcsUnavailable { ref repo, .. } if repo == "poky"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: Error = io_error.into();
        let display = format!("{}", error);
        assert!(display.contains("I/O error"));
        assert!(display.contains("File not found"));
    }
}
