//! # layerpin
//!
//! This library resolves layered build-project configurations and brings
//! every repository they reference to its pinned state. It is used by the
//! `layerpin` command-line tool but works on its own: hand it a set of
//! top-level documents and a [`context::Context`], get back a
//! [`config::MergedConfig`].
//!
//! ## Quick Example
//!
//! ```
//! use std::path::Path;
//! use layerpin::document::{BasicValidator, ConfigDocument};
//! use layerpin::merge::merge_documents;
//!
//! let base = ConfigDocument::parse(
//!     Path::new("/cfg/base.yml"),
//!     "header: {version: 10}\nmachine: qemux86-64\ndistro: poky\n",
//!     None,
//!     None,
//!     &BasicValidator,
//! )
//! .unwrap();
//! let board = ConfigDocument::parse(
//!     Path::new("/cfg/board.yml"),
//!     "header: {version: 14}\nmachine: qemuarm64\n",
//!     None,
//!     None,
//!     &BasicValidator,
//! )
//! .unwrap();
//!
//! let merged = merge_documents([&base, &board]);
//! assert_eq!(merged.version, 14);
//! assert_eq!(merged.body["machine"], "qemuarm64");
//! assert_eq!(merged.body["distro"], "poky");
//! ```
//!
//! ## Core Concepts
//!
//! - **Documents (`document`)**: one parsed YAML/JSON file with its header
//!   (format version, includes). Mapping order is preserved.
//! - **Merge (`merge`)**: recursive, order-preserving merge of a document
//!   sequence where later documents win.
//! - **Repository specs (`repospec`)**: the declared intent for each entry of
//!   the merged `repos` mapping.
//! - **VCS adapters (`vcs`)**: `git` and `hg` behind one trait.
//! - **Repository management (`repository`, `registry`)**: checkout and patch
//!   policy on top of the adapters, plus the shared live state of a run.
//! - **Phases (`phases`)**: the include/checkout fixpoint, the parallel
//!   checkout scheduler and the patch pass.
//!
//! ## Execution Flow
//!
//! [`phases::resolve`] runs a complete resolution:
//!
//! 1.  **Scope check**: all top-level documents share one repository or none.
//! 2.  **Fixpoint**: expand includes, merge, and check out newly discovered
//!     repositories in parallel until nothing new turns up. Lock files are
//!     merged right after their companion document.
//! 3.  **Overrides**: `overrides.repos.<id>.commit` pins are applied to the
//!     resolved specs.
//! 4.  **Patches**: patch sets are applied to the final checkouts.

pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod merge;
pub mod output;
pub mod phases;
pub mod registry;
pub mod repository;
pub mod repospec;
pub mod vcs;
pub mod worklock;

#[cfg(test)]
mod merge_proptest;
