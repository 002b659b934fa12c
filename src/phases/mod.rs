//! The phases of a resolution run.
//!
//! ## Overview
//!
//! 1. Scope check - all top-level documents share one repository (or none)
//! 2. Include fixpoint - expand includes, merge, check out new repositories
//!    until nothing new is discovered ([`resolve`], driving [`checkout`])
//! 3. Patch application - apply patch sets to the final checkouts ([`patch`])
//!
//! [`orchestrator::resolve`] runs them in order and produces the
//! [`crate::config::MergedConfig`].

pub mod checkout;
pub mod orchestrator;
pub mod patch;
pub mod resolve;

pub use orchestrator::resolve;
