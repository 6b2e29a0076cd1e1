//! Strata - version control for tabular datasets
//!
//! Datasets are stored as trees in a git object store, one blob (or
//! subtree) per feature, and edited through a SQLite working copy.
//!
//! # Architecture
//!
//! - [`model`] - Values, features, primary keys and schemas
//! - [`structure`] - Dataset layouts (codecs) and repository snapshots
//! - [`import`] - Creating datasets from SQLite tables
//! - [`diff`] - Feature-level deltas between snapshots
//! - [`working_copy`] - The editable SQLite working copy
//! - [`commit`] - Committing working copy edits
//! - [`merge`] - Three-way merge with a persisted conflict index
//! - [`config`] / [`repo`] - Repository configuration and context
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod commit;
pub mod config;
pub mod diff;
pub mod error;
pub mod hash;
pub mod import;
pub mod merge;
pub mod model;
pub mod repo;
pub mod structure;
pub mod working_copy;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
