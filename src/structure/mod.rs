//! Mapping between datasets and the object store.
//!
//! - [`codec`]: versioned primary-key encodings and tree layouts
//! - [`dataset`]: one dataset bound to a tree
//! - [`repository`]: all datasets at a commit, and committing diffs
//! - [`tree`]: tree assembly helpers

pub mod codec;
pub mod dataset;
pub mod repository;
pub mod tree;

pub use codec::{Codec, DatasetVersion};
pub use dataset::Dataset;
pub use repository::{RepositoryStructure, head_commit_id, stage_dataset_diff};
pub use tree::{TreeNode, TreeWriter};
