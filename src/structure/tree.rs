//! Tree assembly helpers on top of the git object database.

use std::collections::BTreeMap;

use git2::build::TreeUpdateBuilder;
use git2::{FileMode, Oid, Repository, Tree};

use crate::error::{Error, Result};

/// An empty tree, written to the object database if needed.
///
/// # Errors
///
/// Returns an error if the object database cannot be written.
pub fn empty_tree(repo: &Repository) -> Result<Tree<'_>> {
    let oid = repo.treebuilder(None)?.write()?;
    Ok(repo.find_tree(oid)?)
}

/// Collects path-level edits and applies them to a base tree in one pass.
///
/// Removals are recorded before upserts at the same path can overwrite
/// them, so "remove old location, write new location" sequences are safe
/// even when both locations coincide.
pub struct TreeWriter<'r> {
    repo: &'r Repository,
    updates: BTreeMap<String, Option<(Oid, FileMode)>>,
}

impl std::fmt::Debug for TreeWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeWriter")
            .field("repo", &self.repo.path())
            .field("updates", &self.updates)
            .finish()
    }
}

impl<'r> TreeWriter<'r> {
    #[must_use]
    pub fn new(repo: &'r Repository) -> Self {
        Self {
            repo,
            updates: BTreeMap::new(),
        }
    }

    /// Write or replace the entry at `path`.
    pub fn upsert(&mut self, path: impl Into<String>, oid: Oid, mode: FileMode) {
        self.updates.insert(path.into(), Some((oid, mode)));
    }

    /// Remove the entry at `path`. The path must exist in the base tree.
    pub fn remove(&mut self, path: impl Into<String>) {
        self.updates.entry(path.into()).or_insert(None);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Apply the collected edits to `base` (or to an empty tree).
    ///
    /// # Errors
    ///
    /// Returns an error if a removed path does not exist or the object
    /// database cannot be written.
    pub fn write(self, base: Option<&Tree<'r>>) -> Result<Oid> {
        let empty;
        let baseline = match base {
            Some(tree) => tree,
            None => {
                empty = empty_tree(self.repo)?;
                &empty
            }
        };
        if self.updates.is_empty() {
            return Ok(baseline.id());
        }

        let mut builder = TreeUpdateBuilder::new();
        for (path, update) in &self.updates {
            match update {
                Some((oid, mode)) => {
                    builder.upsert(path.as_str(), *oid, *mode);
                }
                None => {
                    builder.remove(path.as_str());
                }
            }
        }
        Ok(builder.create_updated(self.repo, baseline)?)
    }
}

/// In-memory directory tree of blob oids, written bottom-up.
#[derive(Debug, Default)]
pub struct TreeNode {
    children: BTreeMap<String, Node>,
}

#[derive(Debug)]
enum Node {
    File(Oid),
    Dir(TreeNode),
}

impl TreeNode {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a blob at a `/`-separated path, creating directories.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the path crosses an existing blob.
    pub fn insert(&mut self, path: &str, oid: Oid) -> Result<()> {
        let mut node = self;
        let mut parts = path.split('/').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                node.children.insert(part.to_string(), Node::File(oid));
                return Ok(());
            }
            let child = node
                .children
                .entry(part.to_string())
                .or_insert_with(|| Node::Dir(Self::new()));
            node = match child {
                Node::Dir(dir) => dir,
                Node::File(_) => {
                    return Err(Error::InvalidOperation(format!(
                        "path conflict at '{part}' while placing {path}"
                    )));
                }
            };
        }
        Ok(())
    }

    /// Write this node and all children to the object database.
    ///
    /// # Errors
    ///
    /// Returns an error if the object database cannot be written.
    pub fn write(&self, repo: &Repository) -> Result<Oid> {
        let mut builder = repo.treebuilder(None)?;
        for (name, node) in &self.children {
            match node {
                Node::File(oid) => {
                    builder.insert(name, *oid, FileMode::Blob.into())?;
                }
                Node::Dir(children) => {
                    let child_oid = children.write(repo)?;
                    builder.insert(name, child_oid, FileMode::Tree.into())?;
                }
            }
        }
        Ok(builder.write()?)
    }
}
