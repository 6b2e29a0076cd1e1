//! All datasets visible at one commit or tree.

use std::path::Path;

use git2::{Commit, ErrorCode, FileMode, ObjectType, Oid, Repository, Signature, Tree};
use tracing::{debug, info};

use super::codec::TABLE_DIR;
use super::dataset::Dataset;
use super::tree::TreeWriter;
use crate::diff::{DatasetDiff, Diff};
use crate::error::{Error, Result};

/// A snapshot of the repository: an optional commit and its tree.
///
/// An unborn `HEAD` gives an empty structure with neither.
pub struct RepositoryStructure<'r> {
    repo: &'r Repository,
    commit: Option<Commit<'r>>,
    tree: Option<Tree<'r>>,
}

impl std::fmt::Debug for RepositoryStructure<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryStructure")
            .field("commit", &self.commit.as_ref().map(Commit::id))
            .field("tree", &self.tree_id())
            .finish_non_exhaustive()
    }
}

impl<'r> RepositoryStructure<'r> {
    /// Resolve a revision (`HEAD`, a branch, an oid) to a structure.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the revision does not resolve.
    pub fn lookup(repo: &'r Repository, spec: &str) -> Result<Self> {
        if spec == "HEAD" {
            return match repo.head() {
                Ok(head) => Ok(Self::from_commit(repo, head.peel_to_commit()?)?),
                Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                    Ok(Self::from_tree(repo, None))
                }
                Err(e) => Err(e.into()),
            };
        }

        let object = repo.revparse_single(spec).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                Error::not_found(format!("revision '{spec}'"))
            } else {
                e.into()
            }
        })?;
        match object.peel_to_commit() {
            Ok(commit) => Self::from_commit(repo, commit),
            Err(_) => Ok(Self::from_tree(repo, Some(object.peel_to_tree()?))),
        }
    }

    /// A structure over a commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit's tree cannot be read.
    pub fn from_commit(repo: &'r Repository, commit: Commit<'r>) -> Result<Self> {
        let tree = commit.tree()?;
        Ok(Self {
            repo,
            commit: Some(commit),
            tree: Some(tree),
        })
    }

    /// A structure over a bare tree, not tied to any commit.
    #[must_use]
    pub fn from_tree(repo: &'r Repository, tree: Option<Tree<'r>>) -> Self {
        Self {
            repo,
            commit: None,
            tree,
        }
    }

    #[must_use]
    pub fn repo(&self) -> &'r Repository {
        self.repo
    }

    #[must_use]
    pub fn git_commit(&self) -> Option<&Commit<'r>> {
        self.commit.as_ref()
    }

    #[must_use]
    pub fn tree(&self) -> Option<&Tree<'r>> {
        self.tree.as_ref()
    }

    #[must_use]
    pub fn tree_id(&self) -> Option<Oid> {
        self.tree.as_ref().map(Tree::id)
    }

    /// Whether anything is stored at `path`.
    #[must_use]
    pub fn contains_path(&self, path: &str) -> bool {
        self.tree
            .as_ref()
            .is_some_and(|t| t.get_path(Path::new(path.trim_matches('/'))).is_ok())
    }

    /// Every dataset in the tree, sorted by path.
    ///
    /// A directory is a dataset if it holds a `.strata-table` directory or
    /// a `meta` directory; datasets are not searched for nested datasets.
    ///
    /// # Errors
    ///
    /// Returns an error if a dataset cannot be bound.
    pub fn datasets(&self) -> Result<Vec<Dataset<'r>>> {
        let mut found = Vec::new();
        let Some(root) = self.tree.clone() else {
            return Ok(found);
        };
        let mut stack = vec![(root, String::new())];
        while let Some((tree, prefix)) = stack.pop() {
            for entry in &tree {
                if entry.kind() != Some(ObjectType::Tree) {
                    continue;
                }
                let Some(name) = entry.name() else { continue };
                if name.starts_with('.') {
                    continue;
                }
                let path = if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{prefix}/{name}")
                };
                let child = self.repo.find_tree(entry.id())?;
                if is_dataset_tree(&child) {
                    found.push(Dataset::instantiate(self.repo, child, &path)?);
                } else {
                    stack.push((child, path));
                }
            }
        }
        found.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(found)
    }

    /// The dataset at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no dataset lives there.
    pub fn get(&self, path: &str) -> Result<Dataset<'r>> {
        let path = path.trim_matches('/');
        let missing = || Error::not_found(format!("dataset '{path}'"));
        let entry = self
            .tree
            .as_ref()
            .and_then(|t| t.get_path(Path::new(path)).ok())
            .ok_or_else(missing)?;
        if entry.kind() != Some(ObjectType::Tree) {
            return Err(missing());
        }
        let tree = self.repo.find_tree(entry.id())?;
        if !is_dataset_tree(&tree) {
            return Err(missing());
        }
        Dataset::instantiate(self.repo, tree, path)
    }

    /// Write the tree that results from applying `diff` to this snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the diff names a dataset that does not exist.
    pub fn create_tree_from_diff(&self, diff: &Diff) -> Result<Oid> {
        let mut writer = TreeWriter::new(self.repo);
        for (path, ds_diff) in diff.iter() {
            let dataset = self.get(path)?;
            stage_dataset_diff(&dataset, ds_diff, &mut writer)?;
        }
        writer.write(self.tree.as_ref())
    }

    /// Commit `diff` on top of this snapshot and advance `HEAD`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` when the diff is empty and `allow_empty`
    /// is not set, or when this snapshot is not the current `HEAD`.
    pub fn commit(
        &self,
        signature: &Signature<'_>,
        diff: &Diff,
        message: &str,
        allow_empty: bool,
    ) -> Result<Oid> {
        if diff.is_empty() && !allow_empty {
            return Err(Error::InvalidOperation("No changes to commit".to_string()));
        }
        let head = head_commit_id(self.repo)?;
        if head != self.commit.as_ref().map(Commit::id) {
            return Err(Error::InvalidOperation(
                "cannot commit: HEAD has moved since this snapshot was read".to_string(),
            ));
        }

        let tree = self.repo.find_tree(self.create_tree_from_diff(diff)?)?;
        let parents: Vec<&Commit<'_>> = self.commit.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), signature, signature, message, &tree, &parents)?;
        info!(commit = %oid, datasets = diff.paths().count(), "committed");
        Ok(oid)
    }
}

/// Stage the writes for one dataset's diff.
///
/// Old locations are removed before new ones are written, so updates that
/// keep their location simply replace the entry.
///
/// # Errors
///
/// Returns an error if a feature cannot be encoded or located.
pub fn stage_dataset_diff(
    dataset: &Dataset<'_>,
    diff: &DatasetDiff,
    writer: &mut TreeWriter<'_>,
) -> Result<()> {
    for (name, change) in &diff.meta {
        match &change.new {
            Some(value) => {
                let (rel, oid) = dataset.meta_blob(name, value)?;
                writer.upsert(dataset.full_path(&rel), oid, FileMode::Blob);
            }
            None if dataset.get_meta_item(name).is_ok() => {
                writer.remove(dataset.full_path(&dataset.codec().meta_path(name)));
            }
            None => {}
        }
    }

    let located = dataset.locate_features(diff.feature.values().filter_map(|d| d.old_key()))?;
    for rel in located.values() {
        writer.remove(dataset.full_path(rel));
    }
    for delta in diff.feature.values() {
        if let Some(value) = delta.new_value() {
            let (rel, oid, mode) = dataset.write_feature(value)?;
            writer.upsert(dataset.full_path(&rel), oid, mode);
        }
    }
    debug!(
        dataset = dataset.path(),
        removed = located.len(),
        changes = diff.feature.len(),
        "staged dataset diff"
    );
    Ok(())
}

/// Current `HEAD` commit, or `None` on an unborn branch.
///
/// # Errors
///
/// Returns an error if `HEAD` cannot be read.
pub fn head_commit_id(repo: &Repository) -> Result<Option<Oid>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?.id())),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_dataset_tree(tree: &Tree<'_>) -> bool {
    [TABLE_DIR, "meta"].into_iter().any(|name| {
        tree.get_name(name)
            .is_some_and(|e| e.kind() == Some(ObjectType::Tree))
    })
}
