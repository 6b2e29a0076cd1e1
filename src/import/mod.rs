//! Importing tables into the repository as new datasets.
//!
//! Two paths produce the same tree for the same input:
//! [`import_table`] stages one feature at a time through a `git2::Index`,
//! [`fast_import_table`] assembles the dataset tree in memory and writes it
//! bottom-up in one pass.

pub mod sqlite;

use std::collections::BTreeMap;

use git2::{FileMode, Index, Oid, Repository, Signature};
use serde::Serialize;
use tracing::info;

pub use sqlite::SqliteImportSource;

use crate::error::{Error, Result};
use crate::model::{Feature, Schema};
use crate::structure::codec::{VERSION_ITEM, version_item};
use crate::structure::dataset::{PRIMARY_KEY_ITEM, SCHEMA_ITEM, stage_blob};
use crate::structure::{Dataset, DatasetVersion, RepositoryStructure, TreeNode, TreeWriter};

/// Log progress every this many features.
const PROGRESS_EVERY: usize = 10_000;

/// A table that can be imported.
pub trait ImportSource {
    /// Source table name.
    fn table(&self) -> &str;

    /// Column layout, including the primary-key flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be inspected.
    fn schema(&self) -> Result<Schema>;

    /// Name of the single primary-key column.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for tables without a key or with a
    /// composite key.
    fn primary_key(&self) -> Result<String> {
        Ok(self.schema()?.primary_key()?.to_string())
    }

    /// Extra meta items to store with the dataset (e.g. `title`).
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be inspected.
    fn meta_items(&self) -> Result<BTreeMap<String, serde_json::Value>>;

    /// Number of rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be queried.
    fn row_count(&self) -> Result<usize>;

    /// Stream every row, in primary-key order, into `f`.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error from the source or from `f`.
    fn for_each_feature(&self, f: &mut dyn FnMut(Feature) -> Result<()>) -> Result<()>;
}

/// Where and how to import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Dataset path; defaults to the source table name.
    pub path: Option<String>,
    pub version: DatasetVersion,
    pub message: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            path: None,
            version: DatasetVersion::DEFAULT,
            message: None,
        }
    }
}

/// Outcome of an import.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    #[serde(serialize_with = "crate::commit::serialize_oid")]
    pub commit: Oid,
    pub path: String,
    pub version: String,
    pub feature_count: usize,
}

struct Prepared<'r> {
    head: RepositoryStructure<'r>,
    dataset: Dataset<'r>,
    meta: Vec<(String, serde_json::Value)>,
    message: String,
}

fn prepare<'r>(
    repo: &'r Repository,
    source: &dyn ImportSource,
    options: &ImportOptions,
) -> Result<Prepared<'r>> {
    let path = options
        .path
        .as_deref()
        .unwrap_or_else(|| source.table())
        .trim_matches('/')
        .to_string();
    if path.is_empty() {
        return Err(Error::InvalidArgument("dataset path is empty".to_string()));
    }

    let head = RepositoryStructure::lookup(repo, "HEAD")?;
    if head.contains_path(&path) {
        return Err(Error::AlreadyExists { path });
    }

    let schema = source.schema()?;
    let pk_field = source.primary_key()?;
    let dataset = Dataset::empty(repo, &path, options.version, &pk_field);

    let mut meta = vec![
        (VERSION_ITEM.to_string(), version_item(options.version)),
        (SCHEMA_ITEM.to_string(), serde_json::to_value(&schema)?),
        (PRIMARY_KEY_ITEM.to_string(), serde_json::Value::String(pk_field)),
    ];
    for (name, value) in source.meta_items()? {
        if !meta.iter().any(|(n, _)| *n == name) {
            meta.push((name, value));
        }
    }

    let message = options
        .message
        .clone()
        .unwrap_or_else(|| format!("Import from {} to {path}/", source.table()));
    Ok(Prepared {
        head,
        dataset,
        meta,
        message,
    })
}

fn finish(
    repo: &Repository,
    signature: &Signature<'_>,
    prepared: &Prepared<'_>,
    tree_oid: Oid,
    feature_count: usize,
) -> Result<ImportResult> {
    let tree = repo.find_tree(tree_oid)?;
    let parents: Vec<_> = prepared.head.git_commit().into_iter().collect();
    let commit = repo.commit(
        Some("HEAD"),
        signature,
        signature,
        &prepared.message,
        &tree,
        &parents,
    )?;
    info!(
        dataset = prepared.dataset.path(),
        features = feature_count,
        commit = %commit,
        "import complete"
    );
    Ok(ImportResult {
        commit,
        path: prepared.dataset.path().to_string(),
        version: prepared.dataset.version().to_string(),
        feature_count,
    })
}

fn check_count(source: &dyn ImportSource, imported: usize) -> Result<()> {
    let expected = source.row_count()?;
    if expected != imported {
        return Err(Error::Integrity {
            errors: vec![format!(
                "imported {imported} features but {} has {expected} rows",
                source.table()
            )],
        });
    }
    Ok(())
}

/// Import a table one feature at a time through a staging index.
///
/// # Errors
///
/// Returns `AlreadyExists` if the dataset path is taken, or any error
/// from the source or the object store. Nothing is committed on error.
pub fn import_table(
    repo: &Repository,
    signature: &Signature<'_>,
    source: &dyn ImportSource,
    options: &ImportOptions,
) -> Result<ImportResult> {
    let prepared = prepare(repo, source, options)?;
    let dataset = &prepared.dataset;
    info!(table = source.table(), dataset = dataset.path(), version = %dataset.version(), "importing");

    let mut index = Index::new()?;
    if let Some(tree) = prepared.head.tree() {
        index.read_tree(tree)?;
    }
    for (name, value) in &prepared.meta {
        let (rel, oid) = dataset.meta_blob(name, value)?;
        stage_blob(&mut index, &dataset.full_path(&rel), oid)?;
    }

    let mut count = 0usize;
    source.for_each_feature(&mut |feature| {
        dataset.import_feature(&feature, &mut index)?;
        count += 1;
        if count % PROGRESS_EVERY == 0 {
            info!(features = count, "imported");
        }
        Ok(())
    })?;
    check_count(source, count)?;

    let tree_oid = index.write_tree_to(repo)?;
    finish(repo, signature, &prepared, tree_oid, count)
}

/// Import a table by building its whole tree in memory first.
///
/// # Errors
///
/// As [`import_table`].
pub fn fast_import_table(
    repo: &Repository,
    signature: &Signature<'_>,
    source: &dyn ImportSource,
    options: &ImportOptions,
) -> Result<ImportResult> {
    let prepared = prepare(repo, source, options)?;
    let dataset = &prepared.dataset;
    info!(table = source.table(), dataset = dataset.path(), version = %dataset.version(), "fast importing");

    let mut root = TreeNode::new();
    for (name, value) in &prepared.meta {
        let (rel, oid) = dataset.meta_blob(name, value)?;
        root.insert(&rel, oid)?;
    }

    let mut count = 0usize;
    source.for_each_feature(&mut |feature| {
        for (rel, oid) in dataset.feature_blobs(&feature)? {
            root.insert(&rel, oid)?;
        }
        count += 1;
        if count % PROGRESS_EVERY == 0 {
            info!(features = count, "imported");
        }
        Ok(())
    })?;
    check_count(source, count)?;

    let dataset_tree = root.write(repo)?;
    let mut writer = TreeWriter::new(repo);
    writer.upsert(dataset.path(), dataset_tree, FileMode::Tree);
    let tree_oid = writer.write(prepared.head.tree())?;
    finish(repo, signature, &prepared, tree_oid, count)
}
