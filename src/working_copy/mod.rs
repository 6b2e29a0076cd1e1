//! SQLite working copy: one table per dataset, synchronized with a tree.
//!
//! The working copy records the id of the tree it was last synchronized
//! with. Edits made directly in the database are captured by triggers into
//! a tracking table, which scopes every diff against the tree: rows that
//! were never touched are assumed unchanged.
//!
//! Writes go through [`WorkingCopy::session`], an immediate transaction
//! committed on success and rolled back on any error, so data tables and
//! the tracking table never diverge.

pub mod fsck;
pub mod schema;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::Oid;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use self::schema::{
    GLOBAL, apply_schema, create_table_sql, create_triggers_sql, drop_triggers_sql, quote_ident,
};
use crate::diff::{DatasetDiff, Diff, DiffCounts, classify, diff_structures};
use crate::error::{Error, Result};
use crate::model::{Feature, PrimaryKey, Value};
use crate::repo::RepoContext;
use crate::structure::dataset::{PRIMARY_KEY_ITEM, SCHEMA_ITEM};
use crate::structure::{Dataset, RepositoryStructure};

/// `_strata_state.key` of the last synchronized tree id.
const TREE_KEY: &str = "tree";
/// `_strata_state.key` mapping a table to its dataset path.
const DATASET_KEY: &str = "dataset";

/// Table name for a dataset path.
#[must_use]
pub fn table_name(dataset_path: &str) -> String {
    dataset_path.trim_matches('/').replace('/', "__")
}

/// An open working copy database.
#[derive(Debug)]
pub struct WorkingCopy {
    conn: Connection,
    path: PathBuf,
}

impl WorkingCopy {
    /// Open (creating if needed) a working copy database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open an in-memory working copy (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying connection, for reads and for direct edits.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` in an immediate transaction, committed only if `f` succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` (after rolling back) or from the commit.
    pub fn session<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // ── Sync state ───────────────────────────────────────────

    /// Id of the tree the working copy was last synchronized with.
    ///
    /// # Errors
    ///
    /// Returns an error if the state table cannot be read.
    pub fn tree_id(&self) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM _strata_state WHERE table_name = ?1 AND key = ?2",
                [GLOBAL, TREE_KEY],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Check that the working copy was synchronized with `expected`.
    ///
    /// # Errors
    ///
    /// Returns `Mismatch` if the recorded tree differs.
    pub fn assert_tree_match(&self, expected: Option<Oid>) -> Result<()> {
        let actual = self.tree_id()?;
        let expected = expected.map(|oid| oid.to_string());
        if actual == expected {
            return Ok(());
        }
        Err(Error::Mismatch {
            expected: expected.unwrap_or_else(|| "<empty>".to_string()),
            actual,
        })
    }

    /// Whether any tracked edits exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracking table cannot be read.
    pub fn is_dirty(&self) -> Result<bool> {
        Ok(self
            .conn
            .prepare("SELECT 1 FROM _strata_track LIMIT 1")?
            .exists([])?)
    }

    /// Dataset tables present, as table name → dataset path.
    ///
    /// # Errors
    ///
    /// Returns an error if the state table cannot be read.
    pub fn tables(&self) -> Result<BTreeMap<String, String>> {
        registered_tables(&self.conn)
    }

    /// Keys of edited rows in a dataset's table, including the keys rows
    /// were moved away from.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracking table cannot be read.
    pub fn dirty_keys(&self, dataset_path: &str) -> Result<BTreeSet<PrimaryKey>> {
        let mut keys = BTreeSet::new();
        for (pk, moved_from) in tracked_keys(&self.conn, &table_name(dataset_path))? {
            keys.insert(pk);
            keys.extend(moved_from);
        }
        Ok(keys)
    }

    /// Column names of a dataset's table, in table order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be inspected.
    pub fn columns(&self, dataset_path: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "PRAGMA table_info({})",
            quote_ident(&table_name(dataset_path))
        ))?;
        let names = stmt
            .query_map([], |row| row.get("name"))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Number of rows in a dataset's table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read.
    pub fn row_count(&self, dataset_path: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&table_name(dataset_path))),
            [],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|_| Error::Other(format!("bad row count {count}")))
    }

    /// One row by primary key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no row has this key.
    pub fn get_row(&self, dataset_path: &str, pk_field: &str, pk: &PrimaryKey) -> Result<Feature> {
        read_rows(&self.conn, &table_name(dataset_path), pk_field, [pk])?
            .remove(pk)
            .ok_or_else(|| Error::not_found(format!("row {dataset_path}:{pk_field}={pk}")))
    }

    // ── Diffs ────────────────────────────────────────────────

    /// Tracked edits of one dataset's table, relative to `dataset`.
    ///
    /// # Errors
    ///
    /// Returns an error if rows or features cannot be read.
    pub fn diff_to_tree(&self, dataset: &Dataset<'_>) -> Result<DatasetDiff> {
        let table = table_name(dataset.path());
        let tracked = tracked_keys(&self.conn, &table)?;
        if tracked.is_empty() {
            return Ok(DatasetDiff::new());
        }

        let mut keys = BTreeSet::new();
        let mut moves = BTreeMap::new();
        for (pk, moved_from) in tracked {
            keys.insert(pk.clone());
            if let Some(from) = moved_from {
                keys.insert(from.clone());
                moves.insert(pk, from);
            }
        }

        let pk_field = dataset.primary_key();
        let old = dataset.get_features(&keys)?;
        let new = read_rows(&self.conn, &table, pk_field, &keys)?;
        let feature = classify(keys, &old, &new, pk_field, &moves)?;
        debug!(dataset = dataset.path(), deltas = feature.len(), "working copy diff");
        Ok(DatasetDiff {
            meta: BTreeMap::new(),
            feature,
        })
    }

    /// Tracked edits of every dataset in `structure` that has a table.
    ///
    /// # Errors
    ///
    /// Returns an error if any dataset diff fails.
    pub fn diff_to_structure(&self, structure: &RepositoryStructure<'_>) -> Result<Diff> {
        let tables = self.tables()?;
        let mut diff = Diff::new();
        for dataset in structure.datasets()? {
            if !tables.contains_key(&table_name(dataset.path())) {
                continue;
            }
            let ds_diff = self.diff_to_tree(&dataset)?;
            if !ds_diff.is_empty() {
                diff.insert(dataset.path(), ds_diff);
            }
        }
        Ok(diff)
    }

    /// Per-dataset counts of uncommitted changes.
    ///
    /// # Errors
    ///
    /// Returns `Mismatch` if the working copy is not synchronized with
    /// `structure`.
    pub fn status(&self, structure: &RepositoryStructure<'_>) -> Result<BTreeMap<String, DiffCounts>> {
        self.assert_tree_match(structure.tree_id())?;
        let mut diff = self.diff_to_structure(structure)?;
        diff.prune();
        Ok(diff.counts())
    }

    // ── Rebuilding ───────────────────────────────────────────

    /// Recreate a dataset's table from its tree, bypassing change capture.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset cannot be read or the table written.
    pub fn write_full(&mut self, dataset: &Dataset<'_>) -> Result<usize> {
        self.session(|tx| write_full(tx, dataset))
    }

    /// Drop a dataset's table and its tracking rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be dropped.
    pub fn drop_table(&mut self, dataset_path: &str) -> Result<()> {
        let table = table_name(dataset_path);
        self.session(|tx| drop_table(tx, &table))
    }

    /// Mark the working copy as synchronized with `tree`, forgetting all
    /// tracked edits. Used after the edits were committed as that tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn mark_synced(&mut self, tree: Option<Oid>) -> Result<()> {
        self.session(|tx| {
            tx.execute("DELETE FROM _strata_track", [])?;
            set_tree(tx, tree)
        })
    }

    /// Bring every table to the state of `target`, discarding edits.
    ///
    /// Tables whose dataset kept its schema are patched row by row: tracked
    /// rows plus rows the tree diff touches are reloaded from `target`.
    /// Everything else (and everything, with `force` or an unknown
    /// starting tree) is rebuilt wholesale.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be read or the tables written.
    pub fn reset(&mut self, target: &RepositoryStructure<'_>, force: bool) -> Result<()> {
        let repo = target.repo();
        let current = if force {
            None
        } else {
            self.tree_id()?
                .and_then(|id| Oid::from_str(&id).ok())
                .and_then(|oid| repo.find_tree(oid).ok())
                .map(|tree| RepositoryStructure::from_tree(repo, Some(tree)))
        };
        let tree_diff = current
            .as_ref()
            .map(|current| diff_structures(current, target))
            .transpose()?;
        let registered = self.tables()?;
        let datasets = target.datasets()?;

        self.session(|tx| {
            let mut kept = BTreeSet::new();
            for dataset in &datasets {
                let table = table_name(dataset.path());
                kept.insert(table.clone());
                let ds_diff = tree_diff.as_ref().map(|d| d.get(dataset.path()));
                match ds_diff {
                    Some(ds_diff) if registered.contains_key(&table) && keeps_layout(ds_diff) => {
                        refresh_rows(tx, dataset, &table, ds_diff)?;
                    }
                    _ => {
                        drop_table(tx, &table)?;
                        write_full(tx, dataset)?;
                    }
                }
            }
            for table in registered.keys().filter(|t| !kept.contains(*t)) {
                drop_table(tx, table)?;
            }
            tx.execute("DELETE FROM _strata_track", [])?;
            set_tree(tx, target.tree_id())
        })?;
        info!(tree = ?target.tree_id(), datasets = datasets.len(), "working copy reset");
        Ok(())
    }
}

/// Result of creating or rebuilding a working copy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResult {
    pub path: PathBuf,
    pub tree: Option<String>,
    pub datasets: usize,
    pub rebuilt: bool,
}

/// Create (or with `force`, rebuild) the working copy from `HEAD`.
///
/// `path` defaults to the configured location. An existing, synchronized
/// working copy is left alone unless `force` is set.
///
/// # Errors
///
/// Returns `NoWorkingCopy` when no path is given or configured,
/// `InvalidArgument` when `path` is some other existing file, and `Mismatch`
/// when the configured working copy is out of sync and `force` is not set.
pub fn checkout(ctx: &mut RepoContext, path: Option<&Path>, force: bool) -> Result<CheckoutResult> {
    let configured = ctx.working_copy_path();
    let target = match path {
        Some(p) => std::path::absolute(p)?,
        None => configured.clone().ok_or(Error::NoWorkingCopy)?,
    };
    let is_configured = configured
        .as_ref()
        .and_then(|c| std::path::absolute(c).ok())
        .is_some_and(|c| c == target);

    let head = RepositoryStructure::lookup(ctx.repo(), "HEAD")?;
    let tree = head.tree_id();
    if target.exists() && !force {
        if !is_configured {
            return Err(Error::InvalidArgument(format!(
                "{} already exists and is not the working copy; use --force to take it over",
                target.display()
            )));
        }
        let wc = WorkingCopy::open(&target)?;
        wc.assert_tree_match(tree)?;
        return Ok(CheckoutResult {
            path: target,
            tree: tree.map(|t| t.to_string()),
            datasets: wc.tables()?.len(),
            rebuilt: false,
        });
    }

    let mut wc = WorkingCopy::open(&target)?;
    warn_if_dirty(&wc)?;
    wc.reset(&head, true)?;
    drop(head);
    let datasets = wc.tables()?.len();

    let stored = target
        .strip_prefix(ctx.base_dir())
        .map_or_else(|_| target.clone(), Path::to_path_buf);
    ctx.set_working_copy_path(&stored)?;
    info!(path = %target.display(), datasets, "checked out working copy");
    Ok(CheckoutResult {
        path: target,
        tree: tree.map(|t| t.to_string()),
        datasets,
        rebuilt: true,
    })
}

// ── Connection-level helpers (usable inside a session) ───────

fn keeps_layout(diff: Option<&DatasetDiff>) -> bool {
    diff.is_none_or(|d| {
        !d.meta.contains_key(SCHEMA_ITEM) && !d.meta.contains_key(PRIMARY_KEY_ITEM)
    })
}

fn set_tree(conn: &Connection, tree: Option<Oid>) -> Result<()> {
    match tree {
        Some(oid) => {
            conn.execute(
                "INSERT INTO _strata_state (table_name, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(table_name, key) DO UPDATE SET value = excluded.value",
                rusqlite::params![GLOBAL, TREE_KEY, oid.to_string()],
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM _strata_state WHERE table_name = ?1 AND key = ?2",
                [GLOBAL, TREE_KEY],
            )?;
        }
    }
    Ok(())
}

fn registered_tables(conn: &Connection) -> Result<BTreeMap<String, String>> {
    let mut stmt =
        conn.prepare("SELECT table_name, value FROM _strata_state WHERE key = ?1")?;
    let rows = stmt
        .query_map([DATASET_KEY], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<BTreeMap<String, String>, _>>()?;
    Ok(rows)
}

fn tracked_keys(conn: &Connection, table: &str) -> Result<Vec<(PrimaryKey, Option<PrimaryKey>)>> {
    let mut stmt = conn.prepare(
        "SELECT pk, moved_from FROM _strata_track WHERE table_name = ?1 ORDER BY pk",
    )?;
    let rows = stmt
        .query_map([table], |row| {
            Ok((
                row.get::<_, rusqlite::types::Value>(0)?,
                row.get::<_, rusqlite::types::Value>(1)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(pk, moved_from)| {
            let pk = PrimaryKey::try_from(&Value::from(pk))?;
            let moved_from = match Value::from(moved_from) {
                Value::Null => None,
                v => Some(PrimaryKey::try_from(&v)?),
            };
            Ok((pk, moved_from))
        })
        .collect()
}

fn read_rows<'k>(
    conn: &Connection,
    table: &str,
    pk_field: &str,
    keys: impl IntoIterator<Item = &'k PrimaryKey>,
) -> Result<BTreeMap<PrimaryKey, Feature>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM {} WHERE {} = ?1",
        quote_ident(table),
        quote_ident(pk_field)
    ))?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let mut found = BTreeMap::new();
    for pk in keys {
        let row = stmt
            .query_row([pk], |row| {
                let mut feature = Feature::new();
                for (i, name) in names.iter().enumerate() {
                    let value: rusqlite::types::Value = row.get(i)?;
                    feature.insert(name.clone(), Value::from(value));
                }
                Ok(feature)
            })
            .optional()?;
        if let Some(feature) = row {
            found.insert(pk.clone(), feature);
        }
    }
    Ok(found)
}

fn insert_feature(conn: &Connection, table: &str, columns: &[String], feature: &Feature) -> Result<()> {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let values = columns
        .iter()
        .map(|c| feature.get(c).unwrap_or(&Value::Null));
    stmt.execute(rusqlite::params_from_iter(values))?;
    Ok(())
}

fn write_full(conn: &Connection, dataset: &Dataset<'_>) -> Result<usize> {
    let table = table_name(dataset.path());
    let schema = dataset.schema()?;
    let columns: Vec<String> = schema.column_names().map(str::to_string).collect();

    conn.execute_batch(&drop_triggers_sql(&table))?;
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(&table)))?;
    conn.execute_batch(&create_table_sql(&table, &schema))?;

    let mut count = 0;
    for item in dataset.features() {
        let (_, feature) = item?;
        insert_feature(conn, &table, &columns, &feature)?;
        count += 1;
    }

    conn.execute_batch(&create_triggers_sql(&table, dataset.primary_key()))?;
    conn.execute(
        "DELETE FROM _strata_track WHERE table_name = ?1",
        [&table],
    )?;
    conn.execute(
        "INSERT INTO _strata_state (table_name, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(table_name, key) DO UPDATE SET value = excluded.value",
        rusqlite::params![table, DATASET_KEY, dataset.path()],
    )?;
    debug!(dataset = dataset.path(), rows = count, "wrote table");
    Ok(count)
}

fn drop_table(conn: &Connection, table: &str) -> Result<()> {
    conn.execute_batch(&drop_triggers_sql(table))?;
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(table)))?;
    conn.execute("DELETE FROM _strata_track WHERE table_name = ?1", [table])?;
    conn.execute("DELETE FROM _strata_state WHERE table_name = ?1", [table])?;
    Ok(())
}

/// Reload tracked rows and rows touched by `diff` from `dataset`.
fn refresh_rows(
    conn: &Connection,
    dataset: &Dataset<'_>,
    table: &str,
    diff: Option<&DatasetDiff>,
) -> Result<()> {
    let mut keys = BTreeSet::new();
    for (pk, moved_from) in tracked_keys(conn, table)? {
        keys.insert(pk);
        keys.extend(moved_from);
    }
    if let Some(diff) = diff {
        for delta in diff.feature.values() {
            keys.extend(delta.old_key().cloned());
            keys.extend(delta.new_key().cloned());
        }
    }
    if keys.is_empty() {
        return Ok(());
    }

    let pk_field = dataset.primary_key();
    let columns: Vec<String> = dataset.schema()?.column_names().map(str::to_string).collect();
    conn.execute_batch(&drop_triggers_sql(table))?;
    {
        let mut delete = conn.prepare(&format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(table),
            quote_ident(pk_field)
        ))?;
        for pk in &keys {
            delete.execute([pk])?;
        }
    }
    let features = dataset.get_features(&keys)?;
    for feature in features.values() {
        insert_feature(conn, table, &columns, feature)?;
    }
    conn.execute_batch(&create_triggers_sql(table, pk_field))?;
    if features.len() < keys.len() {
        debug!(table, removed = keys.len() - features.len(), "rows absent from target");
    }
    debug!(table, rows = keys.len(), "refreshed rows");
    Ok(())
}

/// Warn when the working copy has edits that an operation will discard.
///
/// # Errors
///
/// Returns an error if the tracking table cannot be read.
pub fn warn_if_dirty(wc: &WorkingCopy) -> Result<()> {
    if wc.is_dirty()? {
        warn!(path = %wc.path().display(), "discarding uncommitted working copy edits");
    }
    Ok(())
}
