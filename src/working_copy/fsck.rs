//! Working copy integrity check.
//!
//! Compares every dataset table against the tree the working copy claims
//! to be synchronized with. Rows with tracked edits are reported but not
//! compared, since they are expected to differ.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use super::WorkingCopy;
use crate::error::{Error, MAX_INTEGRITY_ERRORS, Result};
use crate::model::feature_pk;
use crate::repo::RepoContext;
use crate::structure::{Dataset, RepositoryStructure};

/// Per-dataset findings of a clean check.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetReport {
    pub features: usize,
    pub rows: usize,
    pub dirty: usize,
}

/// Result of a successful check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FsckReport {
    pub tree: Option<String>,
    pub datasets: BTreeMap<String, DatasetReport>,
}

/// Bounded error list; further errors are dropped once full.
#[derive(Default)]
struct Findings {
    errors: Vec<String>,
    truncated: bool,
}

impl Findings {
    fn push(&mut self, msg: String) {
        if self.errors.len() < MAX_INTEGRITY_ERRORS {
            self.errors.push(msg);
        } else {
            self.truncated = true;
        }
    }

    fn full(&self) -> bool {
        self.truncated
    }
}

/// Check the working copy against `HEAD`.
///
/// Tables named in `reset_datasets` are rebuilt from `HEAD` first.
///
/// # Errors
///
/// Returns `Integrity` with up to [`MAX_INTEGRITY_ERRORS`] messages if any
/// check fails, or `NoWorkingCopy` if none is configured.
pub fn fsck(ctx: &RepoContext, reset_datasets: &[String]) -> Result<FsckReport> {
    let mut wc = ctx.require_working_copy()?;
    let head = RepositoryStructure::lookup(ctx.repo(), "HEAD")?;

    for path in reset_datasets {
        let dataset = head.get(path)?;
        let rows = wc.write_full(&dataset)?;
        warn!(dataset = %path, rows, "reset dataset table");
    }

    check(&wc, &head)
}

/// Run the checks on an open working copy.
///
/// # Errors
///
/// As [`fsck`].
pub fn check(wc: &WorkingCopy, head: &RepositoryStructure<'_>) -> Result<FsckReport> {
    let mut findings = Findings::default();
    if let Err(e) = wc.assert_tree_match(head.tree_id()) {
        findings.push(e.to_string());
        return Err(Error::Integrity {
            errors: findings.errors,
        });
    }

    let mut tables = wc.tables()?;
    let mut report = FsckReport {
        tree: head.tree_id().map(|t| t.to_string()),
        datasets: BTreeMap::new(),
    };
    for dataset in head.datasets()? {
        if findings.full() {
            break;
        }
        let table = super::table_name(dataset.path());
        if tables.remove(&table).is_none() {
            findings.push(format!("{}: no table in working copy", dataset.path()));
            continue;
        }
        let ds_report = check_dataset(wc, &dataset, &mut findings)?;
        report.datasets.insert(dataset.path().to_string(), ds_report);
    }
    for path in tables.values() {
        findings.push(format!("{path}: table has no dataset in HEAD"));
    }

    if findings.errors.is_empty() {
        info!(datasets = report.datasets.len(), "working copy is consistent");
        Ok(report)
    } else {
        if findings.truncated {
            warn!(limit = MAX_INTEGRITY_ERRORS, "too many errors; stopped early");
        }
        Err(Error::Integrity {
            errors: findings.errors,
        })
    }
}

fn check_dataset(
    wc: &WorkingCopy,
    dataset: &Dataset<'_>,
    findings: &mut Findings,
) -> Result<DatasetReport> {
    let path = dataset.path();
    let pk_field = dataset.primary_key();

    if dataset.schema()?.primary_key()? != pk_field {
        findings.push(format!("{path}: schema and primary_key meta item disagree"));
    }
    if !wc.columns(path)?.iter().any(|c| c == pk_field) {
        findings.push(format!("{path}: table has no primary key column '{pk_field}'"));
        return Ok(DatasetReport::default());
    }

    let dirty = wc.dirty_keys(path)?;
    if !dirty.is_empty() {
        warn!(dataset = path, rows = dirty.len(), "dataset has uncommitted edits");
    }

    let codec = dataset.codec();
    let mut features = 0;
    for item in dataset.features() {
        if findings.full() {
            break;
        }
        let (encoded, feature) = item?;
        features += 1;
        let pk = match feature_pk(&feature, pk_field) {
            Ok(pk) => pk,
            Err(e) => {
                findings.push(format!("{path}: feature {encoded}: {e}"));
                continue;
            }
        };

        if codec.is_pk_addressable() {
            if codec.encode_pk(&pk) != encoded {
                findings.push(format!(
                    "{path}: feature {pk_field}={pk} is stored under {encoded}"
                ));
            } else if let Some(rel) = dataset.feature_path(&pk).filter(|rel| {
                dataset
                    .tree()
                    .is_none_or(|t| t.get_path(Path::new(rel)).is_err())
            }) {
                findings.push(format!("{path}: feature {pk_field}={pk} not at {rel}"));
            }
        }

        if dirty.contains(&pk) {
            continue;
        }
        match wc.get_row(path, pk_field, &pk) {
            Ok(row) if row == feature => {}
            Ok(_) => findings.push(format!("{path}: row {pk_field}={pk} differs from HEAD")),
            Err(Error::NotFound { .. }) => {
                findings.push(format!("{path}: row {pk_field}={pk} is missing"));
            }
            Err(e) => return Err(e),
        }
    }

    let rows = wc.row_count(path)?;
    if dirty.is_empty() && rows != features && !findings.full() {
        findings.push(format!(
            "{path}: table has {rows} rows, HEAD has {features} features"
        ));
    }
    Ok(DatasetReport {
        features,
        rows,
        dirty: dirty.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, POINTS_TABLE};

    fn setup() -> (Fixture, WorkingCopy) {
        let fx = Fixture::new();
        fx.import_points(6);
        let mut wc = WorkingCopy::open_memory().unwrap();
        {
            let head = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();
            wc.reset(&head, true).unwrap();
        }
        (fx, wc)
    }

    #[test]
    fn test_clean_working_copy_passes() {
        let (fx, wc) = setup();
        let head = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();
        let report = check(&wc, &head).unwrap();
        let ds = &report.datasets[POINTS_TABLE];
        assert_eq!((ds.features, ds.rows, ds.dirty), (6, 6, 0));
    }

    #[test]
    fn test_tracked_edits_are_not_errors() {
        let (fx, wc) = setup();
        wc.conn()
            .execute("UPDATE points SET name = 'x' WHERE fid = 2", [])
            .unwrap();
        let head = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();
        let report = check(&wc, &head).unwrap();
        assert_eq!(report.datasets[POINTS_TABLE].dirty, 1);
    }

    #[test]
    fn test_untracked_edits_are_reported() {
        let (fx, mut wc) = setup();
        wc.session(|tx| {
            tx.execute_batch(&super::super::schema::drop_triggers_sql(POINTS_TABLE))?;
            tx.execute("UPDATE points SET name = 'sneaky' WHERE fid = 3", [])?;
            tx.execute("DELETE FROM points WHERE fid = 4", [])?;
            Ok(())
        })
        .unwrap();
        let head = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();
        let Err(Error::Integrity { errors }) = check(&wc, &head) else {
            panic!("expected integrity error");
        };
        assert!(errors.iter().any(|e| e.contains("fid=3 differs")));
        assert!(errors.iter().any(|e| e.contains("fid=4 is missing")));
        assert!(errors.iter().any(|e| e.contains("5 rows")));

        let ds = head.get(POINTS_TABLE).unwrap();
        wc.write_full(&ds).unwrap();
        check(&wc, &head).unwrap();
    }

    #[test]
    fn test_tree_mismatch_stops_check() {
        let (fx, mut wc) = setup();
        wc.mark_synced(None).unwrap();
        let head = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();
        let Err(Error::Integrity { errors }) = check(&wc, &head) else {
            panic!("expected integrity error");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("out of sync"));
    }
}
