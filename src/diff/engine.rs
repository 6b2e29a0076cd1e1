//! Diff computation between datasets, structures and feature maps.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use git2::Tree;
use tracing::debug;

use super::{DatasetDiff, Delta, Diff, MetaChange};
use crate::error::Result;
use crate::hash::feature_fingerprint;
use crate::model::{Feature, PrimaryKey, feature_pk};
use crate::structure::codec::TABLE_DIR;
use crate::structure::{Dataset, RepositoryStructure};

/// Diff every dataset of two repository snapshots.
///
/// # Errors
///
/// Returns an error if a dataset cannot be read.
pub fn diff_structures(old: &RepositoryStructure<'_>, new: &RepositoryStructure<'_>) -> Result<Diff> {
    let mut old_sets: BTreeMap<String, Dataset<'_>> = old
        .datasets()?
        .into_iter()
        .map(|ds| (ds.path().to_string(), ds))
        .collect();
    let mut new_sets: BTreeMap<String, Dataset<'_>> = new
        .datasets()?
        .into_iter()
        .map(|ds| (ds.path().to_string(), ds))
        .collect();
    let paths: BTreeSet<String> = old_sets.keys().chain(new_sets.keys()).cloned().collect();

    let mut diff = Diff::new();
    for path in paths {
        let a = old_sets.remove(&path);
        let b = new_sets.remove(&path);
        let ds_diff = diff_datasets(a.as_ref(), b.as_ref())?;
        if !ds_diff.is_empty() {
            diff.insert(path, ds_diff);
        }
    }
    Ok(diff)
}

/// Diff two versions of one dataset. `None` stands for an absent dataset.
///
/// When both sides share a key-addressed layout, only the locations the
/// object store reports as changed are compared; otherwise both sides are
/// read in full.
///
/// # Errors
///
/// Returns an error if a feature cannot be read.
pub fn diff_datasets(old: Option<&Dataset<'_>>, new: Option<&Dataset<'_>>) -> Result<DatasetDiff> {
    let mut result = DatasetDiff::new();
    let (old_meta, new_meta) = (
        old.map(Dataset::meta_items).transpose()?.unwrap_or_default(),
        new.map(Dataset::meta_items).transpose()?.unwrap_or_default(),
    );
    result.meta = diff_meta(&old_meta, &new_meta);

    if matches!((old, new), (Some(a), Some(b)) if a.tree_id() == b.tree_id()) {
        return Ok(result);
    }

    let pk_field = new.or(old).map_or("", Dataset::primary_key).to_string();
    let (old_features, new_features, keys) = match (old, new) {
        (Some(a), Some(b))
            if a.version() == b.version()
            && a.codec().is_pk_addressable()
            && a.primary_key() == b.primary_key() =>
        {
            let keys = changed_keys(a, b)?;
            (a.get_features(&keys)?, b.get_features(&keys)?, keys)
        }
        _ => {
            let a = old.map(all_features).transpose()?.unwrap_or_default();
            let b = new.map(all_features).transpose()?.unwrap_or_default();
            let keys = a.keys().chain(b.keys()).cloned().collect();
            (a, b, keys)
        }
    };

    result.feature = classify(keys, &old_features, &new_features, &pk_field, &BTreeMap::new())?;
    debug!(
        dataset = new.or(old).map_or("", Dataset::path),
        deltas = result.feature.len(),
        "diffed dataset"
    );
    Ok(result)
}

/// Compare meta item maps.
#[must_use]
pub fn diff_meta(
    old: &BTreeMap<String, serde_json::Value>,
    new: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, MetaChange> {
    let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    names
        .into_iter()
        .filter_map(|name| {
            let (a, b) = (old.get(name), new.get(name));
            (a != b).then(|| {
                (
                    name.clone(),
                    MetaChange {
                        old: a.cloned(),
                        new: b.cloned(),
                    },
                )
            })
        })
        .collect()
}

/// Classify each key as an insert, delete or update.
///
/// `renames` maps a new key to the old key it was moved from. A hint is
/// honored only if the old key existed before and no longer exists, in
/// which case the pair becomes one update even when the content changed.
/// Remaining delete/insert pairs with identical content (ignoring the key)
/// are paired as renames too.
///
/// # Errors
///
/// Returns an error if a feature has no usable primary key.
pub fn classify(
    keys: BTreeSet<PrimaryKey>,
    old: &BTreeMap<PrimaryKey, Feature>,
    new: &BTreeMap<PrimaryKey, Feature>,
    pk_field: &str,
    renames: &BTreeMap<PrimaryKey, PrimaryKey>,
) -> Result<BTreeMap<PrimaryKey, Delta>> {
    let mut moved: BTreeMap<PrimaryKey, PrimaryKey> = BTreeMap::new();
    for (to, from) in renames {
        if to != from && new.contains_key(to) && old.contains_key(from) && !new.contains_key(from)
        {
            moved.insert(from.clone(), to.clone());
        }
    }
    let moved_to: BTreeSet<&PrimaryKey> = moved.values().collect();

    let mut deltas = BTreeMap::new();
    let mut deletes = Vec::new();
    let mut inserts = Vec::new();
    for key in &keys {
        if moved.contains_key(key) {
            continue;
        }
        let (a, b) = (old.get(key), new.get(key));
        match (a, b) {
            // the new row at this key came from elsewhere
            (Some(a), Some(_)) if moved_to.contains(key) => deletes.push((key.clone(), a)),
            (None, Some(_)) if moved_to.contains(key) => {}
            (None, Some(b)) => inserts.push((key.clone(), b)),
            (Some(a), None) => deletes.push((key.clone(), a)),
            (Some(a), Some(b)) if a != b => {
                deltas.insert(
                    key.clone(),
                    Delta::Update {
                        old_key: key.clone(),
                        new_key: key.clone(),
                        old_value: a.clone(),
                        new_value: b.clone(),
                    },
                );
            }
            _ => {}
        }
    }

    for (from, to) in moved {
        let delta = Delta::Update {
            old_key: from.clone(),
            new_key: to.clone(),
            old_value: old[&from].clone(),
            new_value: new[&to].clone(),
        };
        deltas.insert(from, delta);
    }

    let mut by_content: BTreeMap<String, VecDeque<(PrimaryKey, &Feature)>> = BTreeMap::new();
    for (key, value) in deletes {
        by_content
            .entry(feature_fingerprint(value, pk_field)?)
            .or_default()
            .push_back((key, value));
    }
    for (key, value) in inserts {
        let paired = by_content
            .get_mut(&feature_fingerprint(value, pk_field)?)
            .and_then(VecDeque::pop_front);
        match paired {
            Some((old_key, old_value)) => {
                deltas.insert(
                    old_key.clone(),
                    Delta::Update {
                        old_key,
                        new_key: key,
                        old_value: old_value.clone(),
                        new_value: value.clone(),
                    },
                );
            }
            None => {
                deltas.insert(
                    key.clone(),
                    Delta::Insert {
                        key,
                        value: value.clone(),
                    },
                );
            }
        }
    }
    for (key, value) in by_content.into_values().flatten() {
        deltas.insert(
            key.clone(),
            Delta::Delete {
                key,
                value: value.clone(),
            },
        );
    }
    Ok(deltas)
}

fn all_features(dataset: &Dataset<'_>) -> Result<BTreeMap<PrimaryKey, Feature>> {
    let mut features = BTreeMap::new();
    for item in dataset.features() {
        let (_, feature) = item?;
        features.insert(feature_pk(&feature, dataset.primary_key())?, feature);
    }
    Ok(features)
}

/// Keys whose storage location differs between two same-layout datasets.
fn changed_keys(old: &Dataset<'_>, new: &Dataset<'_>) -> Result<BTreeSet<PrimaryKey>> {
    let codec = new.codec();
    let (a, b) = (
        feature_root(old, codec.feature_dir)?,
        feature_root(new, codec.feature_dir)?,
    );
    let changes = new
        .repo()
        .diff_tree_to_tree(a.as_ref(), b.as_ref(), None)?;

    let mut keys = BTreeSet::new();
    for delta in changes.deltas() {
        let file = if delta.new_file().path().is_some() {
            delta.new_file()
        } else {
            delta.old_file()
        };
        let Some(path) = file.path() else { continue };
        let parts: Vec<&str> = path.iter().filter_map(|p| p.to_str()).collect();
        if codec.feature_dir == TABLE_DIR && parts.first() == Some(&"meta") {
            continue;
        }
        if let Some(encoded) = parts.get(codec.shard_depth) {
            keys.insert(codec.decode_pk(encoded)?);
        }
    }
    Ok(keys)
}

fn feature_root<'r>(dataset: &Dataset<'r>, dir: &str) -> Result<Option<Tree<'r>>> {
    let Some(tree) = dataset.tree() else {
        return Ok(None);
    };
    match tree.get_path(Path::new(dir)) {
        Ok(entry) => Ok(Some(dataset.repo().find_tree(entry.id())?)),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::structure::DatasetVersion;
    use crate::test_support::{Fixture, POINTS_TABLE, point};

    const VERSIONS: [DatasetVersion; 3] = [
        DatasetVersion::V0_0_1,
        DatasetVersion::V0_1_0,
        DatasetVersion::V0_2_0,
    ];

    /// Import ten points, then commit an update of 2, a delete of 4 and an
    /// insert of 11.
    fn edited(version: DatasetVersion) -> Fixture {
        let fx = Fixture::new();
        fx.import_points_as(10, version);
        let mut two = point(2);
        two.insert("name".into(), Value::Text("two".into()));
        fx.commit_points("main", &[two, point(11)], &[4]);
        fx
    }

    fn feature(fid: i64, name: &str) -> Feature {
        let mut f = Feature::new();
        f.insert("fid".into(), Value::Integer(fid));
        f.insert("name".into(), Value::Text(name.into()));
        f
    }

    fn map(rows: &[(i64, &str)]) -> BTreeMap<PrimaryKey, Feature> {
        rows.iter()
            .map(|(i, n)| (PrimaryKey::Int(*i), feature(*i, n)))
            .collect()
    }

    fn keys(a: &BTreeMap<PrimaryKey, Feature>, b: &BTreeMap<PrimaryKey, Feature>) -> BTreeSet<PrimaryKey> {
        a.keys().chain(b.keys()).cloned().collect()
    }

    #[test]
    fn test_classify_basic_kinds() {
        let old = map(&[(1, "a"), (2, "b"), (3, "c")]);
        let new = map(&[(1, "a"), (2, "B"), (4, "d")]);
        let d = classify(keys(&old, &new), &old, &new, "fid", &BTreeMap::new()).unwrap();
        assert_eq!(d.len(), 3);
        assert!(matches!(d[&PrimaryKey::Int(2)], Delta::Update { .. }));
        assert!(matches!(d[&PrimaryKey::Int(3)], Delta::Delete { .. }));
        assert!(matches!(d[&PrimaryKey::Int(4)], Delta::Insert { .. }));
    }

    #[test]
    fn test_classify_reflexive() {
        let old = map(&[(1, "a"), (2, "b")]);
        let d = classify(keys(&old, &old), &old, &old, "fid", &BTreeMap::new()).unwrap();
        assert!(d.is_empty());
    }

    #[test]
    fn test_content_equal_move_is_rename() {
        let old = map(&[(1, "a")]);
        let new = map(&[(7, "a")]);
        let d = classify(keys(&old, &new), &old, &new, "fid", &BTreeMap::new()).unwrap();
        assert_eq!(d.len(), 1);
        let delta = &d[&PrimaryKey::Int(1)];
        assert!(delta.is_rename());
        assert_eq!(delta.new_key(), Some(&PrimaryKey::Int(7)));
    }

    #[test]
    fn test_rename_hint_pairs_changed_content() {
        let old = map(&[(1, "a")]);
        let new = map(&[(7, "changed")]);
        let hints = BTreeMap::from([(PrimaryKey::Int(7), PrimaryKey::Int(1))]);
        let d = classify(keys(&old, &new), &old, &new, "fid", &hints).unwrap();
        assert_eq!(d.len(), 1);
        match &d[&PrimaryKey::Int(1)] {
            Delta::Update {
                new_key, new_value, ..
            } => {
                assert_eq!(*new_key, PrimaryKey::Int(7));
                assert_eq!(new_value["name"], Value::Text("changed".into()));
            }
            other => panic!("unexpected {other:?}"),
        }

        let without = classify(keys(&old, &new), &old, &new, "fid", &BTreeMap::new()).unwrap();
        assert_eq!(without.len(), 2);
    }

    #[test]
    fn test_rename_over_existing_key_deletes_it() {
        let old = map(&[(1, "a"), (7, "old seven")]);
        let new = map(&[(7, "a moved")]);
        let hints = BTreeMap::from([(PrimaryKey::Int(7), PrimaryKey::Int(1))]);
        let d = classify(keys(&old, &new), &old, &new, "fid", &hints).unwrap();
        assert!(d[&PrimaryKey::Int(1)].is_rename());
        assert!(matches!(d[&PrimaryKey::Int(7)], Delta::Delete { .. }));
    }

    #[test]
    fn test_stale_hint_ignored() {
        // old key still present, so the hint cannot describe a move
        let old = map(&[(1, "a")]);
        let new = map(&[(1, "a"), (7, "b")]);
        let hints = BTreeMap::from([(PrimaryKey::Int(7), PrimaryKey::Int(1))]);
        let d = classify(keys(&old, &new), &old, &new, "fid", &hints).unwrap();
        assert_eq!(d.len(), 1);
        assert!(matches!(d[&PrimaryKey::Int(7)], Delta::Insert { .. }));
    }

    #[test]
    fn test_diff_meta() {
        let old = BTreeMap::from([("title".to_string(), serde_json::json!("a"))]);
        let new = BTreeMap::from([
            ("title".to_string(), serde_json::json!("b")),
            ("crs".to_string(), serde_json::json!("EPSG:4326")),
        ]);
        let changes = diff_meta(&old, &new);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["crs"].old, None);
    }

    #[test]
    fn test_committed_edits_each_version() {
        for version in VERSIONS {
            let fx = edited(version);
            let old = RepositoryStructure::lookup(&fx.repo, "HEAD~1").unwrap();
            let new = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();

            let diff = diff_structures(&old, &new).unwrap();
            assert_eq!(diff.paths().collect::<Vec<_>>(), vec![POINTS_TABLE], "{version}");
            let ds = diff.get(POINTS_TABLE).unwrap();
            assert!(ds.meta.is_empty(), "{version}");
            assert_eq!(ds.feature.len(), 3, "{version}");
            assert!(matches!(ds.feature[&PrimaryKey::Int(2)], Delta::Update { .. }));
            assert!(matches!(ds.feature[&PrimaryKey::Int(4)], Delta::Delete { .. }));
            assert!(matches!(ds.feature[&PrimaryKey::Int(11)], Delta::Insert { .. }));

            assert!(diff_structures(&new, &new).unwrap().is_empty(), "{version}");
            assert!(diff_structures(&old, &old).unwrap().is_empty(), "{version}");
            let backwards = diff_structures(&new, &old).unwrap();
            assert_eq!(diff.invert().unwrap(), backwards, "{version}");
        }
    }

    #[test]
    fn test_changed_keys_reads_only_touched_locations() {
        for version in VERSIONS {
            let fx = edited(version);
            let old = RepositoryStructure::lookup(&fx.repo, "HEAD~1").unwrap();
            let new = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();
            let (a, b) = (old.get(POINTS_TABLE).unwrap(), new.get(POINTS_TABLE).unwrap());
            assert_eq!(b.version(), version);
            if version == DatasetVersion::V0_0_1 {
                assert!(!b.codec().is_pk_addressable());
                continue;
            }
            let keys = changed_keys(&a, &b).unwrap();
            assert_eq!(
                keys,
                BTreeSet::from([PrimaryKey::Int(2), PrimaryKey::Int(4), PrimaryKey::Int(11)]),
                "{version}"
            );
        }
    }

    #[test]
    fn test_meta_only_change_has_no_feature_deltas() {
        for version in VERSIONS {
            let fx = Fixture::new();
            fx.import_points_as(4, version);
            fx.set_meta("main", "title", serde_json::json!("Points"));
            let old = RepositoryStructure::lookup(&fx.repo, "HEAD~1").unwrap();
            let new = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();
            let (a, b) = (old.get(POINTS_TABLE).unwrap(), new.get(POINTS_TABLE).unwrap());

            let ds = diff_datasets(Some(&a), Some(&b)).unwrap();
            assert!(ds.feature.is_empty(), "{version}");
            assert_eq!(ds.meta.len(), 1, "{version}");
            assert_eq!(ds.meta["title"].new, Some(serde_json::json!("Points")));
        }
    }

    #[test]
    fn test_dataset_added_and_removed() {
        for version in VERSIONS {
            let fx = Fixture::new();
            fx.import_points_as(5, version);
            let empty = RepositoryStructure::from_tree(&fx.repo, None);
            let head = RepositoryStructure::lookup(&fx.repo, "HEAD").unwrap();

            let added = diff_structures(&empty, &head).unwrap();
            let counts = added.get(POINTS_TABLE).unwrap().counts();
            assert_eq!((counts.inserts, counts.updates, counts.deletes), (5, 0, 0));
            assert!(!added.get(POINTS_TABLE).unwrap().meta.is_empty());

            let removed = diff_structures(&head, &empty).unwrap();
            assert_eq!(removed.get(POINTS_TABLE).unwrap().counts().deletes, 5);
            assert_eq!(added.invert().unwrap(), removed, "{version}");
        }
    }

    #[test]
    fn test_same_rows_in_different_layouts() {
        let old = Fixture::new();
        old.import_points_as(6, DatasetVersion::V0_0_1);
        let new = Fixture::new();
        new.import_points_as(6, DatasetVersion::V0_2_0);
        let a = RepositoryStructure::lookup(&old.repo, "HEAD").unwrap();
        let b = RepositoryStructure::lookup(&new.repo, "HEAD").unwrap();

        let ds = diff_datasets(
            Some(&a.get(POINTS_TABLE).unwrap()),
            Some(&b.get(POINTS_TABLE).unwrap()),
        )
        .unwrap();
        assert!(ds.feature.is_empty());
        assert!(ds.meta.contains_key("version"));
    }
}
