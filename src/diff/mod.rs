//! Structured deltas between two feature sources.
//!
//! A [`Diff`] maps dataset paths to a [`DatasetDiff`]: meta item changes
//! plus feature [`Delta`]s keyed by primary key (the old key for deletes
//! and updates, the new key for inserts).

pub mod engine;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::Serialize;
use serde_json::json;

pub use engine::{classify, diff_datasets, diff_structures};

use crate::error::{Error, Result};
use crate::model::{Feature, PrimaryKey};

/// One feature-level change.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Insert {
        key: PrimaryKey,
        value: Feature,
    },
    Delete {
        key: PrimaryKey,
        value: Feature,
    },
    /// Changed value, key, or both. `old_key != new_key` marks a rename.
    Update {
        old_key: PrimaryKey,
        new_key: PrimaryKey,
        old_value: Feature,
        new_value: Feature,
    },
}

impl Delta {
    /// The key this delta is filed under.
    #[must_use]
    pub fn key(&self) -> &PrimaryKey {
        match self {
            Self::Insert { key, .. } | Self::Delete { key, .. } => key,
            Self::Update { old_key, .. } => old_key,
        }
    }

    #[must_use]
    pub fn old_key(&self) -> Option<&PrimaryKey> {
        match self {
            Self::Insert { .. } => None,
            Self::Delete { key, .. } => Some(key),
            Self::Update { old_key, .. } => Some(old_key),
        }
    }

    #[must_use]
    pub fn new_key(&self) -> Option<&PrimaryKey> {
        match self {
            Self::Insert { key, .. } => Some(key),
            Self::Delete { .. } => None,
            Self::Update { new_key, .. } => Some(new_key),
        }
    }

    #[must_use]
    pub fn old_value(&self) -> Option<&Feature> {
        match self {
            Self::Insert { .. } => None,
            Self::Delete { value, .. } => Some(value),
            Self::Update { old_value, .. } => Some(old_value),
        }
    }

    #[must_use]
    pub fn new_value(&self) -> Option<&Feature> {
        match self {
            Self::Insert { value, .. } => Some(value),
            Self::Delete { .. } => None,
            Self::Update { new_value, .. } => Some(new_value),
        }
    }

    #[must_use]
    pub fn is_rename(&self) -> bool {
        matches!(self, Self::Update { old_key, new_key, .. } if old_key != new_key)
    }

    /// An update that changes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            Self::Update { old_key, new_key, old_value, new_value }
                if old_key == new_key && old_value == new_value
        )
    }

    /// The same change seen from the other side.
    #[must_use]
    pub fn invert(self) -> Self {
        match self {
            Self::Insert { key, value } => Self::Delete { key, value },
            Self::Delete { key, value } => Self::Insert { key, value },
            Self::Update {
                old_key,
                new_key,
                old_value,
                new_value,
            } => Self::Update {
                old_key: new_key,
                new_key: old_key,
                old_value: new_value,
                new_value: old_value,
            },
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Insert { value, .. } => json!({ "+": value }),
            Self::Delete { value, .. } => json!({ "-": value }),
            Self::Update {
                old_value,
                new_value,
                ..
            } => json!({ "-": old_value, "+": new_value }),
        }
    }
}

/// Old and new value of one meta item; `None` where the item is absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaChange {
    pub old: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
}

/// Per-dataset change counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffCounts {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl DiffCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

/// Changes within one dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetDiff {
    pub meta: BTreeMap<String, MetaChange>,
    pub feature: BTreeMap<PrimaryKey, Delta>,
}

impl DatasetDiff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// File a delta under its key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if another delta already uses the key.
    pub fn add(&mut self, delta: Delta) -> Result<()> {
        match self.feature.entry(delta.key().clone()) {
            Entry::Occupied(e) => Err(Error::InvalidOperation(format!(
                "conflicting changes for feature {}",
                e.key()
            ))),
            Entry::Vacant(e) => {
                e.insert(delta);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meta.is_empty() && self.feature.is_empty()
    }

    /// Drop changes that net to nothing.
    pub fn prune(&mut self) {
        self.meta.retain(|_, change| change.old != change.new);
        self.feature.retain(|_, delta| !delta.is_noop());
    }

    /// The same changes seen from the other side, each delta re-filed
    /// under its new key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if two inverted deltas land on the same
    /// key, as a delete of `k` alongside a rename onto `k` does.
    pub fn invert(self) -> Result<Self> {
        let meta = self
            .meta
            .into_iter()
            .map(|(name, change)| {
                (
                    name,
                    MetaChange {
                        old: change.new,
                        new: change.old,
                    },
                )
            })
            .collect();
        let mut inverted = Self {
            meta,
            feature: BTreeMap::new(),
        };
        for delta in self.feature.into_values() {
            inverted.add(delta.invert())?;
        }
        Ok(inverted)
    }

    #[must_use]
    pub fn counts(&self) -> DiffCounts {
        let mut counts = DiffCounts::default();
        for delta in self.feature.values() {
            match delta {
                Delta::Insert { .. } => counts.inserts += 1,
                Delta::Delete { .. } => counts.deletes += 1,
                Delta::Update { .. } => counts.updates += 1,
            }
        }
        counts
    }

    fn to_json(&self) -> serde_json::Value {
        let meta: serde_json::Map<_, _> = self
            .meta
            .iter()
            .map(|(name, change)| {
                let mut obj = serde_json::Map::new();
                if let Some(old) = &change.old {
                    obj.insert("-".into(), old.clone());
                }
                if let Some(new) = &change.new {
                    obj.insert("+".into(), new.clone());
                }
                (name.clone(), serde_json::Value::Object(obj))
            })
            .collect();
        let feature: Vec<_> = self.feature.values().map(Delta::to_json).collect();
        json!({ "meta": meta, "feature": feature })
    }
}

/// Changes across datasets, keyed by dataset path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    datasets: BTreeMap<String, DatasetDiff>,
}

impl Diff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the changes for one dataset, replacing any previous entry.
    pub fn insert(&mut self, path: impl Into<String>, diff: DatasetDiff) {
        self.datasets.insert(path.into(), diff);
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&DatasetDiff> {
        self.datasets.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DatasetDiff)> {
        self.datasets.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    /// Union of two diffs, dataset by dataset.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if both diffs change the same meta item or
    /// file a delta under the same key in the same dataset.
    pub fn combine(mut self, other: Self) -> Result<Self> {
        for (path, theirs) in other.datasets {
            let ours = self.datasets.entry(path.clone()).or_default();
            for (name, change) in theirs.meta {
                if ours.meta.contains_key(&name) {
                    return Err(Error::InvalidOperation(format!(
                        "conflicting changes for meta item {path}/{name}"
                    )));
                }
                ours.meta.insert(name, change);
            }
            for delta in theirs.feature.into_values() {
                ours.add(delta).map_err(|_| {
                    Error::InvalidOperation(format!("cannot combine diffs: {path} overlaps"))
                })?;
            }
        }
        Ok(self)
    }

    /// Drop no-op changes and datasets left without changes.
    pub fn prune(&mut self) {
        for diff in self.datasets.values_mut() {
            diff.prune();
        }
        self.datasets.retain(|_, diff| !diff.is_empty());
    }

    /// Invert every dataset diff.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a dataset diff cannot be inverted.
    pub fn invert(self) -> Result<Self> {
        let datasets = self
            .datasets
            .into_iter()
            .map(|(path, diff)| Ok((path, diff.invert()?)))
            .collect::<Result<_>>()?;
        Ok(Self { datasets })
    }

    /// True when no dataset has any meta or feature change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datasets.values().all(DatasetDiff::is_empty)
    }

    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, DiffCounts> {
        self.datasets
            .iter()
            .map(|(path, diff)| (path.clone(), diff.counts()))
            .collect()
    }

    /// Versioned JSON rendering for machine consumers.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let body: serde_json::Map<_, _> = self
            .datasets
            .iter()
            .map(|(path, diff)| (path.clone(), diff.to_json()))
            .collect();
        json!({ "strata.diff/v1": body })
    }
}

impl IntoIterator for Diff {
    type Item = (String, DatasetDiff);
    type IntoIter = std::collections::btree_map::IntoIter<String, DatasetDiff>;

    fn into_iter(self) -> Self::IntoIter {
        self.datasets.into_iter()
    }
}
