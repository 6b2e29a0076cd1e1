//! The merge index: every feature a merge touches, the conflicts among
//! them, and the resolutions recorded so far.
//!
//! Conflicts are keyed by their position in `entries`, which is fixed when
//! the index is built, so a key stays valid whatever the features' primary
//! keys become once resolved.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Feature, PrimaryKey, feature_pk};

/// Index into [`MergeIndex::entries`].
pub type ConflictKey = usize;

/// One primary key touched by either side of a merge, with the feature
/// each of the three trees holds there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub dataset: String,
    pub key: PrimaryKey,
    pub ancestor: Option<Feature>,
    pub ours: Option<Feature>,
    pub theirs: Option<Feature>,
}

impl Entry {
    /// The three-way merged value, or `Err(())` when both sides changed
    /// the feature differently.
    #[allow(clippy::result_unit_err)]
    pub fn merged(&self) -> std::result::Result<Option<&Feature>, ()> {
        if self.ours == self.theirs || self.theirs == self.ancestor {
            Ok(self.ours.as_ref())
        } else if self.ours == self.ancestor {
            Ok(self.theirs.as_ref())
        } else {
            Err(())
        }
    }

    /// How the two sides collided.
    #[must_use]
    pub fn kind(&self) -> ConflictKind {
        match (&self.ancestor, &self.ours, &self.theirs) {
            (None, _, _) => ConflictKind::AddAdd,
            (Some(_), Some(_), None) => ConflictKind::EditDelete,
            (Some(_), None, Some(_)) => ConflictKind::DeleteEdit,
            (Some(_), _, _) => ConflictKind::EditEdit,
        }
    }

    /// Side selected by a resolution, as a list of zero or one features.
    fn side(&self, resolution: &Resolution) -> Vec<Feature> {
        let side = match resolution {
            Resolution::Ancestor => &self.ancestor,
            Resolution::Ours => &self.ours,
            Resolution::Theirs => &self.theirs,
            Resolution::Delete | Resolution::Features(_) => &None,
        };
        side.iter().cloned().collect()
    }
}

/// Kinds of feature conflict, ordered as they are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictKind {
    #[serde(rename = "add/add")]
    AddAdd,
    #[serde(rename = "edit/edit")]
    EditEdit,
    #[serde(rename = "edit/delete")]
    EditDelete,
    #[serde(rename = "delete/edit")]
    DeleteEdit,
}

impl ConflictKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AddAdd => "add/add",
            Self::EditEdit => "edit/edit",
            Self::EditDelete => "edit/delete",
            Self::DeleteEdit => "delete/edit",
        }
    }
}

/// How to resolve one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Ancestor,
    Ours,
    Theirs,
    Delete,
    /// Explicit replacement features; empty means delete.
    Features(Vec<Feature>),
}

impl std::str::FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ancestor" => Ok(Self::Ancestor),
            "ours" => Ok(Self::Ours),
            "theirs" => Ok(Self::Theirs),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidArgument(format!(
                "unknown resolution '{other}' (expected ancestor, ours, theirs or delete)"
            ))),
        }
    }
}

impl Resolution {
    /// Parse replacement features: one feature object or a list of them.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for anything else.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let features = if value.is_array() {
            serde_json::from_value(value)
        } else {
            serde_json::from_value(value).map(|f| vec![f])
        }
        .map_err(|e| Error::InvalidArgument(format!("bad replacement features: {e}")))?;
        Ok(Self::Features(features))
    }
}

/// Touched entries, conflicts and resolutions of an in-progress merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeIndex {
    /// Sorted by dataset, then key.
    pub entries: Vec<Entry>,
    pub conflicts: Vec<ConflictKey>,
    pub resolves: BTreeMap<ConflictKey, Vec<Feature>>,
    /// Primary key field of each dataset with entries.
    pub primary_keys: BTreeMap<String, String>,
}

impl MergeIndex {
    /// Add an entry, recording it as a conflict if the sides disagree.
    pub fn push(&mut self, entry: Entry) {
        if entry.merged().is_err() {
            self.conflicts.push(self.entries.len());
        }
        self.entries.push(entry);
    }

    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Conflict keys still lacking a resolution.
    pub fn unresolved(&self) -> impl Iterator<Item = ConflictKey> + '_ {
        self.conflicts
            .iter()
            .copied()
            .filter(|k| !self.resolves.contains_key(k))
    }

    /// `"<dataset>:<pk-field>=<pk>"` for a conflict.
    #[must_use]
    pub fn conflict_id(&self, key: ConflictKey) -> String {
        let entry = &self.entries[key];
        let field = self
            .primary_keys
            .get(&entry.dataset)
            .map_or("", String::as_str);
        format!("{}:{field}={}", entry.dataset, entry.key)
    }

    /// Find a conflict by the id [`MergeIndex::conflict_id`] gives it.
    ///
    /// Ids are matched verbatim, so text keys holding `:` or digits
    /// round-trip.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an id without a `:` and `=`, and
    /// `NotFound` if no conflict has this id.
    pub fn find(&self, id: &str) -> Result<ConflictKey> {
        if !id.contains(':') || !id.contains('=') {
            return Err(Error::InvalidArgument(format!(
                "bad conflict id '{id}' (expected <dataset>:<field>=<key>)"
            )));
        }
        self.conflicts
            .iter()
            .copied()
            .find(|&k| self.conflict_id(k) == id)
            .ok_or_else(|| Error::not_found(format!("conflict {id}")))
    }

    /// Record (or replace) the resolution of a conflict.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `key` is not a conflict, and
    /// `InvalidArgument` if a replacement feature lacks the dataset's
    /// primary key.
    pub fn resolve(&mut self, key: ConflictKey, resolution: &Resolution) -> Result<()> {
        if !self.conflicts.contains(&key) {
            return Err(Error::not_found(format!("conflict #{key}")));
        }
        let entry = &self.entries[key];
        let features = match resolution {
            Resolution::Features(features) => {
                let field = self
                    .primary_keys
                    .get(&entry.dataset)
                    .map_or("", String::as_str);
                for feature in features {
                    feature_pk(feature, field).map_err(|e| {
                        Error::InvalidArgument(format!("replacement feature: {e}"))
                    })?;
                }
                features.clone()
            }
            other => entry.side(other),
        };
        self.resolves.insert(key, features);
        Ok(())
    }

    /// Unresolved conflict ids grouped by dataset, then kind.
    #[must_use]
    pub fn listing(&self) -> BTreeMap<String, BTreeMap<ConflictKind, Vec<String>>> {
        let mut out: BTreeMap<String, BTreeMap<ConflictKind, Vec<String>>> = BTreeMap::new();
        for key in self.unresolved() {
            let entry = &self.entries[key];
            out.entry(entry.dataset.clone())
                .or_default()
                .entry(entry.kind())
                .or_default()
                .push(self.conflict_id(key));
        }
        out
    }

    /// Conflict ids in listing order.
    #[must_use]
    pub fn flat_listing(&self) -> Vec<String> {
        self.listing()
            .into_values()
            .flat_map(BTreeMap::into_values)
            .flatten()
            .collect()
    }

    /// Unresolved conflict counts per dataset and kind.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, BTreeMap<ConflictKind, usize>> {
        self.listing()
            .into_iter()
            .map(|(ds, kinds)| (ds, kinds.into_iter().map(|(k, ids)| (k, ids.len())).collect()))
            .collect()
    }

    /// Final value of every touched key, per dataset: merged values for
    /// clean entries, resolutions for conflicts. A resolution removes the
    /// conflicting key and then writes its features, which may carry other
    /// keys.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if any conflict is unresolved.
    pub fn merged_values(&self) -> Result<BTreeMap<String, BTreeMap<PrimaryKey, Option<Feature>>>> {
        let unresolved = self.unresolved().count();
        if unresolved > 0 {
            return Err(Error::InvalidOperation(format!(
                "{unresolved} conflict(s) are unresolved"
            )));
        }

        let mut out: BTreeMap<String, BTreeMap<PrimaryKey, Option<Feature>>> = BTreeMap::new();
        for entry in &self.entries {
            if let Ok(value) = entry.merged() {
                out.entry(entry.dataset.clone())
                    .or_default()
                    .insert(entry.key.clone(), value.cloned());
            }
        }
        for (&key, features) in &self.resolves {
            let entry = &self.entries[key];
            let field = self
                .primary_keys
                .get(&entry.dataset)
                .map_or("", String::as_str);
            let values = out.entry(entry.dataset.clone()).or_default();
            values.entry(entry.key.clone()).or_insert(None);
            for feature in features {
                values.insert(feature_pk(feature, field)?, Some(feature.clone()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    fn feature(fid: i64, name: &str) -> Feature {
        Feature::from([
            ("fid".to_string(), Value::Integer(fid)),
            ("name".to_string(), Value::Text(name.to_string())),
        ])
    }

    fn entry(key: i64, a: Option<&str>, o: Option<&str>, t: Option<&str>) -> Entry {
        Entry {
            dataset: "points".into(),
            key: PrimaryKey::Int(key),
            ancestor: a.map(|n| feature(key, n)),
            ours: o.map(|n| feature(key, n)),
            theirs: t.map(|n| feature(key, n)),
        }
    }

    fn index(entries: Vec<Entry>) -> MergeIndex {
        let mut index = MergeIndex::default();
        index.primary_keys.insert("points".into(), "fid".into());
        for e in entries {
            index.push(e);
        }
        index
    }

    #[test]
    fn test_three_way_rule() {
        assert_eq!(entry(1, Some("a"), Some("b"), Some("a")).merged(), Ok(Some(&feature(1, "b"))));
        assert_eq!(entry(1, Some("a"), Some("a"), Some("c")).merged(), Ok(Some(&feature(1, "c"))));
        assert_eq!(entry(1, Some("a"), Some("x"), Some("x")).merged(), Ok(Some(&feature(1, "x"))));
        assert_eq!(entry(1, Some("a"), None, None).merged(), Ok(None));
        assert!(entry(1, Some("a"), Some("b"), Some("c")).merged().is_err());
        assert!(entry(1, None, Some("b"), Some("c")).merged().is_err());
    }

    #[test]
    fn test_kinds_and_listing_order() {
        let index = index(vec![
            entry(1, Some("a"), Some("b"), Some("c")),
            entry(2, Some("a"), Some("b"), None),
            entry(3, Some("a"), None, Some("c")),
            entry(4, Some("a"), Some("b"), Some("a")),
            entry(9, None, Some("b"), Some("c")),
        ]);
        assert_eq!(index.conflicts, vec![0, 1, 2, 4]);
        assert_eq!(
            index.flat_listing(),
            vec![
                "points:fid=9",
                "points:fid=1",
                "points:fid=2",
                "points:fid=3",
            ]
        );
        assert_eq!(index.counts()["points"][&ConflictKind::AddAdd], 1);
    }

    #[test]
    fn test_find_and_resolve() {
        let mut index = index(vec![
            entry(1, Some("a"), Some("b"), Some("c")),
            entry(2, Some("a"), Some("a"), Some("c")),
        ]);
        assert_eq!(index.find("points:fid=1").unwrap(), 0);
        assert!(matches!(index.find("points:fid=2"), Err(Error::NotFound { .. })));
        assert!(matches!(index.find("points:name=1"), Err(Error::NotFound { .. })));
        assert!(matches!(index.find("garbage"), Err(Error::InvalidArgument(_))));

        assert_eq!(index.unresolved().count(), 1);
        assert!(index.merged_values().is_err());
        assert!(matches!(index.resolve(1, &Resolution::Ours), Err(Error::NotFound { .. })));
        index.resolve(0, &Resolution::Ours).unwrap();
        assert_eq!(index.resolves[&0], vec![feature(1, "b")]);
        index.resolve(0, &Resolution::Delete).unwrap();
        assert!(index.resolves[&0].is_empty());
        assert_eq!(index.unresolved().count(), 0);
        assert!(index.flat_listing().is_empty());

        let values = index.merged_values().unwrap();
        assert_eq!(values["points"][&PrimaryKey::Int(1)], None);
        assert_eq!(values["points"][&PrimaryKey::Int(2)], Some(feature(2, "c")));
    }

    #[test]
    fn test_find_text_keys_verbatim() {
        let text = |code: &str, name: &str| {
            Feature::from([
                ("code".to_string(), Value::Text(code.to_string())),
                ("name".to_string(), Value::Text(name.to_string())),
            ])
        };
        let edit_edit = |code: &str| Entry {
            dataset: "ds".into(),
            key: PrimaryKey::Text(code.to_string()),
            ancestor: Some(text(code, "a")),
            ours: Some(text(code, "b")),
            theirs: Some(text(code, "c")),
        };
        let mut index = MergeIndex::default();
        index.primary_keys.insert("ds".into(), "code".into());
        index.push(edit_edit("urn:nz:1"));
        index.push(edit_edit("007"));

        let listing = index.flat_listing();
        assert_eq!(listing, vec!["ds:code=urn:nz:1", "ds:code=007"]);
        for id in &listing {
            let key = index.find(id).unwrap();
            assert_eq!(&index.conflict_id(key), id);
            index.resolve(key, &Resolution::Theirs).unwrap();
        }
        assert!(matches!(index.find("ds:code=7"), Err(Error::NotFound { .. })));
        assert_eq!(index.unresolved().count(), 0);

        let values = &index.merged_values().unwrap()["ds"];
        assert_eq!(
            values[&PrimaryKey::Text("urn:nz:1".into())],
            Some(text("urn:nz:1", "c"))
        );
        assert_eq!(values[&PrimaryKey::Text("007".into())], Some(text("007", "c")));
    }

    #[test]
    fn test_split_resolution_writes_both_keys() {
        let mut index = index(vec![entry(98001, None, Some("o"), Some("t"))]);
        let split = vec![feature(98001, "kept"), feature(98002, "split")];
        index.resolve(0, &Resolution::Features(split)).unwrap();
        let values = &index.merged_values().unwrap()["points"];
        assert_eq!(values[&PrimaryKey::Int(98001)], Some(feature(98001, "kept")));
        assert_eq!(values[&PrimaryKey::Int(98002)], Some(feature(98002, "split")));

        let bad = vec![Feature::from([("name".to_string(), Value::Null)])];
        assert!(matches!(
            index.resolve(0, &Resolution::Features(bad)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_resolution_from_json() {
        let one = r#"{"fid": {"integer": 7}, "name": {"text": "x"}}"#;
        assert_eq!(
            Resolution::from_json(one).unwrap(),
            Resolution::Features(vec![feature(7, "x")])
        );
        let many = format!("[{one}, {one}]");
        let Resolution::Features(features) = Resolution::from_json(&many).unwrap() else {
            panic!("expected features");
        };
        assert_eq!(features.len(), 2);
        assert_eq!(Resolution::from_json("[]").unwrap(), Resolution::Features(vec![]));
        assert!(matches!(Resolution::from_json("42"), Err(Error::InvalidArgument(_))));
        assert_eq!("theirs".parse::<Resolution>().unwrap(), Resolution::Theirs);
        assert!("mine".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_index_survives_json() {
        let mut index = index(vec![entry(1, None, Some("b"), Some("c"))]);
        index.resolve(0, &Resolution::Theirs).unwrap();
        let text = serde_json::to_string(&index).unwrap();
        let back: MergeIndex = serde_json::from_str(&text).unwrap();
        assert_eq!(back, index);
    }
}
