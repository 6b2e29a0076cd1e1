//! Per-dataset view over a tree snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use git2::{FileMode, Index, IndexEntry, IndexTime, ObjectType, Oid, Repository, Tree, TreeEntry};
use tracing::debug;

use super::codec::{self, Codec, DatasetVersion, FeatureStorage, TABLE_DIR};
use crate::error::{Error, Result};
use crate::model::{Feature, PrimaryKey, Schema, Value, feature_pk};

/// Meta item naming the primary-key column.
pub const PRIMARY_KEY_ITEM: &str = "primary_key";
/// Meta item holding the [`Schema`].
pub const SCHEMA_ITEM: &str = "schema";

/// A dataset bound to a tree (or not yet written).
pub struct Dataset<'r> {
    repo: &'r Repository,
    path: String,
    codec: &'static Codec,
    pk_field: String,
    tree: Option<Tree<'r>>,
}

impl std::fmt::Debug for Dataset<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("path", &self.path)
            .field("version", &self.codec.version)
            .field("tree", &self.tree.as_ref().map(Tree::id))
            .finish_non_exhaustive()
    }
}

impl<'r> Dataset<'r> {
    /// Bind a dataset tree, sniffing its version to select the codec.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedVersion` for an unknown version tag and
    /// `InvalidArgument` when no primary key is recorded.
    pub fn instantiate(repo: &'r Repository, tree: Tree<'r>, path: &str) -> Result<Self> {
        let codec = codec::sniff(repo, &tree)?;
        let mut dataset = Self {
            repo,
            path: path.trim_matches('/').to_string(),
            codec,
            pk_field: String::new(),
            tree: Some(tree),
        };
        dataset.pk_field = match dataset.get_meta_item(PRIMARY_KEY_ITEM) {
            Ok(serde_json::Value::String(field)) => field,
            Ok(other) => {
                return Err(Error::InvalidArgument(format!(
                    "{}: primary_key meta item must be a string, got {other}",
                    dataset.path
                )));
            }
            Err(Error::NotFound { .. }) => dataset.schema()?.primary_key()?.to_string(),
            Err(e) => return Err(e),
        };
        Ok(dataset)
    }

    /// A dataset that has no tree yet, used as the target of an import.
    #[must_use]
    pub fn empty(repo: &'r Repository, path: &str, version: DatasetVersion, pk_field: &str) -> Self {
        Self {
            repo,
            path: path.trim_matches('/').to_string(),
            codec: codec::for_version(version),
            pk_field: pk_field.to_string(),
            tree: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn version(&self) -> DatasetVersion {
        self.codec.version
    }

    #[must_use]
    pub fn codec(&self) -> &'static Codec {
        self.codec
    }

    #[must_use]
    pub fn tree(&self) -> Option<&Tree<'r>> {
        self.tree.as_ref()
    }

    #[must_use]
    pub fn tree_id(&self) -> Option<Oid> {
        self.tree.as_ref().map(Tree::id)
    }

    #[must_use]
    pub fn repo(&self) -> &'r Repository {
        self.repo
    }

    /// Name of the primary-key column.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.pk_field
    }

    // ── Meta ─────────────────────────────────────────────────

    /// Read one meta item.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the item is not defined.
    pub fn get_meta_item(&self, name: &str) -> Result<serde_json::Value> {
        let rel = self.codec.meta_path(name);
        let entry = self
            .tree
            .as_ref()
            .and_then(|t| t.get_path(Path::new(&rel)).ok())
            .ok_or_else(|| Error::not_found(format!("meta item {}/{rel}", self.path)))?;
        let blob = self.repo.find_blob(entry.id())?;
        Ok(serde_json::from_slice(blob.content())?)
    }

    /// All meta items, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if an item cannot be read or parsed.
    pub fn meta_items(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let mut items = BTreeMap::new();
        let Some(meta_tree) = self.subtree(self.codec.meta_dir)? else {
            return Ok(items);
        };
        for entry in &meta_tree {
            if entry.kind() != Some(ObjectType::Blob) {
                continue;
            }
            let name = entry_name(&entry)?;
            let blob = self.repo.find_blob(entry.id())?;
            items.insert(name.to_string(), serde_json::from_slice(blob.content())?);
        }
        Ok(items)
    }

    /// The column layout.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the dataset has no schema item.
    pub fn schema(&self) -> Result<Schema> {
        Ok(serde_json::from_value(self.get_meta_item(SCHEMA_ITEM)?)?)
    }

    // ── Paths ────────────────────────────────────────────────

    /// Dataset-relative path of the feature with this key, if the layout
    /// derives paths from keys.
    #[must_use]
    pub fn feature_path(&self, pk: &PrimaryKey) -> Option<String> {
        self.codec.feature_path(pk)
    }

    /// Leaf name the codec assigns to a key, for checking stored paths.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for layouts that do not address features
    /// by primary key.
    pub fn encode_1pk_to_path(&self, pk: &PrimaryKey) -> Result<String> {
        if !self.codec.is_pk_addressable() {
            return Err(Error::InvalidOperation(format!(
                "dataset version {} does not address features by primary key",
                self.codec.version
            )));
        }
        Ok(self.codec.encode_pk(pk))
    }

    /// Repository-relative path of a dataset-relative path.
    #[must_use]
    pub fn full_path(&self, rel: &str) -> String {
        if self.path.is_empty() {
            rel.to_string()
        } else {
            format!("{}/{rel}", self.path)
        }
    }

    // ── Features ─────────────────────────────────────────────

    /// Lazy walk over all features. Each call starts a fresh walk.
    ///
    /// A feature root that cannot be read is yielded as a single error.
    #[must_use]
    pub fn features(&self) -> FeatureIter<'_, 'r> {
        let (root, pending) = match self.subtree(self.codec.feature_dir) {
            Ok(root) => (root, None),
            Err(e) => (None, Some(e)),
        };
        FeatureIter {
            dataset: self,
            pending,
            stack: root
                .into_iter()
                .map(|tree| Frame {
                    tree,
                    name: String::new(),
                    next: 0,
                    depth: 0,
                })
                .collect(),
        }
    }

    /// Decode the feature stored at a dataset-relative path.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing is stored there.
    pub fn feature_from_path(&self, rel: &str) -> Result<Feature> {
        let entry = self
            .tree
            .as_ref()
            .and_then(|t| t.get_path(Path::new(rel)).ok())
            .ok_or_else(|| Error::not_found(format!("feature {}", self.full_path(rel))))?;
        self.read_feature(&entry)
    }

    /// Look up one feature by primary key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no feature has this key.
    pub fn get_feature(&self, pk: &PrimaryKey) -> Result<Feature> {
        if let Some(rel) = self.feature_path(pk) {
            return self.feature_from_path(&rel);
        }
        for item in self.features() {
            let (_, feature) = item?;
            if feature_pk(&feature, &self.pk_field)? == *pk {
                return Ok(feature);
            }
        }
        Err(Error::not_found(format!(
            "feature {}:{}={pk}",
            self.path, self.pk_field
        )))
    }

    /// Look up many features at once; missing keys are left out.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored feature cannot be decoded.
    pub fn get_features<'k>(
        &self,
        pks: impl IntoIterator<Item = &'k PrimaryKey>,
    ) -> Result<BTreeMap<PrimaryKey, Feature>> {
        let mut found = BTreeMap::new();
        if self.codec.is_pk_addressable() {
            for pk in pks {
                match self.get_feature(pk) {
                    Ok(feature) => {
                        found.insert(pk.clone(), feature);
                    }
                    Err(Error::NotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            return Ok(found);
        }

        let wanted: BTreeSet<&PrimaryKey> = pks.into_iter().collect();
        if wanted.is_empty() {
            return Ok(found);
        }
        for item in self.features() {
            let (_, feature) = item?;
            let pk = feature_pk(&feature, &self.pk_field)?;
            if wanted.contains(&pk) {
                found.insert(pk, feature);
                if found.len() == wanted.len() {
                    break;
                }
            }
        }
        Ok(found)
    }

    /// Dataset-relative storage paths of the given keys that exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be walked.
    pub fn locate_features<'k>(
        &self,
        pks: impl IntoIterator<Item = &'k PrimaryKey>,
    ) -> Result<BTreeMap<PrimaryKey, String>> {
        let mut located = BTreeMap::new();
        let Some(tree) = self.tree.as_ref() else {
            return Ok(located);
        };
        if self.codec.is_pk_addressable() {
            for pk in pks {
                if let Some(rel) = self
                    .feature_path(pk)
                    .filter(|rel| tree.get_path(Path::new(rel)).is_ok())
                {
                    located.insert(pk.clone(), rel);
                }
            }
            return Ok(located);
        }

        let wanted: BTreeSet<&PrimaryKey> = pks.into_iter().collect();
        if wanted.is_empty() {
            return Ok(located);
        }
        let mut walk = self.features();
        while let Some(item) = walk.next() {
            let (id, feature) = item?;
            let pk = feature_pk(&feature, &self.pk_field)?;
            if wanted.contains(&pk) {
                let shard = walk.shard_path();
                located.insert(pk, format!("{}/{shard}/{id}", self.codec.feature_dir));
            }
        }
        Ok(located)
    }

    /// Number of features.
    ///
    /// With `fast`, leaf shard directories are counted without decoding any
    /// feature; this trusts the tree layout and may disagree with an exact
    /// count on a damaged tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be read.
    pub fn feature_count(&self, fast: bool) -> Result<usize> {
        if !fast {
            let mut count = 0;
            for item in self.features() {
                item?;
                count += 1;
            }
            return Ok(count);
        }

        let Some(root) = self.subtree(self.codec.feature_dir)? else {
            return Ok(0);
        };
        let mut count = 0;
        let mut stack = vec![(root, 0usize)];
        while let Some((tree, depth)) = stack.pop() {
            for entry in &tree {
                if depth == 0 && self.is_meta_entry(&entry) {
                    continue;
                }
                if depth == self.codec.shard_depth {
                    count += 1;
                } else if entry.kind() == Some(ObjectType::Tree) {
                    stack.push((self.repo.find_tree(entry.id())?, depth + 1));
                }
            }
        }
        Ok(count)
    }

    // ── Writing ──────────────────────────────────────────────

    /// Blobs making up one encoded feature, as dataset-relative paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing or a blob cannot be written.
    pub fn feature_blobs(&self, feature: &Feature) -> Result<Vec<(String, Oid)>> {
        let pk = feature_pk(feature, &self.pk_field)?;
        let rel = self.codec.allocate_path(&pk);
        match self.codec.storage {
            FeatureStorage::Blob => {
                let oid = self.repo.blob(&serde_json::to_vec(feature)?)?;
                Ok(vec![(rel, oid)])
            }
            FeatureStorage::Tree => feature
                .iter()
                .map(|(column, value)| {
                    let oid = self.repo.blob(&serde_json::to_vec(value)?)?;
                    Ok((format!("{rel}/{column}"), oid))
                })
                .collect(),
        }
    }

    /// Write one feature as a single tree entry: its dataset-relative path,
    /// object id and mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the feature cannot be encoded or written.
    pub fn write_feature(&self, feature: &Feature) -> Result<(String, Oid, FileMode)> {
        let pk = feature_pk(feature, &self.pk_field)?;
        let rel = self.codec.allocate_path(&pk);
        match self.codec.storage {
            FeatureStorage::Blob => {
                let oid = self.repo.blob(&serde_json::to_vec(feature)?)?;
                Ok((rel, oid, FileMode::Blob))
            }
            FeatureStorage::Tree => {
                let mut builder = self.repo.treebuilder(None)?;
                for (column, value) in feature {
                    let oid = self.repo.blob(&serde_json::to_vec(value)?)?;
                    builder.insert(column.as_str(), oid, FileMode::Blob.into())?;
                }
                Ok((rel, builder.write()?, FileMode::Tree))
            }
        }
    }

    /// Stage one encoded feature into an index, under this dataset's path.
    ///
    /// # Errors
    ///
    /// Returns an error if the feature cannot be encoded or staged.
    pub fn import_feature(&self, feature: &Feature, index: &mut Index) -> Result<()> {
        for (rel, oid) in self.feature_blobs(feature)? {
            stage_blob(index, &self.full_path(&rel), oid)?;
        }
        Ok(())
    }

    /// Blob for a meta item value, with its dataset-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be written.
    pub fn meta_blob(&self, name: &str, value: &serde_json::Value) -> Result<(String, Oid)> {
        let oid = self.repo.blob(&serde_json::to_vec(value)?)?;
        Ok((self.codec.meta_path(name), oid))
    }

    // ── Internals ────────────────────────────────────────────

    fn subtree(&self, rel: &str) -> Result<Option<Tree<'r>>> {
        let Some(tree) = self.tree.as_ref() else {
            return Ok(None);
        };
        match tree.get_path(Path::new(rel)) {
            Ok(entry) if entry.kind() == Some(ObjectType::Tree) => {
                Ok(Some(self.repo.find_tree(entry.id())?))
            }
            Ok(_) => Ok(None),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The meta directory sits inside the feature root for the newer layouts.
    fn is_meta_entry(&self, entry: &TreeEntry<'_>) -> bool {
        self.codec.feature_dir == TABLE_DIR && entry.name() == Some("meta")
    }

    fn read_feature(&self, entry: &TreeEntry<'_>) -> Result<Feature> {
        match (self.codec.storage, entry.kind()) {
            (FeatureStorage::Blob, Some(ObjectType::Blob)) => {
                let blob = self.repo.find_blob(entry.id())?;
                Ok(serde_json::from_slice(blob.content())?)
            }
            (FeatureStorage::Tree, Some(ObjectType::Tree)) => {
                let tree = self.repo.find_tree(entry.id())?;
                let mut feature = Feature::new();
                for column in &tree {
                    let blob = self.repo.find_blob(column.id())?;
                    let value: Value = serde_json::from_slice(blob.content())?;
                    feature.insert(entry_name(&column)?.to_string(), value);
                }
                Ok(feature)
            }
            (_, kind) => Err(Error::InvalidOperation(format!(
                "{}: unexpected {kind:?} entry '{}' in feature tree",
                self.path,
                entry.name().unwrap_or("<non-utf8>")
            ))),
        }
    }
}

/// Stage a blob at a repository-relative path.
///
/// # Errors
///
/// Returns an error if the index rejects the entry.
pub fn stage_blob(index: &mut Index, path: &str, oid: Oid) -> Result<()> {
    let entry = IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: u32::from(FileMode::Blob),
        uid: 0,
        gid: 0,
        file_size: 0,
        id: oid,
        flags: 0,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    };
    index.add(&entry)?;
    Ok(())
}

fn entry_name<'e>(entry: &'e TreeEntry<'_>) -> Result<&'e str> {
    entry
        .name()
        .ok_or_else(|| Error::InvalidOperation(format!("non-UTF-8 tree entry {}", entry.id())))
}

struct Frame<'r> {
    tree: Tree<'r>,
    name: String,
    next: usize,
    depth: usize,
}

/// Depth-first walk over a dataset's feature shards.
pub struct FeatureIter<'d, 'r> {
    dataset: &'d Dataset<'r>,
    pending: Option<Error>,
    stack: Vec<Frame<'r>>,
}

impl FeatureIter<'_, '_> {
    /// Shard directory names leading to the most recently yielded feature.
    fn shard_path(&self) -> String {
        self.stack
            .iter()
            .skip(1)
            .map(|frame| frame.name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Iterator for FeatureIter<'_, '_> {
    type Item = Result<(String, Feature)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending.take() {
            return Some(Err(e));
        }
        let shard_depth = self.dataset.codec.shard_depth;
        loop {
            let frame = self.stack.last_mut()?;
            let entry = frame.tree.get(frame.next).map(|e| e.to_owned());
            let Some(entry) = entry else {
                self.stack.pop();
                continue;
            };
            frame.next += 1;
            let depth = frame.depth;

            if depth == 0 && self.dataset.is_meta_entry(&entry) {
                continue;
            }
            if depth < shard_depth {
                if entry.kind() == Some(ObjectType::Tree) {
                    match self.dataset.repo.find_tree(entry.id()) {
                        Ok(tree) => self.stack.push(Frame {
                            tree,
                            name: entry.name().unwrap_or_default().to_string(),
                            next: 0,
                            depth: depth + 1,
                        }),
                        Err(e) => return Some(Err(e.into())),
                    }
                } else {
                    debug!(
                        dataset = %self.dataset.path,
                        entry = entry.name().unwrap_or_default(),
                        "skipping stray entry in shard directory"
                    );
                }
                continue;
            }

            let result = entry_name(&entry).and_then(|name| {
                let feature = self.dataset.read_feature(&entry)?;
                Ok((name.to_string(), feature))
            });
            return Some(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;
    use crate::structure::tree::TreeNode;
    use tempfile::TempDir;

    fn feature(fid: i64, name: &str) -> Feature {
        let mut f = Feature::new();
        f.insert("fid".into(), Value::Integer(fid));
        f.insert("name".into(), Value::Text(name.into()));
        f
    }

    /// Build a dataset tree at `ds` by hand from encoded features.
    fn build(repo: &Repository, version: DatasetVersion, n: i64) -> Tree<'_> {
        let staging = Dataset::empty(repo, "ds", version, "fid");
        let mut root = TreeNode::new();
        let schema = Schema::new(vec![
            Column {
                name: "fid".into(),
                data_type: "INTEGER".into(),
                primary_key: true,
            },
            Column {
                name: "name".into(),
                data_type: "TEXT".into(),
                primary_key: false,
            },
        ]);
        let items = [
            (codec::VERSION_ITEM, codec::version_item(version)),
            (SCHEMA_ITEM, serde_json::to_value(&schema).unwrap()),
            (PRIMARY_KEY_ITEM, serde_json::json!("fid")),
        ];
        for (name, value) in items {
            if version == DatasetVersion::V0_0_1 && name == codec::VERSION_ITEM {
                continue;
            }
            let (rel, oid) = staging.meta_blob(name, &value).unwrap();
            root.insert(&rel, oid).unwrap();
        }
        for i in 1..=n {
            for (rel, oid) in staging.feature_blobs(&feature(i, &format!("f{i}"))).unwrap() {
                root.insert(&rel, oid).unwrap();
            }
        }
        repo.find_tree(root.write(repo).unwrap()).unwrap()
    }

    fn each_version() -> [DatasetVersion; 3] {
        [
            DatasetVersion::V0_0_1,
            DatasetVersion::V0_1_0,
            DatasetVersion::V0_2_0,
        ]
    }

    #[test]
    fn test_sniff_and_enumerate_each_version() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        for version in each_version() {
            let tree = build(&repo, version, 12);
            let ds = Dataset::instantiate(&repo, tree, "ds").unwrap();
            assert_eq!(ds.version(), version);
            assert_eq!(ds.primary_key(), "fid");
            assert_eq!(ds.feature_count(false).unwrap(), 12);
            assert_eq!(ds.feature_count(true).unwrap(), 12);

            let mut seen: Vec<i64> = ds
                .features()
                .map(|r| match r.unwrap().1["fid"] {
                    Value::Integer(i) => i,
                    ref other => panic!("unexpected {other:?}"),
                })
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, (1..=12).collect::<Vec<_>>());

            assert_eq!(ds.get_feature(&PrimaryKey::Int(7)).unwrap(), feature(7, "f7"));
            assert!(matches!(
                ds.get_feature(&PrimaryKey::Int(99)),
                Err(Error::NotFound { .. })
            ));
        }
    }

    #[test]
    fn test_features_is_restartable() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        let ds = Dataset::instantiate(&repo, build(&repo, DatasetVersion::V0_2_0, 5), "ds").unwrap();
        let first: Vec<String> = ds.features().map(|r| r.unwrap().0).collect();
        let second: Vec<String> = ds.features().map(|r| r.unwrap().0).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn test_unreadable_feature_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let tree_id = {
            let repo = Repository::init_bare(dir.path()).unwrap();
            let tree = build(&repo, DatasetVersion::V0_0_1, 3);
            let root = tree.get_path(Path::new("features")).unwrap().id();
            let hex = root.to_string();
            std::fs::remove_file(dir.path().join("objects").join(&hex[..2]).join(&hex[2..]))
                .unwrap();
            tree.id()
        };

        let repo = Repository::open_bare(dir.path()).unwrap();
        let ds = Dataset::instantiate(&repo, repo.find_tree(tree_id).unwrap(), "ds").unwrap();
        let mut walk = ds.features();
        assert!(matches!(walk.next(), Some(Err(_))));
        assert!(walk.next().is_none());
        assert!(ds.feature_count(true).is_err());
    }

    #[test]
    fn test_meta_items_and_missing_item() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        let ds = Dataset::instantiate(&repo, build(&repo, DatasetVersion::V0_2_0, 1), "ds").unwrap();
        let items = ds.meta_items().unwrap();
        assert_eq!(items["version"], serde_json::json!({"version": "0.2.0"}));
        assert_eq!(ds.schema().unwrap().primary_key().unwrap(), "fid");
        assert!(matches!(
            ds.get_meta_item("crs"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_locate_and_batch_lookup_for_opaque_layout() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        let ds = Dataset::instantiate(&repo, build(&repo, DatasetVersion::V0_0_1, 6), "ds").unwrap();
        let keys = [PrimaryKey::Int(2), PrimaryKey::Int(5), PrimaryKey::Int(40)];

        let found = ds.get_features(&keys).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&PrimaryKey::Int(5)], feature(5, "f5"));

        let located = ds.locate_features(&keys).unwrap();
        assert_eq!(located.len(), 2);
        let rel = &located[&PrimaryKey::Int(2)];
        assert!(rel.starts_with("features/"));
        assert_eq!(ds.feature_from_path(rel).unwrap(), feature(2, "f2"));
        assert!(ds.encode_1pk_to_path(&PrimaryKey::Int(2)).is_err());
    }

    #[test]
    fn test_stored_path_matches_encoded_key() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        let ds = Dataset::instantiate(&repo, build(&repo, DatasetVersion::V0_1_0, 4), "ds").unwrap();
        for item in ds.features() {
            let (encoded, feature) = item.unwrap();
            let pk = feature_pk(&feature, "fid").unwrap();
            assert_eq!(ds.encode_1pk_to_path(&pk).unwrap(), encoded);
        }
    }
}
