//! Shared fixtures for unit tests.

use git2::{Oid, Repository, RepositoryInitOptions, Signature};
use rusqlite::Connection;
use tempfile::TempDir;

use crate::diff::{DatasetDiff, Delta, Diff, MetaChange};
use crate::import::{ImportOptions, SqliteImportSource, import_table};
use crate::model::{Feature, PrimaryKey, Value, feature_pk};
use crate::repo::RepoContext;
use crate::structure::{Dataset, DatasetVersion, RepositoryStructure};
use crate::working_copy::{self, WorkingCopy};

/// Table name (and default dataset path) of the sample data.
pub const POINTS_TABLE: &str = "points";

const NAME: &str = "Test User";
const EMAIL: &str = "test@example.com";

/// The `i`th sample row.
pub fn point(i: i64) -> Feature {
    let mut geom = vec![0x01, 0x01, 0x00, 0x00, 0x00];
    geom.extend_from_slice(&i.to_le_bytes());
    Feature::from([
        ("fid".to_string(), Value::Integer(i)),
        ("name".to_string(), Value::Text(format!("point {i}"))),
        ("geom".to_string(), Value::Blob(geom)),
        ("rating".to_string(), Value::Real(0.5 * f64::from((i % 10) as i32))),
    ])
}

/// A bare repository with an identity, in a scratch directory.
pub struct Fixture {
    dir: TempDir,
    pub repo: Repository,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut options = RepositoryInitOptions::new();
        options.bare(true).initial_head("main");
        let repo = Repository::init_opts(dir.path().join("repo.git"), &options).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", NAME).unwrap();
            config.set_str("user.email", EMAIL).unwrap();
        }
        Self { dir, repo }
    }

    pub fn signature(&self) -> Signature<'static> {
        Signature::now(NAME, EMAIL).unwrap()
    }

    /// A fresh context on the fixture repository.
    pub fn context(&self) -> RepoContext {
        RepoContext::open(self.repo.path()).unwrap()
    }

    /// A SQLite database holding `n` sample rows.
    pub fn points_source(&self, n: usize) -> SqliteImportSource {
        let path = self.dir.path().join(format!("points-{n}.sqlite"));
        if !path.exists() {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE points (fid INTEGER PRIMARY KEY, name TEXT, geom BLOB, rating REAL);",
            )
            .unwrap();
            let mut stmt = conn
                .prepare("INSERT INTO points (fid, name, geom, rating) VALUES (?1, ?2, ?3, ?4)")
                .unwrap();
            for i in 1..=i64::try_from(n).unwrap() {
                let p = point(i);
                stmt.execute([&p["fid"], &p["name"], &p["geom"], &p["rating"]])
                    .unwrap();
            }
        }
        SqliteImportSource::open(&path, POINTS_TABLE).unwrap()
    }

    /// Import `n` sample rows as `points` on `main`.
    pub fn import_points(&self, n: usize) -> Oid {
        self.import_points_as(n, DatasetVersion::DEFAULT)
    }

    /// Import `n` sample rows as `points` on `main`, in the given layout.
    pub fn import_points_as(&self, n: usize, version: DatasetVersion) -> Oid {
        let source = self.points_source(n);
        let options = ImportOptions {
            version,
            ..ImportOptions::default()
        };
        import_table(&self.repo, &self.signature(), &source, &options)
            .unwrap()
            .commit
    }

    /// Check out a working copy in the scratch directory.
    pub fn checkout(&self) -> (RepoContext, WorkingCopy) {
        let mut ctx = self.context();
        let path = self.dir.path().join("wc.sqlite");
        working_copy::checkout(&mut ctx, Some(&path), false).unwrap();
        let wc = ctx.require_working_copy().unwrap();
        (ctx, wc)
    }

    /// Create `name` at the current `HEAD`.
    pub fn branch(&self, name: &str) {
        let head = self.repo.head().unwrap().peel_to_commit().unwrap();
        self.repo.branch(name, &head, false).unwrap();
    }

    /// Commit upserts and deletes of sample points on `branch`.
    pub fn commit_points(&self, branch: &str, upserts: &[Feature], deletes: &[i64]) -> Oid {
        self.commit_on(branch, |ds| {
            let mut keys: Vec<PrimaryKey> =
                upserts.iter().map(|f| feature_pk(f, "fid").unwrap()).collect();
            keys.extend(deletes.iter().map(|&d| PrimaryKey::Int(d)));
            let current = ds.get_features(&keys).unwrap();

            let mut diff = DatasetDiff::new();
            for feature in upserts {
                let key = feature_pk(feature, "fid").unwrap();
                let delta = match current.get(&key) {
                    Some(old) => Delta::Update {
                        old_key: key.clone(),
                        new_key: key,
                        old_value: old.clone(),
                        new_value: feature.clone(),
                    },
                    None => Delta::Insert {
                        key,
                        value: feature.clone(),
                    },
                };
                diff.add(delta).unwrap();
            }
            for &fid in deletes {
                let key = PrimaryKey::Int(fid);
                let value = current[&key].clone();
                diff.add(Delta::Delete { key, value }).unwrap();
            }
            diff
        })
    }

    /// Commit a meta item change on `branch`.
    pub fn set_meta(&self, branch: &str, name: &str, value: serde_json::Value) -> Oid {
        self.commit_on(branch, |ds| {
            let mut diff = DatasetDiff::new();
            diff.meta.insert(
                name.to_string(),
                MetaChange {
                    old: ds.get_meta_item(name).ok(),
                    new: Some(value),
                },
            );
            diff
        })
    }

    fn commit_on(&self, branch: &str, build: impl FnOnce(&Dataset<'_>) -> DatasetDiff) -> Oid {
        let refname = format!("refs/heads/{branch}");
        let structure = RepositoryStructure::lookup(&self.repo, &refname).unwrap();
        let dataset = structure.get(POINTS_TABLE).unwrap();
        let mut diff = Diff::new();
        diff.insert(POINTS_TABLE, build(&dataset));

        let tree = self
            .repo
            .find_tree(structure.create_tree_from_diff(&diff).unwrap())
            .unwrap();
        let parent = structure.git_commit().unwrap();
        let sig = self.signature();
        self.repo
            .commit(
                Some(&refname),
                &sig,
                &sig,
                &format!("Edit points on {branch}"),
                &tree,
                &[parent],
            )
            .unwrap()
    }
}
