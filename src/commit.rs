//! Committing working copy edits.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use git2::Oid;
use serde::{Serialize, Serializer};
use tracing::info;

use crate::diff::DiffCounts;
use crate::error::{Error, Result};
use crate::merge::RepoState;
use crate::repo::RepoContext;
use crate::structure::RepositoryStructure;

/// Serialize an object id as its hex string.
///
/// # Errors
///
/// Propagates the serializer's error.
pub fn serialize_oid<S: Serializer>(oid: &Oid, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&oid.to_string())
}

/// Outcome of a commit, as reported to the user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    #[serde(serialize_with = "serialize_oid")]
    pub commit: Oid,
    pub abbrev_commit: String,
    pub author: String,
    pub committer: String,
    pub branch: Option<String>,
    pub message: String,
    pub changes: BTreeMap<String, DiffCounts>,
    /// UTC, RFC 3339.
    pub commit_time: String,
    /// Committer's offset from UTC, `±HH:MM`.
    pub commit_time_offset: String,
}

impl CommitResult {
    /// Describe an existing commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit cannot be read.
    pub fn from_commit(
        ctx: &RepoContext,
        oid: Oid,
        changes: BTreeMap<String, DiffCounts>,
    ) -> Result<Self> {
        let commit = ctx.repo().find_commit(oid)?;
        let short = commit.as_object().short_id()?;
        let time = commit.time();
        let utc = DateTime::<Utc>::from_timestamp(time.seconds(), 0)
            .ok_or_else(|| Error::Other(format!("bad commit time {}", time.seconds())))?;

        Ok(Self {
            commit: oid,
            abbrev_commit: short.as_str().unwrap_or_default().to_string(),
            author: commit.author().email().unwrap_or_default().to_string(),
            committer: commit.committer().email().unwrap_or_default().to_string(),
            branch: ctx.branch(),
            message: commit.message().unwrap_or_default().to_string(),
            changes,
            commit_time: utc.to_rfc3339_opts(SecondsFormat::Secs, true),
            commit_time_offset: format_offset(time.offset_minutes()),
        })
    }

    /// JSON envelope for the CLI.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "strata.commit/v1": self })
    }
}

fn format_offset(minutes: i32) -> String {
    FixedOffset::east_opt(minutes * 60).map_or_else(|| "+00:00".to_string(), |o| o.to_string())
}

/// Commit the working copy's edits on top of `HEAD`.
///
/// # Errors
///
/// Returns `InvalidOperation` during a merge or when there is nothing to
/// commit, `Mismatch` if the working copy is not based on `HEAD`, and
/// `NoIdentity` without a configured identity.
pub fn commit(ctx: &RepoContext, message: &str, allow_empty: bool) -> Result<CommitResult> {
    if RepoState::load(ctx)? != RepoState::Normal {
        return Err(Error::InvalidOperation(
            "cannot commit while merging".to_string(),
        ));
    }
    let mut wc = ctx.require_working_copy()?;
    let head = RepositoryStructure::lookup(ctx.repo(), "HEAD")?;
    wc.assert_tree_match(head.tree_id())?;

    let mut diff = wc.diff_to_structure(&head)?;
    diff.prune();
    let signature = ctx.signature()?;
    let oid = head.commit(&signature, &diff, message, allow_empty)?;

    let tree = ctx.repo().find_commit(oid)?.tree_id();
    wc.mark_synced(Some(tree))?;
    info!(commit = %oid, datasets = diff.paths().count(), "committed working copy");
    CommitResult::from_commit(ctx, oid, diff.counts())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PrimaryKey, Value};
    use crate::test_support::{Fixture, POINTS_TABLE};

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(0), "+00:00");
        assert_eq!(format_offset(720), "+12:00");
        assert_eq!(format_offset(-330), "-05:30");
    }

    #[test]
    fn test_commit_working_copy_edits() {
        let fx = Fixture::new();
        fx.import_points(5);
        let (ctx, wc) = fx.checkout();

        let err = commit(&ctx, "nothing", false).unwrap_err();
        assert_eq!(err.to_string(), "No changes to commit");

        wc.conn()
            .execute("UPDATE points SET name = 'renamed' WHERE fid = 2", [])
            .unwrap();
        wc.conn().execute("DELETE FROM points WHERE fid = 5", []).unwrap();
        let result = commit(&ctx, "Edit points", false).unwrap();
        assert_eq!(result.message, "Edit points");
        assert_eq!(result.branch.as_deref(), Some("main"));
        assert_eq!(result.author, "test@example.com");
        let counts = &result.changes[POINTS_TABLE];
        assert_eq!((counts.inserts, counts.updates, counts.deletes), (0, 1, 1));
        assert!(result.commit.to_string().starts_with(&result.abbrev_commit));

        assert!(!wc.is_dirty().unwrap());
        let head = RepositoryStructure::lookup(ctx.repo(), "HEAD").unwrap();
        wc.assert_tree_match(head.tree_id()).unwrap();
        let ds = head.get(POINTS_TABLE).unwrap();
        assert_eq!(
            ds.get_feature(&PrimaryKey::Int(2)).unwrap()["name"],
            Value::Text("renamed".into())
        );
        assert!(ds.get_feature(&PrimaryKey::Int(5)).is_err());

        let json = result.to_json();
        assert!(json["strata.commit/v1"]["abbrevCommit"].is_string());
        assert!(json["strata.commit/v1"]["commitTime"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_commit_refuses_stale_working_copy() {
        let fx = Fixture::new();
        fx.import_points(2);
        let (ctx, mut wc) = fx.checkout();
        wc.mark_synced(None).unwrap();
        wc.conn().execute("DELETE FROM points WHERE fid = 1", []).unwrap();
        assert!(matches!(
            commit(&ctx, "stale", false),
            Err(Error::Mismatch { .. })
        ));
    }
}
