//! Persisted merge state.
//!
//! A merge that stops on conflicts is continued by later invocations, so
//! its heads and index live in one file in the git directory. The file is
//! replaced atomically (write temp, fsync, rename): a crash leaves either
//! the previous or the next state, never a torn one.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use git2::Oid;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::index::MergeIndex;
use crate::error::{Error, Result};
use crate::repo::RepoContext;

/// State file name, inside the git directory.
pub const MERGE_STATE_FILE: &str = "STRATA_MERGE";

/// Repository-wide state, derived from the persisted files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoState {
    Normal,
    Merging,
}

impl RepoState {
    /// Current state of the repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file exists but cannot be inspected.
    pub fn load(ctx: &RepoContext) -> Result<Self> {
        if state_path(ctx).try_exists()? {
            Ok(Self::Merging)
        } else {
            Ok(Self::Normal)
        }
    }
}

/// Everything needed to continue a merge in a later invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeState {
    pub ancestor: String,
    pub ours: String,
    pub theirs: String,
    /// How the user named the merged revision.
    pub theirs_name: String,
    pub message: String,
    pub index: MergeIndex,
}

impl MergeState {
    /// Load the in-progress merge, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read or parsed.
    pub fn load(ctx: &RepoContext) -> Result<Option<Self>> {
        let path = state_path(ctx);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the in-progress merge.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no merge is in progress.
    pub fn require(ctx: &RepoContext) -> Result<Self> {
        Self::load(ctx)?
            .ok_or_else(|| Error::InvalidOperation("There is no merge in progress".to_string()))
    }

    /// Persist atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, ctx: &RepoContext) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        atomic_write(&state_path(ctx), &text)?;
        debug!(conflicts = self.index.conflicts.len(), "saved merge state");
        Ok(())
    }

    /// Remove the state file, returning the repository to normal.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(ctx: &RepoContext) -> Result<()> {
        match fs::remove_file(state_path(ctx)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parsed commit ids: ancestor, ours, theirs.
    ///
    /// # Errors
    ///
    /// Returns an error if the file holds a malformed id.
    pub fn heads(&self) -> Result<(Oid, Oid, Oid)> {
        Ok((
            Oid::from_str(&self.ancestor)?,
            Oid::from_str(&self.ours)?,
            Oid::from_str(&self.theirs)?,
        ))
    }
}

fn state_path(ctx: &RepoContext) -> PathBuf {
    ctx.git_dir().join(MERGE_STATE_FILE)
}

/// Replace `path` with `content` atomically.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be written or renamed.
pub fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let temp_path = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    #[test]
    fn test_atomic_write_replaces() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state");
        atomic_write(&path, "one").unwrap();
        atomic_write(&path, "two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_state_lifecycle() {
        let fx = Fixture::new();
        let ctx = fx.context();
        assert_eq!(RepoState::load(&ctx).unwrap(), RepoState::Normal);
        assert!(matches!(
            MergeState::require(&ctx),
            Err(Error::InvalidOperation(_))
        ));

        let zero = Oid::zero().to_string();
        let state = MergeState {
            ancestor: zero.clone(),
            ours: zero.clone(),
            theirs: zero,
            theirs_name: "feature".into(),
            message: "Merge 'feature'".into(),
            index: MergeIndex::default(),
        };
        state.save(&ctx).unwrap();
        assert_eq!(RepoState::load(&ctx).unwrap(), RepoState::Merging);
        assert_eq!(MergeState::require(&ctx).unwrap(), state);
        assert_eq!(state.heads().unwrap().0, Oid::zero());

        MergeState::remove(&ctx).unwrap();
        MergeState::remove(&ctx).unwrap();
        assert_eq!(RepoState::load(&ctx).unwrap(), RepoState::Normal);
    }
}
