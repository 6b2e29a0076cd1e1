//! Explicit repository context threaded through every operation.

use std::path::{Path, PathBuf};

use git2::{ErrorCode, Repository, RepositoryInitOptions, Signature};
use tracing::debug;

use crate::config::{RepoConfig, resolve_repo_path};
use crate::error::{Error, Result};
use crate::working_copy::WorkingCopy;

/// An open repository plus its loaded configuration.
pub struct RepoContext {
    repo: Repository,
    config: RepoConfig,
}

impl std::fmt::Debug for RepoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoContext")
            .field("path", &self.repo.path())
            .field("config", &self.config)
            .finish()
    }
}

impl RepoContext {
    /// Open the repository at `path` (or the one containing it).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no repository exists there, or `Config` for
    /// invalid settings.
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                Error::not_found(format!("repository at {}", path.display()))
            } else {
                e.into()
            }
        })?;
        Self::from_repository(repo)
    }

    /// Open the repository named by `--repo`, `STRATA_REPO` or the cwd.
    ///
    /// # Errors
    ///
    /// As [`RepoContext::open`].
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        Self::open(&resolve_repo_path(explicit))
    }

    /// Create a new repository, bare or with a work tree.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a repository already exists at `path`.
    pub fn init(path: &Path, bare: bool) -> Result<Self> {
        if Repository::open(path).is_ok() {
            return Err(Error::InvalidArgument(format!(
                "a repository already exists at {}",
                path.display()
            )));
        }
        let mut options = RepositoryInitOptions::new();
        options.bare(bare).mkdir(true).initial_head("main");
        let repo = Repository::init_opts(path, &options)?;
        debug!(path = %path.display(), bare, "initialized repository");
        Self::from_repository(repo)
    }

    /// Wrap an already-open repository.
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid settings.
    pub fn from_repository(repo: Repository) -> Result<Self> {
        let config = RepoConfig::load(&repo)?;
        Ok(Self { repo, config })
    }

    #[must_use]
    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    #[must_use]
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Directory that relative settings are resolved against: the work tree
    /// for normal repositories, the git directory for bare ones.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        self.repo.workdir().unwrap_or_else(|| self.repo.path())
    }

    /// The git directory, where per-repository state files live.
    #[must_use]
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// Committer identity from git configuration.
    ///
    /// # Errors
    ///
    /// Returns `NoIdentity` if `user.name` or `user.email` is unset.
    pub fn signature(&self) -> Result<Signature<'static>> {
        self.repo.signature().map_err(|e| match e.code() {
            ErrorCode::NotFound => Error::NoIdentity,
            _ => e.into(),
        })
    }

    /// Current branch name, if `HEAD` points at one.
    #[must_use]
    pub fn branch(&self) -> Option<String> {
        let head = self.repo.find_reference("HEAD").ok()?;
        let target = head.symbolic_target()?;
        target.strip_prefix("refs/heads/").map(str::to_string)
    }

    /// Configured working copy path, resolved.
    #[must_use]
    pub fn working_copy_path(&self) -> Option<PathBuf> {
        self.config.resolved_working_copy_path(self.base_dir())
    }

    /// Record a new working copy location and reload the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository config cannot be written.
    pub fn set_working_copy_path(&mut self, path: &Path) -> Result<()> {
        self.config = RepoConfig::set_working_copy(&self.repo, path)?;
        Ok(())
    }

    /// Open the configured working copy, if one is configured and exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database exists but cannot be opened.
    pub fn working_copy(&self) -> Result<Option<WorkingCopy>> {
        match self.working_copy_path() {
            Some(path) if path.exists() => Ok(Some(WorkingCopy::open(&path)?)),
            _ => Ok(None),
        }
    }

    /// Open the configured working copy.
    ///
    /// # Errors
    ///
    /// Returns `NoWorkingCopy` if none is configured or the file is missing.
    pub fn require_working_copy(&self) -> Result<WorkingCopy> {
        self.working_copy()?.ok_or(Error::NoWorkingCopy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo");
        let ctx = RepoContext::init(&path, true).unwrap();
        assert!(ctx.repo().is_bare());
        assert_eq!(ctx.branch().as_deref(), Some("main"));
        assert!(matches!(
            RepoContext::init(&path, true),
            Err(Error::InvalidArgument(_))
        ));
        let reopened = RepoContext::open(&path).unwrap();
        assert!(reopened.working_copy().unwrap().is_none());
        assert!(matches!(
            reopened.require_working_copy(),
            Err(Error::NoWorkingCopy)
        ));
    }

    #[test]
    fn test_open_missing_repository() {
        let dir = TempDir::new().unwrap();
        let err = RepoContext::open(dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
