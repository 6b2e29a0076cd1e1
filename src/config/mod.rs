//! Configuration management.
//!
//! Strata keeps its settings in the git configuration of the repository it
//! manages, so they travel with the repository and need no extra files:
//!
//! - `strata.workingcopy.path`: working copy database, relative to the
//!   repository directory unless absolute
//! - `strata.workingcopy.version`: working copy layout version (must be `1`)
//!
//! Identity (`user.name` / `user.email`) is read from the same configuration
//! chain (repository, then global, then system).

use std::path::{Path, PathBuf};

use git2::{ErrorCode, Repository};

use crate::error::{Error, Result};

/// Config key holding the working copy path.
pub const WORKING_COPY_PATH_KEY: &str = "strata.workingcopy.path";
/// Config key holding the working copy layout version.
pub const WORKING_COPY_VERSION_KEY: &str = "strata.workingcopy.version";
/// The only supported working copy layout version.
pub const WORKING_COPY_VERSION: i32 = 1;
/// Environment variable naming the repository to operate on.
pub const REPO_ENV: &str = "STRATA_REPO";

/// Resolve which repository path to open.
///
/// Priority:
/// 1. `explicit` (the `--repo` flag)
/// 2. `STRATA_REPO` environment variable
/// 3. The current directory
#[must_use]
pub fn resolve_repo_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var(REPO_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from("."),
    }
}

/// Settings loaded from the repository's git configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoConfig {
    /// Working copy path as configured (possibly relative).
    pub working_copy_path: Option<PathBuf>,
    pub working_copy_version: Option<i32>,
}

impl RepoConfig {
    /// Load and validate the Strata settings.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an unsupported working copy version.
    pub fn load(repo: &Repository) -> Result<Self> {
        let config = repo.config()?.snapshot()?;
        let working_copy_path = optional(config.get_path(WORKING_COPY_PATH_KEY))?;
        let working_copy_version = optional(config.get_i32(WORKING_COPY_VERSION_KEY))?;

        if let Some(version) = working_copy_version.filter(|v| *v != WORKING_COPY_VERSION) {
            return Err(Error::Config(format!(
                "{WORKING_COPY_VERSION_KEY} = {version} is not supported (expected {WORKING_COPY_VERSION})"
            )));
        }
        Ok(Self {
            working_copy_path,
            working_copy_version,
        })
    }

    /// Record the working copy location in the repository config.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository config cannot be written.
    pub fn set_working_copy(repo: &Repository, path: &Path) -> Result<Self> {
        let mut config = repo.config()?.open_level(git2::ConfigLevel::Local)?;
        let text = path
            .to_str()
            .ok_or_else(|| Error::Config(format!("non-UTF-8 path {}", path.display())))?;
        config.set_str(WORKING_COPY_PATH_KEY, text)?;
        config.set_i32(WORKING_COPY_VERSION_KEY, WORKING_COPY_VERSION)?;
        Self::load(repo)
    }

    /// Working copy path resolved against the repository directory.
    #[must_use]
    pub fn resolved_working_copy_path(&self, base: &Path) -> Option<PathBuf> {
        self.working_copy_path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                base.join(p)
            }
        })
    }
}

fn optional<T>(result: std::result::Result<T, git2::Error>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_path_wins() {
        let p = resolve_repo_path(Some(Path::new("/data/repo")));
        assert_eq!(p, PathBuf::from("/data/repo"));
    }

    #[test]
    fn test_working_copy_roundtrip() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert_eq!(RepoConfig::load(&repo).unwrap(), RepoConfig::default());

        let config = RepoConfig::set_working_copy(&repo, Path::new("wc.sqlite")).unwrap();
        assert_eq!(config.working_copy_version, Some(WORKING_COPY_VERSION));
        assert_eq!(
            config.resolved_working_copy_path(dir.path()),
            Some(dir.path().join("wc.sqlite"))
        );
    }

    #[test]
    fn test_unsupported_version_is_config_error() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.config()
            .unwrap()
            .set_i32(WORKING_COPY_VERSION_KEY, 2)
            .unwrap();
        assert!(matches!(RepoConfig::load(&repo), Err(Error::Config(_))));
    }
}
