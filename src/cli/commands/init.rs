//! Create a repository.

use crate::config::resolve_repo_path;
use crate::error::Result;
use crate::repo::RepoContext;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitOutput {
    path: PathBuf,
    git_dir: PathBuf,
    bare: bool,
    branch: Option<String>,
}

/// Execute the init command.
///
/// The target is `path` if given, else `--repo` / `STRATA_REPO`, else the
/// current directory.
///
/// # Errors
///
/// Returns `InvalidArgument` if a repository is already there.
pub fn execute(path: Option<&Path>, repo: Option<&Path>, bare: bool, json: bool) -> Result<()> {
    let target = path.map_or_else(|| resolve_repo_path(repo), Path::to_path_buf);
    let ctx = RepoContext::init(&target, bare)?;

    let output = InitOutput {
        path: std::path::absolute(&target)?,
        git_dir: ctx.git_dir().to_path_buf(),
        bare,
        branch: ctx.branch(),
    };
    if json {
        return super::print_json(&output);
    }

    let kind = if bare { "bare repository" } else { "repository" };
    println!("Initialized empty {kind} in {}", output.path.display());
    println!();
    println!("Next: 'strata import <db.sqlite>' to add a dataset.");
    Ok(())
}
