//! Command implementations.

pub mod checkout;
pub mod commit;
pub mod completions;
pub mod conflicts;
pub mod diff;
pub mod fsck;
pub mod import;
pub mod init;
pub mod merge;
pub mod resolve;
pub mod status;
pub mod version;

use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::repo::RepoContext;

/// Open the repository named by `--repo`, `STRATA_REPO` or the cwd.
fn open(repo: Option<&Path>) -> Result<RepoContext> {
    RepoContext::discover(repo)
}

/// Print one JSON document on stdout.
fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    println!("{payload}");
    Ok(())
}
