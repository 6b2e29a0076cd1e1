//! Commit command implementation.

use crate::commit::{CommitResult, commit};
use crate::error::Result;
use colored::Colorize;
use std::path::Path;

/// Execute the commit command.
///
/// # Errors
///
/// Returns `InvalidOperation` when there is nothing to commit or a merge
/// is in progress, `Mismatch` when the working copy is stale.
pub fn execute(message: &str, allow_empty: bool, repo: Option<&Path>, json: bool) -> Result<()> {
    let ctx = super::open(repo)?;
    let result = commit(&ctx, message, allow_empty)?;

    if json {
        return super::print_json(&result.to_json());
    }
    print_human(&result);
    Ok(())
}

fn print_human(result: &CommitResult) {
    let branch = result.branch.as_deref().unwrap_or("detached HEAD");
    println!(
        "[{} {}] {}",
        branch,
        result.abbrev_commit.yellow(),
        result.message.lines().next().unwrap_or_default()
    );
    for (path, counts) in &result.changes {
        println!(
            "  {path}: {} inserts, {} updates, {} deletes",
            counts.inserts.to_string().green(),
            counts.updates.to_string().yellow(),
            counts.deletes.to_string().red()
        );
    }
    println!("  Date: {} ({})", result.commit_time, result.commit_time_offset);
}
