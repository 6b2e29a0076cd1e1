//! Status command implementation.

use crate::error::Result;
use crate::merge::{MergeState, RepoState};
use crate::structure::RepositoryStructure;
use crate::diff::DiffCounts;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    branch: Option<String>,
    commit: Option<String>,
    state: RepoState,
    #[serde(skip_serializing_if = "Option::is_none")]
    merging: Option<MergingInfo>,
    working_copy: Option<PathBuf>,
    changes: Option<BTreeMap<String, DiffCounts>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MergingInfo {
    theirs: String,
    unresolved: usize,
}

/// Execute the status command.
///
/// # Errors
///
/// Returns `Mismatch` if the working copy is not based on `HEAD`.
pub fn execute(repo: Option<&Path>, json: bool) -> Result<()> {
    let ctx = super::open(repo)?;
    let head = RepositoryStructure::lookup(ctx.repo(), "HEAD")?;
    let state = RepoState::load(&ctx)?;
    let merging = MergeState::load(&ctx)?.map(|m| MergingInfo {
        unresolved: m.index.unresolved().count(),
        theirs: m.theirs_name,
    });

    let wc = ctx.working_copy()?;
    let changes = wc.as_ref().map(|wc| wc.status(&head)).transpose()?;
    let output = StatusOutput {
        branch: ctx.branch(),
        commit: head.git_commit().map(|c| c.id().to_string()),
        state,
        merging,
        working_copy: wc.map(|wc| wc.path().to_path_buf()),
        changes,
    };

    if json {
        return super::print_json(&serde_json::json!({ "strata.status/v1": output }));
    }
    print_human(&output);
    Ok(())
}

fn print_human(output: &StatusOutput) {
    match (&output.branch, &output.commit) {
        (Some(branch), Some(_)) => println!("On branch {}", branch.bold()),
        (Some(branch), None) => println!("On branch {} (no commits yet)", branch.bold()),
        (None, Some(commit)) => println!("HEAD detached at {}", &commit[..7]),
        (None, None) => println!("HEAD detached"),
    }

    if let Some(merging) = &output.merging {
        println!();
        println!("{}", format!("Merging '{}'", merging.theirs).yellow().bold());
        if merging.unresolved > 0 {
            println!(
                "  {} unresolved conflict(s); see 'strata conflicts'",
                merging.unresolved
            );
        } else {
            println!("  All conflicts resolved; run 'strata merge --continue'");
        }
    }

    println!();
    let Some(changes) = &output.changes else {
        println!("No working copy; run 'strata checkout <path>' to create one");
        return;
    };
    if changes.is_empty() {
        println!("Nothing to commit, working copy clean");
        return;
    }
    println!("Changes in working copy:");
    for (path, counts) in changes {
        println!("  {}", path.cyan().bold());
        for (label, n) in [
            ("inserts", counts.inserts),
            ("updates", counts.updates),
            ("deletes", counts.deletes),
        ] {
            if n > 0 {
                println!("    {n} {label}");
            }
        }
    }
}
