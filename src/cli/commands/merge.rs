//! Merge command implementation.

use crate::cli::MergeArgs;
use crate::error::{Error, Result};
use crate::merge::{self, MergeOptions, MergeResult};
use colored::Colorize;
use std::path::Path;

/// Execute the merge command: start, `--continue` or `--abort`.
///
/// # Errors
///
/// Returns `InvalidOperation` for a merge in the wrong state (already
/// merging, nothing to continue, unresolved conflicts) and for a dirty
/// working copy.
pub fn execute(args: &MergeArgs, repo: Option<&Path>, json: bool) -> Result<()> {
    let ctx = super::open(repo)?;

    if args.abort {
        let state = merge::abort(&ctx)?;
        if json {
            return super::print_json(&serde_json::json!({
                "strata.merge/v1": { "aborted": true, "theirs": state.theirs }
            }));
        }
        println!("Merge of '{}' aborted", state.theirs_name);
        return Ok(());
    }

    let result = if args.continue_merge {
        merge::continue_merge(&ctx)?
    } else {
        let revision = args.revision.as_deref().ok_or_else(|| {
            Error::InvalidArgument("name a revision to merge".to_string())
        })?;
        let options = MergeOptions {
            no_ff: args.no_ff,
            message: args.message.clone(),
        };
        merge::merge(&ctx, revision, &options)?
    };

    if json {
        return super::print_json(&result.to_json());
    }
    print_human(&result);
    Ok(())
}

fn print_human(result: &MergeResult) {
    if result.no_op {
        println!("Already up to date");
        return;
    }
    if let Some(conflicts) = &result.conflicts {
        let total: usize = conflicts.values().flat_map(|kinds| kinds.values()).sum();
        println!("{}", format!("Merge stopped with {total} conflict(s):").red().bold());
        for (path, kinds) in conflicts {
            println!("  {}", path.cyan().bold());
            for (kind, n) in kinds {
                println!("    {}: {n}", kind.as_str());
            }
        }
        println!();
        println!("Resolve each with 'strata resolve <id> --with=<ours|theirs|ancestor|delete>',");
        println!("then run 'strata merge --continue' (or 'strata merge --abort').");
        return;
    }

    let commit = result.commit.as_deref().unwrap_or_default();
    let short = commit.get(..7).unwrap_or(commit);
    if result.fast_forward {
        println!("Fast-forwarded to {}", short.yellow());
    } else {
        println!("Merged as {}: {}", short.yellow(), result.message);
    }
}
