//! Conflicts command implementation.

use crate::error::Result;
use crate::merge::{MergeState, conflicts_json};
use colored::Colorize;
use std::path::Path;

/// Execute the conflicts command.
///
/// # Errors
///
/// Returns `InvalidOperation` if no merge is in progress.
pub fn execute(flat: bool, repo: Option<&Path>, json: bool) -> Result<()> {
    let ctx = super::open(repo)?;
    let state = MergeState::require(&ctx)?;

    if json {
        return super::print_json(&conflicts_json(&state.index, flat));
    }

    if flat {
        for id in state.index.flat_listing() {
            println!("{id}");
        }
        return Ok(());
    }

    let listing = state.index.listing();
    if listing.is_empty() {
        println!("No unresolved conflicts; run 'strata merge --continue'");
        return Ok(());
    }
    for (path, kinds) in listing {
        println!("{}", format!("{path}:").cyan().bold());
        for (kind, ids) in kinds {
            println!("  {}:", kind.as_str().yellow());
            for id in ids {
                println!("    {id}");
            }
        }
    }
    Ok(())
}
