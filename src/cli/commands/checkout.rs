//! Checkout command implementation.

use crate::error::Result;
use crate::working_copy;
use std::path::Path;

/// Execute the checkout command.
///
/// # Errors
///
/// Returns `NoWorkingCopy` when no path is given or configured, and
/// `Mismatch` when the existing working copy is out of date (use `--force`).
pub fn execute(path: Option<&Path>, force: bool, repo: Option<&Path>, json: bool) -> Result<()> {
    let mut ctx = super::open(repo)?;
    let result = working_copy::checkout(&mut ctx, path, force)?;

    if json {
        return super::print_json(&serde_json::json!({ "strata.checkout/v1": result }));
    }

    if result.rebuilt {
        println!(
            "Wrote {} dataset(s) to {}",
            result.datasets,
            result.path.display()
        );
    } else {
        println!("Working copy {} is up to date", result.path.display());
    }
    Ok(())
}
