//! Fsck command implementation.

use crate::error::Result;
use crate::working_copy::fsck::{FsckReport, fsck};
use colored::Colorize;
use std::path::Path;

/// Execute the fsck command.
///
/// # Errors
///
/// Returns `Integrity` listing what failed, or `NoWorkingCopy`.
pub fn execute(reset_datasets: &[String], repo: Option<&Path>, json: bool) -> Result<()> {
    let ctx = super::open(repo)?;
    let report = fsck(&ctx, reset_datasets)?;

    if json {
        return super::print_json(&serde_json::json!({ "strata.fsck/v1": report }));
    }
    print_human(&report);
    Ok(())
}

fn print_human(report: &FsckReport) {
    println!(
        "Tree: {}",
        report.tree.as_deref().unwrap_or("<empty>").yellow()
    );
    for (path, ds) in &report.datasets {
        println!(
            "  {}: {} features, {} rows, {} dirty",
            path.cyan(),
            ds.features,
            ds.rows,
            ds.dirty
        );
    }
    println!("{}", "Working copy OK".green().bold());
}
