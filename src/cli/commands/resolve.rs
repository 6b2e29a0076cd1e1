//! Resolve command implementation.

use crate::cli::ResolveArgs;
use crate::error::{Error, Result};
use crate::merge::{self, Resolution};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveOutput<'a> {
    conflict: &'a str,
    remaining: usize,
}

/// Execute the resolve command.
///
/// # Errors
///
/// Returns `InvalidArgument` for an unknown mode or malformed features,
/// `NotFound` for an unknown conflict id.
pub fn execute(args: &ResolveArgs, repo: Option<&Path>, json: bool) -> Result<()> {
    let resolution = match (&args.with, &args.with_file) {
        (Some(mode), None) => mode.parse::<Resolution>()?,
        (None, Some(file)) => Resolution::from_json(&std::fs::read_to_string(file)?)?,
        _ => {
            return Err(Error::InvalidArgument(
                "give exactly one of --with or --with-file".to_string(),
            ));
        }
    };

    let ctx = super::open(repo)?;
    let remaining = merge::resolve(&ctx, &args.conflict, &resolution)?;

    if json {
        return super::print_json(&ResolveOutput {
            conflict: &args.conflict,
            remaining,
        });
    }
    println!("Resolved {}", args.conflict);
    if remaining == 0 {
        println!("No conflicts remain; run 'strata merge --continue'");
    } else {
        println!("{remaining} conflict(s) remain");
    }
    Ok(())
}
