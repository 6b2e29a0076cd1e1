//! Diff command implementation.

use crate::diff::{DatasetDiff, Delta, Diff, diff_structures};
use crate::error::Result;
use crate::model::{Feature, Value};
use crate::repo::RepoContext;
use crate::structure::RepositoryStructure;
use colored::Colorize;
use std::path::Path;

/// Execute the diff command.
///
/// With no revisions the working copy is compared with `HEAD`; `A` compares
/// `A` with `HEAD`; `A..B` compares two revisions.
///
/// # Errors
///
/// Returns `NotFound` for an unknown revision, `NoWorkingCopy` when
/// comparing with a working copy that does not exist.
pub fn execute(revisions: Option<&str>, repo: Option<&Path>, json: bool) -> Result<()> {
    let ctx = super::open(repo)?;
    let mut diff = compute(&ctx, revisions)?;
    diff.prune();
    tracing::debug!(datasets = diff.paths().count(), "computed diff");

    if json {
        return super::print_json(&diff.to_json());
    }
    print_human(&diff);
    Ok(())
}

fn compute(ctx: &RepoContext, revisions: Option<&str>) -> Result<Diff> {
    let repo = ctx.repo();
    match revisions {
        None => {
            let wc = ctx.require_working_copy()?;
            let head = RepositoryStructure::lookup(repo, "HEAD")?;
            wc.assert_tree_match(head.tree_id())?;
            wc.diff_to_structure(&head)
        }
        Some(spec) => {
            let (old, new) = spec.split_once("..").unwrap_or((spec, "HEAD"));
            let new = if new.is_empty() { "HEAD" } else { new };
            let old = RepositoryStructure::lookup(repo, old)?;
            let new = RepositoryStructure::lookup(repo, new)?;
            diff_structures(&old, &new)
        }
    }
}

fn print_human(diff: &Diff) {
    for (path, ds_diff) in diff.iter() {
        print_dataset(path, ds_diff);
    }
}

fn print_dataset(path: &str, diff: &DatasetDiff) {
    for (name, change) in &diff.meta {
        let label = format!("{path}:meta:{name}");
        if let Some(old) = &change.old {
            println!("{}", format!("--- {label}").bold());
            println!("{}", format!("- {old}").red());
        }
        if let Some(new) = &change.new {
            println!("{}", format!("+++ {label}").bold());
            println!("{}", format!("+ {new}").green());
        }
    }

    for delta in diff.feature.values() {
        match delta {
            Delta::Insert { key, value } => {
                println!("{}", format!("+++ {path}:feature:{key}").bold());
                for (column, v) in value {
                    println!("{}", format!("+ {column:>20} = {}", render(v)).green());
                }
            }
            Delta::Delete { key, value } => {
                println!("{}", format!("--- {path}:feature:{key}").bold());
                for (column, v) in value {
                    println!("{}", format!("- {column:>20} = {}", render(v)).red());
                }
            }
            Delta::Update {
                old_key,
                new_key,
                old_value,
                new_value,
            } => {
                println!("{}", format!("--- {path}:feature:{old_key}").bold());
                println!("{}", format!("+++ {path}:feature:{new_key}").bold());
                print_changed_columns(old_value, new_value);
            }
        }
    }
}

fn print_changed_columns(old: &Feature, new: &Feature) {
    for (column, old_v) in old {
        match new.get(column) {
            Some(new_v) if new_v == old_v => {}
            Some(new_v) => {
                println!("{}", format!("- {column:>20} = {}", render(old_v)).red());
                println!("{}", format!("+ {column:>20} = {}", render(new_v)).green());
            }
            None => println!("{}", format!("- {column:>20} = {}", render(old_v)).red()),
        }
    }
    for (column, new_v) in new.iter().filter(|(c, _)| !old.contains_key(*c)) {
        println!("{}", format!("+ {column:>20} = {}", render(new_v)).green());
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "␀".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) if b.len() > 32 => format!("{}… ({} bytes)", hex::encode(&b[..32]), b.len()),
        Value::Blob(b) => hex::encode(b),
    }
}
