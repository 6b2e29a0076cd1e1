//! Import command implementation.

use crate::cli::ImportArgs;
use crate::error::{Error, Result};
use crate::import::{ImportOptions, ImportResult, SqliteImportSource, fast_import_table, import_table};
use crate::structure::{DatasetVersion, RepositoryStructure};
use crate::working_copy::WorkingCopy;
use std::path::Path;

/// Execute the import command.
///
/// Each table becomes one dataset and one commit on the current branch.
///
/// # Errors
///
/// Returns `InvalidOperation` when the working copy has uncommitted
/// changes, `InvalidArgument` when the table selection is ambiguous,
/// `AlreadyExists` when a dataset path is taken, and `UnsupportedVersion`
/// for an unknown `--dataset-version`.
pub fn execute(args: &ImportArgs, repo: Option<&Path>, json: bool) -> Result<()> {
    let ctx = super::open(repo)?;
    let signature = ctx.signature()?;
    let version: DatasetVersion = args.dataset_version.parse()?;
    let tables = select_tables(args)?;
    let mut wc = ctx.working_copy()?;
    if wc.as_ref().map(WorkingCopy::is_dirty).transpose()? == Some(true) {
        return Err(Error::InvalidOperation(
            "the working copy has uncommitted changes; commit them before importing".to_string(),
        ));
    }

    let mut results: Vec<ImportResult> = Vec::with_capacity(tables.len());
    for table in &tables {
        let source = SqliteImportSource::open(&args.source, table)?;
        let options = ImportOptions {
            path: args.path.clone(),
            version,
            message: args.message.clone(),
        };
        let result = if args.fast {
            fast_import_table(ctx.repo(), &signature, &source, &options)?
        } else {
            import_table(ctx.repo(), &signature, &source, &options)?
        };
        if !json {
            println!(
                "Imported {} features to {}/ ({}) as {}",
                result.feature_count,
                result.path,
                result.version,
                &result.commit.to_string()[..7]
            );
        }
        results.push(result);
    }

    // Bring an existing working copy up to the new HEAD.
    if let Some(wc) = &mut wc {
        let head = RepositoryStructure::lookup(ctx.repo(), "HEAD")?;
        wc.reset(&head, false)?;
    }

    if json {
        return super::print_json(&serde_json::json!({ "strata.import/v1": results }));
    }
    Ok(())
}

fn select_tables(args: &ImportArgs) -> Result<Vec<String>> {
    if !args.tables.is_empty() {
        if args.path.is_some() && args.tables.len() > 1 {
            return Err(Error::InvalidArgument(
                "--path needs exactly one table".to_string(),
            ));
        }
        return Ok(args.tables.clone());
    }

    let available = SqliteImportSource::list_tables(&args.source)?;
    match available.len() {
        0 => Err(Error::not_found(format!(
            "tables in {}",
            args.source.display()
        ))),
        1 => Ok(available),
        _ if args.all_tables && args.path.is_none() => Ok(available),
        _ if args.all_tables => Err(Error::InvalidArgument(
            "--path cannot be used with --all-tables".to_string(),
        )),
        _ => Err(Error::InvalidArgument(format!(
            "{} has several tables; name them or use --all-tables: {}",
            args.source.display(),
            available.join(", ")
        ))),
    }
}
