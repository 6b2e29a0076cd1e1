//! CLI definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;

/// Strata - version-controlled tabular datasets
#[derive(Parser, Debug)]
#[command(name = "strata", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Repository path (default: current directory)
    #[arg(long, global = true, env = "STRATA_REPO")]
    pub repo: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new repository
    Init {
        /// Directory to create (default: the --repo path or current directory)
        path: Option<PathBuf>,

        /// Create a bare repository
        #[arg(long)]
        bare: bool,
    },

    /// Import tables from a SQLite database, one commit per table
    Import(ImportArgs),

    /// Create or rebuild the working copy from HEAD
    Checkout {
        /// Working copy database (default: the configured one)
        path: Option<PathBuf>,

        /// Discard working copy changes and rebuild every table
        #[arg(long)]
        force: bool,
    },

    /// Commit working copy changes
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Allow a commit with no changes
        #[arg(long)]
        allow_empty: bool,
    },

    /// Show changes between revisions or the working copy
    Diff {
        /// `A..B` compares two revisions and `A` compares a revision with
        /// HEAD (default: HEAD against the working copy)
        revisions: Option<String>,
    },

    /// Show working copy status
    Status,

    /// Merge a revision into the current branch
    Merge(MergeArgs),

    /// List unresolved merge conflicts
    Conflicts {
        /// One conflict id per line instead of grouping
        #[arg(long)]
        flat: bool,
    },

    /// Resolve one merge conflict
    Resolve(ResolveArgs),

    /// Verify the working copy against HEAD
    Fsck {
        /// Rebuild this dataset's table before checking (repeatable)
        #[arg(long = "reset-dataset", value_name = "PATH")]
        reset_datasets: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print version information
    Version,
}

/// Supported shells for completions.
#[derive(ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// SQLite database to import from
    pub source: PathBuf,

    /// Tables to import (default: the only table, or all with --all-tables)
    pub tables: Vec<String>,

    /// Import every table in the source
    #[arg(long, conflicts_with = "tables")]
    pub all_tables: bool,

    /// Dataset path (single table only; default: the table name)
    #[arg(long)]
    pub path: Option<String>,

    /// Dataset layout version (0.0.1, 0.1.0, 0.2.0)
    #[arg(long, default_value = "0.2.0")]
    pub dataset_version: String,

    /// Commit message
    #[arg(short, long)]
    pub message: Option<String>,

    /// Assemble each dataset tree in memory instead of through an index
    #[arg(long)]
    pub fast: bool,
}

#[derive(clap::Args, Debug)]
pub struct MergeArgs {
    /// Revision to merge
    #[arg(required_unless_present_any = ["continue_merge", "abort"])]
    pub revision: Option<String>,

    /// Finish a merge whose conflicts are all resolved
    #[arg(long = "continue", conflicts_with_all = ["abort", "revision", "no_ff", "message"])]
    pub continue_merge: bool,

    /// Abandon the merge in progress
    #[arg(long, conflicts_with_all = ["revision", "no_ff", "message"])]
    pub abort: bool,

    /// Create a merge commit even when a fast-forward is possible
    #[arg(long)]
    pub no_ff: bool,

    /// Merge commit message
    #[arg(short, long)]
    pub message: Option<String>,
}

#[derive(clap::Args, Debug)]
#[command(group = clap::ArgGroup::new("resolution").required(true).args(["with", "with_file"]))]
pub struct ResolveArgs {
    /// Conflict id, e.g. `points:fid=3`
    pub conflict: String,

    /// Keep one version: ancestor, ours, theirs or delete
    #[arg(long)]
    pub with: Option<String>,

    /// JSON file with the feature (or array of features) to use instead
    #[arg(long)]
    pub with_file: Option<PathBuf>,
}
