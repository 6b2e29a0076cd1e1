//! Strata CLI entry point.

use clap::Parser;
use std::process::ExitCode;
use strata::cli::commands;
use strata::cli::{Cli, Commands};
use strata::error::Error;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli) -> Result<(), Error> {
    let repo = cli.repo.as_deref();
    let json = cli.json;
    match &cli.command {
        Commands::Init { path, bare } => commands::init::execute(path.as_deref(), repo, *bare, json),
        Commands::Import(args) => commands::import::execute(args, repo, json),
        Commands::Checkout { path, force } => {
            commands::checkout::execute(path.as_deref(), *force, repo, json)
        }
        Commands::Commit {
            message,
            allow_empty,
        } => commands::commit::execute(message, *allow_empty, repo, json),
        Commands::Diff { revisions } => commands::diff::execute(revisions.as_deref(), repo, json),
        Commands::Status => commands::status::execute(repo, json),

        // Merging
        Commands::Merge(args) => commands::merge::execute(args, repo, json),
        Commands::Conflicts { flat } => commands::conflicts::execute(*flat, repo, json),
        Commands::Resolve(args) => commands::resolve::execute(args, repo, json),

        Commands::Fsck { reset_datasets } => commands::fsck::execute(reset_datasets, repo, json),
        Commands::Completions { shell } => commands::completions::execute(shell),
        Commands::Version => commands::version::execute(json),
    }
}
