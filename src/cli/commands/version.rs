//! Version command implementation.

use crate::error::Result;
use serde::Serialize;

#[derive(Serialize)]
struct VersionOutput<'a> {
    version: &'a str,
    build: &'a str,
    git2: String,
    sqlite: &'a str,
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    let build = if cfg!(debug_assertions) {
        "dev"
    } else {
        "release"
    };
    let (major, minor, rev) = git2::Version::get().libgit2_version();
    let output = VersionOutput {
        version,
        build,
        git2: format!("{major}.{minor}.{rev}"),
        sqlite: rusqlite::version(),
    };

    if json {
        return super::print_json(&output);
    }

    println!("strata version {version} ({build})");
    println!("  libgit2 {}, SQLite {}", output.git2, output.sqlite);
    Ok(())
}
