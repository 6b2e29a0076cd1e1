//! Error types for Strata.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=repository, 3=not_found, 5=invalid_operation, etc.)
//! - Retryability flags for callers that can act and try again
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use thiserror::Error;

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of integrity errors reported before a scan gives up.
pub const MAX_INTEGRITY_ERRORS: usize = 100;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Repository / database (exit 2)
    RepositoryError,
    DatabaseError,
    NoWorkingCopy,

    // Not Found (exit 3)
    NotFound,

    // Validation (exit 4)
    InvalidArgument,
    AlreadyExists,

    // Operation (exit 5)
    InvalidOperation,

    // Working copy (exit 6)
    WorkingCopyMismatch,
    IntegrityError,

    // Config (exit 7)
    ConfigError,
    NoIdentity,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Versioning (exit 9)
    UnsupportedVersion,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::RepositoryError => "REPOSITORY_ERROR",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::NoWorkingCopy => "NO_WORKING_COPY",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::WorkingCopyMismatch => "WORKING_COPY_MISMATCH",
            Self::IntegrityError => "INTEGRITY_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::NoIdentity => "NO_IDENTITY",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::RepositoryError | Self::DatabaseError | Self::NoWorkingCopy => 2,
            Self::NotFound => 3,
            Self::InvalidArgument | Self::AlreadyExists => 4,
            Self::InvalidOperation => 5,
            Self::WorkingCopyMismatch | Self::IntegrityError => 6,
            Self::ConfigError | Self::NoIdentity => 7,
            Self::IoError | Self::JsonError => 8,
            Self::UnsupportedVersion => 9,
        }
    }

    /// Whether the caller can act (resolve, rebuild, fix input) and retry.
    ///
    /// False for missing objects, unknown versions, and I/O failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument
                | Self::InvalidOperation
                | Self::WorkingCopyMismatch
                | Self::NoIdentity
                | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in Strata operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error(
        "Working copy is out of sync: repository tree is {expected}, working copy tree is {}",
        actual.as_deref().unwrap_or("<none>")
    )]
    Mismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("Unsupported dataset version: {0}")]
    UnsupportedVersion(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("{path}/ already exists")]
    AlreadyExists { path: String },

    #[error("Integrity check failed ({} error(s))", errors.len())]
    Integrity { errors: Vec<String> },

    #[error("No working copy")]
    NoWorkingCopy,

    #[error("No identity configured (user.name / user.email)")]
    NoIdentity,

    #[error("Repository error: {0}")]
    Git(#[from] git2::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Mismatch { .. } => ErrorCode::WorkingCopyMismatch,
            Self::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            Self::InvalidOperation(_) => ErrorCode::InvalidOperation,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::Integrity { .. } => ErrorCode::IntegrityError,
            Self::NoWorkingCopy => ErrorCode::NoWorkingCopy,
            Self::NoIdentity => ErrorCode::NoIdentity,
            Self::Git(_) => ErrorCode::RepositoryError,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Mismatch { .. } => Some(
                "This might be fixable via `strata checkout --force`, which rebuilds \
                 the working copy from HEAD (uncommitted edits are lost)."
                    .to_string(),
            ),

            Self::NoWorkingCopy => {
                Some("No working copy configured. Create one with `strata checkout <path>`.".to_string())
            }

            Self::NoIdentity => Some(
                "Please tell me who you are. Run\n\n  \
                 git config --global user.email \"you@example.com\"\n  \
                 git config --global user.name \"Your Name\"\n\n\
                 to set your account's default identity. Omit --global to set the \
                 identity only in this repository."
                    .to_string(),
            ),

            Self::UnsupportedVersion(v) => Some(format!(
                "Dataset version '{v}' is not known to this build. Upgrade strata to read it."
            )),

            Self::InvalidOperation(msg) if msg.contains("unresolved") => Some(
                "List conflicts with `strata conflicts`, resolve each with \
                 `strata resolve <id> --with=<ancestor|ours|theirs|delete>`, then run \
                 `strata merge --continue`."
                    .to_string(),
            ),

            Self::InvalidOperation(msg) if msg.contains("merging") => Some(
                "A merge is in progress. Finish it with `strata merge --continue` or \
                 discard it with `strata merge --abort`."
                    .to_string(),
            ),

            Self::Integrity { errors } => {
                let mut hint = String::new();
                for e in errors.iter().take(5) {
                    hint.push_str(&format!("  {e}\n"));
                }
                if errors.len() > 5 {
                    hint.push_str(&format!("  ... and {} more\n", errors.len() - 5));
                }
                hint.push_str("  Use `strata fsck --reset-dataset <path>` to rebuild a table.");
                Some(hint)
            }

            Self::AlreadyExists { path } => Some(format!(
                "Choose a different dataset path, or remove '{path}' first."
            )),

            Self::NotFound { .. }
            | Self::InvalidOperation(_)
            | Self::Git(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
