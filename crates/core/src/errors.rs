//! Error types for the taskmerge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.
//!
//! Two outcomes are deliberately *not* errors: recording a modification for a
//! file that has no baseline (reported as `Ok(None)`), and a conflict region
//! that no strategy can resolve (reported as `MergeDecision::ManualRequired`).

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from read-only Git (git2) queries.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// A blob exists but is not valid UTF-8 text.
    #[error("content of '{path}' is not valid UTF-8")]
    NotUtf8 { path: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Evolution store errors
// ---------------------------------------------------------------------------

/// Errors from the evolution index and the baseline blob store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A baseline blob referenced by the index is missing on disk.
    #[error("baseline blob not found: {0}")]
    BlobNotFound(String),

    /// A snapshot pointer does not have the `baselines/<sha256>` shape.
    #[error("invalid baseline pointer: {0}")]
    InvalidPointer(String),

    /// An absolute path does not live under the project root.
    #[error("path '{0}' is outside the project root")]
    OutsideProject(String),

    /// The file is not UTF-8 text and cannot be tracked structurally.
    #[error("file '{0}' is not valid UTF-8 text")]
    BinaryContent(String),

    /// The index could not be (de)serialized.
    #[error("evolution index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The temp file could not be renamed over the destination.
    #[error("atomic write failed: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// The advisory project lock could not be taken.
    #[error("cannot lock '{path}': {detail}")]
    LockFailed { path: String, detail: String },

    /// Generic I/O wrapper.
    #[error("evolution store I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
