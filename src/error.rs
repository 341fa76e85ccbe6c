//! Error types for `secretary`.

use crate::ids::{ProjectId, RecordId};
use chrono::{DateTime, Utc};

/// Errors that can occur in the tracker core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced identifier does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// The entity kind, e.g. `"task"`.
        kind: &'static str,
        /// The raw identifier that failed to resolve.
        id: u64,
    },

    /// More than one tag target was supplied where exactly one is required.
    #[error("more than one tag target supplied; specify exactly one of task, record or project")]
    AmbiguousTarget,

    /// No tag target was supplied where exactly one is required.
    #[error("no tag target supplied; specify exactly one of task, record or project")]
    MissingTarget,

    /// A time range starts after it ends.
    #[error("invalid range: begin {begin} is after end {end}")]
    InvalidRange {
        /// Start of the range.
        begin: DateTime<Utc>,
        /// End of the range.
        end: DateTime<Utc>,
    },

    /// A record was closed twice.
    #[error("record {0} is already closed")]
    AlreadyClosed(RecordId),

    /// A project is already attached somewhere in the tree.
    #[error("project {0} is already attached to the tree")]
    DuplicateNode(ProjectId),

    /// A tree path does not resolve to an existing node.
    #[error("tree path does not resolve to an existing node")]
    InvalidPath,

    /// A subtree move would place the subtree inside itself.
    #[error("cannot move a subtree into itself")]
    CyclicMove,

    /// A project span is shorter than the summed task estimates.
    #[error("project span of {span} minutes is shorter than the {required} minutes estimated for its tasks")]
    SpanTooShort {
        /// The requested span in minutes.
        span: i64,
        /// The minimum span required by the member tasks.
        required: i64,
    },

    /// An unrecognized status string was supplied.
    #[error("invalid status: '{0}' (must be one of: active, archived)")]
    InvalidStatus(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON serialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML parsing error occurred.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A `SQLite` database error occurred.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    /// Build a [`Error::NotFound`] for an entity kind and raw id.
    #[must_use]
    pub const fn not_found(kind: &'static str, id: u64) -> Self {
        Self::NotFound { kind, id }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
