//! Error taxonomy for the snapshot client.
//!
//! Every fallible library operation returns [`Result`]. Variants carry the
//! snapshot id and the action attempted wherever one is known, since several
//! snapshots are usually being worked on at once.
//!
//! | Variant | Raised by | Recovery |
//! |---------|-----------|----------|
//! | [`BackendUnavailable`](ClientError::BackendUnavailable) | any call | fatal, never retried |
//! | [`UnknownSnapshot`](ClientError::UnknownSnapshot) | registry | supply a valid reference |
//! | [`NoActiveSnapshot`](ClientError::NoActiveSnapshot) | scoped queries | load a snapshot first |
//! | [`QueryRejected`](ClientError::QueryRejected) | query engine | fix the query shape |
//! | [`SchemaDiscoveryFailed`](ClientError::SchemaDiscoveryFailed) | column probe | name columns explicitly |
//! | [`PaginationStalled`](ClientError::PaginationStalled) | `fetch_all` | none |
//! | [`SnapshotNotLoaded`](ClientError::SnapshotNotLoaded) | lock/unlock/settings | load first |
//! | [`DownloadJobNotFound`](ClientError::DownloadJobNotFound) | download | retry later |

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure or non-success status on a call that is not a table query.
    #[error("backend unavailable during {action}: {message}")]
    BackendUnavailable { action: String, message: String },

    #[error("unknown snapshot reference '{0}'")]
    UnknownSnapshot(String),

    #[error("no active snapshot for snapshot-scoped query on '{endpoint}'; load a snapshot first")]
    NoActiveSnapshot { endpoint: String },

    /// The backend refused the query. `message` is the backend's body, verbatim.
    #[error("query on '{endpoint}' rejected (HTTP {status}): {message}")]
    QueryRejected {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("column discovery failed for '{endpoint}': {reason}")]
    SchemaDiscoveryFailed { endpoint: String, reason: String },

    #[error(
        "pagination stalled on '{endpoint}': {pages} empty pages at start={start} with reported total {total}"
    )]
    PaginationStalled {
        endpoint: String,
        start: u64,
        total: u64,
        pages: u32,
    },

    #[error("cannot {action} snapshot {snapshot}: snapshot is not loaded")]
    SnapshotNotLoaded { snapshot: String, action: String },

    #[error("no download job found for snapshot {snapshot} after {attempts} attempts")]
    DownloadJobNotFound { snapshot: String, attempts: u32 },

    #[error("job '{job}' for snapshot {snapshot} did not finish within {waited_secs}s")]
    JobTimedOut {
        job: String,
        snapshot: String,
        waited_secs: u64,
    },

    #[error("job '{job}' for snapshot {snapshot} ended with status '{status}'")]
    JobFailed {
        job: String,
        snapshot: String,
        status: String,
    },

    #[error("invalid backend payload for {context}: {message}")]
    InvalidPayload { context: String, message: String },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    pub(crate) fn unavailable(action: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ClientError::BackendUnavailable {
            action: action.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn payload(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ClientError::InvalidPayload {
            context: context.into(),
            message: err.to_string(),
        }
    }
}
