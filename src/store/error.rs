use std::path::PathBuf;

use thiserror::Error;

use crate::error::{Effect, ErrorKind, Transience};
use crate::git::GitError;

/// Document store failures, in the vocabulary callers act on.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// Remote unreachable, credentials refused, or a fatal git failure.
    #[error("repository {remote} unavailable: {source}")]
    RepositoryUnavailable {
        remote: String,
        #[source]
        source: GitError,
    },

    /// The local clone cannot be used; an operator must re-clone.
    #[error("local clone at {path} is unusable: {reason}")]
    RepositoryCorrupt { path: PathBuf, reason: String },

    /// Someone else changed the remote. Re-pull (read) and retry.
    #[error("conflict on {path} during {op}: {message}")]
    Conflict {
        path: String,
        op: &'static str,
        message: String,
    },

    /// Commit or push failed for a non-conflict reason; the local write was
    /// rolled back.
    #[error("write of {path} failed during {op}: {source}")]
    WriteFailed {
        path: String,
        op: &'static str,
        #[source]
        source: GitError,
    },

    #[error("invalid document path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("cannot serialize {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{op} of {path} failed: {source}")]
    Io {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("clone lock poisoned by a panicking writer")]
    LockPoisoned,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::RepositoryUnavailable { .. } | StoreError::LockPoisoned => {
                ErrorKind::RepositoryUnavailable
            }
            StoreError::RepositoryCorrupt { .. } => ErrorKind::RepositoryCorrupt,
            StoreError::Conflict { .. } => ErrorKind::Conflict,
            StoreError::WriteFailed { .. } => ErrorKind::WriteFailed,
            StoreError::InvalidPath { .. } | StoreError::Serialize { .. } => {
                ErrorKind::InvalidInput
            }
            StoreError::Io { op, .. } => match *op {
                "read" | "open" => ErrorKind::RepositoryUnavailable,
                _ => ErrorKind::WriteFailed,
            },
        }
    }

    /// Whether retrying this operation may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            // Retry after re-pulling.
            StoreError::Conflict { .. } => Transience::Retryable,
            StoreError::WriteFailed { source, .. } => source.transience(),
            StoreError::RepositoryUnavailable { source, .. } => source.transience(),
            StoreError::Io { .. } => Transience::Unknown,
            StoreError::RepositoryCorrupt { .. }
            | StoreError::InvalidPath { .. }
            | StoreError::Serialize { .. }
            | StoreError::LockPoisoned => Transience::Permanent,
        }
    }

    /// What we know about side effects when this error is returned.
    pub fn effect(&self) -> Effect {
        match self {
            // Rolled back locally; the remote never accepted the commit unless
            // the transfer timed out midway.
            StoreError::Conflict { .. } => Effect::None,
            StoreError::WriteFailed { source, .. } => match source {
                GitError::Timeout { .. } => Effect::Unknown,
                _ => Effect::None,
            },
            StoreError::Io { .. } => Effect::Unknown,
            _ => Effect::None,
        }
    }
}
