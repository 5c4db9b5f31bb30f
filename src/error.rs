use thiserror::Error;

use crate::config::ConfigError;
use crate::docs::DocError;
use crate::git::GitError;
use crate::history::HistoryError;
use crate::identity::InvalidActor;
use crate::store::StoreError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred (locally or remotely).
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Caller-facing error vocabulary.
///
/// This is what an HTTP layer switches on; it never needs to look at raw git
/// messages.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    RepositoryUnavailable,
    RepositoryCorrupt,
    Conflict,
    WriteFailed,
    CommitNotFound,
    PathNotFoundAtCommit,
    NotFound,
    InvalidInput,
    Forbidden,
    Config,
}

impl ErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Conflict => 409,
            ErrorKind::CommitNotFound | ErrorKind::PathNotFoundAtCommit | ErrorKind::NotFound => {
                404
            }
            ErrorKind::InvalidInput => 422,
            ErrorKind::Forbidden => 403,
            ErrorKind::RepositoryUnavailable
            | ErrorKind::RepositoryCorrupt
            | ErrorKind::WriteFailed
            | ErrorKind::Config => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RepositoryUnavailable => "repository_unavailable",
            ErrorKind::RepositoryCorrupt => "repository_corrupt",
            ErrorKind::Conflict => "conflict",
            ErrorKind::WriteFailed => "write_failed",
            ErrorKind::CommitNotFound => "commit_not_found",
            ErrorKind::PathNotFoundAtCommit => "path_not_found_at_commit",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Config => "config",
        }
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Doc(#[from] DocError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Identity(#[from] InvalidActor),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Store(e) => e.kind(),
            Error::History(e) => e.kind(),
            Error::Doc(e) => e.kind(),
            Error::Config(_) => ErrorKind::Config,
            Error::Git(e) => e.kind(),
            Error::Identity(_) => ErrorKind::InvalidInput,
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            Error::Store(e) => e.transience(),
            Error::History(e) => e.transience(),
            Error::Doc(_) | Error::Config(_) | Error::Identity(_) => Transience::Permanent,
            Error::Git(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Store(e) => e.effect(),
            Error::History(_) | Error::Doc(_) | Error::Config(_) | Error::Identity(_) => {
                Effect::None
            }
            Error::Git(e) => e.effect(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}
