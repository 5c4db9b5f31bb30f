//! Git error types.

use std::path::PathBuf;
use std::time::Duration;

use git2::Oid;
use thiserror::Error;

use super::failure::{FailureClass, classify};
use crate::error::{Effect, ErrorKind, Transience};

/// Errors raised by clone, fetch, integrate, commit and push operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GitError {
    #[error("failed to open repository at {0}: {1}")]
    OpenRepo(PathBuf, #[source] git2::Error),

    #[error("failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("remote `{0}` is not configured")]
    RemoteNotFound(String),

    #[error("failed to fetch from {remote}: {source}")]
    Fetch {
        remote: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to push to {remote}: {source}")]
    Push {
        remote: String,
        #[source]
        source: git2::Error,
    },

    #[error("push of {refname} rejected (non-fast-forward)")]
    NonFastForward { refname: String },

    #[error(transparent)]
    PushRejected(#[from] PushRejected),

    #[error("rebase onto {onto} stopped on conflicting paths {paths:?}")]
    RebaseConflict { onto: Oid, paths: Vec<String> },

    #[error("checkout blocked by local modifications: {0}")]
    CheckoutConflict(#[source] git2::Error),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl GitError {
    /// Conflict, transient or fatal; drives retry and caller outcome.
    pub fn failure_class(&self) -> FailureClass {
        classify(self)
    }

    /// Whether retrying this operation may succeed.
    pub fn transience(&self) -> Transience {
        match self.failure_class() {
            FailureClass::Transient | FailureClass::Conflict => Transience::Retryable,
            FailureClass::Fatal => Transience::Permanent,
        }
    }

    /// What we know about side effects when this error is returned.
    pub fn effect(&self) -> Effect {
        match self {
            // Push-phase errors occur after a local commit was created.
            GitError::NonFastForward { .. } | GitError::PushRejected(_) | GitError::Push { .. } => {
                Effect::Some
            }

            // A rebase is aborted before returning, a timed out transfer may
            // have landed partially.
            GitError::Timeout { .. } | GitError::Git(_) => Effect::Unknown,

            _ => Effect::None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.failure_class() {
            FailureClass::Conflict => ErrorKind::Conflict,
            FailureClass::Transient | FailureClass::Fatal => ErrorKind::RepositoryUnavailable,
        }
    }

    /// The underlying libgit2 error, when there is one.
    pub fn git2(&self) -> Option<&git2::Error> {
        match self {
            GitError::OpenRepo(_, source)
            | GitError::Clone { source, .. }
            | GitError::Fetch { source, .. }
            | GitError::Push { source, .. }
            | GitError::CheckoutConflict(source)
            | GitError::Git(source) => Some(source),
            _ => None,
        }
    }
}

/// Push was rejected by the remote with a status message.
#[derive(Error, Debug)]
#[error("push of {refname} rejected: {message}")]
pub struct PushRejected {
    pub refname: String,
    pub message: String,
}

impl PushRejected {
    /// Remote status strings that mean "someone else pushed first".
    pub fn is_non_fast_forward(&self) -> bool {
        is_non_fast_forward_message(&self.message)
    }
}

pub(crate) fn is_non_fast_forward_message(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("non-fast-forward")
        || msg.contains("non-fastforward")
        || msg.contains("fetch first")
        || msg.contains("rejected because the remote contains work")
}
