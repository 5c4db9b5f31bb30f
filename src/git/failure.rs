//! Failure classification and the per-operation attempt machine.
//!
//! Every git failure lands in exactly one of three classes:
//! - `Conflict`: someone else changed the remote, or local and remote edits
//!   collide. Needs a human (or at least a re-pull) and is never retried here.
//! - `Transient`: network blips, timeouts, remote ref lock contention. Retried
//!   once, then the read path degrades to stale data and the write path fails.
//! - `Fatal`: everything else (auth, corrupt objects, misconfiguration).
//!
//! ```text
//! Attempting --ok--------------> Done
//! Attempting --conflict--------> ConflictDetected
//! Attempting --transient-------> Retrying --> Attempting
//! Attempting --transient (2nd)-> DegradedStale (read) | WriteFailed (write)
//! Attempting --fatal-----------> Failed
//! ```

use git2::{ErrorClass, ErrorCode};

use super::error::{GitError, is_non_fast_forward_message};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FailureClass {
    Conflict,
    Transient,
    Fatal,
}

/// Which side of the store an attempt belongs to; decides the exhausted state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpKind {
    Read,
    Write,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AttemptState {
    Attempting,
    Retrying,
    Done,
    ConflictDetected,
    DegradedStale,
    WriteFailed,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptState::Attempting | AttemptState::Retrying)
    }
}

/// State machine for one logical git operation (pull or push).
#[derive(Debug, Clone)]
pub struct Attempt {
    kind: OpKind,
    state: AttemptState,
    retries_left: u8,
    attempts: u8,
}

impl Attempt {
    pub const MAX_RETRIES: u8 = 1;

    pub fn new(kind: OpKind) -> Self {
        Self {
            kind,
            state: AttemptState::Attempting,
            retries_left: Self::MAX_RETRIES,
            attempts: 1,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Number of times the operation has been started.
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn on_success(&mut self) -> AttemptState {
        if self.state == AttemptState::Attempting {
            self.state = AttemptState::Done;
        }
        self.state
    }

    pub fn on_failure(&mut self, class: FailureClass) -> AttemptState {
        if self.state != AttemptState::Attempting {
            return self.state;
        }
        self.state = match class {
            FailureClass::Conflict => AttemptState::ConflictDetected,
            FailureClass::Fatal => AttemptState::Failed,
            FailureClass::Transient if self.retries_left > 0 => {
                self.retries_left -= 1;
                AttemptState::Retrying
            }
            FailureClass::Transient => match self.kind {
                OpKind::Read => AttemptState::DegradedStale,
                OpKind::Write => AttemptState::WriteFailed,
            },
        };
        self.state
    }

    /// Leave `Retrying` and start the next attempt.
    pub fn retry(&mut self) -> AttemptState {
        if self.state == AttemptState::Retrying {
            self.state = AttemptState::Attempting;
            self.attempts += 1;
        }
        self.state
    }
}

/// Terminal result of driving an operation through [`Attempt`].
#[derive(Debug)]
pub enum Resolution<T> {
    Done(T),
    Conflict(GitError),
    /// Transient failures used up the retry budget.
    Exhausted(GitError),
    Fatal(GitError),
}

impl<T> Resolution<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Resolution::Done(_))
    }
}

/// Run `op` under the attempt machine: one retry on transient failure, no
/// retry on conflict or fatal failure.
pub fn drive<T>(
    kind: OpKind,
    op_name: &'static str,
    mut op: impl FnMut() -> Result<T, GitError>,
) -> Resolution<T> {
    let mut attempt = Attempt::new(kind);
    loop {
        match op() {
            Ok(value) => {
                attempt.on_success();
                return Resolution::Done(value);
            }
            Err(err) => match attempt.on_failure(err.failure_class()) {
                AttemptState::Retrying => {
                    tracing::warn!(
                        op = op_name,
                        attempt = attempt.attempts(),
                        error = %err,
                        "transient git failure; retrying once"
                    );
                    attempt.retry();
                }
                AttemptState::ConflictDetected => return Resolution::Conflict(err),
                AttemptState::DegradedStale | AttemptState::WriteFailed => {
                    tracing::warn!(
                        op = op_name,
                        attempt = attempt.attempts(),
                        error = %err,
                        "transient git failure persisted after retry"
                    );
                    return Resolution::Exhausted(err);
                }
                _ => return Resolution::Fatal(err),
            },
        }
    }
}

pub(crate) fn classify(err: &GitError) -> FailureClass {
    match err {
        GitError::NonFastForward { .. }
        | GitError::RebaseConflict { .. }
        | GitError::CheckoutConflict(_) => FailureClass::Conflict,
        GitError::PushRejected(rejected) => {
            if rejected.is_non_fast_forward() {
                FailureClass::Conflict
            } else if is_lock_contention(&rejected.message) {
                FailureClass::Transient
            } else {
                FailureClass::Fatal
            }
        }
        GitError::Timeout { .. } => FailureClass::Transient,
        GitError::Fetch { source, .. }
        | GitError::Push { source, .. }
        | GitError::Clone { source, .. } => classify_git2(source, true),
        GitError::Git(source) => classify_git2(source, false),
        GitError::OpenRepo(_, _) | GitError::RemoteNotFound(_) => FailureClass::Fatal,
    }
}

fn classify_git2(err: &git2::Error, network_phase: bool) -> FailureClass {
    match err.code() {
        ErrorCode::NotFastForward
        | ErrorCode::Conflict
        | ErrorCode::MergeConflict
        | ErrorCode::Unmerged => return FailureClass::Conflict,
        ErrorCode::Auth | ErrorCode::Certificate => return FailureClass::Fatal,
        ErrorCode::Locked => return FailureClass::Transient,
        _ => {}
    }
    if is_non_fast_forward_message(err.message()) {
        return FailureClass::Conflict;
    }
    if is_lock_contention(err.message()) {
        return FailureClass::Transient;
    }
    match err.class() {
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl | ErrorClass::Ssh => {
            FailureClass::Transient
        }
        // Socket and local-transport I/O errors surface as Os.
        ErrorClass::Os if network_phase => FailureClass::Transient,
        _ => FailureClass::Fatal,
    }
}

fn is_lock_contention(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("cannot lock ref") || msg.contains("failed to update ref")
}
