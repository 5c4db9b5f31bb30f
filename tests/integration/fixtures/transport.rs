use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use git2::Repository;
use pdm_store::git::{Git2Transport, GitError, Transport};

/// Real transport with injectable faults and call counters.
#[derive(Default)]
pub struct FaultyTransport {
    inner: Git2Transport,
    fetch_calls: AtomicUsize,
    push_calls: AtomicUsize,
    fetch_failures: AtomicUsize,
    push_failures: AtomicUsize,
    reject_pushes: AtomicBool,
}

impl FaultyTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` fetches time out.
    pub fn fail_fetches(&self, n: usize) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` pushes time out.
    pub fn fail_pushes(&self, n: usize) {
        self.push_failures.store(n, Ordering::SeqCst);
    }

    /// Every push is rejected as non-fast-forward until turned off.
    pub fn reject_pushes(&self, on: bool) {
        self.reject_pushes.store(on, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.fetch_calls() + self.push_calls()
    }

    pub fn reset_counts(&self) {
        self.fetch_calls.store(0, Ordering::SeqCst);
        self.push_calls.store(0, Ordering::SeqCst);
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Transport for FaultyTransport {
    fn fetch(
        &self,
        repo: &Repository,
        remote: &str,
        branch: &str,
        timeout: Option<Duration>,
    ) -> Result<(), GitError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.fetch_failures) {
            return Err(GitError::Timeout {
                op: "fetch",
                after: Duration::from_millis(1),
            });
        }
        self.inner.fetch(repo, remote, branch, timeout)
    }

    fn push(
        &self,
        repo: &Repository,
        remote: &str,
        branch: &str,
        timeout: Option<Duration>,
    ) -> Result<(), GitError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_pushes.load(Ordering::SeqCst) {
            return Err(GitError::NonFastForward {
                refname: format!("refs/heads/{branch}"),
            });
        }
        if take_one(&self.push_failures) {
            return Err(GitError::Timeout {
                op: "push",
                after: Duration::from_millis(1),
            });
        }
        self.inner.push(repo, remote, branch, timeout)
    }
}
