//! Remote I/O seam.
//!
//! Fetch and push are the only operations that leave the machine, and the only
//! places the store can block on the network. They sit behind [`Transport`] so
//! the store depends on behavior rather than on libgit2 directly.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::time::{Duration, Instant};

use git2::build::RepoBuilder;
use git2::{Cred, ErrorClass, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository};

use super::error::{GitError, PushRejected, is_non_fast_forward_message};

/// libgit2 re-invokes the credentials callback after every rejection.
const MAX_CREDENTIAL_ATTEMPTS: u8 = 3;

/// Capability: move commits between the clone and its remote.
///
/// # Laws
/// - `fetch` updates only `refs/remotes/<remote>/<branch>`; it never touches
///   the local branch, index or working tree.
/// - `push` must not silently swallow non-fast-forward rejections; they are
///   returned as [`GitError::NonFastForward`].
/// - Both honour `timeout` and report expiry as [`GitError::Timeout`].
///
/// [`Git2Transport`] can only check its deadline from libgit2's progress
/// callbacks. A connect that stalls, or a transfer that goes quiet before
/// sending anything, is bounded only by the OS and the server; libgit2's own
/// socket timeouts need `unsafe` and are not set.
pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        repo: &Repository,
        remote: &str,
        branch: &str,
        timeout: Option<Duration>,
    ) -> Result<(), GitError>;

    fn push(
        &self,
        repo: &Repository,
        remote: &str,
        branch: &str,
        timeout: Option<Duration>,
    ) -> Result<(), GitError>;
}

/// How to authenticate against the remote.
///
/// The token itself never lives in config; only the name of the environment
/// variable holding it.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub token_env: Option<String>,
}

impl Credentials {
    fn token(&self) -> Option<String> {
        self.token_env
            .as_deref()
            .and_then(|key| std::env::var(key).ok())
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}

/// Production transport over libgit2.
#[derive(Clone, Debug, Default)]
pub struct Git2Transport {
    credentials: Credentials,
}

impl Git2Transport {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl Transport for Git2Transport {
    fn fetch(
        &self,
        repo: &Repository,
        remote_name: &str,
        branch: &str,
        timeout: Option<Duration>,
    ) -> Result<(), GitError> {
        let mut remote = repo
            .find_remote(remote_name)
            .map_err(|_| GitError::RemoteNotFound(remote_name.to_string()))?;
        let deadline = Deadline::new(timeout);
        let refspec = fetch_refspec(remote_name, branch);

        let result = {
            let mut callbacks = auth_callbacks(repo.config().ok(), &self.credentials);
            callbacks.transfer_progress(|_| deadline.check());
            callbacks.sideband_progress(|_| deadline.check());
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(callbacks);
            remote.fetch(&[refspec.as_str()], Some(&mut fo), None)
        };

        match result {
            Ok(()) => Ok(()),
            Err(_) if deadline.expired() => Err(deadline.timeout_error("fetch")),
            Err(source) => Err(GitError::Fetch {
                remote: remote_name.to_string(),
                source,
            }),
        }
    }

    fn push(
        &self,
        repo: &Repository,
        remote_name: &str,
        branch: &str,
        timeout: Option<Duration>,
    ) -> Result<(), GitError> {
        let mut remote = repo
            .find_remote(remote_name)
            .map_err(|_| GitError::RemoteNotFound(remote_name.to_string()))?;
        let deadline = Deadline::new(timeout);
        let refname = branch_ref(branch);
        let refspec = format!("{refname}:{refname}");
        let status: RefCell<Option<String>> = RefCell::new(None);

        let result = {
            let mut callbacks = auth_callbacks(repo.config().ok(), &self.credentials);
            callbacks.sideband_progress(|_| deadline.check());
            callbacks.push_negotiation(|_updates| {
                if deadline.check() {
                    Ok(())
                } else {
                    Err(git2::Error::new(
                        ErrorCode::User,
                        ErrorClass::Callback,
                        "push deadline exceeded",
                    ))
                }
            });
            callbacks.push_update_reference(|_refname, remote_status| {
                if let Some(msg) = remote_status {
                    *status.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut po = PushOptions::new();
            po.remote_callbacks(callbacks);
            remote.push(&[refspec.as_str()], Some(&mut po))
        };

        if let Err(source) = result {
            if deadline.expired() {
                return Err(deadline.timeout_error("push"));
            }
            if source.code() == ErrorCode::NotFastForward
                || is_non_fast_forward_message(source.message())
            {
                return Err(GitError::NonFastForward { refname });
            }
            return Err(GitError::Push {
                remote: remote_name.to_string(),
                source,
            });
        }

        if let Some(message) = status.into_inner() {
            let rejected = PushRejected { refname, message };
            if rejected.is_non_fast_forward() {
                return Err(GitError::NonFastForward {
                    refname: rejected.refname,
                });
            }
            return Err(rejected.into());
        }

        Ok(())
    }
}

/// Clone `url` into `path` with the same credential handling as fetch/push.
pub fn clone_repository(
    url: &str,
    path: &Path,
    credentials: &Credentials,
    timeout: Option<Duration>,
) -> Result<Repository, GitError> {
    let deadline = Deadline::new(timeout);
    let result = {
        let mut callbacks = auth_callbacks(git2::Config::open_default().ok(), credentials);
        callbacks.transfer_progress(|_| deadline.check());
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(callbacks);
        RepoBuilder::new().fetch_options(fo).clone(url, path)
    };
    match result {
        Ok(repo) => Ok(repo),
        Err(_) if deadline.expired() => Err(deadline.timeout_error("clone")),
        Err(source) => Err(GitError::Clone {
            url: url.to_string(),
            source,
        }),
    }
}

pub fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}

pub fn tracking_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{remote}/{branch}")
}

fn fetch_refspec(remote: &str, branch: &str) -> String {
    format!("+{}:{}", branch_ref(branch), tracking_ref(remote, branch))
}

fn auth_callbacks<'a>(
    cfg: Option<git2::Config>,
    credentials: &Credentials,
) -> RemoteCallbacks<'a> {
    let token = credentials.token();
    let username = credentials.username.clone();
    let mut tries = 0u8;
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        tries += 1;
        if tries > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Http,
                "credentials rejected by remote",
            ));
        }
        if allowed.is_user_pass_plaintext()
            && let Some(token) = token.as_deref()
        {
            let user = username
                .as_deref()
                .or(username_from_url)
                .unwrap_or("oauth2");
            return Cred::userpass_plaintext(user, token);
        }
        if allowed.is_ssh_key()
            && let Some(user) = username_from_url
        {
            return Cred::ssh_key_from_agent(user);
        }
        if allowed.is_user_pass_plaintext()
            && let Some(ref cfg) = cfg
            && let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url)
        {
            return Ok(cred);
        }
        Cred::default()
    });
    callbacks
}

/// Wall-clock budget for one network operation, checked from libgit2
/// progress callbacks.
struct Deadline {
    started: Instant,
    limit: Option<Duration>,
    expired: Cell<bool>,
}

impl Deadline {
    fn new(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
            expired: Cell::new(false),
        }
    }

    /// `true` to keep going.
    fn check(&self) -> bool {
        if let Some(limit) = self.limit
            && self.started.elapsed() > limit
        {
            self.expired.set(true);
            return false;
        }
        true
    }

    fn expired(&self) -> bool {
        self.expired.get()
    }

    fn timeout_error(&self, op: &'static str) -> GitError {
        GitError::Timeout {
            op,
            after: self.started.elapsed(),
        }
    }
}
