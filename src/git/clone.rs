//! The local clone: one non-bare working tree bound to one remote.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::build::CheckoutBuilder;
use git2::{ErrorCode, Oid, Repository};

use super::error::GitError;
use super::pull::refname_to_id_optional;
use super::remote::{Credentials, branch_ref, clone_repository, tracking_ref};
use crate::store::StoreError;

/// How to bind the clone to its remote.
#[derive(Clone, Debug)]
pub struct CloneOptions {
    pub remote_name: String,
    pub branch: String,
    pub credentials: Credentials,
    pub timeout: Option<Duration>,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            remote_name: "origin".into(),
            branch: "main".into(),
            credentials: Credentials::default(),
            timeout: None,
        }
    }
}

/// Handle to the clone. Long-lived; one per process.
pub struct CloneHandle {
    repo: Repository,
    root: PathBuf,
    remote_name: String,
    remote_url: String,
    branch: String,
}

impl std::fmt::Debug for CloneHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneHandle")
            .field("root", &self.root)
            .field("remote_name", &self.remote_name)
            .field("remote_url", &self.remote_url)
            .field("branch", &self.branch)
            .finish()
    }
}

impl CloneHandle {
    /// Open the repository at `local_path`, or clone `remote_url` into it when
    /// the directory is absent or empty.
    pub fn open_or_init(
        local_path: &Path,
        remote_url: &str,
        options: &CloneOptions,
    ) -> Result<Self, StoreError> {
        let repo = if is_populated(local_path)? {
            tracing::debug!(path = %local_path.display(), "opening existing clone");
            Repository::open(local_path).map_err(|e| StoreError::RepositoryCorrupt {
                path: local_path.to_path_buf(),
                reason: format!("not a git repository: {}", e.message()),
            })?
        } else {
            tracing::info!(path = %local_path.display(), remote = remote_url, "cloning remote");
            fs::create_dir_all(local_path).map_err(|source| StoreError::Io {
                path: local_path.to_path_buf(),
                op: "clone",
                source,
            })?;
            clone_repository(remote_url, local_path, &options.credentials, options.timeout)
                .map_err(|source| StoreError::RepositoryUnavailable {
                    remote: remote_url.to_string(),
                    source,
                })?
        };

        let root = match repo.workdir() {
            Some(workdir) => workdir.to_path_buf(),
            None => {
                return Err(StoreError::RepositoryCorrupt {
                    path: local_path.to_path_buf(),
                    reason: "repository is bare".into(),
                });
            }
        };

        let handle = Self {
            repo,
            root,
            remote_name: options.remote_name.clone(),
            remote_url: remote_url.to_string(),
            branch: options.branch.clone(),
        };
        handle.verify()?;
        handle.ensure_remote()?;
        handle.ensure_branch()?;
        Ok(handle)
    }

    /// Reject bare clones and detached HEADs. Checked before every store call.
    pub fn verify(&self) -> Result<(), StoreError> {
        if self.repo.is_bare() {
            return Err(self.corrupt("repository is bare"));
        }
        let detached = self
            .repo
            .head_detached()
            .map_err(|e| self.corrupt(format!("cannot read HEAD: {}", e.message())))?;
        if detached {
            return Err(self.corrupt("HEAD is detached"));
        }
        Ok(())
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn branch_ref(&self) -> String {
        branch_ref(&self.branch)
    }

    /// Tip of the local branch; `None` while the branch is unborn.
    pub fn head_oid(&self) -> Result<Option<Oid>, GitError> {
        refname_to_id_optional(&self.repo, &self.branch_ref())
    }

    fn ensure_remote(&self) -> Result<(), StoreError> {
        match self.repo.find_remote(&self.remote_name) {
            Ok(remote) => {
                if remote.url() != Some(self.remote_url.as_str()) {
                    tracing::warn!(
                        remote = %self.remote_name,
                        configured = %self.remote_url,
                        actual = remote.url().unwrap_or("<non-utf8>"),
                        "clone remote url differs from configuration; keeping the clone's url"
                    );
                }
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                tracing::info!(remote = %self.remote_name, url = %self.remote_url, "adding remote");
                self.repo
                    .remote(&self.remote_name, &self.remote_url)
                    .map_err(|e| self.corrupt(format!("cannot add remote: {}", e.message())))?;
                Ok(())
            }
            Err(e) => Err(self.corrupt(format!("cannot read remote: {}", e.message()))),
        }
    }

    /// Point HEAD at the configured branch.
    fn ensure_branch(&self) -> Result<(), StoreError> {
        let wanted = self.branch_ref();
        let head = self
            .repo
            .find_reference("HEAD")
            .map_err(|e| self.corrupt(format!("cannot read HEAD: {}", e.message())))?;
        if head.symbolic_target() == Some(wanted.as_str()) {
            return Ok(());
        }
        drop(head);

        let git = |e: GitError| StoreError::RepositoryCorrupt {
            path: self.root.clone(),
            reason: e.to_string(),
        };
        if self.head_oid().map_err(git)?.is_none()
            && let Some(remote_oid) =
                refname_to_id_optional(&self.repo, &tracking_ref(&self.remote_name, &self.branch))
                    .map_err(git)?
        {
            let commit = self
                .repo
                .find_commit(remote_oid)
                .map_err(|e| git(e.into()))?;
            self.repo
                .branch(&self.branch, &commit, false)
                .map_err(|e| git(e.into()))?;
        }

        self.repo.set_head(&wanted).map_err(|e| git(e.into()))?;
        if self.head_oid().map_err(git)?.is_some() {
            let mut checkout = CheckoutBuilder::new();
            checkout.safe();
            self.repo
                .checkout_head(Some(&mut checkout))
                .map_err(|e| git(GitError::CheckoutConflict(e)))?;
        }
        tracing::info!(branch = %self.branch, "clone switched to configured branch");
        Ok(())
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::RepositoryCorrupt {
            path: self.root.clone(),
            reason: reason.into(),
        }
    }
}

fn is_populated(path: &Path) -> Result<bool, StoreError> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            op: "open",
            source,
        }),
    }
}
