//! Document store: JSON files in the clone, read after a pull and written as
//! attributed commits that must reach the remote.
//!
//! Concurrency control across processes is the remote's push rejection. Within
//! a process a mutex serializes everything that touches the working tree.

mod document;
mod error;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use git2::{Oid, ResetType, Signature};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use document::{DocStatus, Freshness, Mapping, Snapshot, validate_path};
pub use error::StoreError;

use crate::config::Config;
use crate::git::{
    CloneHandle, CloneOptions, Git2Transport, GitError, OpKind, Resolution, Transport, drive,
    pull_rebase,
};
use crate::history::{History, HistoryError};
use crate::identity::Actor;

/// Runtime options derived from [`Config`].
#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub remote: CloneOptions,
    pub committer_name: String,
    pub committer_email: String,
    /// Authors are recorded as `<username>@<domain>`.
    pub author_email_domain: String,
    pub lfs_enabled: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            remote: CloneOptions::default(),
            committer_name: "PDM App".into(),
            committer_email: "pdm@localhost".into(),
            author_email_domain: "pdm.local".into(),
            lfs_enabled: true,
        }
    }
}

impl StoreOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.remote.timeout
    }

    fn committer(&self) -> Result<Signature<'static>, git2::Error> {
        Signature::now(&self.committer_name, &self.committer_email)
    }

    fn author(&self, actor: &Actor) -> Result<Signature<'static>, git2::Error> {
        let email = format!("{}@{}", actor.username(), self.author_email_domain);
        Signature::now(actor.username(), &email)
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed(CommitInfo),
    /// Content identical to HEAD; no commit, no push.
    Unchanged,
}

impl WriteOutcome {
    pub fn commit(&self) -> Option<&CommitInfo> {
        match self {
            WriteOutcome::Committed(info) => Some(info),
            WriteOutcome::Unchanged => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub author: String,
    pub paths: Vec<String>,
}

struct PendingDoc {
    rel: String,
    bytes: Vec<u8>,
}

/// Pre-write content of one path, for rollback.
struct Backup {
    abs: PathBuf,
    prior: Option<Vec<u8>>,
}

impl Backup {
    fn capture(abs: PathBuf) -> Result<Self, StoreError> {
        let prior = match fs::read(&abs) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(StoreError::Io {
                    path: abs,
                    op: "read",
                    source,
                });
            }
        };
        Ok(Self { abs, prior })
    }

    fn restore(&self) -> io::Result<()> {
        match &self.prior {
            Some(bytes) => document::write_atomic(&self.abs, bytes),
            None => match fs::remove_file(&self.abs) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        }
    }
}

pub struct DocumentStore {
    clone: Mutex<CloneHandle>,
    transport: Arc<dyn Transport>,
    options: StoreOptions,
    root: PathBuf,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("root", &self.root)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Open (or clone) the configured repository and sync it once.
    pub fn open(config: &Config) -> crate::Result<Self> {
        let (path, remote_url) = config.repository.require()?;
        let options = config.store_options();
        let transport = Arc::new(Git2Transport::new(options.remote.credentials.clone()));
        Ok(Self::open_with(&path, &remote_url, options, transport)?)
    }

    pub fn open_with(
        local_path: &Path,
        remote_url: &str,
        options: StoreOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, StoreError> {
        let clone = CloneHandle::open_or_init(local_path, remote_url, &options.remote)?;
        let store = Self::from_clone(clone, transport, options);
        let freshness = store.sync()?;
        tracing::info!(
            root = %store.root.display(),
            remote = remote_url,
            ?freshness,
            "document store ready"
        );
        Ok(store)
    }

    pub fn from_clone(
        clone: CloneHandle,
        transport: Arc<dyn Transport>,
        options: StoreOptions,
    ) -> Self {
        let root = clone.root().to_path_buf();
        Self {
            clone: Mutex::new(clone),
            transport,
            options,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Historical lookups over the same clone, on their own repository handle.
    pub fn history(&self) -> Result<History, HistoryError> {
        History::open(&self.root, self.options.lfs_enabled)
    }

    /// Pull without reading anything.
    pub fn sync(&self) -> Result<Freshness, StoreError> {
        let clone = self.lock()?;
        clone.verify()?;
        self.pull(&clone, "*")
    }

    pub fn read(&self, path: &str) -> Result<Mapping, StoreError> {
        Ok(self.read_snapshot(path)?.into_mapping())
    }

    pub fn read_as<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T, StoreError> {
        Ok(self.read_snapshot(path)?.decode())
    }

    /// Pull, then read `path`.
    ///
    /// Missing and corrupt documents read as empty. A transient pull failure
    /// that survives one retry yields the local content marked
    /// [`Freshness::Stale`]; a conflict is an error.
    pub fn read_snapshot(&self, path: &str) -> Result<Snapshot, StoreError> {
        let rel = validate_path(path)?;
        let clone = self.lock()?;
        clone.verify()?;
        let freshness = self.pull(&clone, &rel)?;
        let head = clone.head_oid().ok().flatten().map(|oid| oid.to_string());
        let (content, status) = document::load(&self.root.join(&rel), &rel)?;
        Ok(Snapshot {
            path: rel,
            content,
            status,
            freshness,
            head,
        })
    }

    pub fn write(
        &self,
        path: &str,
        content: &Mapping,
        message: &str,
        actor: &Actor,
    ) -> Result<WriteOutcome, StoreError> {
        self.write_as(path, content, message, actor)
    }

    pub fn write_as<T: Serialize + ?Sized>(
        &self,
        path: &str,
        content: &T,
        message: &str,
        actor: &Actor,
    ) -> Result<WriteOutcome, StoreError> {
        let rel = validate_path(path)?;
        let bytes = document::encode(&rel, content)?;
        self.commit_documents(vec![PendingDoc { rel, bytes }], message, actor)
    }

    /// Write several documents as one commit and one push.
    pub fn write_batch(
        &self,
        changes: &[(&str, Value)],
        message: &str,
        actor: &Actor,
    ) -> Result<WriteOutcome, StoreError> {
        let mut docs: Vec<PendingDoc> = Vec::with_capacity(changes.len());
        for (path, value) in changes {
            let rel = validate_path(path)?;
            if docs.iter().any(|d| d.rel == rel) {
                return Err(StoreError::InvalidPath {
                    path: rel,
                    reason: "path appears twice in one batch",
                });
            }
            let bytes = document::encode(&rel, value)?;
            docs.push(PendingDoc { rel, bytes });
        }
        if docs.is_empty() {
            return Ok(WriteOutcome::Unchanged);
        }
        self.commit_documents(docs, message, actor)
    }

    fn lock(&self) -> Result<MutexGuard<'_, CloneHandle>, StoreError> {
        self.clone.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn pull(&self, clone: &CloneHandle, path: &str) -> Result<Freshness, StoreError> {
        let committer = self.options.committer().map_err(|e| StoreError::RepositoryUnavailable {
            remote: clone.remote_url().to_string(),
            source: e.into(),
        })?;
        let resolution = drive(OpKind::Read, "pull", || {
            pull_rebase(
                clone,
                self.transport.as_ref(),
                self.options.timeout(),
                &committer,
            )
        });
        match resolution {
            Resolution::Done(_) => Ok(Freshness::Fresh),
            Resolution::Conflict(source) => Err(StoreError::Conflict {
                path: path.to_string(),
                op: "pull",
                message: format!(
                    "{source}; resolve it on the remote (e.g. in the hosting web UI), then retry"
                ),
            }),
            Resolution::Exhausted(error) => {
                tracing::warn!(
                    path,
                    %error,
                    "pull failed after retry; serving last-known local content"
                );
                Ok(Freshness::Stale)
            }
            Resolution::Fatal(source) => Err(StoreError::RepositoryUnavailable {
                remote: clone.remote_url().to_string(),
                source,
            }),
        }
    }

    fn commit_documents(
        &self,
        docs: Vec<PendingDoc>,
        message: &str,
        actor: &Actor,
    ) -> Result<WriteOutcome, StoreError> {
        let label = docs
            .iter()
            .map(|d| d.rel.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let clone = self.lock()?;
        clone.verify()?;

        let prior_head = clone.head_oid().map_err(|source| StoreError::WriteFailed {
            path: label.clone(),
            op: "stage",
            source,
        })?;
        let backups = docs
            .iter()
            .map(|d| Backup::capture(self.root.join(&d.rel)))
            .collect::<Result<Vec<_>, _>>()?;

        for (doc, backup) in docs.iter().zip(&backups) {
            if let Err(source) = document::write_atomic(&backup.abs, &doc.bytes) {
                restore_files(&backups);
                return Err(StoreError::Io {
                    path: backup.abs.clone(),
                    op: "write",
                    source,
                });
            }
        }

        let info = match self.stage_and_commit(&clone, &docs, message, actor) {
            Ok(Some(info)) => info,
            Ok(None) => {
                tracing::debug!(paths = %label, "content unchanged; nothing to commit");
                return Ok(WriteOutcome::Unchanged);
            }
            Err(source) => {
                rollback(&clone, prior_head, &docs, &backups);
                return Err(StoreError::WriteFailed {
                    path: label,
                    op: "commit",
                    source,
                });
            }
        };

        let resolution = drive(OpKind::Write, "push", || {
            self.transport.push(
                clone.repo(),
                clone.remote_name(),
                clone.branch(),
                self.options.timeout(),
            )
        });
        match resolution {
            Resolution::Done(()) => {
                tracing::info!(
                    paths = %label,
                    oid = %info.hash,
                    actor = %actor,
                    "committed and pushed"
                );
                Ok(WriteOutcome::Committed(info))
            }
            Resolution::Conflict(error) => {
                tracing::warn!(paths = %label, %error, "push rejected; rolled back local write");
                rollback(&clone, prior_head, &docs, &backups);
                Err(StoreError::Conflict {
                    path: label,
                    op: "push",
                    message: "someone else changed the remote first; re-pull and retry".into(),
                })
            }
            Resolution::Exhausted(source) | Resolution::Fatal(source) => {
                tracing::warn!(paths = %label, error = %source, "push failed; rolled back local write");
                rollback(&clone, prior_head, &docs, &backups);
                Err(StoreError::WriteFailed {
                    path: label,
                    op: "push",
                    source,
                })
            }
        }
    }

    /// Stage `docs` and commit on the local branch. `None` when the resulting
    /// tree equals HEAD's.
    fn stage_and_commit(
        &self,
        clone: &CloneHandle,
        docs: &[PendingDoc],
        message: &str,
        actor: &Actor,
    ) -> Result<Option<CommitInfo>, GitError> {
        let repo = clone.repo();
        let mut index = repo.index()?;
        index.read(false)?;
        for doc in docs {
            index.add_path(Path::new(&doc.rel))?;
        }
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent = match clone.head_oid()? {
            Some(oid) => Some(repo.find_commit(oid)?),
            None => None,
        };
        if let Some(parent) = &parent
            && parent.tree_id() == tree_id
        {
            return Ok(None);
        }

        let tree = repo.find_tree(tree_id)?;
        let author = self.options.author(actor)?;
        let committer = self.options.committer()?;
        let parents: Vec<_> = parent.iter().collect();
        let oid = repo.commit(
            Some(&clone.branch_ref()),
            &author,
            &committer,
            message,
            &tree,
            &parents,
        )?;
        let commit = repo.find_commit(oid)?;
        let short_hash = commit
            .as_object()
            .short_id()?
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(Some(CommitInfo {
            hash: oid.to_string(),
            short_hash,
            message: message.to_string(),
            author: actor.username().to_string(),
            paths: docs.iter().map(|d| d.rel.clone()).collect(),
        }))
    }
}

/// Undo a local write: branch and index back to `prior_head`, files back to
/// their pre-write bytes. Failures are logged; the caller reports the original
/// error.
fn rollback(clone: &CloneHandle, prior_head: Option<Oid>, docs: &[PendingDoc], backups: &[Backup]) {
    if let Err(error) = reset_branch(clone, prior_head, docs) {
        tracing::error!(%error, ?prior_head, "failed to reset branch during rollback");
    }
    restore_files(backups);
}

fn reset_branch(
    clone: &CloneHandle,
    prior_head: Option<Oid>,
    docs: &[PendingDoc],
) -> Result<(), git2::Error> {
    let repo = clone.repo();
    match prior_head {
        Some(oid) => {
            let target = repo.find_object(oid, None)?;
            repo.reset(&target, ResetType::Mixed, None)?;
        }
        None => {
            if let Ok(mut reference) = repo.find_reference(&clone.branch_ref()) {
                reference.delete()?;
            }
            let mut index = repo.index()?;
            for doc in docs {
                match index.remove_path(Path::new(&doc.rel)) {
                    Err(e) if e.code() != git2::ErrorCode::NotFound => return Err(e),
                    _ => {}
                }
            }
            index.write()?;
        }
    }
    Ok(())
}

fn restore_files(backups: &[Backup]) {
    for backup in backups {
        if let Err(error) = backup.restore() {
            tracing::error!(path = %backup.abs.display(), %error, "failed to restore file during rollback");
        }
    }
}
