//! Historical file access: bytes of a path at a past commit, and the commits
//! that touched a path.
//!
//! Uses its own repository handle on the clone so large downloads never hold
//! the store's write lock. Nothing here touches the working tree.

pub mod lfs;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use git2::{Commit, ObjectType, Odb, Oid, Repository, Sort};
use serde::Serialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::error::{ErrorKind, Transience};
use crate::store::validate_path;
use lfs::{LfsStore, MAX_POINTER_SIZE, Pointer};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HistoryError {
    #[error("commit `{commit_ref}` not found")]
    CommitNotFound { commit_ref: String },

    #[error("{path} does not exist at commit {commit}")]
    PathNotFoundAtCommit { commit: String, path: String },

    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("lfs object {oid} for {path} is not in the local object store")]
    LfsObjectMissing { oid: String, path: String },

    #[error("lfs object {oid} for {path} failed verification (got {actual})")]
    LfsChecksumMismatch {
        oid: String,
        actual: String,
        path: String,
    },

    #[error("failed to open repository at {0}: {1}")]
    OpenRepo(PathBuf, #[source] git2::Error),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HistoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HistoryError::CommitNotFound { .. } => ErrorKind::CommitNotFound,
            HistoryError::PathNotFoundAtCommit { .. } => ErrorKind::PathNotFoundAtCommit,
            HistoryError::InvalidPath { .. } => ErrorKind::InvalidInput,
            HistoryError::LfsObjectMissing { .. } => ErrorKind::NotFound,
            HistoryError::LfsChecksumMismatch { .. } => ErrorKind::RepositoryCorrupt,
            HistoryError::OpenRepo(_, _) | HistoryError::Git(_) | HistoryError::Io(_) => {
                ErrorKind::RepositoryUnavailable
            }
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            HistoryError::Io(_) => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }
}

/// One version of one path, fully buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalBlob {
    pub commit: String,
    pub path: String,
    pub size: u64,
    pub bytes: Vec<u8>,
}

/// What [`History::stream`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub commit: String,
    pub path: String,
    pub size: u64,
    /// Set when the content came from the LFS object store.
    pub lfs_oid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub hash: String,
    pub short_hash: String,
    pub author: String,
    /// RFC 3339, in the committer's offset.
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum HistoryOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// `None` means unbounded.
    pub limit: Option<usize>,
    pub offset: usize,
    pub order: HistoryOrder,
}

pub struct History {
    repo: Repository,
    lfs: Option<LfsStore>,
}

impl History {
    pub fn open(root: &Path, lfs_enabled: bool) -> Result<Self, HistoryError> {
        let repo =
            Repository::open(root).map_err(|e| HistoryError::OpenRepo(root.to_path_buf(), e))?;
        let lfs = lfs_enabled.then(|| LfsStore::new(repo.path()));
        Ok(Self { repo, lfs })
    }

    /// Bytes of `path` as of `commit_ref` (full or abbreviated hash, or any
    /// revision git can parse).
    pub fn resolve(&self, commit_ref: &str, path: &str) -> Result<HistoricalBlob, HistoryError> {
        let mut bytes = Vec::new();
        let info = self.stream(commit_ref, path, &mut bytes)?;
        Ok(HistoricalBlob {
            commit: info.commit,
            path: info.path,
            size: info.size,
            bytes,
        })
    }

    /// Copy the bytes of `path` as of `commit_ref` into `out` without
    /// buffering the whole object where the object database allows it.
    pub fn stream<W: Write + ?Sized>(
        &self,
        commit_ref: &str,
        path: &str,
        out: &mut W,
    ) -> Result<BlobInfo, HistoryError> {
        let rel = history_path(path)?;
        let commit = self.find_commit(commit_ref)?;
        let commit_id = commit.id().to_string();
        let blob_id = blob_at(&commit, &rel)?.ok_or_else(|| HistoryError::PathNotFoundAtCommit {
            commit: commit_id.clone(),
            path: rel.clone(),
        })?;

        let odb = self.repo.odb()?;
        let (size, _) = odb.read_header(blob_id)?;

        if let Some(lfs) = &self.lfs
            && size <= MAX_POINTER_SIZE
        {
            let blob = self.repo.find_blob(blob_id)?;
            if let Some(pointer) = Pointer::parse(blob.content()) {
                let size = lfs.copy_object(&pointer, &rel, out)?;
                return Ok(BlobInfo {
                    commit: commit_id,
                    path: rel,
                    size,
                    lfs_oid: Some(pointer.oid),
                });
            }
        }

        let size = copy_blob(&self.repo, &odb, blob_id, out)?;
        tracing::debug!(commit = %commit_id, path = %rel, bytes = size, "served historical blob");
        Ok(BlobInfo {
            commit: commit_id,
            path: rel,
            size,
            lfs_oid: None,
        })
    }

    pub fn list_history(
        &self,
        path: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        self.list_history_with(
            path,
            &HistoryQuery {
                limit: Some(limit),
                offset,
                order: HistoryOrder::NewestFirst,
            },
        )
    }

    /// Commits reachable from HEAD whose content at `path` differs from every
    /// parent. An unborn branch or an untouched path yields an empty list.
    pub fn list_history_with(
        &self,
        path: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let rel = history_path(path)?;
        let Some(head) = self.repo.head().ok().and_then(|h| h.target()) else {
            return Ok(Vec::new());
        };

        let mut walk = self.repo.revwalk()?;
        walk.push(head)?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        // Newest-first pages can stop early.
        let needed = match query.order {
            HistoryOrder::NewestFirst => query.limit.map(|l| l.saturating_add(query.offset)),
            HistoryOrder::OldestFirst => None,
        };

        let mut entries = Vec::new();
        for oid in walk {
            if needed.is_some_and(|n| entries.len() >= n) {
                break;
            }
            let commit = self.repo.find_commit(oid?)?;
            if touches(&commit, &rel)? {
                entries.push(entry(&commit)?);
            }
        }

        if query.order == HistoryOrder::OldestFirst {
            entries.reverse();
        }
        let page = entries
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(page)
    }

    fn find_commit(&self, commit_ref: &str) -> Result<Commit<'_>, HistoryError> {
        let not_found = || HistoryError::CommitNotFound {
            commit_ref: commit_ref.to_string(),
        };
        if commit_ref.trim().is_empty() {
            return Err(not_found());
        }
        let object = self.repo.revparse_single(commit_ref).map_err(|_| not_found())?;
        object.peel_to_commit().map_err(|_| not_found())
    }
}

fn history_path(path: &str) -> Result<String, HistoryError> {
    validate_path(path).map_err(|e| HistoryError::InvalidPath {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Blob id at `path` in `commit`; `None` if absent or not a file.
fn blob_at(commit: &Commit<'_>, path: &str) -> Result<Option<Oid>, HistoryError> {
    let tree = commit.tree()?;
    match tree.get_path(Path::new(path)) {
        Ok(entry) if entry.kind() == Some(ObjectType::Blob) => Ok(Some(entry.id())),
        Ok(_) => Ok(None),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn touches(commit: &Commit<'_>, path: &str) -> Result<bool, HistoryError> {
    let current = blob_at(commit, path)?;
    if commit.parent_count() == 0 {
        return Ok(current.is_some());
    }
    for parent in commit.parents() {
        if blob_at(&parent, path)? == current {
            return Ok(false);
        }
    }
    Ok(true)
}

fn entry(commit: &Commit<'_>) -> Result<HistoryEntry, HistoryError> {
    let short_hash = commit
        .as_object()
        .short_id()?
        .as_str()
        .unwrap_or_default()
        .to_string();
    let author = commit.author();
    Ok(HistoryEntry {
        hash: commit.id().to_string(),
        short_hash,
        author: author.name().unwrap_or_default().to_string(),
        timestamp: rfc3339(commit.time()),
        message: commit.message().unwrap_or_default().trim_end().to_string(),
    })
}

fn rfc3339(t: git2::Time) -> String {
    let offset = UtcOffset::from_whole_seconds(t.offset_minutes() * 60).unwrap_or(UtcOffset::UTC);
    OffsetDateTime::from_unix_timestamp(t.seconds())
        .map(|dt| dt.to_offset(offset))
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| t.seconds().to_string())
}

fn copy_blob<W: Write + ?Sized>(
    repo: &Repository,
    odb: &Odb<'_>,
    id: Oid,
    out: &mut W,
) -> Result<u64, HistoryError> {
    match odb.reader(id) {
        Ok((mut reader, _, _)) => Ok(io::copy(&mut reader, out)?),
        // Packed objects cannot be streamed.
        Err(_) => {
            let blob = repo.find_blob(id)?;
            out.write_all(blob.content())?;
            Ok(blob.size() as u64)
        }
    }
}
