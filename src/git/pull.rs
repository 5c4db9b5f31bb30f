//! Pull with rebase: fetch the configured branch and integrate it into the
//! local branch without ever creating merge commits.

use std::time::Duration;

use git2::build::CheckoutBuilder;
use git2::{ErrorCode, Index, Oid, RebaseOptions, Repository, Signature};

use super::clone::CloneHandle;
use super::error::GitError;
use super::remote::{Transport, branch_ref, tracking_ref};

/// What integrating the fetched remote branch did to the local branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The remote has no such branch yet.
    RemoteEmpty,
    UpToDate,
    FastForwarded { from: Option<Oid>, to: Oid },
    /// Local commits not yet on the remote; kept as-is.
    LocalAhead { ahead: usize },
    Rebased { onto: Oid, replayed: usize },
}

impl PullOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullOutcome::RemoteEmpty => "remote_empty",
            PullOutcome::UpToDate => "up_to_date",
            PullOutcome::FastForwarded { .. } => "fast_forwarded",
            PullOutcome::LocalAhead { .. } => "local_ahead",
            PullOutcome::Rebased { .. } => "rebased",
        }
    }
}

/// Fetch `<remote>/<branch>` and rebase the local branch onto it.
pub fn pull_rebase(
    clone: &CloneHandle,
    transport: &dyn Transport,
    timeout: Option<Duration>,
    committer: &Signature<'_>,
) -> Result<PullOutcome, GitError> {
    transport.fetch(clone.repo(), clone.remote_name(), clone.branch(), timeout)?;
    let outcome = integrate(clone.repo(), clone.remote_name(), clone.branch(), committer)?;
    tracing::debug!(
        remote = clone.remote_name(),
        branch = clone.branch(),
        outcome = outcome.as_str(),
        "pull complete"
    );
    Ok(outcome)
}

/// Integrate the already-fetched remote-tracking ref into the local branch.
pub(crate) fn integrate(
    repo: &Repository,
    remote: &str,
    branch: &str,
    committer: &Signature<'_>,
) -> Result<PullOutcome, GitError> {
    // The cached index goes stale when another handle commits in this clone.
    repo.index()?.read(false)?;

    let Some(remote_oid) = refname_to_id_optional(repo, &tracking_ref(remote, branch))? else {
        return Ok(PullOutcome::RemoteEmpty);
    };
    let local_ref = branch_ref(branch);

    let Some(local_oid) = refname_to_id_optional(repo, &local_ref)? else {
        checkout_commit(repo, remote_oid)?;
        repo.reference(&local_ref, remote_oid, true, "pull: initialize branch")?;
        repo.set_head(&local_ref)?;
        return Ok(PullOutcome::FastForwarded {
            from: None,
            to: remote_oid,
        });
    };

    if local_oid == remote_oid {
        return Ok(PullOutcome::UpToDate);
    }

    if repo.graph_descendant_of(remote_oid, local_oid)? {
        checkout_commit(repo, remote_oid)?;
        repo.reference(&local_ref, remote_oid, true, "pull: fast-forward")?;
        return Ok(PullOutcome::FastForwarded {
            from: Some(local_oid),
            to: remote_oid,
        });
    }

    if repo.graph_descendant_of(local_oid, remote_oid)? {
        let (ahead, _) = repo.graph_ahead_behind(local_oid, remote_oid)?;
        tracing::debug!(branch, ahead, "local branch has unpushed commits");
        return Ok(PullOutcome::LocalAhead { ahead });
    }

    rebase_onto(repo, &local_ref, remote_oid, committer)
}

fn rebase_onto(
    repo: &Repository,
    local_ref: &str,
    onto: Oid,
    committer: &Signature<'_>,
) -> Result<PullOutcome, GitError> {
    let branch = repo.reference_to_annotated_commit(&repo.find_reference(local_ref)?)?;
    let upstream = repo.find_annotated_commit(onto)?;
    let mut opts = RebaseOptions::new();
    let mut rebase = repo.rebase(Some(&branch), Some(&upstream), None, Some(&mut opts))?;

    let mut replayed = 0usize;
    while let Some(step) = rebase.next() {
        if let Err(e) = step {
            abort_quietly(&mut rebase);
            return Err(e.into());
        }

        let index = repo.index()?;
        if index.has_conflicts() {
            let paths = conflict_paths(&index);
            abort_quietly(&mut rebase);
            tracing::warn!(%onto, ?paths, "rebase stopped on conflicting paths");
            return Err(GitError::RebaseConflict { onto, paths });
        }

        match rebase.commit(None, committer, None) {
            Ok(_) => replayed += 1,
            // Patch already present upstream.
            Err(e) if e.code() == ErrorCode::Applied => {}
            Err(e) => {
                abort_quietly(&mut rebase);
                return Err(e.into());
            }
        }
    }
    rebase.finish(Some(committer))?;

    Ok(PullOutcome::Rebased { onto, replayed })
}

fn abort_quietly(rebase: &mut git2::Rebase<'_>) {
    if let Err(e) = rebase.abort() {
        tracing::warn!(error = %e, "failed to abort rebase");
    }
}

fn conflict_paths(index: &Index) -> Vec<String> {
    let Ok(conflicts) = index.conflicts() else {
        return Vec::new();
    };
    let mut paths: Vec<String> = conflicts
        .filter_map(Result::ok)
        .filter_map(|c| c.our.or(c.their).or(c.ancestor))
        .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

fn checkout_commit(repo: &Repository, oid: Oid) -> Result<(), GitError> {
    let commit = repo.find_commit(oid)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    repo.checkout_tree(commit.as_object(), Some(&mut checkout))
        .map_err(|e| match e.code() {
            ErrorCode::Conflict => GitError::CheckoutConflict(e),
            _ => GitError::Git(e),
        })
}

pub(crate) fn refname_to_id_optional(
    repo: &Repository,
    name: &str,
) -> Result<Option<Oid>, GitError> {
    match repo.refname_to_id(name) {
        Ok(oid) => Ok(Some(oid)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
