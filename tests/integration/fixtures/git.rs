use std::path::Path;

use git2::{Oid, Repository, Signature, Sort};

const MAIN: &str = "refs/heads/main";

pub fn init_bare_remote(path: &Path) -> Result<Repository, String> {
    let repo = Repository::init_bare(path)
        .map_err(|err| format!("git init --bare failed for {path:?}: {err}"))?;
    repo.set_head(MAIN)
        .map_err(|err| format!("set HEAD failed for {path:?}: {err}"))?;
    Ok(repo)
}

/// Commit top-level `files` straight into the bare remote's `main`, as some
/// other client would.
pub fn seed_remote(remote: &Path, files: &[(&str, &[u8])], message: &str) -> Result<Oid, String> {
    let repo = open(remote)?;
    let parent = match repo.refname_to_id(MAIN) {
        Ok(oid) => Some(
            repo.find_commit(oid)
                .map_err(|err| format!("find tip failed: {err}"))?,
        ),
        Err(_) => None,
    };
    let base = match &parent {
        Some(commit) => Some(
            commit
                .tree()
                .map_err(|err| format!("tip tree failed: {err}"))?,
        ),
        None => None,
    };
    let mut builder = repo
        .treebuilder(base.as_ref())
        .map_err(|err| format!("treebuilder failed: {err}"))?;
    for (name, bytes) in files {
        let blob = repo
            .blob(bytes)
            .map_err(|err| format!("write blob {name} failed: {err}"))?;
        builder
            .insert(name, blob, 0o100644)
            .map_err(|err| format!("insert {name} failed: {err}"))?;
    }
    let tree_id = builder
        .write()
        .map_err(|err| format!("write tree failed: {err}"))?;
    let tree = repo
        .find_tree(tree_id)
        .map_err(|err| format!("find tree failed: {err}"))?;
    let sig = Signature::now("Outside", "outside@test.com")
        .map_err(|err| format!("signature failed: {err}"))?;
    let parents: Vec<_> = parent.iter().collect();
    repo.commit(Some(MAIN), &sig, &sig, message, &tree, &parents)
        .map_err(|err| format!("commit failed: {err}"))
}

pub fn remote_tip(remote: &Path) -> Option<Oid> {
    open(remote).ok()?.refname_to_id(MAIN).ok()
}

pub fn remote_file(remote: &Path, path: &str) -> Option<Vec<u8>> {
    let repo = open(remote).ok()?;
    let tip = repo.refname_to_id(MAIN).ok()?;
    let tree = repo.find_commit(tip).ok()?.tree().ok()?;
    let entry = tree.get_path(Path::new(path)).ok()?;
    let blob = repo.find_blob(entry.id()).ok()?;
    Some(blob.content().to_vec())
}

pub fn remote_json(remote: &Path, path: &str) -> Option<serde_json::Value> {
    serde_json::from_slice(&remote_file(remote, path)?).ok()
}

/// Messages on `main`, newest first.
pub fn remote_messages(remote: &Path) -> Vec<String> {
    let Ok(repo) = open(remote) else {
        return Vec::new();
    };
    let Ok(tip) = repo.refname_to_id(MAIN) else {
        return Vec::new();
    };
    let mut walk = match repo.revwalk() {
        Ok(walk) => walk,
        Err(_) => return Vec::new(),
    };
    if walk.push(tip).is_err() || walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME).is_err() {
        return Vec::new();
    }
    walk.filter_map(|oid| oid.ok())
        .filter_map(|oid| repo.find_commit(oid).ok())
        .map(|commit| commit.message().unwrap_or_default().to_string())
        .collect()
}

pub fn local_head(clone: &Path) -> Option<Oid> {
    Repository::open(clone).ok()?.head().ok()?.target()
}

/// Commit `files` in a clone's working tree through a separate handle,
/// without pushing.
pub fn commit_local(clone: &Path, files: &[(&str, &[u8])], message: &str) -> Result<Oid, String> {
    let repo = Repository::open(clone).map_err(|err| format!("open clone failed: {err}"))?;
    let mut index = repo.index().map_err(|err| format!("index failed: {err}"))?;
    for (name, bytes) in files {
        std::fs::write(clone.join(name), bytes).map_err(|err| format!("write {name} failed: {err}"))?;
        index
            .add_path(Path::new(name))
            .map_err(|err| format!("stage {name} failed: {err}"))?;
    }
    index.write().map_err(|err| format!("write index failed: {err}"))?;
    let tree_id = index
        .write_tree()
        .map_err(|err| format!("write tree failed: {err}"))?;
    let tree = repo
        .find_tree(tree_id)
        .map_err(|err| format!("find tree failed: {err}"))?;
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<_> = parent.iter().collect();
    let sig = Signature::now("Local", "local@test.com")
        .map_err(|err| format!("signature failed: {err}"))?;
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .map_err(|err| format!("commit failed: {err}"))
}

pub fn is_clean(clone: &Path) -> Result<bool, String> {
    let repo = Repository::open(clone).map_err(|err| format!("open clone failed: {err}"))?;
    let statuses = repo
        .statuses(None)
        .map_err(|err| format!("status failed: {err}"))?;
    Ok(statuses.is_empty())
}

fn open(remote: &Path) -> Result<Repository, String> {
    Repository::open_bare(remote).map_err(|err| format!("open remote failed for {remote:?}: {err}"))
}
