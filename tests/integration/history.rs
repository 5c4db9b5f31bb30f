use std::fs;

use pdm_store::history::{HistoryError, HistoryOrder, HistoryQuery};
use pdm_store::{DocumentStore, ErrorKind, Mapping};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::fixtures::git::seed_remote;
use crate::fixtures::{Rig, actor};

fn write_version(store: &DocumentStore, rev: &str, user: &str) -> String {
    let mut doc = Mapping::new();
    doc.insert("bracket.step".into(), serde_json::json!({"revision": rev}));
    store
        .write("metadata.json", &doc, &format!("rev {rev}"), &actor(user))
        .unwrap()
        .commit()
        .unwrap()
        .hash
        .clone()
}

fn lfs_pointer(bytes: &[u8]) -> (String, String) {
    let oid = format!("{:x}", Sha256::digest(bytes));
    let text = format!(
        "version https://git-lfs.github.com/spec/v1\noid sha256:{oid}\nsize {}\n",
        bytes.len()
    );
    (oid, text)
}

#[test]
fn versions_resolve_by_full_and_short_hash() {
    let rig = Rig::new();
    let store = rig.open("a");
    let v1 = write_version(&store, "A", "alice");
    let v2 = write_version(&store, "B", "bob");

    let history = store.history().unwrap();
    let old = history.resolve(&v1, "metadata.json").unwrap();
    let old_json: Value = serde_json::from_slice(&old.bytes).unwrap();
    assert_eq!(old_json["bracket.step"]["revision"], "A");
    assert_eq!(old.commit, v1);
    assert_eq!(old.size, old.bytes.len() as u64);

    let new = history.resolve(&v2[..7], "metadata.json").unwrap();
    assert_eq!(new.commit, v2);

    let mut streamed = Vec::new();
    let info = history.stream(&v2, "metadata.json", &mut streamed).unwrap();
    assert_eq!(streamed, new.bytes);
    assert!(info.lfs_oid.is_none());
}

#[test]
fn missing_commit_and_missing_path_are_distinct() {
    let rig = Rig::new();
    let store = rig.open("a");
    let v1 = write_version(&store, "A", "alice");
    let history = store.history().unwrap();

    let err = history.resolve("0123456789abcdef", "metadata.json").unwrap_err();
    assert!(matches!(err, HistoryError::CommitNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::CommitNotFound);

    let err = history.resolve(&v1, "parts.json").unwrap_err();
    assert!(matches!(err, HistoryError::PathNotFoundAtCommit { .. }));
    assert_eq!(err.kind(), ErrorKind::PathNotFoundAtCommit);
    assert_eq!(err.kind().http_status(), 404);

    let err = history.resolve(&v1, "../metadata.json").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn list_history_pages_commits_touching_a_path() {
    let rig = Rig::new();
    let store = rig.open("a");
    let v1 = write_version(&store, "A", "alice");
    store
        .write("parts.json", &Mapping::new(), "unrelated", &actor("carol"))
        .unwrap();
    let v2 = write_version(&store, "B", "bob");
    let v3 = write_version(&store, "C", "alice");

    let history = store.history().unwrap();
    let all: Vec<_> = history
        .list_history("metadata.json", 10, 0)
        .unwrap()
        .into_iter()
        .map(|e| e.hash)
        .collect();
    assert_eq!(all, vec![v3.clone(), v2.clone(), v1.clone()]);

    let page = history.list_history("metadata.json", 1, 1).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].hash, v2);
    assert_eq!(page[0].author, "bob");
    assert_eq!(page[0].message, "rev B");
    assert_eq!(page[0].short_hash, v2[..page[0].short_hash.len()]);

    let oldest = history
        .list_history_with(
            "metadata.json",
            &HistoryQuery {
                limit: Some(1),
                offset: 0,
                order: HistoryOrder::OldestFirst,
            },
        )
        .unwrap();
    assert_eq!(oldest[0].hash, v1);

    assert!(history.list_history("roles.json", 10, 0).unwrap().is_empty());
}

#[test]
fn lfs_pointers_resolve_to_local_objects() {
    let rig = Rig::new();
    let drawing = b"%PDF-1.7 pretend drawing bytes".to_vec();
    let (oid, pointer) = lfs_pointer(&drawing);
    let (missing_oid, missing_pointer) = lfs_pointer(b"never fetched");
    seed_remote(
        rig.remote(),
        &[
            ("drawing.pdf", pointer.as_bytes()),
            ("sketch.pdf", missing_pointer.as_bytes()),
        ],
        "add drawings",
    )
    .unwrap();
    let store = rig.open("a");

    let objects = rig.clone_path("a").join(".git/lfs/objects");
    let dir = objects.join(&oid[..2]).join(&oid[2..4]);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(&oid), &drawing).unwrap();

    let history = store.history().unwrap();
    let blob = history.resolve("HEAD", "drawing.pdf").unwrap();
    assert_eq!(blob.bytes, drawing);
    assert_eq!(blob.size, drawing.len() as u64);

    let mut out = Vec::new();
    let info = history.stream("HEAD", "drawing.pdf", &mut out).unwrap();
    assert_eq!(info.lfs_oid.as_deref(), Some(oid.as_str()));

    let err = history.resolve("HEAD", "sketch.pdf").unwrap_err();
    assert!(matches!(&err, HistoryError::LfsObjectMissing { oid, .. } if *oid == missing_oid));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
